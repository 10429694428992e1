use schedule_widget_core::{Day, ScheduleRecord, ScheduleSource};

pub const DAY_ATTRIBUTE: &str = "data-day";
pub const DAY_SELECT_EVENT: &str = "schedule-widget:day-select";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub id: String,
    pub title: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayColumn {
    pub day: Day,
    pub label: &'static str,
    pub entries: Vec<EntryView>,
    pub is_today: bool,
}

impl DayColumn {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Display-ready projection of a schedule; the DOM presenter only walks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleView {
    pub columns: Vec<DayColumn>,
    pub notice: Option<&'static str>,
}

#[cfg_attr(test, allow(dead_code))]
impl ScheduleView {
    pub fn build(schedule: &ScheduleRecord, source: ScheduleSource, today: Option<Day>) -> Self {
        let columns = schedule
            .iter()
            .map(|(day, assignments)| DayColumn {
                day,
                label: day_label(day),
                is_today: today == Some(day),
                entries: assignments
                    .iter()
                    .filter(|assignment| {
                        !assignment.id.trim().is_empty() || !assignment.name.trim().is_empty()
                    })
                    .map(|assignment| EntryView {
                        id: assignment.id.clone(),
                        title: if assignment.name.trim().is_empty() {
                            assignment.id.clone()
                        } else {
                            assignment.name.clone()
                        },
                        image: Some(assignment.img.trim())
                            .filter(|img| !img.is_empty())
                            .map(str::to_string),
                    })
                    .collect(),
            })
            .collect();
        let notice = match source {
            ScheduleSource::Remote => None,
            ScheduleSource::Cache => Some("Showing the last saved copy"),
            ScheduleSource::Default => Some("Schedule unavailable"),
        };
        Self { columns, notice }
    }

    pub fn is_blank(&self) -> bool {
        self.columns.iter().all(DayColumn::is_empty)
    }
}

pub fn day_label(day: Day) -> &'static str {
    match day {
        Day::Mon => "Monday",
        Day::Tue => "Tuesday",
        Day::Wed => "Wednesday",
        Day::Thu => "Thursday",
        Day::Fri => "Friday",
        Day::Sat => "Saturday",
        Day::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedule_widget_core::Assignment;

    #[test]
    fn columns_follow_week_order_with_titles() {
        let mut schedule = ScheduleRecord::empty();
        schedule.assign(Day::Wed, Assignment::new("s1", "Evening News", " /img/s1.jpg "));
        schedule.assign(Day::Sun, Assignment::new("s2", "  ", ""));

        let view = ScheduleView::build(&schedule, ScheduleSource::Remote, None);
        let labels: Vec<_> = view.columns.iter().map(|column| column.label).collect();
        assert_eq!(
            labels,
            ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"]
        );
        assert_eq!(
            view.columns[2].entries,
            vec![EntryView {
                id: "s1".to_string(),
                title: "Evening News".to_string(),
                image: Some("/img/s1.jpg".to_string()),
            }]
        );
        assert_eq!(view.columns[6].entries[0].title, "s2");
        assert_eq!(view.columns[6].entries[0].image, None);
        assert!(view.notice.is_none());
        assert!(!view.is_blank());
    }

    #[test]
    fn blank_entries_are_hidden_and_fallbacks_carry_notice() {
        let mut schedule = ScheduleRecord::empty();
        schedule.assign(Day::Mon, Assignment::default());

        let view = ScheduleView::build(&schedule, ScheduleSource::Cache, None);
        assert!(view.is_blank());
        assert_eq!(view.notice, Some("Showing the last saved copy"));

        let view = ScheduleView::build(&ScheduleRecord::empty(), ScheduleSource::Default, None);
        assert_eq!(view.notice, Some("Schedule unavailable"));
    }

    #[test]
    fn only_the_current_day_is_flagged() {
        // 2023-11-15T01:00:00Z with a two hour rollover is still Tuesday.
        let today = Day::current(1_700_010_000_000, 0, 120);
        let view = ScheduleView::build(&ScheduleRecord::empty(), ScheduleSource::Remote, today);
        let flagged: Vec<_> = view
            .columns
            .iter()
            .filter(|column| column.is_today)
            .map(|column| column.day)
            .collect();
        assert_eq!(flagged, [Day::Tue]);

        let view = ScheduleView::build(&ScheduleRecord::empty(), ScheduleSource::Remote, None);
        assert!(view.columns.iter().all(|column| !column.is_today));
    }
}
