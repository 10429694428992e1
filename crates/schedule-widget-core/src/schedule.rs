use std::fmt;

use chrono::{Datelike, Weekday};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SCHEDULE_FIELD: &str = "schedule";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("schedule payload must be a JSON object")]
    NotAnObject,
    #[error("schedule field must be a JSON object keyed by day")]
    ScheduleNotAnObject,
    #[error("payload has neither a schedule field nor any day key")]
    MissingSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::Sat,
        Day::Sun,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mon => "Mon",
            Self::Tue => "Tue",
            Self::Wed => "Wed",
            Self::Thu => "Thu",
            Self::Fri => "Fri",
            Self::Sat => "Sat",
            Self::Sun => "Sun",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// The weekday at `now_unix_ms` in a zone `utc_offset_minutes` east of UTC,
    /// with the day boundary moved `rollover_minutes` past local midnight.
    #[must_use]
    pub fn current(now_unix_ms: u64, utc_offset_minutes: i32, rollover_minutes: i32) -> Option<Self> {
        let shift = i64::from(utc_offset_minutes) - i64::from(rollover_minutes);
        let local = i64::try_from(now_unix_ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)?
            .checked_add_signed(chrono::TimeDelta::try_minutes(shift)?)?;
        Some(match local.weekday() {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        })
    }

    /// Accepts the canonical keys plus full day names, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let prefix = normalized.get(..3)?;
        let day = match prefix {
            "mon" => Self::Mon,
            "tue" => Self::Tue,
            "wed" => Self::Wed,
            "thu" => Self::Thu,
            "fri" => Self::Fri,
            "sat" => Self::Sat,
            "sun" => Self::Sun,
            _ => return None,
        };
        let full = match day {
            Self::Mon => "monday",
            Self::Tue => "tuesday",
            Self::Wed => "wednesday",
            Self::Thu => "thursday",
            Self::Fri => "friday",
            Self::Sat => "saturday",
            Self::Sun => "sunday",
        };
        if normalized.len() == 3 || normalized == full {
            Some(day)
        } else {
            None
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub img: String,
}

impl Assignment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, img: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            img: img.into(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            id: coerce_string(object.get("id")),
            name: coerce_string(object.get("name")),
            img: coerce_string(object.get("img")),
        })
    }
}

/// Seven day slots, always all present. Each slot keeps a sequence so older
/// payloads with several entries per day still load, but [`ScheduleRecord::assign`]
/// only ever leaves one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleRecord {
    days: [Vec<Assignment>; 7],
}

impl ScheduleRecord {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn day(&self, day: Day) -> &[Assignment] {
        &self.days[day.index()]
    }

    #[must_use]
    pub fn assignment(&self, day: Day) -> Option<&Assignment> {
        self.days[day.index()].first()
    }

    pub fn assign(&mut self, day: Day, assignment: Assignment) {
        let slot = &mut self.days[day.index()];
        slot.clear();
        slot.push(assignment);
    }

    pub fn clear_day(&mut self, day: Day) {
        self.days[day.index()].clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Day, &[Assignment])> + '_ {
        Day::ALL
            .into_iter()
            .map(move |day| (day, self.days[day.index()].as_slice()))
    }

    /// Lenient read path: uses the `schedule` sub-field when present, otherwise
    /// the value itself. Unknown keys are ignored, non-array days become empty,
    /// non-object entries are dropped.
    ///
    /// Each day is read from exactly one key. The canonical key (`Mon`) wins
    /// over spellings like `monday`; among those, the last one wins.
    #[must_use]
    pub fn normalize(value: &Value) -> Self {
        let schedule = value
            .get(SCHEDULE_FIELD)
            .filter(|inner| inner.is_object())
            .unwrap_or(value);
        let mut record = Self::default();
        let Some(object) = schedule.as_object() else {
            return record;
        };
        let mut sources: [Option<(bool, &Vec<Value>)>; 7] = Default::default();
        for (key, entries) in object {
            let Some(day) = Day::parse(key) else {
                continue;
            };
            let Some(entries) = entries.as_array() else {
                continue;
            };
            let canonical = key == day.as_str();
            let slot = &mut sources[day.index()];
            if canonical || !slot.as_ref().is_some_and(|(was_canonical, _)| *was_canonical) {
                *slot = Some((canonical, entries));
            }
        }
        for (day, source) in record.days.iter_mut().zip(sources) {
            if let Some((_, entries)) = source {
                *day = entries.iter().filter_map(Assignment::from_value).collect();
            }
        }
        record
    }

    /// Write-path validation. Only structurally meaningless payloads are
    /// rejected; everything else goes through [`ScheduleRecord::normalize`].
    pub fn from_payload(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;
        if let Some(schedule) = object.get(SCHEDULE_FIELD) {
            if !schedule.is_object() {
                return Err(ValidationError::ScheduleNotAnObject);
            }
            return Ok(Self::normalize(schedule));
        }
        let has_day_key = object.keys().any(|key| Day::parse(key).is_some());
        if !object.is_empty() && !has_day_key {
            return Err(ValidationError::MissingSchedule);
        }
        Ok(Self::normalize(value))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (day, entries) in self.iter() {
            let entries = entries
                .iter()
                .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                .collect();
            object.insert(day.as_str().to_string(), Value::Array(entries));
        }
        Value::Object(object)
    }

    /// Envelope written to the remote blob and mirrored to the local cache.
    #[must_use]
    pub fn to_payload(&self, updated_at_ms: u64) -> Value {
        let mut object = Map::new();
        object.insert(SCHEDULE_FIELD.to_string(), self.to_value());
        object.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(format_timestamp(updated_at_ms)),
        );
        Value::Object(object)
    }
}

impl Serialize for ScheduleRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Day::ALL.len()))?;
        for (day, entries) in self.iter() {
            map.serialize_entry(day.as_str(), entries)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScheduleRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::normalize(&value))
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

fn format_timestamp(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};
    use serde_json::json;

    #[test]
    fn normalize_empty_object_yields_full_empty_week() {
        let record = ScheduleRecord::normalize(&json!({}));
        assert_eq!(
            record.to_value(),
            json!({"Mon": [], "Tue": [], "Wed": [], "Thu": [], "Fri": [], "Sat": [], "Sun": []})
        );
        assert!(record.is_empty());
    }

    #[test]
    fn normalize_prefers_schedule_sub_field() {
        let record = ScheduleRecord::normalize(&json!({
            "schedule": {"Wed": [{"id": "w1", "name": "Wednesday Film"}]},
            "Mon": [{"id": "ignored"}]
        }));
        assert_eq!(record.assignment(Day::Wed).map(|a| a.id.as_str()), Some("w1"));
        assert!(record.day(Day::Mon).is_empty());
    }

    #[test]
    fn normalize_coerces_fields_and_drops_garbage_entries() {
        let record = ScheduleRecord::normalize(&json!({
            "Mon": [{"id": 42, "name": null}, "not-an-object", 7],
            "Tue": "not-an-array",
            "Funday": [{"id": "x"}]
        }));
        assert_eq!(record.day(Day::Mon), [Assignment::new("42", "", "")]);
        assert!(record.day(Day::Tue).is_empty());
    }

    #[test]
    fn assign_replaces_instead_of_appending() {
        let mut record = ScheduleRecord::empty();
        record.assign(Day::Fri, Assignment::new("a", "First", ""));
        record.assign(Day::Fri, Assignment::new("b", "Second", "img/b.jpg"));
        assert_eq!(record.day(Day::Fri), [Assignment::new("b", "Second", "img/b.jpg")]);
        record.clear_day(Day::Fri);
        assert!(record.is_empty());
    }

    #[test]
    fn from_payload_rejects_only_unshaped_values() {
        assert_eq!(
            ScheduleRecord::from_payload(&json!([1, 2])),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            ScheduleRecord::from_payload(&json!({"schedule": 5})),
            Err(ValidationError::ScheduleNotAnObject)
        );
        assert_eq!(
            ScheduleRecord::from_payload(&json!({"weather": "sunny"})),
            Err(ValidationError::MissingSchedule)
        );
        assert_eq!(ScheduleRecord::from_payload(&json!({})), Ok(ScheduleRecord::empty()));
        let partial = ScheduleRecord::from_payload(&json!({"Sun": [{"id": "s"}]})).expect("valid");
        assert_eq!(partial.day(Day::Sun).len(), 1);
    }

    #[test]
    fn payload_serializes_days_in_week_order() {
        let mut record = ScheduleRecord::empty();
        record.assign(Day::Sun, Assignment::new("s", "Sunday", ""));
        let text = serde_json::to_string(&record).expect("serialize");
        let mon = text.find("\"Mon\"").expect("mon present");
        let sun = text.find("\"Sun\"").expect("sun present");
        assert!(mon < sun);

        let payload = record.to_payload(1_700_000_000_000);
        assert_eq!(payload[UPDATED_AT_FIELD], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(ScheduleRecord::normalize(&payload), record);
    }

    #[test]
    fn canonical_day_key_wins_over_full_name() {
        let record = ScheduleRecord::normalize(&json!({
            "monday": [{"id": "long", "name": "Long Key"}],
            "Mon": [{"id": "short", "name": "Short Key"}],
            "TUESDAY": [{"id": "first"}],
            "tuesday": [{"id": "second"}]
        }));
        assert_eq!(record.day(Day::Mon).len(), 1);
        assert_eq!(record.assignment(Day::Mon).map(|a| a.id.as_str()), Some("short"));
        assert_eq!(record.day(Day::Tue).len(), 1);
        assert_eq!(record.assignment(Day::Tue).map(|a| a.id.as_str()), Some("second"));
    }

    #[test]
    fn current_day_honors_offset_and_rollover() {
        // 2023-11-14T22:13:20Z, a Tuesday.
        let now = 1_700_000_000_000;
        assert_eq!(Day::current(now, 0, 0), Some(Day::Tue));
        assert_eq!(Day::current(now, 120, 0), Some(Day::Wed));
        assert_eq!(Day::current(now, 120, 120), Some(Day::Tue));
        assert_eq!(Day::current(now, 0, -120), Some(Day::Wed));
        assert_eq!(Day::current(now, -600, 0), Some(Day::Tue));
    }

    #[test]
    fn day_parse_accepts_full_names() {
        assert_eq!(Day::parse("monday"), Some(Day::Mon));
        assert_eq!(Day::parse(" SUN "), Some(Day::Sun));
        assert_eq!(Day::parse("Mond"), None);
        assert_eq!(Day::parse("x"), None);
    }

    fn arbitrary_payload(entries: Vec<(u8, u8, String)>) -> Value {
        let mut object = Map::new();
        for (key_seed, shape, text) in entries {
            let key = match Day::ALL.get(usize::from(key_seed % 9)) {
                Some(day) => day.as_str().to_string(),
                None => text.clone(),
            };
            let value = match shape % 4 {
                0 => json!([{ "id": text, "name": text }]),
                1 => json!(text),
                2 => json!(shape),
                _ => Value::Null,
            };
            object.insert(key, value);
        }
        Value::Object(object)
    }

    #[test]
    fn normalize_always_yields_seven_array_days() {
        fn property(entries: Vec<(u8, u8, String)>) -> TestResult {
            let value = ScheduleRecord::normalize(&arbitrary_payload(entries)).to_value();
            let Some(object) = value.as_object() else {
                return TestResult::failed();
            };
            let keys: Vec<&str> = object.keys().map(String::as_str).collect();
            let expected: Vec<&str> = Day::ALL.iter().map(|day| day.as_str()).collect();
            TestResult::from_bool(keys == expected && object.values().all(Value::is_array))
        }
        QuickCheck::new()
            .tests(200)
            .quickcheck(property as fn(Vec<(u8, u8, String)>) -> TestResult);
    }
}
