pub(crate) const CONFIG_GLOBAL: &str = "__SCHEDULE_WIDGET_CONFIG__";
pub(crate) const STYLESHEET_ASSET: &str = "stylesheet";
pub(crate) const STYLESHEET_ID: &str = "schedule-widget-styles";
pub(crate) const GRID_CLASS: &str = "schedule-widget__grid";
pub(crate) const DAY_CLASS: &str = "schedule-widget__day";
pub(crate) const TODAY_CLASS: &str = "schedule-widget__day--today";
pub(crate) const ENTRY_CLASS: &str = "schedule-widget__entry";
pub(crate) const NOTICE_CLASS: &str = "schedule-widget__notice";
pub(crate) const EMPTY_DAY_TEXT: &str = "Nothing scheduled";
pub(crate) const WIDGET_TITLE: &str = "This week";

pub(crate) const STYLESHEET: &str = r#"
.schedule-widget { display: block; margin: 1.5em 0; padding: 0 3.3%; }
.schedule-widget h2 { font-size: 1.4em; margin: 0 0 .6em; }
.schedule-widget__notice { opacity: .7; font-size: .9em; margin: 0 0 .6em; }
.schedule-widget__grid { display: grid; grid-template-columns: repeat(7, minmax(0, 1fr)); gap: .6em; }
.schedule-widget__day { background: rgba(255, 255, 255, .06); border-radius: .4em; padding: .6em; cursor: pointer; min-height: 6em; }
.schedule-widget__day--today { box-shadow: inset 0 0 0 2px currentColor; }
.schedule-widget__day:focus-visible { outline: 2px solid currentColor; }
.schedule-widget__day h3 { font-size: .95em; margin: 0 0 .4em; }
.schedule-widget__entry { display: flex; flex-direction: column; gap: .3em; font-size: .85em; }
.schedule-widget__entry img { width: 100%; aspect-ratio: 16 / 9; object-fit: cover; border-radius: .3em; }
@media (max-width: 720px) { .schedule-widget__grid { grid-template-columns: repeat(2, minmax(0, 1fr)); } }
"#;
