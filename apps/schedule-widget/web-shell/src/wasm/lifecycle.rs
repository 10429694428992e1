use super::*;

use std::io;

use thiserror::Error;
use tracing::{Level, Metadata};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Error)]
pub(super) enum BootError {
    #[error("window is unavailable")]
    WindowUnavailable,
    #[error("document is unavailable")]
    DocumentUnavailable,
    #[error("failed to install stylesheet: {0}")]
    Stylesheet(String),
}

pub(super) struct BrowserClock;

impl Clock for BrowserClock {
    fn now_ms(&self) -> u64 {
        now_unix_ms()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(sleep(duration))
    }
}

pub(super) struct WasmSpawner;

impl Spawner for WasmSpawner {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        spawn_local(future);
    }
}

/// `window.localStorage`, which may be missing or throw in private modes.
pub(super) struct LocalStorageCache;

impl LocalStorageCache {
    fn storage() -> Result<web_sys::Storage, CacheError> {
        let window = web_sys::window()
            .ok_or_else(|| CacheError::Unavailable("window is unavailable".to_string()))?;
        match window.local_storage() {
            Ok(Some(storage)) => Ok(storage),
            Ok(None) => Err(CacheError::Unavailable(
                "localStorage is unavailable".to_string(),
            )),
            Err(error) => Err(CacheError::Unavailable(js_error_message(&error))),
        }
    }
}

impl LocalCache for LocalStorageCache {
    fn read(&self, key: &str) -> Option<String> {
        Self::storage().ok()?.get_item(key).ok().flatten()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|error| CacheError::Write(js_error_message(&error)))
    }
}

/// Reads `window.__SCHEDULE_WIDGET_CONFIG__`. An invalid override yields the
/// defaults plus the reason it was rejected.
pub(super) fn read_config() -> (WidgetConfig, Option<String>) {
    let Some(window) = web_sys::window() else {
        return (WidgetConfig::default(), None);
    };
    let Ok(raw) = js_sys::Reflect::get(&window, &JsValue::from_str(CONFIG_GLOBAL)) else {
        return (WidgetConfig::default(), None);
    };
    if raw.is_undefined() || raw.is_null() {
        return (WidgetConfig::default(), None);
    }
    let json = match js_sys::JSON::stringify(&raw) {
        Ok(json) => String::from(json),
        Err(error) => return (WidgetConfig::default(), Some(js_error_message(&error))),
    };
    match WidgetConfig::from_json_str(&json) {
        Ok(config) => (config, None),
        Err(error) => (WidgetConfig::default(), Some(error.to_string())),
    }
}

pub(super) fn install_logging(level: &str) {
    let filter = EnvFilter::try_new(level.trim()).unwrap_or_else(|_| EnvFilter::new("info"));
    // A second boot in the same page keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(ConsoleMakeWriter)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .try_init();
}

/// Routes formatted events to the console method matching their level.
pub(super) struct ConsoleMakeWriter;

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter::new(Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ConsoleWriter::new(*meta.level())
    }
}

pub(super) struct ConsoleWriter {
    level: Level,
    buffer: Vec<u8>,
}

impl ConsoleWriter {
    fn new(level: Level) -> Self {
        Self {
            level,
            buffer: Vec::new(),
        }
    }
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buffer);
        let line = JsValue::from_str(line.trim_end());
        match self.level {
            Level::ERROR => web_sys::console::error_1(&line),
            Level::WARN => web_sys::console::warn_1(&line),
            Level::INFO => web_sys::console::info_1(&line),
            _ => web_sys::console::debug_1(&line),
        }
    }
}

pub(super) fn set_boot_phase(phase: &str, detail: &str) {
    DIAGNOSTICS.with(|state| {
        let mut state = state.borrow_mut();
        state.phase = phase.to_string();
        state.detail = detail.to_string();
        if phase != "error" {
            state.last_error = None;
        }
    });
}

pub(super) fn set_boot_error(message: &str) {
    DIAGNOSTICS.with(|state| {
        let mut state = state.borrow_mut();
        state.phase = "error".to_string();
        state.detail = "startup failed".to_string();
        state.last_error = Some(message.to_string());
    });
    web_sys::console::error_1(&JsValue::from_str(&format!(
        "schedule widget failed to start: {message}"
    )));
}

pub(super) fn record_boot_started(now_ms: u64) {
    DIAGNOSTICS.with(|state| state.borrow_mut().boot_started_at_unix_ms = Some(now_ms));
}

pub(super) fn record_config_warning(warning: &str) {
    DIAGNOSTICS.with(|state| state.borrow_mut().config_warning = Some(warning.to_string()));
}

pub(super) fn record_route(route: &str) {
    DIAGNOSTICS.with(|state| state.borrow_mut().route = Some(route.to_string()));
}

pub(super) fn record_mount_outcome(outcome: &str, route: &str) {
    DIAGNOSTICS.with(|state| {
        let mut state = state.borrow_mut();
        state.mount_passes = state.mount_passes.saturating_add(1);
        state.last_mount_outcome = Some(outcome.to_string());
        state.route = Some(route.to_string());
    });
}

pub(super) fn now_unix_ms() -> u64 {
    let now = js_sys::Date::now();
    if !now.is_finite() || now.is_sign_negative() {
        return 0;
    }
    now.floor().min(u64::MAX as f64) as u64
}

pub(super) fn js_error_message(value: &JsValue) -> String {
    if let Some(message) = value.as_string() {
        return message;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{value:?}")
}

pub(super) fn to_js_value(value: &Value) -> Result<JsValue, JsValue> {
    js_sys::JSON::parse(&value.to_string())
}

pub(super) fn from_js_value(value: &JsValue) -> Result<Value, JsValue> {
    let json = js_sys::JSON::stringify(value)?;
    let json = json
        .as_string()
        .ok_or_else(|| JsValue::from_str("schedule payload is not serializable"))?;
    serde_json::from_str(&json).map_err(|error| JsValue::from_str(&error.to_string()))
}
