#![allow(clippy::needless_pass_by_value)]

#[cfg(any(target_arch = "wasm32", test))]
mod link_target;
#[cfg(any(target_arch = "wasm32", test))]
mod schedule_view;
#[cfg(target_arch = "wasm32")]
mod wasm_constants;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use std::cell::RefCell;
    use std::rc::Rc;
    use web_time::Duration;

    use async_trait::async_trait;
    use futures::future::LocalBoxFuture;
    use gloo_net::http::Request;
    use gloo_timers::future::sleep;
    use schedule_widget_core::host::{ChangeHandler, NavigationHandler};
    use schedule_widget_core::{
        Assignment, BlobTransport, CacheError, Clock, Day, HostLocation, HostTree, HttpBackend,
        HttpMethod, HttpRequest, HttpResponse, LifecycleController, LocalCache, NavigationSignal,
        NavigationSource, SaveOutcome, SchedulePresenter, ScheduleRecord, ScheduleSource, Spawner,
        Subscription, SyncError, TransportError, WidgetConfig, WidgetHost, route_key,
    };
    use serde::Serialize;
    use serde_json::{Value, json};
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::{JsFuture, spawn_local};
    use web_sys::{Document, Element, HtmlElement, MouseEvent};

    use crate::link_target::{ClickModifiers, LINK_SELECTOR, LinkCandidate};
    use crate::schedule_view::{DAY_ATTRIBUTE, DAY_SELECT_EVENT, ScheduleView};
    use crate::wasm_constants::*;

    mod dom;
    mod lifecycle;
    mod network;
    mod routing;

    use dom::*;
    use lifecycle::*;
    use network::*;
    use routing::*;

    type Controller = LifecycleController<DomTree>;

    thread_local! {
        static CONTROLLER: RefCell<Option<Controller>> = const { RefCell::new(None) };
        static DIAGNOSTICS: RefCell<BootDiagnostics> = RefCell::new(BootDiagnostics::default());
    }

    #[derive(Debug, Clone, Serialize)]
    struct BootDiagnostics {
        phase: String,
        detail: String,
        boot_started_at_unix_ms: Option<u64>,
        config_warning: Option<String>,
        route: Option<String>,
        mount_passes: u64,
        last_mount_outcome: Option<String>,
        last_error: Option<String>,
    }

    impl Default for BootDiagnostics {
        fn default() -> Self {
            Self {
                phase: "idle".to_string(),
                detail: "waiting for boot".to_string(),
                boot_started_at_unix_ms: None,
                config_warning: None,
                route: None,
                mount_passes: 0,
                last_mount_outcome: None,
                last_error: None,
            }
        }
    }

    #[wasm_bindgen(start)]
    pub fn start() {
        console_error_panic_hook::set_once();
        set_boot_phase("booting", "initializing schedule widget");
        match boot() {
            Ok(()) => set_boot_phase("running", "watching host navigation"),
            Err(error) => set_boot_error(&error.to_string()),
        }
    }

    #[wasm_bindgen]
    pub fn boot_diagnostics_json() -> String {
        DIAGNOSTICS.with(|state| {
            serde_json::to_string(&*state.borrow()).unwrap_or_else(|_| {
                "{\"phase\":\"error\",\"detail\":\"diagnostics serialization failed\"}".to_string()
            })
        })
    }

    /// Runs a mount pass and resolves with its outcome label.
    #[wasm_bindgen]
    pub async fn mount() -> Result<JsValue, JsValue> {
        let controller = current_controller()?;
        let outcome = controller.mount().await;
        Ok(JsValue::from_str(outcome.as_str()))
    }

    #[wasm_bindgen]
    pub fn unmount() -> Result<(), JsValue> {
        current_controller()?.unmount();
        Ok(())
    }

    #[wasm_bindgen]
    pub fn is_mounted() -> bool {
        CONTROLLER.with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|controller| controller.is_mounted())
        })
    }

    /// Resolves with `{ ok, schedule, source, fallback }` or
    /// `{ ok: false, status, error }`; transport failures never reject.
    #[wasm_bindgen]
    pub async fn load() -> Result<JsValue, JsValue> {
        let controller = current_controller()?;
        let result = match controller.load().await {
            Ok(loaded) => json!({
                "ok": true,
                "schedule": loaded.record.to_value(),
                "source": loaded.source.as_str(),
                "fallback": loaded.is_fallback(),
            }),
            Err(SyncError::LoadFailed { status, error }) => json!({
                "ok": false,
                "status": status,
                "error": error,
            }),
            Err(error) => return Err(JsValue::from_str(&error.to_string())),
        };
        to_js_value(&result)
    }

    /// Rejects only when `record` is not a schedule payload.
    #[wasm_bindgen]
    pub async fn save(record: JsValue) -> Result<JsValue, JsValue> {
        let controller = current_controller()?;
        let value = from_js_value(&record)?;
        let outcome = controller
            .save_value(&value)
            .await
            .map_err(|error| JsValue::from_str(&error.to_string()))?;
        let result = match outcome {
            SaveOutcome::Remote => json!({ "ok": true, "pending": false }),
            SaveOutcome::CachedOnly { status, error } => json!({
                "ok": false,
                "pending": true,
                "status": status,
                "error": error,
            }),
        };
        to_js_value(&result)
    }

    #[wasm_bindgen]
    pub fn assign(day: String, id: String, name: String, img: String) -> Result<(), JsValue> {
        let day = parse_day(&day)?;
        current_controller()?.assign(day, Assignment::new(id, name, img));
        Ok(())
    }

    #[wasm_bindgen]
    pub fn clear_day(day: String) -> Result<(), JsValue> {
        let day = parse_day(&day)?;
        current_controller()?.clear_day(day);
        Ok(())
    }

    fn boot() -> Result<(), BootError> {
        record_boot_started(now_unix_ms());
        let (config, warning) = read_config();
        install_logging(&config.log_level);
        if let Some(warning) = warning.as_deref() {
            tracing::warn!(error = %warning, "ignoring invalid widget config override");
            record_config_warning(warning);
        }

        let tree = Rc::new(DomTree::new()?);
        let presenter = Rc::new(DomSchedulePresenter::new(
            tree.document().clone(),
            config.day_rollover_minutes,
        ));
        let transport = BlobTransport::from_config(&config, Rc::new(FetchBackend))
            .with_host_client(Rc::new(HostFunctionBackend::new(&config.host_request_global)));
        let host = WidgetHost {
            tree: Rc::clone(&tree),
            clock: Rc::new(BrowserClock),
            spawner: Rc::new(WasmSpawner),
            location: Rc::new(BrowserLocation),
            presenter,
        };
        let controller = Controller::new(config, host, transport, Rc::new(LocalStorageCache));
        controller.set_outcome_listener(|route, outcome| record_mount_outcome(outcome.as_str(), route));
        if controller.mark_asset_loaded(STYLESHEET_ASSET) {
            inject_stylesheet(tree.document())?;
        }

        controller.start(&BrowserNavigation);
        record_route(&BrowserLocation.route_key());
        let previous = CONTROLLER.with(|slot| slot.borrow_mut().replace(controller));
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    fn current_controller() -> Result<Controller, JsValue> {
        CONTROLLER
            .with(|slot| slot.borrow().clone())
            .ok_or_else(|| JsValue::from_str("schedule widget is not running"))
    }

    fn parse_day(raw: &str) -> Result<Day, JsValue> {
        Day::parse(raw).ok_or_else(|| JsValue::from_str(&format!("unknown day: {raw}")))
    }
}
