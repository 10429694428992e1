use super::*;

use web_sys::{EventTarget, History};

pub(super) struct BrowserLocation;

impl HostLocation for BrowserLocation {
    fn route_key(&self) -> String {
        let Some(window) = web_sys::window() else {
            return "/".to_string();
        };
        let location = window.location();
        route_key(
            &location.pathname().unwrap_or_default(),
            &location.search().unwrap_or_default(),
            &location.hash().unwrap_or_default(),
        )
    }
}

type SharedHandler = Rc<RefCell<NavigationHandler>>;

fn emit(handler: &SharedHandler, signal: NavigationSignal) {
    // A handler that navigates synchronously would re-enter; drop that signal.
    if let Ok(mut handler) = handler.try_borrow_mut() {
        (*handler)(signal);
    }
}

struct EventListener {
    target: EventTarget,
    event: &'static str,
    capture: bool,
    callback: Closure<dyn FnMut(web_sys::Event)>,
}

impl EventListener {
    fn install(
        target: EventTarget,
        event: &'static str,
        capture: bool,
        mut on_event: impl FnMut(web_sys::Event) + 'static,
    ) -> Option<Self> {
        let callback = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
            on_event(event);
        });
        target
            .add_event_listener_with_callback_and_bool(
                event,
                callback.as_ref().unchecked_ref(),
                capture,
            )
            .map_err(|error| {
                tracing::warn!(event, error = %js_error_message(&error), "failed to add listener");
            })
            .ok()?;
        Some(Self {
            target,
            event,
            capture,
            callback,
        })
    }

    fn remove(self) {
        let _ = self.target.remove_event_listener_with_callback_and_bool(
            self.event,
            self.callback.as_ref().unchecked_ref(),
            self.capture,
        );
        spawn_local(async move { drop(self) });
    }
}

/// Replaces `history.pushState`/`replaceState` with a wrapper that calls the
/// original, then reports the change.
struct HistoryPatch {
    history: History,
    method: &'static str,
    original: js_sys::Function,
    replacement: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
}

impl HistoryPatch {
    fn install(
        history: &History,
        method: &'static str,
        signal: NavigationSignal,
        handler: SharedHandler,
    ) -> Option<Self> {
        let key = JsValue::from_str(method);
        let original = js_sys::Reflect::get(history, &key)
            .ok()?
            .dyn_into::<js_sys::Function>()
            .ok()?;
        let target = history.clone();
        let delegate = original.clone();
        let replacement = Closure::<
            dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>,
        >::new(move |state: JsValue, title: JsValue, url: JsValue| {
            let result = delegate.call3(&target, &state, &title, &url);
            if result.is_ok() {
                emit(&handler, signal);
            }
            result
        });
        match js_sys::Reflect::set(history, &key, replacement.as_ref()) {
            Ok(true) => Some(Self {
                history: history.clone(),
                method,
                original,
                replacement,
            }),
            _ => {
                tracing::warn!(method, "history method could not be patched");
                None
            }
        }
    }

    fn restore(self) {
        let key = JsValue::from_str(self.method);
        // Another script may have wrapped ours since; leave its chain intact.
        let still_ours = js_sys::Reflect::get(&self.history, &key)
            .is_ok_and(|current| current == *self.replacement.as_ref());
        if still_ours {
            let _ = js_sys::Reflect::set(&self.history, &key, &self.original);
            spawn_local(async move { drop(self) });
        } else {
            self.replacement.forget();
        }
    }
}

/// Hash changes, history pushes/replaces, back/forward, and clicks on
/// elements that resolve to in-app links.
pub(super) struct BrowserNavigation;

impl NavigationSource for BrowserNavigation {
    fn subscribe(&self, handler: NavigationHandler) -> Subscription {
        let Some(window) = web_sys::window() else {
            return Subscription::detached();
        };
        let handler: SharedHandler = Rc::new(RefCell::new(handler));
        let mut listeners = Vec::new();

        let shared = Rc::clone(&handler);
        listeners.extend(EventListener::install(
            window.clone().into(),
            "hashchange",
            false,
            move |_event| emit(&shared, NavigationSignal::HashChange),
        ));
        let shared = Rc::clone(&handler);
        listeners.extend(EventListener::install(
            window.clone().into(),
            "popstate",
            false,
            move |_event| emit(&shared, NavigationSignal::PopState),
        ));
        if let Some(document) = window.document() {
            let shared = Rc::clone(&handler);
            listeners.extend(EventListener::install(
                document.into(),
                "click",
                true,
                move |event| {
                    if is_in_app_link_click(&event) {
                        emit(&shared, NavigationSignal::LinkClick);
                    }
                },
            ));
        }

        let mut patches = Vec::new();
        if let Ok(history) = window.history() {
            patches.extend(HistoryPatch::install(
                &history,
                "pushState",
                NavigationSignal::PushState,
                Rc::clone(&handler),
            ));
            patches.extend(HistoryPatch::install(
                &history,
                "replaceState",
                NavigationSignal::ReplaceState,
                Rc::clone(&handler),
            ));
        }
        tracing::debug!(
            listeners = listeners.len(),
            patched = patches.len(),
            "navigation hooks installed"
        );

        Subscription::new(move || {
            for listener in listeners {
                listener.remove();
            }
            for patch in patches.into_iter().rev() {
                patch.restore();
            }
        })
    }
}

fn is_in_app_link_click(event: &web_sys::Event) -> bool {
    if event.default_prevented() {
        return false;
    }
    if let Some(mouse_event) = event.dyn_ref::<MouseEvent>() {
        let modifiers = ClickModifiers {
            button: mouse_event.button(),
            meta: mouse_event.meta_key(),
            ctrl: mouse_event.ctrl_key(),
            shift: mouse_event.shift_key(),
            alt: mouse_event.alt_key(),
        };
        if !modifiers.is_plain_primary() {
            return false;
        }
    }
    let Some(target) = event
        .target()
        .and_then(|target| target.dyn_into::<Element>().ok())
    else {
        return false;
    };
    let Ok(Some(link)) = target.closest(LINK_SELECTOR) else {
        return false;
    };
    let candidate = LinkCandidate {
        href: link.get_attribute("href"),
        target: link.get_attribute("target"),
        download: link.has_attribute("download"),
        data_navigate: link.has_attribute("data-navigate"),
        data_href: link.get_attribute("data-href"),
        role: link.get_attribute("role"),
    };
    let origin = web_sys::window()
        .and_then(|window| window.location().origin().ok())
        .unwrap_or_default();
    candidate.is_in_app(&origin)
}
