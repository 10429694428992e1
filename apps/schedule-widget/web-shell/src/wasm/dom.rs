use super::*;

use web_sys::{CustomEvent, CustomEventInit, MutationObserver, MutationObserverInit, Node};

/// The live document as a [`HostTree`].
pub(super) struct DomTree {
    document: Document,
}

impl DomTree {
    pub(super) fn new() -> Result<Self, BootError> {
        let window = web_sys::window().ok_or(BootError::WindowUnavailable)?;
        let document = window.document().ok_or(BootError::DocumentUnavailable)?;
        Ok(Self { document })
    }

    pub(super) fn document(&self) -> &Document {
        &self.document
    }

    fn observe(&self, target: &Node, subtree: bool, mut handler: ChangeHandler) -> Subscription {
        let callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |_records: js_sys::Array, _observer: MutationObserver| handler(),
        );
        let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(error) => {
                tracing::warn!(error = %js_error_message(&error), "mutation observer unavailable");
                return Subscription::detached();
            }
        };
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(subtree);
        if let Err(error) = observer.observe_with_options(target, &init) {
            tracing::warn!(error = %js_error_message(&error), "failed to observe host tree");
            return Subscription::detached();
        }
        Subscription::new(move || {
            observer.disconnect();
            // The subscription may be cancelled from inside the callback itself.
            spawn_local(async move { drop(callback) });
        })
    }
}

fn as_node(element: &Element) -> &Node {
    element
}

impl HostTree for DomTree {
    type Node = Element;

    fn find_container(&self, selector: &str) -> Option<Element> {
        self.document.query_selector(selector).ok().flatten()
    }

    fn children(&self, parent: &Element) -> Vec<Element> {
        let children = parent.children();
        (0..children.length())
            .filter_map(|index| children.item(index))
            .collect()
    }

    fn parent(&self, node: &Element) -> Option<Element> {
        node.parent_element()
    }

    fn is_connected(&self, node: &Element) -> bool {
        node.is_connected()
    }

    fn tag_name(&self, node: &Element) -> String {
        node.tag_name().to_ascii_lowercase()
    }

    fn class_names(&self, node: &Element) -> Vec<String> {
        node.class_name()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn set_attribute(&self, node: &Element, name: &str, value: &str) {
        if let Err(error) = node.set_attribute(name, value) {
            tracing::debug!(attribute = name, error = %js_error_message(&error), "set_attribute failed");
        }
    }

    fn is_visible(&self, node: &Element) -> bool {
        if !node.is_connected() || node.get_client_rects().length() == 0 {
            return false;
        }
        let Some(window) = self.document.default_view() else {
            return true;
        };
        let Ok(Some(style)) = window.get_computed_style(node) else {
            return true;
        };
        let property = |name: &str| style.get_property_value(name).unwrap_or_default();
        let opaque = property("opacity")
            .trim()
            .parse::<f64>()
            .map_or(true, |opacity| opacity > 0.0);
        property("display") != "none" && property("visibility") != "hidden" && opaque
    }

    fn query_marked(&self, root: &Element, attribute: &str) -> Vec<Element> {
        let Ok(nodes) = root.query_selector_all(&format!("[{attribute}]")) else {
            return Vec::new();
        };
        (0..nodes.length())
            .filter_map(|index| nodes.item(index))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn create_element(&self, tag: &str) -> Option<Element> {
        self.document.create_element(tag).ok()
    }

    fn insert_before(&self, parent: &Element, node: &Element, reference: Option<&Element>) {
        if let Err(error) = parent.insert_before(node, reference.map(as_node)) {
            tracing::debug!(error = %js_error_message(&error), "insert_before failed");
        }
    }

    fn remove(&self, node: &Element) {
        node.remove();
    }

    fn layout_order(&self, node: &Element) -> Option<String> {
        let order = node
            .dyn_ref::<HtmlElement>()?
            .style()
            .get_property_value("order")
            .ok()?;
        let order = order.trim();
        (!order.is_empty()).then(|| order.to_string())
    }

    fn set_layout_order(&self, node: &Element, order: Option<&str>) {
        let Some(element) = node.dyn_ref::<HtmlElement>() else {
            return;
        };
        let style = element.style();
        let _ = match order {
            Some(order) => style.set_property("order", order),
            None => style.remove_property("order").map(|_| ()),
        };
    }

    fn has_rendered_content(&self, node: &Element) -> bool {
        node.child_element_count() > 0
            || node
                .text_content()
                .is_some_and(|text| !text.trim().is_empty())
    }

    fn observe_children(&self, node: &Element, handler: ChangeHandler) -> Subscription {
        self.observe(node, false, handler)
    }

    fn observe_document(&self, handler: ChangeHandler) -> Subscription {
        self.observe(&self.document, true, handler)
    }
}

struct WrapperListener {
    wrapper: Element,
    callback: Closure<dyn FnMut(web_sys::Event)>,
}

/// Plain DOM rendering of the week. Clicking a day dispatches
/// `schedule-widget:day-select` (detail: day key) from the wrapper so the host
/// can open its own picker and call `assign`.
pub(super) struct DomSchedulePresenter {
    document: Document,
    rollover_minutes: i32,
    listener: RefCell<Option<WrapperListener>>,
}

impl DomSchedulePresenter {
    pub(super) fn new(document: Document, rollover_minutes: i32) -> Self {
        Self {
            document,
            rollover_minutes,
            listener: RefCell::new(None),
        }
    }

    fn today(&self) -> Option<Day> {
        // getTimezoneOffset is UTC minus local time.
        let utc_offset = -js_sys::Date::new_0().get_timezone_offset();
        Day::current(now_unix_ms(), utc_offset.round() as i32, self.rollover_minutes)
    }

    fn element(&self, tag: &str, class: Option<&str>, text: Option<&str>) -> Option<Element> {
        let element = self.document.create_element(tag).ok()?;
        if let Some(class) = class {
            element.set_class_name(class);
        }
        if text.is_some() {
            element.set_text_content(text);
        }
        Some(element)
    }

    fn build(&self, wrapper: &Element, view: &ScheduleView) -> Option<()> {
        wrapper.append_child(&self.element("h2", None, Some(WIDGET_TITLE))?).ok()?;
        if let Some(notice) = view.notice {
            wrapper
                .append_child(&self.element("p", Some(NOTICE_CLASS), Some(notice))?)
                .ok()?;
        }

        let grid = self.element("div", Some(GRID_CLASS), None)?;
        for column in &view.columns {
            let class = if column.is_today {
                format!("{DAY_CLASS} {TODAY_CLASS}")
            } else {
                DAY_CLASS.to_string()
            };
            let cell = self.element("div", Some(&class), None)?;
            cell.set_attribute(DAY_ATTRIBUTE, column.day.as_str()).ok()?;
            if column.is_today {
                cell.set_attribute("aria-current", "date").ok()?;
            }
            cell.set_attribute("role", "button").ok()?;
            cell.set_attribute("tabindex", "0").ok()?;
            cell.append_child(&self.element("h3", None, Some(column.label))?)
                .ok()?;
            if column.is_empty() {
                cell.append_child(&self.element("span", Some(ENTRY_CLASS), Some(EMPTY_DAY_TEXT))?)
                    .ok()?;
            }
            for entry in &column.entries {
                let item = self.element("div", Some(ENTRY_CLASS), None)?;
                item.set_attribute("data-id", &entry.id).ok()?;
                if let Some(image) = entry.image.as_deref() {
                    let img = self.element("img", None, None)?;
                    img.set_attribute("src", image).ok()?;
                    img.set_attribute("alt", &entry.title).ok()?;
                    img.set_attribute("loading", "lazy").ok()?;
                    item.append_child(&img).ok()?;
                }
                item.append_child(&self.element("span", None, Some(entry.title.as_str()))?)
                    .ok()?;
                cell.append_child(&item).ok()?;
            }
            grid.append_child(&cell).ok()?;
        }
        wrapper.append_child(&grid).ok()?;
        Some(())
    }

    fn bind_day_select(&self, wrapper: &Element) {
        let mut slot = self.listener.borrow_mut();
        if slot
            .as_ref()
            .is_some_and(|listener| listener.wrapper == *wrapper)
        {
            return;
        }
        if let Some(previous) = slot.take() {
            let _ = previous.wrapper.remove_event_listener_with_callback(
                "click",
                previous.callback.as_ref().unchecked_ref(),
            );
            spawn_local(async move { drop(previous) });
        }

        let target = wrapper.clone();
        let callback = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
            dispatch_day_select(&target, &event);
        });
        if let Err(error) =
            wrapper.add_event_listener_with_callback("click", callback.as_ref().unchecked_ref())
        {
            tracing::debug!(error = %js_error_message(&error), "failed to bind day selection");
            return;
        }
        *slot = Some(WrapperListener {
            wrapper: wrapper.clone(),
            callback,
        });
    }
}

impl SchedulePresenter<Element> for DomSchedulePresenter {
    fn render(&self, wrapper: &Element, schedule: &ScheduleRecord, source: ScheduleSource) {
        let view = ScheduleView::build(schedule, source, self.today());
        wrapper.set_text_content(None);
        if self.build(wrapper, &view).is_none() {
            tracing::warn!("failed to render schedule grid");
            return;
        }
        self.bind_day_select(wrapper);
    }
}

fn dispatch_day_select(wrapper: &Element, event: &web_sys::Event) {
    let Some(target) = event
        .target()
        .and_then(|target| target.dyn_into::<Element>().ok())
    else {
        return;
    };
    let Ok(Some(cell)) = target.closest(&format!("[{DAY_ATTRIBUTE}]")) else {
        return;
    };
    let Some(day) = cell.get_attribute(DAY_ATTRIBUTE) else {
        return;
    };
    let init = CustomEventInit::new();
    init.set_bubbles(true);
    init.set_detail(&JsValue::from_str(&day));
    match CustomEvent::new_with_event_init_dict(DAY_SELECT_EVENT, &init) {
        Ok(custom) => {
            let _ = wrapper.dispatch_event(&custom);
        }
        Err(error) => {
            tracing::debug!(error = %js_error_message(&error), "failed to create day-select event");
        }
    }
}

pub(super) fn inject_stylesheet(document: &Document) -> Result<(), BootError> {
    if document.get_element_by_id(STYLESHEET_ID).is_some() {
        return Ok(());
    }
    let style = document
        .create_element("style")
        .map_err(|error| BootError::Stylesheet(js_error_message(&error)))?;
    style.set_id(STYLESHEET_ID);
    style.set_text_content(Some(STYLESHEET));
    let parent: Node = match (document.head(), document.body()) {
        (Some(head), _) => head.into(),
        (None, Some(body)) => body.into(),
        (None, None) => return Err(BootError::DocumentUnavailable),
    };
    parent
        .append_child(&style)
        .map_err(|error| BootError::Stylesheet(js_error_message(&error)))?;
    Ok(())
}
