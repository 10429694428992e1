use std::fmt;

use crate::schedule::ScheduleRecord;
use crate::sync::ScheduleSource;

pub type ChangeHandler = Box<dyn FnMut()>;
pub type NavigationHandler = Box<dyn FnMut(NavigationSignal)>;

/// Handle returned by every subscribe call. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    #[must_use]
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The host page tree. Implementations wrap the live DOM in the browser and an
/// in-memory tree in tests. Mutation notifications are batched and delivered
/// after the mutating call returns, never re-entrantly.
pub trait HostTree {
    type Node: Clone + PartialEq + fmt::Debug + 'static;

    fn find_container(&self, selector: &str) -> Option<Self::Node>;
    fn children(&self, parent: &Self::Node) -> Vec<Self::Node>;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    fn is_connected(&self, node: &Self::Node) -> bool;

    fn tag_name(&self, node: &Self::Node) -> String;
    fn class_names(&self, node: &Self::Node) -> Vec<String>;
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str);
    /// Rendered with a layout box, non-zero opacity and not `display: none`.
    fn is_visible(&self, node: &Self::Node) -> bool;
    /// Descendants of `root` (at any depth) carrying `attribute`, in tree order.
    fn query_marked(&self, root: &Self::Node, attribute: &str) -> Vec<Self::Node>;

    fn create_element(&self, tag: &str) -> Option<Self::Node>;
    /// Moves `node` under `parent` before `reference`, or to the end when `None`.
    fn insert_before(&self, parent: &Self::Node, node: &Self::Node, reference: Option<&Self::Node>);
    fn remove(&self, node: &Self::Node);

    /// Explicit layout-order hint (CSS `order`) set on the node, if any.
    fn layout_order(&self, node: &Self::Node) -> Option<String>;
    fn set_layout_order(&self, node: &Self::Node, order: Option<&str>);

    fn has_rendered_content(&self, node: &Self::Node) -> bool;

    /// Child-list changes of `node` only, not its subtree.
    fn observe_children(&self, node: &Self::Node, handler: ChangeHandler) -> Subscription;
    /// Structural changes anywhere in the document.
    fn observe_document(&self, handler: ChangeHandler) -> Subscription;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSignal {
    HashChange,
    PushState,
    ReplaceState,
    PopState,
    LinkClick,
}

impl NavigationSignal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HashChange => "hashchange",
            Self::PushState => "pushstate",
            Self::ReplaceState => "replacestate",
            Self::PopState => "popstate",
            Self::LinkClick => "link_click",
        }
    }
}

pub trait NavigationSource {
    fn subscribe(&self, handler: NavigationHandler) -> Subscription;
}

pub trait HostLocation {
    fn route_key(&self) -> String;
}

/// Draws the schedule into the wrapper. Cell layout is owned by the presenter.
pub trait SchedulePresenter<N> {
    fn render(&self, wrapper: &N, schedule: &ScheduleRecord, source: ScheduleSource);
}

/// Hash-routed hosts keep the meaningful location in the fragment; others in
/// the path and query.
#[must_use]
pub fn route_key(pathname: &str, search: &str, hash: &str) -> String {
    let fragment = hash.trim().trim_start_matches('#');
    if !fragment.is_empty() {
        return fragment.to_string();
    }
    let path = pathname.trim();
    let path = if path.is_empty() { "/" } else { path };
    let search = search.trim();
    if search.is_empty() || search == "?" {
        path.to_string()
    } else {
        format!("{path}{search}")
    }
}
