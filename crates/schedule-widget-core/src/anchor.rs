use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, RetryPolicy};
use crate::config::WidgetConfig;
use crate::host::HostTree;

pub const WRAPPER_TAG: &str = "div";
pub const WRAPPER_CLASS: &str = "schedule-widget";

/// Host nodes that hold a slot without real content yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaceholderRules {
    pub class_fragments: Vec<String>,
    pub tags: Vec<String>,
    pub honor_aria_busy: bool,
}

impl Default for PlaceholderRules {
    fn default() -> Self {
        Self {
            class_fragments: ["skeleton", "placeholder", "loading", "spinner", "mdl-spinner"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            tags: ["template", "script", "style"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            honor_aria_busy: true,
        }
    }
}

impl PlaceholderRules {
    pub fn matches<T: HostTree>(&self, tree: &T, node: &T::Node) -> bool {
        let tag = tree.tag_name(node).to_ascii_lowercase();
        if self.tags.iter().any(|candidate| candidate.eq_ignore_ascii_case(&tag)) {
            return true;
        }
        if self.honor_aria_busy
            && tree
                .attribute(node, "aria-busy")
                .is_some_and(|busy| busy.trim().eq_ignore_ascii_case("true"))
        {
            return true;
        }
        tree.class_names(node).iter().any(|class| {
            let class = class.to_ascii_lowercase();
            self.class_fragments
                .iter()
                .any(|fragment| !fragment.is_empty() && class.contains(&fragment.to_ascii_lowercase()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Reused,
    AfterAnchor,
    /// No usable anchor appeared within the retry budget.
    ContainerStart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Positioned<N> {
    pub wrapper: N,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    InPlace,
    Moved,
    Missing,
}

pub struct AnchorEngine<T: HostTree> {
    tree: Rc<T>,
    clock: Rc<dyn Clock>,
    marker_attribute: String,
    rules: PlaceholderRules,
    retry: RetryPolicy,
    settle: Duration,
}

impl<T: HostTree> AnchorEngine<T> {
    pub fn new(tree: Rc<T>, clock: Rc<dyn Clock>, config: &WidgetConfig) -> Self {
        Self {
            tree,
            clock,
            marker_attribute: config.marker_attribute.clone(),
            rules: config.placeholder.clone(),
            retry: config.anchor_retry,
            settle: Duration::from_millis(config.settle_delay_ms),
        }
    }

    pub fn tree(&self) -> &Rc<T> {
        &self.tree
    }

    pub fn marker_attribute(&self) -> &str {
        &self.marker_attribute
    }

    pub fn is_wrapper(&self, node: &T::Node) -> bool {
        self.tree.attribute(node, &self.marker_attribute).is_some()
    }

    /// Direct children that can carry the wrapper after them, in tree order.
    pub fn populated_children(&self, container: &T::Node) -> Vec<T::Node> {
        self.tree
            .children(container)
            .into_iter()
            .filter(|child| {
                !self.is_wrapper(child)
                    && !self.rules.matches(self.tree.as_ref(), child)
                    && self.tree.is_visible(child)
            })
            .collect()
    }

    pub fn find_anchor(&self, container: &T::Node) -> Option<T::Node> {
        self.populated_children(container).into_iter().next()
    }

    /// Keeps the first marked node under `container` and removes the rest.
    pub fn existing_wrapper(&self, container: &T::Node) -> Option<T::Node> {
        let mut marked = self
            .tree
            .query_marked(container, &self.marker_attribute)
            .into_iter();
        let keep = marked.next()?;
        for orphan in marked {
            tracing::debug!(
                instance = ?self.tree.attribute(&orphan, &self.marker_attribute),
                "removing duplicate schedule widget instance"
            );
            self.tree.remove(&orphan);
        }
        Some(keep)
    }

    pub fn create_wrapper(&self) -> Option<T::Node> {
        let wrapper = self.tree.create_element(WRAPPER_TAG)?;
        self.tree.set_attribute(&wrapper, "class", WRAPPER_CLASS);
        self.tree.set_attribute(
            &wrapper,
            &self.marker_attribute,
            &Uuid::new_v4().to_string(),
        );
        Some(wrapper)
    }

    /// Puts `wrapper` directly after `anchor` (or first when there is none)
    /// and copies the anchor's layout order onto it.
    pub fn place_after(&self, container: &T::Node, wrapper: &T::Node, anchor: Option<&T::Node>) {
        let children = self.tree.children(container);
        let reference = match anchor {
            Some(anchor) => children
                .iter()
                .skip_while(|child| *child != anchor)
                .skip(1)
                .find(|child| *child != wrapper)
                .cloned(),
            None => children.iter().find(|child| *child != wrapper).cloned(),
        };
        self.tree.insert_before(container, wrapper, reference.as_ref());

        let order = anchor.and_then(|anchor| self.tree.layout_order(anchor));
        if self.tree.layout_order(wrapper) != order {
            self.tree.set_layout_order(wrapper, order.as_deref());
        }
    }

    fn is_directly_after(&self, container: &T::Node, wrapper: &T::Node, anchor: &T::Node) -> bool {
        let children = self.tree.children(container);
        children
            .windows(2)
            .any(|pair| &pair[0] == anchor && &pair[1] == wrapper)
    }

    /// Re-derives the anchor and moves `wrapper` if it drifted.
    pub fn correct_position(&self, container: &T::Node, wrapper: &T::Node) -> Correction {
        if !self.tree.is_connected(wrapper) {
            return Correction::Missing;
        }
        let anchor = self.find_anchor(container);
        let nested = self.tree.parent(wrapper).as_ref() != Some(container);
        let Some(anchor) = anchor else {
            if nested {
                self.place_after(container, wrapper, None);
                return Correction::Moved;
            }
            return Correction::InPlace;
        };
        let order = self.tree.layout_order(&anchor);
        if !nested
            && self.is_directly_after(container, wrapper, &anchor)
            && self.tree.layout_order(wrapper) == order
        {
            return Correction::InPlace;
        }
        tracing::debug!("schedule widget drifted from its anchor, moving it back");
        self.place_after(container, wrapper, Some(&anchor));
        Correction::Moved
    }

    /// One observer batch: orphan cleanup then drift correction.
    pub fn heal(&self, container: &T::Node) -> Correction {
        match self.existing_wrapper(container) {
            Some(wrapper) => self.correct_position(container, &wrapper),
            None => Correction::Missing,
        }
    }

    /// Reuses or inserts the single wrapper under `container`. Only `None` when
    /// the host cannot create elements at all.
    pub async fn ensure_positioned(&self, container: &T::Node) -> Option<Positioned<T::Node>> {
        if let Some(wrapper) = self.existing_wrapper(container) {
            self.correct_position(container, &wrapper);
            return Some(Positioned {
                wrapper,
                placement: Placement::Reused,
            });
        }

        let mut retry = self.retry.start();
        let anchor = loop {
            if let Some(anchor) = self.find_anchor(container) {
                break Some(anchor);
            }
            match retry.next_delay() {
                Some(delay) => {
                    tracing::debug!(attempt = retry.attempts(), "no anchor yet, waiting");
                    self.clock.sleep(delay).await;
                }
                None => break None,
            }
        };

        // Another pass may have inserted a wrapper while this one was waiting.
        if let Some(wrapper) = self.existing_wrapper(container) {
            self.correct_position(container, &wrapper);
            return Some(Positioned {
                wrapper,
                placement: Placement::Reused,
            });
        }

        let wrapper = self.create_wrapper()?;
        let placement = match anchor.as_ref() {
            Some(_) => Placement::AfterAnchor,
            None => {
                tracing::warn!(
                    attempts = retry.attempts(),
                    "no anchor found, inserting schedule widget at container start"
                );
                Placement::ContainerStart
            }
        };
        self.place_after(container, &wrapper, anchor.as_ref());

        self.clock.sleep(self.settle).await;
        if self.correct_position(container, &wrapper) == Correction::Moved {
            tracing::debug!("anchor changed while settling");
        }

        Some(Positioned { wrapper, placement })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTree as _;
    use crate::testing::{Harness, MemoryTree};

    fn engine(tree: &MemoryTree, harness: &Harness) -> AnchorEngine<MemoryTree> {
        AnchorEngine::new(Rc::new(tree.clone()), harness.clock(), &WidgetConfig::default())
    }

    #[test]
    fn skips_placeholders_and_hidden_children() {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let container = tree.container(".homeSectionsContainer");
        tree.append_with_class(&container, "div", "skeleton-card");
        let hidden = tree.append_with_class(&container, "div", "section");
        tree.set_visible(&hidden, false);
        let busy = tree.append_with_class(&container, "div", "section");
        tree.set_attribute(&busy, "aria-busy", "true");
        tree.append_with_class(&container, "script", "");
        let section = tree.append_with_class(&container, "div", "section");

        assert_eq!(engine(&tree, &harness).find_anchor(&container), Some(section));
    }

    #[test]
    fn inserts_after_anchor_and_copies_layout_order() {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let container = tree.container(".homeSectionsContainer");
        let first = tree.append_with_class(&container, "div", "section");
        tree.set_layout_order(&first, Some("2"));
        let second = tree.append_with_class(&container, "div", "section");
        let engine = Rc::new(engine(&tree, &harness));

        let positioned = harness
            .run({
                let engine = Rc::clone(&engine);
                let container = container.clone();
                async move { engine.ensure_positioned(&container).await }
            })
            .flatten()
            .expect("wrapper positioned");
        assert_eq!(positioned.placement, Placement::AfterAnchor);
        assert_eq!(
            tree.children(&container),
            vec![first, positioned.wrapper.clone(), second]
        );
        assert_eq!(tree.layout_order(&positioned.wrapper).as_deref(), Some("2"));
        assert_eq!(tree.attribute(&positioned.wrapper, "class").as_deref(), Some(WRAPPER_CLASS));
    }

    #[test]
    fn falls_back_to_container_start_after_retries() {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let container = tree.container(".homeSectionsContainer");
        let spinner = tree.append_with_class(&container, "div", "mdl-spinner");
        let engine = Rc::new(engine(&tree, &harness));

        let positioned = harness
            .run({
                let engine = Rc::clone(&engine);
                let container = container.clone();
                async move { engine.ensure_positioned(&container).await }
            })
            .flatten()
            .expect("wrapper positioned");
        assert_eq!(positioned.placement, Placement::ContainerStart);
        assert_eq!(tree.children(&container), vec![positioned.wrapper, spinner]);
    }

    #[test]
    fn reuses_first_marked_wrapper_and_removes_orphans() {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let container = tree.container(".homeSectionsContainer");
        let section = tree.append_with_class(&container, "div", "section");
        let kept = tree.append_with_class(&container, "div", WRAPPER_CLASS);
        tree.set_attribute(&kept, "data-schedule-widget", "one");
        let later = tree.append_with_class(&container, "div", "section");
        let nested = tree.append_with_class(&later, "div", WRAPPER_CLASS);
        tree.set_attribute(&nested, "data-schedule-widget", "two");
        let engine = engine(&tree, &harness);

        assert_eq!(engine.existing_wrapper(&container), Some(kept.clone()));
        assert!(!tree.is_connected(&nested));
        assert_eq!(engine.heal(&container), Correction::InPlace);
        assert_eq!(tree.children(&container), vec![section, kept, later]);
    }

    #[test]
    fn correction_moves_wrapper_behind_new_first_child() {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let container = tree.container(".homeSectionsContainer");
        let a = tree.append_with_class(&container, "div", "section");
        let wrapper = tree.append_with_class(&container, "div", WRAPPER_CLASS);
        tree.set_attribute(&wrapper, "data-schedule-widget", "w");
        let b = tree.append_with_class(&container, "div", "section");
        let engine = engine(&tree, &harness);

        tree.remove(&a);
        let c = tree.create_element("div").expect("element");
        tree.insert_before(&container, &c, Some(&b));
        assert_eq!(tree.children(&container), vec![wrapper.clone(), c.clone(), b.clone()]);

        assert_eq!(engine.correct_position(&container, &wrapper), Correction::Moved);
        assert_eq!(tree.children(&container), vec![c, wrapper.clone(), b]);
        assert_eq!(engine.correct_position(&container, &wrapper), Correction::InPlace);

        tree.remove(&wrapper);
        assert_eq!(engine.heal(&container), Correction::Missing);
    }
}
