use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::anchor::{AnchorEngine, Correction};
use crate::host::{HostTree, Subscription};

#[derive(Default)]
struct ObserverState {
    stable_batches: Cell<u32>,
    corrections: Cell<u32>,
    subscription: RefCell<Option<Subscription>>,
}

impl ObserverState {
    fn disconnect(&self) {
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
    }
}

/// Watches the container's child list after insertion and heals drift until
/// the host has stopped rearranging it.
pub struct RepositionObserver {
    state: Rc<ObserverState>,
}

impl RepositionObserver {
    pub fn install<T: HostTree + 'static>(
        engine: Rc<AnchorEngine<T>>,
        container: T::Node,
        stable_limit: u32,
        mut on_missing: impl FnMut() + 'static,
    ) -> Self {
        let state = Rc::new(ObserverState::default());
        let weak: Weak<ObserverState> = Rc::downgrade(&state);
        let tree = Rc::clone(engine.tree());
        let observed = container.clone();

        let subscription = tree.observe_children(
            &observed,
            Box::new(move || {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                match engine.heal(&container) {
                    Correction::Missing => {
                        state.stable_batches.set(0);
                        tracing::info!("schedule widget was removed by the host, re-mounting");
                        on_missing();
                    }
                    Correction::Moved => {
                        state.stable_batches.set(0);
                        state.corrections.set(state.corrections.get().saturating_add(1));
                    }
                    Correction::InPlace => {
                        let stable = state.stable_batches.get().saturating_add(1);
                        state.stable_batches.set(stable);
                        if stable >= stable_limit {
                            tracing::debug!(stable, "container settled, disconnecting observer");
                            state.disconnect();
                        }
                    }
                }
            }),
        );
        *state.subscription.borrow_mut() = Some(subscription);

        Self { state }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.subscription.borrow().is_some()
    }

    pub fn disconnect(&self) {
        self.state.disconnect();
    }

    #[must_use]
    pub fn stable_batches(&self) -> u32 {
        self.state.stable_batches.get()
    }

    #[must_use]
    pub fn corrections(&self) -> u32 {
        self.state.corrections.get()
    }
}

impl Drop for RepositionObserver {
    fn drop(&mut self) {
        self.state.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WidgetConfig;
    use crate::host::HostTree as _;
    use crate::testing::{Harness, MemoryTree};

    fn setup() -> (Harness, MemoryTree, Rc<AnchorEngine<MemoryTree>>) {
        let harness = Harness::new();
        let tree = MemoryTree::new();
        let engine = Rc::new(AnchorEngine::new(
            Rc::new(tree.clone()),
            harness.clock(),
            &WidgetConfig::default(),
        ));
        (harness, tree, engine)
    }

    #[test]
    fn relocates_wrapper_after_new_first_child() {
        let (_harness, tree, engine) = setup();
        let container = tree.container(".homeSectionsContainer");
        let a = tree.append_with_class(&container, "div", "section");
        let wrapper = engine.create_wrapper().expect("wrapper");
        tree.insert_before(&container, &wrapper, None);
        let b = tree.append_with_class(&container, "div", "section");
        tree.flush_mutations();

        let observer = RepositionObserver::install(Rc::clone(&engine), container.clone(), 5, || {});
        tree.remove(&a);
        let c = tree.create_element("div").expect("element");
        tree.insert_before(&container, &c, Some(&b));
        tree.flush_mutations();

        assert_eq!(tree.children(&container), vec![c, wrapper, b]);
        assert_eq!(observer.corrections(), 1);
        assert!(observer.is_active());
    }

    #[test]
    fn disconnects_after_stable_batches() {
        let (_harness, tree, engine) = setup();
        let container = tree.container(".homeSectionsContainer");
        tree.append_with_class(&container, "div", "section");
        let wrapper = engine.create_wrapper().expect("wrapper");
        engine.place_after(&container, &wrapper, engine.find_anchor(&container).as_ref());
        tree.flush_mutations();

        let observer = RepositionObserver::install(Rc::clone(&engine), container.clone(), 3, || {});
        for _ in 0..3 {
            tree.append_with_class(&container, "div", "section");
            tree.flush_mutations();
        }
        assert_eq!(observer.stable_batches(), 3);
        assert!(!observer.is_active());

        tree.append_with_class(&container, "div", "section");
        tree.flush_mutations();
        assert_eq!(observer.stable_batches(), 3);
    }

    #[test]
    fn reports_eviction() {
        let (_harness, tree, engine) = setup();
        let container = tree.container(".homeSectionsContainer");
        tree.append_with_class(&container, "div", "section");
        let wrapper = engine.create_wrapper().expect("wrapper");
        engine.place_after(&container, &wrapper, engine.find_anchor(&container).as_ref());
        tree.flush_mutations();

        let missing = Rc::new(Cell::new(0));
        let counter = Rc::clone(&missing);
        let _observer = RepositionObserver::install(Rc::clone(&engine), container.clone(), 5, move || {
            counter.set(counter.get() + 1);
        });
        tree.remove(&wrapper);
        tree.flush_mutations();
        assert_eq!(missing.get(), 1);
    }
}
