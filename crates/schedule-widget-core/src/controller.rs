use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::select;
use serde_json::Value;

use crate::anchor::{AnchorEngine, Placement};
use crate::clock::{Clock, Spawner};
use crate::config::WidgetConfig;
use crate::host::{
    HostLocation, HostTree, NavigationSignal, NavigationSource, SchedulePresenter, Subscription,
};
use crate::reposition::RepositionObserver;
use crate::route::{AttemptGate, MountContext, MountPhase};
use crate::schedule::{Assignment, Day, ScheduleRecord};
use crate::sync::{
    LoadedSchedule, LocalCache, SaveMode, SaveOutcome, ScheduleSource, ScheduleSync, SyncError,
};
use crate::transport::BlobTransport;

/// Everything the controller needs from the page it runs in.
pub struct WidgetHost<T: HostTree> {
    pub tree: Rc<T>,
    pub clock: Rc<dyn Clock>,
    pub spawner: Rc<dyn Spawner>,
    pub location: Rc<dyn HostLocation>,
    pub presenter: Rc<dyn SchedulePresenter<T::Node>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    CoolingDown,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Mounted {
        source: ScheduleSource,
        placement: Placement,
    },
    AlreadyMounted,
    Skipped(SkipReason),
    /// The host container never reached the populated-children threshold.
    ContainerUnavailable,
    WrapperUnavailable,
    /// The presenter rendered but the wrapper stayed empty or was detached.
    Unconfirmed,
}

impl MountOutcome {
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted { .. } | Self::AlreadyMounted)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mounted { .. } => "mounted",
            Self::AlreadyMounted => "already_mounted",
            Self::Skipped(SkipReason::InFlight) => "skipped_in_flight",
            Self::Skipped(SkipReason::CoolingDown) => "skipped_cooling_down",
            Self::Skipped(SkipReason::Suspended) => "skipped_suspended",
            Self::ContainerUnavailable => "container_unavailable",
            Self::WrapperUnavailable => "wrapper_unavailable",
            Self::Unconfirmed => "unconfirmed",
        }
    }
}

/// Called with the route and outcome after every mount pass, explicit or automatic.
pub type OutcomeListener = Rc<dyn Fn(&str, MountOutcome)>;

#[derive(Debug, Clone)]
struct MountedInstance<N> {
    route: String,
    container: N,
    wrapper: N,
}

struct ControllerInner<T: HostTree + 'static> {
    config: WidgetConfig,
    host: WidgetHost<T>,
    engine: Rc<AnchorEngine<T>>,
    sync: Rc<ScheduleSync>,
    context: RefCell<MountContext>,
    schedule: RefCell<ScheduleRecord>,
    source: Cell<ScheduleSource>,
    mounted: RefCell<Option<MountedInstance<T::Node>>>,
    observer: RefCell<Option<(T::Node, RepositionObserver)>>,
    subscriptions: RefCell<Vec<Subscription>>,
    navigation_generation: Cell<u64>,
    last_route: RefCell<Option<String>>,
    suspended: Cell<bool>,
    edit_generation: Cell<u64>,
    outcome_listener: RefCell<Option<OutcomeListener>>,
}

/// Drives mount → load → render → observe for the widget on one page.
pub struct LifecycleController<T: HostTree + 'static> {
    inner: Rc<ControllerInner<T>>,
}

impl<T: HostTree + 'static> Clone for LifecycleController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: HostTree + 'static> LifecycleController<T> {
    pub fn new(
        config: WidgetConfig,
        host: WidgetHost<T>,
        transport: BlobTransport,
        cache: Rc<dyn LocalCache>,
    ) -> Self {
        let engine = Rc::new(AnchorEngine::new(
            Rc::clone(&host.tree),
            Rc::clone(&host.clock),
            &config,
        ));
        let sync = Rc::new(ScheduleSync::new(
            transport,
            cache,
            Rc::clone(&host.clock),
            &config,
        ));
        let context = MountContext::new(config.route_cooldown_ms);
        Self {
            inner: Rc::new(ControllerInner {
                config,
                host,
                engine,
                sync,
                context: RefCell::new(context),
                schedule: RefCell::new(ScheduleRecord::empty()),
                source: Cell::new(ScheduleSource::Default),
                mounted: RefCell::new(None),
                observer: RefCell::new(None),
                subscriptions: RefCell::new(Vec::new()),
                navigation_generation: Cell::new(0),
                last_route: RefCell::new(None),
                suspended: Cell::new(false),
                edit_generation: Cell::new(0),
                outcome_listener: RefCell::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<ControllerInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn set_outcome_listener(&self, listener: impl Fn(&str, MountOutcome) + 'static) {
        *self.inner.outcome_listener.borrow_mut() = Some(Rc::new(listener));
    }

    /// Subscribes to navigation and document changes and schedules the first
    /// pass. Calling it again is a no-op.
    pub fn start(&self, navigation: &dyn NavigationSource) {
        if !self.inner.subscriptions.borrow().is_empty() {
            return;
        }
        let route = self.inner.host.location.route_key();
        *self.inner.last_route.borrow_mut() = Some(route.clone());
        tracing::info!(route = %route, "starting schedule widget");

        let weak = Rc::downgrade(&self.inner);
        let navigation = navigation.subscribe(Box::new(move |signal| {
            if let Some(controller) = Self::from_weak(&weak) {
                controller.on_navigation(signal);
            }
        }));
        let weak = Rc::downgrade(&self.inner);
        let document = self.inner.host.tree.observe_document(Box::new(move || {
            if let Some(controller) = Self::from_weak(&weak) {
                controller.on_document_change();
            }
        }));
        self.inner
            .subscriptions
            .borrow_mut()
            .extend([navigation, document]);

        self.spawn_mount();
    }

    /// Drops the navigation and document subscriptions and unmounts.
    pub fn stop(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        drop(subscriptions);
        self.unmount();
    }

    /// Explicit entry point. Resumes after [`LifecycleController::unmount`].
    pub async fn mount(&self) -> MountOutcome {
        self.inner.suspended.set(false);
        self.mount_pass().await
    }

    async fn mount_pass(&self) -> MountOutcome {
        let route = self.inner.host.location.route_key();
        let outcome = self.gated_pass(&route).await;
        let listener = self.inner.outcome_listener.borrow().clone();
        if let Some(listener) = listener {
            listener(&route, outcome);
        }
        outcome
    }

    async fn gated_pass(&self, route: &str) -> MountOutcome {
        let inner = &self.inner;
        if inner.suspended.get() {
            return MountOutcome::Skipped(SkipReason::Suspended);
        }
        self.reconcile(route);

        let gate = inner
            .context
            .borrow_mut()
            .begin_attempt(route, inner.host.clock.now_ms());
        match gate {
            AttemptGate::Proceed => {}
            AttemptGate::AlreadyMounted => return MountOutcome::AlreadyMounted,
            AttemptGate::InFlight => return MountOutcome::Skipped(SkipReason::InFlight),
            AttemptGate::CoolingDown { remaining_ms } => {
                tracing::debug!(route = %route, remaining_ms, "mount pass skipped, route cooling down");
                return MountOutcome::Skipped(SkipReason::CoolingDown);
            }
        }

        let outcome = self.run_attempt(route).await;
        let injected = matches!(outcome, MountOutcome::Mounted { .. });
        inner.context.borrow_mut().finish_attempt(route, injected);
        match outcome {
            MountOutcome::Mounted { source, placement } => tracing::info!(
                route = %route,
                source = source.as_str(),
                ?placement,
                "schedule widget mounted"
            ),
            other => tracing::info!(route = %route, outcome = ?other, "mount pass ended without a widget"),
        }
        outcome
    }

    async fn run_attempt(&self, route: &str) -> MountOutcome {
        let inner = &self.inner;
        let Some(container) = self.wait_for_container().await else {
            return MountOutcome::ContainerUnavailable;
        };
        let Some(positioned) = inner.engine.ensure_positioned(&container).await else {
            tracing::warn!(route, "host refused to create the widget wrapper");
            return MountOutcome::WrapperUnavailable;
        };
        if inner.suspended.get() {
            inner.host.tree.remove(&positioned.wrapper);
            return MountOutcome::Skipped(SkipReason::Suspended);
        }
        self.adopt(route, &container, &positioned.wrapper);

        let clean = self.begin_fetch().await;
        let loaded = self.load_or_default().await;
        if inner.suspended.get() {
            self.remove_wrappers();
            return MountOutcome::Skipped(SkipReason::Suspended);
        }

        // The host may have re-rendered the container while the load was in flight.
        let container = if inner.host.tree.is_connected(&container) {
            container
        } else {
            match inner.host.tree.find_container(&inner.config.container_selector) {
                Some(container) => container,
                None => return MountOutcome::ContainerUnavailable,
            }
        };
        let Some(current) = inner.engine.ensure_positioned(&container).await else {
            return MountOutcome::WrapperUnavailable;
        };
        self.adopt(route, &container, &current.wrapper);

        self.apply_loaded(clean, loaded);
        self.render_into(&current.wrapper);

        if !self.confirm_rendered(&current.wrapper).await {
            tracing::warn!(route, "schedule widget did not render any content");
            return MountOutcome::Unconfirmed;
        }
        MountOutcome::Mounted {
            source: inner.source.get(),
            placement: positioned.placement,
        }
    }

    /// Waits, bounded, for the container to exist with enough populated
    /// children. Wakes early on any document change.
    async fn wait_for_container(&self) -> Option<T::Node> {
        let inner = &self.inner;
        let policy = inner.config.population_wait;
        let clock = &inner.host.clock;
        let deadline = clock
            .now_ms()
            .saturating_add(policy.delay_ms.saturating_mul(u64::from(policy.max_attempts)));
        loop {
            if let Some(container) = self.ready_container() {
                return Some(container);
            }
            let now = clock.now_ms();
            if now >= deadline {
                tracing::debug!(
                    selector = %inner.config.container_selector,
                    "host container not populated in time"
                );
                return None;
            }

            let (sender, receiver) = oneshot::channel::<()>();
            let mut sender = Some(sender);
            let subscription = inner.host.tree.observe_document(Box::new(move || {
                if let Some(sender) = sender.take() {
                    let _ = sender.send(());
                }
            }));
            let delay = Duration::from_millis(policy.delay_ms.min(deadline - now).max(1));
            let _ = select(receiver, clock.sleep(delay)).await;
            drop(subscription);
        }
    }

    fn ready_container(&self) -> Option<T::Node> {
        let inner = &self.inner;
        let container = inner
            .host
            .tree
            .find_container(&inner.config.container_selector)?;
        let populated = inner.engine.populated_children(&container).len();
        (populated >= inner.config.min_populated_children).then_some(container)
    }

    fn adopt(&self, route: &str, container: &T::Node, wrapper: &T::Node) {
        *self.inner.mounted.borrow_mut() = Some(MountedInstance {
            route: route.to_string(),
            container: container.clone(),
            wrapper: wrapper.clone(),
        });
        let observing = self
            .inner
            .observer
            .borrow()
            .as_ref()
            .is_some_and(|(observed, observer)| observed == container && observer.is_active());
        if !observing {
            self.install_observer(container);
        }
    }

    fn install_observer(&self, container: &T::Node) {
        let weak = Rc::downgrade(&self.inner);
        let observer = RepositionObserver::install(
            Rc::clone(&self.inner.engine),
            container.clone(),
            self.inner.config.stable_batches_before_disconnect,
            move || {
                if let Some(controller) = Self::from_weak(&weak) {
                    controller.on_evicted();
                }
            },
        );
        let previous = self
            .inner
            .observer
            .borrow_mut()
            .replace((container.clone(), observer));
        drop(previous);
    }

    fn on_evicted(&self) {
        let evicted = self.inner.mounted.borrow_mut().take();
        if let Some(instance) = evicted {
            self.inner.context.borrow_mut().clear_route(&instance.route);
        }
        self.spawn_mount();
    }

    fn on_document_change(&self) {
        if self.inner.suspended.get() || !self.needs_mount() {
            return;
        }
        let selector = &self.inner.config.container_selector;
        if self.inner.host.tree.find_container(selector).is_none() {
            return;
        }
        self.spawn_mount();
    }

    fn needs_mount(&self) -> bool {
        let route = self.inner.host.location.route_key();
        if self.inner.context.borrow().phase(&route) == MountPhase::Attempting {
            return false;
        }
        match self.inner.mounted.borrow().as_ref() {
            Some(instance) => {
                instance.route != route || !self.inner.host.tree.is_connected(&instance.wrapper)
            }
            None => true,
        }
    }

    fn on_navigation(&self, signal: NavigationSignal) {
        if self.inner.suspended.get() {
            return;
        }
        let generation = self.inner.navigation_generation.get().wrapping_add(1);
        self.inner.navigation_generation.set(generation);
        tracing::debug!(signal = signal.as_str(), "host navigation");

        let controller = self.clone();
        let debounce = Duration::from_millis(self.inner.config.navigation_debounce_ms);
        self.inner.host.spawner.spawn_local(Box::pin(async move {
            controller.inner.host.clock.sleep(debounce).await;
            if controller.inner.navigation_generation.get() != generation {
                return;
            }
            controller.after_navigation().await;
        }));
    }

    async fn after_navigation(&self) {
        let inner = &self.inner;
        let route = inner.host.location.route_key();
        let previous = inner.last_route.borrow_mut().replace(route.clone());
        {
            let mut context = inner.context.borrow_mut();
            if let Some(previous) = previous.filter(|previous| *previous != route) {
                context.clear_route(&previous);
            }
            context.clear_cooldown(&route);
        }

        if self.mount_pass().await == MountOutcome::AlreadyMounted {
            let container = inner
                .mounted
                .borrow()
                .as_ref()
                .map(|instance| instance.container.clone());
            let observing = inner
                .observer
                .borrow()
                .as_ref()
                .is_some_and(|(_, observer)| observer.is_active());
            if let (Some(container), false) = (container, observing) {
                self.install_observer(&container);
            }
        }
    }

    /// Forgets a mounted instance whose wrapper is gone or which belongs to
    /// another route.
    fn reconcile(&self, route: &str) {
        let inner = &self.inner;
        let stale = inner.mounted.borrow().as_ref().and_then(|instance| {
            let detached = !inner.host.tree.is_connected(&instance.wrapper);
            (detached || instance.route != route).then(|| instance.route.clone())
        });
        if let Some(stale_route) = stale {
            inner.mounted.borrow_mut().take();
            inner.context.borrow_mut().clear_route(&stale_route);
            if stale_route != route {
                inner.context.borrow_mut().clear_route(route);
            }
            let observer = inner.observer.borrow_mut().take();
            drop(observer);
            return;
        }
        if inner.mounted.borrow().is_none() && inner.context.borrow().is_mounted(route) {
            inner.context.borrow_mut().clear_route(route);
        }
    }

    /// Pushes a queued save before reading so the read sees it. Returns the
    /// edit generation when nothing local is still unsynced.
    async fn begin_fetch(&self) -> Option<u64> {
        let sync = &self.inner.sync;
        if let Some(SaveOutcome::CachedOnly { status, error }) = sync.flush().await {
            tracing::warn!(status, error = %error, "schedule edit kept locally");
        }
        (!sync.has_unsynced_changes()).then(|| self.inner.edit_generation.get())
    }

    /// Replaces the in-memory record unless it was edited while the read was
    /// in flight. Returns whether the loaded copy was taken.
    fn apply_loaded(&self, clean: Option<u64>, loaded: LoadedSchedule) -> bool {
        let inner = &self.inner;
        if clean != Some(inner.edit_generation.get()) {
            tracing::debug!(
                source = loaded.source.as_str(),
                "local schedule edits are newer than the loaded copy"
            );
            return false;
        }
        *inner.schedule.borrow_mut() = loaded.record;
        inner.source.set(loaded.source);
        true
    }

    async fn load_or_default(&self) -> LoadedSchedule {
        match self.inner.sync.load().await {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(%error, "schedule unavailable, showing an empty week");
                LoadedSchedule {
                    record: ScheduleRecord::empty(),
                    source: ScheduleSource::Default,
                }
            }
        }
    }

    async fn confirm_rendered(&self, wrapper: &T::Node) -> bool {
        let tree = &self.inner.host.tree;
        let mut retry = self.inner.config.mount_confirm.start();
        loop {
            if tree.is_connected(wrapper) && tree.has_rendered_content(wrapper) {
                return true;
            }
            match retry.next_delay() {
                Some(delay) => self.inner.host.clock.sleep(delay).await,
                None => return false,
            }
        }
    }

    fn render_into(&self, wrapper: &T::Node) {
        let schedule = self.inner.schedule.borrow().clone();
        self.inner
            .host
            .presenter
            .render(wrapper, &schedule, self.inner.source.get());
    }

    fn render_current(&self) {
        let wrapper = self.wrapper();
        if let Some(wrapper) = wrapper {
            self.render_into(&wrapper);
        }
    }

    fn spawn_mount(&self) {
        let controller = self.clone();
        self.inner.host.spawner.spawn_local(Box::pin(async move {
            let _ = controller.mount_pass().await;
        }));
    }

    fn remove_wrappers(&self) {
        let inner = &self.inner;
        if let Some(instance) = inner.mounted.borrow_mut().take() {
            inner.host.tree.remove(&instance.wrapper);
        }
        if let Some(container) = inner
            .host
            .tree
            .find_container(&inner.config.container_selector)
        {
            for wrapper in inner
                .host
                .tree
                .query_marked(&container, inner.engine.marker_attribute())
            {
                inner.host.tree.remove(&wrapper);
            }
        }
    }

    /// Disconnects the observer, removes the wrapper and forgets route state.
    /// Navigation keeps being tracked but no pass runs until the next
    /// explicit [`LifecycleController::mount`].
    pub fn unmount(&self) {
        let inner = &self.inner;
        inner.suspended.set(true);
        inner
            .navigation_generation
            .set(inner.navigation_generation.get().wrapping_add(1));
        let observer = inner.observer.borrow_mut().take();
        drop(observer);
        self.remove_wrappers();
        inner.context.borrow_mut().clear_all();
        tracing::info!("schedule widget unmounted");
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        let route = self.inner.host.location.route_key();
        self.inner.context.borrow().is_mounted(&route) && self.wrapper().is_some()
    }

    /// The live wrapper, if it is still attached.
    #[must_use]
    pub fn wrapper(&self) -> Option<T::Node> {
        self.inner
            .mounted
            .borrow()
            .as_ref()
            .map(|instance| instance.wrapper.clone())
            .filter(|wrapper| self.inner.host.tree.is_connected(wrapper))
    }

    #[must_use]
    pub fn schedule(&self) -> ScheduleRecord {
        self.inner.schedule.borrow().clone()
    }

    #[must_use]
    pub fn is_observing(&self) -> bool {
        self.inner
            .observer
            .borrow()
            .as_ref()
            .is_some_and(|(_, observer)| observer.is_active())
    }

    /// Returns `true` the first time an auxiliary asset is registered.
    pub fn mark_asset_loaded(&self, asset: &str) -> bool {
        self.inner.context.borrow_mut().mark_asset_loaded(asset)
    }

    /// Reloads from the sync layer and re-renders on success. Local edits
    /// made while the read was in flight are kept and returned instead.
    pub async fn load(&self) -> Result<LoadedSchedule, SyncError> {
        let clean = self.begin_fetch().await;
        let loaded = self.inner.sync.load().await?;
        if !self.apply_loaded(clean, loaded.clone()) {
            return Ok(LoadedSchedule {
                record: self.schedule(),
                source: self.inner.source.get(),
            });
        }
        self.render_current();
        Ok(loaded)
    }

    pub async fn save(&self, record: ScheduleRecord) -> SaveOutcome {
        self.bump_edit_generation();
        *self.inner.schedule.borrow_mut() = record.clone();
        self.render_current();
        self.inner.sync.save(&record, SaveMode::Immediate).await
    }

    pub async fn save_value(&self, value: &Value) -> Result<SaveOutcome, SyncError> {
        let record = ScheduleRecord::from_payload(value)?;
        Ok(self.save(record).await)
    }

    pub fn assign(&self, day: Day, assignment: Assignment) {
        tracing::debug!(day = day.as_str(), id = %assignment.id, "assigning schedule slot");
        self.bump_edit_generation();
        self.inner.schedule.borrow_mut().assign(day, assignment);
        self.after_edit();
    }

    pub fn clear_day(&self, day: Day) {
        tracing::debug!(day = day.as_str(), "clearing schedule slot");
        self.bump_edit_generation();
        self.inner.schedule.borrow_mut().clear_day(day);
        self.after_edit();
    }

    fn bump_edit_generation(&self) {
        let generation = &self.inner.edit_generation;
        generation.set(generation.get().wrapping_add(1));
    }

    fn after_edit(&self) {
        self.render_current();
        let record = self.inner.schedule.borrow().clone();
        let sync = Rc::clone(&self.inner.sync);
        self.inner.host.spawner.spawn_local(Box::pin(async move {
            let outcome = sync.save(&record, SaveMode::Debounced).await;
            if let SaveOutcome::CachedOnly { status, error } = outcome {
                tracing::warn!(status, error = %error, "schedule edit kept locally");
            }
        }));
    }
}
