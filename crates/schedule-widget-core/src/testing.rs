//! In-memory stand-ins for the browser: a host tree with batched mutation
//! delivery, a manually driven clock, a scripted blob backend and a
//! single-threaded executor harness that ties them together.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use serde_json::Value;

use crate::clock::{Clock, Spawner};
use crate::host::{
    ChangeHandler, HostLocation, HostTree, NavigationHandler, NavigationSignal, NavigationSource,
    SchedulePresenter, Subscription,
};
use crate::schedule::ScheduleRecord;
use crate::sync::{CacheError, LocalCache, ScheduleSource};
use crate::transport::{HttpBackend, HttpMethod, HttpRequest, HttpResponse, TransportError};

const MAX_MUTATION_ROUNDS: usize = 64;
const MAX_HARNESS_STEPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    visible: bool,
    order: Option<String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            visible: true,
            order: None,
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|name| name == class))
    }
}

type SharedHandler = Rc<RefCell<ChangeHandler>>;

struct TreeState {
    nodes: Vec<NodeData>,
    child_observers: Vec<(u64, NodeId, SharedHandler)>,
    document_observers: Vec<(u64, SharedHandler)>,
    next_observer: u64,
    dirty_parents: BTreeSet<NodeId>,
    document_dirty: bool,
    refuse_create: bool,
}

impl TreeState {
    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0)
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
        self.dirty_parents.insert(parent);
        self.document_dirty = true;
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .node(root)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn matches_selector(&self, id: NodeId, selector: &str) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if let Some(class) = selector.strip_prefix('.') {
            node.has_class(class)
        } else if let Some(element_id) = selector.strip_prefix('#') {
            node.attributes.get("id").is_some_and(|value| value == element_id)
        } else {
            node.tag.eq_ignore_ascii_case(selector)
        }
    }
}

/// Host tree double. Clones share the same tree. Mutations queue change
/// records that are only delivered by [`MemoryTree::flush_mutations`].
#[derive(Clone)]
pub struct MemoryTree {
    state: Rc<RefCell<TreeState>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub const ROOT: NodeId = NodeId(0);

    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(TreeState {
                nodes: vec![NodeData::new("body")],
                child_observers: Vec::new(),
                document_observers: Vec::new(),
                next_observer: 0,
                dirty_parents: BTreeSet::new(),
                document_dirty: false,
                refuse_create: false,
            })),
        }
    }

    fn alloc(&self, tag: &str) -> NodeId {
        let mut state = self.state.borrow_mut();
        state.nodes.push(NodeData::new(tag));
        NodeId(state.nodes.len() - 1)
    }

    /// Appends a node matching `selector` (`.class`, `#id` or a tag) to the root.
    pub fn container(&self, selector: &str) -> NodeId {
        if let Some(class) = selector.strip_prefix('.') {
            self.append_with_class(&Self::ROOT, "div", class)
        } else if let Some(id) = selector.strip_prefix('#') {
            let node = self.append(&Self::ROOT, "div");
            self.set_attribute(&node, "id", id);
            node
        } else {
            self.append(&Self::ROOT, selector)
        }
    }

    pub fn append(&self, parent: &NodeId, tag: &str) -> NodeId {
        let node = self.alloc(tag);
        self.insert_before(parent, &node, None);
        node
    }

    pub fn append_with_class(&self, parent: &NodeId, tag: &str, class: &str) -> NodeId {
        let node = self.alloc(tag);
        if !class.is_empty() {
            self.set_attribute(&node, "class", class);
        }
        self.insert_before(parent, &node, None);
        node
    }

    pub fn set_visible(&self, node: &NodeId, visible: bool) {
        if let Some(data) = self.state.borrow_mut().node_mut(*node) {
            data.visible = visible;
        }
    }

    pub fn set_text(&self, node: &NodeId, text: &str) {
        if let Some(data) = self.state.borrow_mut().node_mut(*node) {
            data.text = text.to_string();
        }
    }

    pub fn text(&self, node: &NodeId) -> String {
        self.state
            .borrow()
            .node(*node)
            .map(|data| data.text.clone())
            .unwrap_or_default()
    }

    pub fn clear_children(&self, node: &NodeId) {
        let mut state = self.state.borrow_mut();
        let children = state
            .node(*node)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in children {
            state.detach(child);
        }
    }

    pub fn refuse_create(&self, refuse: bool) {
        self.state.borrow_mut().refuse_create = refuse;
    }

    /// All connected nodes carrying `attribute`.
    pub fn count_marked(&self, attribute: &str) -> usize {
        self.query_marked(&Self::ROOT, attribute).len()
    }

    #[must_use]
    pub fn has_pending_mutations(&self) -> bool {
        let state = self.state.borrow();
        state.document_dirty || !state.dirty_parents.is_empty()
    }

    /// Delivers queued change records until the tree is quiet. Returns whether
    /// anything was delivered.
    pub fn flush_mutations(&self) -> bool {
        let mut delivered = false;
        for _ in 0..MAX_MUTATION_ROUNDS {
            let handlers: Vec<(u64, SharedHandler)> = {
                let mut state = self.state.borrow_mut();
                if !state.document_dirty && state.dirty_parents.is_empty() {
                    break;
                }
                let dirty = std::mem::take(&mut state.dirty_parents);
                let document = std::mem::replace(&mut state.document_dirty, false);
                let mut handlers: Vec<(u64, SharedHandler)> = state
                    .child_observers
                    .iter()
                    .filter(|(_, node, _)| dirty.contains(node))
                    .map(|(id, _, handler)| (*id, Rc::clone(handler)))
                    .collect();
                if document {
                    handlers.extend(
                        state
                            .document_observers
                            .iter()
                            .map(|(id, handler)| (*id, Rc::clone(handler))),
                    );
                }
                handlers
            };
            for (id, handler) in handlers {
                if self.is_registered(id) {
                    delivered = true;
                    let mut callback = handler.borrow_mut();
                    (*callback)();
                }
            }
        }
        delivered
    }

    fn is_registered(&self, id: u64) -> bool {
        let state = self.state.borrow();
        state.child_observers.iter().any(|(other, _, _)| *other == id)
            || state.document_observers.iter().any(|(other, _)| *other == id)
    }

    fn register(&self, node: Option<NodeId>, handler: ChangeHandler) -> Subscription {
        let handler = Rc::new(RefCell::new(handler));
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_observer;
            state.next_observer += 1;
            match node {
                Some(node) => state.child_observers.push((id, node, handler)),
                None => state.document_observers.push((id, handler)),
            }
            id
        };
        let weak: Weak<RefCell<TreeState>> = Rc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.borrow_mut();
                state.child_observers.retain(|(other, _, _)| *other != id);
                state.document_observers.retain(|(other, _)| *other != id);
            }
        })
    }
}

impl HostTree for MemoryTree {
    type Node = NodeId;

    fn find_container(&self, selector: &str) -> Option<NodeId> {
        let state = self.state.borrow();
        state
            .descendants(Self::ROOT)
            .into_iter()
            .find(|id| state.matches_selector(*id, selector))
    }

    fn children(&self, parent: &NodeId) -> Vec<NodeId> {
        self.state
            .borrow()
            .node(*parent)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.state.borrow().node(*node).and_then(|data| data.parent)
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        let state = self.state.borrow();
        let mut current = *node;
        loop {
            if current == Self::ROOT {
                return true;
            }
            match state.node(current).and_then(|data| data.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn tag_name(&self, node: &NodeId) -> String {
        self.state
            .borrow()
            .node(*node)
            .map(|data| data.tag.clone())
            .unwrap_or_default()
    }

    fn class_names(&self, node: &NodeId) -> Vec<String> {
        self.attribute(node, "class")
            .map(|classes| classes.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.state
            .borrow()
            .node(*node)
            .and_then(|data| data.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) {
        if let Some(data) = self.state.borrow_mut().node_mut(*node) {
            data.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn is_visible(&self, node: &NodeId) -> bool {
        self.state.borrow().node(*node).is_some_and(|data| data.visible)
    }

    fn query_marked(&self, root: &NodeId, attribute: &str) -> Vec<NodeId> {
        let state = self.state.borrow();
        state
            .descendants(*root)
            .into_iter()
            .filter(|id| {
                state
                    .node(*id)
                    .is_some_and(|data| data.attributes.contains_key(attribute))
            })
            .collect()
    }

    fn create_element(&self, tag: &str) -> Option<NodeId> {
        if self.state.borrow().refuse_create {
            return None;
        }
        Some(self.alloc(tag))
    }

    fn insert_before(&self, parent: &NodeId, node: &NodeId, reference: Option<&NodeId>) {
        if Some(node) == reference || parent == node {
            return;
        }
        let mut state = self.state.borrow_mut();
        state.detach(*node);
        let Some(parent_node) = state.node_mut(*parent) else {
            return;
        };
        let index = reference
            .and_then(|reference| parent_node.children.iter().position(|child| child == reference))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(index, *node);
        if let Some(data) = state.node_mut(*node) {
            data.parent = Some(*parent);
        }
        state.dirty_parents.insert(*parent);
        state.document_dirty = true;
    }

    fn remove(&self, node: &NodeId) {
        self.state.borrow_mut().detach(*node);
    }

    fn layout_order(&self, node: &NodeId) -> Option<String> {
        self.state.borrow().node(*node).and_then(|data| data.order.clone())
    }

    fn set_layout_order(&self, node: &NodeId, order: Option<&str>) {
        if let Some(data) = self.state.borrow_mut().node_mut(*node) {
            data.order = order.map(str::to_string);
        }
    }

    fn has_rendered_content(&self, node: &NodeId) -> bool {
        self.state
            .borrow()
            .node(*node)
            .is_some_and(|data| !data.children.is_empty() || !data.text.trim().is_empty())
    }

    fn observe_children(&self, node: &NodeId, handler: ChangeHandler) -> Subscription {
        self.register(Some(*node), handler)
    }

    fn observe_document(&self, handler: ChangeHandler) -> Subscription {
        self.register(None, handler)
    }
}

struct Timer {
    deadline: u64,
    sequence: u64,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct ClockState {
    now: u64,
    sequence: u64,
    timers: Vec<Timer>,
}

/// Time only moves when the test says so.
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Rc<RefCell<ClockState>>,
}

impl ManualClock {
    pub fn set_now(&self, now_ms: u64) {
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(now_ms);
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.state
            .borrow()
            .timers
            .iter()
            .map(|timer| timer.deadline)
            .min()
    }

    /// Wakes every timer whose deadline has passed, oldest first.
    pub fn fire_due(&self) -> usize {
        let mut due = {
            let mut state = self.state.borrow_mut();
            let now = state.now;
            let (due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut state.timers)
                .into_iter()
                .partition(|timer| timer.deadline <= now);
            state.timers = pending;
            due
        };
        due.sort_by_key(|timer| (timer.deadline, timer.sequence));
        let fired = due.len();
        for timer in due {
            let _ = timer.wake.send(());
        }
        fired
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.state.borrow().now
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (wake, receiver) = oneshot::channel();
        {
            let mut state = self.state.borrow_mut();
            let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
            let deadline = state.now.saturating_add(millis);
            let sequence = state.sequence;
            state.sequence += 1;
            state.timers.push(Timer {
                deadline,
                sequence,
                wake,
            });
        }
        Box::pin(async move {
            let _ = receiver.await;
        })
    }
}

pub struct PoolSpawner {
    spawner: LocalSpawner,
}

impl Spawner for PoolSpawner {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        if let Err(error) = self.spawner.spawn_local(future) {
            tracing::warn!(%error, "test executor refused a task");
        }
    }
}

/// Output slot of a task spawned on the [`Harness`].
pub struct TaskHandle<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> TaskHandle<T> {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }
}

/// Single-threaded executor plus manual clock plus host tree. Settling runs
/// ready tasks, due timers and queued mutation records until none remain.
pub struct Harness {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    clock: ManualClock,
    tree: MemoryTree,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            clock: ManualClock::default(),
            tree: MemoryTree::new(),
        }
    }

    #[must_use]
    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::new(self.clock.clone())
    }

    #[must_use]
    pub fn manual_clock(&self) -> &ManualClock {
        &self.clock
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The tree whose mutations are flushed while settling.
    #[must_use]
    pub fn tree(&self) -> MemoryTree {
        self.tree.clone()
    }

    #[must_use]
    pub fn spawner(&self) -> Rc<dyn Spawner> {
        Rc::new(PoolSpawner {
            spawner: self.spawner.clone(),
        })
    }

    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let output = Rc::clone(&slot);
        let spawner = PoolSpawner {
            spawner: self.spawner.clone(),
        };
        spawner.spawn_local(Box::pin(async move {
            let value = future.await;
            *output.borrow_mut() = Some(value);
        }));
        TaskHandle { slot }
    }

    pub fn settle(&self) {
        for _ in 0..MAX_HARNESS_STEPS {
            self.pool.borrow_mut().run_until_stalled();
            let fired = self.clock.fire_due();
            let delivered = self.tree.flush_mutations();
            if fired == 0 && !delivered {
                return;
            }
        }
    }

    /// Moves time forward by `duration`, firing timers in deadline order.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let target = self.clock.now_ms().saturating_add(millis);
        self.settle();
        while let Some(next) = self.clock.next_deadline().filter(|next| *next <= target) {
            self.clock.set_now(next);
            self.settle();
        }
        self.clock.set_now(target);
        self.settle();
    }

    /// Drives `future` to completion, jumping the clock to each next timer.
    /// `None` when it can make no more progress.
    pub fn run<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = self.spawn(future);
        for _ in 0..MAX_HARNESS_STEPS {
            self.settle();
            if let Some(value) = handle.take() {
                return Some(value);
            }
            let next = self.clock.next_deadline()?;
            self.clock.set_now(next);
        }
        None
    }

    /// Lets every pending task and timer run to quiescence.
    pub fn run_until_idle(&self) {
        for _ in 0..MAX_HARNESS_STEPS {
            self.settle();
            let Some(next) = self.clock.next_deadline() else {
                return;
            };
            self.clock.set_now(next);
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Rc<RefCell<HashMap<String, String>>>,
    refuse_writes: Rc<Cell<bool>>,
}

impl MemoryCache {
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes.set(refuse);
    }
}

impl LocalCache for MemoryCache {
    fn read(&self, key: &str) -> Option<String> {
        self.get(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        if self.refuse_writes.get() {
            return Err(CacheError::Write("quota exceeded".to_string()));
        }
        self.insert(key, value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendMode {
    Scripted,
    Store,
}

struct BackendState {
    mode: BackendMode,
    offline: bool,
    script: VecDeque<Result<HttpResponse, TransportError>>,
    blobs: HashMap<String, String>,
    requests: Vec<HttpRequest>,
    writes: usize,
    admin: Option<(String, String)>,
    read_delay: Option<(Rc<dyn Clock>, Duration)>,
}

/// Blob endpoint double. Scripted responses are served first; after that a
/// store-mode backend behaves like the real read/write service and an
/// offline one fails every request at the network level.
#[derive(Clone)]
pub struct ScriptedBackend {
    state: Rc<RefCell<BackendState>>,
}

impl ScriptedBackend {
    fn with_mode(mode: BackendMode) -> Self {
        Self {
            state: Rc::new(RefCell::new(BackendState {
                mode,
                offline: false,
                script: VecDeque::new(),
                blobs: HashMap::new(),
                requests: Vec::new(),
                writes: 0,
                admin: None,
                read_delay: None,
            })),
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self::with_mode(BackendMode::Scripted)
    }

    #[must_use]
    pub fn store() -> Self {
        Self::with_mode(BackendMode::Store)
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.borrow_mut().offline = offline;
    }

    /// Store mode answers 401 unless the request carries this header value.
    pub fn require_admin(&self, header: &str, token: &str) {
        self.state.borrow_mut().admin = Some((header.to_string(), token.to_string()));
    }

    /// Holds every read for `delay` on `clock` before answering it.
    pub fn delay_reads(&self, clock: Rc<dyn Clock>, delay: Duration) {
        self.state.borrow_mut().read_delay = Some((clock, delay));
    }

    pub fn push_response(&self, response: Result<HttpResponse, TransportError>) {
        self.state.borrow_mut().script.push_back(response);
    }

    pub fn put_blob(&self, key: &str, body: &str) {
        self.state
            .borrow_mut()
            .blobs
            .insert(key.to_string(), body.to_string());
    }

    #[must_use]
    pub fn stored(&self, key: &str) -> Option<Value> {
        self.state
            .borrow()
            .blobs
            .get(key)
            .and_then(|body| serde_json::from_str(body).ok())
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.borrow().requests.clone()
    }

    #[must_use]
    pub fn reads(&self) -> usize {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|request| request.method == HttpMethod::Get)
            .count()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    /// Stored blob keys starting with `prefix`, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .borrow()
            .blobs
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

fn blob_key(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .and_then(|key| urlencoding::decode(key).ok())
        .map(|key| key.into_owned())
}

#[async_trait(?Send)]
impl HttpBackend for ScriptedBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let delay = {
            let mut state = self.state.borrow_mut();
            state.requests.push(request.clone());
            state
                .read_delay
                .clone()
                .filter(|_| request.method == HttpMethod::Get)
        };
        if let Some((clock, delay)) = delay {
            clock.sleep(delay).await;
        }
        let mut state = self.state.borrow_mut();
        if let Some(response) = state.script.pop_front() {
            return response;
        }
        if state.offline || state.mode == BackendMode::Scripted {
            return Err(TransportError::Network("offline".to_string()));
        }
        if let Some((header, token)) = state.admin.as_ref() {
            if request.header(header) != Some(token.as_str()) {
                return Ok(HttpResponse::new(401, ""));
            }
        }
        let Some(key) = blob_key(&request.url) else {
            return Ok(HttpResponse::new(400, "missing key"));
        };
        match request.method {
            HttpMethod::Get => {
                let body = state.blobs.get(&key).cloned().unwrap_or_default();
                Ok(HttpResponse::new(200, body).with_content_type("application/json"))
            }
            HttpMethod::Put => {
                let body = request.body.clone().unwrap_or_default();
                state.blobs.insert(key, body);
                state.writes += 1;
                Ok(HttpResponse::new(200, r#"{"ok":true}"#).with_content_type("application/json"))
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryLocation {
    route: Rc<RefCell<String>>,
}

impl MemoryLocation {
    #[must_use]
    pub fn at(route: &str) -> Self {
        Self {
            route: Rc::new(RefCell::new(route.to_string())),
        }
    }

    pub fn set(&self, route: &str) {
        *self.route.borrow_mut() = route.to_string();
    }
}

impl HostLocation for MemoryLocation {
    fn route_key(&self) -> String {
        self.route.borrow().clone()
    }
}

type SharedNavigationHandler = Rc<RefCell<NavigationHandler>>;

#[derive(Clone, Default)]
pub struct ManualNavigation {
    handlers: Rc<RefCell<Vec<(u64, SharedNavigationHandler)>>>,
    next: Rc<Cell<u64>>,
}

impl ManualNavigation {
    pub fn emit(&self, signal: NavigationSignal) {
        let handlers: Vec<SharedNavigationHandler> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            let mut callback = handler.borrow_mut();
            (*callback)(signal);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }
}

impl NavigationSource for ManualNavigation {
    fn subscribe(&self, handler: NavigationHandler) -> Subscription {
        let id = self.next.get();
        self.next.set(id + 1);
        self.handlers
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(handler))));
        let handlers = Rc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                handlers.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCall {
    pub wrapper: NodeId,
    pub schedule: ScheduleRecord,
    pub source: ScheduleSource,
}

/// Records every render and fills the wrapper with a single grid node.
#[derive(Clone)]
pub struct RecordingPresenter {
    tree: MemoryTree,
    calls: Rc<RefCell<Vec<RenderCall>>>,
    render_nothing: Rc<Cell<bool>>,
}

impl RecordingPresenter {
    #[must_use]
    pub fn new(tree: &MemoryTree) -> Self {
        Self {
            tree: tree.clone(),
            calls: Rc::new(RefCell::new(Vec::new())),
            render_nothing: Rc::new(Cell::new(false)),
        }
    }

    pub fn render_nothing(&self, nothing: bool) {
        self.render_nothing.set(nothing);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.borrow().clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<RenderCall> {
        self.calls.borrow().last().cloned()
    }
}

impl SchedulePresenter<NodeId> for RecordingPresenter {
    fn render(&self, wrapper: &NodeId, schedule: &ScheduleRecord, source: ScheduleSource) {
        self.calls.borrow_mut().push(RenderCall {
            wrapper: *wrapper,
            schedule: schedule.clone(),
            source,
        });
        self.tree.clear_children(wrapper);
        if self.render_nothing.get() {
            return;
        }
        let grid = self.tree.append_with_class(wrapper, "div", "schedule-grid");
        let filled = schedule.iter().filter(|(_, entries)| !entries.is_empty()).count();
        self.tree.set_text(&grid, &format!("{filled} of 7 days scheduled"));
    }
}
