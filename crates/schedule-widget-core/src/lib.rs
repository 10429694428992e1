#![cfg_attr(test, allow(clippy::expect_used))]
//! # schedule-widget-core
//!
//! Target-independent core of the weekly schedule widget that is injected into
//! a host single-page application.
//!
//! ## Architecture
//!
//! - `schedule` - Seven-day record of assignments and its wire payload
//! - `classify` - Response sniffing (JSON vs host-rendered markup)
//! - `transport` - Blob read/write behind the host client with raw fallback
//! - `sync` - Remote-then-cache loading and debounced, never-lost saves
//! - `host` - Host tree, navigation and presenter seams
//! - `anchor` - Anchor resolution and wrapper insertion
//! - `reposition` - Self-healing child-list observer
//! - `route` - Per-route mount state and cooldowns
//! - `controller` - Mount/unmount lifecycle and edit operations
//!
//! The browser bindings live in the `schedule-widget-web-shell` app.

pub mod anchor;
pub mod classify;
pub mod clock;
pub mod config;
pub mod controller;
pub mod host;
pub mod reposition;
pub mod route;
pub mod schedule;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;


pub use anchor::{AnchorEngine, Placement, PlaceholderRules, Positioned};
pub use classify::{ContentKind, classify_content};
pub use clock::{Clock, Retry, RetryPolicy, Spawner};
pub use config::{ConfigError, WidgetConfig};
pub use controller::{LifecycleController, MountOutcome, OutcomeListener, SkipReason, WidgetHost};
pub use host::{
    HostLocation, HostTree, NavigationSignal, NavigationSource, SchedulePresenter, Subscription,
    route_key,
};
pub use route::{MountContext, MountPhase};
pub use schedule::{Assignment, Day, ScheduleRecord, ValidationError};
pub use sync::{
    CacheError, LoadedSchedule, LocalCache, SaveMode, SaveOutcome, ScheduleSource, ScheduleSync,
    SyncError,
};
pub use transport::{
    BlobMethod, BlobTransport, HttpBackend, HttpMethod, HttpRequest, HttpResponse,
    TransportError, TransportResult,
};
