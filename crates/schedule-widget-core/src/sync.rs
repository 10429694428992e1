use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::WidgetConfig;
use crate::schedule::{ScheduleRecord, ValidationError};
use crate::transport::{BlobMethod, BlobTransport, TransportResult};

/// Set on the cached envelope while the remote copy is behind the local one.
pub const PENDING_SYNC_FIELD: &str = "pendingSync";
pub const ERROR_PARSE_FAILURE: &str = "parse_failure";
const ERROR_SAVE_ABANDONED: &str = "save_abandoned";
/// Remote backups are named `<blob>_backup_<stamp>`.
pub const BACKUP_INFIX: &str = "_backup_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("local cache is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write local cache: {0}")]
    Write(String),
}

/// Single string-keyed slot persisted across page loads.
pub trait LocalCache {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Remote,
    Cache,
    Default,
}

impl ScheduleSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Cache => "cache",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSchedule {
    pub record: ScheduleRecord,
    pub source: ScheduleSource,
}

impl LoadedSchedule {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source != ScheduleSource::Remote
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("schedule load failed with status {status}: {error}")]
    LoadFailed { status: u16, error: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaveOutcome {
    Remote,
    /// The remote write failed; the local cache holds the pending copy.
    CachedOnly { status: u16, error: String },
}

impl SaveOutcome {
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Immediate,
    Debounced,
}

type Waiters = Vec<oneshot::Sender<SaveOutcome>>;

#[derive(Default)]
struct PendingSave {
    generation: u64,
    latest: Option<ScheduleRecord>,
    waiters: Waiters,
}

struct CachedEntry {
    record: ScheduleRecord,
    pending: bool,
}

pub struct ScheduleSync {
    transport: BlobTransport,
    cache: Rc<dyn LocalCache>,
    clock: Rc<dyn Clock>,
    blob_name: String,
    cache_key: String,
    debounce: Duration,
    backup_cache_prefix: Option<String>,
    pending: RefCell<PendingSave>,
    writes_in_flight: Cell<usize>,
}

impl ScheduleSync {
    pub fn new(
        transport: BlobTransport,
        cache: Rc<dyn LocalCache>,
        clock: Rc<dyn Clock>,
        config: &WidgetConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            clock,
            blob_name: config.blob_name.clone(),
            cache_key: config.cache_key.clone(),
            debounce: Duration::from_millis(config.save_debounce_ms),
            backup_cache_prefix: config
                .backup_before_save
                .then(|| config.backup_cache_prefix.clone()),
            pending: RefCell::new(PendingSave::default()),
            writes_in_flight: Cell::new(0),
        }
    }

    /// Remote first, then the last-known-good cache. A local copy that never
    /// reached the remote is pushed before reading so it is not shadowed.
    pub async fn load(&self) -> Result<LoadedSchedule, SyncError> {
        let cached = self.read_cache();

        if let Some(entry) = cached.as_ref().filter(|entry| entry.pending) {
            tracing::info!(blob = %self.blob_name, "replaying pending schedule write");
            let outcome = self.write_now(entry.record.clone()).await;
            if !outcome.is_remote() {
                return Ok(LoadedSchedule {
                    record: entry.record.clone(),
                    source: ScheduleSource::Cache,
                });
            }
        }

        let result = self
            .transport
            .request(&self.blob_name, BlobMethod::Read, None)
            .await;
        match remote_record(&result) {
            Ok(record) => {
                self.write_cache(&record.to_payload(self.clock.now_ms()), false);
                Ok(LoadedSchedule {
                    record,
                    source: ScheduleSource::Remote,
                })
            }
            Err(error) => {
                tracing::warn!(
                    blob = %self.blob_name,
                    status = result.status,
                    error = %error,
                    has_cache = cached.is_some(),
                    "remote schedule read failed"
                );
                match cached {
                    Some(entry) => Ok(LoadedSchedule {
                        record: entry.record,
                        source: ScheduleSource::Cache,
                    }),
                    None => Err(SyncError::LoadFailed {
                        status: result.status,
                        error,
                    }),
                }
            }
        }
    }

    /// An immediate save supersedes any queued debounced one; callers still
    /// waiting on the queued save receive the immediate outcome.
    pub async fn save(&self, record: &ScheduleRecord, mode: SaveMode) -> SaveOutcome {
        match mode {
            SaveMode::Immediate => {
                let superseded = self.take_queued().map(|(_, waiters)| waiters);
                let outcome = self.write_now(record.clone()).await;
                notify(superseded.unwrap_or_default(), &outcome);
                outcome
            }
            SaveMode::Debounced => self.save_debounced(record.clone()).await,
        }
    }

    /// Writes a queued debounced save right away. `None` if nothing was queued.
    pub async fn flush(&self) -> Option<SaveOutcome> {
        let (latest, waiters) = self.take_queued()?;
        let latest = latest?;
        tracing::debug!(coalesced = waiters.len(), "flushing queued schedule save early");
        let outcome = self.write_now(latest).await;
        notify(waiters, &outcome);
        Some(outcome)
    }

    #[cfg(test)]
    fn has_pending_write(&self) -> bool {
        self.read_cache().is_some_and(|entry| entry.pending)
    }

    /// A debounced save is queued or a write has not been answered yet.
    #[must_use]
    pub fn has_unsynced_changes(&self) -> bool {
        self.pending.borrow().latest.is_some() || self.writes_in_flight.get() > 0
    }

    /// Cancels the queued debounced save, returning its record and waiters.
    fn take_queued(&self) -> Option<(Option<ScheduleRecord>, Waiters)> {
        let mut pending = self.pending.borrow_mut();
        pending.generation = pending.generation.wrapping_add(1);
        if pending.latest.is_none() && pending.waiters.is_empty() {
            return None;
        }
        Some((pending.latest.take(), std::mem::take(&mut pending.waiters)))
    }

    async fn save_debounced(&self, record: ScheduleRecord) -> SaveOutcome {
        let (sender, receiver) = oneshot::channel();
        let generation = {
            let mut pending = self.pending.borrow_mut();
            pending.generation = pending.generation.wrapping_add(1);
            pending.latest = Some(record);
            pending.waiters.push(sender);
            pending.generation
        };

        self.clock.sleep(self.debounce).await;

        let flush = {
            let mut pending = self.pending.borrow_mut();
            if pending.generation == generation {
                pending
                    .latest
                    .take()
                    .map(|latest| (latest, std::mem::take(&mut pending.waiters)))
            } else {
                None
            }
        };
        if let Some((latest, waiters)) = flush {
            tracing::debug!(coalesced = waiters.len(), "flushing debounced schedule save");
            let outcome = self.write_now(latest).await;
            notify(waiters, &outcome);
        }

        receiver.await.unwrap_or_else(|_| SaveOutcome::CachedOnly {
            status: 0,
            error: ERROR_SAVE_ABANDONED.to_string(),
        })
    }

    async fn write_now(&self, record: ScheduleRecord) -> SaveOutcome {
        self.writes_in_flight.set(self.writes_in_flight.get() + 1);
        let outcome = self.write_remote(&record).await;
        self.writes_in_flight.set(self.writes_in_flight.get().saturating_sub(1));
        outcome
    }

    async fn write_remote(&self, record: &ScheduleRecord) -> SaveOutcome {
        let now_ms = self.clock.now_ms();
        let payload = record.to_payload(now_ms);
        if let Some(prefix) = self.backup_cache_prefix.as_deref() {
            self.write_backup(&payload, now_ms, prefix).await;
        }
        let result = self
            .transport
            .request(&self.blob_name, BlobMethod::Write, Some(&payload))
            .await;
        let outcome = if result.ok {
            tracing::info!(blob = %self.blob_name, status = result.status, "schedule saved");
            SaveOutcome::Remote
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| format!("http_{}", result.status));
            tracing::warn!(
                blob = %self.blob_name,
                status = result.status,
                error = %error,
                "remote schedule write failed, keeping local copy"
            );
            SaveOutcome::CachedOnly {
                status: result.status,
                error,
            }
        };
        self.write_cache(&payload, !outcome.is_remote());
        outcome
    }

    /// Timestamped copy next to the blob, or in the local cache when the
    /// remote refuses it. A failed backup never blocks the save.
    async fn write_backup(&self, payload: &Value, now_ms: u64, cache_prefix: &str) {
        let stamp = backup_stamp(now_ms);
        let name = format!("{}{BACKUP_INFIX}{stamp}", self.blob_name);
        let result = self
            .transport
            .request(&name, BlobMethod::Write, Some(payload))
            .await;
        if result.ok {
            tracing::debug!(backup = %name, "schedule backup saved");
            return;
        }

        let key = format!("{cache_prefix}{stamp}");
        let stored = serde_json::to_string(payload)
            .map_err(|error| CacheError::Write(error.to_string()))
            .and_then(|raw| self.cache.write(&key, &raw));
        match stored {
            Ok(()) => tracing::info!(
                backup = %key,
                status = result.status,
                "remote backup refused, kept a local copy"
            ),
            Err(error) => tracing::warn!(backup = %key, %error, "schedule backup failed"),
        }
    }

    fn read_cache(&self) -> Option<CachedEntry> {
        let raw = self.cache.read(&self.cache_key)?;
        let value = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key = %self.cache_key, %error, "ignoring unreadable schedule cache");
                return None;
            }
        };
        let pending = value
            .get(PENDING_SYNC_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(CachedEntry {
            record: ScheduleRecord::normalize(&value),
            pending,
        })
    }

    fn write_cache(&self, payload: &Value, pending: bool) {
        let mut payload = payload.clone();
        if pending {
            if let Some(object) = payload.as_object_mut() {
                object.insert(PENDING_SYNC_FIELD.to_string(), Value::Bool(true));
            }
        }
        let raw = match serde_json::to_string(&payload) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize schedule cache");
                return;
            }
        };
        if let Err(error) = self.cache.write(&self.cache_key, &raw) {
            tracing::warn!(key = %self.cache_key, %error, "failed to update schedule cache");
        }
    }
}

fn notify(waiters: Waiters, outcome: &SaveOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

/// RFC 3339 with `:` and `.` replaced so the stamp is safe in blob names.
fn backup_stamp(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|at| at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string())
        .unwrap_or_else(|| unix_ms.to_string())
}

fn remote_record(result: &TransportResult) -> Result<ScheduleRecord, String> {
    if !result.ok {
        return Err(result
            .error
            .clone()
            .unwrap_or_else(|| format!("http_{}", result.status)));
    }
    if let Some(parsed) = result.parsed.as_ref() {
        return Ok(ScheduleRecord::normalize(parsed));
    }
    let body = result.body.as_deref().unwrap_or_default();
    if body.trim_start_matches('\u{feff}').trim().is_empty() {
        return Ok(ScheduleRecord::empty());
    }
    Err(ERROR_PARSE_FAILURE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Assignment, Day};
    use crate::testing::{Harness, MemoryCache, ScriptedBackend};
    use crate::transport::HttpResponse;
    use serde_json::json;

    fn sync_with(backend: &ScriptedBackend, cache: &MemoryCache, harness: &Harness) -> Rc<ScheduleSync> {
        let config = WidgetConfig {
            backup_before_save: false,
            ..WidgetConfig::default()
        };
        sync_with_config(&config, backend, cache, harness)
    }

    fn sync_with_config(
        config: &WidgetConfig,
        backend: &ScriptedBackend,
        cache: &MemoryCache,
        harness: &Harness,
    ) -> Rc<ScheduleSync> {
        let transport = BlobTransport::new(&config.remote_base_url, Rc::new(backend.clone()));
        Rc::new(ScheduleSync::new(
            transport,
            Rc::new(cache.clone()),
            harness.clock(),
            config,
        ))
    }

    fn sample() -> ScheduleRecord {
        let mut record = ScheduleRecord::empty();
        record.assign(Day::Mon, Assignment::new("s1", "Show", ""));
        record
    }

    #[test]
    fn empty_remote_blob_loads_empty_week() {
        let harness = Harness::new();
        let backend = ScriptedBackend::offline();
        backend.push_response(Ok(HttpResponse::new(200, "")));
        let cache = MemoryCache::default();
        let sync = sync_with(&backend, &cache, &harness);

        let loaded = harness
            .run(async move { sync.load().await })
            .expect("load future completes")
            .expect("empty blob loads");
        assert_eq!(loaded.source, ScheduleSource::Remote);
        assert!(loaded.record.is_empty());
        assert!(cache.get(DEFAULT_KEY).is_some());
    }

    #[test]
    fn remote_failure_falls_back_to_cache() {
        let harness = Harness::new();
        let backend = ScriptedBackend::offline();
        let cache = MemoryCache::default();
        cache.insert(
            DEFAULT_KEY,
            &json!({"schedule": {"Tue": [{"id": "t1", "name": "Cached"}]}}).to_string(),
        );
        let sync = sync_with(&backend, &cache, &harness);

        let loaded = harness
            .run(async move { sync.load().await })
            .expect("load future completes")
            .expect("cache fallback");
        assert!(loaded.is_fallback());
        assert_eq!(loaded.source, ScheduleSource::Cache);
        assert_eq!(loaded.record.assignment(Day::Tue).map(|a| a.name.as_str()), Some("Cached"));
    }

    #[test]
    fn remote_failure_without_cache_reports_status() {
        let harness = Harness::new();
        let backend = ScriptedBackend::offline();
        backend.push_response(Ok(HttpResponse::new(500, "boom")));
        let sync = sync_with(&backend, &MemoryCache::default(), &harness);

        let error = harness
            .run(async move { sync.load().await })
            .expect("load future completes")
            .expect_err("nothing to fall back to");
        assert_eq!(
            error,
            SyncError::LoadFailed {
                status: 500,
                error: "http_500".to_string()
            }
        );
    }

    #[test]
    fn plain_text_body_is_a_parse_failure() {
        let harness = Harness::new();
        let backend = ScriptedBackend::offline();
        backend.push_response(Ok(HttpResponse::new(200, "gateway says hi")));
        let sync = sync_with(&backend, &MemoryCache::default(), &harness);

        let error = harness
            .run(async move { sync.load().await })
            .expect("load future completes")
            .expect_err("text body is not a schedule");
        assert!(matches!(error, SyncError::LoadFailed { error, .. } if error == ERROR_PARSE_FAILURE));
    }

    #[test]
    fn failed_write_marks_cache_pending_and_replays_on_load() {
        let harness = Harness::new();
        let backend = ScriptedBackend::store();
        backend.set_offline(true);
        let cache = MemoryCache::default();
        let sync = sync_with(&backend, &cache, &harness);

        let saver = Rc::clone(&sync);
        let outcome = harness
            .run(async move { saver.save(&sample(), SaveMode::Immediate).await })
            .expect("save future completes");
        assert!(matches!(outcome, SaveOutcome::CachedOnly { status: 0, .. }));
        assert!(sync.has_pending_write());

        backend.set_offline(false);
        let loader = Rc::clone(&sync);
        let loaded = harness
            .run(async move { loader.load().await })
            .expect("load future completes")
            .expect("load succeeds");
        assert_eq!(loaded.source, ScheduleSource::Remote);
        assert_eq!(loaded.record, sample());
        assert!(!sync.has_pending_write());
        assert_eq!(backend.write_count(), 1);
    }

    #[test]
    fn debounced_saves_share_one_outcome() {
        let harness = Harness::new();
        let backend = ScriptedBackend::store();
        let sync = sync_with(&backend, &MemoryCache::default(), &harness);

        let mut first = ScheduleRecord::empty();
        first.assign(Day::Fri, Assignment::new("a", "A", ""));
        let mut second = ScheduleRecord::empty();
        second.assign(Day::Fri, Assignment::new("b", "B", ""));

        let a = Rc::clone(&sync);
        let first_outcome = harness.spawn(async move { a.save(&first, SaveMode::Debounced).await });
        harness.advance(Duration::from_millis(100));
        let b = Rc::clone(&sync);
        let second_outcome = harness.spawn(async move { b.save(&second, SaveMode::Debounced).await });
        harness.advance(Duration::from_millis(DEFAULT_DEBOUNCE));

        assert_eq!(first_outcome.take(), Some(SaveOutcome::Remote));
        assert_eq!(second_outcome.take(), Some(SaveOutcome::Remote));
        assert_eq!(backend.write_count(), 1);
        let stored = backend.stored("schedule.json").expect("blob written");
        assert_eq!(stored["schedule"]["Fri"][0]["id"], json!("b"));
    }

    #[test]
    fn immediate_save_supersedes_queued_debounced_save() {
        let harness = Harness::new();
        let backend = ScriptedBackend::store();
        let sync = sync_with(&backend, &MemoryCache::default(), &harness);

        let mut queued = ScheduleRecord::empty();
        queued.assign(Day::Mon, Assignment::new("old", "Old", ""));
        let mut explicit = ScheduleRecord::empty();
        explicit.assign(Day::Mon, Assignment::new("new", "New", ""));

        let debounced = Rc::clone(&sync);
        let queued_outcome =
            harness.spawn(async move { debounced.save(&queued, SaveMode::Debounced).await });
        harness.advance(Duration::from_millis(50));
        assert!(sync.has_unsynced_changes());

        let immediate = Rc::clone(&sync);
        let outcome = harness
            .run(async move { immediate.save(&explicit, SaveMode::Immediate).await })
            .expect("save future completes");
        harness.run_until_idle();

        assert_eq!(outcome, SaveOutcome::Remote);
        assert_eq!(queued_outcome.take(), Some(SaveOutcome::Remote));
        assert_eq!(backend.write_count(), 1);
        let stored = backend.stored("schedule.json").expect("blob written");
        assert_eq!(stored["schedule"]["Mon"][0]["id"], json!("new"));
        assert!(!sync.has_unsynced_changes());
    }

    #[test]
    fn flush_writes_queued_save_without_waiting() {
        let harness = Harness::new();
        let backend = ScriptedBackend::store();
        let sync = sync_with(&backend, &MemoryCache::default(), &harness);

        let debounced = Rc::clone(&sync);
        let queued_outcome =
            harness.spawn(async move { debounced.save(&sample(), SaveMode::Debounced).await });
        harness.settle();

        let flusher = Rc::clone(&sync);
        let flushed = harness
            .run(async move { flusher.flush().await })
            .expect("flush future completes");
        assert_eq!(flushed, Some(SaveOutcome::Remote));
        assert_eq!(backend.write_count(), 1);

        let flusher = Rc::clone(&sync);
        assert_eq!(harness.run(async move { flusher.flush().await }), Some(None));
        harness.run_until_idle();
        assert_eq!(queued_outcome.take(), Some(SaveOutcome::Remote));
        assert_eq!(backend.write_count(), 1);
    }

    #[test]
    fn save_leaves_timestamped_backup_next_to_blob() {
        let harness = Harness::new();
        harness.manual_clock().set_now(1_700_000_000_000);
        let backend = ScriptedBackend::store();
        let cache = MemoryCache::default();
        let sync = sync_with_config(&WidgetConfig::default(), &backend, &cache, &harness);

        let outcome = harness
            .run(async move { sync.save(&sample(), SaveMode::Immediate).await })
            .expect("save future completes");
        assert_eq!(outcome, SaveOutcome::Remote);

        let backups = backend.keys_with_prefix("schedule.json_backup_");
        assert_eq!(backups, vec!["schedule.json_backup_2023-11-14T22-13-20-000Z".to_string()]);
        assert_eq!(backend.stored(&backups[0]), backend.stored("schedule.json"));
        assert_eq!(backend.write_count(), 2);
    }

    #[test]
    fn refused_backup_is_kept_in_cache_and_save_proceeds() {
        let harness = Harness::new();
        let backend = ScriptedBackend::store();
        backend.push_response(Ok(HttpResponse::new(507, "quota")));
        let cache = MemoryCache::default();
        let sync = sync_with_config(&WidgetConfig::default(), &backend, &cache, &harness);

        let outcome = harness
            .run(async move { sync.save(&sample(), SaveMode::Immediate).await })
            .expect("save future completes");
        assert_eq!(outcome, SaveOutcome::Remote);
        assert!(backend.keys_with_prefix("schedule.json_backup_").is_empty());

        let local = cache
            .get("schedule-widget.backup.1970-01-01T00-00-00-000Z")
            .expect("local backup");
        let local: Value = serde_json::from_str(&local).expect("backup is json");
        assert_eq!(local["schedule"]["Mon"][0]["id"], json!("s1"));
    }

    const DEFAULT_KEY: &str = crate::config::DEFAULT_CACHE_KEY;
    const DEFAULT_DEBOUNCE: u64 = crate::config::DEFAULT_SAVE_DEBOUNCE_MS;
}
