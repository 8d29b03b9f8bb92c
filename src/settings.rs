//! Settings cache with debounced, validated, batched remote writes.
//!
//! Writes apply locally right away. Writes landing within one quiet period
//! coalesce per key (last write wins) and go out as one batch when the
//! period elapses. Each key is validated before dispatch and sent through
//! [`NotebookClient::enqueue_or_execute`], so batches issued while offline
//! wait in the offline queue.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, mem,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::{
    listeners::{lock, Listeners, Subscription},
    CancelHandle, ErrorKind, FallbackStore, MemoryFallback, NotebookClient, NotebookError,
    RequestDescriptor, RequestFailure, RetryFailure, Submission,
};

const THEME_KEY: &str = "theme";

/// Flat snapshot of every known setting.
pub type Settings = Map<String, Value>;

/// Progress reported to the caller of [`SettingsService::set_setting`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// Applied locally, waiting for the quiet period.
    Saving,
    /// Accepted by the remote store.
    Saved,
    /// Client was offline; the write waits in the offline queue.
    Queued,
    /// A later write to the same key replaced this one, either before it
    /// was sent or while it was still being retried.
    Superseded,
    /// Rejected by validation or by the remote store.
    Error,
}

pub type StatusCallback = Arc<dyn Fn(SaveStatus) + Send + Sync>;

/// Timing and routing of settings writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsOptions {
    /// Debounce window in milliseconds.
    pub quiet_period_ms: u64,
    /// Delay between a settled batch and the listener notification.
    pub settle_delay_ms: u64,
    /// Remote collection; a key is written to `{endpoint}/{key}`.
    pub endpoint: String,
}

impl Default for SettingsOptions {
    fn default() -> Self {
        Self {
            quiet_period_ms: 300,
            settle_delay_ms: 150,
            endpoint: "/settings".to_owned(),
        }
    }
}

/// Observable state of the write debouncer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebouncePhase {
    Idle,
    /// Writes are pending and the quiet-period timer is armed.
    Pending,
    /// A batch is being dispatched.
    Flushing,
}

/// Result of one key in a flushed batch.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyOutcome {
    Saved,
    Queued,
    /// Failed validation and was never sent.
    Rejected(String),
    /// Cancelled in flight by a newer write to the same key.
    Superseded,
    Failed(RequestFailure),
}

impl KeyOutcome {
    pub fn status(&self) -> SaveStatus {
        match self {
            Self::Saved => SaveStatus::Saved,
            Self::Queued => SaveStatus::Queued,
            Self::Superseded => SaveStatus::Superseded,
            Self::Rejected(_) | Self::Failed(_) => SaveStatus::Error,
        }
    }
}

/// Per-key results of one flushed batch, ordered by key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    pub outcomes: Vec<(String, KeyOutcome)>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, key: &str) -> Option<&KeyOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, outcome)| outcome)
    }
}

/// Checks `value` against the rule registered for `key`.
///
/// Keys without a rule are accepted.
pub fn validate_setting(key: &str, value: &Value) -> Result<(), String> {
    match key {
        "theme" => one_of(key, value, &["dark", "light", "auto"]),
        "language" => one_of(key, value, &["zh-CN", "en-US"]),
        "autoSaveInterval" => number_between(key, value, 10.0, 300.0),
        "fontSize" => number_between(key, value, 12.0, 20.0),
        "fontFamily" => match value.as_str() {
            Some(family) if !family.is_empty() => Ok(()),
            _ => Err(format!("{key} must be a non-empty string")),
        },
        "current_background_light" | "current_background_dark" => {
            if value.is_string() {
                Ok(())
            } else {
                Err(format!("{key} must be a string"))
            }
        }
        "pomodoro_work_duration" | "pomodoro_long_break_duration" => {
            number_between(key, value, 1.0, 60.0)
        }
        "pomodoro_short_break_duration" => number_between(key, value, 1.0, 30.0),
        "enable_auto_save" | "enable_notifications" | "enable_sound" => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(format!("{key} must be a boolean"))
            }
        }
        _ => Ok(()),
    }
}

fn one_of(key: &str, value: &Value, allowed: &[&str]) -> Result<(), String> {
    match value.as_str() {
        Some(candidate) if allowed.contains(&candidate) => Ok(()),
        _ => Err(format!("{key} must be one of {}", allowed.join(", "))),
    }
}

fn number_between(key: &str, value: &Value, min: f64, max: f64) -> Result<(), String> {
    match value.as_f64() {
        Some(number) if (min..=max).contains(&number) => Ok(()),
        _ => Err(format!("{key} must be a number between {min} and {max}")),
    }
}

fn default_settings() -> Settings {
    let defaults = json!({
        "theme": "dark",
        "language": "zh-CN",
        "autoSave": true,
        "autoSaveInterval": 30,
        "fontSize": 14,
        "fontFamily": "Orbitron",
        "enableNotifications": true,
        "enableSounds": true,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Settings::new(),
    }
}

struct PendingUpdate {
    value: Value,
    callback: Option<StatusCallback>,
}

enum Phase {
    Idle,
    Pending {
        generation: u64,
        updates: BTreeMap<String, PendingUpdate>,
        timer: JoinHandle<()>,
    },
    Flushing,
}

struct Debouncer {
    phase: Phase,
    generation: u64,
    /// Batches taken out of `Pending` whose dispatch has not finished.
    in_flight: usize,
}

impl Debouncer {
    fn observed(&self) -> DebouncePhase {
        match self.phase {
            Phase::Idle => DebouncePhase::Idle,
            Phase::Pending { .. } => DebouncePhase::Pending,
            Phase::Flushing => DebouncePhase::Flushing,
        }
    }

    /// Moves the pending batch out and enters `Flushing`.
    ///
    /// With `expected` set, only the timer of that generation may take the
    /// batch; a stale timer gets `None`.
    fn take(&mut self, expected: Option<u64>) -> Option<BTreeMap<String, PendingUpdate>> {
        match mem::replace(&mut self.phase, Phase::Flushing) {
            Phase::Pending {
                generation,
                updates,
                timer,
            } if expected.map_or(true, |expected| expected == generation) => {
                if expected.is_none() {
                    timer.abort();
                }
                self.in_flight += 1;
                Some(updates)
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    fn finish(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 && matches!(self.phase, Phase::Flushing) {
            self.phase = Phase::Idle;
        }
    }
}

/// Remote writes still in flight, one per key.
#[derive(Default)]
struct InFlightWrites {
    next_id: u64,
    by_key: HashMap<String, (u64, CancelHandle)>,
}

impl InFlightWrites {
    /// Registers a new write for `key`, cancelling the one it replaces.
    fn begin(&mut self, key: &str) -> (u64, CancelHandle) {
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelHandle::new();
        if let Some((_, previous)) = self.by_key.insert(key.to_owned(), (id, cancel.clone())) {
            previous.cancel();
        }
        (id, cancel)
    }

    fn finish(&mut self, key: &str, id: u64) {
        if self.by_key.get(key).is_some_and(|(current, _)| *current == id) {
            self.by_key.remove(key);
        }
    }
}

struct Inner {
    client: NotebookClient,
    options: SettingsOptions,
    fallback: Arc<dyn FallbackStore>,
    settings: Mutex<Settings>,
    listeners: Listeners<Settings>,
    debounce: Mutex<Debouncer>,
    writes: Mutex<InFlightWrites>,
}

/// Local settings cache backed by the remote settings store.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct SettingsService {
    inner: Arc<Inner>,
}

impl fmt::Debug for SettingsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsService")
            .field("options", &self.inner.options)
            .field("phase", &self.phase())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl SettingsService {
    /// Creates a service with a process-local fallback store.
    pub fn new(client: NotebookClient, options: SettingsOptions) -> Self {
        Self::with_fallback(client, options, Arc::new(MemoryFallback::new()))
    }

    /// Creates a service whose defaults are seeded from `fallback`.
    ///
    /// A valid theme found in the fallback store overrides the built-in
    /// default theme.
    pub fn with_fallback(
        client: NotebookClient,
        options: SettingsOptions,
        fallback: Arc<dyn FallbackStore>,
    ) -> Self {
        let mut settings = default_settings();
        if let Some(theme) = fallback.load(THEME_KEY) {
            if validate_setting(THEME_KEY, &theme).is_ok() {
                settings.insert(THEME_KEY.to_owned(), theme);
            }
        }

        Self {
            inner: Arc::new(Inner {
                client,
                options,
                fallback,
                settings: Mutex::new(settings),
                listeners: Listeners::new(),
                debounce: Mutex::new(Debouncer {
                    phase: Phase::Idle,
                    generation: 0,
                    in_flight: 0,
                }),
                writes: Mutex::default(),
            }),
        }
    }

    pub fn options(&self) -> &SettingsOptions {
        &self.inner.options
    }

    /// Reads a setting; dotted keys address nested objects.
    pub fn get_setting(&self, key: &str) -> Option<Value> {
        let settings = lock(&self.inner.settings);
        let mut segments = key.split('.');
        let mut current = settings.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    /// Snapshot of every setting.
    pub fn all(&self) -> Settings {
        lock(&self.inner.settings).clone()
    }

    /// Registers a listener called with the full settings snapshot on every
    /// local change and after each settled batch.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn phase(&self) -> DebouncePhase {
        lock(&self.inner.debounce).observed()
    }

    /// Applies `value` locally and schedules it for the next batch.
    ///
    /// `callback` first receives [`SaveStatus::Saving`], then exactly one of
    /// `Saved`, `Queued`, `Error` or `Superseded`. Re-arms the quiet-period
    /// timer, so this must be called from within a Tokio runtime.
    pub fn set_setting(
        &self,
        key: impl Into<String>,
        value: Value,
        callback: Option<StatusCallback>,
    ) {
        let key = key.into();
        apply_path(&mut lock(&self.inner.settings), &key, value.clone());
        self.notify_listeners();
        report_status(callback.as_ref(), SaveStatus::Saving);

        let superseded = {
            let mut debounce = lock(&self.inner.debounce);
            let mut updates = match mem::replace(&mut debounce.phase, Phase::Idle) {
                Phase::Pending { updates, timer, .. } => {
                    timer.abort();
                    updates
                }
                Phase::Idle | Phase::Flushing => BTreeMap::new(),
            };
            let superseded = updates
                .insert(key, PendingUpdate { value, callback })
                .and_then(|previous| previous.callback);

            debounce.generation += 1;
            let generation = debounce.generation;
            let service = self.clone();
            let quiet_period = Duration::from_millis(self.inner.options.quiet_period_ms);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(quiet_period).await;
                service.fire(generation).await;
            });
            debounce.phase = Phase::Pending {
                generation,
                updates,
                timer,
            };
            superseded
        };

        report_status(superseded.as_ref(), SaveStatus::Superseded);
    }

    /// Sends the pending batch now instead of waiting for the quiet period.
    ///
    /// Returns an empty report when nothing is pending.
    pub async fn flush_now(&self) -> FlushReport {
        let Some(updates) = lock(&self.inner.debounce).take(None) else {
            return FlushReport::default();
        };
        let _flushing = FlushGuard(&self.inner.debounce);
        self.flush(updates).await
    }

    /// Replaces the local cache with defaults merged with the remote store.
    ///
    /// Writes still waiting for the quiet period are reapplied on top.
    pub async fn load_settings(&self) -> Result<(), RequestFailure> {
        let body = self
            .inner
            .client
            .execute(&RequestDescriptor::get(self.inner.options.endpoint.clone()))
            .await?;
        let remote = parse_remote_settings(body)?;

        if let Some(theme) = remote.get(THEME_KEY) {
            if validate_setting(THEME_KEY, theme).is_ok() {
                self.inner.fallback.store(THEME_KEY, theme);
            }
        }

        {
            let mut merged = default_settings();
            merged.extend(remote);
            let debounce = lock(&self.inner.debounce);
            if let Phase::Pending { updates, .. } = &debounce.phase {
                for (key, update) in updates {
                    apply_path(&mut merged, key, update.value.clone());
                }
            }
            *lock(&self.inner.settings) = merged;
        }

        self.notify_listeners();
        Ok(())
    }

    async fn fire(&self, generation: u64) {
        let Some(updates) = lock(&self.inner.debounce).take(Some(generation)) else {
            return;
        };
        let _flushing = FlushGuard(&self.inner.debounce);
        self.flush(updates).await;
    }

    async fn flush(&self, updates: BTreeMap<String, PendingUpdate>) -> FlushReport {
        if updates.is_empty() {
            return FlushReport::default();
        }

        let mut outcomes = Vec::with_capacity(updates.len());
        let mut dispatched = Vec::with_capacity(updates.len());
        for (key, update) in updates {
            match validate_setting(&key, &update.value) {
                Ok(()) => dispatched.push((key, update)),
                Err(reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key = %key, reason = %reason, "setting rejected by validation");
                    report_status(update.callback.as_ref(), SaveStatus::Error);
                    outcomes.push((key, KeyOutcome::Rejected(reason)));
                }
            }
        }

        if dispatched.is_empty() {
            return FlushReport { outcomes };
        }

        let dispatched: Vec<_> = dispatched
            .into_iter()
            .map(|(key, update)| {
                let (id, cancel) = lock(&self.inner.writes).begin(&key);
                (key, update, id, cancel)
            })
            .collect();

        let endpoint = self.inner.options.endpoint.trim_end_matches('/');
        let submissions = join_all(dispatched.iter().map(|(key, update, _, cancel)| {
            let descriptor = RequestDescriptor::put(
                format!("{endpoint}/{key}"),
                json!({ "key": key, "value": update.value }),
            );
            self.inner
                .client
                .enqueue_or_execute_cancellable(descriptor, cancel)
        }))
        .await;

        for ((key, update, id, cancel), submission) in dispatched.into_iter().zip(submissions) {
            lock(&self.inner.writes).finish(&key, id);
            let outcome = match submission {
                Submission::Queued { .. } => KeyOutcome::Queued,
                Submission::Completed(Ok(_)) => KeyOutcome::Saved,
                Submission::Completed(Err(_)) if cancel.is_cancelled() => KeyOutcome::Superseded,
                Submission::Completed(Err(failure)) => KeyOutcome::Failed(failure),
            };
            if outcome == KeyOutcome::Saved && key == THEME_KEY {
                self.inner.fallback.store(THEME_KEY, &update.value);
            }
            report_status(update.callback.as_ref(), outcome.status());
            outcomes.push((key, outcome));
        }
        outcomes.sort_by(|(left, _), (right, _)| left.cmp(right));

        #[cfg(feature = "tracing")]
        tracing::debug!(keys = outcomes.len(), "settings batch settled");

        tokio::time::sleep(Duration::from_millis(self.inner.options.settle_delay_ms)).await;
        self.notify_listeners();
        FlushReport { outcomes }
    }

    fn notify_listeners(&self) {
        let snapshot = self.all();
        self.inner.listeners.notify(&snapshot);
    }
}

struct FlushGuard<'a>(&'a Mutex<Debouncer>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).finish();
    }
}

fn report_status(callback: Option<&StatusCallback>, status: SaveStatus) {
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(?status, "status callback panicked");
        }
    }
}

/// Writes `value` at a dotted `path`, creating intermediate objects.
fn apply_path(settings: &mut Settings, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = settings;
    for segment in segments {
        let slot = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_owned(), value);
}

/// Accepts either `[{ "key": .., "value": .. }, ..]` or a plain object.
fn parse_remote_settings(body: Value) -> Result<Settings, RequestFailure> {
    match body {
        Value::Object(map) => Ok(map),
        Value::Array(rows) => {
            let mut settings = Settings::new();
            for row in rows {
                let Value::Object(mut row) = row else {
                    return Err(decode_failure("settings row is not an object"));
                };
                let Some(Value::String(key)) = row.remove("key") else {
                    return Err(decode_failure("settings row is missing a string key"));
                };
                settings.insert(key, row.remove("value").unwrap_or(Value::Null));
            }
            Ok(settings)
        }
        Value::Null => Ok(Settings::new()),
        _ => Err(decode_failure("settings response is neither a list nor an object")),
    }
}

fn decode_failure(detail: &str) -> RequestFailure {
    RequestFailure::from(RetryFailure {
        error: NotebookError::Decode(detail.to_owned()),
        kind: ErrorKind::Internal,
        attempts: 1,
    })
}
