//! Change detection and notification.
//!
//! A dedicated background thread per configuration periodically asks each
//! layer's storage "did this location change"; for enumerable layers it then
//! diffs individual entry values. Per-entry notifications dispatch
//! immediately; per-location notifications are debounced so bursts of rapid
//! filesystem events collapse into one callback. All subscriber callbacks run
//! on a small worker pool, so a slow or panicking subscriber can never stall
//! the detection thread.

use crate::entry::EntryValue;
use crate::error::{ConfigError, ConfigResult};
use crate::layer::ConfigLayer;
use crate::location::ConfigLocation;
use crate::scope::{Scope, ScopeSet};
use crate::settings::{ConfigFeature, FactorySettings};
use crate::storage::StorageRegistry;
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Callback invoked with the location that changed.
pub type UpdateListener = Arc<dyn Fn(&ConfigLocation) + Send + Sync>;

/// Handle for removing a subscription again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Job = Box<dyn FnOnce() + Send>;

/// Fixed-size worker pool for subscriber dispatch. Panics are confined to
/// the job that raised them.
struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("confstack-notify-{}", index))
                    .spawn(move || {
                        loop {
                            let job = {
                                let guard = rx.lock();
                                guard.recv()
                            };
                            match job {
                                Ok(job) => {
                                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                        warn!("subscriber callback panicked");
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    })
                    .expect("spawn notifier worker"),
            );
        }
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    fn submit(&self, job: Job) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(job);
        }
    }

    fn shutdown(&self) {
        self.tx.lock().take();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A debounced location notification waiting to fire.
struct DueItem {
    due: Instant,
    location: ConfigLocation,
    generation: u64,
}

impl PartialEq for DueItem {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}
impl Eq for DueItem {}
impl PartialOrd for DueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest due first.
        other.due.cmp(&self.due)
    }
}

struct NotifierShared {
    location_subs: Mutex<HashMap<ConfigLocation, Vec<(u64, UpdateListener)>>>,
    key_subs: Mutex<HashMap<String, Vec<(u64, UpdateListener)>>>,
    /// Latest generation per location; a newer generation supersedes any
    /// still-pending scheduled dispatch for the same location.
    pending: Mutex<HashMap<ConfigLocation, u64>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    pool: WorkerPool,
}

impl NotifierShared {
    fn dispatch_location(&self, location: ConfigLocation) {
        let listeners: Vec<UpdateListener> = {
            let subs = self.location_subs.lock();
            match subs.get(&location) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return, // no-one asked about this place; the normal case
            }
        };
        for listener in listeners {
            let location = location.clone();
            self.pool
                .submit(Box::new(move || listener(&location)));
        }
    }
}

/// Dispatches change notifications to subscribers, debouncing per location.
pub struct SourceChangeNotifier {
    shared: Arc<NotifierShared>,
    debounce: Duration,
    scheduler_tx: Mutex<Option<mpsc::Sender<DueItem>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl SourceChangeNotifier {
    /// The debounce window derives from the check frequency: half of it,
    /// clamped into 10..=100 ms.
    pub fn new(update_check_frequency_ms: i64) -> Self {
        let effective = if update_check_frequency_ms <= 0 {
            50
        } else {
            update_check_frequency_ms
        };
        let debounce = Duration::from_millis((effective / 2).clamp(10, 100) as u64);

        let shared = Arc::new(NotifierShared {
            location_subs: Mutex::new(HashMap::new()),
            key_subs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            pool: WorkerPool::new(2),
        });

        let (tx, rx) = mpsc::channel::<DueItem>();
        let scheduler_shared = shared.clone();
        let scheduler = std::thread::Builder::new()
            .name("confstack-debounce".to_string())
            .spawn(move || run_debounce_scheduler(rx, scheduler_shared))
            .expect("spawn debounce scheduler");

        Self {
            shared,
            debounce,
            scheduler_tx: Mutex::new(Some(tx)),
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    pub fn subscribe_location(
        &self,
        location: ConfigLocation,
        listener: UpdateListener,
    ) -> SubscriptionId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .location_subs
            .lock()
            .entry(location)
            .or_default()
            .push((id, listener));
        SubscriptionId(id)
    }

    pub fn subscribe_key(&self, full_key: impl Into<String>, listener: UpdateListener) -> SubscriptionId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .key_subs
            .lock()
            .entry(full_key.into())
            .or_default()
            .push((id, listener));
        SubscriptionId(id)
    }

    /// Remove a subscription from every location and key map. Visible to the
    /// next scheduled run as soon as this returns.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        {
            let mut subs = self.shared.location_subs.lock();
            for list in subs.values_mut() {
                list.retain(|(entry_id, _)| *entry_id != id.0);
            }
            subs.retain(|_, list| !list.is_empty());
        }
        {
            let mut subs = self.shared.key_subs.lock();
            for list in subs.values_mut() {
                list.retain(|(entry_id, _)| *entry_id != id.0);
            }
            subs.retain(|_, list| !list.is_empty());
        }
    }

    /// Debounced: a fresh notification for the same location supersedes any
    /// pending one and restarts the delay.
    pub fn notify_location_changed(&self, location: ConfigLocation) {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        self.shared
            .pending
            .lock()
            .insert(location.clone(), generation);
        if let Some(tx) = self.scheduler_tx.lock().as_ref() {
            let _ = tx.send(DueItem {
                due: Instant::now() + self.debounce,
                location,
                generation,
            });
        }
    }

    /// Undebounced: dispatched immediately, each listener on its own task.
    pub fn notify_key_changed(&self, full_key: &str, location: &ConfigLocation) {
        let listeners: Vec<UpdateListener> = {
            let subs = self.shared.key_subs.lock();
            match subs.get(full_key) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in listeners {
            let location = location.clone();
            self.shared
                .pool
                .submit(Box::new(move || listener(&location)));
        }
    }

    /// Stop the scheduler and the worker pool. Pending debounced
    /// notifications are dropped; already dispatched tasks run to completion.
    pub fn stop(&self) {
        self.scheduler_tx.lock().take();
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
        }
        self.shared.pool.shutdown();
    }
}

impl Drop for SourceChangeNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_debounce_scheduler(rx: mpsc::Receiver<DueItem>, shared: Arc<NotifierShared>) {
    let mut queue: BinaryHeap<DueItem> = BinaryHeap::new();
    loop {
        let timeout = match queue.peek() {
            Some(item) => item.due.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };
        match rx.recv_timeout(timeout) {
            Ok(item) => queue.push(item),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
        let now = Instant::now();
        while let Some(item) = queue.peek() {
            if item.due > now {
                break;
            }
            let item = queue.pop().expect("peeked");
            let current = {
                let mut pending = shared.pending.lock();
                match pending.get(&item.location) {
                    Some(generation) if *generation == item.generation => {
                        pending.remove(&item.location);
                        true
                    }
                    // Superseded by a newer notification for this location.
                    _ => false,
                }
            };
            if current {
                shared.dispatch_location(item.location);
            }
        }
    }
}

/// Detects per-entry value changes by caching last-seen values, keyed by
/// key + location string. Compared by content; a transition from "never
/// seen" to "has a value" counts as a change.
pub struct EntryChangeChecker {
    cache: Mutex<HashMap<String, EntryValue>>,
}

impl EntryChangeChecker {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_changed(
        &self,
        full_key: &str,
        location: &ConfigLocation,
        value: &EntryValue,
    ) -> bool {
        let cache_key = format!("{}@{}", full_key, location.location_string());
        let mut cache = self.cache.lock();
        match cache.get(&cache_key) {
            None => {
                cache.insert(cache_key, value.clone());
                true
            }
            Some(previous) if previous != value => {
                cache.insert(cache_key, value.clone());
                true
            }
            _ => false,
        }
    }
}

impl Default for EntryChangeChecker {
    fn default() -> Self {
        Self::new()
    }
}

struct CheckerState {
    layers: ArcSwap<Vec<Arc<dyn ConfigLayer>>>,
    storages: Arc<StorageRegistry>,
    notifier: Arc<SourceChangeNotifier>,
    entry_checker: EntryChangeChecker,
    checked_scopes: ScopeSet,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
    next_opportunistic: Mutex<Instant>,
    period: Option<Duration>,
}

impl CheckerState {
    fn check_and_notify(&self) {
        let snapshot = self.layers.load_full();
        // Most specific layer first, matching read order.
        for layer in snapshot.iter() {
            if !self.checked_scopes.contains(layer.scope()) {
                continue;
            }
            // One broken storage or layer must not kill the whole sweep.
            let outcome = catch_unwind(AssertUnwindSafe(|| self.check_layer(layer)));
            if outcome.is_err() {
                warn!("change check panicked for layer {}", layer.source());
            }
        }
    }

    fn check_layer(&self, layer: &Arc<dyn ConfigLayer>) {
        let source = layer.source();
        let Some(storage) = self.storages.get(source.storage_id()) else {
            return;
        };
        if !storage.has_changed(source) {
            return;
        }
        debug!("change detected at {}", source);

        match layer.keys() {
            Some(keys) => {
                let mut any_entry_changed = false;
                for key in keys {
                    if let Some(raw) = layer.get(&key) {
                        if self.entry_checker.has_changed(&key, source, &raw.value) {
                            any_entry_changed = true;
                            self.notifier.notify_key_changed(&key, source);
                        }
                    }
                }
                if any_entry_changed {
                    self.notifier.notify_location_changed(source.clone());
                }
            }
            None => {
                // Cannot enumerate: conservatively assume something changed.
                self.notifier.notify_location_changed(source.clone());
            }
        }
    }
}

/// The periodic background checker for one configuration.
pub struct SourceChangeChecker {
    state: Arc<CheckerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SourceChangeChecker {
    pub fn new(
        storages: Arc<StorageRegistry>,
        notifier: Arc<SourceChangeNotifier>,
        settings: &FactorySettings,
    ) -> ConfigResult<Self> {
        let frequency = settings.int_of(ConfigFeature::UpdateCheckFrequencyMs);
        let period = if frequency > 0 {
            Some(Duration::from_millis(frequency as u64))
        } else {
            None
        };

        let mut checked_scopes = ScopeSet::empty();
        for name in settings.strings_of(ConfigFeature::UpdateCheckScopes) {
            match Scope::parse(name) {
                Some(scope) => checked_scopes = checked_scopes.with(scope),
                None => {
                    // A silently different check-scope set would change
                    // behavior significantly, so this is a hard error.
                    return Err(ConfigError::feature_value(format!(
                        "invalid scope '{}' in UPDATE_CHECK_SCOPES",
                        name
                    )));
                }
            }
        }

        let state = Arc::new(CheckerState {
            layers: ArcSwap::from_pointee(Vec::new()),
            storages,
            notifier,
            entry_checker: EntryChangeChecker::new(),
            checked_scopes,
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
            next_opportunistic: Mutex::new(Instant::now()),
            period,
        });

        let thread = match period {
            Some(period) => {
                let state = state.clone();
                Some(
                    std::thread::Builder::new()
                        .name("confstack-checker".to_string())
                        .spawn(move || {
                            loop {
                                let mut stopped = state.stopped.lock();
                                if *stopped {
                                    break;
                                }
                                let wait = state.stop_signal.wait_for(&mut stopped, period);
                                let stop_now = *stopped;
                                drop(stopped);
                                if stop_now {
                                    break;
                                }
                                if wait.timed_out() {
                                    state.check_and_notify();
                                }
                            }
                        })
                        .expect("spawn change checker"),
                )
            }
            None => {
                debug!("automatic update checks are turned off");
                None
            }
        };

        Ok(Self {
            state,
            thread: Mutex::new(thread),
        })
    }

    /// Hand the checker an up-to-date snapshot of the layer list. The
    /// checker only ever reads its own immutable copy, so slow I/O-bound
    /// checks never hold a lock shared with caller threads.
    pub fn update_layers(&self, layers: Vec<Arc<dyn ConfigLayer>>) {
        self.state.layers.store(Arc::new(layers));
    }

    /// Opportunistic synchronous check from the read path: true when enough
    /// time has passed since the last sweep.
    pub fn consider_check(&self) -> bool {
        let Some(period) = self.state.period else {
            return false;
        };
        let now = Instant::now();
        let mut next = self.state.next_opportunistic.lock();
        if now < *next {
            return false;
        }
        *next = now + period;
        true
    }

    /// One full sweep over the current layer snapshot.
    pub fn check_and_notify(&self) {
        self.state.check_and_notify();
    }

    /// Stop scheduling new runs; a run in progress is not interrupted.
    pub fn stop(&self) {
        {
            let mut stopped = self.state.stopped.lock();
            *stopped = true;
        }
        self.state.stop_signal.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SourceChangeChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use std::sync::atomic::AtomicUsize;

    fn test_location(handle: &str) -> ConfigLocation {
        ConfigLocation::new(Scope::User, "files", true).with_handle(handle)
    }

    fn counting_listener() -> (UpdateListener, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let listener: UpdateListener = Arc::new(move |_loc| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (listener, counter)
    }

    #[test]
    fn test_burst_collapses_to_one_location_notification() {
        let notifier = SourceChangeNotifier::new(100); // debounce = 50ms
        let location = test_location("/burst");
        let (listener, counter) = counting_listener();
        notifier.subscribe_location(location.clone(), listener);

        for _ in 0..20 {
            notifier.notify_location_changed(location.clone());
        }
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A change after a quiet period fires again.
        notifier.notify_location_changed(location.clone());
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        notifier.stop();
    }

    #[test]
    fn test_key_notifications_are_immediate_and_separate() {
        let notifier = SourceChangeNotifier::new(2000);
        let location = test_location("/keys");
        let (listener, counter) = counting_listener();
        notifier.subscribe_key("a/b", listener);

        notifier.notify_key_changed("a/b", &location);
        notifier.notify_key_changed("a/b", &location);
        notifier.notify_key_changed("other", &location);
        std::thread::sleep(Duration::from_millis(200));
        // Two notifications for the subscribed key, none for the other.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        notifier.stop();
    }

    #[test]
    fn test_unsubscribe_scrubs_everywhere() {
        let notifier = SourceChangeNotifier::new(40);
        let location = test_location("/scrub");
        let (listener, counter) = counting_listener();
        let loc_id = notifier.subscribe_location(location.clone(), listener.clone());
        let key_id = notifier.subscribe_key("k", listener);

        notifier.unsubscribe(loc_id);
        notifier.unsubscribe(key_id);

        notifier.notify_location_changed(location.clone());
        notifier.notify_key_changed("k", &location);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        notifier.stop();
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_dispatch() {
        let notifier = SourceChangeNotifier::new(40);
        let location = test_location("/panic");
        let panicking: UpdateListener = Arc::new(|_loc| panic!("bad subscriber"));
        let (listener, counter) = counting_listener();
        notifier.subscribe_key("k", panicking);
        notifier.subscribe_key("k", listener);

        notifier.notify_key_changed("k", &location);
        notifier.notify_key_changed("k", &location);
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        notifier.stop();
    }

    #[test]
    fn test_entry_change_checker_semantics() {
        let checker = EntryChangeChecker::new();
        let location = test_location("/entries");
        let v1 = EntryValue::Text("one".into());
        let v2 = EntryValue::Text("two".into());

        // First sighting counts as a change.
        assert!(checker.has_changed("k", &location, &v1));
        assert!(!checker.has_changed("k", &location, &v1));
        assert!(checker.has_changed("k", &location, &v2));
        assert!(!checker.has_changed("k", &location, &v2));

        // Same key at a different location is tracked independently.
        let other = test_location("/other");
        assert!(checker.has_changed("k", &other, &v1));
    }

    #[test]
    fn test_byte_values_compared_by_content() {
        let checker = EntryChangeChecker::new();
        let location = test_location("/bytes");
        assert!(checker.has_changed("b", &location, &EntryValue::Bytes(vec![1, 2])));
        // Equal content in a fresh allocation is not a change.
        assert!(!checker.has_changed("b", &location, &EntryValue::Bytes(vec![1, 2])));
        assert!(checker.has_changed("b", &location, &EntryValue::Bytes(vec![1, 3])));
    }
}
