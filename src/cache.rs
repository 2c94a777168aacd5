use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::builder::CacheBuilder;
use crate::hooks::Hooks;
use crate::item::{deadline_after, effective_ttl, Item};
use crate::queue::ExpiryQueue;
use crate::stats::{Metrics, StatsCounter};

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Everything the single mutex protects.
///
/// Public operations, callback dispatch, and the expiration loop's eviction
/// phase all run under this one lock; the loop releases it only while parked
/// on the condvar.  There is no state an operation can observe mid-eviction.
pub(crate) struct State<K, V> {
    pub(crate) queue: ExpiryQueue<K, V>,
    /// Cache-wide TTL.  `ZERO` = entries without their own TTL never expire.
    pub(crate) ttl: Duration,
    pub(crate) skip_extension_on_hit: bool,
    pub(crate) hooks: Hooks<K, V>,
    /// Terminal.  Set by `close`, observed by the loop as its exit signal.
    pub(crate) closed: bool,
}

/// Shared interior of a [`Cache`].
pub(crate) struct Inner<K, V> {
    pub(crate) state: Mutex<State<K, V>>,
    /// Wake signal for the expiration loop.  Notified after every mutation
    /// that can move the earliest deadline.  Because the loop holds the state
    /// mutex except while parked, notifications are inherently coalescing.
    pub(crate) cond: Condvar,
    /// The loop's join handle.  Taken exactly once by the first `close`.
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: StatsCounter,
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A thread-safe key-value cache with per-item TTL expiration.
///
/// Entries expire at a deadline computed from their own TTL, or from the
/// cache-wide TTL when they don't carry one.  A background thread sleeps
/// until the earliest deadline and evicts whatever is due, consulting the
/// optional lifecycle callbacks as it goes.  By default a successful `get`
/// pushes an entry's deadline out again (see
/// [`skip_ttl_extension_on_hit`](Cache::skip_ttl_extension_on_hit)).
///
/// Handles are cheap to clone and share one cache.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let cache: lungo::Cache<String, String> = lungo::Cache::builder()
///     .time_to_live(Duration::from_secs(60))
///     .build();
/// cache.insert("hello".to_string(), "world".to_string());
/// assert_eq!(cache.get(&"hello".to_string()), Some(Arc::new("world".to_string())));
/// cache.close();
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// A fresh cache: no cache-wide TTL, extension-on-hit enabled, no
    /// callbacks.  Spawns the expiration thread.
    pub fn new() -> Self {
        CacheBuilder::new().build()
    }

    /// Returns a [`CacheBuilder`] for configuring a new cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_parts(
        ttl: Duration,
        skip_extension_on_hit: bool,
        hooks: Hooks<K, V>,
    ) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                queue: ExpiryQueue::new(),
                ttl,
                skip_extension_on_hit,
                hooks,
                closed: false,
            }),
            cond: Condvar::new(),
            worker: Mutex::new(None),
            stats: StatsCounter::new(),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("lungo-expiry".into())
            .spawn(move || expiry_loop(&loop_inner))
            .expect("failed to spawn expiration thread");
        *inner.worker.lock() = Some(handle);

        Cache { inner }
    }

    // -----------------------------------------------------------------------
    // Hot-path: get
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if it exists and has not expired.
    ///
    /// An entry whose deadline has passed reads as absent even before the
    /// expiration loop has evicted it.  Unless extension-on-hit is disabled,
    /// a hit restamps the entry's deadline to `now + effective TTL`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            self.inner.stats.record_miss();
            return None;
        }

        let now = Instant::now();
        let (value, item_ttl) = match state.queue.get(key) {
            Some(item) if !item.is_expired_at(now) => (Arc::clone(&item.value), item.ttl),
            // Expired but not yet evicted: the loop owns the removal.
            _ => {
                self.inner.stats.record_miss();
                return None;
            }
        };

        if !state.skip_extension_on_hit {
            let at = deadline_after(now, effective_ttl(item_ttl, state.ttl));
            state.queue.reschedule(key, at);
            self.inner.cond.notify_one();
        }

        self.inner.stats.record_hit();
        Some(value)
    }

    /// Returns the value for `key`, or computes it with `loader`, stores it,
    /// and returns it.
    ///
    /// The loader runs **outside** the cache lock.  A loader error propagates
    /// verbatim and nothing is stored.  Two racing callers may both invoke
    /// their loaders; the later store wins.
    pub fn get_or_load<F, E>(&self, key: K, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = Arc::new(loader(&key)?);
        self.insert_arc(key, Arc::clone(&value), None);
        Ok(value)
    }

    /// Expiry-aware presence check.  Does not extend the entry's TTL.
    pub fn contains(&self, key: &K) -> bool {
        let state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        match state.queue.get(key) {
            Some(item) => !item.is_expired_at(Instant::now()),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Hot-path: insert
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key` with no TTL of its own: its deadline is
    /// stamped from the cache-wide TTL, and restamped against whatever the
    /// cache-wide TTL is at each later touch.
    ///
    /// Replacing an existing key fires the remove callback with the old
    /// value; inserting a fresh key fires the new-item callback.
    pub fn insert(&self, key: K, value: V) {
        self.insert_arc(key, Arc::new(value), None);
    }

    /// Inserts `value` for `key` with its own TTL, which wins over the
    /// cache-wide TTL even when longer.  A zero `ttl` stamps no deadline at
    /// all: the entry never expires unless a later touch restamps it from
    /// the cache-wide TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.insert_arc(key, Arc::new(value), Some(ttl));
    }

    fn insert_arc(&self, key: K, value: Arc<V>, ttl: Option<Duration>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }

        let now = Instant::now();
        let (item_ttl, expires_at) = match ttl {
            None => (Duration::ZERO, deadline_after(now, state.ttl)),
            Some(d) => (d, deadline_after(now, d)),
        };

        if state.queue.contains(&key) {
            // Replacement counts as removal of the old value.
            if let Some(old) = state.queue.replace(&key, Arc::clone(&value), item_ttl, expires_at)
            {
                if let Some(cb) = &state.hooks.removed {
                    cb(&key, &old);
                }
            }
        } else {
            state
                .queue
                .push(Item::new(key.clone(), Arc::clone(&value), item_ttl, expires_at));
            if let Some(cb) = &state.hooks.new_item {
                cb(&key, &value);
            }
        }

        self.inner.cond.notify_one();
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`.  Returns `true` iff it was present.
    /// Fires the remove callback.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        match state.queue.remove(key) {
            Some(item) => {
                if let Some(cb) = &state.hooks.removed {
                    cb(&item.key, &item.value);
                }
                self.inner.cond.notify_one();
                true
            }
            None => false,
        }
    }

    /// Drops every entry at once.  Fires **no** callbacks.
    pub fn purge(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.queue.clear();
        self.inner.cond.notify_one();
    }

    // -----------------------------------------------------------------------
    // Runtime configuration
    // -----------------------------------------------------------------------

    /// Replaces the cache-wide TTL.  `Duration::ZERO` disables it.
    ///
    /// Existing entries keep their current deadlines; an entry without its
    /// own TTL is re-interpreted against the new value on its next extending
    /// touch, never retroactively.
    pub fn set_ttl(&self, ttl: Duration) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.ttl = ttl;
        self.inner.cond.notify_one();
    }

    /// When `skip` is `true`, a `get` no longer pushes the entry's deadline
    /// out.  Default: `false`.
    pub fn skip_ttl_extension_on_hit(&self, skip: bool) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.skip_extension_on_hit = skip;
    }

    // -----------------------------------------------------------------------
    // Callback slots
    // -----------------------------------------------------------------------
    //
    // Each setter replaces any previous callback in its slot; each `clear_*`
    // empties the slot.  See the `hooks` module for the invocation contract —
    // in particular, callbacks run under the cache lock and must not call
    // back into the cache.

    /// Called after an insert created a key that was absent.
    pub fn set_new_item_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.hooks.new_item = Some(Box::new(callback));
    }

    pub fn clear_new_item_callback(&self) {
        self.inner.state.lock().hooks.new_item = None;
    }

    /// Called on every removal: explicit [`remove`](Cache::remove),
    /// overwrite by insert, or expiration eviction.  Not on
    /// [`purge`](Cache::purge).
    pub fn set_remove_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.hooks.removed = Some(Box::new(callback));
    }

    pub fn clear_remove_callback(&self) {
        self.inner.state.lock().hooks.removed = None;
    }

    /// Called when the expiration loop evicts an entry, before the remove
    /// callback.
    pub fn set_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.hooks.expired = Some(Box::new(callback));
    }

    pub fn clear_expiration_callback(&self) {
        self.inner.state.lock().hooks.expired = None;
    }

    /// Called with each eviction candidate.  Returning `false` refuses the
    /// eviction: the candidate gets a fresh TTL as if just touched, and the
    /// loop moves on to the next candidate.
    pub fn set_check_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &Arc<V>) -> bool + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.hooks.check_expiration = Some(Box::new(callback));
    }

    pub fn clear_check_expiration_callback(&self) {
        self.inner.state.lock().hooks.check_expiration = None;
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Introspection & shutdown
// ---------------------------------------------------------------------------

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Number of live entries.
    pub fn entry_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> Metrics {
        self.inner.stats.snapshot()
    }
}

impl<K, V> Cache<K, V> {
    /// Shuts the cache down: marks it closed, wakes the expiration loop,
    /// and joins its thread.  Idempotent — repeated calls (from any number
    /// of handles) return immediately once the loop has been joined.
    ///
    /// After `close`, every operation is a no-op returning absent/`false`.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.closed = true;
                debug!("cache closing");
            }
            self.inner.cond.notify_one();
        }
        // Take the handle outside the state lock so the loop can finish its
        // final iteration.  Only the first closer finds it.
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        // Two remaining strong references: this handle plus the loop's own.
        // Dropping the last user handle closes the cache so the thread never
        // outlives its users.  Racing drops of clones should not rely on
        // this and call `close` explicitly.
        if Arc::strong_count(&self.inner) == 2 {
            self.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Expiration loop
// ---------------------------------------------------------------------------

/// The background task: sleep until the earliest deadline, evict what is
/// due, repeat until closed.
///
/// The whole loop body runs under the state mutex; the condvar waits are the
/// only points where it is released.  Eviction works against a single
/// reading of the clock per scan — a refused candidate is restamped strictly
/// past that instant, so a scan can never revisit it.
fn expiry_loop<K, V>(inner: &Inner<K, V>)
where
    K: Hash + Eq + Clone,
{
    trace!("expiration loop started");
    let mut state = inner.state.lock();
    loop {
        if state.closed {
            break;
        }

        let now = Instant::now();
        let mut evicted = 0u64;
        loop {
            let Some(root) = state.queue.peek() else { break };
            if !root.is_expired_at(now) {
                break;
            }
            let item_ttl = root.ttl;
            let approved = match &state.hooks.check_expiration {
                Some(check) => check(&root.key, &root.value),
                None => true,
            };

            if approved {
                if let Some(item) = state.queue.pop_root() {
                    if let Some(cb) = &state.hooks.expired {
                        cb(&item.key, &item.value);
                    }
                    if let Some(cb) = &state.hooks.removed {
                        cb(&item.key, &item.value);
                    }
                    evicted += 1;
                }
            } else {
                // Refused: fresh TTL, scan continues with the next root.
                let at = deadline_after(now, effective_ttl(item_ttl, state.ttl));
                state.queue.reschedule_root(at);
                trace!("eviction refused, candidate rescheduled");
            }
        }

        if evicted > 0 {
            inner.stats.record_expirations(evicted);
            debug!(count = evicted, "evicted expired entries");
        }
        if state.closed {
            break;
        }

        // Park.  An immortal root waits like an empty heap: nothing is due
        // until a mutation says otherwise.
        match state.queue.peek().and_then(|item| item.expires_at) {
            Some(deadline) => {
                let _ = inner.cond.wait_until(&mut state, deadline);
            }
            None => inner.cond.wait(&mut state),
        }
    }
    debug!("expiration loop terminated");
}
