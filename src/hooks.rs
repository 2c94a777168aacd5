//! Lifecycle callbacks — four independent slots invoked as entries move
//! through the cache.
//!
//! | Slot | Fires when | Signature |
//! |---|---|---|
//! | `new_item` | an insert created a key that was absent | `(key, value)` |
//! | `removed` | any removal: explicit remove, overwrite by insert, or expiration (never purge) | `(key, value-being-removed)` |
//! | `expired` | the expiration loop evicted an entry, after `check_expiration` approved | `(key, value)` |
//! | `check_expiration` | the loop is about to evict a candidate | `(key, value) → bool` — `true` evicts, `false` grants a fresh TTL and moves on |
//!
//! An expiration fires `expired` first, then `removed`.
//!
//! Callbacks run **with the cache lock held**.  They must not call any
//! method on the same cache (that deadlocks) and must not capture a handle
//! to it.  Reading external state, signalling channels, or bumping counters
//! is fine.  The `&Arc<V>` argument may be cloned to retain a snapshot of
//! the value beyond the callback's return.

use std::sync::Arc;

/// A `(key, value)` observer slot.
pub(crate) type ItemFn<K, V> = Box<dyn Fn(&K, &Arc<V>) + Send + Sync + 'static>;

/// The eviction veto slot: `true` approves eviction, `false` refuses it.
pub(crate) type CheckFn<K, V> = Box<dyn Fn(&K, &Arc<V>) -> bool + Send + Sync + 'static>;

/// The four optional callback slots.  Each may be set, replaced, or cleared
/// independently at any time; all mutation happens under the cache lock.
pub(crate) struct Hooks<K, V> {
    pub(crate) new_item: Option<ItemFn<K, V>>,
    pub(crate) removed: Option<ItemFn<K, V>>,
    pub(crate) expired: Option<ItemFn<K, V>>,
    pub(crate) check_expiration: Option<CheckFn<K, V>>,
}

impl<K, V> Hooks<K, V> {
    pub(crate) fn none() -> Self {
        Hooks {
            new_item: None,
            removed: None,
            expired: None,
            check_expiration: None,
        }
    }
}
