use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::hooks::Hooks;

/// Builder for configuring and constructing a [`Cache`].
///
/// Everything here can also be changed after construction through the
/// corresponding `Cache` setters; the builder just fixes the starting
/// configuration.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use lungo::CacheBuilder;
///
/// let cache: lungo::Cache<String, String> = CacheBuilder::new()
///     .time_to_live(Duration::from_secs(60))
///     .build();
/// cache.close();
/// ```
pub struct CacheBuilder<K, V> {
    ttl: Duration,
    skip_extension_on_hit: bool,
    hooks: Hooks<K, V>,
}

impl<K, V> CacheBuilder<K, V> {
    /// Default configuration: no cache-wide TTL, extension-on-hit enabled,
    /// no callbacks.
    pub fn new() -> Self {
        CacheBuilder {
            ttl: Duration::ZERO,
            skip_extension_on_hit: false,
            hooks: Hooks::none(),
        }
    }

    /// Sets the cache-wide TTL.  Entries inserted without a TTL of their own
    /// expire this long after their last stamp.  `Duration::ZERO` (the
    /// default) means such entries never expire.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Disables the default behavior of pushing an entry's deadline out on
    /// every successful `get`.
    pub fn skip_ttl_extension_on_hit(mut self, skip: bool) -> Self {
        self.skip_extension_on_hit = skip;
        self
    }

    /// Registers the new-item callback, fired when an insert creates a key
    /// that was absent.
    ///
    /// The callback runs with the cache lock held and must not call cache
    /// methods — see the [`Cache`] callback setters for the full contract.
    ///
    /// # Example
    /// ```
    /// use lungo::CacheBuilder;
    ///
    /// let cache: lungo::Cache<String, u64> = CacheBuilder::new()
    ///     .new_item_callback(|key: &String, _value| {
    ///         println!("inserted {key}");
    ///     })
    ///     .build();
    /// cache.close();
    /// ```
    pub fn new_item_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        self.hooks.new_item = Some(Box::new(f));
        self
    }

    /// Registers the remove callback, fired on explicit removal, overwrite,
    /// and expiration eviction (never on purge).
    pub fn remove_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        self.hooks.removed = Some(Box::new(f));
        self
    }

    /// Registers the expiration callback, fired when the expiration loop
    /// evicts an entry.
    pub fn expiration_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &Arc<V>) + Send + Sync + 'static,
    {
        self.hooks.expired = Some(Box::new(f));
        self
    }

    /// Registers the check-expiration callback.  Returning `false` refuses
    /// an eviction and grants the candidate a fresh TTL.
    pub fn check_expiration_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &Arc<V>) -> bool + Send + Sync + 'static,
    {
        self.hooks.check_expiration = Some(Box::new(f));
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds the cache and spawns its expiration thread.
    pub fn build(self) -> Cache<K, V> {
        Cache::from_parts(self.ttl, self.skip_extension_on_hit, self.hooks)
    }
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
