use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single cached entry.
///
/// `expires_at = None` means the entry never expires.  `ttl = Duration::ZERO`
/// means the entry carries no TTL of its own and falls back to the cache-wide
/// TTL whenever its deadline is restamped.
pub(crate) struct Item<K, V> {
    pub(crate) key: K,
    pub(crate) value: Arc<V>,
    /// Per-entry TTL.  `ZERO` = inherit the cache-wide TTL at touch time.
    pub(crate) ttl: Duration,
    /// Absolute expiration deadline.  `None` = immortal.
    pub(crate) expires_at: Option<Instant>,
}

impl<K, V> Item<K, V> {
    pub(crate) fn new(key: K, value: Arc<V>, ttl: Duration, expires_at: Option<Instant>) -> Self {
        Item {
            key,
            value,
            ttl,
            expires_at,
        }
    }

    /// Whether the deadline has passed as of `now`.
    ///
    /// The boundary is inclusive: an item whose deadline equals `now` is
    /// already expired.
    #[inline]
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Per-entry TTL if non-zero, else the cache-wide TTL.  A zero result means
/// no expiration.
#[inline]
pub(crate) fn effective_ttl(item_ttl: Duration, global_ttl: Duration) -> Duration {
    if item_ttl > Duration::ZERO {
        item_ttl
    } else {
        global_ttl
    }
}

/// Converts an effective TTL into an absolute deadline; zero maps to "never".
#[inline]
pub(crate) fn deadline_after(now: Instant, ttl: Duration) -> Option<Instant> {
    if ttl > Duration::ZERO {
        Some(now + ttl)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(ttl: Duration, expires_at: Option<Instant>) -> Item<&'static str, &'static str> {
        Item::new("k", Arc::new("v"), ttl, expires_at)
    }

    #[test]
    fn immortal_item_never_expires() {
        let it = item(Duration::ZERO, None);
        assert!(!it.is_expired_at(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Instant::now();
        let it = item(Duration::from_millis(50), Some(now));
        assert!(it.is_expired_at(now), "deadline == now counts as expired");
        assert!(!item(Duration::ZERO, Some(now + Duration::from_millis(1))).is_expired_at(now));
    }

    #[test]
    fn per_entry_ttl_wins_over_global() {
        let per_entry = Duration::from_millis(100);
        let global = Duration::from_millis(50);
        assert_eq!(effective_ttl(per_entry, global), per_entry);
        assert_eq!(effective_ttl(Duration::ZERO, global), global);
        assert_eq!(effective_ttl(Duration::ZERO, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn zero_ttl_has_no_deadline() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::ZERO), None);
        assert_eq!(
            deadline_after(now, Duration::from_secs(1)),
            Some(now + Duration::from_secs(1))
        );
    }
}
