//! Deadline-ordered expiration queue.
//!
//! ## Structure
//!
//! An array-backed binary min-heap of [`Item`]s ordered by `expires_at`
//! (earliest at the root, `None` deadlines after every `Some`), plus a
//! key → array-position map so any entry can be updated or removed by key in
//! O(log n).  The map is maintained by every heap swap, so it is always the
//! authoritative answer to "where does this key sit in the array" — the same
//! role a back-pointer field on each entry would play, without the shared
//! mutable ownership that layout would need.
//!
//! Holding the items, the position map, and the heap order in one structure
//! keeps the core bookkeeping invariant — an entry is indexed iff it is
//! scheduled, at the recorded position — true by construction.  The cache
//! guards the whole queue with its single mutex; nothing here locks.
//!
//! ## Removal
//!
//! `remove` swaps the victim with the tail, truncates, then sifts the
//! replacement **both** up and down from the vacated slot.  Both directions
//! must be attempted: the tail entry can order before or after the entry it
//! replaced.  One of the two sifts is always a no-op.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;

use crate::item::Item;

/// `true` if `a` expires strictly before `b`.  `None` deadlines are treated
/// as infinitely far in the future.
#[inline]
fn earlier<K, V>(a: &Item<K, V>, b: &Item<K, V>) -> bool {
    match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x < y,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Min-heap of cache items keyed by expiration deadline, with by-key access.
pub(crate) struct ExpiryQueue<K, V> {
    heap: Vec<Item<K, V>>,
    /// Key → current array position.  `slots.len() == heap.len()` always.
    slots: AHashMap<K, usize>,
}

impl<K: Hash + Eq + Clone, V> ExpiryQueue<K, V> {
    pub(crate) fn new() -> Self {
        ExpiryQueue {
            heap: Vec::new(),
            slots: AHashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// The entry for `key`, if scheduled.
    pub(crate) fn get(&self, key: &K) -> Option<&Item<K, V>> {
        self.slots.get(key).map(|&i| &self.heap[i])
    }

    /// The earliest-expiring entry, without removing it.
    pub(crate) fn peek(&self) -> Option<&Item<K, V>> {
        self.heap.first()
    }

    /// Schedules a new entry.  The key must not already be present.
    pub(crate) fn push(&mut self, item: Item<K, V>) {
        debug_assert!(!self.slots.contains_key(&item.key));
        let i = self.heap.len();
        self.slots.insert(item.key.clone(), i);
        self.heap.push(item);
        self.sift_up(i);
    }

    /// Detaches and returns the earliest-expiring entry.
    pub(crate) fn pop_root(&mut self) -> Option<Item<K, V>> {
        if self.heap.is_empty() {
            return None;
        }
        let item = self.heap.swap_remove(0);
        self.slots.remove(&item.key);
        if !self.heap.is_empty() {
            self.slots.insert(self.heap[0].key.clone(), 0);
            self.sift_down(0);
        }
        Some(item)
    }

    /// Removes the entry for `key`, restoring heap order around the hole.
    pub(crate) fn remove(&mut self, key: &K) -> Option<Item<K, V>> {
        let i = self.slots.remove(key)?;
        let item = self.heap.swap_remove(i);
        if i < self.heap.len() {
            self.slots.insert(self.heap[i].key.clone(), i);
            self.restore(i);
        }
        Some(item)
    }

    /// Restamps the deadline of the entry for `key` in place.
    ///
    /// Returns `false` if the key is not scheduled.
    pub(crate) fn reschedule(&mut self, key: &K, expires_at: Option<Instant>) -> bool {
        let Some(&i) = self.slots.get(key) else {
            return false;
        };
        self.heap[i].expires_at = expires_at;
        self.restore(i);
        true
    }

    /// Restamps the root's deadline.  Used when an eviction candidate is
    /// refused and granted a fresh TTL instead.
    pub(crate) fn reschedule_root(&mut self, expires_at: Option<Instant>) {
        if let Some(root) = self.heap.first_mut() {
            root.expires_at = expires_at;
            self.sift_down(0);
        }
    }

    /// Overwrites the value, ttl, and deadline of the entry for `key`.
    ///
    /// Returns the previous value so the caller can hand it to the removal
    /// callback.
    pub(crate) fn replace(
        &mut self,
        key: &K,
        value: Arc<V>,
        ttl: Duration,
        expires_at: Option<Instant>,
    ) -> Option<Arc<V>> {
        let &i = self.slots.get(key)?;
        let entry = &mut self.heap[i];
        let old = std::mem::replace(&mut entry.value, value);
        entry.ttl = ttl;
        entry.expires_at = expires_at;
        self.restore(i);
        Some(old)
    }

    /// Drops every entry at once.  No per-entry work, no callbacks.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
    }

    // -----------------------------------------------------------------------
    // Heap maintenance
    // -----------------------------------------------------------------------

    /// Restores heap order after the entry at `i` changed arbitrarily.
    fn restore(&mut self, i: usize) {
        let i = self.sift_up(i);
        self.sift_down(i);
    }

    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let parent = (i - 1) / 2;
            if earlier(&self.heap[i], &self.heap[parent]) {
                self.swap_nodes(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        i
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let child = if right < self.heap.len() && earlier(&self.heap[right], &self.heap[left])
            {
                right
            } else {
                left
            };
            if earlier(&self.heap[child], &self.heap[i]) {
                self.swap_nodes(i, child);
                i = child;
            } else {
                break;
            }
        }
    }

    fn swap_nodes(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].key.clone(), a);
        self.slots.insert(self.heap[b].key.clone(), b);
    }

    /// Checks every structural invariant.  Test-only.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert_eq!(self.heap.len(), self.slots.len(), "index/heap size mismatch");
        for (i, item) in self.heap.iter().enumerate() {
            assert_eq!(
                self.slots.get(&item.key),
                Some(&i),
                "slot map points to the wrong position"
            );
            if i > 0 {
                let parent = &self.heap[(i - 1) / 2];
                assert!(!earlier(item, parent), "heap order violated at {i}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, offset_ms: Option<u64>) -> Item<String, u32> {
        let expires_at = offset_ms.map(|ms| base() + Duration::from_millis(ms));
        Item::new(key.to_string(), Arc::new(0), Duration::ZERO, expires_at)
    }

    /// A fixed reference instant so deadlines are comparable across calls.
    fn base() -> Instant {
        use std::sync::OnceLock;
        static BASE: OnceLock<Instant> = OnceLock::new();
        *BASE.get_or_init(Instant::now)
    }

    fn queue(entries: &[(&str, Option<u64>)]) -> ExpiryQueue<String, u32> {
        let mut q = ExpiryQueue::new();
        for &(key, offset) in entries {
            q.push(item(key, offset));
        }
        q.assert_invariants();
        q
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut q = queue(&[("c", Some(30)), ("a", Some(10)), ("b", Some(20))]);
        let order: Vec<String> = std::iter::from_fn(|| q.pop_root().map(|i| i.key)).collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn immortal_entries_sort_last() {
        let mut q = queue(&[("never", None), ("soon", Some(5)), ("later", Some(500))]);
        assert_eq!(q.peek().map(|i| i.key.as_str()), Some("soon"));
        q.pop_root();
        q.pop_root();
        assert_eq!(q.pop_root().map(|i| i.key), Some("never".to_string()));
    }

    #[test]
    fn remove_from_the_middle_keeps_order() {
        let mut q = queue(&[
            ("a", Some(10)),
            ("b", Some(20)),
            ("c", Some(30)),
            ("d", Some(40)),
            ("e", Some(50)),
        ]);
        assert!(q.remove(&"c".to_string()).is_some());
        q.assert_invariants();
        assert!(q.remove(&"c".to_string()).is_none(), "second remove misses");

        let order: Vec<String> = std::iter::from_fn(|| q.pop_root().map(|i| i.key)).collect();
        assert_eq!(order, ["a", "b", "d", "e"]);
    }

    #[test]
    fn reschedule_moves_entry_both_directions() {
        let mut q = queue(&[("a", Some(10)), ("b", Some(20)), ("c", Some(30))]);

        // Push "a" past everything.
        assert!(q.reschedule(&"a".to_string(), Some(base() + Duration::from_millis(100))));
        q.assert_invariants();
        assert_eq!(q.peek().map(|i| i.key.as_str()), Some("b"));

        // Pull "c" in front of everything.
        assert!(q.reschedule(&"c".to_string(), Some(base() + Duration::from_millis(1))));
        q.assert_invariants();
        assert_eq!(q.peek().map(|i| i.key.as_str()), Some("c"));

        assert!(!q.reschedule(&"missing".to_string(), None));
    }

    #[test]
    fn reschedule_root_sinks_refused_candidate() {
        let mut q = queue(&[("a", Some(10)), ("b", Some(20))]);
        q.reschedule_root(Some(base() + Duration::from_millis(100)));
        q.assert_invariants();
        assert_eq!(q.peek().map(|i| i.key.as_str()), Some("b"));
    }

    #[test]
    fn replace_swaps_value_and_returns_old() {
        let mut q = ExpiryQueue::new();
        q.push(Item::new(
            "k".to_string(),
            Arc::new(1u32),
            Duration::ZERO,
            Some(base() + Duration::from_millis(10)),
        ));
        let old = q.replace(
            &"k".to_string(),
            Arc::new(2),
            Duration::from_millis(5),
            Some(base() + Duration::from_millis(50)),
        );
        assert_eq!(old.as_deref(), Some(&1));
        assert_eq!(q.len(), 1);
        q.assert_invariants();
        let entry = q.get(&"k".to_string()).unwrap();
        assert_eq!(*entry.value, 2);
        assert_eq!(entry.ttl, Duration::from_millis(5));
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut q: ExpiryQueue<String, u32> = ExpiryQueue::new();
        assert!(q.pop_root().is_none());
        assert!(q.peek().is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = queue(&[("a", Some(10)), ("b", None)]);
        q.clear();
        assert!(q.is_empty());
        assert!(!q.contains(&"a".to_string()));
        q.assert_invariants();
    }

    // -----------------------------------------------------------------------
    // Randomized invariant check
    // -----------------------------------------------------------------------

    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Push { key: String, offset_ms: Option<u64> },
        Remove { key: String },
        Reschedule { key: String, offset_ms: Option<u64> },
        PopRoot,
    }

    /// Keys are drawn from a small alphabet so operations collide often.
    fn key_strategy() -> impl Strategy<Value = String> {
        "[a-f]".prop_map(|s| s)
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (key_strategy(), proptest::option::of(0u64..1_000))
                .prop_map(|(key, offset_ms)| Op::Push { key, offset_ms }),
            key_strategy().prop_map(|key| Op::Remove { key }),
            (key_strategy(), proptest::option::of(0u64..1_000))
                .prop_map(|(key, offset_ms)| Op::Reschedule { key, offset_ms }),
            Just(Op::PopRoot),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Every structural invariant survives any operation sequence, and a
        /// final drain comes out in non-decreasing deadline order.
        #[test]
        fn invariants_hold_under_random_ops(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut q: ExpiryQueue<String, u32> = ExpiryQueue::new();
            for op in ops {
                match op {
                    Op::Push { key, offset_ms } => {
                        if !q.contains(&key) {
                            q.push(item(&key, offset_ms));
                        }
                    }
                    Op::Remove { key } => {
                        let was_there = q.contains(&key);
                        prop_assert_eq!(q.remove(&key).is_some(), was_there);
                    }
                    Op::Reschedule { key, offset_ms } => {
                        let deadline = offset_ms.map(|ms| base() + Duration::from_millis(ms));
                        let was_there = q.contains(&key);
                        prop_assert_eq!(q.reschedule(&key, deadline), was_there);
                    }
                    Op::PopRoot => {
                        let len = q.len();
                        prop_assert_eq!(q.pop_root().is_some(), len > 0);
                    }
                }
                q.assert_invariants();
            }

            let mut previous: Option<Option<Instant>> = None;
            while let Some(entry) = q.pop_root() {
                if let Some(prev) = previous {
                    // None sorts last, so once a None is seen nothing with a
                    // deadline may follow.
                    match (prev, entry.expires_at) {
                        (Some(p), Some(c)) => prop_assert!(p <= c),
                        (None, Some(_)) => prop_assert!(false, "deadline after immortal"),
                        _ => {}
                    }
                }
                previous = Some(entry.expires_at);
            }
        }
    }
}
