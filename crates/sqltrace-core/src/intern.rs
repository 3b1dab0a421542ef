//! String interning and identifier allocation.
//!
//! The interner deduplicates identifier strings across every analysis that
//! shares it: equal canonical inputs return pointer-equal `Arc<str>` handles,
//! so name comparison inside the graph is a pointer comparison in the common
//! case. The map is sharded so concurrent analyses contend only on the shard
//! owning the hashed key.

use crate::graph::{EdgeId, NodeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Returns the next power of two at or above `4 * cpu_count`.
///
/// Shared by the interner shards and the [`crate::batch::LockManager`]
/// partitions.
pub(crate) fn partition_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (4 * cpus).next_power_of_two()
}

/// A thread-safe, sharded string interner.
///
/// `intern(s)` returns a canonical handle that is pointer-equal for equal
/// inputs. Insertion is O(1) amortized; lookups take a shard read lock.
pub struct StringInterner {
    shards: Vec<RwLock<HashSet<Arc<str>>>>,
    mask: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::with_shards(partition_count())
    }

    /// Creates an interner with an explicit shard count (rounded up to a
    /// power of two).
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashSet::new())).collect(),
            mask: count - 1,
        }
    }

    /// Interns a string, returning the canonical shared handle.
    pub fn intern(&self, s: &str) -> Arc<str> {
        let shard = &self.shards[self.shard_for(s)];

        if let Ok(guard) = shard.read() {
            if let Some(existing) = guard.get(s) {
                return existing.clone();
            }
        }

        let mut guard = shard.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = guard.get(s) {
            return existing.clone();
        }
        let handle: Arc<str> = Arc::from(s);
        guard.insert(handle.clone());
        handle
    }

    /// Number of distinct strings currently interned.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().map(|g| g.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_for(&self, s: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringInterner")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

/// Allocates monotonically increasing node and edge IDs.
///
/// IDs are stable within a single analysis run. Tests construct allocators
/// from a fixed start so the minted sequence is reproducible.
#[derive(Debug)]
pub struct IdAllocator {
    next_node: AtomicU64,
    next_edge: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1, 1)
    }

    /// Creates an allocator with deterministic starting values.
    pub fn starting_at(node_start: u64, edge_start: u64) -> Self {
        Self {
            next_node: AtomicU64::new(node_start),
            next_edge: AtomicU64::new(edge_start),
        }
    }

    pub fn mint_node_id(&self) -> NodeId {
        NodeId(self.next_node.fetch_add(1, Ordering::Relaxed))
    }

    pub fn mint_edge_id(&self) -> EdgeId {
        EdgeId(self.next_edge.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic digest over identifier components.
///
/// Used for content-addressed lookups where the same logical node must not
/// be created twice from two code paths. Callers fall back to a fresh
/// sequential ID when the digest collides with a different logical key.
pub fn hash_id<'a>(components: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for component in components {
        component.hash(&mut hasher);
        // Separator guards against ("ab","c") colliding with ("a","bc").
        0xffu8.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_identity() {
        let interner = StringInterner::new();
        let a = interner.intern("orders");
        let b = interner.intern("orders");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_intern_distinct() {
        let interner = StringInterner::new();
        let a = interner.intern("orders");
        let b = interner.intern("customers");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_intern_concurrent() {
        let interner = Arc::new(StringInterner::with_shards(4));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let interner = interner.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        interner.intern(&format!("name_{}", (i + j) % 16));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(interner.len(), 16);
    }

    #[test]
    fn test_id_allocator_monotonic() {
        let ids = IdAllocator::new();
        let a = ids.mint_node_id();
        let b = ids.mint_node_id();
        assert!(b.0 > a.0);

        let deterministic = IdAllocator::starting_at(100, 200);
        assert_eq!(deterministic.mint_node_id().0, 100);
        assert_eq!(deterministic.mint_edge_id().0, 200);
    }

    #[test]
    fn test_hash_id_deterministic() {
        let a = hash_id(["dbo", "orders", "total"]);
        let b = hash_id(["dbo", "orders", "total"]);
        assert_eq!(a, b);
        assert_ne!(a, hash_id(["dbo", "orders", "amount"]));
        assert_ne!(hash_id(["ab", "c"]), hash_id(["a", "bc"]));
    }

    #[test]
    fn test_partition_count_power_of_two() {
        let count = partition_count();
        assert!(count.is_power_of_two());
        assert!(count >= 4);
    }
}
