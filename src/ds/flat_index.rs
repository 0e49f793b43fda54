//! Fixed-capacity open-addressed map from keys to 32-bit slot indices.
//!
//! Backs the key lookup path of both cache variants. The lookup path never
//! allocates and never chases pointers; after construction the bucket array
//! is never resized or rehashed.
//!
//! ## Architecture
//!
//! ```text
//!   table: Vec<Bucket<K>>   (len = next_pow2(max_entries * 2), mask = len - 1)
//!
//!   index: 0        1        2        3        4        5        6        7
//!          [E]      [O k->5] [D]      [O k->2] [E]      [E]      [O k->9] [E]
//!
//!   E = Empty (never used)    O = Occupied    D = Deleted (tombstone)
//!
//!   probe: start = hash(key) & mask, step +1, stop at first Empty
//! ```
//!
//! ## Operations
//! - `find(key)`: linear probe; first Empty bucket terminates the search
//! - `insert(key, value)`: update in place on match, else fill the first
//!   tombstone seen on the chain, else the terminating Empty bucket
//! - `erase(key)`: mark the bucket Deleted so later probes keep walking
//!
//! ## Capacity model
//!
//! Logical capacity is `max_entries`; the bucket array is twice that
//! (rounded up to a power of two) to keep the load factor at or below 0.5
//! and probe chains short. `insert` refuses new keys once `len` reaches
//! `max_entries`, even though physical buckets remain: the table reports
//! "full" instead of growing. Tombstones are never swept.

use std::hash::{BuildHasher, Hash};

use rustc_hash::FxBuildHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketState {
    Empty,
    Occupied,
    Deleted,
}

#[derive(Debug)]
struct Bucket<K> {
    key: K,
    value: u32,
    state: BucketState,
}

/// Flat hash table mapping `K` to a `u32` slot index.
///
/// Keys must be default-constructible because every bucket materialises a
/// key for the lifetime of the table. Hashing is pluggable via `S`; the
/// default is the same `FxBuildHasher` the rest of the crate routes with.
///
/// # Example
///
/// ```
/// use tokenkv::ds::FlatIndexMap;
///
/// let mut index: FlatIndexMap<u64> = FlatIndexMap::new(4);
/// assert!(index.insert(17, 0));
/// assert_eq!(index.find(&17), Some(0));
///
/// // Update in place
/// assert!(index.insert(17, 3));
/// assert_eq!(index.find(&17), Some(3));
///
/// assert!(index.erase(&17));
/// assert_eq!(index.find(&17), None);
/// ```
#[derive(Debug)]
pub struct FlatIndexMap<K, S = FxBuildHasher> {
    table: Vec<Bucket<K>>,
    mask: usize,
    max_entries: usize,
    len: usize,
    tombstones: usize,
    hasher: S,
}

impl<K, S> FlatIndexMap<K, S>
where
    K: Eq + Hash + Default,
    S: BuildHasher,
{
    /// Creates a table holding at most `max_entries` keys.
    ///
    /// Zero is normalised to 1. All storage is allocated here.
    pub fn new(max_entries: usize) -> Self
    where
        S: Default,
    {
        Self::with_hasher(max_entries, S::default())
    }

    /// Creates a table with an explicit hasher.
    pub fn with_hasher(max_entries: usize, hasher: S) -> Self {
        let mut map = Self {
            table: Vec::new(),
            mask: 0,
            max_entries: 0,
            len: 0,
            tombstones: 0,
            hasher,
        };
        map.reset(max_entries);
        map
    }

    /// Discards all entries and re-allocates for a new logical capacity.
    ///
    /// Idempotent replacement of prior state; zero is normalised to 1.
    pub fn reset(&mut self, max_entries: usize) {
        let max_entries = max_entries.max(1);
        let buckets = (max_entries * 2).next_power_of_two();
        self.table.clear();
        self.table.reserve_exact(buckets);
        for _ in 0..buckets {
            self.table.push(Bucket {
                key: K::default(),
                value: 0,
                state: BucketState::Empty,
            });
        }
        self.mask = buckets - 1;
        self.max_entries = max_entries;
        self.len = 0;
        self.tombstones = 0;
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the table holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the logical capacity.
    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the number of buckets currently tombstoned.
    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Looks up the slot index for `key`.
    ///
    /// Probes linearly from `hash(key) & mask`; the first Empty bucket (or a
    /// full traversal) ends the search.
    pub fn find(&self, key: &K) -> Option<u32> {
        let mut idx = self.probe_start(key);
        for _ in 0..self.table.len() {
            let bucket = &self.table[idx];
            match bucket.state {
                BucketState::Empty => return None,
                BucketState::Occupied if bucket.key == *key => return Some(bucket.value),
                _ => {},
            }
            idx = self.next_index(idx);
        }
        None
    }

    /// Inserts a new key or updates an existing one.
    ///
    /// Returns `false` when the key is new and the table is at logical
    /// capacity, or when a full traversal finds no usable bucket. An
    /// existing key's value is always updated in place, even at capacity.
    pub fn insert(&mut self, key: K, value: u32) -> bool {
        let mut idx = self.probe_start(&key);
        let mut first_deleted = None;

        for _ in 0..self.table.len() {
            match self.table[idx].state {
                BucketState::Empty => {
                    return self.insert_at(first_deleted.unwrap_or(idx), key, value);
                },
                BucketState::Deleted => {
                    if first_deleted.is_none() {
                        first_deleted = Some(idx);
                    }
                },
                BucketState::Occupied => {
                    if self.table[idx].key == key {
                        self.table[idx].value = value;
                        return true;
                    }
                },
            }
            idx = self.next_index(idx);
        }

        match first_deleted {
            Some(idx) => self.insert_at(idx, key, value),
            None => false,
        }
    }

    /// Removes `key`, leaving a tombstone to keep probe chains intact.
    ///
    /// Returns `false` if the key is absent.
    pub fn erase(&mut self, key: &K) -> bool {
        let mut idx = self.probe_start(key);
        for _ in 0..self.table.len() {
            let bucket = &mut self.table[idx];
            match bucket.state {
                BucketState::Empty => return false,
                BucketState::Occupied if bucket.key == *key => {
                    bucket.state = BucketState::Deleted;
                    self.len -= 1;
                    self.tombstones += 1;
                    return true;
                },
                _ => {},
            }
            idx = self.next_index(idx);
        }
        false
    }

    #[inline]
    fn probe_start(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        (idx + 1) & self.mask
    }

    fn insert_at(&mut self, idx: usize, key: K, value: u32) -> bool {
        if self.table[idx].state == BucketState::Occupied {
            self.table[idx].value = value;
            return true;
        }
        // Logical capacity bound, independent of physical bucket count.
        if self.len >= self.max_entries {
            return false;
        }
        if self.table[idx].state == BucketState::Deleted {
            self.tombstones -= 1;
        }
        let bucket = &mut self.table[idx];
        bucket.key = key;
        bucket.value = value;
        bucket.state = BucketState::Occupied;
        self.len += 1;
        true
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        assert!(self.table.len().is_power_of_two());
        assert_eq!(self.mask, self.table.len() - 1);
        assert!(self.table.len() >= self.max_entries * 2);
        assert!(self.len <= self.max_entries);

        let occupied = self
            .table
            .iter()
            .filter(|b| b.state == BucketState::Occupied)
            .count();
        let deleted = self
            .table
            .iter()
            .filter(|b| b.state == BucketState::Deleted)
            .count();
        assert_eq!(occupied, self.len);
        assert_eq!(deleted, self.tombstones);
    }
}
