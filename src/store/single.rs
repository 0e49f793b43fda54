//! Single-threaded token cache over flat slot storage.
//!
//! ## Architecture
//!
//! ```text
//!   key ──▶ FlatIndexMap ──▶ position ──▶ slots[position] ──▶ value
//!                                              │
//!                        Token ◀── pack(tag, generation, position)
//! ```
//!
//! - `slots` is a contiguous array sized once at construction.
//! - `FlatIndexMap` resolves keys to positions without allocating.
//! - Every `get`/`erase` validates the token's tag and generation against
//!   the slot before touching the value, so stale handles fail closed.
//!
//! ## Core Operations
//! - `insert`: allocate a position, populate the slot, index the key.
//!   Idempotent for an existing key (returns its current handle).
//! - `insert_or_assign`: like `insert`, but overwrites value and tag in
//!   place on a key match. The generation is untouched, so handles issued
//!   with the old tag stop validating while `find_handle` hands out fresh
//!   ones.
//! - `get` / `get_mut`: validated borrow into the slot array.
//! - `erase`: unindex the key, mark the slot free, advance its generation,
//!   return the position to the free list.
//!
//! ## Example Usage
//!
//! ```
//! use tokenkv::store::single::TokenCache;
//!
//! let mut cache: TokenCache<u64, String> = TokenCache::new(8);
//!
//! let token = cache.insert(1, 42, "answer".to_string());
//! assert!(!token.is_null());
//! assert_eq!(cache.get(token), Some(&"answer".to_string()));
//!
//! assert!(cache.erase(token));
//! assert_eq!(cache.get(token), None);
//! assert!(cache.is_empty());
//! ```
//!
//! ## Thread Safety
//!
//! Not thread-safe; a single owner performs all operations. The sharded
//! variant in [`crate::store::sharded`] covers concurrent workloads.

use std::cell::Cell;
use std::hash::{BuildHasher, Hash};

use rustc_hash::FxBuildHasher;

use crate::ds::{FlatIndexMap, FreeList, Slot};
use crate::error::InvariantError;
use crate::store::traits::{StoreMetrics, TokenStore, TokenStoreMut};
use crate::token::Token;

/// Operation counters for the single-threaded cache.
#[derive(Debug, Default)]
struct StoreCounters {
    hits: Cell<u64>,
    misses: Cell<u64>,
    inserts: Cell<u64>,
    updates: Cell<u64>,
    removes: Cell<u64>,
}

impl StoreCounters {
    fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            hits: self.hits.get(),
            misses: self.misses.get(),
            inserts: self.inserts.get(),
            updates: self.updates.get(),
            removes: self.removes.get(),
        }
    }

    fn inc_hit(&self) {
        self.hits.set(self.hits.get() + 1);
    }

    fn inc_miss(&self) {
        self.misses.set(self.misses.get() + 1);
    }

    fn inc_insert(&self) {
        self.inserts.set(self.inserts.get() + 1);
    }

    fn inc_update(&self) {
        self.updates.set(self.updates.get() + 1);
    }

    fn inc_remove(&self) {
        self.removes.set(self.removes.get() + 1);
    }
}

/// Fixed-capacity cache addressed by key or by validated [`Token`].
///
/// All storage is allocated at construction; no operation grows it. A full
/// cache refuses new keys by returning [`Token::NULL`] from `insert`.
#[derive(Debug)]
pub struct TokenCache<K, V, S = FxBuildHasher> {
    slots: Vec<Slot<K, V>>,
    free: FreeList,
    index: FlatIndexMap<K, S>,
    len: usize,
    counters: StoreCounters,
}

impl<K, V, S> TokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone,
    V: Default,
    S: BuildHasher,
{
    /// Creates a cache holding at most `capacity_hint` entries.
    ///
    /// Zero is normalised to 1. Slot array, free list, and key index are
    /// all sized here, once.
    pub fn new(capacity_hint: usize) -> Self
    where
        S: Default,
    {
        let mut cache = Self {
            slots: Vec::new(),
            free: FreeList::new(0),
            index: FlatIndexMap::new(0),
            len: 0,
            counters: StoreCounters::default(),
        };
        cache.reserve(capacity_hint);
        cache
    }

    /// Drops every entry and re-allocates fixed storage for `capacity`.
    ///
    /// Zero is normalised to 1. Operation counters keep running.
    pub fn reserve(&mut self, capacity: usize) {
        let capacity = capacity.max(1).min(u32::MAX as usize);
        self.slots.clear();
        self.slots.reserve_exact(capacity);
        for _ in 0..capacity {
            self.slots.push(Slot::default());
        }
        self.free.reset(capacity);
        self.index.reset(capacity);
        self.len = 0;
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the cache holds no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the fixed entry capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts a new entry, returning its handle.
    ///
    /// If the key already exists, the existing handle is returned and the
    /// stored value is left untouched. Returns [`Token::NULL`] when no
    /// position is free.
    pub fn insert(&mut self, tag: u8, key: K, value: V) -> Token {
        if let Some(position) = self.index.find(&key) {
            return self.build_handle(position);
        }

        let Some(position) = self.free.allocate() else {
            return Token::NULL;
        };

        let index_key = key.clone();
        let slot = &mut self.slots[position as usize];
        slot.key = key;
        slot.value = value;
        slot.tag = tag;
        slot.occupied = true;
        if !self.index.insert(index_key, position) {
            self.slots[position as usize].occupied = false;
            self.free.release(position);
            return Token::NULL;
        }
        self.len += 1;
        self.counters.inc_insert();
        self.build_handle(position)
    }

    /// Inserts or overwrites, returning the entry's handle.
    ///
    /// On a key match the value and tag are replaced in place; position and
    /// generation are preserved, so the returned handle differs from older
    /// ones only in its tag bits.
    pub fn insert_or_assign(&mut self, tag: u8, key: K, value: V) -> Token {
        if let Some(position) = self.index.find(&key) {
            let slot = &mut self.slots[position as usize];
            slot.value = value;
            slot.tag = tag;
            self.counters.inc_update();
            return self.build_handle(position);
        }
        self.insert(tag, key, value)
    }

    /// Returns the value addressed by `token`, if the token is current.
    pub fn get(&self, token: Token) -> Option<&V> {
        match self.validate(token) {
            Some(position) => {
                self.counters.inc_hit();
                Some(&self.slots[position as usize].value)
            },
            None => {
                self.counters.inc_miss();
                None
            },
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, token: Token) -> Option<&mut V> {
        match self.validate(token) {
            Some(position) => {
                self.counters.inc_hit();
                Some(&mut self.slots[position as usize].value)
            },
            None => {
                self.counters.inc_miss();
                None
            },
        }
    }

    /// Erases the entry addressed by `token`.
    ///
    /// Advances the slot generation so every previously issued handle for
    /// this position stops validating (until the ~16.7M-cycle generation
    /// wrap). Returns `false` for invalid tokens.
    pub fn erase(&mut self, token: Token) -> bool {
        let Some(position) = self.validate(token) else {
            return false;
        };

        if !self.index.erase(&self.slots[position as usize].key) {
            return false;
        }
        let slot = &mut self.slots[position as usize];
        slot.occupied = false;
        slot.tag = 0;
        slot.generation = Token::next_generation(slot.generation);
        self.free.release(position);
        self.len -= 1;
        self.counters.inc_remove();
        true
    }

    /// Returns the current handle for `key`, or [`Token::NULL`] if absent.
    pub fn find_handle(&self, key: &K) -> Token {
        match self.index.find(key) {
            Some(position) => self.build_handle(position),
            None => Token::NULL,
        }
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> StoreMetrics {
        self.counters.snapshot()
    }

    fn build_handle(&self, position: u32) -> Token {
        let slot = &self.slots[position as usize];
        Token::pack(slot.tag, slot.generation, position)
    }

    // Validation order: position range, occupancy, tag, generation. Any
    // mismatch reads nothing.
    fn validate(&self, token: Token) -> Option<u32> {
        if token.is_null() {
            return None;
        }
        let position = token.position();
        let slot = self.slots.get(position as usize)?;
        if !slot.occupied || slot.tag != token.tag() || slot.generation != token.generation() {
            return None;
        }
        Some(position)
    }

    /// Verifies the slot/free-list/index partition invariants.
    ///
    /// Intended for tests and debugging; walks the full slot array.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let capacity = self.slots.len();
        let next_unused = self.free.next_unused() as usize;

        let mut live = 0usize;
        for (position, slot) in self.slots.iter().enumerate() {
            if slot.generation < 1 || slot.generation > Token::MAX_GENERATION {
                return Err(InvariantError::new(format!(
                    "slot {position} generation {} out of range",
                    slot.generation
                )));
            }
            if !slot.occupied {
                continue;
            }
            live += 1;
            if position >= next_unused {
                return Err(InvariantError::new(format!(
                    "slot {position} occupied beyond next_unused {next_unused}"
                )));
            }
            if self.index.find(&slot.key) != Some(position as u32) {
                return Err(InvariantError::new(format!(
                    "index does not resolve the key of live slot {position}"
                )));
            }
        }

        if live != self.len {
            return Err(InvariantError::new(format!(
                "len {} disagrees with {live} occupied slots",
                self.len
            )));
        }
        if self.index.len() != self.len {
            return Err(InvariantError::new(format!(
                "index len {} disagrees with cache len {}",
                self.index.len(),
                self.len
            )));
        }

        let mut released = std::collections::HashSet::new();
        for &position in self.free.released() {
            if position as usize >= next_unused {
                return Err(InvariantError::new(format!(
                    "released position {position} beyond next_unused {next_unused}"
                )));
            }
            if self.slots[position as usize].occupied {
                return Err(InvariantError::new(format!(
                    "released position {position} is occupied"
                )));
            }
            if !released.insert(position) {
                return Err(InvariantError::new(format!(
                    "position {position} released twice"
                )));
            }
        }

        // Live slots, the free list, and the untouched tail must partition
        // [0, capacity).
        if live + released.len() + (capacity - next_unused) != capacity {
            return Err(InvariantError::new(
                "live/free/unused counts do not partition the slot array",
            ));
        }
        Ok(())
    }
}

impl<K, V, S> TokenStore<K, V> for TokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone,
    V: Default,
    S: BuildHasher,
{
    fn len(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        self.capacity()
    }

    fn find_handle(&self, key: &K) -> Token {
        self.find_handle(key)
    }

    fn metrics(&self) -> StoreMetrics {
        self.metrics()
    }
}

impl<K, V, S> TokenStoreMut<K, V> for TokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone,
    V: Default,
    S: BuildHasher,
{
    fn insert(&mut self, tag: u8, key: K, value: V) -> Token {
        self.insert(tag, key, value)
    }

    fn insert_or_assign(&mut self, tag: u8, key: K, value: V) -> Token {
        self.insert_or_assign(tag, key, value)
    }

    fn erase(&mut self, token: Token) -> bool {
        self.erase(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Cache = TokenCache<u64, u64>;

    #[test]
    fn insert_get_erase_round_trip() {
        let mut cache = Cache::new(8);
        let token = cache.insert(1, 42, 100);
        assert!(!token.is_null());
        assert_eq!(cache.get(token), Some(&100));
        assert_eq!(cache.len(), 1);

        assert!(cache.erase(token));
        assert_eq!(cache.get(token), None);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn insert_is_idempotent_per_key() {
        let mut cache = Cache::new(8);
        let first = cache.insert(1, 7, 99);
        let second = cache.insert(1, 7, 500);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        // The duplicate insert left the stored value alone.
        assert_eq!(cache.get(first), Some(&99));
    }

    #[test]
    fn insert_or_assign_overwrites_in_place() {
        let mut cache = Cache::new(8);
        let h1 = cache.insert(1, 7, 99);
        let h2 = cache.insert_or_assign(1, 7, 500);
        assert_eq!(h1, h2);
        assert_eq!(cache.get(h1), Some(&500));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_or_assign_retags_without_generation_bump() {
        let mut cache = Cache::new(8);
        let old = cache.insert(1, 7, 99);
        let new = cache.insert_or_assign(2, 7, 99);

        assert_ne!(old, new);
        assert_eq!(old.generation(), new.generation());
        assert_eq!(new.tag(), 2);

        // The old-tag handle no longer validates; a fresh lookup does.
        assert_eq!(cache.get(old), None);
        assert_eq!(cache.get(new), Some(&99));
        assert_eq!(cache.find_handle(&7), new);
    }

    #[test]
    fn stale_handle_fails_after_position_reuse() {
        let mut cache = Cache::new(8);
        let old = cache.insert(1, 7, 99);
        assert!(cache.erase(old));

        let new = cache.insert(1, 8, 123);
        // LIFO free list hands the erased position straight back.
        assert_eq!(new.position(), old.position());
        assert_ne!(new.generation(), old.generation());

        assert_eq!(cache.get(old), None);
        assert_eq!(cache.get(new), Some(&123));
    }

    #[test]
    fn erase_of_stale_handle_is_rejected() {
        let mut cache = Cache::new(8);
        let token = cache.insert(1, 7, 99);
        assert!(cache.erase(token));
        assert!(!cache.erase(token));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn full_cache_returns_null() {
        let mut cache = Cache::new(4);
        for k in 0..4 {
            assert!(!cache.insert(1, k, k).is_null());
        }
        assert!(cache.insert(1, 99, 99).is_null());
        assert_eq!(cache.len(), 4);
        cache.check_invariants().unwrap();

        // Erasing one entry frees exactly one position.
        let token = cache.find_handle(&0);
        assert!(cache.erase(token));
        assert!(!cache.insert(1, 99, 99).is_null());
        assert!(cache.insert(1, 100, 100).is_null());
    }

    #[test]
    fn find_handle_matches_issued_handles() {
        let mut cache = Cache::new(8);
        let token = cache.insert(3, 7, 99);
        assert_eq!(cache.find_handle(&7), token);
        assert!(cache.find_handle(&8).is_null());
    }

    #[test]
    fn null_and_forged_tokens_are_rejected() {
        let mut cache = Cache::new(4);
        let token = cache.insert(1, 7, 99);

        assert_eq!(cache.get(Token::NULL), None);
        assert!(!cache.erase(Token::NULL));

        // Out-of-range position
        let forged = Token::pack(1, 1, 1000);
        assert_eq!(cache.get(forged), None);

        // Wrong tag
        let wrong_tag = Token::pack(2, token.generation(), token.position());
        assert_eq!(cache.get(wrong_tag), None);

        // Wrong generation
        let wrong_gen = Token::pack(1, token.generation() + 1, token.position());
        assert_eq!(cache.get(wrong_gen), None);
    }

    #[test]
    fn get_mut_writes_through() {
        let mut cache = Cache::new(4);
        let token = cache.insert(1, 7, 10);
        *cache.get_mut(token).unwrap() += 5;
        assert_eq!(cache.get(token), Some(&15));
    }

    #[test]
    fn reserve_resets_all_entries() {
        let mut cache = Cache::new(4);
        let token = cache.insert(1, 7, 99);
        cache.reserve(2);

        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.get(token), None);
        assert!(cache.find_handle(&7).is_null());

        assert!(!cache.insert(1, 1, 1).is_null());
        assert!(!cache.insert(1, 2, 2).is_null());
        assert!(cache.insert(1, 3, 3).is_null());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn zero_capacity_hint_is_normalised() {
        let mut cache = Cache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(!cache.insert(1, 1, 1).is_null());
        assert!(cache.insert(1, 2, 2).is_null());
    }

    #[test]
    fn generation_advances_per_erase_cycle() {
        let mut cache = Cache::new(1);
        let mut last_generation = 0;
        for i in 0..5u64 {
            let token = cache.insert(1, i, i);
            assert_eq!(token.position(), 0);
            assert!(token.generation() > last_generation);
            last_generation = token.generation();
            assert!(cache.erase(token));
        }
    }

    #[test]
    fn metrics_count_operations() {
        let mut cache = Cache::new(4);
        let token = cache.insert(1, 7, 99);
        cache.insert_or_assign(1, 7, 100);
        cache.get(token);
        cache.get(Token::NULL);
        cache.erase(token);

        let metrics = cache.metrics();
        assert_eq!(metrics.inserts, 1);
        assert_eq!(metrics.updates, 1);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.removes, 1);
    }

    #[test]
    fn invariants_hold_under_churn() {
        let mut cache = Cache::new(16);
        let mut handles = Vec::new();
        for round in 0..20u64 {
            for k in 0..16u64 {
                let token = cache.insert((k % 4) as u8, round * 100 + k, k);
                if !token.is_null() {
                    handles.push(token);
                }
            }
            cache.check_invariants().unwrap();
            for token in handles.drain(..) {
                cache.erase(token);
            }
            cache.check_invariants().unwrap();
        }
        assert!(cache.is_empty());
    }
}
