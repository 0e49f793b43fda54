//! Sharded token cache for mixed read/update workloads across threads.
//!
//! ## Architecture
//!
//! ```text
//!                         hash(key) % shard_count
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        ▼                         ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐           ┌─────────────┐
//!   │  Shard 0    │          │  Shard 1    │    ...    │  Shard N-1  │
//!   │  RwLock     │          │  RwLock     │           │  RwLock     │
//!   │  ┌────────┐ │          │  ┌────────┐ │           │  ┌────────┐ │
//!   │  │ slots  │ │          │  │ slots  │ │           │  │ slots  │ │
//!   │  │ free   │ │          │  │ free   │ │           │  │ free   │ │
//!   │  │ index  │ │          │  │ index  │ │           │  │ index  │ │
//!   │  └────────┘ │          │  └────────┘ │           │  └────────┘ │
//!   └─────────────┘          └─────────────┘           └─────────────┘
//!
//!   position = (shard_id << 24) | local_index      (8 shard bits default)
//! ```
//!
//! Each shard is an independent slot array, free list, and key index behind
//! one `parking_lot::RwLock`, padded to its own cache line. Operations on
//! different shards never contend; operations on the same key always meet
//! at the same shard lock, which serialises them.
//!
//! ## Key Concepts
//!
//! - **Routing** is a pure function of the key: `hash(key) % shard_count`,
//!   using the same hasher the per-shard index probes with.
//! - **Position split**: a token's 32 position bits carry
//!   `{shard_id: 8, local_index: 24}`. Decoding bounds-checks both halves
//!   before any slot access, so forged or foreign tokens fail closed.
//! - **Closure access**: [`read`](ShardedTokenCache::read) and
//!   [`write`](ShardedTokenCache::write) run a caller closure under the
//!   shard lock instead of copying values out. Closures must be short and
//!   must not call back into the same cache.
//! - **Size** is a relaxed atomic across shards: exact once mutators
//!   quiesce, an observation while they run.
//!
//! ## Example Usage
//!
//! ```
//! use tokenkv::store::sharded::ShardedTokenCache;
//!
//! let cache: ShardedTokenCache<u64, u64> = ShardedTokenCache::with_shards(4, 1024);
//!
//! let token = cache.insert(1, 42, 10);
//! assert!(!token.is_null());
//!
//! assert!(cache.add(token, 5));
//! assert_eq!(cache.read(token, |v| *v), Some(15));
//!
//! assert!(cache.erase(token));
//! assert_eq!(cache.read(token, |v| *v), None);
//! ```
//!
//! ## No hidden growth
//!
//! Every buffer (slots, free list, index buckets) is allocated at
//! construction. Nothing under a shard lock allocates, so writers never
//! stall on the allocator and capacity failures are explicit null tokens.

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::ds::{FlatIndexMap, FreeList, Slot};
use crate::error::{ConfigError, InvariantError};
use crate::store::traits::{ConcurrentTokenStore, StoreMetrics, TokenStore};
use crate::token::Token;

/// Position bits reserved for the shard id.
pub const SHARD_BITS: u32 = 8;
/// Position bits left for the index local to a shard.
pub const LOCAL_BITS: u32 = Token::POSITION_BITS - SHARD_BITS;
/// Upper bound on the shard count imposed by the id width.
pub const MAX_SHARDS: usize = 1 << SHARD_BITS;
/// Mask extracting the local index from a position.
pub const LOCAL_MASK: u32 = (1 << LOCAL_BITS) - 1;

/// Total capacity used when the reserve hint is zero.
const DEFAULT_RESERVE: usize = 1 << 15;

/// Operation counters shared across shards.
#[derive(Debug, Default)]
struct ConcurrentStoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
}

impl ConcurrentStoreCounters {
    fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Mutable state of one shard; layout matches the single-threaded cache.
#[derive(Debug)]
struct ShardState<K, V, S> {
    slots: Vec<Slot<K, V>>,
    free: FreeList,
    index: FlatIndexMap<K, S>,
}

impl<K, V, S> ShardState<K, V, S>
where
    K: Eq + Hash + Default,
    V: Default,
    S: BuildHasher,
{
    fn new(capacity: usize, hasher: S) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot::default());
        }
        Self {
            slots,
            free: FreeList::new(capacity),
            index: FlatIndexMap::with_hasher(capacity, hasher),
        }
    }
}

/// Thread-safe token cache striped over independent shards.
///
/// Readers on one shard proceed concurrently; a writer excludes everything
/// on its shard only. All storage is allocated at construction.
pub struct ShardedTokenCache<K, V, S = FxBuildHasher> {
    shards: Box<[CachePadded<RwLock<ShardState<K, V, S>>>]>,
    per_shard_capacity: u32,
    hasher: S,
    len: AtomicUsize,
    counters: ConcurrentStoreCounters,
}

impl<K, V, S> fmt::Debug for ShardedTokenCache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedTokenCache")
            .field("per_shard_capacity", &self.per_shard_capacity)
            .field("len", &self.len)
            .field("counters", &self.counters)
            .finish()
    }
}

impl<K, V, S> ShardedTokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone,
    V: Default,
    S: BuildHasher + Default + Clone,
{
    /// Creates a cache with a shard per available CPU and room for
    /// `reserve_hint` entries in total (zero selects 2^15).
    pub fn new(reserve_hint: usize) -> Self {
        Self::with_shards(Self::default_shard_count(), reserve_hint)
    }

    /// Creates a cache with an explicit shard count.
    ///
    /// The count is clamped to `[1, 256]`; per-shard capacity is
    /// `ceil(reserve_hint / shard_count)`, clamped so a local index always
    /// fits in its 24 position bits.
    pub fn with_shards(shard_count: usize, reserve_hint: usize) -> Self {
        let shard_count = shard_count.clamp(1, MAX_SHARDS);
        let per_shard_capacity = Self::per_shard_capacity_for(shard_count, reserve_hint);
        let hasher = S::default();

        let shards = (0..shard_count)
            .map(|_| {
                CachePadded::new(RwLock::new(ShardState::new(
                    per_shard_capacity as usize,
                    hasher.clone(),
                )))
            })
            .collect();

        Self {
            shards,
            per_shard_capacity,
            hasher,
            len: AtomicUsize::new(0),
            counters: ConcurrentStoreCounters::default(),
        }
    }

    /// Fallible variant of [`with_shards`](Self::with_shards) that rejects
    /// out-of-range shard counts instead of clamping.
    pub fn try_with_shards(shard_count: usize, reserve_hint: usize) -> Result<Self, ConfigError> {
        if shard_count == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if shard_count > MAX_SHARDS {
            return Err(ConfigError::TooManyShards {
                requested: shard_count,
                max: MAX_SHARDS,
            });
        }
        Ok(Self::with_shards(shard_count, reserve_hint))
    }

    /// Shard count matching the host's available parallelism.
    pub fn default_shard_count() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(MAX_SHARDS)
    }

    fn per_shard_capacity_for(shard_count: usize, reserve_hint: usize) -> u32 {
        let total = if reserve_hint == 0 {
            DEFAULT_RESERVE
        } else {
            reserve_hint
        };
        let per_shard = total.div_ceil(shard_count).max(1);
        per_shard.min(LOCAL_MASK as usize + 1) as u32
    }

    /// Returns the number of live entries across all shards.
    ///
    /// Maintained with relaxed atomics; exact only once concurrent
    /// mutators have quiesced.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if no shard holds a live entry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total entry capacity across shards.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.per_shard_capacity as usize * self.shards.len()
    }

    /// Returns the number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the entry capacity of each shard.
    #[inline]
    pub fn per_shard_capacity(&self) -> usize {
        self.per_shard_capacity as usize
    }

    /// Inserts a new entry, returning its handle.
    ///
    /// If the key already exists its current handle is returned unchanged.
    /// Returns [`Token::NULL`] when the routed shard is full.
    pub fn insert(&self, tag: u8, key: K, value: V) -> Token {
        self.insert_impl(tag, key, value, false)
    }

    /// Inserts or overwrites, returning the entry's handle.
    ///
    /// On a key match the value and tag are replaced in place under the
    /// shard's exclusive lock; position and generation are preserved.
    pub fn insert_or_assign(&self, tag: u8, key: K, value: V) -> Token {
        self.insert_impl(tag, key, value, true)
    }

    /// Runs `reader` on the value addressed by `token` under the shard's
    /// shared lock.
    ///
    /// Returns `None` for invalid tokens. The closure holds the shard's
    /// read lock for its whole run: keep it short and never re-enter this
    /// cache from inside it.
    pub fn read<R>(&self, token: Token, reader: impl FnOnce(&V) -> R) -> Option<R> {
        let Some((shard_id, local)) = self.decode_checked(token) else {
            self.counters.inc_miss();
            return None;
        };

        let state = self.shards[shard_id as usize].read();
        let slot = &state.slots[local as usize];
        if !Self::slot_matches(slot, token) {
            self.counters.inc_miss();
            return None;
        }
        self.counters.inc_hit();
        Some(reader(&slot.value))
    }

    /// Runs `writer` on the value addressed by `token` under the shard's
    /// exclusive lock.
    ///
    /// Same validity and closure rules as [`read`](Self::read).
    pub fn write<R>(&self, token: Token, writer: impl FnOnce(&mut V) -> R) -> Option<R> {
        let Some((shard_id, local)) = self.decode_checked(token) else {
            self.counters.inc_miss();
            return None;
        };

        let mut state = self.shards[shard_id as usize].write();
        let slot = &mut state.slots[local as usize];
        if !Self::slot_matches(slot, token) {
            self.counters.inc_miss();
            return None;
        }
        self.counters.inc_update();
        Some(writer(&mut slot.value))
    }

    /// Returns a copy of the value addressed by `token`.
    pub fn get(&self, token: Token) -> Option<V>
    where
        V: Clone,
    {
        self.read(token, V::clone)
    }

    /// Replaces the value addressed by `token`.
    pub fn update(&self, token: Token, value: V) -> bool {
        self.write(token, |slot| *slot = value).is_some()
    }

    /// Adds `delta` to the value addressed by `token`.
    pub fn add(&self, token: Token, delta: V) -> bool
    where
        V: AddAssign,
    {
        self.write(token, |slot| *slot += delta).is_some()
    }

    /// Erases the entry addressed by `token`.
    ///
    /// Advances the slot generation under the shard's exclusive lock so
    /// older handles for the position stop validating. Returns `false` for
    /// invalid tokens.
    pub fn erase(&self, token: Token) -> bool {
        let Some((shard_id, local)) = self.decode_checked(token) else {
            return false;
        };

        let mut guard = self.shards[shard_id as usize].write();
        let state = &mut *guard;
        if !Self::slot_matches(&state.slots[local as usize], token) {
            return false;
        }
        if !state.index.erase(&state.slots[local as usize].key) {
            return false;
        }
        let slot = &mut state.slots[local as usize];
        slot.occupied = false;
        slot.tag = 0;
        slot.generation = Token::next_generation(slot.generation);
        state.free.release(local);
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.counters.inc_remove();
        true
    }

    /// Returns the current handle for `key`, or [`Token::NULL`] if absent.
    pub fn find_handle(&self, key: &K) -> Token {
        let shard_id = self.shard_for_key(key);
        let state = self.shards[shard_id as usize].read();
        match state.index.find(key) {
            Some(local) => {
                let slot = &state.slots[local as usize];
                Self::build_handle(slot.tag, slot.generation, shard_id, local)
            },
            None => Token::NULL,
        }
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> StoreMetrics {
        self.counters.snapshot()
    }

    fn insert_impl(&self, tag: u8, key: K, value: V, assign_if_exists: bool) -> Token {
        let shard_id = self.shard_for_key(&key);
        let mut guard = self.shards[shard_id as usize].write();
        let state = &mut *guard;

        if let Some(local) = state.index.find(&key) {
            let slot = &mut state.slots[local as usize];
            if assign_if_exists {
                slot.value = value;
                slot.tag = tag;
                self.counters.inc_update();
            }
            return Self::build_handle(slot.tag, slot.generation, shard_id, local);
        }

        let Some(local) = state.free.allocate() else {
            return Token::NULL;
        };

        let index_key = key.clone();
        let slot = &mut state.slots[local as usize];
        slot.key = key;
        slot.value = value;
        slot.tag = tag;
        slot.occupied = true;
        let generation = slot.generation;
        if !state.index.insert(index_key, local) {
            state.slots[local as usize].occupied = false;
            state.free.release(local);
            return Token::NULL;
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        self.counters.inc_insert();
        Self::build_handle(tag, generation, shard_id, local)
    }

    #[inline]
    fn shard_for_key(&self, key: &K) -> u32 {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as u32
    }

    #[inline]
    fn encode_position(shard_id: u32, local: u32) -> u32 {
        (shard_id << LOCAL_BITS) | (local & LOCAL_MASK)
    }

    // Splits a token's position and bounds-checks both halves. Out-of-range
    // shard or local bits mean the token cannot address this cache.
    #[inline]
    fn decode_checked(&self, token: Token) -> Option<(u32, u32)> {
        if token.is_null() {
            return None;
        }
        let position = token.position();
        let shard_id = position >> LOCAL_BITS;
        let local = position & LOCAL_MASK;
        if shard_id as usize >= self.shards.len() || local >= self.per_shard_capacity {
            return None;
        }
        Some((shard_id, local))
    }

    #[inline]
    fn slot_matches(slot: &Slot<K, V>, token: Token) -> bool {
        slot.occupied && slot.tag == token.tag() && slot.generation == token.generation()
    }

    #[inline]
    fn build_handle(tag: u8, generation: u32, shard_id: u32, local: u32) -> Token {
        Token::pack(tag, generation, Self::encode_position(shard_id, local))
    }

    /// Verifies every shard's partition invariants and the global size.
    ///
    /// Takes each shard's read lock in turn; call from quiesced tests.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut live_total = 0usize;
        for (shard_id, shard) in self.shards.iter().enumerate() {
            let state = shard.read();
            let next_unused = state.free.next_unused() as usize;

            let mut live = 0usize;
            for (local, slot) in state.slots.iter().enumerate() {
                if slot.generation < 1 || slot.generation > Token::MAX_GENERATION {
                    return Err(InvariantError::in_shard(
                        shard_id,
                        format!("slot {local} generation {} out of range", slot.generation),
                    ));
                }
                if !slot.occupied {
                    continue;
                }
                live += 1;
                if state.index.find(&slot.key) != Some(local as u32) {
                    return Err(InvariantError::in_shard(
                        shard_id,
                        format!("index does not resolve live slot {local}"),
                    ));
                }
            }

            if state.index.len() != live {
                return Err(InvariantError::in_shard(
                    shard_id,
                    format!("index len {} disagrees with {live} live slots", state.index.len()),
                ));
            }
            let released = state.free.released().len();
            if live + released + (state.slots.len() - next_unused) != state.slots.len() {
                return Err(InvariantError::in_shard(
                    shard_id,
                    "live/free/unused counts do not partition the shard's slots",
                ));
            }
            live_total += live;
        }

        if live_total != self.len() {
            return Err(InvariantError::new(format!(
                "global len {} disagrees with {live_total} live slots",
                self.len()
            )));
        }
        Ok(())
    }
}

impl<K, V, S> TokenStore<K, V> for ShardedTokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone,
    V: Default,
    S: BuildHasher + Default + Clone,
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

impl<K, V, S> ConcurrentTokenStore<K, V> for ShardedTokenCache<K, V, S>
where
    K: Eq + Hash + Default + Clone + Send + Sync,
    V: Default + Send + Sync,
    S: BuildHasher + Default + Clone + Send + Sync,
{
    fn insert(&self, tag: u8, key: K, value: V) -> Token {
        self.insert(tag, key, value)
    }

    fn insert_or_assign(&self, tag: u8, key: K, value: V) -> Token {
        self.insert_or_assign(tag, key, value)
    }

    fn erase(&self, token: Token) -> bool {
        self.erase(token)
    }
}
