//! Trait hierarchy for token-addressed stores.
//!
//! Both cache variants expose the same key-side observations; they differ in
//! how mutation is threaded. The single-threaded cache owns its state and
//! mutates through `&mut self`; the sharded cache uses interior mutability
//! behind per-shard locks and mutates through `&self`.
//!
//! ## Architecture
//!
//! ```text
//!     ┌───────────────────────────────┐
//!     │       TokenStore<K, V>        │  len, capacity,
//!     │        (observations)         │  find_handle, metrics
//!     └───────────────┬───────────────┘
//!                     │
//!         ┌───────────┴────────────────────┐
//!         ▼                                ▼
//!     ┌───────────────────────┐   ┌──────────────────────────┐
//!     │  TokenStoreMut<K, V>  │   │ ConcurrentTokenStore<K,V>│
//!     │      (&mut self)      │   │   (&self, Send + Sync)   │
//!     │  insert / upsert /    │   │  insert / upsert /       │
//!     │  erase                │   │  erase                   │
//!     └───────────────────────┘   └──────────────────────────┘
//! ```
//!
//! Value access is deliberately left to inherent methods: the
//! single-threaded cache can hand out `&V` directly, while the sharded
//! cache must run caller closures under the shard lock. Forcing both shapes
//! through one trait would cost the cheap variant its zero-overhead path.

use crate::token::Token;

/// Snapshot of store-level operation counters.
///
/// All fields are cumulative since store creation. For the sharded cache
/// the counters are maintained with relaxed atomics, so a snapshot taken
/// during concurrent mutation is an observation, not an exact cut.
///
/// # Example
///
/// ```
/// use tokenkv::store::traits::StoreMetrics;
///
/// let metrics = StoreMetrics {
///     hits: 150,
///     misses: 50,
///     inserts: 100,
///     updates: 20,
///     removes: 10,
/// };
///
/// let hit_rate = metrics.hits as f64 / (metrics.hits + metrics.misses) as f64;
/// assert!((hit_rate - 0.75).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    /// Number of handle validations that succeeded on a read.
    pub hits: u64,
    /// Number of reads that failed validation.
    pub misses: u64,
    /// Number of new entries inserted.
    pub inserts: u64,
    /// Number of in-place value/tag overwrites.
    pub updates: u64,
    /// Number of successful erases.
    pub removes: u64,
}

/// Key-side observations shared by every token store.
pub trait TokenStore<K, V> {
    /// Returns the number of live entries.
    fn len(&self) -> usize;

    /// Returns `true` if the store holds no live entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of live entries the store can hold.
    fn capacity(&self) -> usize;

    /// Returns the current handle for `key`, or [`Token::NULL`] if absent.
    fn find_handle(&self, key: &K) -> Token;

    /// Returns a snapshot of the store's operation counters.
    fn metrics(&self) -> StoreMetrics {
        StoreMetrics::default()
    }
}

/// Mutation surface of the single-threaded store.
pub trait TokenStoreMut<K, V>: TokenStore<K, V> {
    /// Inserts a new entry and returns its handle.
    ///
    /// Returns the existing handle unchanged if the key is already present,
    /// or [`Token::NULL`] when the store is full.
    fn insert(&mut self, tag: u8, key: K, value: V) -> Token;

    /// Inserts or overwrites, returning the entry's handle.
    ///
    /// An existing entry keeps its position and generation; value and tag
    /// are replaced in place.
    fn insert_or_assign(&mut self, tag: u8, key: K, value: V) -> Token;

    /// Erases the entry addressed by `token`.
    ///
    /// Returns `false` for null, stale, or otherwise invalid tokens.
    fn erase(&mut self, token: Token) -> bool;
}

/// Mutation surface of thread-safe stores.
///
/// Methods take `&self`; implementors synchronise internally.
pub trait ConcurrentTokenStore<K, V>: TokenStore<K, V> + Send + Sync {
    /// Inserts a new entry and returns its handle.
    ///
    /// Returns the existing handle unchanged if the key is already present,
    /// or [`Token::NULL`] when the target shard is full.
    fn insert(&self, tag: u8, key: K, value: V) -> Token;

    /// Inserts or overwrites, returning the entry's handle.
    fn insert_or_assign(&self, tag: u8, key: K, value: V) -> Token;

    /// Erases the entry addressed by `token`.
    fn erase(&self, token: Token) -> bool;
}
