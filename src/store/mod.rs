//! Cache variants built on the slot/index data structures.
//!
//! Two stores share one slot-and-handle design:
//!
//! - [`single::TokenCache`]: single-owner, zero-overhead borrows.
//! - [`sharded::ShardedTokenCache`]: per-shard reader-writer locks for
//!   mixed read/update workloads across threads.
//!
//! Both allocate all storage at construction and never grow; capacity
//! exhaustion surfaces as the null token.

pub mod sharded;
pub mod single;
pub mod traits;

pub use sharded::ShardedTokenCache;
pub use single::TokenCache;
pub use traits::{ConcurrentTokenStore, StoreMetrics, TokenStore, TokenStoreMut};
