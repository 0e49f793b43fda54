//! Error types for the tokenkv library.
//!
//! ## Key Components
//!
//! - [`InvariantError`]: Returned when internal data-structure invariants are
//!   violated (`check_invariants` methods on the cache types). Carries the
//!   offending shard, when the failure is shard-local.
//! - [`ConfigError`]: Returned when cache configuration parameters are
//!   invalid; one variant per rejectable parameter.
//!
//! Operation-path failures (full cache, stale handle, absent key) are not
//! errors in this sense: they surface as the null token, `false`, or `None`
//! on the operation itself.
//!
//! ## Example Usage
//!
//! ```
//! use tokenkv::error::ConfigError;
//! use tokenkv::store::sharded::ShardedTokenCache;
//!
//! // Fallible constructor for user-configurable parameters
//! let cache: Result<ShardedTokenCache<u64, u64>, ConfigError> =
//!     ShardedTokenCache::try_with_shards(8, 1024);
//! assert!(cache.is_ok());
//!
//! // Out-of-range shard count is caught without panicking
//! let bad = ShardedTokenCache::<u64, u64>::try_with_shards(0, 1024);
//! assert_eq!(bad.unwrap_err(), ConfigError::ZeroShards);
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by the `check_invariants` methods on
/// [`TokenCache`](crate::store::single::TokenCache) and
/// [`ShardedTokenCache`](crate::store::sharded::ShardedTokenCache). A
/// violation inside one shard records that shard's id; cache-wide failures
/// (the global size counter, the single-threaded cache) carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError {
    shard: Option<usize>,
    detail: String,
}

impl InvariantError {
    /// Creates a cache-wide invariant violation.
    #[inline]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            shard: None,
            detail: detail.into(),
        }
    }

    /// Creates a violation localised to one shard.
    #[inline]
    pub fn in_shard(shard: usize, detail: impl Into<String>) -> Self {
        Self {
            shard: Some(shard),
            detail: detail.into(),
        }
    }

    /// Returns the shard the violation was found in, if shard-local.
    #[inline]
    pub fn shard(&self) -> Option<usize> {
        self.shard
    }

    /// Returns the description of the violated invariant.
    #[inline]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shard {
            Some(shard) => write!(f, "shard {shard}: {}", self.detail),
            None => f.write_str(&self.detail),
        }
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`ShardedTokenCache::try_with_shards`](crate::store::sharded::ShardedTokenCache::try_with_shards).
///
/// # Example
///
/// ```
/// use tokenkv::error::ConfigError;
/// use tokenkv::store::sharded::ShardedTokenCache;
///
/// let err = ShardedTokenCache::<u64, u64>::try_with_shards(512, 1024).unwrap_err();
/// assert_eq!(err, ConfigError::TooManyShards { requested: 512, max: 256 });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A shard count of zero cannot route any key.
    ZeroShards,
    /// The shard count does not fit the token's shard id bits.
    TooManyShards {
        /// The count the caller asked for.
        requested: usize,
        /// The largest count the id space can encode.
        max: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::ZeroShards => f.write_str("shard count must be > 0"),
            ConfigError::TooManyShards { requested, max } => {
                write!(f, "shard count {requested} exceeds the {max}-shard id space")
            },
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
