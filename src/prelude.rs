pub use crate::ds::{FlatIndexMap, FreeList};
pub use crate::error::{ConfigError, InvariantError};
pub use crate::store::{
    ConcurrentTokenStore, ShardedTokenCache, StoreMetrics, TokenCache, TokenStore, TokenStoreMut,
};
pub use crate::token::Token;
