//! tokenkv: handle-addressed, fixed-capacity key-value caches.
//!
//! Every live entry is reachable two ways: by key, through a flat
//! open-addressed index, and by a 64-bit [`token::Token`] that packs
//! `{tag, generation, position}`. Generations advance on erase, so stale
//! tokens are detected instead of dereferenced.

pub mod ds;
pub mod error;
pub mod store;
pub mod token;

pub mod prelude;
