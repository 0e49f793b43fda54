pub mod flat_index;
pub mod slots;

pub use flat_index::FlatIndexMap;
pub use slots::{FreeList, Slot};
