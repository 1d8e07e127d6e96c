//! Buffer manager: pin/unpin pages against a fixed-size pool, Second-Chance
//! replacement, dirty tracking, hashed lookup. `NUM_BUF_TYPES` independent
//! pools are bundled by [`pool_set::BufferPoolSet`].

mod frame;
mod hash;
mod pool;
mod pool_set;

pub use frame::{BufferFrame, FrameBits, NIL_HASH_ENTRY};
pub use hash::BufHashTable;
pub use pool::{BufferPool, PagePin};
pub use pool_set::{buffer_type_from_index, BufferPoolConfig, BufferPoolSet};
