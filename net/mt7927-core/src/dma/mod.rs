//! WFDMA0 host DMA: descriptors, rings and the memory behind them.

mod buffer;
mod desc;
mod manager;
mod ring;

pub use buffer::{DmaAllocator, DmaBuffer, HostDma, PAGE_SIZE};
pub use desc::{Descriptor, DESC_MAX_LEN, DESC_SIZE, MT_DMA_CTL_DMA_DONE};
pub use manager::RingManager;
pub use ring::{Direction, Ring, RingRole, RingSlot};

/// Highest TX ring count the WFDMA0 register block has room for.
pub const MAX_TX_RINGS: u8 = 32;
