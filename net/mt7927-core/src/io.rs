//! Register access over the BAR0 window

use std::ptr::NonNull;
use std::sync::Arc;

use crate::regs::MT_DEAD;

/// 32-bit register access at local BAR0 offsets.
///
/// Accessors take `&self` because MMIO is volatile shared state; callers that
/// need ordering between two writes get it from the bus, not from Rust aliasing.
pub trait RegisterBus: Send + Sync {
    fn read(&self, offset: u32) -> u32;

    fn write(&self, offset: u32, value: u32);

    /// Whether every bit of `flags` is set.
    fn readf(&self, offset: u32, flags: u32) -> bool {
        self.read(offset) & flags == flags
    }

    /// Set or clear `flags` with a read-modify-write.
    fn writef(&self, offset: u32, flags: u32, value: bool) {
        let old = self.read(offset);
        let new = if value { old | flags } else { old & !flags };
        self.write(offset, new);
    }

    /// Replace the bits under `mask` with `value`, returning the new register value.
    fn rmw(&self, offset: u32, mask: u32, value: u32) -> u32 {
        let new = (self.read(offset) & !mask) | (value & mask);
        self.write(offset, new);
        new
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Arc<B> {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for &B {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

/// A mapped PCI BAR.
pub struct MmioBar {
    base: NonNull<u8>,
    len: usize,
}

impl MmioBar {
    /// # Safety
    ///
    /// `base` must point to `len` bytes of device memory mapped uncached for
    /// the whole lifetime of the returned value.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reg(&self, offset: u32) -> Option<*mut u32> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset + 4 > self.len {
            return None;
        }
        // SAFETY: bounds checked against the mapping above.
        Some(unsafe { self.base.as_ptr().add(offset) } as *mut u32)
    }
}

impl RegisterBus for MmioBar {
    fn read(&self, offset: u32) -> u32 {
        match self.reg(offset) {
            // SAFETY: aligned and inside the BAR mapping.
            Some(ptr) => u32::from_le(unsafe { core::ptr::read_volatile(ptr) }),
            None => {
                log::error!("mt7927: read outside BAR0 at {:#x}", offset);
                MT_DEAD
            }
        }
    }

    fn write(&self, offset: u32, value: u32) {
        match self.reg(offset) {
            // SAFETY: aligned and inside the BAR mapping.
            Some(ptr) => unsafe { core::ptr::write_volatile(ptr, value.to_le()) },
            None => log::error!("mt7927: write outside BAR0 at {:#x}", offset),
        }
    }
}

unsafe impl Send for MmioBar {}
unsafe impl Sync for MmioBar {}
