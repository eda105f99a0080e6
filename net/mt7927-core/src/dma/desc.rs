//! WFDMA descriptor
//!
//! The control word packs two segment lengths. Segment 0 lives in the upper
//! half, so a naive "length in the low bits" layout silently describes an
//! empty buffer 0 and a bogus buffer 1.

use static_assertions::assert_eq_size;

use crate::regs::{bit, field_get, field_prep, genmask};

pub const MT_DMA_CTL_SD_LEN1: u32 = genmask(13, 0);
pub const MT_DMA_CTL_LAST_SEC1: u32 = bit(14);
pub const MT_DMA_CTL_BURST: u32 = bit(15);
pub const MT_DMA_CTL_SD_LEN0: u32 = genmask(29, 16);
pub const MT_DMA_CTL_LAST_SEC0: u32 = bit(30);
pub const MT_DMA_CTL_DMA_DONE: u32 = bit(31);

/// High address bits of buffer 0, carried in `info`.
pub const MT_DMA_INFO_SDP0_H: u32 = genmask(3, 0);

/// Largest length one segment can describe.
pub const DESC_MAX_LEN: u32 = MT_DMA_CTL_SD_LEN0 >> 16;

pub const DESC_SIZE: usize = 16;

/// Descriptor (16 bytes), little-endian in device memory
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Buffer 0 address, low 32 bits
    pub buf0: u32,
    /// Lengths and flags
    pub ctrl: u32,
    /// Buffer 1 address, low 32 bits
    pub buf1: u32,
    /// Auxiliary info, including the high bits of buffer 0
    pub info: u32,
}

assert_eq_size!(Descriptor, [u8; DESC_SIZE]);

impl Descriptor {
    /// A descriptor software has not handed to the device.
    pub const IDLE: Descriptor = Descriptor {
        buf0: 0,
        ctrl: MT_DMA_CTL_DMA_DONE,
        buf1: 0,
        info: 0,
    };

    /// Single-segment TX descriptor.
    ///
    /// `len` is truncated to [`DESC_MAX_LEN`]; [`Ring::push`](super::Ring::push)
    /// rejects longer frames.
    pub fn tx(addr: u64, len: u32, last: bool) -> Self {
        let mut ctrl = field_prep(MT_DMA_CTL_SD_LEN0, len.min(DESC_MAX_LEN));
        if last {
            ctrl |= MT_DMA_CTL_LAST_SEC0;
        }
        Self {
            buf0: addr as u32,
            ctrl,
            buf1: 0,
            info: field_prep(MT_DMA_INFO_SDP0_H, (addr >> 32) as u32),
        }
    }

    /// RX descriptor offering a `len`-byte buffer to the device.
    pub fn rx(addr: u64, len: u32) -> Self {
        Self {
            buf0: addr as u32,
            ctrl: field_prep(MT_DMA_CTL_SD_LEN0, len.min(DESC_MAX_LEN)),
            buf1: 0,
            info: field_prep(MT_DMA_INFO_SDP0_H, (addr >> 32) as u32),
        }
    }

    pub fn len0(&self) -> u32 {
        field_get(MT_DMA_CTL_SD_LEN0, self.ctrl)
    }

    pub fn len1(&self) -> u32 {
        field_get(MT_DMA_CTL_SD_LEN1, self.ctrl)
    }

    pub fn is_last0(&self) -> bool {
        self.ctrl & MT_DMA_CTL_LAST_SEC0 != 0
    }

    pub fn is_done(&self) -> bool {
        self.ctrl & MT_DMA_CTL_DMA_DONE != 0
    }

    pub fn buffer_addr(&self) -> u64 {
        (field_get(MT_DMA_INFO_SDP0_H, self.info) as u64) << 32 | self.buf0 as u64
    }

    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut out = [0u8; DESC_SIZE];
        for (chunk, word) in out
            .chunks_exact_mut(4)
            .zip([self.buf0, self.ctrl, self.buf1, self.info])
        {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; DESC_SIZE]) -> Self {
        let word =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            buf0: word(0),
            ctrl: word(4),
            buf1: word(8),
            info: word(12),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid and aligned for a `Descriptor` in device memory.
    pub unsafe fn write_volatile(self, ptr: *mut Descriptor) {
        core::ptr::write_volatile(
            ptr,
            Descriptor {
                buf0: self.buf0.to_le(),
                ctrl: self.ctrl.to_le(),
                buf1: self.buf1.to_le(),
                info: self.info.to_le(),
            },
        )
    }

    /// # Safety
    ///
    /// Same contract as [`Descriptor::write_volatile`].
    pub unsafe fn read_volatile(ptr: *const Descriptor) -> Self {
        let raw = core::ptr::read_volatile(ptr);
        Descriptor {
            buf0: u32::from_le(raw.buf0),
            ctrl: u32::from_le(raw.ctrl),
            buf1: u32::from_le(raw.buf1),
            info: u32::from_le(raw.info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_known_values() {
        // 64-byte single-segment frame.
        assert_eq!(Descriptor::tx(0x1000, 64, true).ctrl, 0x4040_0000);
        // Same frame once the device marked it done.
        let mut done = Descriptor::tx(0x1000, 64, true);
        done.ctrl |= MT_DMA_CTL_DMA_DONE;
        assert_eq!(done.ctrl, 0xc040_0000);
        // 4 KiB firmware chunk plus its 32-byte header.
        assert_eq!(Descriptor::tx(0x1000, 4128, true).ctrl, 0x5020_0000);
    }

    #[test]
    fn test_old_layout_is_rejected() {
        // Length in the low bits describes segment 1, not segment 0.
        let broken = Descriptor {
            ctrl: 64 | MT_DMA_CTL_LAST_SEC1,
            ..Default::default()
        };
        assert_eq!(broken.len0(), 0);
        assert_eq!(broken.len1(), 64);
        assert!(!broken.is_last0());
    }

    #[test]
    fn test_accessors() {
        let desc = Descriptor::tx(0x3_8765_4320, 1500, false);
        assert_eq!(desc.len0(), 1500);
        assert!(!desc.is_last0());
        assert!(!desc.is_done());
        assert_eq!(desc.buf0, 0x8765_4320);
        assert_eq!(desc.info, 0x3);
        assert_eq!(desc.buffer_addr(), 0x3_8765_4320);
        assert!(Descriptor::IDLE.is_done());
    }

    #[test]
    fn test_max_len() {
        assert_eq!(DESC_MAX_LEN, 0x3fff);
        assert_eq!(Descriptor::tx(0, 0x1_0000, true).len0(), DESC_MAX_LEN);
    }

    #[test]
    fn test_byte_layout() {
        let desc = Descriptor::tx(0x1234_5678, 64, true);
        let bytes = desc.to_bytes();
        assert_eq!(&bytes[0..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x40, 0x40]);
        assert_eq!(Descriptor::from_bytes(&bytes), desc);
    }
}
