//! Descriptor rings

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::buffer::{DmaAllocator, DmaBuffer};
use super::desc::{Descriptor, DESC_MAX_LEN, DESC_SIZE};
use crate::error::{Error, Result};
use crate::regs;

/// What a TX ring index is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RingRole {
    /// Host data path, idle during bring-up
    Data,
    /// MCU WM command queue
    Command,
    /// Firmware download queue
    FirmwareDownload,
    /// Present in hardware, never used
    Unused,
}

impl RingRole {
    /// Command and firmware-download rings carry bring-up traffic.
    pub fn carries_traffic(self) -> bool {
        matches!(self, RingRole::Command | RingRole::FirmwareDownload)
    }
}

/// One entry of the ring layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSlot {
    pub index: u8,
    pub role: RingRole,
    /// EXT_CTRL prefetch word, see [`regs::prefetch`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<u32>,
}

impl RingSlot {
    pub const fn new(index: u8, role: RingRole) -> Self {
        Self {
            index,
            role,
            prefetch: None,
        }
    }

    pub const fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = Some(prefetch);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

enum DescStorage {
    Owned(DmaBuffer),
    /// Placeholder rings all point at one idle descriptor.
    Shared(Arc<DmaBuffer>),
}

impl DescStorage {
    fn buffer(&self) -> &DmaBuffer {
        match self {
            DescStorage::Owned(buf) => buf,
            DescStorage::Shared(buf) => buf,
        }
    }
}

/// A descriptor ring and the per-slot buffers its descriptors point at.
pub struct Ring {
    index: u8,
    role: RingRole,
    direction: Direction,
    descs: DescStorage,
    capacity: u16,
    /// CPU index (software producer for TX)
    producer: u16,
    /// Last DMA index read back from the device
    shadow_consumer: AtomicU32,
    data: Option<DmaBuffer>,
    slot_size: usize,
    prefetch: u32,
}

impl Ring {
    /// TX ring with `capacity` descriptors and, if `slot_size > 0`, one
    /// pre-allocated `slot_size` buffer per descriptor.
    pub fn new_tx<A: DmaAllocator + ?Sized>(
        alloc: &A,
        slot: RingSlot,
        capacity: u16,
        slot_size: usize,
    ) -> Result<Self> {
        let descs = alloc.allocate(capacity as usize * DESC_SIZE)?;
        let data = if slot_size > 0 {
            Some(alloc.allocate(capacity as usize * slot_size)?)
        } else {
            None
        };

        let ring = Self {
            index: slot.index,
            role: slot.role,
            direction: Direction::Tx,
            descs: DescStorage::Owned(descs),
            capacity,
            producer: 0,
            shadow_consumer: AtomicU32::new(0),
            data,
            slot_size,
            prefetch: slot.prefetch.unwrap_or(0),
        };
        for i in 0..capacity {
            ring.write_desc(i, Descriptor::IDLE);
        }

        log::debug!(
            "mt7927: tx ring {} ({:?}) capacity {} at {:#x}",
            ring.index,
            ring.role,
            capacity,
            ring.device_base()
        );
        Ok(ring)
    }

    /// Capacity-1 ring for an index that never carries traffic.
    pub fn new_placeholder(slot: RingSlot, idle: Arc<DmaBuffer>) -> Self {
        Self {
            index: slot.index,
            role: slot.role,
            direction: Direction::Tx,
            descs: DescStorage::Shared(idle),
            capacity: 1,
            producer: 0,
            shadow_consumer: AtomicU32::new(0),
            data: None,
            slot_size: 0,
            prefetch: 0,
        }
    }

    /// RX ring whose descriptors all offer a fresh `buf_size` buffer.
    pub fn new_rx<A: DmaAllocator + ?Sized>(
        alloc: &A,
        index: u8,
        capacity: u16,
        buf_size: usize,
    ) -> Result<Self> {
        let descs = alloc.allocate(capacity as usize * DESC_SIZE)?;
        let data = alloc.allocate(capacity as usize * buf_size)?;

        let ring = Self {
            index,
            role: RingRole::Data,
            direction: Direction::Rx,
            descs: DescStorage::Owned(descs),
            capacity,
            producer: capacity - 1,
            shadow_consumer: AtomicU32::new(0),
            data: Some(data),
            slot_size: buf_size,
            prefetch: regs::prefetch(index as u16 * 0x40, 0x4),
        };
        for i in 0..capacity {
            ring.write_desc(i, Descriptor::rx(ring.slot_phys(i), buf_size as u32));
        }

        log::debug!("mt7927: rx ring {} capacity {} at {:#x}", index, capacity, ring.device_base());
        Ok(ring)
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn role(&self) -> RingRole {
        self.role
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn producer(&self) -> u16 {
        self.producer
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Bus address of the descriptor array.
    pub fn device_base(&self) -> u64 {
        self.descs.buffer().physical()
    }

    /// Logical address of this ring's BASE register.
    pub fn regs(&self) -> u32 {
        match self.direction {
            Direction::Tx => regs::tx_ring(self.index),
            Direction::Rx => regs::rx_ring(self.index),
        }
    }

    pub fn ext_ctrl(&self) -> u32 {
        match self.direction {
            Direction::Tx => regs::tx_ring_ext_ctrl(self.index),
            Direction::Rx => regs::rx_ring_ext_ctrl(self.index),
        }
    }

    /// EXT_CTRL prefetch word, zero for rings that do not prefetch.
    pub fn prefetch(&self) -> u32 {
        self.prefetch
    }

    /// Shadow of the device's consumer index.
    pub fn consumer(&self) -> u32 {
        self.shadow_consumer.load(Ordering::Acquire)
    }

    pub fn set_consumer(&self, didx: u32) {
        self.shadow_consumer.store(didx, Ordering::Release);
    }

    /// Frames handed to the device but not yet consumed.
    pub fn pending(&self) -> u16 {
        let capacity = self.capacity as u32;
        let consumer = self.consumer() % capacity;
        ((self.producer as u32 + capacity - consumer) % capacity) as u16
    }

    pub fn is_full(&self) -> bool {
        self.pending() == self.capacity - 1
    }

    /// Forget software indices after a pointer reset.
    pub fn reset_indices(&mut self) {
        self.producer = match self.direction {
            Direction::Tx => 0,
            Direction::Rx => self.capacity - 1,
        };
        self.set_consumer(0);
    }

    pub fn descriptor(&self, i: u16) -> Descriptor {
        let ptr = self.descs.buffer().as_ptr() as *const Descriptor;
        // SAFETY: `i` is reduced modulo the allocated descriptor count.
        unsafe { Descriptor::read_volatile(ptr.add((i % self.capacity) as usize)) }
    }

    fn write_desc(&self, i: u16, desc: Descriptor) {
        if let DescStorage::Owned(buf) = &self.descs {
            let ptr = buf.as_ptr() as *mut Descriptor;
            // SAFETY: as in `descriptor`, and only owned arrays are written.
            unsafe { desc.write_volatile(ptr.add((i % self.capacity) as usize)) }
        }
    }

    fn slot_phys(&self, i: u16) -> u64 {
        self.data
            .as_ref()
            .map(|data| data.physical() + (i as usize * self.slot_size) as u64)
            .unwrap_or(0)
    }

    /// Copy `parts` into the next slot, fill its descriptor and advance the
    /// producer. Returns the new CPU index to write to CIDX.
    pub fn push(&mut self, parts: &[&[u8]]) -> Result<u16> {
        let len: usize = parts.iter().map(|part| part.len()).sum();
        // SD_LEN0 is 14 bits wide, so a larger slot cannot be described.
        let max = self.slot_size.min(DESC_MAX_LEN as usize);
        if self.data.is_none() || len > max {
            return Err(Error::FrameTooLarge {
                ring: self.index,
                len,
                max,
            });
        }
        if self.is_full() {
            return Err(Error::RingFull { ring: self.index });
        }

        let slot = self.producer;
        let offset = slot as usize * self.slot_size;
        let phys = self.slot_phys(slot);
        if let Some(data) = self.data.as_mut() {
            let mut cursor = offset;
            let bytes = data.as_mut_slice();
            for part in parts {
                bytes[cursor..cursor + part.len()].copy_from_slice(part);
                cursor += part.len();
            }
        }

        self.write_desc(slot, Descriptor::tx(phys, len as u32, true));
        self.producer = (self.producer + 1) % self.capacity;
        log::trace!(
            "mt7927: ring {} slot {} len {} cidx -> {}",
            self.index,
            slot,
            len,
            self.producer
        );
        Ok(self.producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::buffer::HostDma;

    #[test]
    fn test_tx_ring_starts_idle() {
        let dma = HostDma::new();
        let slot = RingSlot::new(16, RingRole::FirmwareDownload);
        let ring = Ring::new_tx(&dma, slot, 8, 64).unwrap();
        assert_eq!(ring.regs(), 0x7c02_4400);
        assert_ne!(ring.device_base(), 0);
        assert!((0..8).all(|i| ring.descriptor(i).is_done()));
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn test_push_fills_descriptor_and_slot() {
        let dma = HostDma::new();
        let mut ring = Ring::new_tx(&dma, RingSlot::new(15, RingRole::Command), 4, 64).unwrap();

        let cidx = ring.push(&[&[0xaa; 8], &[0xbb; 4]]).unwrap();
        assert_eq!(cidx, 1);

        let desc = ring.descriptor(0);
        assert_eq!(desc.len0(), 12);
        assert!(desc.is_last0());
        assert!(!desc.is_done());
        let bytes = dma.read_phys(desc.buffer_addr(), 12).unwrap();
        assert_eq!(&bytes[..8], &[0xaa; 8]);
        assert_eq!(&bytes[8..], &[0xbb; 4]);
    }

    #[test]
    fn test_push_detects_full_ring() {
        let dma = HostDma::new();
        let mut ring = Ring::new_tx(&dma, RingSlot::new(15, RingRole::Command), 4, 16).unwrap();
        for _ in 0..3 {
            ring.push(&[&[0; 4]]).unwrap();
        }
        assert!(ring.is_full());
        assert!(matches!(ring.push(&[&[0; 4]]), Err(Error::RingFull { ring: 15 })));

        ring.set_consumer(2);
        assert_eq!(ring.pending(), 1);
        assert_eq!(ring.push(&[&[0; 4]]).unwrap(), 0);
    }

    #[test]
    fn test_push_rejects_oversized_frame() {
        let dma = HostDma::new();
        let mut ring = Ring::new_tx(&dma, RingSlot::new(15, RingRole::Command), 4, 16).unwrap();
        assert!(matches!(
            ring.push(&[&[0; 17]]),
            Err(Error::FrameTooLarge { ring: 15, len: 17, max: 16 })
        ));
    }

    #[test]
    fn test_push_rejects_frame_past_descriptor_length() {
        let dma = HostDma::new();
        let size = 0x1_0020;
        let slot = RingSlot::new(16, RingRole::FirmwareDownload);
        let mut ring = Ring::new_tx(&dma, slot, 2, size).unwrap();

        let frame = vec![0x5a; size];
        assert!(matches!(
            ring.push(&[&frame[..]]),
            Err(Error::FrameTooLarge { ring: 16, len: 0x1_0020, max: 0x3fff })
        ));
        assert_eq!(ring.producer(), 0);

        let cidx = ring.push(&[&frame[..DESC_MAX_LEN as usize]]).unwrap();
        assert_eq!(cidx, 1);
        assert_eq!(ring.descriptor(0).len0(), DESC_MAX_LEN);
    }

    #[test]
    fn test_placeholder_shares_idle_descriptor() {
        let dma = HostDma::new();
        let mut idle = dma.allocate(DESC_SIZE).unwrap();
        idle.as_mut_slice().copy_from_slice(&Descriptor::IDLE.to_bytes());
        let idle = Arc::new(idle);

        let a = Ring::new_placeholder(RingSlot::new(3, RingRole::Unused), idle.clone());
        let b = Ring::new_placeholder(RingSlot::new(4, RingRole::Unused), idle.clone());
        assert_eq!(a.device_base(), b.device_base());
        assert_eq!(a.capacity(), 1);
        assert!(a.descriptor(0).is_done());
    }

    #[test]
    fn test_rx_ring_offers_buffers() {
        let dma = HostDma::new();
        let ring = Ring::new_rx(&dma, 0, 4, 2048).unwrap();
        assert_eq!(ring.regs(), 0x7c02_4500);
        assert_eq!(ring.producer(), 3);
        let desc = ring.descriptor(1);
        assert_eq!(desc.len0(), 2048);
        assert!(!desc.is_done());
        assert_ne!(desc.buf0, 0);
    }
}
