//! Device-visible memory

use std::alloc::{self, Layout};
use std::any::Any;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 4096;

/// Source of physically contiguous, device-visible memory.
pub trait DmaAllocator: Send + Sync {
    /// Allocate `size` zeroed bytes, page aligned.
    fn allocate(&self, size: usize) -> Result<DmaBuffer>;
}

impl<A: DmaAllocator + ?Sized> DmaAllocator for Arc<A> {
    fn allocate(&self, size: usize) -> Result<DmaBuffer> {
        (**self).allocate(size)
    }
}

/// DMA buffer
pub struct DmaBuffer {
    /// CPU mapping
    virt: NonNull<u8>,
    /// Bus address the device uses
    phys: u64,
    /// Size in bytes
    len: usize,
    /// Keeps the mapping alive
    _owner: Arc<dyn Any + Send + Sync>,
}

impl DmaBuffer {
    /// # Safety
    ///
    /// `virt` must map `len` bytes at bus address `phys` for as long as `owner` lives.
    pub unsafe fn from_raw(
        virt: NonNull<u8>,
        phys: u64,
        len: usize,
        owner: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            virt,
            phys,
            len,
            _owner: owner,
        }
    }

    pub fn physical(&self) -> u64 {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: mapping is valid for `len` bytes while `_owner` lives.
        unsafe { std::slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` gives exclusive CPU access.
        unsafe { std::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }
}

unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl std::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &self.len)
            .finish()
    }
}

struct HostRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HostRegion {}
unsafe impl Sync for HostRegion {}

impl Drop for HostRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `HostDma::allocate` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Heap-backed allocator with synthetic 32-bit bus addresses.
///
/// Used with [`crate::sim::SimDevice`], which resolves bus addresses back to
/// memory through [`HostDma::read_phys`] and [`HostDma::write_phys`].
pub struct HostDma {
    next_phys: AtomicU64,
    regions: Mutex<BTreeMap<u64, (usize, Weak<HostRegion>)>>,
}

impl HostDma {
    pub const BASE: u64 = 0x1000_0000;

    pub fn new() -> Self {
        Self {
            next_phys: AtomicU64::new(Self::BASE),
            regions: Mutex::new(BTreeMap::new()),
        }
    }

    fn lookup(&self, phys: u64, len: usize) -> Option<(Arc<HostRegion>, usize)> {
        let regions = self.regions.lock();
        let (&start, (size, region)) = regions.range(..=phys).next_back()?;
        let offset = (phys - start) as usize;
        if offset.checked_add(len)? > *size {
            return None;
        }
        Some((region.upgrade()?, offset))
    }

    /// Copy `len` bytes at bus address `phys`, as the device would read them.
    pub fn read_phys(&self, phys: u64, len: usize) -> Option<Vec<u8>> {
        let (region, offset) = self.lookup(phys, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: lookup checked the range against the live region.
        unsafe {
            for (i, byte) in out.iter_mut().enumerate() {
                *byte = core::ptr::read_volatile(region.ptr.as_ptr().add(offset + i));
            }
        }
        Some(out)
    }

    /// Store `data` at bus address `phys`, as a device write-back would.
    pub fn write_phys(&self, phys: u64, data: &[u8]) -> bool {
        let Some((region, offset)) = self.lookup(phys, data.len()) else {
            return false;
        };
        // SAFETY: lookup checked the range against the live region.
        unsafe {
            for (i, byte) in data.iter().enumerate() {
                core::ptr::write_volatile(region.ptr.as_ptr().add(offset + i), *byte);
            }
        }
        true
    }

    /// Number of allocations still alive.
    pub fn live_allocations(&self) -> usize {
        self.regions
            .lock()
            .values()
            .filter(|(_, region)| region.strong_count() > 0)
            .count()
    }
}

impl Default for HostDma {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HostDma {
    fn allocate(&self, size: usize) -> Result<DmaBuffer> {
        if size == 0 {
            return Err(Error::DmaAllocation {
                size,
                reason: "zero-sized allocation",
            });
        }

        let aligned = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let layout = Layout::from_size_align(aligned, PAGE_SIZE).map_err(|_| Error::DmaAllocation {
            size,
            reason: "invalid layout",
        })?;

        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(Error::DmaAllocation {
            size,
            reason: "out of memory",
        })?;
        let region = Arc::new(HostRegion { ptr, layout });

        // Leave an unmapped page between regions so overruns do not alias.
        let phys = self
            .next_phys
            .fetch_add((aligned + PAGE_SIZE) as u64, Ordering::Relaxed);
        if phys + aligned as u64 > u32::MAX as u64 {
            return Err(Error::DmaAllocation {
                size,
                reason: "bus address space exhausted",
            });
        }

        let mut regions = self.regions.lock();
        regions.retain(|_, (_, weak)| weak.strong_count() > 0);
        regions.insert(phys, (aligned, Arc::downgrade(&region)));
        drop(regions);

        log::trace!("mt7927: host dma {:#x} bytes at {:#x}", aligned, phys);

        // SAFETY: `region` owns `aligned` bytes at `ptr` and is kept alive by the buffer.
        Ok(unsafe { DmaBuffer::from_raw(ptr, phys, size, region) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_dma_phys_access() {
        let dma = HostDma::new();
        let mut buf = dma.allocate(64).unwrap();
        assert_eq!(buf.physical(), HostDma::BASE);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.as_mut_slice()[4..8].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(dma.read_phys(buf.physical() + 4, 4).unwrap(), vec![1, 2, 3, 4]);

        assert!(dma.write_phys(buf.physical(), &[9]));
        assert_eq!(buf.as_slice()[0], 9);
    }

    #[test]
    fn test_host_dma_rejects_unmapped() {
        let dma = HostDma::new();
        let buf = dma.allocate(16).unwrap();
        // Guard page after the first region.
        assert!(dma.read_phys(buf.physical() + PAGE_SIZE as u64, 4).is_none());
        assert!(dma.read_phys(HostDma::BASE - 4, 4).is_none());
    }

    #[test]
    fn test_host_dma_releases_on_drop() {
        let dma = HostDma::new();
        let buf = dma.allocate(16).unwrap();
        let phys = buf.physical();
        assert_eq!(dma.live_allocations(), 1);
        drop(buf);
        assert_eq!(dma.live_allocations(), 0);
        assert!(dma.read_phys(phys, 4).is_none());
    }
}
