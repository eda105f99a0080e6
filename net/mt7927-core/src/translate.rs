//! Logical chip address to BAR0 offset translation
//!
//! The chip spreads its control registers over several physical address
//! spaces. Low addresses are plain BAR0 offsets, a static table covers the
//! well-known blocks, and everything else is reached through one of two remap
//! apertures whose target is chosen by writing a selector register.
//!
//! Only one aperture exists per level, so a remapped access holds the
//! translator lock from programming the selector until the previous selector
//! value has been written back.

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::io::RegisterBus;
use crate::regs::{
    field_prep, RegisterRegion, BAR0_SIZE, DIRECT_THRESHOLD, FIXED_MAP, MT_HIF_REMAP_BASE_L1,
    MT_HIF_REMAP_BASE_L2, MT_HIF_REMAP_L1, MT_HIF_REMAP_L1_MASK, MT_HIF_REMAP_L1_OFFSET,
    MT_HIF_REMAP_L2, REMAP_L1_RANGES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapLevel {
    L1,
    L2,
}

/// How a logical address reaches BAR0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Fixed(RegisterRegion),
    Remap(RemapLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub route: Route,
    /// BAR0 offset to access. For remapped routes this is only valid while the
    /// aperture is programmed, see [`AddressTranslator::map`].
    pub offset: u32,
}

/// Selector contents saved before a remapped access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapWindow {
    pub level: RemapLevel,
    pub current_base: u32,
}

impl RemapWindow {
    fn selector(&self) -> u32 {
        match self.level {
            RemapLevel::L1 => MT_HIF_REMAP_L1,
            RemapLevel::L2 => MT_HIF_REMAP_L2,
        }
    }

    fn push<B: RegisterBus + ?Sized>(bus: &B, level: RemapLevel) -> Self {
        let mut window = Self {
            level,
            current_base: 0,
        };
        window.current_base = bus.read(window.selector());
        window
    }

    fn pop<B: RegisterBus + ?Sized>(&self, bus: &B) {
        bus.write(self.selector(), self.current_base);
        bus.read(self.selector());
    }
}

/// Counters kept under the aperture lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemapStats {
    pub l1_accesses: u64,
    pub l2_accesses: u64,
}

pub struct AddressTranslator {
    regions: &'static [RegisterRegion],
    apertures: Mutex<RemapStats>,
}

impl AddressTranslator {
    pub fn new() -> Self {
        Self::with_regions(&FIXED_MAP)
    }

    pub fn with_regions(regions: &'static [RegisterRegion]) -> Self {
        Self {
            regions,
            apertures: Mutex::new(RemapStats::default()),
        }
    }

    pub fn regions(&self) -> &'static [RegisterRegion] {
        self.regions
    }

    /// Resolve `addr` without touching the hardware.
    pub fn translate(&self, addr: u32) -> Result<Translation> {
        if addr % 4 != 0 {
            return Err(Error::AddressOutOfRange(addr));
        }

        if addr < DIRECT_THRESHOLD {
            return Ok(Translation {
                route: Route::Direct,
                offset: addr,
            });
        }

        if let Some(region) = self.regions.iter().find(|r| r.contains(addr)) {
            let offset = region.local_base + (addr - region.physical_base);
            if offset >= BAR0_SIZE {
                return Err(Error::AddressOutOfRange(addr));
            }
            return Ok(Translation {
                route: Route::Fixed(*region),
                offset,
            });
        }

        if in_l1_range(addr) {
            Ok(Translation {
                route: Route::Remap(RemapLevel::L1),
                offset: MT_HIF_REMAP_BASE_L1 + (addr & MT_HIF_REMAP_L1_OFFSET),
            })
        } else {
            Ok(Translation {
                route: Route::Remap(RemapLevel::L2),
                offset: MT_HIF_REMAP_BASE_L1,
            })
        }
    }

    /// Resolve `addr` and program the aperture it needs.
    ///
    /// The returned guard restores the selectors when dropped.
    pub fn map<'a, B: RegisterBus + ?Sized>(
        &'a self,
        bus: &'a B,
        addr: u32,
    ) -> Result<Mapped<'a, B>> {
        let translation = self.translate(addr)?;
        let level = match translation.route {
            Route::Remap(level) => level,
            Route::Direct | Route::Fixed(_) => {
                return Ok(Mapped {
                    bus,
                    offset: translation.offset,
                    remap: None,
                })
            }
        };

        let mut stats = self.apertures.lock();
        let l1 = RemapWindow::push(bus, RemapLevel::L1);
        let mut saved = [l1, l1];
        let depth;

        match level {
            RemapLevel::L1 => {
                stats.l1_accesses += 1;
                bus.rmw(
                    MT_HIF_REMAP_L1,
                    MT_HIF_REMAP_L1_MASK,
                    field_prep(MT_HIF_REMAP_L1_MASK, addr >> 16),
                );
                bus.read(MT_HIF_REMAP_L1);
                depth = 1;
            }
            RemapLevel::L2 => {
                stats.l2_accesses += 1;
                saved[1] = RemapWindow::push(bus, RemapLevel::L2);
                bus.rmw(
                    MT_HIF_REMAP_L1,
                    MT_HIF_REMAP_L1_MASK,
                    field_prep(MT_HIF_REMAP_L1_MASK, MT_HIF_REMAP_BASE_L2 >> 16),
                );
                bus.write(MT_HIF_REMAP_L2, addr);
                bus.read(MT_HIF_REMAP_L2);
                depth = 2;
            }
        }

        Ok(Mapped {
            bus,
            offset: translation.offset,
            remap: Some(Aperture {
                _lock: stats,
                saved,
                depth,
            }),
        })
    }

    pub fn read<B: RegisterBus + ?Sized>(&self, bus: &B, addr: u32) -> Result<u32> {
        Ok(self.map(bus, addr)?.read())
    }

    pub fn write<B: RegisterBus + ?Sized>(&self, bus: &B, addr: u32, value: u32) -> Result<()> {
        self.map(bus, addr)?.write(value);
        Ok(())
    }

    pub fn stats(&self) -> RemapStats {
        *self.apertures.lock()
    }
}

impl Default for AddressTranslator {
    fn default() -> Self {
        Self::new()
    }
}

fn in_l1_range(addr: u32) -> bool {
    REMAP_L1_RANGES
        .iter()
        .any(|&(start, end)| addr >= start && addr < end)
}

struct Aperture<'a> {
    _lock: MutexGuard<'a, RemapStats>,
    saved: [RemapWindow; 2],
    depth: usize,
}

/// A logical register made reachable in BAR0.
pub struct Mapped<'a, B: RegisterBus + ?Sized> {
    bus: &'a B,
    offset: u32,
    remap: Option<Aperture<'a>>,
}

impl<B: RegisterBus + ?Sized> Mapped<'_, B> {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_remapped(&self) -> bool {
        self.remap.is_some()
    }

    pub fn read(&self) -> u32 {
        self.bus.read(self.offset)
    }

    pub fn write(&self, value: u32) {
        self.bus.write(self.offset, value)
    }
}

impl<B: RegisterBus + ?Sized> Drop for Mapped<'_, B> {
    fn drop(&mut self) {
        if let Some(aperture) = &self.remap {
            // L2 is nested inside L1, unwind in reverse.
            for window in aperture.saved[..aperture.depth].iter().rev() {
                window.pop(self.bus);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        regs: Mutex<HashMap<u32, u32>>,
        log: Mutex<Vec<(bool, u32, u32)>>,
    }

    impl RegisterBus for Recorder {
        fn read(&self, offset: u32) -> u32 {
            let value = self.regs.lock().get(&offset).copied().unwrap_or(0);
            self.log.lock().push((false, offset, value));
            value
        }

        fn write(&self, offset: u32, value: u32) {
            self.regs.lock().insert(offset, value);
            self.log.lock().push((true, offset, value));
        }
    }

    #[test]
    fn test_direct_passthrough() {
        let t = AddressTranslator::new();
        assert_eq!(t.translate(0x1000).unwrap().offset, 0x1000);
        assert_eq!(t.translate(0x1000).unwrap().route, Route::Direct);
    }

    #[test]
    fn test_fixed_map_wfdma() {
        let t = AddressTranslator::new();
        let tr = t.translate(0x7c02_4000).unwrap();
        assert_eq!(tr.offset, 0xd4000);
        assert!(matches!(tr.route, Route::Fixed(r) if r.physical_base == 0x7c02_0000));
    }

    #[test]
    fn test_fixed_map_romcode_index() {
        let t = AddressTranslator::new();
        assert_eq!(t.translate(0x8102_1604).unwrap().offset, 0xc1604);
        assert_eq!(t.translate(0x7c06_0010).unwrap().offset, 0xe0010);
    }

    #[test]
    fn test_route_selection() {
        let t = AddressTranslator::new();
        let l1 = t.translate(0x7c11_0010).unwrap();
        assert_eq!(l1.route, Route::Remap(RemapLevel::L1));
        assert_eq!(l1.offset, 0x13_0010);

        let l2 = t.translate(0x8800_0004).unwrap();
        assert_eq!(l2.route, Route::Remap(RemapLevel::L2));
        assert_eq!(l2.offset, 0x13_0000);
    }

    #[test]
    fn test_out_of_range() {
        let t = AddressTranslator::new();
        assert!(matches!(t.translate(0xffff_ffff), Err(Error::AddressOutOfRange(0xffff_ffff))));
        // Large remap region maps past the end of BAR0.
        assert!(matches!(t.translate(0x7cf0_0000), Err(Error::AddressOutOfRange(_))));
    }

    #[test]
    fn test_l1_access_restores_selector() {
        let bus = Recorder::default();
        bus.write(MT_HIF_REMAP_L1, 0x1234_0000);
        bus.write(0x13_0010, 0x55);
        bus.log.lock().clear();

        let t = AddressTranslator::new();
        let value = t.read(&bus, 0x7c11_0010).unwrap();
        assert_eq!(value, 0x55);
        assert_eq!(bus.regs.lock()[&MT_HIF_REMAP_L1], 0x1234_0000);

        let log = bus.log.lock().clone();
        // Selector written with the upper half, then read back before the window access.
        let program = log
            .iter()
            .position(|&(w, off, v)| w && off == MT_HIF_REMAP_L1 && v == 0x7c11_0000)
            .unwrap();
        assert_eq!(log[program + 1], (false, MT_HIF_REMAP_L1, 0x7c11_0000));
        assert_eq!(log[program + 2].1, 0x13_0010);
        assert_eq!(t.stats().l1_accesses, 1);
    }

    #[test]
    fn test_l2_access_restores_both_selectors() {
        let bus = Recorder::default();
        bus.write(MT_HIF_REMAP_L1, 0x0001_0000);
        bus.write(MT_HIF_REMAP_L2, 0x0000_0042);

        let t = AddressTranslator::new();
        t.write(&bus, 0x8800_0004, 0x99).unwrap();

        let log = bus.log.lock().clone();
        assert!(log.contains(&(true, MT_HIF_REMAP_L1, 0x1850_0000)));
        assert!(log.contains(&(true, MT_HIF_REMAP_L2, 0x8800_0004)));
        assert!(log.contains(&(true, 0x13_0000, 0x99)));
        assert_eq!(bus.regs.lock()[&MT_HIF_REMAP_L1], 0x0001_0000);
        assert_eq!(bus.regs.lock()[&MT_HIF_REMAP_L2], 0x0000_0042);
    }

    #[test]
    fn test_fixed_access_does_not_touch_selector() {
        let bus = Recorder::default();
        let t = AddressTranslator::new();
        t.write(&bus, 0x7c02_4208, 1).unwrap();
        assert!(bus.log.lock().iter().all(|&(_, off, _)| off != MT_HIF_REMAP_L1));
        assert_eq!(bus.regs.lock()[&0xd4208], 1);
    }
}
