//! WFDMA0 ring configuration
//!
//! The DMA engine scans the BASE register of every ring in its ring space once
//! enabled, so every index gets a valid descriptor array even when it never
//! carries traffic. Ring registers only latch while CLK_GATE_DIS is set and
//! both DMA directions are off; [`RingManager::configure`] orders its writes
//! around that.

use std::sync::Arc;

use super::buffer::{DmaAllocator, DmaBuffer};
use super::desc::{Descriptor, DESC_SIZE};
use super::ring::{Ring, RingRole};
use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::io::RegisterBus;
use crate::regs::{
    GloCfg, MT_HOST2MCU_SW_INT_SET, MT_HOST2MCU_WAKE, MT_WFDMA0_GLO_CFG, MT_WFDMA0_RST_DRX_PTR,
    MT_WFDMA0_RST_DTX_PTR, RING_BASE, RING_CIDX, RING_CNT, RING_DIDX, RST_ALL_RINGS,
};
use crate::translate::AddressTranslator;

pub struct RingManager {
    tx: Vec<Ring>,
    rx: Vec<Ring>,
    /// Idle descriptor shared by every placeholder ring
    idle: Arc<DmaBuffer>,
    tx_configured: bool,
    rx_configured: bool,
}

impl RingManager {
    /// Allocate the TX ring space described by `config.layout`.
    ///
    /// Traffic rings get one slot buffer per descriptor, sized for the largest
    /// frame they will carry: `command_frame` for the command ring,
    /// `fwdl_frame` for firmware download.
    pub fn allocate<A: DmaAllocator + ?Sized>(
        alloc: &A,
        config: &RingConfig,
        command_frame: usize,
        fwdl_frame: usize,
    ) -> Result<Self> {
        let mut idle = alloc.allocate(DESC_SIZE)?;
        idle.as_mut_slice().copy_from_slice(&Descriptor::IDLE.to_bytes());
        let idle = Arc::new(idle);

        let mut tx = Vec::with_capacity(config.layout.len());
        for slot in &config.layout {
            let ring = match slot.role {
                RingRole::Command => {
                    Ring::new_tx(alloc, *slot, config.command_capacity, command_frame)?
                }
                RingRole::FirmwareDownload => {
                    Ring::new_tx(alloc, *slot, config.fwdl_capacity, fwdl_frame)?
                }
                RingRole::Data => Ring::new_tx(alloc, *slot, config.data_capacity, 0)?,
                RingRole::Unused => Ring::new_placeholder(*slot, idle.clone()),
            };
            tx.push(ring);
        }

        log::info!(
            "mt7927: allocated {} tx rings ({} carry traffic)",
            tx.len(),
            tx.iter().filter(|r| r.role().carries_traffic()).count()
        );

        Ok(Self {
            tx,
            rx: Vec::new(),
            idle,
            tx_configured: false,
            rx_configured: false,
        })
    }

    /// Program every TX ring and enable TX DMA.
    pub fn configure<B: RegisterBus + ?Sized>(
        &mut self,
        bus: &B,
        translator: &AddressTranslator,
    ) -> Result<()> {
        let wr = |addr: u32, value: u32| translator.write(bus, addr, value);

        // 1. Quiesce, then open the clock gate with DMA still off.
        wr(MT_WFDMA0_GLO_CFG, 0)?;
        wr(MT_WFDMA0_GLO_CFG, GloCfg::CLK_GATE_DIS.bits())?;
        log::debug!("mt7927: GLO_CFG cleared, clock gate disabled");

        // 2. Every ring gets a non-null base, traffic or not.
        for ring in &mut self.tx {
            let base = device_base32(ring)?;
            let regs = ring.regs();
            wr(regs + RING_BASE, base)?;
            wr(regs + RING_CNT, ring.capacity() as u32)?;
            wr(regs + RING_CIDX, 0)?;
            wr(regs + RING_DIDX, 0)?;
            ring.reset_indices();
        }

        // 3. Prefetch only for the traffic rings.
        for ring in self.tx.iter().filter(|r| r.role().carries_traffic()) {
            wr(ring.ext_ctrl(), ring.prefetch())?;
        }

        // 4. Bulk pointer reset.
        wr(MT_WFDMA0_RST_DTX_PTR, RST_ALL_RINGS)?;

        // 5. Static configuration, both directions still off.
        wr(MT_WFDMA0_GLO_CFG, GloCfg::SETUP.bits())?;

        // 6. Nothing may have been dropped by the gate.
        self.verify_tx(bus, translator)?;

        // 7. TX only; RX waits for configure_rx.
        wr(MT_WFDMA0_GLO_CFG, (GloCfg::SETUP | GloCfg::TX_DMA_EN).bits())?;
        self.tx_configured = true;

        log::info!(
            "mt7927: tx rings configured, GLO_CFG={:#010x}",
            translator.read(bus, MT_WFDMA0_GLO_CFG)?
        );
        Ok(())
    }

    fn verify_tx<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        translator: &AddressTranslator,
    ) -> Result<()> {
        for ring in &self.tx {
            let written = device_base32(ring)?;
            let readback = translator.read(bus, ring.regs() + RING_BASE)?;
            if readback == 0 {
                log::error!("mt7927: ring {} BASE did not latch", ring.index());
                return Err(Error::RingConfigFailure {
                    ring: ring.index(),
                    register: "BASE",
                    written,
                    readback,
                });
            }
            if readback != written {
                log::warn!(
                    "mt7927: ring {} BASE reads {:#010x}, wrote {:#010x}",
                    ring.index(),
                    readback,
                    written
                );
            }

            if ring.role().carries_traffic() {
                let written = ring.prefetch();
                let readback = translator.read(bus, ring.ext_ctrl())?;
                if readback == 0 {
                    log::error!("mt7927: ring {} EXT_CTRL did not latch", ring.index());
                    return Err(Error::RingConfigFailure {
                        ring: ring.index(),
                        register: "EXT_CTRL",
                        written,
                        readback,
                    });
                }
            }
        }
        Ok(())
    }

    /// Bring up the RX rings and only then enable RX DMA.
    pub fn configure_rx<A, B>(
        &mut self,
        alloc: &A,
        bus: &B,
        translator: &AddressTranslator,
        config: &RingConfig,
    ) -> Result<()>
    where
        A: DmaAllocator + ?Sized,
        B: RegisterBus + ?Sized,
    {
        let wr = |addr: u32, value: u32| translator.write(bus, addr, value);

        let mut rx = Vec::with_capacity(config.rx_rings as usize);
        for index in 0..config.rx_rings {
            rx.push(Ring::new_rx(alloc, index, config.rx_capacity, config.rx_buf_size)?);
        }

        // Ring registers do not latch while either direction is enabled.
        wr(MT_WFDMA0_GLO_CFG, GloCfg::SETUP.bits())?;

        for ring in &rx {
            let regs = ring.regs();
            wr(regs + RING_BASE, device_base32(ring)?)?;
            wr(regs + RING_CNT, ring.capacity() as u32)?;
            wr(ring.ext_ctrl(), ring.prefetch())?;
        }
        wr(MT_WFDMA0_RST_DRX_PTR, RST_ALL_RINGS)?;
        for ring in &mut rx {
            ring.reset_indices();
            wr(ring.regs() + RING_CIDX, ring.producer() as u32)?;
        }

        for ring in &rx {
            let written = device_base32(ring)?;
            let readback = translator.read(bus, ring.regs() + RING_BASE)?;
            if readback == 0 {
                // Leave TX running as it was; RX stays off.
                wr(MT_WFDMA0_GLO_CFG, (GloCfg::SETUP | GloCfg::TX_DMA_EN).bits())?;
                return Err(Error::RingConfigFailure {
                    ring: ring.index(),
                    register: "RX BASE",
                    written,
                    readback,
                });
            }
        }

        wr(MT_WFDMA0_GLO_CFG, (GloCfg::SETUP | GloCfg::DMA_EN).bits())?;
        self.rx = rx;
        self.rx_configured = true;
        log::info!("mt7927: {} rx rings configured, rx dma enabled", self.rx.len());
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.tx_configured
    }

    pub fn rx_configured(&self) -> bool {
        self.rx_configured
    }

    pub fn tx_rings(&self) -> &[Ring] {
        &self.tx
    }

    pub fn rx_rings(&self) -> &[Ring] {
        &self.rx
    }

    pub fn ring(&self, index: u8) -> Option<&Ring> {
        self.tx.iter().find(|r| r.index() == index)
    }

    pub fn ring_with_role(&self, role: RingRole) -> Option<&Ring> {
        self.tx.iter().find(|r| r.role() == role)
    }

    fn ring_with_role_mut(&mut self, role: RingRole) -> Option<&mut Ring> {
        self.tx.iter_mut().find(|r| r.role() == role)
    }

    /// Queue one frame on the ring with `role`, publish CIDX and ring the doorbell.
    pub fn kick<B: RegisterBus + ?Sized>(
        &mut self,
        bus: &B,
        translator: &AddressTranslator,
        role: RingRole,
        parts: &[&[u8]],
    ) -> Result<u16> {
        let ring = self
            .ring_with_role_mut(role)
            .ok_or_else(|| Error::InvalidConfig(format!("no {:?} ring", role)))?;
        let cidx = ring.push(parts)?;
        translator.write(bus, ring.regs() + RING_CIDX, cidx as u32)?;
        // The MCU supervisor sleeps between commands and will not look at CIDX on its own.
        translator.write(bus, MT_HOST2MCU_SW_INT_SET, MT_HOST2MCU_WAKE)?;
        Ok(cidx)
    }

    /// Read DIDX of the ring with `role` into its shadow consumer index.
    pub fn sync_consumer<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        translator: &AddressTranslator,
        role: RingRole,
    ) -> Result<u32> {
        let ring = self
            .ring_with_role(role)
            .ok_or_else(|| Error::InvalidConfig(format!("no {:?} ring", role)))?;
        let didx = translator.read(bus, ring.regs() + RING_DIDX)?;
        ring.set_consumer(didx);
        Ok(didx)
    }

    /// Stop both DMA directions. Rings are released when the manager is dropped.
    pub fn shutdown<B: RegisterBus + ?Sized>(
        &mut self,
        bus: &B,
        translator: &AddressTranslator,
    ) -> Result<()> {
        translator.write(bus, MT_WFDMA0_GLO_CFG, 0)?;
        self.tx_configured = false;
        self.rx_configured = false;
        log::debug!("mt7927: dma stopped");
        Ok(())
    }

    pub fn idle_descriptor_base(&self) -> u64 {
        self.idle.physical()
    }
}

fn device_base32(ring: &Ring) -> Result<u32> {
    u32::try_from(ring.device_base()).map_err(|_| Error::DmaAllocation {
        size: ring.capacity() as usize * DESC_SIZE,
        reason: "descriptor ring above 32-bit bus space",
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::Config;
    use crate::dma::buffer::HostDma;

    const GLO_CFG: u32 = 0xd_4208;

    /// Register file that drops ring writes unless the clock gate is open and DMA is off.
    #[derive(Default)]
    struct GatedRegs {
        regs: Mutex<HashMap<u32, u32>>,
        dropped: Mutex<Vec<u32>>,
    }

    impl GatedRegs {
        fn gated(offset: u32) -> bool {
            let ring_ctrl = (0xd_4300..0xd_4700).contains(&offset);
            let is_index = (0xd_4300..0xd_4600).contains(&offset) && offset % 0x10 >= 0x8;
            ring_ctrl && !is_index
        }
    }

    impl RegisterBus for GatedRegs {
        fn read(&self, offset: u32) -> u32 {
            self.regs.lock().get(&offset).copied().unwrap_or(0)
        }

        fn write(&self, offset: u32, value: u32) {
            let mut regs = self.regs.lock();
            if Self::gated(offset) {
                let glo = GloCfg::from_bits_retain(regs.get(&GLO_CFG).copied().unwrap_or(0));
                if !glo.contains(GloCfg::CLK_GATE_DIS) || glo.intersects(GloCfg::DMA_EN) {
                    self.dropped.lock().push(offset);
                    return;
                }
            }
            regs.insert(offset, value);
        }
    }

    fn manager(dma: &HostDma, config: &Config) -> RingManager {
        RingManager::allocate(dma, &config.rings, 128, 4096 + 32).unwrap()
    }

    #[test]
    fn test_every_ring_gets_a_base() {
        let dma = HostDma::new();
        let config = Config::default();
        let bus = GatedRegs::default();
        let translator = AddressTranslator::new();
        let mut rings = manager(&dma, &config);

        rings.configure(&bus, &translator).unwrap();

        assert!(bus.dropped.lock().is_empty());
        assert_eq!(rings.tx_rings().len(), 17);
        for ring in rings.tx_rings() {
            let base = translator.read(&bus, ring.regs() + RING_BASE).unwrap();
            let cnt = translator.read(&bus, ring.regs() + RING_CNT).unwrap();
            assert_ne!(base, 0, "ring {}", ring.index());
            assert!(cnt > 0, "ring {}", ring.index());
        }
        assert_eq!(
            translator.read(&bus, crate::regs::tx_ring_ext_ctrl(16)).unwrap(),
            0x0540_0004
        );
        assert_eq!(
            translator.read(&bus, MT_WFDMA0_GLO_CFG).unwrap(),
            (GloCfg::SETUP | GloCfg::TX_DMA_EN).bits()
        );
    }

    #[test]
    fn test_unused_rings_share_idle_descriptor() {
        let dma = HostDma::new();
        let rings = manager(&dma, &Config::default());
        let idle = rings.idle_descriptor_base();
        assert_eq!(rings.ring(7).unwrap().device_base(), idle);
        assert_eq!(rings.ring(7).unwrap().capacity(), 1);
        assert_ne!(rings.ring(15).unwrap().device_base(), idle);
        assert_eq!(rings.ring(0).unwrap().capacity(), 2048);
    }

    #[test]
    fn test_gate_closed_is_detected() {
        // A bus that ignores GLO_CFG keeps the clock gate closed.
        struct StuckGate(GatedRegs);

        impl RegisterBus for StuckGate {
            fn read(&self, offset: u32) -> u32 {
                self.0.read(offset)
            }

            fn write(&self, offset: u32, value: u32) {
                if offset != GLO_CFG {
                    self.0.write(offset, value);
                }
            }
        }

        let dma = HostDma::new();
        let bus = StuckGate(GatedRegs::default());
        let translator = AddressTranslator::new();
        let mut rings = manager(&dma, &Config::default());

        let err = rings.configure(&bus, &translator).unwrap_err();
        assert!(matches!(
            err,
            Error::RingConfigFailure { ring: 0, register: "BASE", readback: 0, .. }
        ));
        assert!(!rings.is_configured());
    }

    #[test]
    fn test_kick_rings_doorbell() {
        let dma = HostDma::new();
        let bus = GatedRegs::default();
        let translator = AddressTranslator::new();
        let mut rings = manager(&dma, &Config::default());
        rings.configure(&bus, &translator).unwrap();

        let cidx = rings
            .kick(&bus, &translator, RingRole::Command, &[&[0u8; 64]])
            .unwrap();
        assert_eq!(cidx, 1);
        assert_eq!(translator.read(&bus, crate::regs::tx_ring(15) + RING_CIDX).unwrap(), 1);
        assert_eq!(translator.read(&bus, MT_HOST2MCU_SW_INT_SET).unwrap(), MT_HOST2MCU_WAKE);

        bus.write(0xd_4300 + 15 * 0x10 + 0xc, 1);
        assert_eq!(rings.sync_consumer(&bus, &translator, RingRole::Command).unwrap(), 1);
        assert_eq!(rings.ring(15).unwrap().pending(), 0);
    }

    #[test]
    fn test_rx_enable_comes_last() {
        let dma = HostDma::new();
        let config = Config::default();
        let bus = GatedRegs::default();
        let translator = AddressTranslator::new();
        let mut rings = manager(&dma, &config);
        rings.configure(&bus, &translator).unwrap();
        rings.configure_rx(&dma, &bus, &translator, &config.rings).unwrap();

        assert!(rings.rx_configured());
        assert_eq!(rings.rx_rings().len(), 4);
        for ring in rings.rx_rings() {
            assert_ne!(translator.read(&bus, ring.regs() + RING_BASE).unwrap(), 0);
            assert_eq!(
                translator.read(&bus, ring.regs() + RING_CIDX).unwrap(),
                config.rings.rx_capacity as u32 - 1
            );
        }
        assert_eq!(
            translator.read(&bus, MT_WFDMA0_GLO_CFG).unwrap(),
            (GloCfg::SETUP | GloCfg::DMA_EN).bits()
        );
    }
}
