//! Per-device bring-up context
//!
//! One [`DeviceContext`] exists per attached chip. It owns the bus, the
//! translator, the DMA allocator and every ring, and only lets an operation
//! run from the state the previous one left behind.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::Config;
use crate::dma::{DmaAllocator, RingManager};
use crate::error::{Error, Result};
use crate::firmware::loader::{fwdl_slot_size, FirmwareLoader, LoadReport, COMMAND_SLOT_SIZE};
use crate::firmware::{PatchImage, RamImage};
use crate::io::RegisterBus;
use crate::notifier::{CompletionEvent, CompletionNotifier, IrqMap};
use crate::regs::{
    Lpctl, CB_INFRA_PCIE_REMAP_WF, CB_INFRA_PCIE_REMAP_WF_BT, CB_INFRA_PCIE_REMAP_WF_BT_VALUE,
    CB_INFRA_PCIE_REMAP_WF_VALUE, MT7927_CHIP_ID, MT_CHIP_ID, MT_CONN_ON_LPCTL, MT_CONN_ON_MISC,
    MT_DEAD, MT_MCU_ROMCODE_INDEX, MT_PCIE_MAC_PM, MT_PCIE_MAC_PM_L0S_DIS, MT_SWDEF_MODE,
    MT_SWDEF_NORMAL_MODE, MT_WFDMA0_GLO_CFG, MT_WFDMA0_HOST_INT_STA, MT_WFDMA0_MCU_INT_STA,
    MT_WFDMA0_RST, MT_WFDMA0_RST_DMASHDL_ALL_RST, MT_WFDMA0_RST_LOGIC_RST, MT_WFSYS_SW_RST_B,
    RING_CIDX, RING_DIDX,
};
use crate::sequencer::{BringupState, Sequencer};
use crate::translate::AddressTranslator;

/// Register snapshot for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub state: String,
    pub lpctl: u32,
    pub wfsys_reset: u32,
    pub romcode_index: u32,
    pub conn_on_misc: u32,
    pub glo_cfg: u32,
    pub mcu_int_sta: u32,
    pub host_int_sta: u32,
    pub rings: Vec<RingStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStatus {
    pub index: u8,
    pub cidx: u32,
    pub didx: u32,
}

pub struct DeviceContext<B: RegisterBus, A: DmaAllocator> {
    bus: B,
    alloc: A,
    translator: AddressTranslator,
    config: Config,
    state: BringupState,
    rings: Option<RingManager>,
    notifier: CompletionNotifier,
    last_load: Option<LoadReport>,
}

impl<B: RegisterBus, A: DmaAllocator> DeviceContext<B, A> {
    pub fn new(bus: B, alloc: A, config: Config) -> Result<Self> {
        config.validate()?;
        let irq_map = IrqMap::from_layout(&config.rings.layout, config.rings.rx_rings);
        let notifier = CompletionNotifier::new(irq_map);
        Ok(Self {
            bus,
            alloc,
            translator: AddressTranslator::new(),
            config,
            state: BringupState::Idle,
            rings: None,
            notifier,
            last_load: None,
        })
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    pub fn rings(&self) -> Option<&RingManager> {
        self.rings.as_ref()
    }

    pub fn notifier(&self) -> &CompletionNotifier {
        &self.notifier
    }

    pub fn last_load(&self) -> Option<LoadReport> {
        self.last_load
    }

    /// BAR0 offset a logical address resolves to.
    ///
    /// Remapped addresses resolve to the aperture window, which is only
    /// meaningful while the selector points at them; use [`DeviceContext::read`]
    /// to actually access them.
    pub fn translate(&self, addr: u32) -> Result<u32> {
        Ok(self.translator.translate(addr)?.offset)
    }

    pub fn read(&self, addr: u32) -> Result<u32> {
        self.translator.read(&self.bus, addr)
    }

    pub fn write(&self, addr: u32, value: u32) -> Result<()> {
        self.translator.write(&self.bus, addr, value)
    }

    fn require(&self, operation: &'static str, allowed: &[BringupState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                required: allowed[0],
                actual: self.state,
            })
        }
    }

    /// Record a failure and hand the error back.
    fn fail(&mut self, err: Error) -> Error {
        log::error!("mt7927: {} (state {:?})", err, self.state);
        self.state = BringupState::Failed;
        err
    }

    /// Chip id check and the PCIe-side setup the sequencer relies on.
    pub fn prepare_host_interface(&self) -> Result<()> {
        let chip_id = self.bus.read(MT_CHIP_ID);
        if chip_id == MT_DEAD {
            return Err(Error::DeviceHung { addr: MT_CHIP_ID });
        }
        if chip_id != MT7927_CHIP_ID {
            log::warn!(
                "mt7927: unexpected chip id {:#010x}, expected {:#010x}",
                chip_id,
                MT7927_CHIP_ID
            );
        } else {
            log::info!("mt7927: chip id {:#010x}", chip_id);
        }

        self.write(CB_INFRA_PCIE_REMAP_WF, CB_INFRA_PCIE_REMAP_WF_VALUE)?;
        self.write(CB_INFRA_PCIE_REMAP_WF_BT, CB_INFRA_PCIE_REMAP_WF_BT_VALUE)?;

        let rst = self.read(MT_WFDMA0_RST)?;
        let pulse = MT_WFDMA0_RST_LOGIC_RST | MT_WFDMA0_RST_DMASHDL_ALL_RST;
        self.write(MT_WFDMA0_RST, rst & !pulse)?;
        self.write(MT_WFDMA0_RST, rst | pulse)?;

        let pm = self.read(MT_PCIE_MAC_PM)?;
        self.write(MT_PCIE_MAC_PM, pm | MT_PCIE_MAC_PM_L0S_DIS)?;

        self.write(MT_SWDEF_MODE, MT_SWDEF_NORMAL_MODE)?;
        log::debug!("mt7927: host interface prepared");
        Ok(())
    }

    /// Bring the chip from power-on to [`BringupState::Ready`].
    pub fn sequence(&mut self) -> Result<BringupState> {
        self.require("sequence", &[BringupState::Idle])?;

        if let Err(err) = self.prepare_host_interface() {
            return Err(self.fail(err));
        }

        let mut sequencer = Sequencer::new(&self.bus, &self.translator, &self.config);
        let result = sequencer.run();
        self.state = sequencer.state();
        result
    }

    /// Allocate and program the TX ring space, then enable host interrupts.
    pub fn configure_rings(&mut self) -> Result<()> {
        self.require("configure_rings", &[BringupState::Ready])?;

        let mut rings = match RingManager::allocate(
            &self.alloc,
            &self.config.rings,
            COMMAND_SLOT_SIZE,
            fwdl_slot_size(&self.config.loader),
        ) {
            Ok(rings) => rings,
            Err(err) => return Err(self.fail(err)),
        };

        let result = rings
            .configure(&self.bus, &self.translator)
            .and_then(|()| self.notifier.enable(&self.bus, &self.translator));
        // Keep the rings even on failure; teardown releases them after DMA is stopped.
        self.rings = Some(rings);
        if let Err(err) = result {
            return Err(self.fail(err));
        }

        self.state = BringupState::RingsConfigured;
        Ok(())
    }

    pub fn configure_rx_rings(&mut self) -> Result<()> {
        self.require(
            "configure_rx_rings",
            &[BringupState::RingsConfigured, BringupState::FirmwareLoaded],
        )?;
        let Some(rings) = self.rings.as_mut() else {
            return Err(Error::InvalidState {
                operation: "configure_rx_rings",
                required: BringupState::RingsConfigured,
                actual: self.state,
            });
        };
        let result =
            rings.configure_rx(&self.alloc, &self.bus, &self.translator, &self.config.rings);
        result.map_err(|err| self.fail(err))
    }

    /// Push the ROM patch and RAM code. `patch` and `ram` are the raw file contents.
    pub fn load_firmware(&mut self, patch: &[u8], ram: &[u8]) -> Result<LoadReport> {
        self.require("load_firmware", &[BringupState::RingsConfigured])?;

        let result = self.run_loader(patch, ram);
        match result {
            Ok(report) => {
                self.last_load = Some(report);
                self.state = BringupState::FirmwareLoaded;
                Ok(report)
            }
            Err(err) => {
                if matches!(err, Error::Timeout { .. }) {
                    if let Ok(status) = self.status() {
                        log::error!("mt7927: download stalled, device status: {:?}", status);
                    }
                }
                Err(self.fail(err))
            }
        }
    }

    fn run_loader(&mut self, patch: &[u8], ram: &[u8]) -> Result<LoadReport> {
        let patch = PatchImage::parse(patch)?;
        let ram = RamImage::parse(ram)?;
        let rings = self.rings.as_mut().ok_or(Error::InvalidState {
            operation: "load_firmware",
            required: BringupState::RingsConfigured,
            actual: self.state,
        })?;
        FirmwareLoader::new(&self.bus, &self.translator, rings, &self.config.loader)
            .load(&patch, &ram)
    }

    /// Decode and acknowledge pending host interrupts.
    pub fn service_interrupts(&self) -> Result<Vec<CompletionEvent>> {
        match &self.rings {
            Some(rings) => self.notifier.service(&self.bus, &self.translator, rings),
            None => Ok(Vec::new()),
        }
    }

    pub fn status(&self) -> Result<DeviceStatus> {
        let rings = self
            .rings
            .iter()
            .flat_map(|rings| rings.tx_rings())
            .filter(|ring| ring.role().carries_traffic())
            .map(|ring| {
                Ok(RingStatus {
                    index: ring.index(),
                    cidx: self.read(ring.regs() + RING_CIDX)?,
                    didx: self.read(ring.regs() + RING_DIDX)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceStatus {
            state: format!("{:?}", self.state),
            lpctl: self.read(MT_CONN_ON_LPCTL)?,
            wfsys_reset: self.read(MT_WFSYS_SW_RST_B)?,
            romcode_index: self.read(MT_MCU_ROMCODE_INDEX)?,
            conn_on_misc: self.read(MT_CONN_ON_MISC)?,
            glo_cfg: self.read(MT_WFDMA0_GLO_CFG)?,
            mcu_int_sta: self.read(MT_WFDMA0_MCU_INT_STA)?,
            host_int_sta: self.read(MT_WFDMA0_HOST_INT_STA)?,
            rings,
        })
    }

    /// Stop DMA, release every ring and hand ownership back to the firmware.
    ///
    /// Best effort: register failures are logged and the context always ends
    /// up [`BringupState::Idle`].
    pub fn teardown(&mut self) {
        if let Some(mut rings) = self.rings.take() {
            if let Err(err) = rings.shutdown(&self.bus, &self.translator) {
                log::warn!("mt7927: failed to stop dma: {}", err);
            }
            if let Err(err) = self.notifier.disable(&self.bus, &self.translator) {
                log::warn!("mt7927: failed to disable interrupts: {}", err);
            }
        }

        if self.state != BringupState::Idle {
            self.return_ownership();
        }

        self.last_load = None;
        self.state = BringupState::Idle;
        log::info!("mt7927: torn down");
    }

    fn return_ownership(&self) {
        if self.write(MT_CONN_ON_LPCTL, Lpctl::HOST_SET_OWN.bits()).is_err() {
            return;
        }
        let bound = self.config.ownership;
        for _ in 0..bound.iterations {
            match self.read(MT_CONN_ON_LPCTL) {
                Ok(value)
                    if value != MT_DEAD
                        && Lpctl::from_bits_retain(value).contains(Lpctl::OWN_SYNC) =>
                {
                    log::debug!("mt7927: ownership returned to firmware");
                    return;
                }
                Ok(_) => thread::sleep(Duration::from_micros(bound.interval_us)),
                Err(_) => break,
            }
        }
        log::warn!("mt7927: firmware did not take ownership back");
    }
}

impl<B: RegisterBus, A: DmaAllocator> Drop for DeviceContext<B, A> {
    fn drop(&mut self) {
        if self.state != BringupState::Idle || self.rings.is_some() {
            self.teardown();
        }
    }
}
