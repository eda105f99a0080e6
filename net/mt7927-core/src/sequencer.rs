//! Ownership handshake, WFSYS reset and boot ROM readiness
//!
//! The chip comes out of PCIe enumeration owned by its own power management.
//! The host has to bounce ownership through the firmware once, pulse the WiFi
//! subsystem reset and then wait for the boot ROM to park in its download-idle
//! loop before any ring may be touched.

use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::RegisterBus;
use crate::poll::PollBound;
use crate::regs::{
    Lpctl, WfsysReset, MCU_IDLE, MCU_IDLE_MASK, MT_CONN_ON_LPCTL, MT_DEAD, MT_MCU_ROMCODE_INDEX,
    MT_WFSYS_SW_RST_B,
};
use crate::translate::AddressTranslator;

/// Where a device is in its bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BringupState {
    Idle,
    /// The host owns the power domain, reset not yet pulsed
    DriverOwns,
    /// Boot ROM is waiting for a download
    Ready,
    RingsConfigured,
    FirmwareLoaded,
    /// A step failed; only a teardown leaves this state
    Failed,
}

pub struct Sequencer<'a, B: RegisterBus + ?Sized> {
    bus: &'a B,
    translator: &'a AddressTranslator,
    config: &'a Config,
    state: BringupState,
}

impl<'a, B: RegisterBus + ?Sized> Sequencer<'a, B> {
    pub fn new(bus: &'a B, translator: &'a AddressTranslator, config: &'a Config) -> Self {
        Self {
            bus,
            translator,
            config,
            state: BringupState::Idle,
        }
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    /// Run every step once. Ends in [`BringupState::Ready`] or [`BringupState::Failed`].
    pub fn run(&mut self) -> Result<BringupState> {
        let result = self.run_steps();
        if let Err(err) = &result {
            log::error!("mt7927: bring-up failed in state {:?}: {}", self.state, err);
            self.state = BringupState::Failed;
        }
        result.map(|()| self.state)
    }

    fn run_steps(&mut self) -> Result<()> {
        self.claim_ownership()?;
        self.state = BringupState::DriverOwns;

        self.reset_wfsys()?;
        self.wait_rom_idle()?;
        self.state = BringupState::Ready;

        log::info!("mt7927: boot ROM idle, ready for download");
        Ok(())
    }

    /// SET_OWN until OWN_SYNC rises, then CLR_OWN until it falls.
    pub fn claim_ownership(&self) -> Result<()> {
        let bound = self.config.ownership;
        let lpctl = self.translator.read(self.bus, MT_CONN_ON_LPCTL)?;
        log::debug!("mt7927: LPCTL before handshake: {:#010x}", lpctl);

        self.translator
            .write(self.bus, MT_CONN_ON_LPCTL, Lpctl::HOST_SET_OWN.bits())?;
        self.poll(bound, "firmware ownership (OWN_SYNC set)", MT_CONN_ON_LPCTL, |v| {
            Lpctl::from_bits_retain(v).contains(Lpctl::OWN_SYNC)
        })?;

        self.translator
            .write(self.bus, MT_CONN_ON_LPCTL, Lpctl::HOST_CLR_OWN.bits())?;
        let lpctl = self.poll(bound, "driver ownership (OWN_SYNC clear)", MT_CONN_ON_LPCTL, |v| {
            !Lpctl::from_bits_retain(v).contains(Lpctl::OWN_SYNC)
        })?;

        log::debug!("mt7927: driver owns the chip, LPCTL {:#010x}", lpctl);
        Ok(())
    }

    /// Pulse RST_B_EN low and wait for INIT_DONE.
    pub fn reset_wfsys(&self) -> Result<()> {
        let reset = &self.config.reset;
        let before = self.translator.read(self.bus, MT_WFSYS_SW_RST_B)?;
        log::debug!("mt7927: WFSYS_SW_RST_B before reset: {:#010x}", before);

        self.translator.write(
            self.bus,
            MT_WFSYS_SW_RST_B,
            before & !WfsysReset::RST_B_EN.bits(),
        )?;
        thread::sleep(Duration::from_millis(reset.hold_ms));

        let held = self.translator.read(self.bus, MT_WFSYS_SW_RST_B)?;
        self.translator
            .write(self.bus, MT_WFSYS_SW_RST_B, held | WfsysReset::RST_B_EN.bits())?;

        // RST_B_EN reads back set as soon as it is written; only INIT_DONE means
        // the subsystem is up.
        let after = self.poll(reset.init_done, "WFSYS INIT_DONE", MT_WFSYS_SW_RST_B, |v| {
            WfsysReset::from_bits_retain(v).contains(WfsysReset::INIT_DONE)
        })?;
        log::debug!("mt7927: WFSYS reset complete: {:#010x}", after);
        Ok(())
    }

    pub fn wait_rom_idle(&self) -> Result<()> {
        let value = self.poll(
            self.config.mcu_idle,
            "boot ROM idle (ROMCODE_INDEX)",
            MT_MCU_ROMCODE_INDEX,
            |v| v & MCU_IDLE_MASK == MCU_IDLE,
        )?;
        log::debug!("mt7927: ROMCODE_INDEX {:#010x}", value);
        Ok(())
    }

    /// Bounded poll of a logical register. A device that reads all-ones
    /// throughout is reported as hung rather than slow.
    fn poll<F>(&self, bound: PollBound, what: &'static str, addr: u32, done: F) -> Result<u32>
    where
        F: Fn(u32) -> bool,
    {
        self.translator.translate(addr)?;
        let result = bound.wait(
            what,
            || self.translator.read(self.bus, addr).unwrap_or(MT_DEAD),
            |v| v != MT_DEAD && done(v),
        );
        match result {
            Err(Error::Timeout { last: MT_DEAD, .. }) => Err(Error::DeviceHung { addr }),
            other => other,
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::SimDevice;

    fn config() -> Config {
        let mut config = Config::default();
        config.ownership = PollBound::new(5, 0);
        config.reset.hold_ms = 5;
        config.reset.init_done = PollBound::new(5, 0);
        config.mcu_idle = PollBound::new(5, 0);
        config
    }

    #[test]
    fn test_run_ends_ready() {
        let (sim, translator, config) = (SimDevice::new(), AddressTranslator::new(), config());
        let mut seq = Sequencer::new(&sim, &translator, &config);
        assert_eq!(seq.run().unwrap(), BringupState::Ready);
        assert_eq!(
            sim.writes_to(MT_CONN_ON_LPCTL),
            vec![Lpctl::HOST_SET_OWN.bits(), Lpctl::HOST_CLR_OWN.bits()]
        );
    }

    #[test]
    fn test_all_ones_is_hung_not_slow() {
        let (sim, translator, config) = (SimDevice::new(), AddressTranslator::new(), config());
        sim.configure(|b| b.hung = true);
        let seq = Sequencer::new(&sim, &translator, &config);
        assert!(matches!(
            seq.claim_ownership(),
            Err(Error::DeviceHung { addr: MT_CONN_ON_LPCTL })
        ));
    }

    #[test]
    fn test_slow_init_done_times_out() {
        let (sim, translator, config) = (SimDevice::new(), AddressTranslator::new(), config());
        sim.configure(|b| b.init_done_after = 50);
        let mut seq = Sequencer::new(&sim, &translator, &config);
        match seq.run() {
            Err(Error::Timeout { what, .. }) => assert_eq!(what, "WFSYS INIT_DONE"),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(seq.state(), BringupState::Failed);
    }
}
