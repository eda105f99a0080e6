//! Bring-up configuration
//!
//! Every bound and interval the sequencer, ring manager and loader use lives
//! here. Values can be overridden from a TOML file; anything left out keeps
//! its default.
//!
//! ```toml
//! [mcu_idle]
//! iterations = 500
//! interval_us = 2000
//!
//! [loader]
//! chunk_size = 8192
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dma::{RingRole, RingSlot, DESC_MAX_LEN};
use crate::error::{Error, Result};
use crate::firmware::mcu::MCU_FW_TXD_LEN;
use crate::poll::PollBound;
use crate::regs::{self, prefetch};

/// Shortest reset pulse the WFSYS reset line accepts.
pub const MIN_RESET_HOLD_MS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SET_OWN/CLR_OWN handshake, per direction.
    pub ownership: PollBound,
    pub reset: ResetConfig,
    /// Wait for the boot ROM to reach its download-idle state.
    pub mcu_idle: PollBound,
    pub rings: RingConfig,
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// How long RST_B_EN is held low.
    pub hold_ms: u64,
    /// Wait for INIT_DONE after releasing the reset.
    pub init_done: PollBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// TX ring space, one entry per hardware ring index.
    pub layout: Vec<RingSlot>,
    pub command_capacity: u16,
    pub fwdl_capacity: u16,
    pub data_capacity: u16,
    /// Number of RX rings brought up by `configure_rx_rings`.
    pub rx_rings: u8,
    pub rx_capacity: u16,
    pub rx_buf_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Payload bytes per firmware-download descriptor.
    pub chunk_size: usize,
    /// Delay after each doorbell before sampling the consumer index.
    pub settle_us: u64,
    /// Chunks pushed without consumer progress before the section is declared stalled.
    pub stall_chunks: u32,
    /// Register and bit set once every image has been pushed.
    pub sw_init_done: RegisterBit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBit {
    pub addr: u32,
    pub mask: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ownership: PollBound::new(2000, 500),
            reset: ResetConfig::default(),
            mcu_idle: PollBound::new(1000, 1000),
            rings: RingConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            hold_ms: 50,
            init_done: PollBound::new(1000, 1000),
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            command_capacity: 256,
            fwdl_capacity: 128,
            data_capacity: 2048,
            rx_rings: 4,
            rx_capacity: 512,
            rx_buf_size: 2048,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            settle_us: 150,
            stall_chunks: 8,
            sw_init_done: RegisterBit {
                addr: regs::MT_WFDMA_DUMMY_CR,
                mask: regs::MT_WFDMA_SW_INIT_DONE,
            },
        }
    }
}

/// Sparse TX ring space of the MT6639 family: ring 0 carries data, 15 MCU
/// commands and 16 firmware download. The rest exist but stay idle.
pub fn default_layout() -> Vec<RingSlot> {
    (0u8..=16)
        .map(|index| match index {
            0 => RingSlot::new(index, RingRole::Data),
            15 => RingSlot::new(index, RingRole::Command).with_prefetch(prefetch(0x0500, 0x4)),
            16 => RingSlot::new(index, RingRole::FirmwareDownload)
                .with_prefetch(prefetch(0x0540, 0x4)),
            _ => RingSlot::new(index, RingRole::Unused),
        })
        .collect()
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("mt7927: loading config from {}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reset.hold_ms < MIN_RESET_HOLD_MS {
            return Err(Error::InvalidConfig(format!(
                "reset hold of {} ms is shorter than {} ms",
                self.reset.hold_ms, MIN_RESET_HOLD_MS
            )));
        }

        for (name, bound) in [
            ("ownership", &self.ownership),
            ("reset.init_done", &self.reset.init_done),
            ("mcu_idle", &self.mcu_idle),
        ] {
            if bound.iterations == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{} poll bound has zero iterations",
                    name
                )));
            }
        }

        let max_chunk = DESC_MAX_LEN as usize - MCU_FW_TXD_LEN;
        if self.loader.chunk_size == 0 || self.loader.chunk_size > max_chunk {
            return Err(Error::InvalidConfig(format!(
                "chunk size {} must be between 1 and {}",
                self.loader.chunk_size, max_chunk
            )));
        }
        if self.loader.stall_chunks == 0 {
            return Err(Error::InvalidConfig("stall_chunks must be at least 1".into()));
        }

        self.validate_layout()?;

        for (name, capacity) in [
            ("command", self.rings.command_capacity),
            ("fwdl", self.rings.fwdl_capacity),
            ("data", self.rings.data_capacity),
            ("rx", self.rings.rx_capacity),
        ] {
            if capacity < 2 {
                return Err(Error::InvalidConfig(format!(
                    "{} ring capacity must be at least 2",
                    name
                )));
            }
        }
        if self.rings.rx_buf_size == 0 || self.rings.rx_buf_size > DESC_MAX_LEN as usize {
            return Err(Error::InvalidConfig(format!(
                "rx buffer size {} does not fit a descriptor",
                self.rings.rx_buf_size
            )));
        }

        Ok(())
    }

    fn validate_layout(&self) -> Result<()> {
        let layout = &self.rings.layout;
        let count = |role: RingRole| layout.iter().filter(|slot| slot.role == role).count();

        if count(RingRole::Command) != 1 || count(RingRole::FirmwareDownload) != 1 {
            return Err(Error::InvalidConfig(
                "ring layout needs exactly one command ring and one firmware-download ring".into(),
            ));
        }

        let mut seen = 0u32;
        for slot in layout {
            if slot.index >= crate::dma::MAX_TX_RINGS {
                return Err(Error::InvalidConfig(format!("ring index {} out of range", slot.index)));
            }
            if seen & (1 << slot.index) != 0 {
                return Err(Error::InvalidConfig(format!("ring index {} listed twice", slot.index)));
            }
            seen |= 1 << slot.index;

            if slot.role.carries_traffic() && slot.prefetch.is_none() {
                return Err(Error::InvalidConfig(format!(
                    "traffic ring {} has no prefetch setting",
                    slot.index
                )));
            }
        }

        Ok(())
    }

    pub fn command_ring(&self) -> u8 {
        self.ring_with_role(RingRole::Command)
    }

    pub fn fwdl_ring(&self) -> u8 {
        self.ring_with_role(RingRole::FirmwareDownload)
    }

    fn ring_with_role(&self, role: RingRole) -> u8 {
        self.rings
            .layout
            .iter()
            .find(|slot| slot.role == role)
            .map(|slot| slot.index)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.rings.layout.len(), 17);
        assert_eq!(config.command_ring(), 15);
        assert_eq!(config.fwdl_ring(), 16);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [mcu_idle]
            iterations = 7
            interval_us = 0

            [loader]
            chunk_size = 8192
            "#,
        )
        .unwrap();
        assert_eq!(config.mcu_idle, PollBound::new(7, 0));
        assert_eq!(config.loader.chunk_size, 8192);
        assert_eq!(config.loader.stall_chunks, 8);
        assert_eq!(config.reset.hold_ms, 50);
    }

    #[test]
    fn test_custom_layout_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [rings]
            layout = [
                { index = 0, role = "data" },
                { index = 1, role = "command", prefetch = 0x00000004 },
                { index = 2, role = "firmware-download", prefetch = 0x00400004 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.command_ring(), 1);
        assert_eq!(config.fwdl_ring(), 2);
    }

    #[test]
    fn test_rejects_short_reset_hold() {
        let err = Config::from_toml_str("[reset]\nhold_ms = 1\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_oversized_chunk() {
        let mut config = Config::default();
        config.loader.chunk_size = 64 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_layout_without_fwdl() {
        let mut config = Config::default();
        config.rings.layout.retain(|slot| slot.role != RingRole::FirmwareDownload);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let mut config = Config::default();
        config.rings.layout.push(RingSlot::new(3, RingRole::Unused));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
