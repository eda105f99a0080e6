//! Error type shared by every bring-up stage.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the bring-up core.
///
/// None of these are retried internally. The only sanctioned recovery is to
/// tear the [`DeviceContext`](crate::DeviceContext) down and run the whole
/// sequence again from a clean reset.
#[derive(Debug, Error)]
pub enum Error {
    /// A polled milestone was not reached within its configured bound.
    ///
    /// A stalled firmware transfer is reported here too: `iterations` then counts
    /// the chunks pushed without the consumer index moving.
    #[error("timed out waiting for {what} after {iterations} polls (last value {last:#010x})")]
    Timeout {
        what: &'static str,
        iterations: u32,
        last: u32,
    },

    /// The translator cannot map this logical address.
    #[error("address {0:#010x} is outside every mapped region and remap aperture")]
    AddressOutOfRange(u32),

    /// A ring register write did not persist.
    #[error("ring {ring} {register} read back {readback:#010x} after writing {written:#010x}")]
    RingConfigFailure {
        ring: u8,
        register: &'static str,
        written: u32,
        readback: u32,
    },

    /// A frame does not fit the slot buffers of its ring.
    #[error("frame of {len} bytes does not fit ring {ring} (max {max})")]
    FrameTooLarge { ring: u8, len: usize, max: usize },

    /// Every descriptor of a ring is still owned by the device.
    #[error("ring {ring} is full")]
    RingFull { ring: u8 },

    /// The device answers every read with all-ones.
    #[error("device is not responding (read {addr:#010x} returned 0xffffffff)")]
    DeviceHung { addr: u32 },

    /// A firmware image is malformed.
    #[error("invalid firmware image: {0}")]
    InvalidImage(&'static str),

    /// A firmware section declares a zero target and zero length, or points outside the file.
    #[error("invalid firmware section {index}: addr={addr:#010x} len={len} offset={offset}")]
    InvalidSection {
        index: usize,
        addr: u32,
        len: u32,
        offset: u32,
    },

    /// Device-visible memory could not be provided.
    #[error("DMA allocation of {size} bytes failed: {reason}")]
    DmaAllocation { size: usize, reason: &'static str },

    /// An operation was requested from the wrong bring-up state.
    #[error("{operation} requires state {required:?}, device is {actual:?}")]
    InvalidState {
        operation: &'static str,
        required: crate::sequencer::BringupState,
        actual: crate::sequencer::BringupState,
    },

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a full restart from reset is the only way forward.
    ///
    /// A hung device additionally needs a bus-level reset that this crate cannot issue.
    pub fn needs_bus_reset(&self) -> bool {
        matches!(self, Error::DeviceHung { .. })
    }
}
