//! MT7927 PCIe Wi-Fi bring-up core
//!
//! Takes the chip from power-on to a running firmware download using nothing
//! but MMIO: address translation through the HIF remap apertures, the
//! ownership and WFSYS reset handshake, WFDMA0 ring configuration and the
//! acknowledgment-free patch and RAM download.
//!
//! Everything hangs off a [`DeviceContext`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mt7927::{Config, DeviceContext, HostDma, RegisterBus};
//! # fn run<B: RegisterBus>(bar: B, patch: &[u8], ram: &[u8]) -> mt7927::Result<()> {
//! let mut dev = DeviceContext::new(bar, Arc::new(HostDma::new()), Config::default())?;
//! dev.sequence()?;
//! dev.configure_rings()?;
//! dev.load_firmware(patch, ram)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod dma;
pub mod error;
pub mod firmware;
pub mod io;
pub mod notifier;
pub mod poll;
pub mod regs;
pub mod sequencer;
#[cfg(feature = "sim")]
pub mod sim;
pub mod translate;

pub use self::config::{Config, LoaderConfig, RegisterBit, ResetConfig, RingConfig};
pub use self::device::{DeviceContext, DeviceStatus, RingStatus};
pub use self::dma::{DmaAllocator, DmaBuffer, HostDma, RingRole, RingSlot};
pub use self::error::{Error, Result};
pub use self::firmware::loader::LoadReport;
pub use self::firmware::{PatchImage, RamImage};
pub use self::io::{MmioBar, RegisterBus};
pub use self::notifier::{CompletionEvent, CompletionNotifier, IrqMap, IrqSource};
pub use self::poll::PollBound;
pub use self::sequencer::BringupState;
pub use self::translate::AddressTranslator;
