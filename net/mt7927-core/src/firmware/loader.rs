//! Fire-and-forget firmware download
//!
//! Every chunk is announced with a FW_SCATTER command on the WM ring and then
//! pushed on the download ring. Nothing waits for an MCU event: the only
//! feedback is the download ring's DMA index, sampled after a short settle
//! delay. A download whose index stops moving is reported as a timeout rather
//! than pushed into a full ring.

use std::thread;
use std::time::Duration;

use super::mcu::{
    command_header, firmware_header, patch_finish_request, start_firmware_request, FwScatter,
    McuCommand, PatchSem, Sequence, MCU_FW_TXD_LEN, MCU_TXD_LEN,
};
use super::{chunks, FirmwareImage, PatchImage, RamImage};
use crate::config::LoaderConfig;
use crate::dma::{RingManager, RingRole};
use crate::error::{Error, Result};
use crate::io::RegisterBus;
use crate::poll::PollBound;
use crate::translate::AddressTranslator;

/// Largest command payload the WM ring slots are sized for.
pub const MCU_MAX_PAYLOAD: usize = 64;
pub const COMMAND_SLOT_SIZE: usize = MCU_TXD_LEN + MCU_MAX_PAYLOAD;

pub const FWDL_STALL: &str = "firmware-download consumer index";
pub const COMMAND_STALL: &str = "mcu command consumer index";

/// Slot size the download ring needs for `config.chunk_size` chunks.
pub fn fwdl_slot_size(config: &LoaderConfig) -> usize {
    MCU_FW_TXD_LEN + config.chunk_size
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub sections: u32,
    pub chunks: u32,
    pub bytes: u64,
    pub commands: u32,
}

pub struct FirmwareLoader<'a, B: RegisterBus + ?Sized> {
    bus: &'a B,
    translator: &'a AddressTranslator,
    rings: &'a mut RingManager,
    config: &'a LoaderConfig,
    seq: Sequence,
    /// Chunks pushed since the download ring's DMA index last moved
    idle_chunks: u32,
    last_didx: u32,
    report: LoadReport,
}

impl<'a, B: RegisterBus + ?Sized> FirmwareLoader<'a, B> {
    pub fn new(
        bus: &'a B,
        translator: &'a AddressTranslator,
        rings: &'a mut RingManager,
        config: &'a LoaderConfig,
    ) -> Self {
        let last_didx = rings
            .ring_with_role(RingRole::FirmwareDownload)
            .map(|ring| ring.consumer())
            .unwrap_or(0);
        Self {
            bus,
            translator,
            rings,
            config,
            seq: Sequence::default(),
            idle_chunks: 0,
            last_didx,
            report: LoadReport::default(),
        }
    }

    /// Push the ROM patch, then the RAM code, start it and flag software init done.
    pub fn load(mut self, patch: &PatchImage, ram: &RamImage) -> Result<LoadReport> {
        log::info!(
            "mt7927: downloading patch ({} bytes) and ram code ({} bytes)",
            patch.payload_len(),
            ram.payload_len()
        );

        self.send_command(McuCommand::PatchSemControl, &PatchSem::Get.to_bytes())?;
        self.load_image(patch)?;
        self.send_command(McuCommand::PatchFinishReq, &patch_finish_request())?;
        self.send_command(McuCommand::PatchSemControl, &PatchSem::Release.to_bytes())?;

        self.load_image(ram)?;
        self.send_command(McuCommand::StartFirmware, &start_firmware_request(0))?;

        self.wait_drained()?;
        self.set_sw_init_done()?;

        log::info!(
            "mt7927: firmware pushed: {} sections, {} chunks, {} bytes, {} commands",
            self.report.sections,
            self.report.chunks,
            self.report.bytes,
            self.report.commands
        );
        Ok(self.report)
    }

    /// Stream every section of `image`.
    pub fn load_image(&mut self, image: &dyn FirmwareImage) -> Result<()> {
        for (index, section) in image.sections().iter().enumerate() {
            let data = section.data(index, image.bytes())?;
            log::debug!(
                "mt7927: {:?} section {}: {} bytes to {:#010x}",
                image.kind(),
                index,
                section.length,
                section.target_address
            );

            for chunk in chunks(data.len(), self.config.chunk_size) {
                let target = section.target_address.wrapping_add(chunk.offset as u32);
                self.send_chunk(target, &data[chunk.offset..chunk.offset + chunk.len])?;
            }
            self.report.sections += 1;
        }
        Ok(())
    }

    pub fn report(&self) -> LoadReport {
        self.report
    }

    fn send_command(&mut self, cmd: McuCommand, payload: &[u8]) -> Result<()> {
        let header = command_header(cmd, self.seq.next(), payload.len());
        self.rings
            .kick(self.bus, self.translator, RingRole::Command, &[&header, payload])
            .map_err(|err| match err {
                Error::RingFull { .. } => self.stall(COMMAND_STALL, RingRole::Command),
                other => other,
            })?;
        self.report.commands += 1;
        log::trace!("mt7927: mcu command {:?} queued", cmd);
        Ok(())
    }

    fn send_chunk(&mut self, target: u32, data: &[u8]) -> Result<()> {
        let scatter = FwScatter::download(target, data.len() as u32);
        self.send_command(McuCommand::FwScatter, &scatter.to_bytes())?;

        let header = firmware_header(data.len());
        self.rings
            .kick(self.bus, self.translator, RingRole::FirmwareDownload, &[&header, data])
            .map_err(|err| match err {
                Error::RingFull { .. } => self.stall(FWDL_STALL, RingRole::FirmwareDownload),
                other => other,
            })?;
        self.report.chunks += 1;
        self.report.bytes += data.len() as u64;

        self.settle();
        self.rings.sync_consumer(self.bus, self.translator, RingRole::Command)?;
        let didx = self
            .rings
            .sync_consumer(self.bus, self.translator, RingRole::FirmwareDownload)?;

        if didx != self.last_didx {
            self.last_didx = didx;
            self.idle_chunks = 0;
        } else {
            self.idle_chunks += 1;
            if self.idle_chunks >= self.config.stall_chunks {
                return Err(self.stall(FWDL_STALL, RingRole::FirmwareDownload));
            }
        }
        Ok(())
    }

    fn settle(&self) {
        if self.config.settle_us > 0 {
            thread::sleep(Duration::from_micros(self.config.settle_us));
        }
    }

    fn stall(&self, what: &'static str, role: RingRole) -> Error {
        let (index, cidx, didx) = self
            .rings
            .ring_with_role(role)
            .map(|ring| (ring.index(), ring.producer(), ring.consumer()))
            .unwrap_or_default();
        log::error!(
            "mt7927: ring {} stalled: cidx {} didx {} after {} chunks without progress",
            index,
            cidx,
            didx,
            self.idle_chunks
        );
        Error::Timeout {
            what,
            iterations: self.idle_chunks,
            last: didx,
        }
    }

    /// Give the download ring a bounded chance to catch up with the last chunks.
    fn wait_drained(&mut self) -> Result<()> {
        let bound = PollBound::new(self.config.stall_chunks, self.config.settle_us);
        let rings = &*self.rings;
        let (bus, translator) = (self.bus, self.translator);
        let mut failure = None;
        let result = bound.wait(
            FWDL_STALL,
            || match rings.sync_consumer(bus, translator, RingRole::FirmwareDownload) {
                Ok(_) => rings
                    .ring_with_role(RingRole::FirmwareDownload)
                    .map(|ring| ring.pending() as u32)
                    .unwrap_or(0),
                Err(err) => {
                    failure = Some(err);
                    0
                }
            },
            |pending| pending == 0,
        );
        if let Some(err) = failure {
            return Err(err);
        }
        if result.is_err() {
            return Err(self.stall(FWDL_STALL, RingRole::FirmwareDownload));
        }
        Ok(())
    }

    fn set_sw_init_done(&self) -> Result<()> {
        let done = self.config.sw_init_done;
        let value = self.translator.read(self.bus, done.addr)? | done.mask;
        self.translator.write(self.bus, done.addr, value)?;
        log::info!("mt7927: software init done ({:#010x} = {:#010x})", done.addr, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_sizes() {
        let config = LoaderConfig::default();
        assert_eq!(fwdl_slot_size(&config), 4096 + 32);
        assert_eq!(COMMAND_SLOT_SIZE, 128);
    }
}
