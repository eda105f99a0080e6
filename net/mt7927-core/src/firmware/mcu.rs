//! MCU command framing
//!
//! Commands go to the WM command ring behind a 64-byte header. Firmware
//! payload goes to the download ring behind the 32-byte hardware TXD alone.

use static_assertions::const_assert_eq;

use crate::regs::{field_prep, genmask};

/// Full command header: hardware TXD plus the MCU fields.
pub const MCU_TXD_LEN: usize = 64;
/// Hardware TXD prepended to firmware-download frames.
pub const MCU_FW_TXD_LEN: usize = 32;

const_assert_eq!(MCU_FW_TXD_LEN + 2 + 2 + 4 + 4 + 4 * 5, MCU_TXD_LEN);

pub const MT_TXD0_TX_BYTES: u32 = genmask(15, 0);
pub const MT_TXD0_PKT_FMT: u32 = genmask(24, 23);

/// Priority queue id for MCU traffic.
pub const MCU_PQ_ID: u16 = 0x8000;
pub const S2D_IDX_MCU: u8 = 0;
pub const MCU_SET: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Firmware = 1,
    Command = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuCommand {
    FwScatter = 0x0f,
    PatchSemControl = 0x10,
    PatchFinishReq = 0x11,
    PatchStartReq = 0x14,
    StartFirmware = 0x15,
    RestartDownload = 0x18,
}

impl McuCommand {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x0f => McuCommand::FwScatter,
            0x10 => McuCommand::PatchSemControl,
            0x11 => McuCommand::PatchFinishReq,
            0x14 => McuCommand::PatchStartReq,
            0x15 => McuCommand::StartFirmware,
            0x18 => McuCommand::RestartDownload,
            _ => return None,
        })
    }
}

/// Rolling 4-bit command sequence number.
#[derive(Debug, Default)]
pub struct Sequence(u8);

impl Sequence {
    pub fn next(&mut self) -> u8 {
        let seq = self.0;
        self.0 = (self.0 + 1) & 0xf;
        seq
    }
}

fn txd0(total_len: usize, pkt: PacketType) -> u32 {
    field_prep(MT_TXD0_TX_BYTES, total_len as u32) | field_prep(MT_TXD0_PKT_FMT, pkt as u32)
}

/// Header for a command carrying `payload_len` bytes.
pub fn command_header(cmd: McuCommand, seq: u8, payload_len: usize) -> [u8; MCU_TXD_LEN] {
    let total = MCU_TXD_LEN + payload_len;
    let mut out = [0u8; MCU_TXD_LEN];
    out[0..4].copy_from_slice(&txd0(total, PacketType::Command).to_le_bytes());
    out[32..34].copy_from_slice(&(total as u16).to_le_bytes());
    out[34..36].copy_from_slice(&MCU_PQ_ID.to_le_bytes());
    out[36] = cmd as u8;
    out[37] = PacketType::Command as u8;
    out[38] = MCU_SET;
    out[39] = seq & 0xf;
    // out[40]: reserved, out[41]: ext_cid, out[43]: ext_cid_ack; unused by download commands
    out[42] = S2D_IDX_MCU;
    out
}

/// Hardware TXD for a firmware-download frame of `payload_len` bytes.
pub fn firmware_header(payload_len: usize) -> [u8; MCU_FW_TXD_LEN] {
    let mut out = [0u8; MCU_FW_TXD_LEN];
    let txd = txd0(MCU_FW_TXD_LEN + payload_len, PacketType::Firmware);
    out[0..4].copy_from_slice(&txd.to_le_bytes());
    out
}

pub const FW_MODE_DL: u32 = 0;

/// Where the next download chunk lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwScatter {
    pub addr: u32,
    pub len: u32,
    pub mode: u32,
}

impl FwScatter {
    pub fn download(addr: u32, len: u32) -> Self {
        Self {
            addr,
            len,
            mode: FW_MODE_DL,
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.addr.to_le_bytes());
        out[4..8].copy_from_slice(&self.len.to_le_bytes());
        out[8..12].copy_from_slice(&self.mode.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            addr: super::le32(bytes, 0)?,
            len: super::le32(bytes, 4)?,
            mode: super::le32(bytes, 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PatchSem {
    Release = 0,
    Get = 1,
}

impl PatchSem {
    pub fn to_bytes(self) -> [u8; 4] {
        [self as u8, 0, 0, 0]
    }
}

pub fn patch_finish_request() -> [u8; 4] {
    [0; 4]
}

/// START_FIRMWARE payload; a zero address keeps the image's own entry point.
pub fn start_firmware_request(addr: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&u32::from(addr != 0).to_le_bytes());
    out[4..8].copy_from_slice(&addr.to_le_bytes());
    out
}
