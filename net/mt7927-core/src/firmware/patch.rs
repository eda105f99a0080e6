//! ROM patch image
//!
//! ```text
//! 0x00  build_date[16] platform[4] hw_sw_ver patch_ver checksum:u16 rsv:u16
//! 0x20  sec_info { patch_ver subsys feature n_region crc rsv[11] }
//! 0x60  rsv[108]
//! 0xcc  n_region x { type offs size addr len sec_key_idx align_len rsv[9] }
//!       section data, back to back in table order
//! ```
//!
//! All words are little-endian. The `offs` field of a section record is not
//! used to locate its data.

use static_assertions::const_assert_eq;

use super::{le16, le32, text, FirmwareImage, ImageKind, Section};
use crate::error::{Error, Result};

pub const PATCH_HEADER_LEN: usize = 204;
pub const PATCH_SECTION_LEN: usize = 64;

const SEC_INFO: usize = 32;
const SEC_INFO_LEN: usize = 4 * 5 + 4 * 11;
const HEADER_RSV_LEN: usize = 108;
const_assert_eq!(SEC_INFO + SEC_INFO_LEN + HEADER_RSV_LEN, PATCH_HEADER_LEN);
const_assert_eq!(4 * 3 + 4 * 4 + 4 * 9, PATCH_SECTION_LEN);

pub const PATCH_SEC_TYPE_MASK: u32 = 0xffff;
pub const PATCH_SEC_TYPE_INFO: u32 = 0x2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHeader {
    pub build_date: String,
    pub platform: String,
    pub hw_sw_ver: u32,
    pub patch_ver: u32,
    pub checksum: u16,
    pub subsys: u32,
    pub feature: u32,
    pub n_region: u32,
    pub crc: u32,
}

#[derive(Debug)]
pub struct PatchImage<'a> {
    file: &'a [u8],
    header: PatchHeader,
    sections: Vec<Section>,
}

impl<'a> PatchImage<'a> {
    pub fn parse(file: &'a [u8]) -> Result<Self> {
        if file.len() < PATCH_HEADER_LEN {
            return Err(Error::InvalidImage("patch shorter than its header"));
        }

        let word = |at: usize| le32(file, at).ok_or(Error::InvalidImage("truncated patch header"));
        let header = PatchHeader {
            build_date: text(&file[0..16]),
            platform: text(&file[16..20]),
            hw_sw_ver: word(20)?,
            patch_ver: word(24)?,
            checksum: le16(file, 28).ok_or(Error::InvalidImage("truncated patch header"))?,
            subsys: word(SEC_INFO + 4)?,
            feature: word(SEC_INFO + 8)?,
            n_region: word(SEC_INFO + 12)?,
            crc: word(SEC_INFO + 16)?,
        };

        let table_end = (header.n_region as usize)
            .checked_mul(PATCH_SECTION_LEN)
            .and_then(|n| n.checked_add(PATCH_HEADER_LEN))
            .filter(|&end| end <= file.len())
            .ok_or(Error::InvalidImage("patch section table runs past the end of the file"))?;

        let mut sections = Vec::with_capacity(header.n_region as usize);
        let mut data_at = table_end;
        for (index, at) in (PATCH_HEADER_LEN..table_end).step_by(PATCH_SECTION_LEN).enumerate() {
            let word = |off: usize| {
                le32(file, at + off).ok_or(Error::InvalidImage("truncated patch section"))
            };
            let kind = word(0)?;
            let section = Section {
                target_address: word(12)?,
                length: word(16)?,
                source_offset: u32::try_from(data_at)
                    .map_err(|_| Error::InvalidImage("patch too large"))?,
            };

            if kind & PATCH_SEC_TYPE_MASK != PATCH_SEC_TYPE_INFO {
                log::debug!("mt7927: patch section {} has type {:#x}", index, kind);
            }
            section.data(index, file)?;
            data_at += section.length as usize;
            sections.push(section);
        }

        log::info!(
            "mt7927: patch build {} platform {} ver {:#x}, {} sections",
            header.build_date,
            header.platform,
            header.patch_ver,
            sections.len()
        );

        Ok(Self {
            file,
            header,
            sections,
        })
    }

    pub fn header(&self) -> &PatchHeader {
        &self.header
    }
}

impl FirmwareImage for PatchImage<'_> {
    fn kind(&self) -> ImageKind {
        ImageKind::Patch
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn bytes(&self) -> &[u8] {
        self.file
    }
}

/// Build a patch file, used by tests and the simulator.
#[cfg(any(test, feature = "sim"))]
pub fn build(build_date: &str, sections: &[(u32, &[u8])]) -> Vec<u8> {
    let mut out = vec![0u8; PATCH_HEADER_LEN + sections.len() * PATCH_SECTION_LEN];
    let date = build_date.as_bytes();
    out[..date.len().min(16)].copy_from_slice(&date[..date.len().min(16)]);
    out[16..20].copy_from_slice(b"ALPS");
    out[24..28].copy_from_slice(&1u32.to_le_bytes());
    out[SEC_INFO + 12..SEC_INFO + 16].copy_from_slice(&(sections.len() as u32).to_le_bytes());

    let mut offs = out.len();
    for (i, (addr, data)) in sections.iter().enumerate() {
        let at = PATCH_HEADER_LEN + i * PATCH_SECTION_LEN;
        let len = data.len() as u32;
        let fields = [PATCH_SEC_TYPE_INFO, offs as u32, len, *addr, len];
        for (n, value) in fields.iter().enumerate() {
            out[at + n * 4..at + n * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        offs += data.len();
    }
    for (_, data) in sections {
        out.extend_from_slice(data);
    }
    out
}
