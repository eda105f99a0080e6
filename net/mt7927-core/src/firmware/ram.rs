//! WM RAM code image
//!
//! The descriptive data sits at the end of the file: a 36-byte trailer, and
//! right before it one 72-byte record per region. Region payloads are packed
//! back to back from offset 0 in record order.

use static_assertions::const_assert_eq;

use super::{le32, text, FirmwareImage, ImageKind, Section};
use crate::error::{Error, Result};
use crate::regs::bit;

pub const RAM_TRAILER_LEN: usize = 36;
pub const RAM_REGION_LEN: usize = 72;

const_assert_eq!(5 + 2 + 10 + 15 + 4, RAM_TRAILER_LEN);
const_assert_eq!(4 * 3 + 4 + 4 * 2 + 2 + 14 + 32, RAM_REGION_LEN);

/// Region is described in the image but must not be downloaded.
pub const FW_FEATURE_NON_DL: u8 = bit(6) as u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamTrailer {
    pub chip_id: u8,
    pub eco_code: u8,
    pub n_region: u8,
    pub format_ver: u8,
    pub format_flag: u8,
    pub fw_ver: String,
    pub build_date: String,
    pub crc: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamRegion {
    pub section: Section,
    pub decomp_len: u32,
    pub feature_set: u8,
    pub kind: u8,
    pub name: String,
}

#[derive(Debug)]
pub struct RamImage<'a> {
    file: &'a [u8],
    trailer: RamTrailer,
    regions: Vec<RamRegion>,
    /// Regions that are actually downloaded
    sections: Vec<Section>,
}

impl<'a> RamImage<'a> {
    pub fn parse(file: &'a [u8]) -> Result<Self> {
        let trailer_at = file
            .len()
            .checked_sub(RAM_TRAILER_LEN)
            .ok_or(Error::InvalidImage("ram image shorter than its trailer"))?;
        let t = &file[trailer_at..];
        let trailer = RamTrailer {
            chip_id: t[0],
            eco_code: t[1],
            n_region: t[2],
            format_ver: t[3],
            format_flag: t[4],
            fw_ver: text(&t[7..17]),
            build_date: text(&t[17..32]),
            crc: le32(t, 32).ok_or(Error::InvalidImage("truncated ram trailer"))?,
        };

        let table_at = trailer_at
            .checked_sub(trailer.n_region as usize * RAM_REGION_LEN)
            .ok_or(Error::InvalidImage("ram region table runs before the start of the file"))?;

        let mut regions = Vec::with_capacity(trailer.n_region as usize);
        let mut offset = 0u32;
        for index in 0..trailer.n_region as usize {
            let at = table_at + index * RAM_REGION_LEN;
            let r = &file[at..at + RAM_REGION_LEN];
            let word = |off: usize| le32(r, off).ok_or(Error::InvalidImage("truncated ram region"));
            let section = Section {
                target_address: word(16)?,
                length: word(20)?,
                source_offset: offset,
            };

            // Payloads must stay clear of the region table.
            section.data(index, &file[..table_at])?;
            offset += section.length;

            regions.push(RamRegion {
                section,
                decomp_len: word(4)?,
                feature_set: r[24],
                kind: r[25],
                name: text(&r[40..72]),
            });
        }

        let sections = regions
            .iter()
            .filter(|region| {
                let skip = region.feature_set & FW_FEATURE_NON_DL != 0;
                if skip {
                    log::debug!("mt7927: ram region {} is not downloaded", region.name);
                }
                !skip
            })
            .map(|region| region.section)
            .collect();

        log::info!(
            "mt7927: ram code {} built {}, {} regions",
            trailer.fw_ver,
            trailer.build_date,
            regions.len()
        );

        Ok(Self {
            file,
            trailer,
            regions,
            sections,
        })
    }

    pub fn trailer(&self) -> &RamTrailer {
        &self.trailer
    }

    pub fn regions(&self) -> &[RamRegion] {
        &self.regions
    }
}

impl FirmwareImage for RamImage<'_> {
    fn kind(&self) -> ImageKind {
        ImageKind::Ram
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn bytes(&self) -> &[u8] {
        self.file
    }
}

/// Build a RAM image, used by tests and the simulator.
#[cfg(any(test, feature = "sim"))]
pub fn build(fw_ver: &str, regions: &[(u32, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (_, data) in regions {
        out.extend_from_slice(data);
    }
    for (addr, data) in regions {
        let mut record = [0u8; RAM_REGION_LEN];
        record[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        record[16..20].copy_from_slice(&addr.to_le_bytes());
        record[20..24].copy_from_slice(&(data.len() as u32).to_le_bytes());
        let name = format!("region@{:08x}", addr);
        record[40..40 + name.len().min(32)].copy_from_slice(&name.as_bytes()[..name.len().min(32)]);
        out.extend_from_slice(&record);
    }

    let mut trailer = [0u8; RAM_TRAILER_LEN];
    trailer[2] = regions.len() as u8;
    let ver = fw_ver.as_bytes();
    trailer[7..7 + ver.len().min(10)].copy_from_slice(&ver[..ver.len().min(10)]);
    trailer[17..25].copy_from_slice(b"20240315");
    out.extend_from_slice(&trailer);
    out
}
