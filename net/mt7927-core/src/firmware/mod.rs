//! Firmware images and the download path
//!
//! Two images are pushed per bring-up: the ROM patch, which the boot ROM
//! applies before anything else, and the WM RAM code. Both are parsed into a
//! list of [`Section`]s, then streamed through the firmware-download ring in
//! fixed-size chunks by the [`loader`].

pub mod loader;
pub mod mcu;
pub mod patch;
pub mod ram;

pub use loader::FirmwareLoader;
pub use patch::PatchImage;
pub use ram::RamImage;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Patch,
    Ram,
}

/// One contiguous piece of an image, loaded at `target_address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub target_address: u32,
    pub length: u32,
    /// Where the section data starts in the image file
    pub source_offset: u32,
}

impl Section {
    /// Check the section against the image it came from and return its bytes.
    pub fn data<'a>(&self, index: usize, file: &'a [u8]) -> Result<&'a [u8]> {
        let invalid = || Error::InvalidSection {
            index,
            addr: self.target_address,
            len: self.length,
            offset: self.source_offset,
        };

        if self.target_address == 0 && self.length == 0 {
            return Err(invalid());
        }
        let start = self.source_offset as usize;
        let end = start.checked_add(self.length as usize).ok_or_else(invalid)?;
        file.get(start..end).ok_or_else(invalid)
    }
}

/// A parsed image: where its sections go, and the file they are read from.
pub trait FirmwareImage {
    fn kind(&self) -> ImageKind;

    fn sections(&self) -> &[Section];

    fn bytes(&self) -> &[u8];

    /// Sum of all section lengths.
    fn payload_len(&self) -> u64 {
        self.sections().iter().map(|s| s.length as u64).sum()
    }
}

/// One piece of a section, sized to fit a single descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Offset inside the section
    pub offset: usize,
    pub len: usize,
}

/// Split `len` bytes into `chunk_size` pieces; the last one carries the rest.
pub fn chunks(len: usize, chunk_size: usize) -> Chunks {
    Chunks {
        len,
        chunk_size: chunk_size.max(1),
        offset: 0,
    }
}

#[derive(Debug, Clone)]
pub struct Chunks {
    len: usize,
    chunk_size: usize,
    offset: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.len {
            return None;
        }
        let chunk = Chunk {
            offset: self.offset,
            len: (self.len - self.offset).min(self.chunk_size),
        };
        self.offset += chunk.len;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.len - self.offset.min(self.len)).div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

pub(crate) fn le32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn le16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Printable prefix of a fixed-size, NUL-padded text field.
pub(crate) fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
