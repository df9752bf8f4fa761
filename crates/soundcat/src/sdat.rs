//! SDAT (Nintendo DS sound archive) parsing.
//!
//! The archive header points at four blocks:
//!
//! - `SYMB`: optional symbol names, resolved with [`crate::symb`].
//! - `INFO`: per-record parameters (file ids, banks, volumes).
//! - `FAT `: absolute offset and size of every file.
//! - `FILE`: the file data itself.
//!
//! The fingerprint covers the INFO block and every FAT-referenced file in
//! FAT order. Symbol names are cosmetic and are exported as tags only.
use tracing::debug;

use crate::binutil::{
    ByteRegion, ByteSource, ParseError, Result, read_at, read_u16_le_at, read_u32_le_at,
};
use crate::chunk::expect_magic;
use crate::format::{Fingerprint, FingerprintContext, FormatIdentity};
use crate::meta::{Tags, join_names};
use crate::symb::{SymbolCategory, SymbolSection};

pub const SDAT_MAGIC: &[u8; 4] = b"SDAT";
pub const FAT_MAGIC: &[u8; 4] = b"FAT ";
const FORMAT_ABBREVIATION: &str = "SDAT";

/// Byte-order mark stored at 0x04 by little-endian archives.
const SDAT_BOM: u16 = 0xFEFF;
const FAT_ENTRY_SIZE: u64 = 0x10;

/// Header fields and their on-disk offsets.
#[derive(Copy, Clone, Debug)]
pub enum SdatHeaderField {
    Ident,
    Bom,
    Version,
    FileSize,
    HeaderSize,
    BlockCount,
    SymbOffset,
    SymbSize,
    InfoOffset,
    InfoSize,
    FatOffset,
    FatSize,
    FileOffset,
    FileBlockSize,
}

impl SdatHeaderField {
    pub fn offset(self) -> u64 {
        match self {
            SdatHeaderField::Ident => 0x00,
            SdatHeaderField::Bom => 0x04,
            SdatHeaderField::Version => 0x06,
            SdatHeaderField::FileSize => 0x08,
            SdatHeaderField::HeaderSize => 0x0C,
            SdatHeaderField::BlockCount => 0x0E,
            SdatHeaderField::SymbOffset => 0x10,
            SdatHeaderField::SymbSize => 0x14,
            SdatHeaderField::InfoOffset => 0x18,
            SdatHeaderField::InfoSize => 0x1C,
            SdatHeaderField::FatOffset => 0x20,
            SdatHeaderField::FatSize => 0x24,
            SdatHeaderField::FileOffset => 0x28,
            SdatHeaderField::FileBlockSize => 0x2C,
        }
    }
}

/// Decoded archive header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdatHeader {
    pub version: u16,
    pub file_size: u32,
    pub header_size: u16,
    pub block_count: u16,
    /// `None` when the archive carries no symbol block.
    pub symb: Option<ByteRegion>,
    pub info: ByteRegion,
    pub fat: ByteRegion,
    pub file: ByteRegion,
}

impl SdatHeader {
    fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        expect_magic(source, FORMAT_ABBREVIATION, SDAT_MAGIC)?;

        let u16_at = |f: SdatHeaderField| {
            read_u16_le_at(source, f.offset()).map_err(|e| e.with_context("sdat:header"))
        };
        let u32_at = |f: SdatHeaderField| {
            read_u32_le_at(source, f.offset()).map_err(|e| e.with_context("sdat:header"))
        };

        let bom = u16_at(SdatHeaderField::Bom)?;
        if bom != SDAT_BOM {
            return Err(ParseError::UnsupportedLayout {
                format: FORMAT_ABBREVIATION,
                offset: SdatHeaderField::Bom.offset(),
                reason: format!("byte-order mark 0x{:04X}", bom),
            });
        }

        let block = |off: SdatHeaderField, size: SdatHeaderField, ctx| -> Result<ByteRegion> {
            ByteRegion::within(u32_at(off)? as u64, u32_at(size)? as u64, source.len(), ctx)
                .map_err(ParseError::into_out_of_range)
        };

        let symb = match u32_at(SdatHeaderField::SymbOffset)? {
            0 => None,
            _ => Some(block(
                SdatHeaderField::SymbOffset,
                SdatHeaderField::SymbSize,
                "sdat:SYMB",
            )?),
        };

        Ok(SdatHeader {
            version: u16_at(SdatHeaderField::Version)?,
            file_size: u32_at(SdatHeaderField::FileSize)?,
            header_size: u16_at(SdatHeaderField::HeaderSize)?,
            block_count: u16_at(SdatHeaderField::BlockCount)?,
            symb,
            info: block(
                SdatHeaderField::InfoOffset,
                SdatHeaderField::InfoSize,
                "sdat:INFO",
            )?,
            fat: block(
                SdatHeaderField::FatOffset,
                SdatHeaderField::FatSize,
                "sdat:FAT",
            )?,
            file: block(
                SdatHeaderField::FileOffset,
                SdatHeaderField::FileBlockSize,
                "sdat:FILE",
            )?,
        })
    }
}

/// A parsed sound archive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sdat {
    pub header: SdatHeader,
    pub symbols: Option<SymbolSection>,
    /// Absolute location of every file listed in the FAT.
    pub fat: Vec<ByteRegion>,
    pub info_block: Vec<u8>,
    /// File contents in FAT order.
    pub files: Vec<Vec<u8>>,
}

impl Sdat {
    pub fn probe(head: &[u8]) -> bool {
        head.starts_with(SDAT_MAGIC)
    }

    pub fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let header = SdatHeader::parse(source)?;

        let symbols = match header.symb {
            Some(region) => Some(SymbolSection::parse(source, region.offset)?),
            None => None,
        };

        let fat = read_fat(source, header.fat.offset)?;
        debug!(files = fat.len(), "sdat fat");

        let info_block = header.info.read(source)?;
        let files = fat
            .iter()
            .map(|r| read_at(source, r.offset, r.len as usize))
            .collect::<Result<Vec<_>>>()?;

        Ok(Sdat {
            header,
            symbols,
            fat,
            info_block,
            files,
        })
    }

    /// Symbol names for `category`; empty when the archive has no SYMB block.
    pub fn names(&self, category: SymbolCategory) -> &[String] {
        match &self.symbols {
            Some(s) => s.names(category),
            None => &[],
        }
    }
}

fn read_fat<S: ByteSource + ?Sized>(source: &S, fat_offset: u64) -> Result<Vec<ByteRegion>> {
    let magic = read_at(source, fat_offset, 4).map_err(|e| e.with_context("sdat:FAT"))?;
    if magic != FAT_MAGIC {
        return Err(ParseError::bad_signature(
            FORMAT_ABBREVIATION,
            fat_offset,
            FAT_MAGIC,
            &magic,
        ));
    }
    let count = read_u32_le_at(source, fat_offset + 8).map_err(|e| e.with_context("sdat:FAT"))?;

    let entries = fat_offset + 12;
    let available = source.len().saturating_sub(entries);
    if count as u64 * FAT_ENTRY_SIZE > available {
        return Err(ParseError::OffsetOutOfRange {
            offset: entries,
            needed: count as u64 * FAT_ENTRY_SIZE,
            available,
            context: "sdat:FAT entries",
        });
    }

    (0..count as u64)
        .map(|i| {
            let entry = entries + i * FAT_ENTRY_SIZE;
            let offset = read_u32_le_at(source, entry)? as u64;
            let size = read_u32_le_at(source, entry + 4)? as u64;
            ByteRegion::within(offset, size, source.len(), "sdat:FAT file")
                .map_err(ParseError::into_out_of_range)
        })
        .collect()
}

impl FormatIdentity for Sdat {
    fn abbreviation(&self) -> &'static str {
        FORMAT_ABBREVIATION
    }

    fn initialize(&mut self, source: &dyn ByteSource) -> Result<()> {
        *self = Sdat::parse(source)?;
        Ok(())
    }

    fn update_fingerprint(
        &self,
        checksum: &mut Fingerprint,
        _ctx: &FingerprintContext<'_>,
    ) -> Result<()> {
        checksum.reset();
        checksum.update(&self.info_block);
        for file in &self.files {
            checksum.update(file);
        }
        Ok(())
    }

    fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        for category in SymbolCategory::ALL {
            tags.push(category.label(), join_names(self.names(category)));
        }
        tags.push("Files", self.fat.len().to_string());
        tags
    }
}
