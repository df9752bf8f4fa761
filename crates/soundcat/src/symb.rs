//! SDAT `SYMB` (symbol) section resolver.
//!
//! The symbol section names the records of a Nintendo DS sound archive.
//! Its header holds one 32-bit pointer per record category; every pointer
//! and every offset reached through it is relative to the start of the
//! section:
//!
//! ```text
//! section + 0x00  "SYMB"
//! section + 0x04  section size
//! section + 0x08  -> sequence table
//! section + 0x0C  -> sequence archive table (two-level, see below)
//! section + 0x10  -> bank table
//! section + 0x14  -> wave archive table
//! section + 0x18  -> player table
//! section + 0x1C  -> group table
//! section + 0x20  -> player2 table
//! section + 0x24  -> stream table
//!
//! table:          count u32, then count x name offset u32
//! name:           null-terminated single-byte text
//! ```
//!
//! Published descriptions of the format disagree on which of the fields at
//! 0x18 and 0x20 is "the" player table, so both are read verbatim under
//! separate categories.
//!
//! Sequence archive entries are `(name offset, sub-table offset)` pairs;
//! each sub-table is a normal name table listing the archive's sequences.
use std::collections::BTreeMap;

use tracing::debug;

use crate::binutil::{ByteSource, ParseError, Result, read_at, read_cstring, read_u32_le_at};

pub const SYMB_MAGIC: &[u8; 4] = b"SYMB";

/// Record categories named by the symbol section.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolCategory {
    Sequence,
    SequenceArchive,
    Bank,
    WaveArchive,
    Player,
    Group,
    Player2,
    Stream,
}

impl SymbolCategory {
    pub const ALL: [SymbolCategory; 8] = [
        SymbolCategory::Sequence,
        SymbolCategory::SequenceArchive,
        SymbolCategory::Bank,
        SymbolCategory::WaveArchive,
        SymbolCategory::Player,
        SymbolCategory::Group,
        SymbolCategory::Player2,
        SymbolCategory::Stream,
    ];

    /// Offset of this category's pointer field, relative to the section.
    pub fn pointer_offset(self) -> u64 {
        match self {
            SymbolCategory::Sequence => 0x08,
            SymbolCategory::SequenceArchive => 0x0C,
            SymbolCategory::Bank => 0x10,
            SymbolCategory::WaveArchive => 0x14,
            SymbolCategory::Player => 0x18,
            SymbolCategory::Group => 0x1C,
            SymbolCategory::Player2 => 0x20,
            SymbolCategory::Stream => 0x24,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SymbolCategory::Sequence => "Sequences",
            SymbolCategory::SequenceArchive => "Sequence Archives",
            SymbolCategory::Bank => "Banks",
            SymbolCategory::WaveArchive => "Wave Archives",
            SymbolCategory::Player => "Players",
            SymbolCategory::Group => "Groups",
            SymbolCategory::Player2 => "Players (alt)",
            SymbolCategory::Stream => "Streams",
        }
    }
}

/// A named sequence archive and the names of the sequences inside it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceArchiveSymbol {
    pub name: String,
    pub sequences: Vec<String>,
}

/// A fully resolved symbol section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolSection {
    pub section_base: u64,
    pub section_size: u32,
    /// Raw pointer field per category, as stored.
    pub pointers: BTreeMap<SymbolCategory, u32>,
    pub names: BTreeMap<SymbolCategory, Vec<String>>,
    pub sequence_archives: Vec<SequenceArchiveSymbol>,
}

impl SymbolSection {
    /// Verify the section header at `section_base` and resolve every category.
    pub fn parse<S: ByteSource + ?Sized>(source: &S, section_base: u64) -> Result<Self> {
        let sig = read_at(source, section_base, 4)
            .map_err(|e| e.with_context("symb:signature").into_out_of_range())?;
        if sig != SYMB_MAGIC {
            return Err(ParseError::bad_signature(
                "SYMB",
                section_base,
                SYMB_MAGIC,
                &sig,
            ));
        }
        let section_size = read_u32_le_at(source, section_base + 4)
            .map_err(|e| e.with_context("symb:size").into_out_of_range())?;

        let mut pointers = BTreeMap::new();
        for category in SymbolCategory::ALL {
            pointers.insert(category, read_pointer(source, section_base, category)?);
        }

        let names = resolve_section(source, section_base)?;
        let sequence_archives = match pointers[&SymbolCategory::SequenceArchive] {
            0 => Vec::new(),
            p => read_archive_table(source, section_base, p)?,
        };

        Ok(SymbolSection {
            section_base,
            section_size,
            pointers,
            names,
            sequence_archives,
        })
    }

    /// Names for `category`, empty if the category is absent.
    pub fn names(&self, category: SymbolCategory) -> &[String] {
        self.names
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Resolve every category of the symbol section at `section_base`.
///
/// A pointer field of 0 marks an absent category and yields an empty list,
/// as does a table with a count of 0. Any offset computed from the table
/// that falls outside the source fails with `OffsetOutOfRange`.
pub fn resolve_section<S: ByteSource + ?Sized>(
    source: &S,
    section_base: u64,
) -> Result<BTreeMap<SymbolCategory, Vec<String>>> {
    let mut out = BTreeMap::new();
    for category in SymbolCategory::ALL {
        let pointer = read_pointer(source, section_base, category)?;
        let names = match (category, pointer) {
            (_, 0) => Vec::new(),
            (SymbolCategory::SequenceArchive, p) => read_archive_table(source, section_base, p)?
                .into_iter()
                .map(|a| a.name)
                .collect(),
            (_, p) => read_name_table(source, section_base, p)?,
        };
        debug!(?category, pointer, count = names.len(), "symb category");
        out.insert(category, names);
    }
    Ok(out)
}

fn read_pointer<S: ByteSource + ?Sized>(
    source: &S,
    section_base: u64,
    category: SymbolCategory,
) -> Result<u32> {
    read_u32_le_at(source, section_base + category.pointer_offset())
        .map_err(|e| e.with_context("symb:pointer").into_out_of_range())
}

/// Read a table count and check that `count * entry_size` bytes follow it.
fn read_count<S: ByteSource + ?Sized>(
    source: &S,
    table: u64,
    entry_size: u64,
    ctx: &'static str,
) -> Result<u32> {
    let count = read_u32_le_at(source, table)
        .map_err(|e| e.with_context(ctx).into_out_of_range())?;
    let entries = table + 4;
    let available = source.len().saturating_sub(entries);
    let needed = count as u64 * entry_size;
    if needed > available {
        return Err(ParseError::OffsetOutOfRange {
            offset: entries,
            needed,
            available,
            context: ctx,
        });
    }
    Ok(count)
}

/// Read a `count + [name offset; count]` table at `section_base + pointer`.
pub(crate) fn read_name_table<S: ByteSource + ?Sized>(
    source: &S,
    section_base: u64,
    pointer: u32,
) -> Result<Vec<String>> {
    let table = section_base + pointer as u64;
    let count = read_count(source, table, 4, "symb:count")?;

    let mut names = Vec::with_capacity(count as usize);
    for i in 1..=count as u64 {
        let entry = read_u32_le_at(source, table + 4 * i)
            .map_err(|e| e.with_context("symb:entry").into_out_of_range())?;
        names.push(read_name(source, section_base, entry)?);
    }
    Ok(names)
}

fn read_archive_table<S: ByteSource + ?Sized>(
    source: &S,
    section_base: u64,
    pointer: u32,
) -> Result<Vec<SequenceArchiveSymbol>> {
    let table = section_base + pointer as u64;
    let count = read_count(source, table, 8, "symb:seqarc count")?;

    let mut archives = Vec::with_capacity(count as usize);
    for i in 0..count as u64 {
        let entry = table + 4 + 8 * i;
        let name_offset = read_u32_le_at(source, entry)
            .map_err(|e| e.with_context("symb:seqarc entry").into_out_of_range())?;
        let sub_table = read_u32_le_at(source, entry + 4)
            .map_err(|e| e.with_context("symb:seqarc entry").into_out_of_range())?;

        let sequences = match sub_table {
            0 => Vec::new(),
            p => read_name_table(source, section_base, p)?,
        };
        archives.push(SequenceArchiveSymbol {
            name: read_name(source, section_base, name_offset)?,
            sequences,
        });
    }
    Ok(archives)
}

/// A name offset of 0 marks an unnamed slot.
fn read_name<S: ByteSource + ?Sized>(source: &S, section_base: u64, entry: u32) -> Result<String> {
    if entry == 0 {
        return Ok(String::new());
    }
    let at = section_base + entry as u64;
    if at >= source.len() {
        return Err(ParseError::OffsetOutOfRange {
            offset: at,
            needed: 1,
            available: 0,
            context: "symb:name",
        });
    }
    read_cstring(source, at).map_err(|e| e.with_context("symb:name"))
}
