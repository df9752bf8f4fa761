//! Start-code dispatch tables.
use std::collections::HashMap;

/// Pack header start code, `00 00 01 BA`.
pub const PACK_START_CODE: u32 = 0x0000_01BA;
/// Program end code, `00 00 01 B9`.
pub const PROGRAM_END_CODE: u32 = 0x0000_01B9;
pub const SYSTEM_HEADER_CODE: u32 = 0x0000_01BB;
pub const PRIVATE_STREAM_1_CODE: u32 = 0x0000_01BD;
pub const PADDING_STREAM_CODE: u32 = 0x0000_01BE;
pub const PRIVATE_STREAM_2_CODE: u32 = 0x0000_01BF;

pub const PACK_START_BYTES: [u8; 4] = PACK_START_CODE.to_be_bytes();

/// How to find the end of a block once its start code is known.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockSize {
    /// Fixed total size, start code included.
    Static(u32),
    /// A big-endian length of the given width follows the start code and
    /// counts the bytes after it.
    LengthPrefixed(u8),
    /// Stop scanning.
    EndOfStream,
}

/// Immutable mapping from a start code (read big-endian) to its block size.
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    entries: HashMap<u32, BlockSize>,
}

impl BlockTable {
    /// Table for an MPEG program stream with a fixed-size pack header.
    ///
    /// System header, padding, private stream 2, audio (`C0`..`DF`) and
    /// video (`E0`..`EF`) blocks are length-prefixed with two bytes.
    pub fn mpeg_program_stream(pack_header_size: u32) -> Self {
        let mut table = BlockTable::default()
            .with(PROGRAM_END_CODE, BlockSize::EndOfStream)
            .with(PACK_START_CODE, BlockSize::Static(pack_header_size))
            .with(SYSTEM_HEADER_CODE, BlockSize::LengthPrefixed(2))
            .with(PADDING_STREAM_CODE, BlockSize::LengthPrefixed(2))
            .with(PRIVATE_STREAM_2_CODE, BlockSize::LengthPrefixed(2));
        for id in 0xC0..=0xEF {
            table = table.with(0x0000_0100 | id, BlockSize::LengthPrefixed(2));
        }
        table
    }

    /// Add or replace an entry.
    pub fn with(mut self, code: u32, size: BlockSize) -> Self {
        debug_assert!(
            size != BlockSize::Static(0),
            "zero-sized static block would never advance"
        );
        debug_assert!(
            size != BlockSize::EndOfStream
                || self.end_of_stream_code().is_none_or(|c| c == code),
            "a block table has exactly one end-of-stream code"
        );
        self.entries.insert(code, size);
        self
    }

    pub fn lookup(&self, code: u32) -> Option<BlockSize> {
        self.entries.get(&code).copied()
    }

    pub fn end_of_stream_code(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, s)| **s == BlockSize::EndOfStream)
            .map(|(c, _)| *c)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
