//! Chunk container walker.
//!
//! A chunk container is a magic signature followed by a run of
//! self-describing chunks:
//!
//! ```text
//! +0  size   u32 LE   payload length
//! +4  ident  [u8; 4]  chunk identifier (usually ASCII)
//! +8  payload         `size` bytes
//! ```
//!
//! The next chunk starts immediately after the payload. Walking stops when
//! the cursor reaches or passes the end of the source. A chunk whose header
//! or payload would run past the end is a fatal error: there is no recovery
//! point to resynchronize on.
//!
//! [`ChunkReader`] is the lazy form; [`parse_chunks`] collects it and returns
//! either every chunk or an error, never a partial list.
use tracing::debug;

use crate::binutil::{ByteRegion, ByteSource, ParseError, Result, read_exact_at};

/// Size of the `(size, ident)` header that precedes each payload.
pub const CHUNK_HEADER_SIZE: u64 = 8;

/// One chunk discovered in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// The raw little-endian size field.
    pub size: u32,
    pub ident: [u8; 4],
    /// Payload location in the source; `payload.len == size`.
    pub payload: ByteRegion,
}

impl Chunk {
    /// Absolute offset of the chunk header.
    pub fn offset(&self) -> u64 {
        self.payload.offset - CHUNK_HEADER_SIZE
    }

    /// Absolute offset one past the payload; where the next chunk begins.
    pub fn end(&self) -> u64 {
        self.payload.end()
    }

    /// Identifier rendered as text, with non-printable bytes escaped.
    pub fn ident_str(&self) -> String {
        self.ident.escape_ascii().to_string()
    }

    pub fn is(&self, ident: &[u8; 4]) -> bool {
        &self.ident == ident
    }
}

/// Lazy, finite, non-restartable iterator over the chunks of a source.
///
/// After the first error the iterator is exhausted.
pub struct ChunkReader<'a, S: ?Sized> {
    source: &'a S,
    cursor: u64,
    failed: bool,
}

impl<'a, S: ByteSource + ?Sized> ChunkReader<'a, S> {
    /// Start walking at `initial_offset` (immediately after the magic).
    pub fn new(source: &'a S, initial_offset: u64) -> Self {
        ChunkReader {
            source,
            cursor: initial_offset,
            failed: false,
        }
    }

    /// Offset the next chunk would be read from.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    fn read_chunk(&mut self) -> Result<Chunk> {
        let len = self.source.len();
        let mut header = [0u8; CHUNK_HEADER_SIZE as usize];
        read_exact_at(self.source, self.cursor, &mut header)
            .map_err(|e| e.with_context("chunk header"))?;

        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let ident = [header[4], header[5], header[6], header[7]];
        let payload = ByteRegion::within(
            self.cursor + CHUNK_HEADER_SIZE,
            size as u64,
            len,
            "chunk payload",
        )?;

        debug!(
            offset = self.cursor,
            ident = %ident.escape_ascii(),
            size,
            "chunk"
        );

        self.cursor = payload.end();
        Ok(Chunk {
            size,
            ident,
            payload,
        })
    }
}

impl<S: ByteSource + ?Sized> Iterator for ChunkReader<'_, S> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.source.len() {
            return None;
        }
        let item = self.read_chunk();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Walk every chunk from `initial_offset` to the end of `source`.
///
/// Returns the chunks in file order, or the first error encountered.
pub fn parse_chunks<S: ByteSource + ?Sized>(source: &S, initial_offset: u64) -> Result<Vec<Chunk>> {
    ChunkReader::new(source, initial_offset).collect()
}

/// Return the last chunk carrying `ident`.
///
/// Containers may repeat an identifier; the last occurrence wins.
pub fn last_chunk<'c>(chunks: &'c [Chunk], ident: &[u8; 4]) -> Option<&'c Chunk> {
    chunks.iter().rev().find(|c| c.is(ident))
}

/// Check the container magic at offset 0.
pub(crate) fn expect_magic<S: ByteSource + ?Sized>(
    source: &S,
    format: &'static str,
    magic: &[u8],
) -> Result<()> {
    let mut found = vec![0u8; magic.len()];
    let got = source.read_into(0, &mut found)?;
    if got < magic.len() || found != magic {
        return Err(ParseError::bad_signature(format, 0, magic, &found[..got]));
    }
    Ok(())
}
