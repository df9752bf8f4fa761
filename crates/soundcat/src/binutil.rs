//! Utilities used by parsers: parse error type, byte sources and positional readers.
//!
//! Every reader in this module takes an explicit absolute offset. Sources
//! carry no shared cursor, so independent parses of independent sources
//! can run side by side without coordination.
use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use thiserror::Error;

/// Size of the window used when scanning a source for a pattern or terminator.
const SCAN_WINDOW: usize = 64 * 1024;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Error type returned by the parsers and the demultiplexer.
///
/// Every variant is fatal for the file being processed. Variants carry the
/// absolute offset and a short logical location (`context`) so that batch
/// callers can report something more useful than "parse failed".
#[derive(Debug, Error)]
pub enum ParseError {
    /// Fewer bytes were available than a read required.
    #[error(
        "truncated read at {context}: 0x{offset:X} (needed {needed} bytes, available {available})"
    )]
    TruncatedRead {
        offset: u64,
        needed: u64,
        available: u64,
        context: &'static str,
    },

    /// A terminator-delimited run reached the end of the source first.
    #[error("unterminated run at {context}: no 0x{terminator:02X} after 0x{offset:X}")]
    UnterminatedRun {
        offset: u64,
        terminator: u8,
        context: &'static str,
    },

    /// Parallel per-track arrays disagree on the number of tracks.
    #[error(
        "inconsistent track count: time={}, fade={}, tlbl={}",
        count_or_absent(.times),
        count_or_absent(.fades),
        count_or_absent(.labels)
    )]
    InconsistentTrackCount {
        times: Option<usize>,
        fades: Option<usize>,
        labels: Option<usize>,
    },

    /// A computed offset points outside the source.
    #[error(
        "offset out of range at {context}: 0x{offset:X} (needed {needed} bytes, available {available})"
    )]
    OffsetOutOfRange {
        offset: u64,
        needed: u64,
        available: u64,
        context: &'static str,
    },

    /// The input does not have the layout the selected format expects.
    #[error("unsupported {format} layout at 0x{offset:X}: {reason}")]
    UnsupportedLayout {
        format: &'static str,
        offset: u64,
        reason: String,
    },

    /// A multiplexed stream has no pack header anywhere.
    #[error("cannot find pack header in {}", .path.display())]
    NoPackHeaderFound { path: PathBuf },

    /// A start code was not present in the block table.
    #[error("block id 0x{code:08X} at 0x{offset:08X} not found in table")]
    UnknownBlockId { offset: u64, code: u32 },

    /// Decompressing an embedded program failed.
    #[error("decompression failed at 0x{offset:X}: {source}")]
    Decompress {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn count_or_absent(count: &Option<usize>) -> String {
    match count {
        Some(n) => n.to_string(),
        None => "absent".to_string(),
    }
}

impl ParseError {
    /// Build an `UnsupportedLayout` error for a signature mismatch.
    pub fn bad_signature(format: &'static str, offset: u64, expected: &[u8], found: &[u8]) -> Self {
        ParseError::UnsupportedLayout {
            format,
            offset,
            reason: format!(
                "expected signature {} found {}",
                hex_string(expected),
                hex_string(found)
            ),
        }
    }

    /// Replace the logical location of positional errors.
    ///
    /// Other variants are returned unchanged.
    pub fn with_context(self, ctx: &'static str) -> Self {
        match self {
            ParseError::TruncatedRead {
                offset,
                needed,
                available,
                ..
            } => ParseError::TruncatedRead {
                offset,
                needed,
                available,
                context: ctx,
            },
            ParseError::OffsetOutOfRange {
                offset,
                needed,
                available,
                ..
            } => ParseError::OffsetOutOfRange {
                offset,
                needed,
                available,
                context: ctx,
            },
            ParseError::UnterminatedRun {
                offset, terminator, ..
            } => ParseError::UnterminatedRun {
                offset,
                terminator,
                context: ctx,
            },
            other => other,
        }
    }

    /// Reinterpret a short read as an out-of-range offset.
    ///
    /// Table resolvers compute offsets from embedded pointers; running off the
    /// end there means the pointer is bad, not that the file was cut short.
    pub fn into_out_of_range(self) -> Self {
        match self {
            ParseError::TruncatedRead {
                offset,
                needed,
                available,
                context,
            } => ParseError::OffsetOutOfRange {
                offset,
                needed,
                available,
                context,
            },
            other => other,
        }
    }
}

/// Render bytes as contiguous uppercase hex (`"4E534645"`).
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Decode single-byte text. Each byte maps to the code point of equal value.
pub fn decode_single_byte(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// A positional, read-only byte source.
///
/// Implemented for in-memory buffers and for any `Read + Seek` via
/// [`SeekSource`].
pub trait ByteSource {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is short only when the end
    /// of the source is reached.
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let total = <[u8]>::len(self) as u64;
        if offset >= total {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(<[u8]>::len(self) - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.as_slice().read_into(offset, buf)
    }
}

/// Byte source over a seekable reader (typically a `BufReader<File>`).
///
/// The reader's own position is an implementation detail: every
/// `read_into` seeks to the requested offset first.
pub struct SeekSource<R> {
    inner: RefCell<R>,
    len: u64,
}

impl<R: Read + Seek> SeekSource<R> {
    /// Wrap `reader`, measuring its length once.
    pub fn new(mut reader: R) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(SeekSource {
            inner: RefCell::new(reader),
            len,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> ByteSource for SeekSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let want = buf.len().min((self.len - offset) as usize);
        let mut reader = self.inner.borrow_mut();
        reader.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < want {
            match reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// An immutable `(offset, len)` view into a byte source.
///
/// Nothing is copied until [`ByteRegion::read`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRegion {
    pub offset: u64,
    pub len: u64,
}

impl ByteRegion {
    /// Create a region, checking it lies within a source of `source_len` bytes.
    pub fn within(offset: u64, len: u64, source_len: u64, context: &'static str) -> Result<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= source_len => Ok(ByteRegion { offset, len }),
            _ => Err(ParseError::TruncatedRead {
                offset,
                needed: len,
                available: source_len.saturating_sub(offset),
                context,
            }),
        }
    }

    /// Offset one past the last byte of the region.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Materialize the region.
    pub fn read<S: ByteSource + ?Sized>(&self, source: &S) -> Result<Vec<u8>> {
        read_at(source, self.offset, self.len as usize)
    }

    /// Borrow the region from an in-memory buffer.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        read_slice(bytes, self.offset as usize, self.len as usize)
    }
}

/// Read exactly `len` bytes at `offset`.
///
/// Fails with `TruncatedRead` if fewer than `len` bytes are available.
pub fn read_at<S: ByteSource + ?Sized>(source: &S, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(source, offset, &mut buf)?;
    Ok(buf)
}

/// Fill `buf` completely from `offset`, or fail with `TruncatedRead`.
pub fn read_exact_at<S: ByteSource + ?Sized>(source: &S, offset: u64, buf: &mut [u8]) -> Result<()> {
    let got = source.read_into(offset, buf)?;
    if got < buf.len() {
        return Err(ParseError::TruncatedRead {
            offset,
            needed: buf.len() as u64,
            available: got as u64,
            context: "read_at",
        });
    }
    Ok(())
}

/// Return a borrowed slice of length `len` starting at `off` from `bytes`.
///
/// Returns `Err(ParseError::TruncatedRead)` when the requested range exceeds
/// the available buffer.
pub fn read_slice(bytes: &[u8], off: usize, len: usize) -> Result<&[u8]> {
    match off.checked_add(len) {
        Some(end) if end <= bytes.len() => Ok(&bytes[off..end]),
        _ => Err(ParseError::TruncatedRead {
            offset: off as u64,
            needed: len as u64,
            // Report the remaining number of bytes from `off` to the end of the buffer.
            available: bytes.len().saturating_sub(off) as u64,
            context: "read_slice",
        }),
    }
}

/// Find the next occurrence of `pattern` at or after `from`.
///
/// Linear scan; returns `Ok(None)` when the pattern does not occur.
pub fn find_next<S: ByteSource + ?Sized>(
    source: &S,
    from: u64,
    pattern: &[u8],
) -> Result<Option<u64>> {
    if pattern.is_empty() {
        return Ok((from <= source.len()).then_some(from));
    }
    let overlap = pattern.len() - 1;
    let mut window = vec![0u8; SCAN_WINDOW.max(pattern.len() * 2)];
    let mut pos = from;
    while pos < source.len() {
        let got = source.read_into(pos, &mut window)?;
        if got < pattern.len() {
            break;
        }
        if let Some(i) = window[..got].windows(pattern.len()).position(|w| w == pattern) {
            return Ok(Some(pos + i as u64));
        }
        // Keep the last `overlap` bytes so a match straddling windows is seen.
        pos += (got - overlap) as u64;
    }
    Ok(None)
}

/// Count bytes from `from` up to (not including) the next `terminator`.
///
/// Fails with `UnterminatedRun` if the source ends first.
pub fn run_length<S: ByteSource + ?Sized>(source: &S, from: u64, terminator: u8) -> Result<u64> {
    let mut window = vec![0u8; SCAN_WINDOW];
    let mut pos = from;
    loop {
        let got = source.read_into(pos, &mut window)?;
        if got == 0 {
            return Err(ParseError::UnterminatedRun {
                offset: from,
                terminator,
                context: "run_length",
            });
        }
        if let Some(i) = window[..got].iter().position(|&b| b == terminator) {
            return Ok(pos - from + i as u64);
        }
        pos += got as u64;
    }
}

/// Read a null-terminated single-byte string at `offset`.
pub fn read_cstring<S: ByteSource + ?Sized>(source: &S, offset: u64) -> Result<String> {
    let len = run_length(source, offset, 0x00)?;
    let bytes = read_at(source, offset, len as usize)?;
    Ok(decode_single_byte(&bytes))
}

/// Read a single byte at `off`.
pub fn read_u8_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<u8> {
    let mut tmp = [0u8; 1];
    read_exact_at(source, off, &mut tmp)?;
    Ok(tmp[0])
}

/// Read a 16-bit little-endian unsigned integer at `off`.
pub fn read_u16_le_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<u16> {
    let mut tmp = [0u8; 2];
    read_exact_at(source, off, &mut tmp)?;
    Ok(u16::from_le_bytes(tmp))
}

/// Read a 16-bit big-endian unsigned integer at `off`.
pub fn read_u16_be_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<u16> {
    let mut tmp = [0u8; 2];
    read_exact_at(source, off, &mut tmp)?;
    Ok(u16::from_be_bytes(tmp))
}

/// Read a 32-bit little-endian unsigned integer at `off`.
pub fn read_u32_le_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<u32> {
    let mut tmp = [0u8; 4];
    read_exact_at(source, off, &mut tmp)?;
    Ok(u32::from_le_bytes(tmp))
}

/// Read a 32-bit big-endian unsigned integer at `off`.
pub fn read_u32_be_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<u32> {
    let mut tmp = [0u8; 4];
    read_exact_at(source, off, &mut tmp)?;
    Ok(u32::from_be_bytes(tmp))
}

/// Read a 32-bit little-endian signed integer at `off`.
pub fn read_i32_le_at<S: ByteSource + ?Sized>(source: &S, off: u64) -> Result<i32> {
    let v = read_u32_le_at(source, off)?;
    Ok(i32::from_le_bytes(v.to_le_bytes()))
}

/// Read a big-endian unsigned integer of `width` bytes (1..=8) at `off`.
pub fn read_be_uint<S: ByteSource + ?Sized>(source: &S, off: u64, width: usize) -> Result<u64> {
    debug_assert!((1..=8).contains(&width));
    let mut tmp = [0u8; 8];
    read_exact_at(source, off, &mut tmp[8 - width..])?;
    Ok(u64::from_be_bytes(tmp))
}
