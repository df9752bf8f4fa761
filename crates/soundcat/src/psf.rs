//! PSF-family container parsing.
//!
//! ```text
//! 0x00  "PSF"
//! 0x03  version byte (selects the platform, see [`version_abbreviation`])
//! 0x04  reserved area size R
//! 0x08  compressed program size N
//! 0x0C  CRC-32 of the compressed program
//! 0x10  reserved area (R bytes)
//! 0x10+R  zlib-compressed program (N bytes)
//! 0x10+R+N  optional "[TAG]" followed by key=value lines
//! ```
//!
//! Sets built from a shared driver put it in a separate file named by the
//! `_lib` tag (then `_lib2`, `_lib3`, ...). With library hashing enabled the
//! fingerprint of every file in the set folds in the library's own
//! fingerprint, fetched through the caller's [`LibraryHashCache`].
//!
//! [`LibraryHashCache`]: crate::format::LibraryHashCache
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use tracing::{debug, trace};

use crate::binutil::{
    ByteRegion, ByteSource, ParseError, Result, SeekSource, decode_single_byte, read_at,
    read_u32_le_at, read_u8_at,
};
use crate::format::{Fingerprint, FingerprintContext, FormatIdentity};
use crate::meta::Tags;

pub const PSF_MAGIC: &[u8; 3] = b"PSF";
pub const TAG_MARKER: &[u8; 5] = b"[TAG]";
const FORMAT_FAMILY: &str = "PSF";

/// Header fields and their offsets.
#[derive(Copy, Clone, Debug)]
pub enum PsfHeaderField {
    Ident,
    Version,
    ReservedSize,
    ProgramSize,
    ProgramCrc,
}

impl PsfHeaderField {
    pub fn offset(self) -> u64 {
        match self {
            PsfHeaderField::Ident => 0x00,
            PsfHeaderField::Version => 0x03,
            PsfHeaderField::ReservedSize => 0x04,
            PsfHeaderField::ProgramSize => 0x08,
            PsfHeaderField::ProgramCrc => 0x0C,
        }
    }

    pub fn len(self) -> usize {
        match self {
            PsfHeaderField::Ident => 3,
            PsfHeaderField::Version => 1,
            _ => 4,
        }
    }
}

/// Size of the fixed header; the reserved area follows it.
pub const PSF_HEADER_SIZE: u64 = 0x10;

/// Platform abbreviation for a version byte.
pub fn version_abbreviation(version: u8) -> Option<&'static str> {
    match version {
        0x01 => Some("PSF"),
        0x02 => Some("PSF2"),
        0x11 => Some("SSF"),
        0x12 => Some("DSF"),
        0x21 => Some("USF"),
        0x22 => Some("GSF"),
        0x23 => Some("SNSF"),
        0x24 => Some("2SF"),
        0x41 => Some("QSF"),
        _ => None,
    }
}

/// A parsed PSF-family file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Psf {
    pub version: u8,
    pub reserved: Vec<u8>,
    /// Location of the compressed program in the source.
    pub program_region: ByteRegion,
    pub program_crc: u32,
    /// Decompressed program.
    pub program: Vec<u8>,
    /// `[TAG]` pairs in order of first appearance. Repeated keys are joined
    /// with `'\n'`.
    pub metadata: Vec<(String, String)>,
}

impl Psf {
    pub fn probe(head: &[u8]) -> bool {
        head.starts_with(PSF_MAGIC)
    }

    pub fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let magic = read_at(source, 0, PsfHeaderField::Ident.len())?;
        if magic != PSF_MAGIC {
            return Err(ParseError::bad_signature(FORMAT_FAMILY, 0, PSF_MAGIC, &magic));
        }
        let version = read_u8_at(source, PsfHeaderField::Version.offset())?;
        if version_abbreviation(version).is_none() {
            return Err(ParseError::UnsupportedLayout {
                format: FORMAT_FAMILY,
                offset: PsfHeaderField::Version.offset(),
                reason: format!("unknown version byte 0x{:02X}", version),
            });
        }

        let header = |f: PsfHeaderField| {
            read_u32_le_at(source, f.offset()).map_err(|e| e.with_context("psf:header"))
        };
        let reserved_size = header(PsfHeaderField::ReservedSize)? as u64;
        let program_size = header(PsfHeaderField::ProgramSize)? as u64;
        let program_crc = header(PsfHeaderField::ProgramCrc)?;

        let reserved_region =
            ByteRegion::within(PSF_HEADER_SIZE, reserved_size, source.len(), "psf:reserved")?;
        let program_region = ByteRegion::within(
            reserved_region.end(),
            program_size,
            source.len(),
            "psf:program",
        )?;

        let reserved = reserved_region.read(source)?;
        let compressed = program_region.read(source)?;
        let program = if compressed.is_empty() {
            Vec::new()
        } else {
            let actual = crc32fast::hash(&compressed);
            if actual != program_crc {
                return Err(ParseError::UnsupportedLayout {
                    format: FORMAT_FAMILY,
                    offset: PsfHeaderField::ProgramCrc.offset(),
                    reason: format!(
                        "program crc 0x{:08X} does not match stored 0x{:08X}",
                        actual, program_crc
                    ),
                });
            }
            inflate(&compressed, program_region.offset)?
        };
        debug!(
            version,
            reserved = reserved.len(),
            compressed = compressed.len(),
            program = program.len(),
            "psf program"
        );

        let metadata = read_tag_section(source, program_region.end())?;

        Ok(Psf {
            version,
            reserved,
            program_region,
            program_crc,
            program,
            metadata,
        })
    }

    /// Value of the `[TAG]` entry `key` (case-insensitive).
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Library file names in load order: `_lib`, `_lib2`, `_lib3`, ...
    ///
    /// Stops at the first missing index.
    pub fn libraries(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(lib) = self.tag("_lib") {
            out.push(lib);
        }
        for n in 2.. {
            match self.tag(&format!("_lib{}", n)) {
                Some(lib) => out.push(lib),
                None => break,
            }
        }
        out
    }

    /// Fingerprint over this file's own content, ignoring libraries.
    pub fn base_fingerprint(&self) -> Fingerprint {
        let mut checksum = Fingerprint::new();
        self.feed_own_fields(&mut checksum);
        checksum
    }

    fn feed_own_fields(&self, checksum: &mut Fingerprint) {
        checksum.reset();
        checksum.update(&[self.version]);
        checksum.update(&self.reserved);
        checksum.update(&self.program);
    }
}

fn inflate(compressed: &[u8], offset: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut out)
        .map_err(|source| ParseError::Decompress { offset, source })?;
    Ok(out)
}

fn read_tag_section<S: ByteSource + ?Sized>(
    source: &S,
    offset: u64,
) -> Result<Vec<(String, String)>> {
    if source.len() < offset + TAG_MARKER.len() as u64 {
        return Ok(Vec::new());
    }
    if read_at(source, offset, TAG_MARKER.len())? != TAG_MARKER {
        return Ok(Vec::new());
    }
    let start = offset + TAG_MARKER.len() as u64;
    let text = decode_single_byte(&read_at(source, start, (source.len() - start) as usize)?);
    Ok(parse_tag_text(&text))
}

/// Parse `key=value` lines. Lines without `=` are ignored; keys and values
/// are trimmed; a repeated key appends to the earlier value on a new line.
pub(crate) fn parse_tag_text(text: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        match out.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, existing)) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => out.push((key.to_string(), value.to_string())),
        }
    }
    out
}

/// Parse the library at `path` and return its own fingerprint.
fn library_fragment(path: &Path) -> Result<u32> {
    let source = SeekSource::new(BufReader::new(File::open(path)?))?;
    let lib = Psf::parse(&source)?;
    Ok(lib.base_fingerprint().value())
}

fn resolve_library(file: &Path, name: &str) -> Result<PathBuf> {
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(name).canonicalize()?)
}

impl FormatIdentity for Psf {
    fn abbreviation(&self) -> &'static str {
        version_abbreviation(self.version).unwrap_or(FORMAT_FAMILY)
    }

    fn initialize(&mut self, source: &dyn ByteSource) -> Result<()> {
        *self = Psf::parse(source)?;
        Ok(())
    }

    fn update_fingerprint(
        &self,
        checksum: &mut Fingerprint,
        ctx: &FingerprintContext<'_>,
    ) -> Result<()> {
        self.feed_own_fields(checksum);

        let Some(path) = ctx.path.filter(|_| ctx.use_library_hash) else {
            return Ok(());
        };
        for name in self.libraries() {
            let lib_path = resolve_library(path, name)?;
            let fragment = ctx
                .library_hashes
                .get_or_insert_with(&lib_path, || library_fragment(&lib_path))?;
            trace!(library = %lib_path.display(), fragment, "psf library fragment");
            checksum.update(&fragment.to_be_bytes());
        }
        Ok(())
    }

    fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.push("Format", self.abbreviation());
        for (key, value) in &self.metadata {
            tags.push(key.as_str(), value.as_str());
        }
        tags
    }
}
