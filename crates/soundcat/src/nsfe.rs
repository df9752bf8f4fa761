//! NSFe (extended NES Sound Format) parsing.
//!
//! An NSFe file is the magic `NSFE` followed by a chunk container (see
//! [`crate::chunk`]). Chunk identifiers understood here:
//!
//! | ident  | contents                                                 |
//! |--------|----------------------------------------------------------|
//! | `INFO` | load/init/play addresses, region bits, chip bits, songs  |
//! | `DATA` | 6502 program image                                       |
//! | `BANK` | bank-switch init values                                  |
//! | `plst` | playlist (track indices)                                 |
//! | `time` | i32 LE track lengths in ms                               |
//! | `fade` | i32 LE fade lengths in ms                                |
//! | `tlbl` | null-terminated track labels                             |
//! | `auth` | name, artist, copyright, ripper (null-terminated)        |
//! | `NEND` | end marker                                               |
//!
//! Missing chunks leave their fields empty. Unknown chunks are skipped. If
//! an identifier appears more than once, the last occurrence wins.
use tracing::debug;

use crate::binutil::{
    ByteSource, ParseError, Result, decode_single_byte, read_at, read_slice, run_length,
};
use crate::chunk::{Chunk, expect_magic, last_chunk, parse_chunks};
use crate::format::{Fingerprint, FingerprintContext, FormatIdentity};
use crate::meta::{Tags, format_duration_ms};

pub const NSFE_MAGIC: &[u8; 4] = b"NSFE";
const FORMAT_ABBREVIATION: &str = "NSFE";

/// Chunks start right after the magic.
const INITIAL_CHUNK_OFFSET: u64 = 0x04;

/// Chunk identifiers.
pub mod ident {
    pub const INFO: [u8; 4] = *b"INFO";
    pub const DATA: [u8; 4] = *b"DATA";
    pub const NEND: [u8; 4] = *b"NEND";
    pub const BANK: [u8; 4] = *b"BANK";
    pub const PLST: [u8; 4] = *b"plst";
    pub const TIME: [u8; 4] = *b"time";
    pub const FADE: [u8; 4] = *b"fade";
    pub const TLBL: [u8; 4] = *b"tlbl";
    pub const AUTH: [u8; 4] = *b"auth";
}

/// Fields of the `INFO` chunk and their offsets within its payload.
#[derive(Copy, Clone, Debug)]
pub enum NsfeInfoField {
    LoadAddress,
    InitAddress,
    PlayAddress,
    PalNtscBits,
    ExtraChipBits,
    TotalSongs,
    StartingSong,
}

impl NsfeInfoField {
    pub fn offset(self) -> usize {
        match self {
            NsfeInfoField::LoadAddress => 0x00,
            NsfeInfoField::InitAddress => 0x02,
            NsfeInfoField::PlayAddress => 0x04,
            NsfeInfoField::PalNtscBits => 0x06,
            NsfeInfoField::ExtraChipBits => 0x07,
            NsfeInfoField::TotalSongs => 0x08,
            NsfeInfoField::StartingSong => 0x09,
        }
    }

    pub fn len(self) -> usize {
        match self {
            NsfeInfoField::LoadAddress
            | NsfeInfoField::InitAddress
            | NsfeInfoField::PlayAddress => 2,
            _ => 1,
        }
    }
}

/// Minimum `INFO` payload; the starting song byte is optional.
const INFO_MIN_LEN: usize = 0x09;

/// Decoded `INFO` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NsfeInfo {
    pub load_address: u16,
    pub init_address: u16,
    pub play_address: u16,
    pub pal_ntsc_bits: u8,
    pub extra_chip_bits: u8,
    pub total_songs: u8,
    pub starting_song: u8,
}

impl NsfeInfo {
    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < INFO_MIN_LEN {
            return Err(ParseError::TruncatedRead {
                offset: 0,
                needed: INFO_MIN_LEN as u64,
                available: payload.len() as u64,
                context: "nsfe:INFO",
            });
        }
        let u16_at = |f: NsfeInfoField| -> Result<u16> {
            let b = read_slice(payload, f.offset(), f.len())?;
            Ok(u16::from_le_bytes([b[0], b[1]]))
        };
        let u8_at = |f: NsfeInfoField| payload.get(f.offset()).copied();

        Ok(NsfeInfo {
            load_address: u16_at(NsfeInfoField::LoadAddress)?,
            init_address: u16_at(NsfeInfoField::InitAddress)?,
            play_address: u16_at(NsfeInfoField::PlayAddress)?,
            pal_ntsc_bits: u8_at(NsfeInfoField::PalNtscBits).unwrap_or(0),
            extra_chip_bits: u8_at(NsfeInfoField::ExtraChipBits).unwrap_or(0),
            total_songs: u8_at(NsfeInfoField::TotalSongs).unwrap_or(0),
            starting_song: u8_at(NsfeInfoField::StartingSong).unwrap_or(0),
        })
    }
}

/// A parsed NSFe file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Nsfe {
    pub info: NsfeInfo,
    pub data: Vec<u8>,
    pub bank_switch_init: Vec<u8>,
    pub playlist: Vec<u8>,
    /// `None` when the file has no `time` chunk.
    pub times: Option<Vec<i32>>,
    pub fades: Option<Vec<i32>>,
    pub track_labels: Option<Vec<String>>,
    pub song_name: Option<String>,
    pub song_artist: Option<String>,
    pub song_copyright: Option<String>,
    pub ripper: Option<String>,
    /// Every chunk in file order, including ones not interpreted.
    pub chunks: Vec<Chunk>,
}

impl Nsfe {
    /// Registry probe: the magic at offset 0.
    pub fn probe(head: &[u8]) -> bool {
        head.starts_with(NSFE_MAGIC)
    }

    /// Parse an NSFe file from `source`.
    pub fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        expect_magic(source, FORMAT_ABBREVIATION, NSFE_MAGIC)?;
        let chunks = parse_chunks(source, INITIAL_CHUNK_OFFSET)?;
        debug!(count = chunks.len(), "nsfe chunks");

        let payload = |id: &[u8; 4]| -> Result<Option<(u64, Vec<u8>)>> {
            match last_chunk(&chunks, id) {
                Some(c) => Ok(Some((c.payload.offset, c.payload.read(source)?))),
                None => Ok(None),
            }
        };

        let mut nsfe = Nsfe::default();

        if let Some((off, bytes)) = payload(&ident::INFO)? {
            nsfe.info = NsfeInfo::parse(&bytes).map_err(|e| rebase(e, off))?;
        }
        if let Some((_, bytes)) = payload(&ident::DATA)? {
            nsfe.data = bytes;
        }
        if let Some((_, bytes)) = payload(&ident::BANK)? {
            nsfe.bank_switch_init = bytes;
        }
        if let Some((_, bytes)) = payload(&ident::PLST)? {
            nsfe.playlist = bytes;
        }
        if let Some((off, bytes)) = payload(&ident::TIME)? {
            nsfe.times = Some(parse_i32_array(&bytes, off, "nsfe:time")?);
        }
        if let Some((off, bytes)) = payload(&ident::FADE)? {
            nsfe.fades = Some(parse_i32_array(&bytes, off, "nsfe:fade")?);
        }
        if let Some((off, bytes)) = payload(&ident::TLBL)? {
            nsfe.track_labels = Some(parse_cstrings(&bytes, off, usize::MAX, "nsfe:tlbl")?);
        }
        if let Some((off, bytes)) = payload(&ident::AUTH)? {
            let mut auth = parse_cstrings(&bytes, off, 4, "nsfe:auth")?.into_iter();
            nsfe.song_name = auth.next();
            nsfe.song_artist = auth.next();
            nsfe.song_copyright = auth.next();
            nsfe.ripper = auth.next();
        }

        nsfe.check_track_counts()?;
        nsfe.chunks = chunks;
        Ok(nsfe)
    }

    /// Present track arrays must agree on the number of tracks.
    fn check_track_counts(&self) -> Result<()> {
        let times = self.times.as_ref().map(Vec::len);
        let fades = self.fades.as_ref().map(Vec::len);
        let labels = self.track_labels.as_ref().map(Vec::len);

        let mut present = [times, fades, labels].into_iter().flatten();
        if let Some(first) = present.next()
            && present.any(|n| n != first)
        {
            return Err(ParseError::InconsistentTrackCount {
                times,
                fades,
                labels,
            });
        }
        Ok(())
    }

    /// Number of tracks described by the per-track chunks.
    pub fn track_count(&self) -> usize {
        [
            self.times.as_ref().map(Vec::len),
            self.fades.as_ref().map(Vec::len),
            self.track_labels.as_ref().map(Vec::len),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    /// Track length plus fade, in milliseconds.
    pub fn track_duration_ms(&self, track: usize) -> i64 {
        let at = |v: &Option<Vec<i32>>| {
            v.as_ref()
                .and_then(|v| v.get(track))
                .map_or(0, |&ms| ms as i64)
        };
        at(&self.times) + at(&self.fades)
    }

    /// Playlist rendered as comma-separated track indices.
    pub fn playlist_string(&self) -> String {
        self.playlist
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FormatIdentity for Nsfe {
    fn abbreviation(&self) -> &'static str {
        FORMAT_ABBREVIATION
    }

    fn initialize(&mut self, source: &dyn ByteSource) -> Result<()> {
        *self = Nsfe::parse(source)?;
        Ok(())
    }

    fn update_fingerprint(
        &self,
        checksum: &mut Fingerprint,
        _ctx: &FingerprintContext<'_>,
    ) -> Result<()> {
        checksum.reset();
        checksum.update(&[self.info.total_songs]);
        checksum.update(&[self.info.starting_song]);
        checksum.update(&self.info.load_address.to_le_bytes());
        checksum.update(&self.info.init_address.to_le_bytes());
        checksum.update(&self.info.play_address.to_le_bytes());
        checksum.update(&self.bank_switch_init);
        checksum.update(&[self.info.pal_ntsc_bits]);
        checksum.update(&[self.info.extra_chip_bits]);
        checksum.update(&self.data);
        Ok(())
    }

    fn tags(&self) -> Tags {
        let text = |s: &Option<String>| s.clone().unwrap_or_default();

        let mut tags = Tags::new();
        tags.push("Name", text(&self.song_name));
        tags.push("Artist", text(&self.song_artist));
        tags.push("Copyright", text(&self.song_copyright));
        tags.push("Ripper", text(&self.ripper));
        tags.push("Total Songs", self.info.total_songs.to_string());
        tags.push("Starting Song", self.info.starting_song.to_string());
        tags.push("Playlist", self.playlist_string());

        for track in 0..self.track_count() {
            let label = self
                .track_labels
                .as_ref()
                .and_then(|l| l.get(track))
                .map(String::as_str)
                .unwrap_or("");
            tags.push(
                format!("Track {}", track),
                format!(
                    "{} [{}]",
                    label,
                    format_duration_ms(self.track_duration_ms(track))
                ),
            );
        }
        tags
    }
}

/// Move a payload-relative error offset to an absolute one.
fn rebase(err: ParseError, base: u64) -> ParseError {
    match err {
        ParseError::TruncatedRead {
            offset,
            needed,
            available,
            context,
        } => ParseError::TruncatedRead {
            offset: base + offset,
            needed,
            available,
            context,
        },
        ParseError::UnterminatedRun {
            offset,
            terminator,
            context,
        } => ParseError::UnterminatedRun {
            offset: base + offset,
            terminator,
            context,
        },
        other => other,
    }
}

fn parse_i32_array(payload: &[u8], base: u64, ctx: &'static str) -> Result<Vec<i32>> {
    let whole = payload.len() / 4 * 4;
    if whole != payload.len() {
        return Err(ParseError::TruncatedRead {
            offset: base + whole as u64,
            needed: 4,
            available: (payload.len() - whole) as u64,
            context: ctx,
        });
    }
    Ok(payload
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Split up to `limit` null-terminated strings off the front of `payload`.
fn parse_cstrings(
    payload: &[u8],
    base: u64,
    limit: usize,
    ctx: &'static str,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut off = 0usize;
    while off < payload.len() && out.len() < limit {
        let len = run_length(payload, off as u64, 0x00)
            .map_err(|e| rebase(e.with_context(ctx), base))? as usize;
        let bytes = read_at(payload, off as u64, len)?;
        out.push(decode_single_byte(&bytes));
        off += len + 1;
    }
    Ok(out)
}
