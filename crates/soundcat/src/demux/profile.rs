//! Container profiles for the demultiplexer.
//!
//! A profile owns the block table for one container flavour and knows how
//! large the per-block PES header is for each stream class.
use std::sync::LazyLock;

use super::table::{BlockSize, BlockTable, PRIVATE_STREAM_1_CODE};
use crate::binutil::{ByteRegion, ByteSource, ParseError, Result, read_u8_at};

static MPEG2_TABLE: LazyLock<BlockTable> =
    LazyLock::new(|| BlockTable::mpeg_program_stream(0x0E));
static SOFDEC_TABLE: LazyLock<BlockTable> =
    LazyLock::new(|| BlockTable::mpeg_program_stream(0x0C));
static SONY_PSS_TABLE: LazyLock<BlockTable> = LazyLock::new(|| {
    BlockTable::mpeg_program_stream(0x0E)
        .with(PRIVATE_STREAM_1_CODE, BlockSize::LengthPrefixed(2))
});

pub trait StreamProfile: Sync {
    fn name(&self) -> &'static str;

    fn block_table(&self) -> &BlockTable;

    /// Default extension for audio outputs, including the leading dot.
    fn audio_extension(&self) -> &'static str;

    fn video_extension(&self) -> &'static str;

    fn is_audio_block(&self, code: u32) -> bool {
        matches!(code & 0xFF, 0xC0..=0xDF)
    }

    fn is_video_block(&self, code: u32) -> bool {
        matches!(code & 0xFF, 0xE0..=0xEF)
    }

    /// Bytes to skip at the start of an audio block's payload.
    fn audio_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64>;

    fn video_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64>;

    /// Several audio tracks share one start code and are told apart by
    /// [`StreamProfile::track_id`].
    fn shares_audio_start_code(&self) -> bool {
        false
    }

    fn track_id(&self, _source: &dyn ByteSource, _payload: ByteRegion) -> Result<u8> {
        Ok(0)
    }
}

/// MPEG-2 PES header: two flag bytes, the header data length, then that
/// many bytes of optional fields.
fn mpeg2_header_size(source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
    let header_len = read_u8_at(source, payload.offset + 2)
        .map_err(|e| e.with_context("demux:pes header length"))?;
    Ok(3 + header_len as u64)
}

/// MPEG-1 packet header: `0xFF` stuffing, an optional STD buffer field,
/// then PTS, PTS+DTS or the `0x0F` no-timestamp marker.
pub(crate) fn mpeg1_header_size(source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
    let read = |pos: u64| read_u8_at(source, pos).map_err(|e| e.with_context("demux:mpeg1 header"));

    let mut pos = payload.offset;
    let mut b = read(pos)?;
    while b == 0xFF && pos < payload.end() {
        pos += 1;
        b = read(pos)?;
    }
    if b & 0xC0 == 0x40 {
        pos += 2;
        b = read(pos)?;
    }
    pos += match b & 0xF0 {
        0x20 => 5,
        0x30 => 10,
        0x00 if b == 0x0F => 1,
        _ => {
            return Err(ParseError::UnsupportedLayout {
                format: "MPEG-1",
                offset: pos,
                reason: format!("unexpected packet header byte 0x{:02X}", b),
            });
        }
    };
    Ok(pos - payload.offset)
}

/// Generic MPEG-2 program stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpegProfile;

impl StreamProfile for MpegProfile {
    fn name(&self) -> &'static str {
        "mpeg"
    }

    fn block_table(&self) -> &BlockTable {
        &MPEG2_TABLE
    }

    fn audio_extension(&self) -> &'static str {
        ".mpa"
    }

    fn video_extension(&self) -> &'static str {
        ".m2v"
    }

    fn audio_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        mpeg2_header_size(source, payload)
    }

    fn video_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        mpeg2_header_size(source, payload)
    }
}

/// CRI Sofdec (`.sfd`): MPEG-1 system stream carrying ADX audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SofdecProfile;

impl StreamProfile for SofdecProfile {
    fn name(&self) -> &'static str {
        "sofdec"
    }

    fn block_table(&self) -> &BlockTable {
        &SOFDEC_TABLE
    }

    fn audio_extension(&self) -> &'static str {
        ".adx"
    }

    fn video_extension(&self) -> &'static str {
        ".m2v"
    }

    fn audio_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        mpeg1_header_size(source, payload)
    }

    fn video_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        mpeg1_header_size(source, payload)
    }
}

/// Sony PSS: MPEG-2 program stream whose audio tracks all travel in
/// private stream 1. The byte after the PES header is the track id and is
/// followed by three more bytes of private header.
#[derive(Debug, Clone, Copy, Default)]
pub struct SonyPssProfile;

const PSS_PRIVATE_HEADER_SIZE: u64 = 4;

impl StreamProfile for SonyPssProfile {
    fn name(&self) -> &'static str {
        "pss"
    }

    fn block_table(&self) -> &BlockTable {
        &SONY_PSS_TABLE
    }

    fn audio_extension(&self) -> &'static str {
        ".ss2"
    }

    fn video_extension(&self) -> &'static str {
        ".m2v"
    }

    fn is_audio_block(&self, code: u32) -> bool {
        code == PRIVATE_STREAM_1_CODE
    }

    fn audio_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        Ok(mpeg2_header_size(source, payload)? + PSS_PRIVATE_HEADER_SIZE)
    }

    fn video_header_size(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u64> {
        mpeg2_header_size(source, payload)
    }

    fn shares_audio_start_code(&self) -> bool {
        true
    }

    fn track_id(&self, source: &dyn ByteSource, payload: ByteRegion) -> Result<u8> {
        let at = payload.offset + mpeg2_header_size(source, payload)?;
        read_u8_at(source, at).map_err(|e| e.with_context("demux:track id"))
    }
}

static PROFILES: [&dyn StreamProfile; 3] = [&MpegProfile, &SofdecProfile, &SonyPssProfile];

/// All built-in profiles.
pub fn profiles() -> &'static [&'static dyn StreamProfile] {
    &PROFILES
}

/// Look a profile up by [`StreamProfile::name`].
pub fn profile_by_name(name: &str) -> Option<&'static dyn StreamProfile> {
    PROFILES
        .iter()
        .copied()
        .find(|p| p.name().eq_ignore_ascii_case(name))
}
