//! MPEG program stream demultiplexer.
//!
//! The scan is a single linear pass:
//!
//! 1. Seek the first pack start code (`00 00 01 BA`). Leading garbage is
//!    skipped; no pack header at all is fatal and nothing is written.
//! 2. Read the 4-byte start code at the cursor and look it up in the
//!    profile's [`BlockTable`]. Static blocks are stepped over,
//!    length-prefixed blocks are stepped over after routing their payload
//!    (minus the PES header) to the output for their stream, and the end
//!    code stops the scan.
//!
//! Outputs are opened lazily beside the source as
//! `{stem}_{KEY:08X}{ext}`. On error every open output is flushed and
//! closed before the error is returned; partial files are left on disk.
mod profile;
mod table;

pub use profile::{
    MpegProfile, SofdecProfile, SonyPssProfile, StreamProfile, profile_by_name, profiles,
};
pub use table::{
    BlockSize, BlockTable, PACK_START_BYTES, PACK_START_CODE, PRIVATE_STREAM_1_CODE,
    PROGRAM_END_CODE,
};

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::binutil::{
    ByteRegion, ByteSource, ParseError, Result, SeekSource, find_next, read_at, read_be_uint,
    read_u8_at, read_u32_be_at,
};

/// Elementary stream class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamClass {
    Audio,
    Video,
}

impl fmt::Display for StreamClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamClass::Audio => write!(f, "audio"),
            StreamClass::Video => write!(f, "video"),
        }
    }
}

/// What to extract and how to name it.
#[derive(Debug, Clone)]
pub struct DemuxOptions {
    pub extract_audio: bool,
    pub extract_video: bool,
    /// Overrides the profile's audio extension.
    pub audio_extension: Option<String>,
    /// Overrides the profile's video extension.
    pub video_extension: Option<String>,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        DemuxOptions {
            extract_audio: true,
            extract_video: true,
            audio_extension: None,
            video_extension: None,
        }
    }
}

/// One elementary stream written by [`demultiplex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxOutput {
    pub key: u32,
    pub class: StreamClass,
    pub path: PathBuf,
    /// Payload bytes written, PES headers excluded.
    pub bytes: u64,
}

/// Outputs in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxReport {
    pub outputs: Vec<DemuxOutput>,
}

impl DemuxReport {
    pub fn total_bytes(&self) -> u64 {
        self.outputs.iter().map(|o| o.bytes).sum()
    }
}

/// Coarse sub-format reported by [`classify_stream`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Unknown,
}

/// Output file name for a stream key: `{stem}_{KEY:08X}{ext}`.
///
/// A track id folded into the key lands in the high byte, e.g.
/// `movie_010001BD.ss2` for track 1 of private stream 1.
pub fn stream_file_name(stem: &str, key: u32, extension: &str) -> String {
    format!("{}_{:08X}{}", stem, key, dotted(extension))
}

fn dotted(extension: &str) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{}", extension)
    }
}

/// Split the program stream at `path` into elementary stream files.
pub fn demultiplex(
    path: &Path,
    profile: &dyn StreamProfile,
    options: &DemuxOptions,
) -> Result<DemuxReport> {
    let source = SeekSource::new(BufReader::new(File::open(path)?))?;
    let mut sinks = SinkSet::new(path, profile, options);

    match Demuxer::new(&source, profile, options).run(path, &mut sinks) {
        Ok(()) => sinks.close(),
        Err(e) => {
            sinks.abandon();
            Err(e)
        }
    }
}

/// Report MPEG-1 or MPEG-2 from the byte after the first pack start code.
pub fn classify_stream(path: &Path) -> Result<MpegVersion> {
    let source = SeekSource::new(BufReader::new(File::open(path)?))?;
    let Some(pack) = find_next(&source, 0, &PACK_START_BYTES)? else {
        return Err(ParseError::NoPackHeaderFound {
            path: path.to_path_buf(),
        });
    };
    let marker = read_u8_at(&source, pack + 4).map_err(|e| e.with_context("demux:pack header"))?;
    Ok(match marker >> 4 {
        0x2 => MpegVersion::Mpeg1,
        0x4 => MpegVersion::Mpeg2,
        _ => MpegVersion::Unknown,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemuxState {
    SeekFirstPacket,
    Dispatching(u64),
    Done,
}

struct Demuxer<'a> {
    source: &'a dyn ByteSource,
    profile: &'a dyn StreamProfile,
    options: &'a DemuxOptions,
}

impl<'a> Demuxer<'a> {
    fn new(
        source: &'a dyn ByteSource,
        profile: &'a dyn StreamProfile,
        options: &'a DemuxOptions,
    ) -> Self {
        Demuxer {
            source,
            profile,
            options,
        }
    }

    fn run(&self, path: &Path, sinks: &mut SinkSet) -> Result<()> {
        let mut state = DemuxState::SeekFirstPacket;
        loop {
            state = match state {
                DemuxState::SeekFirstPacket => {
                    match find_next(self.source, 0, &PACK_START_BYTES)? {
                        Some(offset) => {
                            debug!(offset, profile = self.profile.name(), "first pack header");
                            DemuxState::Dispatching(offset)
                        }
                        None => {
                            return Err(ParseError::NoPackHeaderFound {
                                path: path.to_path_buf(),
                            });
                        }
                    }
                }
                DemuxState::Dispatching(cursor) if cursor >= self.source.len() => DemuxState::Done,
                DemuxState::Dispatching(cursor) => self.dispatch(cursor, sinks)?,
                DemuxState::Done => return Ok(()),
            };
        }
    }

    fn dispatch(&self, cursor: u64, sinks: &mut SinkSet) -> Result<DemuxState> {
        let code = read_u32_be_at(self.source, cursor)
            .map_err(|e| e.with_context("demux:block id"))?;
        let Some(size) = self.profile.block_table().lookup(code) else {
            return Err(ParseError::UnknownBlockId {
                offset: cursor,
                code,
            });
        };

        match size {
            BlockSize::Static(n) => Ok(DemuxState::Dispatching(cursor + n as u64)),
            BlockSize::EndOfStream => {
                debug!(offset = cursor, "end of stream");
                Ok(DemuxState::Done)
            }
            BlockSize::LengthPrefixed(width) => {
                let width = width as u64;
                let length = read_be_uint(self.source, cursor + 4, width as usize)
                    .map_err(|e| e.with_context("demux:block length"))?;
                let payload =
                    ByteRegion::within(cursor + 4 + width, length, self.source.len(), "demux:block")?;
                if let Some(class) = self.requested_class(code) {
                    self.route(code, class, payload, sinks)?;
                }
                Ok(DemuxState::Dispatching(payload.end()))
            }
        }
    }

    fn requested_class(&self, code: u32) -> Option<StreamClass> {
        if self.options.extract_audio && self.profile.is_audio_block(code) {
            Some(StreamClass::Audio)
        } else if self.options.extract_video && self.profile.is_video_block(code) {
            Some(StreamClass::Video)
        } else {
            None
        }
    }

    fn route(
        &self,
        code: u32,
        class: StreamClass,
        payload: ByteRegion,
        sinks: &mut SinkSet,
    ) -> Result<()> {
        let skip = match class {
            StreamClass::Audio => self.profile.audio_header_size(self.source, payload)?,
            StreamClass::Video => self.profile.video_header_size(self.source, payload)?,
        };
        if skip > payload.len {
            return Err(ParseError::UnsupportedLayout {
                format: self.profile.name(),
                offset: payload.offset,
                reason: format!(
                    "{} header of {} bytes exceeds block payload of {} bytes",
                    class, skip, payload.len
                ),
            });
        }

        let key = if class == StreamClass::Audio && self.profile.shares_audio_start_code() {
            let track = self.profile.track_id(self.source, payload)?;
            code | ((track as u32) << 24)
        } else {
            code
        };

        let data = read_at(
            self.source,
            payload.offset + skip,
            (payload.len - skip) as usize,
        )?;
        trace!(key = format_args!("{:08X}", key), bytes = data.len(), "block payload");
        sinks.write(key, class, &data)
    }
}

struct Sink {
    output: DemuxOutput,
    writer: BufWriter<File>,
}

/// Lazily opened output files keyed by stream key.
struct SinkSet {
    dir: PathBuf,
    stem: String,
    audio_extension: String,
    video_extension: String,
    sinks: Vec<Sink>,
    index: HashMap<u32, usize>,
}

impl SinkSet {
    fn new(source_path: &Path, profile: &dyn StreamProfile, options: &DemuxOptions) -> Self {
        let dir = source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        SinkSet {
            dir,
            stem,
            audio_extension: options
                .audio_extension
                .clone()
                .unwrap_or_else(|| profile.audio_extension().to_string()),
            video_extension: options
                .video_extension
                .clone()
                .unwrap_or_else(|| profile.video_extension().to_string()),
            sinks: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn write(&mut self, key: u32, class: StreamClass, data: &[u8]) -> Result<()> {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => self.open(key, class)?,
        };
        let sink = &mut self.sinks[slot];
        sink.writer.write_all(data)?;
        sink.output.bytes += data.len() as u64;
        Ok(())
    }

    fn open(&mut self, key: u32, class: StreamClass) -> Result<usize> {
        let extension = match class {
            StreamClass::Audio => &self.audio_extension,
            StreamClass::Video => &self.video_extension,
        };
        let path = self.dir.join(stream_file_name(&self.stem, key, extension));
        debug!(path = %path.display(), %class, "open output");
        let writer = BufWriter::new(File::create(&path)?);

        self.sinks.push(Sink {
            output: DemuxOutput {
                key,
                class,
                path,
                bytes: 0,
            },
            writer,
        });
        let slot = self.sinks.len() - 1;
        self.index.insert(key, slot);
        Ok(slot)
    }

    /// Flush and close every output.
    fn close(self) -> Result<DemuxReport> {
        let mut outputs = Vec::with_capacity(self.sinks.len());
        for mut sink in self.sinks {
            sink.writer.flush()?;
            outputs.push(sink.output);
        }
        Ok(DemuxReport { outputs })
    }

    /// Flush and close every output after a failed scan.
    fn abandon(self) {
        for mut sink in self.sinks {
            if let Err(e) = sink.writer.flush() {
                warn!(path = %sink.output.path.display(), error = %e, "flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert_eq!(stream_file_name("movie", 0x0000_01C0, ".mpa"), "movie_000001C0.mpa");
        assert_eq!(stream_file_name("movie", 0x0100_01BD, "ss2"), "movie_010001BD.ss2");
        assert_eq!(stream_file_name("movie", 0x0000_01E0, ""), "movie_000001E0");
    }
}
