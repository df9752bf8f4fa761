use std::fs;
use std::path::{Path, PathBuf};

use soundcat::binutil::ParseError;
use soundcat::demux::{
    DemuxOptions, MpegProfile, MpegVersion, SofdecProfile, SonyPssProfile, StreamClass,
    classify_stream, demultiplex,
};

/// Builds a program stream block by block.
#[derive(Default)]
struct Stream {
    bytes: Vec<u8>,
}

impl Stream {
    fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// MPEG-2 pack header, 14 bytes.
    fn pack2(self) -> Self {
        self.raw(&[0, 0, 1, 0xBA, 0x44, 0, 4, 0, 4, 1, 0, 0, 3, 0xF8])
    }

    /// MPEG-1 pack header, 12 bytes.
    fn pack1(self) -> Self {
        self.raw(&[0, 0, 1, 0xBA, 0x21, 0, 1, 0, 1, 0x80, 0, 1])
    }

    /// Length-prefixed block: start code, BE u16 length, payload.
    fn block(self, id: u8, payload: &[u8]) -> Self {
        let len = (payload.len() as u16).to_be_bytes();
        self.raw(&[0, 0, 1, id, len[0], len[1]]).raw(payload)
    }

    /// MPEG-2 PES payload with a 5-byte PTS header in front of `data`.
    fn pes2(self, id: u8, data: &[u8]) -> Self {
        let mut payload = vec![0x81, 0x80, 0x05, 0x21, 0x00, 0x01, 0x00, 0x01];
        payload.extend_from_slice(data);
        self.block(id, &payload)
    }

    fn end(self) -> Self {
        self.raw(&[0, 0, 1, 0xB9])
    }

    fn write(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, &self.bytes).unwrap();
        path
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_audio_and_video_split_into_separate_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack2()
        .pes2(0xC0, b"audio-zero")
        .pes2(0xE0, b"video-frame-data")
        .pack2()
        .pes2(0xC1, b"audio-one")
        .pes2(0xC0, b"+more")
        .end()
        .write(dir.path(), "movie.mpg");

    let report = demultiplex(&path, &MpegProfile, &DemuxOptions::default())
        .expect("Failed to demultiplex");

    assert_eq!(report.outputs.len(), 3);
    let keys: Vec<u32> = report.outputs.iter().map(|o| o.key).collect();
    assert_eq!(keys, [0x0000_01C0, 0x0000_01E0, 0x0000_01C1]);
    assert_eq!(report.outputs[1].class, StreamClass::Video);

    // Every block's declared length minus its 8-byte PES header.
    let expected: u64 = [10u64, 16, 9, 5].iter().sum();
    assert_eq!(report.total_bytes(), expected);

    assert_eq!(
        fs::read(dir.path().join("movie_000001C0.mpa")).unwrap(),
        b"audio-zero+more"
    );
    assert_eq!(
        fs::read(dir.path().join("movie_000001E0.m2v")).unwrap(),
        b"video-frame-data"
    );
    assert_eq!(
        fs::read(dir.path().join("movie_000001C1.mpa")).unwrap(),
        b"audio-one"
    );
}

#[test]
fn test_end_code_stops_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack2()
        .pes2(0xC0, b"kept")
        .end()
        .raw(b"trailing bytes that are not blocks")
        .write(dir.path(), "movie.mpg");

    let report = demultiplex(&path, &MpegProfile, &DemuxOptions::default()).unwrap();
    assert_eq!(report.total_bytes(), 4);
}

#[test]
fn test_leading_garbage_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .raw(&[0x00, 0x01, 0xFF, 0x00, 0x00, 0x01])
        .pack2()
        .pes2(0xE0, b"frame")
        .write(dir.path(), "movie.mpg");

    let report = demultiplex(&path, &MpegProfile, &DemuxOptions::default()).unwrap();
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(report.outputs[0].bytes, 5);
}

#[test]
fn test_class_selection_and_extension_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack2()
        .pes2(0xC0, b"audio")
        .pes2(0xE0, b"video")
        .end()
        .write(dir.path(), "movie.mpg");

    let options = DemuxOptions {
        extract_video: false,
        audio_extension: Some("mp2".to_string()),
        ..DemuxOptions::default()
    };
    let report = demultiplex(&path, &MpegProfile, &options).unwrap();
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(files_in(dir.path()), ["movie.mpg", "movie_000001C0.mp2"]);
}

#[test]
fn test_no_pack_header_creates_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .raw(&[0, 0, 1, 0xC0, 0, 4, 1, 2, 3, 4])
        .raw(&[0, 0, 1, 0xB9])
        .write(dir.path(), "broken.mpg");

    match demultiplex(&path, &MpegProfile, &DemuxOptions::default()) {
        Err(ParseError::NoPackHeaderFound { path: reported }) => assert_eq!(reported, path),
        other => panic!("Expected NoPackHeaderFound, got {:?}", other),
    }
    assert_eq!(files_in(dir.path()), ["broken.mpg"]);
}

#[test]
fn test_unknown_block_id_reports_offset_and_closes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let stream = Stream::default().pack2().pes2(0xC0, b"before");
    let bad_offset = stream.bytes.len() as u64;
    let path = stream
        .raw(&[0, 0, 1, 0xF5, 0, 0])
        .pes2(0xC0, b"after")
        .write(dir.path(), "movie.mpg");

    match demultiplex(&path, &MpegProfile, &DemuxOptions::default()) {
        Err(ParseError::UnknownBlockId { offset, code }) => {
            assert_eq!(offset, bad_offset);
            assert_eq!(code, 0x0000_01F5);
        }
        other => panic!("Expected UnknownBlockId, got {:?}", other),
    }

    // The output opened before the failure was flushed and left on disk.
    assert_eq!(
        fs::read(dir.path().join("movie_000001C0.mpa")).unwrap(),
        b"before"
    );
}

#[test]
fn test_truncated_block_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack2()
        .raw(&[0, 0, 1, 0xC0, 0x01, 0x00, 0x81, 0x80, 0x00])
        .write(dir.path(), "movie.mpg");

    assert!(matches!(
        demultiplex(&path, &MpegProfile, &DemuxOptions::default()),
        Err(ParseError::TruncatedRead { .. })
    ));
}

#[test]
fn test_header_larger_than_block_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack2()
        .block(0xC0, &[0x81, 0x80, 0x20, 0x00])
        .end()
        .write(dir.path(), "movie.mpg");

    assert!(matches!(
        demultiplex(&path, &MpegProfile, &DemuxOptions::default()),
        Err(ParseError::UnsupportedLayout { .. })
    ));
}

#[test]
fn test_pss_tracks_sharing_a_start_code() {
    let dir = tempfile::tempdir().unwrap();
    // PES header, track id, three private bytes, then audio.
    let track = |id: u8, data: &[u8]| {
        let mut p = vec![0x81, 0x80, 0x05, 0x21, 0x00, 0x01, 0x00, 0x01, id, 0, 0, 0];
        p.extend_from_slice(data);
        p
    };
    let path = Stream::default()
        .pack2()
        .block(0xBD, &track(0, b"first"))
        .block(0xBD, &track(1, b"second"))
        .pes2(0xE0, b"frame")
        .block(0xBD, &track(0, b"-again"))
        .end()
        .write(dir.path(), "movie.pss");

    let report = demultiplex(&path, &SonyPssProfile, &DemuxOptions::default()).unwrap();
    let keys: Vec<u32> = report.outputs.iter().map(|o| o.key).collect();
    assert_eq!(keys, [0x0000_01BD, 0x0100_01BD, 0x0000_01E0]);
    assert_eq!(
        fs::read(dir.path().join("movie_000001BD.ss2")).unwrap(),
        b"first-again"
    );
    assert_eq!(
        fs::read(dir.path().join("movie_010001BD.ss2")).unwrap(),
        b"second"
    );
    assert!(dir.path().join("movie_000001E0.m2v").exists());
}

#[test]
fn test_sofdec_mpeg1_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = Stream::default()
        .pack1()
        // stuffing, STD buffer, PTS
        .block(0xC0, &[0xFF, 0x40, 0x00, 0x21, 0, 1, 0, 1, b'a', b'd', b'x'])
        // no timestamp
        .block(0xE0, &[0x0F, b'v'])
        .end()
        .write(dir.path(), "intro.sfd");

    let report = demultiplex(&path, &SofdecProfile, &DemuxOptions::default()).unwrap();
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(fs::read(dir.path().join("intro_000001C0.adx")).unwrap(), b"adx");
    assert_eq!(fs::read(dir.path().join("intro_000001E0.m2v")).unwrap(), b"v");
}

#[test]
fn test_classify_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mpeg2 = Stream::default().pack2().end().write(dir.path(), "a.mpg");
    let mpeg1 = Stream::default().pack1().end().write(dir.path(), "b.sfd");
    let other = Stream::default()
        .raw(&[0, 0, 1, 0xBA, 0x80, 0, 0, 0])
        .write(dir.path(), "c.bin");
    let none = Stream::default().raw(b"no packs").write(dir.path(), "d.bin");

    assert_eq!(classify_stream(&mpeg2).unwrap(), MpegVersion::Mpeg2);
    assert_eq!(classify_stream(&mpeg1).unwrap(), MpegVersion::Mpeg1);
    assert_eq!(classify_stream(&other).unwrap(), MpegVersion::Unknown);
    assert!(matches!(
        classify_stream(&none),
        Err(ParseError::NoPackHeaderFound { .. })
    ));
}
