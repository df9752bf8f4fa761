use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::ZlibEncoder;

use soundcat::binutil::ParseError;
use soundcat::format::{Fingerprint, FingerprintContext, FormatIdentity, LibraryHashCache};
use soundcat::psf::Psf;

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn psf(version: u8, reserved: &[u8], program: &[u8], tags: Option<&str>) -> Vec<u8> {
    let compressed = if program.is_empty() {
        Vec::new()
    } else {
        zlib(program)
    };
    let mut out = b"PSF".to_vec();
    out.push(version);
    out.extend_from_slice(&(reserved.len() as u32).to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
    out.extend_from_slice(reserved);
    out.extend_from_slice(&compressed);
    if let Some(tags) = tags {
        out.extend_from_slice(b"[TAG]");
        out.extend_from_slice(tags.as_bytes());
    }
    out
}

fn fingerprint(path: Option<&Path>, bytes: &[u8], cache: &LibraryHashCache, libs: bool) -> u32 {
    let parsed = Psf::parse(bytes).expect("Failed to parse PSF");
    let mut ctx = FingerprintContext::new(cache).with_library_hash(libs);
    if let Some(path) = path {
        ctx = ctx.with_path(path);
    }
    let mut checksum = Fingerprint::new();
    parsed.update_fingerprint(&mut checksum, &ctx).unwrap();
    checksum.value()
}

#[test]
fn test_parse_program_and_tags() {
    let bytes = psf(
        0x22,
        &[],
        b"arm7 program image",
        Some("title=Stage 1\nartist=Someone\ncomment=a\ncomment=b\n"),
    );
    let parsed = Psf::parse(bytes.as_slice()).expect("Failed to parse PSF");

    assert_eq!(parsed.abbreviation(), "GSF");
    assert_eq!(parsed.program, b"arm7 program image");
    assert_eq!(parsed.tag("TITLE"), Some("Stage 1"));
    assert_eq!(parsed.tag("comment"), Some("a\nb"));

    let tags = parsed.tags();
    assert_eq!(
        tags.labels().collect::<Vec<_>>(),
        ["Format", "title", "artist", "comment"]
    );
}

#[test]
fn test_tags_do_not_affect_fingerprint() {
    let cache = LibraryHashCache::new();
    let a = psf(0x01, b"res", b"code", Some("title=A\n"));
    let b = psf(0x01, b"res", b"code", Some("title=B\nartist=C\n"));
    let c = psf(0x01, b"res", b"code", None);
    assert_eq!(fingerprint(None, &a, &cache, false), fingerprint(None, &b, &cache, false));
    assert_eq!(fingerprint(None, &a, &cache, false), fingerprint(None, &c, &cache, false));

    let d = psf(0x01, b"res", b"c0de", None);
    assert_ne!(fingerprint(None, &a, &cache, false), fingerprint(None, &d, &cache, false));

    let mut expected = crc32fast::Hasher::new();
    expected.update(&[0x01]);
    expected.update(b"res");
    expected.update(b"code");
    assert_eq!(fingerprint(None, &a, &cache, false), expected.finalize());
}

#[test]
fn test_crc_mismatch_is_rejected() {
    let mut bytes = psf(0x01, &[], b"code", None);
    bytes[0x0C] ^= 0xFF;
    assert!(matches!(
        Psf::parse(bytes.as_slice()),
        Err(ParseError::UnsupportedLayout { .. })
    ));
}

#[test]
fn test_corrupt_program_is_decompress_error() {
    let garbage = [0x12u8, 0x34, 0x56, 0x78, 0x9A];
    let mut bytes = b"PSF\x01".to_vec();
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&(garbage.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&garbage).to_le_bytes());
    bytes.extend_from_slice(&garbage);
    match Psf::parse(bytes.as_slice()) {
        Err(ParseError::Decompress { offset, .. }) => assert_eq!(offset, 0x10),
        other => panic!("Expected Decompress, got {:?}", other),
    }
}

#[test]
fn test_program_size_past_end() {
    let mut bytes = psf(0x01, &[], b"code", None);
    bytes[0x08..0x0C].copy_from_slice(&0x1000u32.to_le_bytes());
    assert!(matches!(
        Psf::parse(bytes.as_slice()),
        Err(ParseError::TruncatedRead { .. })
    ));
}

#[test]
fn test_unknown_version() {
    let bytes = psf(0x99, &[], b"code", None);
    assert!(matches!(
        Psf::parse(bytes.as_slice()),
        Err(ParseError::UnsupportedLayout { .. })
    ));
}

#[test]
fn test_library_hash_is_folded_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let lib = psf(0x24, &[], b"shared driver", None);
    fs::write(dir.path().join("driver.2sflib"), &lib).unwrap();

    let one = psf(0x24, &[], b"song one", Some("_lib=driver.2sflib\n"));
    let two = psf(0x24, &[], b"song two", Some("_lib=driver.2sflib\n"));
    let one_path = dir.path().join("one.mini2sf");
    let two_path = dir.path().join("two.mini2sf");
    fs::write(&one_path, &one).unwrap();
    fs::write(&two_path, &two).unwrap();

    let cache = LibraryHashCache::new();
    let without = fingerprint(Some(one_path.as_path()), &one, &cache, false);
    assert!(cache.is_empty());

    let with = fingerprint(Some(one_path.as_path()), &one, &cache, true);
    assert_ne!(without, with);
    assert_eq!(cache.len(), 1);

    fingerprint(Some(two_path.as_path()), &two, &cache, true);
    assert_eq!(cache.len(), 1);

    // Fragment is the library's own fingerprint, appended big-endian.
    let lib_crc = fingerprint(None, &lib, &cache, false);
    let mut expected = crc32fast::Hasher::new();
    expected.update(&[0x24]);
    expected.update(b"song one");
    expected.update(&lib_crc.to_be_bytes());
    assert_eq!(with, expected.finalize());
}

#[test]
fn test_missing_library_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = psf(0x24, &[], b"song", Some("_lib=absent.2sflib\n"));
    let path = dir.path().join("song.mini2sf");
    fs::write(&path, &bytes).unwrap();

    let parsed = Psf::parse(bytes.as_slice()).unwrap();
    let cache = LibraryHashCache::new();
    let ctx = FingerprintContext::new(&cache)
        .with_path(&path)
        .with_library_hash(true);
    let mut checksum = Fingerprint::new();
    assert!(matches!(
        parsed.update_fingerprint(&mut checksum, &ctx),
        Err(ParseError::Io(_))
    ));
}

#[test]
fn test_numbered_libraries_stop_at_gap() {
    let bytes = psf(
        0x01,
        &[],
        b"x",
        Some("_lib=a.psflib\n_lib2=b.psflib\n_lib4=d.psflib\n"),
    );
    let parsed = Psf::parse(bytes.as_slice()).unwrap();
    assert_eq!(parsed.libraries(), ["a.psflib", "b.psflib"]);
}
