//! Batch fingerprinting of a directory of game sets.
//!
//! Every top-level subdirectory of the audit root is one set. Files of a set
//! are fingerprinted in parallel. A file no registered format claims, or one
//! whose parse fails, is fingerprinted over its whole content instead; the
//! failure is recorded as a message on the set and the batch continues.
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::binutil::Result;
use crate::format::{self, Fingerprint, FingerprintContext, LibraryHashCache, crc_hex};

/// Batch settings.
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    /// Fold shared-library fingerprints into PSF-family files.
    pub use_library_hash: bool,
    pub follow_links: bool,
}

/// One fingerprinted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the set directory, `/`-separated.
    pub name: String,
    pub size: u64,
    pub crc: u32,
    /// Format abbreviation, or `None` for a whole-file checksum.
    pub format: Option<&'static str>,
}

impl FileEntry {
    pub fn crc_hex(&self) -> String {
        crc_hex(self.crc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSet {
    pub name: String,
    pub files: Vec<FileEntry>,
    /// Per-file problems, each prefixed with the file path.
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub sets: Vec<GameSet>,
    /// Set when the cancel flag stopped the batch early.
    pub cancelled: bool,
}

/// Fingerprint every set below `root`.
///
/// `cancel` is polled before each file; once it is set, the remaining files
/// are skipped and the report is marked cancelled.
pub fn build_sets(root: &Path, options: &AuditOptions, cancel: &AtomicBool) -> Result<AuditReport> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            debug!(path = %entry.path().display(), "skipping loose file in audit root");
        }
    }
    dirs.sort();

    let mut report = AuditReport::default();
    for dir in dirs {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let set = build_set(&dir, &name, options, cancel);
        info!(set = %set.name, files = set.files.len(), messages = set.messages.len(), "set done");
        report.sets.push(set);
    }
    report.cancelled |= cancel.load(Ordering::Relaxed);
    Ok(report)
}

enum FileOutcome {
    Done(FileEntry, Option<String>),
    Failed(String),
    Skipped,
}

/// Fingerprint the files of one set directory.
///
/// The library cache lives exactly as long as the set.
pub fn build_set(dir: &Path, name: &str, options: &AuditOptions, cancel: &AtomicBool) -> GameSet {
    let mut set = GameSet {
        name: name.to_string(),
        ..GameSet::default()
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(options.follow_links)
        .sort_by_file_name()
    {
        match entry {
            Ok(e) if e.file_type().is_file() => paths.push(e.into_path()),
            Ok(_) => {}
            Err(e) => set.messages.push(format!("{}: {}", dir.display(), e)),
        }
    }

    let cache = LibraryHashCache::new();
    let outcomes: Vec<FileOutcome> = paths
        .par_iter()
        .map_init(Vec::new, |buffer, path| {
            if cancel.load(Ordering::Relaxed) {
                return FileOutcome::Skipped;
            }
            match fingerprint_file(path, &cache, options, buffer) {
                Ok((mut entry, message)) => {
                    entry.name = relative_name(dir, path);
                    FileOutcome::Done(entry, message)
                }
                Err(e) => FileOutcome::Failed(format!("{}: {}", path.display(), e)),
            }
        })
        .collect();

    for outcome in outcomes {
        match outcome {
            FileOutcome::Done(entry, message) => {
                set.files.push(entry);
                set.messages.extend(message);
            }
            FileOutcome::Failed(message) => {
                warn!("{}", message);
                set.messages.push(message);
            }
            FileOutcome::Skipped => {}
        }
    }
    set
}

/// Fingerprint one file, reusing `buffer` for its contents.
///
/// Returns the entry (named by its full path) and, when a format parse
/// failed and the whole-file checksum was used instead, a message saying so.
/// Only I/O errors on the file itself are returned as `Err`.
pub fn fingerprint_file(
    path: &Path,
    cache: &LibraryHashCache,
    options: &AuditOptions,
    buffer: &mut Vec<u8>,
) -> Result<(FileEntry, Option<String>)> {
    buffer.clear();
    File::open(path)?.read_to_end(buffer)?;
    let size = buffer.len() as u64;

    let ctx = FingerprintContext::new(cache)
        .with_path(path)
        .with_library_hash(options.use_library_hash);

    let parsed = format::open(&*buffer).and_then(|identity| match identity {
        Some(identity) => {
            let mut checksum = Fingerprint::new();
            identity.update_fingerprint(&mut checksum, &ctx)?;
            Ok(Some((identity.abbreviation(), checksum.value())))
        }
        None => Ok(None),
    });

    let (format, crc, message) = match parsed {
        Ok(Some((format, crc))) => (Some(format), crc, None),
        Ok(None) => (None, whole_file_crc(buffer), None),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "format parse failed, using whole-file checksum");
            let message = format!("{}: {}; used whole-file checksum", path.display(), e);
            (None, whole_file_crc(buffer), Some(message))
        }
    };

    Ok((
        FileEntry {
            name: path.display().to_string(),
            size,
            crc,
            format,
        },
        message,
    ))
}

fn whole_file_crc(bytes: &[u8]) -> u32 {
    let mut checksum = Fingerprint::new();
    checksum.update(bytes);
    checksum.value()
}

fn relative_name(dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_use_forward_slashes() {
        let dir = Path::new("/audit/set");
        assert_eq!(relative_name(dir, Path::new("/audit/set/a/b.nsfe")), "a/b.nsfe");
        assert_eq!(relative_name(dir, Path::new("/audit/set/c.bin")), "c.bin");
    }
}
