//! Format identity contract, fingerprint accumulator and format registry.
//!
//! A format parser implements [`FormatIdentity`]: it is populated once from
//! a byte source and then feeds the fields that define the file's content
//! identity into a [`Fingerprint`]. Cosmetic fields (titles, track labels,
//! symbol names) never reach the checksum, so two rips that only differ in
//! tagging produce the same fingerprint.
//!
//! Format selection is data driven: [`registry`] is an ordered list of
//! `(probe, factory)` pairs and the first probe that accepts the file's
//! leading bytes wins.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::binutil::{ByteSource, Result};
use crate::meta::Tags;
use crate::nsfe::Nsfe;
use crate::psf::Psf;
use crate::sdat::Sdat;

/// Number of leading bytes the registry probes look at.
pub const PROBE_LEN: usize = 16;

/// Running CRC-32 (IEEE) over the fingerprint input set.
#[derive(Clone, Default)]
pub struct Fingerprint {
    hasher: crc32fast::Hasher,
}

impl Fingerprint {
    pub fn new() -> Self {
        Fingerprint::default()
    }

    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Uppercase, zero-padded hex (`"0A1B2C3D"`).
    pub fn to_hex(&self) -> String {
        crc_hex(self.value())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Render a CRC-32 value the way catalog entries store it.
pub fn crc_hex(value: u32) -> String {
    format!("{:08X}", value)
}

/// Cross-file cache of checksum fragments for shared sub-resources.
///
/// Keys identify the shared resource (for PSF-family sets, the canonical
/// path of a `_lib` file). Lookups of populated entries take a shared lock
/// and run concurrently; populating a missing entry is serialized so each
/// fragment is computed once.
///
/// The cache is owned by the caller: create one per set and drop it when the
/// set is done.
#[derive(Debug, Default)]
pub struct LibraryHashCache {
    entries: RwLock<HashMap<PathBuf, u32>>,
}

impl LibraryHashCache {
    pub fn new() -> Self {
        LibraryHashCache::default()
    }

    pub fn get(&self, key: &Path) -> Option<u32> {
        self.entries.read().get(key).copied()
    }

    /// Return the fragment for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs at most once per key. Errors are returned and nothing
    /// is stored.
    pub fn get_or_insert_with<F>(&self, key: &Path, compute: F) -> Result<u32>
    where
        F: FnOnce() -> Result<u32>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let guard = self.entries.upgradable_read();
        if let Some(v) = guard.get(key) {
            return Ok(*v);
        }
        let value = compute()?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(key.to_path_buf(), value);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Inputs to [`FormatIdentity::update_fingerprint`] besides the checksum.
#[derive(Clone, Copy)]
pub struct FingerprintContext<'a> {
    /// Path of the file being fingerprinted, used to resolve shared resources.
    pub path: Option<&'a Path>,
    pub library_hashes: &'a LibraryHashCache,
    /// Fold shared-library fragments into the fingerprint.
    pub use_library_hash: bool,
}

impl<'a> FingerprintContext<'a> {
    pub fn new(library_hashes: &'a LibraryHashCache) -> Self {
        FingerprintContext {
            path: None,
            library_hashes,
            use_library_hash: false,
        }
    }

    pub fn with_path(mut self, path: &'a Path) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_library_hash(mut self, enabled: bool) -> Self {
        self.use_library_hash = enabled;
        self
    }
}

/// A parsed file under one candidate format.
pub trait FormatIdentity: Send {
    /// Short format name used in reports (`"NSFE"`, `"SDAT"`, ...).
    fn abbreviation(&self) -> &'static str;

    /// Populate the identity from `source`.
    ///
    /// Fails with `UnsupportedLayout` when signature or structure checks fail.
    fn initialize(&mut self, source: &dyn ByteSource) -> Result<()>;

    /// Reset `checksum` and accumulate the content-identity fields into it.
    fn update_fingerprint(
        &self,
        checksum: &mut Fingerprint,
        ctx: &FingerprintContext<'_>,
    ) -> Result<()>;

    /// Free-text metadata in the format's fixed export order.
    fn tags(&self) -> Tags;
}

/// One registry row: a signature probe and the parser it selects.
pub struct FormatEntry {
    pub abbreviation: &'static str,
    pub probe: fn(&[u8]) -> bool,
    pub create: fn() -> Box<dyn FormatIdentity>,
}

static REGISTRY: [FormatEntry; 3] = [
    FormatEntry {
        abbreviation: "NSFE",
        probe: Nsfe::probe,
        create: || Box::new(Nsfe::default()),
    },
    FormatEntry {
        abbreviation: "SDAT",
        probe: Sdat::probe,
        create: || Box::new(Sdat::default()),
    },
    FormatEntry {
        abbreviation: "PSF",
        probe: Psf::probe,
        create: || Box::new(Psf::default()),
    },
];

/// All known formats, in probe order.
pub fn registry() -> &'static [FormatEntry] {
    &REGISTRY
}

/// First registry entry whose probe accepts `head`.
pub fn detect(head: &[u8]) -> Option<&'static FormatEntry> {
    let head = &head[..head.len().min(PROBE_LEN)];
    registry().iter().find(|e| (e.probe)(head))
}

/// Detect and parse `source`.
///
/// Returns `Ok(None)` when no format claims the file.
pub fn open(source: &dyn ByteSource) -> Result<Option<Box<dyn FormatIdentity>>> {
    let mut head = [0u8; PROBE_LEN];
    let got = source.read_into(0, &mut head)?;
    let Some(entry) = detect(&head[..got]) else {
        return Ok(None);
    };
    let mut identity = (entry.create)();
    identity.initialize(source)?;
    Ok(Some(identity))
}
