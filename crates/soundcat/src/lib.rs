#![doc = include_str!("../README.md")]
//! soundcat: parsers, content fingerprints and a stream splitter for
//! game-audio container formats
//!
//! Formats:
//! - NSFe, walked as a chunk container (`nsfe`, `chunk`).
//! - Nintendo DS SDAT archives, including the `SYMB` name tables (`sdat`,
//!   `symb`).
//! - The PSF family (PSF, PSF2, SSF, DSF, USF, GSF, SNSF, 2SF, QSF) with
//!   shared `_lib` libraries (`psf`).
//! - MPEG program streams and their game variants (Sofdec, Sony PSS),
//!   split into elementary streams (`demux`).
//!
//! Every format parser implements [`FormatIdentity`]. Its fingerprint is a
//! CRC-32 over the fields that define what the file *plays*; titles, track
//! names and other tags are left out, so retagged rips keep their
//! fingerprint. The [`audit`] module runs the registry over a directory of
//! sets in parallel.
//!
//! Example: fingerprint an in-memory NSFe
//!
//! ```rust
//! use soundcat::format::{self, Fingerprint, FingerprintContext, LibraryHashCache};
//!
//! let mut file = b"NSFE".to_vec();
//! let chunks: [(&[u8; 4], &[u8]); 3] = [
//!     (b"INFO", &[0x00, 0x80, 0x00, 0x80, 0x03, 0x80, 0x00, 0x00, 0x02, 0x00]),
//!     (b"DATA", &[0xEA; 4]),
//!     (b"NEND", &[]),
//! ];
//! for (ident, payload) in chunks {
//!     file.extend_from_slice(&(payload.len() as u32).to_le_bytes());
//!     file.extend_from_slice(ident);
//!     file.extend_from_slice(payload);
//! }
//!
//! let identity = format::open(&file)?.expect("NSFe is registered");
//! assert_eq!(identity.abbreviation(), "NSFE");
//! assert_eq!(identity.tags().get("Total Songs"), Some("2"));
//!
//! let cache = LibraryHashCache::new();
//! let mut checksum = Fingerprint::new();
//! identity.update_fingerprint(&mut checksum, &FingerprintContext::new(&cache))?;
//! assert_eq!(checksum.to_hex().len(), 8);
//! # Ok::<(), soundcat::ParseError>(())
//! ```
//!
//! Example: split a program stream
//!
//! ```no_run
//! use std::path::Path;
//! use soundcat::demux::{DemuxOptions, SonyPssProfile, demultiplex};
//!
//! let report = demultiplex(Path::new("movie.pss"), &SonyPssProfile, &DemuxOptions::default())?;
//! for output in &report.outputs {
//!     println!("{} {} bytes", output.path.display(), output.bytes);
//! }
//! # Ok::<(), soundcat::ParseError>(())
//! ```

pub mod audit;
pub mod binutil;
pub mod chunk;
pub mod demux;
pub mod format;
pub mod meta;
pub mod nsfe;
pub mod psf;
pub mod sdat;
pub mod symb;

pub use binutil::{ByteRegion, ByteSource, ParseError, Result, SeekSource};
pub use chunk::{Chunk, ChunkReader, parse_chunks};
pub use format::{Fingerprint, FingerprintContext, FormatIdentity, LibraryHashCache};
pub use meta::Tags;
pub use nsfe::Nsfe;
pub use psf::Psf;
pub use sdat::Sdat;
pub use symb::{SymbolCategory, SymbolSection, resolve_section};
