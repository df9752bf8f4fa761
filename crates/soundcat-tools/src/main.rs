use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use soundcat::audit::{self, AuditOptions};
use soundcat::demux::{self, DemuxOptions};
use soundcat::format::{self, LibraryHashCache};

mod report;
use report::{print_audit, print_demux, print_rows, read_input};

/// soundcat command line tools
#[derive(Parser)]
#[command(
    name = "soundcat",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show format, fingerprint and tags of a file (use '-' for stdin)
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the fingerprint of each file, falling back to a whole-file CRC
    Fingerprint {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Fold shared PSF library fingerprints into each file's fingerprint
        #[arg(long = "library-hash")]
        library_hash: bool,
    },
    /// Fingerprint every set (top-level subdirectory) under ROOT
    Audit {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
        #[arg(long = "library-hash")]
        library_hash: bool,
        /// Follow symbolic links while walking sets
        #[arg(long = "follow-links")]
        follow_links: bool,
    },
    /// Split an MPEG program stream into elementary stream files
    Demux {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Container profile: mpeg, sofdec or pss
        #[arg(long, default_value = "mpeg")]
        profile: String,
        /// Skip audio streams
        #[arg(long = "no-audio")]
        no_audio: bool,
        /// Skip video streams
        #[arg(long = "no-video")]
        no_video: bool,
        /// Override the audio output extension
        #[arg(long = "audio-ext", value_name = "EXT")]
        audio_ext: Option<String>,
        /// Override the video output extension
        #[arg(long = "video-ext", value_name = "EXT")]
        video_ext: Option<String>,
    },
    /// Report the registered format and MPEG version of a file
    Probe {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => info(&file)?,
        Commands::Fingerprint {
            files,
            library_hash,
        } => {
            let options = AuditOptions {
                use_library_hash: library_hash,
                ..AuditOptions::default()
            };
            let cache = LibraryHashCache::new();
            let mut buffer = Vec::new();
            for file in files {
                let (entry, message) =
                    audit::fingerprint_file(&file, &cache, &options, &mut buffer)
                        .with_context(|| format!("failed to fingerprint {}", file.display()))?;
                println!(
                    "{}  {:<5} {}",
                    entry.crc_hex(),
                    entry.format.unwrap_or("-"),
                    file.display()
                );
                if let Some(message) = message {
                    eprintln!("{}", message);
                }
            }
        }
        Commands::Audit {
            root,
            library_hash,
            follow_links,
        } => {
            let options = AuditOptions {
                use_library_hash: library_hash,
                follow_links,
            };
            let cancel = AtomicBool::new(false);
            let report = audit::build_sets(&root, &options, &cancel)
                .with_context(|| format!("failed to audit {}", root.display()))?;
            print_audit(&report);
        }
        Commands::Demux {
            file,
            profile,
            no_audio,
            no_video,
            audio_ext,
            video_ext,
        } => {
            let Some(profile) = demux::profile_by_name(&profile) else {
                let known: Vec<_> = demux::profiles().iter().map(|p| p.name()).collect();
                bail!("unknown profile '{}' (known: {})", profile, known.join(", "));
            };
            let options = DemuxOptions {
                extract_audio: !no_audio,
                extract_video: !no_video,
                audio_extension: audio_ext,
                video_extension: video_ext,
            };
            debug!(profile = profile.name(), ?options, "demux");
            let report = demux::demultiplex(&file, profile, &options)
                .with_context(|| format!("failed to demultiplex {}", file.display()))?;
            print_demux(&report);
        }
        Commands::Probe { file } => {
            let bytes = read_input(&file)?;
            let detected = format::detect(&bytes).map(|e| e.abbreviation);
            println!("format: {}", detected.unwrap_or("(none)"));
            match demux::classify_stream(&file) {
                Ok(version) => println!("mpeg:   {:?}", version),
                Err(e) => println!("mpeg:   ({})", e),
            }
        }
    }

    Ok(())
}

fn info(file: &Path) -> Result<()> {
    let bytes = read_input(file)?;
    let identity = format::open(&bytes)
        .with_context(|| format!("failed to parse {}", file.display()))?
        .with_context(|| format!("no registered format matches {}", file.display()))?;

    let cache = LibraryHashCache::new();
    let mut checksum = format::Fingerprint::new();
    let ctx = format::FingerprintContext::new(&cache).with_path(file);
    identity
        .update_fingerprint(&mut checksum, &ctx)
        .with_context(|| format!("failed to fingerprint {}", file.display()))?;

    let mut rows = vec![
        ("Format".to_string(), identity.abbreviation().to_string()),
        ("Fingerprint".to_string(), checksum.to_hex()),
    ];
    rows.extend(identity.tags());
    print_rows(&rows);
    Ok(())
}
