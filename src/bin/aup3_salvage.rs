//! Command-line front end.
//!
//! Flags are order-independent modifiers; the execution order is fixed:
//! drop-autosave, integrity check, XML extraction, database recovery,
//! project recovery, compaction, then the audio extractions. Exit codes:
//! `0` success, `1` usage error, `3` failed integrity check with no
//! recovery step following, `-1` any other error.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aup3_salvage::db::{ProjectDatabase, ProjectTable};
use aup3_salvage::project::Project;
use aup3_salvage::wav::SampleFormat;
use aup3_salvage::Error;

/// Inspect, repair and extract damaged AUP3 audio projects.
#[derive(Parser, Debug)]
#[command(name = "aup3-salvage", version)]
struct Cli {
    /// Path to the .aup3 project file
    project: PathBuf,

    /// Drop the autosave row, if present
    #[arg(long)]
    drop_autosave: bool,

    /// Check store integrity
    #[arg(long)]
    check_integrity: bool,

    /// Extract the project document as sibling XML files
    #[arg(long)]
    extract_project: bool,

    /// Rebuild the database through the SQLite recovery shell
    #[arg(long)]
    recover_db: bool,

    /// Pass --ignore-freelist to the recovery shell
    #[arg(long)]
    ignore_freelist: bool,

    /// Convert missing sample blocks to silence and save the project
    #[arg(long)]
    recover_project: bool,

    /// Delete unreferenced sample blocks and compact the store
    #[arg(long)]
    compact: bool,

    /// Write one mono WAV per clip
    #[arg(long)]
    extract_clips: bool,

    /// Write one mono WAV per sample block
    #[arg(long)]
    extract_sample_blocks: bool,

    /// Concatenate every sample block into a mono WAV
    #[arg(long)]
    extract_as_mono_track: bool,

    /// Concatenate every sample block into a stereo WAV
    #[arg(long)]
    extract_as_stereo_track: bool,

    /// Print per-clip timings and block usage statistics
    #[arg(long)]
    statistics: bool,

    /// Sample format for extracted audio: int16, int24 or float
    #[arg(long, default_value = "float")]
    sample_format: String,

    /// Sample rate for extracted audio
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,
}

impl Cli {
    /// A failed integrity check only stops the run when nothing after it
    /// could still make use of the damaged store.
    fn can_continue_in_failed_state(&self) -> bool {
        self.extract_project
            || self.recover_db
            || self.recover_project
            || self.extract_clips
            || self.extract_sample_blocks
            || self.extract_as_mono_track
            || self.extract_as_stereo_track
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aup3_salvage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(-1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let sample_format: SampleFormat = cli.sample_format.parse()?;

    let mut db = match ProjectDatabase::open(&cli.project) {
        Ok(db) => db,
        // A structurally corrupt store can still be rebuilt when this
        // run was going to recover it anyway.
        Err(err @ Error::CorruptStore(_)) if cli.recover_db => {
            warn!("store failed to open ({err}); recovering from scratch");
            ProjectDatabase::recover(&cli.project, cli.ignore_freelist)
                .context("database recovery failed")?
        }
        Err(err) => {
            return Err(err).context(format!("cannot open {}", cli.project.display()));
        }
    };

    if cli.drop_autosave {
        db.drop_autosave()?;
    }

    if cli.check_integrity {
        if db.check_integrity() {
            println!("Database integrity check has passed");
        } else {
            println!(
                "Integrity check for '{}' has failed.",
                cli.project.display()
            );

            if !cli.can_continue_in_failed_state() {
                return Ok(3);
            }
        }
    }

    if cli.extract_project {
        if db.has_autosave()? {
            db.extract_project_xml(ProjectTable::Autosave)?;
        }
        db.extract_project_xml(ProjectTable::Project)?;
    }

    if cli.recover_db {
        db.recover_database(cli.ignore_freelist)?;
    }

    // The project document is parsed once, on first use.
    let mut project: Option<Project> = None;

    if cli.recover_project {
        if project.is_none() {
            project = Some(Project::load(&db)?);
        }
        if let Some(project) = project.as_mut() {
            project.fixup_missing_blocks(&mut db)?;
        }
    }

    if cli.compact {
        if project.is_none() {
            project = Some(Project::load(&db)?);
        }
        if let Some(project) = project.as_ref() {
            project.remove_unused_blocks(&mut db)?;
        }
    }

    if cli.extract_clips {
        if project.is_none() {
            project = Some(Project::load(&db)?);
        }
        if let Some(project) = project.as_ref() {
            project.extract_clips(&db)?;
        }
    }

    if cli.extract_sample_blocks {
        db.extract_sample_blocks(sample_format, cli.sample_rate)?;
    }

    if cli.extract_as_mono_track {
        db.extract_track(sample_format, cli.sample_rate, false)?;
    }

    if cli.extract_as_stereo_track {
        db.extract_track(sample_format, cli.sample_rate, true)?;
    }

    if cli.statistics {
        if project.is_none() {
            project = Some(Project::load(&db)?);
        }
        if let Some(project) = project.as_ref() {
            project.print_statistics();
        }
    }

    Ok(0)
}
