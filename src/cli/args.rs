//! Command line argument parsing for the indexio CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::IoConfig;
use crate::flags::IoFlags;

/// indexio - inspect and rewrite serialized similarity-search indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "indexio")]
#[command(about = "Inspect and rewrite serialized similarity-search indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct IndexioArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Largest single allocation a declared length may request
    #[arg(long, env = "INDEXIO_MAX_ALLOC_BYTES", value_name = "BYTES")]
    pub max_alloc_bytes: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl IndexioArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n + 1,
            }
        }
    }

    /// I/O configuration derived from the global options.
    pub fn io_config(&self) -> IoConfig {
        let config = IoConfig::default();
        match self.max_alloc_bytes {
            Some(limit) => config.with_max_alloc_bytes(limit),
            None => config,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode an index and print its structure
    Inspect(InspectArgs),

    /// Report whether a file starts with the multi-vector marker
    #[command(name = "probe-mv")]
    ProbeMv(ProbeMvArgs),

    /// Decode an index and encode it again
    Rewrite(RewriteArgs),
}

/// Arguments for inspecting an index
#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    /// Path to the index file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Decode as a binary index
    #[arg(long)]
    pub binary: bool,

    /// Leave flat and PQ code payloads unloaded
    #[arg(long)]
    pub skip_storage: bool,

    /// Read inverted list sizes only
    #[arg(long)]
    pub skip_ivf_data: bool,

    /// Mark the decoded index read-only
    #[arg(long)]
    pub read_only: bool,

    /// Look for on-disk list files next to the index
    #[arg(long)]
    pub ondisk_same_dir: bool,

    /// Map inverted lists instead of reading them
    #[arg(long)]
    pub mmap: bool,

    /// Map flat and PQ code payloads instead of reading them
    #[arg(long)]
    pub mmap_codes: bool,
}

impl InspectArgs {
    /// Load flags selected on the command line.
    pub fn flags(&self) -> IoFlags {
        let selected = [
            (self.skip_storage, IoFlags::SKIP_STORAGE),
            (self.skip_ivf_data, IoFlags::SKIP_IVF_DATA),
            (self.read_only, IoFlags::READ_ONLY),
            (self.ondisk_same_dir, IoFlags::ONDISK_SAME_DIR),
            (self.mmap, IoFlags::MMAP),
            (self.mmap_codes, IoFlags::MMAP_IFC),
        ];
        selected
            .into_iter()
            .filter(|(on, _)| *on)
            .fold(IoFlags::NONE, |acc, (_, flag)| acc | flag)
    }
}

/// Arguments for probing the multi-vector marker
#[derive(Parser, Debug, Clone)]
pub struct ProbeMvArgs {
    /// Path to the file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

/// Arguments for rewriting an index
#[derive(Parser, Debug, Clone)]
pub struct RewriteArgs {
    /// Index to read
    #[arg(value_name = "IN")]
    pub input: PathBuf,

    /// File to write
    #[arg(value_name = "OUT")]
    pub output: PathBuf,

    /// Treat the files as binary indexes
    #[arg(long)]
    pub binary: bool,

    /// Write HNSW graphs without their storage
    #[arg(long)]
    pub skip_storage: bool,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
