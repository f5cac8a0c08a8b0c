//! Command-line interface for scriva
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Live chunked transcription for recordings
#[derive(Parser, Debug)]
#[command(name = "scriva", version, about = "Live chunked transcription for recordings")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (chunk-level progress and stats)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a block stream and transcribe it live
    Record {
        /// Recording output file; chunk files land in temp_<basename>/
        #[arg(value_name = "FILE")]
        output: PathBuf,

        /// Block stream to read (default: stdin)
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Transcript output file (default: <output>.txt)
        #[arg(long, value_name = "FILE")]
        transcript: Option<PathBuf>,

        /// External recognizer command; chunk bytes on stdin, JSON segments
        /// on stdout
        #[arg(long, value_name = "CMD")]
        backend_cmd: Option<String>,

        /// Chunk slice duration. Examples: 20s, 1m, 90s
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        slice: Option<Duration>,

        /// Overlap duplicated between chunks. Examples: 1s, 500ms
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        overlap: Option<Duration>,

        /// Maximum concurrent transcription attempts
        #[arg(short = 'j', long, value_name = "N")]
        concurrency: Option<usize>,

        /// Retries per chunk after a failed attempt
        #[arg(long, value_name = "N")]
        retries: Option<u32>,

        /// Per-attempt transcription timeout. Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Transcript format: plain or detailed (timestamped)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        /// Bytes per source block in pipe mode
        #[arg(long, value_name = "BYTES", default_value = "4096")]
        block_size: usize,

        /// Pace the input at the live block cadence instead of reading
        /// as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Print final session counters as JSON on stdout
        #[arg(long)]
        json_stats: bool,
    },
}

/// Parse a duration string.
///
/// Supports any format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
