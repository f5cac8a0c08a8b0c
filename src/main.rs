use anyhow::{Context, Result, bail};
use clap::Parser;
use scriva::backend::CommandBackend;
use scriva::capture::ReaderBlockSource;
use scriva::cli::{Cli, Commands};
use scriva::config::Config;
use scriva::consolidate::TextFormat;
use scriva::output::{render_event, render_summary};
use scriva::session::{RecordingSession, SessionConfig};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => Config::load_or_default(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides();

    match cli.command {
        Commands::Record {
            output,
            input,
            transcript,
            backend_cmd,
            slice,
            overlap,
            concurrency,
            retries,
            timeout,
            format,
            block_size,
            realtime,
            json_stats,
        } => {
            run_record(RecordArgs {
                config,
                output,
                input,
                transcript,
                backend_cmd,
                slice,
                overlap,
                concurrency,
                retries,
                timeout,
                format,
                block_size,
                realtime,
                json_stats,
                quiet: cli.quiet,
                verbose: cli.verbose,
            })
            .await
        }
    }
}

struct RecordArgs {
    config: Config,
    output: PathBuf,
    input: Option<PathBuf>,
    transcript: Option<PathBuf>,
    backend_cmd: Option<String>,
    slice: Option<Duration>,
    overlap: Option<Duration>,
    concurrency: Option<usize>,
    retries: Option<u32>,
    timeout: Option<Duration>,
    format: Option<String>,
    block_size: usize,
    realtime: bool,
    json_stats: bool,
    quiet: bool,
    verbose: bool,
}

async fn run_record(args: RecordArgs) -> Result<()> {
    let mut config = args.config;

    // CLI flags override file and environment configuration
    if let Some(slice) = args.slice {
        config.recording.time_slice_secs = slice.as_secs().max(1);
    }
    if let Some(overlap) = args.overlap {
        config.recording.overlap_ms = overlap.as_millis() as u64;
    }
    if let Some(concurrency) = args.concurrency {
        config.transcription.max_concurrency = concurrency.max(1);
    }
    if let Some(retries) = args.retries {
        config.transcription.max_retry_count = retries;
    }
    if let Some(timeout) = args.timeout {
        config.transcription.processing_timeout_ms = timeout.as_millis() as u64;
    }
    if let Some(format) = &args.format {
        config.output.text_format = match format.as_str() {
            "plain" => TextFormat::Plain,
            "detailed" => TextFormat::Detailed,
            other => bail!("unknown transcript format '{}' (expected plain or detailed)", other),
        };
    }

    let command = match args
        .backend_cmd
        .or_else(|| std::env::var("SCRIVA_BACKEND").ok())
    {
        Some(command) => command,
        None => bail!(
            "no transcription backend configured: pass --backend-cmd or set SCRIVA_BACKEND"
        ),
    };
    let mut parts = command.split_whitespace().map(String::from);
    let program = parts
        .next()
        .context("backend command must not be empty")?;
    let backend = Arc::new(CommandBackend::new(program, parts.collect()));

    let mut session_config = SessionConfig::new(&args.output);
    session_config.capture = config.capture_config();
    session_config.watcher = config.watcher_config();
    if let Some(transcript) = args.transcript {
        session_config.transcript_path = transcript;
    }
    let transcript_path = session_config.transcript_path.clone();

    let session = RecordingSession::new(backend, session_config);
    if !args.quiet {
        let verbose = args.verbose;
        session.on_event(move |event| render_event(event, verbose));
    }

    let block_delay = Duration::from_millis(config.recording.block_interval_ms);
    let mut source = match &args.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening input stream {}", path.display()))?;
            ReaderBlockSource::new(Box::new(file), args.block_size)
        }
        None => ReaderBlockSource::from_stdin(args.block_size),
    };
    if args.realtime {
        source = source.with_block_delay(block_delay);
    }

    let stats = session.run(source).await?;

    if args.json_stats {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    if !args.quiet {
        render_summary(&stats);
        eprintln!("transcript: {}", transcript_path.display());
    }
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scriva").join("config.toml"))
}
