use crate::capture::CaptureConfig;
use crate::consolidate::TextFormat;
use crate::watcher::WatcherConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub transcription: TranscriptionConfig,
    pub output: OutputConfig,
}

/// Chunk capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    pub time_slice_secs: u64,
    pub overlap_ms: u64,
    pub block_interval_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Transcription dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub max_concurrency: usize,
    pub max_retry_count: u32,
    pub processing_timeout_ms: u64,
    pub enable_auto_retry: bool,
}

/// Discovery and transcript output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub file_check_interval_ms: u64,
    pub text_write_interval_ms: u64,
    pub enable_auto_save: bool,
    pub text_format: TextFormat,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            time_slice_secs: crate::defaults::TIME_SLICE.as_secs(),
            overlap_ms: crate::defaults::CHUNK_OVERLAP.as_millis() as u64,
            block_interval_ms: crate::defaults::BLOCK_INTERVAL.as_millis() as u64,
            sample_rate: crate::defaults::SAMPLE_RATE,
            channels: crate::defaults::CHANNELS,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: crate::defaults::MAX_CONCURRENCY,
            max_retry_count: crate::defaults::MAX_RETRY_COUNT,
            processing_timeout_ms: crate::defaults::PROCESSING_TIMEOUT.as_millis() as u64,
            enable_auto_retry: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_check_interval_ms: crate::defaults::FILE_CHECK_INTERVAL.as_millis() as u64,
            text_write_interval_ms: crate::defaults::TEXT_WRITE_INTERVAL.as_millis() as u64,
            enable_auto_save: true,
            text_format: TextFormat::Plain,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCRIVA_TIME_SLICE_SECS → recording.time_slice_secs
    /// - SCRIVA_CONCURRENCY → transcription.max_concurrency
    /// - SCRIVA_TEXT_FORMAT → output.text_format ("plain" or "detailed")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("SCRIVA_TIME_SLICE_SECS")
            && let Ok(secs) = value.parse()
        {
            self.recording.time_slice_secs = secs;
        }
        if let Ok(value) = std::env::var("SCRIVA_CONCURRENCY")
            && let Ok(concurrency) = value.parse()
        {
            self.transcription.max_concurrency = concurrency;
        }
        if let Ok(value) = std::env::var("SCRIVA_TEXT_FORMAT") {
            match value.as_str() {
                "plain" => self.output.text_format = TextFormat::Plain,
                "detailed" => self.output.text_format = TextFormat::Detailed,
                _ => {}
            }
        }
        self
    }

    /// Runtime capture configuration derived from this file config.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            time_slice: Duration::from_secs(self.recording.time_slice_secs.max(1)),
            overlap: Duration::from_millis(self.recording.overlap_ms),
            block_interval: Duration::from_millis(self.recording.block_interval_ms.max(1)),
            sample_rate: self.recording.sample_rate,
            channels: self.recording.channels,
            ..CaptureConfig::default()
        }
    }

    /// Runtime watcher configuration derived from this file config.
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            file_check_interval: Duration::from_millis(self.output.file_check_interval_ms.max(1)),
            max_retry_count: self.transcription.max_retry_count,
            processing_timeout: Duration::from_millis(
                self.transcription.processing_timeout_ms.max(1),
            ),
            enable_auto_retry: self.transcription.enable_auto_retry,
            text_write_interval: Duration::from_millis(self.output.text_write_interval_ms.max(1)),
            enable_auto_save: self.output.enable_auto_save,
            text_format: self.output.text_format,
            max_concurrency: self.transcription.max_concurrency.max(1),
            time_slice: Duration::from_secs(self.recording.time_slice_secs.max(1)),
            overlap: Duration::from_millis(self.recording.overlap_ms),
            sample_rate: self.recording.sample_rate,
            channels: self.recording.channels,
        }
    }
}
