//! Data types that flow through the transcription pipeline.
//!
//! A recording session produces a gapless run of [`AudioChunk`]s; the queue
//! turns each one into exactly one [`ChunkResult`].

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One fixed-duration slice of the recording, independently decodable.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Stable identifier, equal to the chunk file stem.
    pub id: String,
    /// Monotonic position in the recording, starting at 0.
    pub sequence: u64,
    /// Seconds from recording start to the first audio in this chunk.
    pub start_time: f64,
    /// Seconds from recording start to the last audio in this chunk.
    pub end_time: f64,
    /// Container-repaired chunk bytes.
    pub audio_data: Vec<u8>,
    /// Sample rate declared in the chunk's track header.
    pub sample_rate: u32,
    /// Channel count declared in the chunk's track header.
    pub channels: u16,
    /// Seconds duplicated from the end of the previous chunk.
    pub overlap_with_previous: f64,
}

impl AudioChunk {
    /// Duration of this chunk in seconds, overlap included.
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// One recognized span of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment start in seconds. Chunk-relative when produced by the
    /// backend, absolute once consolidated.
    pub start: f64,
    /// Segment end in seconds, same frame of reference as `start`.
    pub end: f64,
    pub text: String,
}

/// Terminal outcome of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Completed,
    Failed,
}

/// Immutable record of one chunk's terminal transcription outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: String,
    pub sequence: u64,
    pub status: ChunkStatus,
    /// Recognized segments, chunk-relative, empty on failure.
    pub segments: Vec<TranscriptSegment>,
    /// Wall time spent across all attempts.
    #[serde(with = "duration_millis")]
    pub processing_time: Duration,
    /// Last underlying error text, present iff `status` is `Failed`.
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Formats the canonical chunk filename: `chunk_<sequence:05>_<unixMillis>.<ext>`.
pub fn chunk_file_name(sequence: u64, unix_millis: u64) -> String {
    format!(
        "chunk_{:05}_{}.{}",
        sequence, unix_millis, defaults::CHUNK_EXTENSION
    )
}

/// Parses a chunk filename back into `(sequence, unix_millis)`.
///
/// Returns `None` for anything that does not match the canonical pattern,
/// which is how the watcher ignores foreign files in the temp directory.
pub fn parse_chunk_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(&format!(".{}", defaults::CHUNK_EXTENSION))?;
    let rest = stem.strip_prefix("chunk_")?;
    let (seq_part, millis_part) = rest.split_once('_')?;
    if seq_part.len() != 5 {
        return None;
    }
    let sequence = seq_part.parse().ok()?;
    let millis = millis_part.parse().ok()?;
    Some((sequence, millis))
}

/// Derives the session temp directory from the recording path:
/// `temp_<basename-without-extension>`, as a sibling of the recording file.
pub fn temp_dir_for(recording_path: &Path) -> PathBuf {
    let base = recording_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let dir_name = format!("{}{}", defaults::TEMP_DIR_PREFIX, base);
    match recording_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(dir_name),
        _ => PathBuf::from(dir_name),
    }
}
