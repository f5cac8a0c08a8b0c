//! Consolidation of out-of-order chunk results into an ordered transcript.
//!
//! Concurrency upstream means chunk results can land in any order. The
//! consolidator buffers early arrivals and only ever appends the next
//! expected sequence, so the transcript never shows chunk 4 before chunk 3.

use crate::chunk::{ChunkResult, TranscriptSegment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Output rendering of the consolidated transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// One line of text per finalized segment.
    #[default]
    Plain,
    /// Each line prefixed with its start/end timestamps.
    Detailed,
}

/// Aggregate consolidation counters, published through `on_stats_update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    /// Chunks consolidated successfully.
    pub processed_chunks: usize,
    /// Chunks recorded as permanent gaps.
    pub failed_chunks: usize,
    /// Early arrivals waiting for their predecessors.
    pub buffered_chunks: usize,
    /// Mean wall time per terminal chunk, in milliseconds.
    pub average_processing_ms: f64,
}

/// Monotonically growing, ordered transcript.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    segments: Vec<TranscriptSegment>,
    revision: u64,
}

impl Transcript {
    /// Finalized segments in recording order, absolute timestamps.
    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bumped on every append; cheap change detection for the flush timer.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn append(&mut self, segments: &[TranscriptSegment]) {
        if !segments.is_empty() {
            self.segments.extend_from_slice(segments);
            self.revision += 1;
        }
    }

    /// Renders the transcript in the requested format, one segment per line.
    pub fn render(&self, format: TextFormat) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match format {
                TextFormat::Plain => out.push_str(&segment.text),
                TextFormat::Detailed => {
                    out.push_str(&format!(
                        "[{} --> {}] {}",
                        format_timestamp(segment.start),
                        format_timestamp(segment.end),
                        segment.text
                    ));
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Formats seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let s = (total_ms / 1000) % 60;
    let m = (total_ms / 60_000) % 60;
    let h = total_ms / 3_600_000;
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

/// Timing metadata the consolidator needs per sequence number.
#[derive(Debug, Clone, Copy, Default)]
struct ChunkTiming {
    start_time: f64,
    overlap: f64,
}

/// Reorders chunk results and grows the transcript in sequence order.
pub struct ResultConsolidator {
    next_expected: u64,
    timings: HashMap<u64, ChunkTiming>,
    /// Early arrivals keyed by sequence number.
    buffered: BTreeMap<u64, ChunkResult>,
    transcript: Transcript,
    /// Sequences recorded as permanent gaps (terminally failed chunks).
    gaps: Vec<u64>,
    processed: usize,
    failed: usize,
    total_processing: Duration,
}

impl ResultConsolidator {
    pub fn new() -> Self {
        Self {
            next_expected: 0,
            timings: HashMap::new(),
            buffered: BTreeMap::new(),
            transcript: Transcript::default(),
            gaps: Vec::new(),
            processed: 0,
            failed: 0,
            total_processing: Duration::ZERO,
        }
    }

    /// Records a chunk's timing before its result arrives. Needed to place
    /// segments on the recording timeline and trim the inter-chunk overlap.
    pub fn register_chunk(&mut self, sequence: u64, start_time: f64, overlap: f64) {
        self.timings.insert(
            sequence,
            ChunkTiming {
                start_time,
                overlap,
            },
        );
    }

    /// Accepts one terminal chunk result.
    ///
    /// Returns the segments appended to the transcript by this call —
    /// possibly empty (result buffered, failed, or stale), possibly spanning
    /// several chunks (a gap just closed and buffered successors drained).
    pub fn accept(&mut self, result: ChunkResult) -> Vec<TranscriptSegment> {
        // Stale duplicate of an already-consolidated sequence
        if result.sequence < self.next_expected {
            return Vec::new();
        }

        if result.sequence != self.next_expected {
            self.buffered.insert(result.sequence, result);
            return Vec::new();
        }

        let mut appended = self.apply(result);
        // Drain buffered successors that are now contiguous
        while let Some(result) = self.buffered.remove(&self.next_expected) {
            appended.extend(self.apply(result));
        }
        self.transcript.append(&appended);
        appended
    }

    /// Consolidates the next expected result and advances the pointer.
    fn apply(&mut self, result: ChunkResult) -> Vec<TranscriptSegment> {
        debug_assert_eq!(result.sequence, self.next_expected);
        self.next_expected += 1;
        self.total_processing += result.processing_time;

        if !result.is_completed() {
            self.failed += 1;
            self.gaps.push(result.sequence);
            return Vec::new();
        }
        self.processed += 1;

        let timing = self
            .timings
            .get(&result.sequence)
            .copied()
            .unwrap_or_default();

        result
            .segments
            .into_iter()
            .filter(|segment| segment.end > timing.overlap)
            .map(|segment| TranscriptSegment {
                start: timing.start_time + segment.start,
                end: timing.start_time + segment.end,
                text: segment.text,
            })
            .collect()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn next_expected_sequence(&self) -> u64 {
        self.next_expected
    }

    /// Sequences permanently missing from the transcript.
    pub fn gap_sequences(&self) -> &[u64] {
        &self.gaps
    }

    pub fn stats(&self) -> ConsolidationStats {
        let terminal = self.processed + self.failed;
        ConsolidationStats {
            processed_chunks: self.processed,
            failed_chunks: self.failed,
            buffered_chunks: self.buffered.len(),
            average_processing_ms: if terminal == 0 {
                0.0
            } else {
                self.total_processing.as_secs_f64() * 1000.0 / terminal as f64
            },
        }
    }

    /// Drops all state for a fresh session.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for ResultConsolidator {
    fn default() -> Self {
        Self::new()
    }
}
