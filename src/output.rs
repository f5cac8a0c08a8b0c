//! Shared event rendering for terminal output.
//! Used by the `scriva record` command's verbose mode.

use crate::session::SessionEvent;
use crate::watcher::WatcherStats;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Render a session event to stderr.
pub fn render_event(event: &SessionEvent, verbose: bool) {
    match event {
        SessionEvent::ChunkRecorded { sequence, bytes } => {
            if verbose {
                eprintln!("{DIM}chunk {sequence} recorded ({bytes} bytes){RESET}");
            }
        }
        SessionEvent::ChunkTranscribed {
            sequence,
            file_name,
            text,
        } => {
            if text.is_empty() {
                eprintln!("{DIM}[{sequence}] (no speech){RESET}");
            } else if verbose {
                eprintln!("{GREEN}[{sequence}]{RESET} {text} {DIM}({file_name}){RESET}");
            } else {
                eprintln!("{GREEN}[{sequence}]{RESET} {text}");
            }
        }
        SessionEvent::ChunkFailed { sequence, error } => {
            eprintln!("{RED}[{sequence}] failed: {error}{RESET}");
        }
        SessionEvent::StatsUpdated(stats) => {
            if verbose {
                eprintln!(
                    "{DIM}progress: {}/{} chunks, {} failed, avg {:.0}ms{RESET}",
                    stats.processed_chunks,
                    stats.total_chunks,
                    stats.failed_chunks,
                    stats.average_processing_ms
                );
            }
        }
        SessionEvent::BreakerTripped { failures } => {
            eprintln!(
                "{RED}transcription halted after {failures} consecutive failures{RESET}"
            );
        }
        SessionEvent::SessionError { message } => {
            eprintln!("{YELLOW}warning: {message}{RESET}");
        }
    }
}

/// Render the end-of-session summary to stderr.
pub fn render_summary(stats: &WatcherStats) {
    let failed = if stats.failed_chunks > 0 {
        format!(" {RED}{} failed{RESET}", stats.failed_chunks)
    } else {
        String::new()
    };
    eprintln!(
        "{}/{} chunks transcribed{} {DIM}(avg {:.0}ms per chunk){RESET}",
        stats.processed_chunks, stats.total_chunks, failed, stats.average_processing_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    // Smoke tests: rendering writes to stderr, which tests cannot capture.
    // These validate that every variant renders without panicking.
    #[test]
    fn render_event_covers_all_variants() {
        render_event(
            &SessionEvent::ChunkRecorded {
                sequence: 0,
                bytes: 4096,
            },
            true,
        );
        render_event(
            &SessionEvent::ChunkTranscribed {
                sequence: 1,
                file_name: "chunk_00001_1700000000000.webm".to_string(),
                text: "hello world".to_string(),
            },
            false,
        );
        render_event(
            &SessionEvent::ChunkTranscribed {
                sequence: 2,
                file_name: "chunk_00002_1700000000000.webm".to_string(),
                text: String::new(),
            },
            false,
        );
        render_event(
            &SessionEvent::ChunkFailed {
                sequence: 3,
                error: "backend unreachable".to_string(),
            },
            false,
        );
        render_event(
            &SessionEvent::StatsUpdated(WatcherStats {
                total_chunks: 4,
                processed_chunks: 2,
                failed_chunks: 1,
                average_processing_ms: 350.0,
            }),
            true,
        );
        render_event(&SessionEvent::BreakerTripped { failures: 5 }, false);
        render_event(
            &SessionEvent::SessionError {
                message: "disk hiccup".to_string(),
            },
            false,
        );
    }

    #[test]
    fn render_summary_with_and_without_failures() {
        render_summary(&WatcherStats {
            total_chunks: 10,
            processed_chunks: 10,
            failed_chunks: 0,
            average_processing_ms: 120.0,
        });
        render_summary(&WatcherStats {
            total_chunks: 10,
            processed_chunks: 8,
            failed_chunks: 2,
            average_processing_ms: 480.0,
        });
    }
}
