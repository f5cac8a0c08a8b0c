//! Speech-recognition backend seam.
//!
//! The actual recognizer lives out of process. Everything the pipeline
//! needs from it is one call: bytes in, timed segments out. The trait
//! allows swapping implementations (real engine vs mock).

use crate::chunk::TranscriptSegment;
use crate::error::{Result, ScrivaError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Result of one backend invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    /// Recognized segments, ordered, chunk-relative timestamps.
    pub segments: Vec<TranscriptSegment>,
    /// Audio duration the backend saw, in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Detected or configured language code.
    #[serde(default)]
    pub language: String,
}

/// Trait for the external speech-recognition call.
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one chunk's container bytes.
    ///
    /// May block for seconds; callers dispatch it off the async runtime.
    fn transcribe(&self, audio: &[u8]) -> Result<TranscriptionOutput>;

    /// Human-readable backend name for diagnostics.
    fn name(&self) -> &str;

    /// Whether the backend is able to take work right now.
    fn is_ready(&self) -> bool;
}

/// Implement TranscriptionBackend for Arc<T> to allow sharing across tasks.
impl<T: TranscriptionBackend + ?Sized> TranscriptionBackend for Arc<T> {
    fn transcribe(&self, audio: &[u8]) -> Result<TranscriptionOutput> {
        (**self).transcribe(audio)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Backend that shells out to an external recognizer command.
///
/// The chunk bytes are piped to the command's stdin; the command prints a
/// [`TranscriptionOutput`] as JSON on stdout. Anything on stderr of a
/// failing invocation becomes the error message, verbatim.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TranscriptionBackend for CommandBackend {
    fn transcribe(&self, audio: &[u8]) -> Result<TranscriptionOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScrivaError::Transcription {
                message: format!("failed to start {}: {}", self.program, e),
            })?;

        // stdin is dropped after writing so the child sees EOF
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(audio)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ScrivaError::Transcription {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ScrivaError::Transcription {
            message: format!("unparseable backend output: {}", e),
        })
    }

    fn name(&self) -> &str {
        &self.program
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Mock backend for testing.
pub struct MockBackend {
    name: String,
    segments: Vec<TranscriptSegment>,
    language: String,
    /// Attempts that fail before the first success; `u32::MAX` fails forever.
    failures_before_success: u32,
    failure_message: String,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockBackend {
    /// Create a new mock backend with default settings.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.0,
                text: "mock transcription".to_string(),
            }],
            language: "en".to_string(),
            failures_before_success: 0,
            failure_message: "mock transcription failure".to_string(),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Configure the mock to return a single segment with this text.
    pub fn with_text(mut self, text: &str) -> Self {
        self.segments = vec![TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: text.to_string(),
        }];
        self
    }

    /// Configure the mock to return specific segments.
    pub fn with_segments(mut self, segments: Vec<TranscriptSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Configure the mock to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.failures_before_success = u32::MAX;
        self
    }

    /// Configure the mock to fail the first `n` calls, then succeed.
    pub fn with_failures_before_success(mut self, n: u32) -> Self {
        self.failures_before_success = n;
        self
    }

    /// Configure the error message used for failures.
    pub fn with_failure_message(mut self, message: &str) -> Self {
        self.failure_message = message.to_string();
        self
    }

    /// Configure a per-call delay to simulate a slow recognizer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of transcribe calls seen so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TranscriptionBackend for MockBackend {
    fn transcribe(&self, _audio: &[u8]) -> Result<TranscriptionOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if call < self.failures_before_success {
            return Err(ScrivaError::Transcription {
                message: self.failure_message.clone(),
            });
        }
        Ok(TranscriptionOutput {
            segments: self.segments.clone(),
            duration: self.segments.last().map(|s| s.end).unwrap_or(0.0),
            language: self.language.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.failures_before_success == 0
    }
}
