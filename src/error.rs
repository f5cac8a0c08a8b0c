//! Error types for scriva.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrivaError {
    // Container repair errors — fatal to the single chunk, never retried
    #[error("Cannot repair an empty cluster payload")]
    EmptyPayload,

    #[error("Malformed container payload: {message}")]
    MalformedPayload { message: String },

    // Capture errors
    #[error("Block source failed: {message}")]
    BlockSource { message: String },

    #[error("Capture session failed: {message}")]
    Capture { message: String },

    // Transcription errors — retried up to the configured attempt budget
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Transcription attempt timed out after {timeout_ms}ms")]
    TranscriptionTimeout { timeout_ms: u64 },

    // Queue errors
    #[error("Chunk {chunk_id} is already queued")]
    DuplicateChunk { chunk_id: String },

    // Session-level halt: the circuit breaker tripped
    #[error("Transcription halted after {failures} consecutive failures")]
    SystemicFailure { failures: u32 },

    // Watcher / filesystem errors
    #[error("Cannot read watch folder {path}: {message}")]
    WatchFolderUnreadable { path: String, message: String },

    #[error("Cannot write output file {path}: {message}")]
    OutputUnwritable { path: String, message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ScrivaError {
    /// True for errors that retrying cannot fix (malformed input stays malformed).
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ScrivaError::EmptyPayload | ScrivaError::MalformedPayload { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScrivaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_empty_payload_display() {
        let error = ScrivaError::EmptyPayload;
        assert_eq!(error.to_string(), "Cannot repair an empty cluster payload");
    }

    #[test]
    fn test_transcription_display() {
        let error = ScrivaError::Transcription {
            message: "backend unreachable".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transcription failed: backend unreachable"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = ScrivaError::TranscriptionTimeout { timeout_ms: 30000 };
        assert_eq!(
            error.to_string(),
            "Transcription attempt timed out after 30000ms"
        );
    }

    #[test]
    fn test_duplicate_chunk_display() {
        let error = ScrivaError::DuplicateChunk {
            chunk_id: "chunk_00003_1700000000000".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Chunk chunk_00003_1700000000000 is already queued"
        );
    }

    #[test]
    fn test_systemic_failure_display() {
        let error = ScrivaError::SystemicFailure { failures: 5 };
        assert_eq!(
            error.to_string(),
            "Transcription halted after 5 consecutive failures"
        );
    }

    #[test]
    fn test_watch_folder_unreadable_display() {
        let error = ScrivaError::WatchFolderUnreadable {
            path: "/tmp/temp_meeting".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Cannot read watch folder /tmp/temp_meeting: permission denied"
        );
    }

    #[test]
    fn test_permanent_classification() {
        assert!(ScrivaError::EmptyPayload.is_permanent());
        assert!(
            ScrivaError::MalformedPayload {
                message: "truncated".to_string()
            }
            .is_permanent()
        );
        assert!(
            !ScrivaError::Transcription {
                message: "timeout".to_string()
            }
            .is_permanent()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ScrivaError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: ScrivaError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScrivaError>();
        assert_sync::<ScrivaError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
