//! Block source seam over the platform capture primitive.
//!
//! The capture driver itself lives outside this crate; all the pipeline
//! needs is a stream of compressed blocks on a fixed cadence. The trait
//! allows swapping implementations (real driver vs reader-backed vs mock).

use crate::error::{Result, ScrivaError};
use std::io::Read;
use std::time::Duration;

/// Trait for a compressed-audio block producer.
pub trait BlockSource: Send {
    /// Start delivering blocks.
    fn start(&mut self) -> Result<()>;

    /// Stop delivering blocks and release the underlying device.
    fn stop(&mut self) -> Result<()>;

    /// Returns the next block if one is available right now.
    ///
    /// `Ok(None)` means "nothing yet" — poll again later. A finite source
    /// additionally reports end-of-stream through [`BlockSource::is_exhausted`].
    fn poll_block(&mut self) -> Result<Option<Vec<u8>>>;

    /// True once the source will never produce another block.
    /// Live capture devices never exhaust; reader-backed sources do.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Block source that reads a pre-encoded stream from any reader.
///
/// Used for pipe mode: the stream is cut into fixed-size blocks, standing in
/// for the capture primitive's periodic emissions.
pub struct ReaderBlockSource {
    reader: Box<dyn Read + Send>,
    block_size: usize,
    exhausted: bool,
    /// Optional delay before each block, to mimic the live cadence.
    block_delay: Option<Duration>,
}

impl ReaderBlockSource {
    /// Create from any reader, emitting blocks of `block_size` bytes.
    pub fn new(reader: Box<dyn Read + Send>, block_size: usize) -> Self {
        Self {
            reader,
            block_size: block_size.max(1),
            exhausted: false,
            block_delay: None,
        }
    }

    /// Create from stdin.
    pub fn from_stdin(block_size: usize) -> Self {
        Self::new(Box::new(std::io::stdin()), block_size)
    }

    /// Sleep this long before yielding each block, simulating live capture.
    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = Some(delay);
        self
    }
}

impl BlockSource for ReaderBlockSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(delay) = self.block_delay {
            std::thread::sleep(delay);
        }

        let mut block = vec![0u8; self.block_size];
        let mut filled = 0;
        while filled < block.len() {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ScrivaError::BlockSource {
                        message: format!("read failed: {}", e),
                    });
                }
            }
        }

        if filled == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        block.truncate(filled);
        Ok(Some(block))
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Mock block source for testing
pub struct MockBlockSource {
    blocks: Vec<Vec<u8>>,
    position: usize,
    is_started: bool,
    should_fail_start: bool,
    should_fail_poll: bool,
    block_delay: Option<Duration>,
    error_message: String,
}

impl MockBlockSource {
    /// Create a new mock block source with default settings
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            position: 0,
            is_started: false,
            should_fail_start: false,
            should_fail_poll: false,
            block_delay: None,
            error_message: "mock block source error".to_string(),
        }
    }

    /// Configure the mock to deliver these blocks, in order
    pub fn with_blocks(mut self, blocks: Vec<Vec<u8>>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on poll
    pub fn with_poll_failure(mut self) -> Self {
        self.should_fail_poll = true;
        self
    }

    /// Configure a delay before each delivered block
    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = Some(delay);
        self
    }

    /// Check if the source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockBlockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSource for MockBlockSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(ScrivaError::BlockSource {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn poll_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.should_fail_poll {
            return Err(ScrivaError::BlockSource {
                message: self.error_message.clone(),
            });
        }
        if self.position >= self.blocks.len() {
            return Ok(None);
        }
        if let Some(delay) = self.block_delay {
            std::thread::sleep(delay);
        }
        let block = self.blocks[self.position].clone();
        self.position += 1;
        Ok(Some(block))
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.blocks.len()
    }
}
