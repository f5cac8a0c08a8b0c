//! Container repair for mid-stream chunk payloads.
//!
//! The capture primitive frames only the very beginning of its stream; every
//! later slice is a bare run of compressed cluster data. [`ContainerRepair`]
//! synthesizes the minimal structure around such a slice so the resulting
//! chunk file decodes on its own.

pub mod header;
pub mod vint;

use crate::error::{Result, ScrivaError};

/// Repairs raw cluster payloads into independently decodable chunk bytes.
///
/// The synthesized header describes exactly one audio track; sample rate and
/// channel count are fixed per recording session.
#[derive(Debug, Clone)]
pub struct ContainerRepair {
    sample_rate: u32,
    channels: u16,
    /// Structural header, built once per session.
    header: Vec<u8>,
}

impl ContainerRepair {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            header: header::structural_header(sample_rate, channels),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Wraps one raw cluster payload into a self-decodable byte stream.
    ///
    /// The first chunk of a session already carries full framing from the
    /// capture primitive and passes through untouched. Every later chunk
    /// gets the synthesized header and a Cluster wrapper prepended.
    ///
    /// # Errors
    /// [`ScrivaError::EmptyPayload`] if `cluster_bytes` is empty — a
    /// zero-length cluster is never emitted.
    pub fn repair(&self, cluster_bytes: &[u8], is_first_chunk: bool) -> Result<Vec<u8>> {
        if cluster_bytes.is_empty() {
            return Err(ScrivaError::EmptyPayload);
        }

        if is_first_chunk {
            return Ok(cluster_bytes.to_vec());
        }

        let wrapper = header::cluster_wrapper(cluster_bytes.len() as u64);
        let mut out =
            Vec::with_capacity(self.header.len() + wrapper.len() + cluster_bytes.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&wrapper);
        out.extend_from_slice(cluster_bytes);
        Ok(out)
    }
}

impl Default for ContainerRepair {
    fn default() -> Self {
        Self::new(crate::defaults::SAMPLE_RATE, crate::defaults::CHANNELS)
    }
}
