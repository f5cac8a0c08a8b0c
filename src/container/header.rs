//! Synthesis of the fixed structural header and Cluster wrapper.
//!
//! A mid-stream compressed block has no framing of its own. These builders
//! produce the minimal surrounding structure — document header, one audio
//! track description, and a Cluster wrapper — that a standard decoder needs
//! to play the block in isolation.

use super::vint::encode_length;

// Element IDs (IDs embed their own width and are written verbatim).
const ID_EBML: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const ID_EBML_VERSION: [u8; 2] = [0x42, 0x86];
const ID_EBML_READ_VERSION: [u8; 2] = [0x42, 0xF7];
const ID_EBML_MAX_ID_LENGTH: [u8; 2] = [0x42, 0xF2];
const ID_EBML_MAX_SIZE_LENGTH: [u8; 2] = [0x42, 0xF3];
const ID_DOC_TYPE: [u8; 2] = [0x42, 0x82];
const ID_DOC_TYPE_VERSION: [u8; 2] = [0x42, 0x87];
const ID_DOC_TYPE_READ_VERSION: [u8; 2] = [0x42, 0x85];
const ID_SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const ID_INFO: [u8; 4] = [0x15, 0x49, 0xA9, 0x66];
const ID_TIMECODE_SCALE: [u8; 3] = [0x2A, 0xD7, 0xB1];
const ID_MUXING_APP: [u8; 2] = [0x4D, 0x80];
const ID_WRITING_APP: [u8; 2] = [0x57, 0x41];
const ID_TRACKS: [u8; 4] = [0x16, 0x54, 0xAE, 0x6B];
const ID_TRACK_ENTRY: [u8; 1] = [0xAE];
const ID_TRACK_NUMBER: [u8; 1] = [0xD7];
const ID_TRACK_UID: [u8; 2] = [0x73, 0xC5];
const ID_TRACK_TYPE: [u8; 1] = [0x83];
const ID_CODEC_ID: [u8; 1] = [0x86];
const ID_AUDIO: [u8; 1] = [0xE1];
const ID_SAMPLING_FREQUENCY: [u8; 1] = [0xB5];
const ID_CHANNELS: [u8; 1] = [0x9F];
const ID_CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
const ID_TIMECODE: [u8; 1] = [0xE7];

const TRACK_TYPE_AUDIO: u64 = 2;
const CODEC_OPUS: &str = "A_OPUS";
const TIMECODE_SCALE_NS: u64 = 1_000_000;
const APP_NAME: &str = "scriva";

/// Bytes occupied by the zero Timecode sub-element inside a Cluster:
/// 1 id byte + 1 size byte + 6 value bytes.
pub const CLUSTER_TIMECODE_LEN: u64 = 8;

/// Writes `id ∥ length ∥ payload`.
fn element(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(id.len() + 8 + payload.len());
    out.extend_from_slice(id);
    out.extend_from_slice(&encode_length(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// Unsigned integer payload: big-endian, minimal width, at least one byte.
fn uint_payload(value: u64) -> Vec<u8> {
    let width = ((64 - value.leading_zeros()).div_ceil(8)).max(1) as usize;
    value.to_be_bytes()[8 - width..].to_vec()
}

fn uint_element(id: &[u8], value: u64) -> Vec<u8> {
    element(id, &uint_payload(value))
}

fn string_element(id: &[u8], value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}

fn float_element(id: &[u8], value: f32) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

/// Builds the fixed structural header: document header, Segment opener
/// (unknown size, since the stream is open-ended), Info, and a Tracks
/// element describing the single audio track.
pub fn structural_header(sample_rate: u32, channels: u16) -> Vec<u8> {
    let ebml: Vec<u8> = [
        uint_element(&ID_EBML_VERSION, 1),
        uint_element(&ID_EBML_READ_VERSION, 1),
        uint_element(&ID_EBML_MAX_ID_LENGTH, 4),
        uint_element(&ID_EBML_MAX_SIZE_LENGTH, 8),
        string_element(&ID_DOC_TYPE, "webm"),
        uint_element(&ID_DOC_TYPE_VERSION, 4),
        uint_element(&ID_DOC_TYPE_READ_VERSION, 2),
    ]
    .concat();

    let info: Vec<u8> = [
        uint_element(&ID_TIMECODE_SCALE, TIMECODE_SCALE_NS),
        string_element(&ID_MUXING_APP, APP_NAME),
        string_element(&ID_WRITING_APP, APP_NAME),
    ]
    .concat();

    let audio: Vec<u8> = [
        float_element(&ID_SAMPLING_FREQUENCY, sample_rate as f32),
        uint_element(&ID_CHANNELS, channels as u64),
    ]
    .concat();

    let track_entry: Vec<u8> = [
        uint_element(&ID_TRACK_NUMBER, 1),
        uint_element(&ID_TRACK_UID, 1),
        uint_element(&ID_TRACK_TYPE, TRACK_TYPE_AUDIO),
        string_element(&ID_CODEC_ID, CODEC_OPUS),
        element(&ID_AUDIO, &audio),
    ]
    .concat();

    let tracks = element(&ID_TRACKS, &element(&ID_TRACK_ENTRY, &track_entry));

    let mut out = element(&ID_EBML, &ebml);
    // Segment of unknown size: Info, Tracks and the Cluster follow as its
    // children with no closing length to patch.
    out.extend_from_slice(&ID_SEGMENT);
    out.extend_from_slice(&super::vint::UNKNOWN_SIZE);
    out.extend_from_slice(&element(&ID_INFO, &info));
    out.extend_from_slice(&tracks);
    out
}

/// Builds the Cluster opener for a payload of `payload_len` bytes:
/// tag, declared length of `payload_len + 8`, and the zero Timecode.
pub fn cluster_wrapper(payload_len: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&ID_CLUSTER);
    out.extend_from_slice(&encode_length(payload_len + CLUSTER_TIMECODE_LEN));
    out.extend_from_slice(&ID_TIMECODE);
    out.push(0x86); // 6-byte value
    out.extend_from_slice(&[0u8; 6]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::vint::{DecodedLength, decode_length};

    #[test]
    fn uint_payload_is_minimal_big_endian() {
        assert_eq!(uint_payload(0), vec![0x00]);
        assert_eq!(uint_payload(1), vec![0x01]);
        assert_eq!(uint_payload(0x100), vec![0x01, 0x00]);
        assert_eq!(uint_payload(TIMECODE_SCALE_NS), vec![0x0F, 0x42, 0x40]);
    }

    #[test]
    fn element_length_matches_payload() {
        let e = element(&ID_DOC_TYPE, b"webm");
        assert_eq!(&e[..2], &ID_DOC_TYPE);
        assert_eq!(
            decode_length(&e[2..]),
            Some(DecodedLength::Literal { value: 4, width: 1 })
        );
        assert_eq!(&e[3..], b"webm");
    }

    #[test]
    fn header_starts_with_ebml_magic() {
        let header = structural_header(48000, 1);
        assert_eq!(&header[..4], &ID_EBML);
    }

    #[test]
    fn header_declares_webm_doc_type_and_opus_codec() {
        let header = structural_header(48000, 1);
        let contains = |needle: &[u8]| {
            header
                .windows(needle.len())
                .any(|window| window == needle)
        };
        assert!(contains(b"webm"));
        assert!(contains(CODEC_OPUS.as_bytes()));
    }

    #[test]
    fn header_opens_an_unknown_size_segment() {
        let header = structural_header(48000, 1);
        let segment_at = header
            .windows(4)
            .position(|w| w == ID_SEGMENT)
            .expect("segment id present");
        assert_eq!(
            decode_length(&header[segment_at + 4..]),
            Some(DecodedLength::Unknown)
        );
    }

    #[test]
    fn header_embeds_channel_count() {
        let mono = structural_header(48000, 1);
        let stereo = structural_header(48000, 2);
        assert_ne!(mono, stereo);
    }

    #[test]
    fn cluster_wrapper_declares_payload_plus_timecode() {
        let wrapper = cluster_wrapper(100);
        assert_eq!(&wrapper[..4], &ID_CLUSTER);
        assert_eq!(
            decode_length(&wrapper[4..]),
            Some(DecodedLength::Literal {
                value: 108,
                width: 1
            })
        );
    }

    #[test]
    fn cluster_wrapper_timecode_is_zero_and_eight_bytes() {
        let wrapper = cluster_wrapper(10);
        let timecode = &wrapper[wrapper.len() - CLUSTER_TIMECODE_LEN as usize..];
        assert_eq!(timecode[0], ID_TIMECODE[0]);
        assert_eq!(timecode[1], 0x86);
        assert!(timecode[2..].iter().all(|&b| b == 0));
    }
}
