//! Wire encoding: binary chunk frames and JSON control messages.
//!
//! A chunk frame is an 8-byte big-endian header (`chunkIndex: u32`,
//! `payloadLength: u32`) followed by `payloadLength` bytes of file data.
//! Everything else — metadata, acknowledgements, resume negotiation — is a
//! small `type`-tagged JSON object sent as a text frame on the same pipe.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of a chunk payload before the trailing partial chunk, in bytes.
pub const CHUNK_SIZE: usize = 65_536;

/// Size of the binary chunk frame header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Encode a chunk frame: an 8-byte header followed by the payload.
#[must_use]
pub fn encode_chunk(index: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&index.to_be_bytes());
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode a chunk frame, returning the chunk index and a copy of the payload.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the frame is shorter than
/// [`HEADER_SIZE`] or the declared payload length does not match the
/// number of bytes actually present.
pub fn decode_chunk(frame: &[u8]) -> Result<(u32, Vec<u8>)> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "frame of {} bytes is shorter than the {HEADER_SIZE}-byte header",
            frame.len()
        )));
    }

    let index = u32::from_be_bytes(frame[0..4].try_into().expect("4 bytes"));
    let declared_len = u32::from_be_bytes(frame[4..8].try_into().expect("4 bytes")) as usize;
    let actual_len = frame.len() - HEADER_SIZE;

    if declared_len != actual_len {
        return Err(Error::MalformedFrame(format!(
            "header declares {declared_len} payload bytes but frame carries {actual_len}"
        )));
    }

    Ok((index, frame[HEADER_SIZE..].to_vec()))
}

/// Metadata describing the file about to be transferred.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMeta {
    /// Display name of the file.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// MIME type of the file, best-effort and not validated.
    pub mime_type: String,
    /// Total number of chunks the sender will emit, `ceil(size / CHUNK_SIZE)`.
    pub total_chunks: u32,
    /// Optional integrity digest of the whole file, opaque to the engine.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

/// An in-band, application-level instruction carried by a `control` message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    /// The receiver has processed `file-meta` and is ready to receive chunks.
    Ready,
    /// Ask the peer to pause sending/processing.
    Pause,
    /// Ask the peer to resume a previously paused transfer.
    Resume,
}

/// The set of JSON control messages exchanged over the pipe's text channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Sent once by the sender before the first chunk.
    FileMeta(FileMeta),
    /// Cumulative acknowledgement: every chunk up to and including these indices is received.
    Ack {
        /// Chunk indices being acknowledged in this batch.
        indices: Vec<u32>,
    },
    /// Negative acknowledgement requesting retransmission of specific chunks.
    Nack {
        /// Chunk indices the receiver is still missing.
        indices: Vec<u32>,
    },
    /// Sent by the receiver once every chunk has been received and finalised.
    TransferComplete {
        /// Whether the receiver finalised the sink successfully.
        success: bool,
        /// Total bytes written to the sink.
        bytes_received: u64,
    },
    /// Sent by the receiver (typically on reconnect) describing what it already has.
    ReceivedRanges {
        /// Coalesced inclusive `(start, end)` chunk-index ranges already received.
        ranges: Vec<(u32, u32)>,
    },
    /// An application-level instruction (pause/resume/ready).
    Control {
        /// The instruction being conveyed.
        action: ControlAction,
    },
    /// Anything carrying a `type` this build doesn't recognise.
    ///
    /// Forward-compatible peers should be able to add new message types
    /// without breaking older receivers; those messages decode here instead
    /// of failing.
    #[serde(other)]
    Unknown,
}

/// Encode a control message as JSON bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if `serde_json` fails, which should not
/// happen for well-formed [`ControlMessage`] values.
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

/// Decode a control message from JSON bytes or text.
///
/// # Errors
///
/// Returns [`Error::MalformedControl`] if the bytes are not valid JSON or do
/// not match the envelope shape (a JSON object with a `type` field).
pub fn decode_control(bytes: &[u8]) -> Result<ControlMessage> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedControl(format!("invalid control envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip() {
        let payload = b"hello chunk";
        let frame = encode_chunk(7, payload);
        assert_eq!(frame.len(), HEADER_SIZE + payload.len());
        let (idx, data) = decode_chunk(&frame).expect("decode");
        assert_eq!(idx, 7);
        assert_eq!(data, payload);
    }

    #[test]
    fn chunk_empty_payload_roundtrips() {
        let frame = encode_chunk(0, &[]);
        assert_eq!(frame.len(), HEADER_SIZE);
        let (idx, data) = decode_chunk(&frame).expect("decode");
        assert_eq!(idx, 0);
        assert!(data.is_empty());
    }

    #[test]
    fn chunk_too_short_is_malformed() {
        let err = decode_chunk(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn chunk_length_mismatch_is_malformed() {
        let mut frame = encode_chunk(1, b"abcd");
        frame.truncate(frame.len() - 1);
        let err = decode_chunk(&frame).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn control_message_roundtrips() {
        let msg = ControlMessage::FileMeta(FileMeta {
            name: "movie.mp4".into(),
            size: 123_456,
            mime_type: "video/mp4".into(),
            total_chunks: 2,
            checksum: None,
        });
        let bytes = encode_control(&msg).expect("encode");
        let decoded = decode_control(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn ack_and_nack_roundtrip() {
        let ack = ControlMessage::Ack {
            indices: vec![0, 1, 2],
        };
        let bytes = encode_control(&ack).unwrap();
        assert_eq!(decode_control(&bytes).unwrap(), ack);

        let nack = ControlMessage::Nack { indices: vec![5] };
        let bytes = encode_control(&nack).unwrap();
        assert_eq!(decode_control(&bytes).unwrap(), nack);
    }

    #[test]
    fn unknown_type_does_not_fail() {
        let decoded = decode_control(br#"{"type":"future-feature","x":1}"#).unwrap();
        assert_eq!(decoded, ControlMessage::Unknown);
    }

    #[test]
    fn garbage_bytes_are_malformed_control() {
        let err = decode_control(b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedControl(_)));
    }
}
