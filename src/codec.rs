//! The APS legacy binary framing: send frames, error-response frames, and
//! feedback records. Pure encode/decode helpers; no I/O lives here.

use crate::error::{Error, Result};

/// Command byte for a send frame (the "simple" / legacy notification
/// format, command 1).
const COMMAND_SEND: u8 = 0x01;

/// Command byte for an error-response frame.
const COMMAND_ERROR_RESPONSE: u8 = 0x08;

/// Device tokens are always 32 raw bytes on the wire.
pub const TOKEN_LEN: usize = 32;

/// A decoded error-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: ApsStatus,
    pub request_id: u32,
}

/// APS error-response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApsStatus {
    NoError,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    Unknown,
}

impl ApsStatus {
    fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => ApsStatus::NoError,
            1 => ApsStatus::ProcessingError,
            2 => ApsStatus::MissingDeviceToken,
            3 => ApsStatus::MissingTopic,
            4 => ApsStatus::MissingPayload,
            5 => ApsStatus::InvalidTokenSize,
            6 => ApsStatus::InvalidTopicSize,
            7 => ApsStatus::InvalidPayloadSize,
            8 => ApsStatus::InvalidToken,
            255 => ApsStatus::Unknown,
            _ => return Err(Error::MalformedFrame("unrecognized APS status byte")),
        })
    }
}

/// A decoded feedback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub timestamp: u32,
    pub token: [u8; TOKEN_LEN],
}

/// Encodes a send frame. `expiry` is seconds since epoch, `0` meaning
/// "don't store". `token` must be exactly 32 bytes; `payload_json` is the
/// already-rendered `aps` JSON body.
pub fn encode_send(request_id: u32, expiry: u32, token: &[u8], payload_json: &[u8]) -> Vec<u8> {
    debug_assert_eq!(token.len(), TOKEN_LEN, "device token must be 32 bytes");

    let mut frame = Vec::with_capacity(45 + payload_json.len());
    frame.push(COMMAND_SEND);
    frame.extend_from_slice(&request_id.to_be_bytes());
    frame.extend_from_slice(&expiry.to_be_bytes());
    frame.extend_from_slice(&(TOKEN_LEN as u16).to_be_bytes());
    frame.extend_from_slice(token);
    frame.extend_from_slice(&(payload_json.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload_json);
    frame
}

/// Decodes a 6-byte error-response frame.
pub fn decode_error_response(frame: &[u8; 6]) -> Result<ErrorResponse> {
    if frame[0] != COMMAND_ERROR_RESPONSE {
        return Err(Error::MalformedFrame("expected error-response command 8"));
    }
    let status = ApsStatus::from_byte(frame[1])?;
    let request_id = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
    Ok(ErrorResponse { status, request_id })
}

/// Decodes a 38-byte feedback record. Returns `None` if the token-length
/// field isn't exactly 32.
pub fn decode_feedback_record(record: &[u8; 38]) -> Option<FeedbackRecord> {
    let timestamp = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
    let token_len = u16::from_be_bytes([record[4], record[5]]);
    if token_len as usize != TOKEN_LEN {
        return None;
    }
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&record[6..38]);
    Some(FeedbackRecord { timestamp, token })
}
