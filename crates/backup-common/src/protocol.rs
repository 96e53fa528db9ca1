//! Opcodes, field sizes and the fixed-width request/response headers.
//!
//! All integer fields are little-endian. String fields are null-padded
//! fixed-width ASCII: on decode the value ends at the first `0x00` byte (or
//! at the field boundary if there is none); on encode, an over-long string
//! is truncated to `size - 1` bytes and a terminator is appended.

use bytes::{Buf, BufMut};

use crate::error::FrameError;

pub const PROTOCOL_VERSION: u8 = 3;

pub const CLIENT_ID_SIZE: usize = 16;
pub const USERNAME_SIZE: usize = 255;
pub const FILENAME_SIZE: usize = 255;

pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// Request opcodes (client -> server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestCode {
    Register = 1025,
    SendPublicKey = 1026,
    Reconnect = 1027,
    SendFile = 1028,
    CrcValid = 1029,
    CrcInvalidResend = 1030,
    CrcInvalidAbort = 1031,
}

impl RequestCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1025 => Some(Self::Register),
            1026 => Some(Self::SendPublicKey),
            1027 => Some(Self::Reconnect),
            1028 => Some(Self::SendFile),
            1029 => Some(Self::CrcValid),
            1030 => Some(Self::CrcInvalidResend),
            1031 => Some(Self::CrcInvalidAbort),
            _ => None,
        }
    }
}

/// Response opcodes (server -> client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    RegisterSuccess = 1600,
    RegisterFailed = 1601,
    PublicKeyReceived = 1602,
    FileReceived = 1603,
    GenericAck = 1604,
    ReconnectApproved = 1605,
    ReconnectDenied = 1606,
    ServerError = 1607,
}

/// Decoded fixed-size request header (23 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub client_id: [u8; CLIENT_ID_SIZE],
    pub version: u8,
    pub code: u16,
    pub payload_len: u32,
}

/// Unpack a 23-byte request header.
pub fn decode_request_header(data: &[u8]) -> Result<RequestHeader, FrameError> {
    if data.len() < REQUEST_HEADER_SIZE {
        return Err(FrameError::ShortRead {
            needed: REQUEST_HEADER_SIZE,
            got: data.len(),
        });
    }

    let mut buf = data;
    let mut client_id = [0u8; CLIENT_ID_SIZE];
    buf.copy_to_slice(&mut client_id);
    let version = buf.get_u8();
    let code = buf.get_u16_le();
    let payload_len = buf.get_u32_le();

    Ok(RequestHeader {
        client_id,
        version,
        code,
        payload_len,
    })
}

/// Pack a response header + payload into a single frame.
pub fn encode_response(code: ResponseCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload.len());
    out.put_u8(PROTOCOL_VERSION);
    out.put_u16_le(code as u16);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    out
}

/// Null-pad `s` into a fixed-width field, truncating an over-long string to
/// `size - 1` bytes before appending the terminator.
pub fn pad_string(s: &str, size: usize) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = vec![0u8; size];
    let copy_len = bytes.len().min(size.saturating_sub(1));
    out[..copy_len].copy_from_slice(&bytes[..copy_len]);
    out
}

/// Extract a null-terminated ASCII string from a fixed-width field.
pub fn unpad_string(field: &[u8]) -> Result<String, FrameError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if !field[..end].is_ascii() {
        return Err(FrameError::InvalidString);
    }
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}
