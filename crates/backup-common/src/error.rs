//! Error taxonomy for the backup protocol.
//!
//! Each variant maps to one of the propagation rules in the protocol's error
//! handling design: the dispatcher matches on variant (not on message text)
//! to decide which wire response to send.

use thiserror::Error;

/// Failures while framing or parsing a request/response on the wire.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("short read: needed {needed} bytes, got {got}")]
    ShortRead { needed: usize, got: usize },

    #[error("payload too short for opcode {opcode}: needed at least {needed} bytes, got {got}")]
    PayloadTooShort {
        opcode: u16,
        needed: usize,
        got: usize,
    },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("non-ASCII or unterminated string field")]
    InvalidString,

    #[error("multi-packet file transfers are not supported: packet {packet_number} of {total_packets}")]
    UnsupportedFragmentation {
        packet_number: u16,
        total_packets: u16,
    },
}

/// Failures tied to session identity: unknown usernames/IDs, duplicate
/// registration, or a handshake step attempted out of order.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username already registered")]
    AlreadyTaken,

    #[error("unknown username")]
    UnknownUsername,

    #[error("unknown client id")]
    UnknownClientId,

    #[error("client has no public key on file")]
    NoPublicKey,

    #[error("client has no AES session key on file")]
    NoSessionKey,
}

/// Failures in the cryptographic layer: key import, wrap, or decrypt.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to import RSA public key: {0}")]
    RsaImport(String),

    #[error("failed to wrap AES key under RSA-OAEP: {0}")]
    RsaWrap(String),

    #[error("AES-CBC ciphertext is not a multiple of the block size")]
    InvalidCiphertextLength,

    #[error("invalid PKCS#7 padding")]
    InvalidPadding,
}

/// Failures persisting a received file or accessing the underlying socket.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("filename must not contain a path separator: {0:?}")]
    UnsafeFilename(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The protocol version byte on a frame did not equal the expected version.
#[derive(Debug, Error)]
#[error("unsupported protocol version {got} (expected {expected})")]
pub struct VersionError {
    pub got: u8,
    pub expected: u8,
}

/// Any failure a request handler can produce, gathering the taxonomy above
/// so dispatcher code can propagate with `?` and then match once to choose
/// the wire response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Version(#[from] VersionError),
}
