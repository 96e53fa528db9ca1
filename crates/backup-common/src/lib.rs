//! Shared types and logic for the file backup protocol: wire framing, the
//! `cksum`-compatible CRC, RSA/AES key handling, session bookkeeping, the
//! on-disk file sink and server-wide statistics.

pub mod crc;
pub mod crypto;
pub mod error;
pub mod files;
pub mod protocol;
pub mod session;
pub mod stats;

pub use crc::cksum;
pub use error::HandlerError;
pub use protocol::{RequestCode, ResponseCode};
pub use session::{ClientId, ClientSession, SessionRegistry};
pub use stats::{ServerStats, StatsSnapshot};

/// Result alias for handler code that can fail with any error in the taxonomy.
pub type Result<T> = std::result::Result<T, HandlerError>;
