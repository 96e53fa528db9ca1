//! Per-connection state machine: read a frame, route it by opcode, write
//! back the response. One dispatcher task runs per accepted socket; the
//! opcodes are routed with an exhaustive match rather than a dynamic
//! handler registry, matched against the session registry under its own
//! lock and the crypto layer outside of it.

use std::net::SocketAddr;
use std::sync::Arc;

use backup_common::crc::cksum;
use backup_common::crypto::{decrypt_file, import_rsa_public_key, wrap_aes_key};
use backup_common::error::{AuthError, FrameError, HandlerError, VersionError};
use backup_common::files;
use backup_common::protocol::{
    CLIENT_ID_SIZE, FILENAME_SIZE, PROTOCOL_VERSION, REQUEST_HEADER_SIZE, RequestCode,
    RequestHeader, ResponseCode, USERNAME_SIZE, decode_request_header, encode_response,
    pad_string, unpad_string,
};
use backup_common::session::SessionRegistry;
use backup_common::stats::ServerStats;
use bytes::Buf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

type HandlerResult = Result<(ResponseCode, Vec<u8>), HandlerError>;

pub struct Dispatcher {
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    stats: Arc<ServerStats>,
    config: Arc<ServerConfig>,
}

impl Dispatcher {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        stats: Arc<ServerStats>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            stream,
            addr,
            registry,
            stats,
            config,
        }
    }

    /// Drive the connection until the peer closes it or a framing error
    /// forces us to close it ourselves.
    pub async fn run(mut self) {
        loop {
            let mut header_buf = [0u8; REQUEST_HEADER_SIZE];
            if let Err(e) = self.stream.read_exact(&mut header_buf).await {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!("[{}] header read error: {}", self.addr, e);
                }
                debug!("[{}] connection closed", self.addr);
                return;
            }

            let header = match decode_request_header(&header_buf) {
                Ok(h) => h,
                Err(e) => {
                    warn!("[{}] malformed header: {}", self.addr, e);
                    return;
                }
            };

            if header.version != PROTOCOL_VERSION {
                let err = HandlerError::from(VersionError {
                    got: header.version,
                    expected: PROTOCOL_VERSION,
                });
                warn!("[{}] {}", self.addr, err);
                self.stats.log_error();
                if self.send(ResponseCode::ServerError, &[]).await.is_err() {
                    return;
                }
                continue;
            }

            let mut payload = vec![0u8; header.payload_len as usize];
            if let Err(e) = self.stream.read_exact(&mut payload).await {
                warn!("[{}] payload read error: {}", self.addr, e);
                return;
            }

            self.stats.log_request(header.code);
            if self.config.verbose {
                info!(
                    "[{}] request opcode={} payload_len={} client_id={}",
                    self.addr,
                    header.code,
                    header.payload_len,
                    hex::encode(&header.client_id[..4])
                );
            }

            let outcome = self.dispatch(&header, &payload);
            match outcome {
                Some(Ok((code, body))) if self.send(code, &body).await.is_err() => {
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[{}] request failed: {}", self.addr, e);
                    self.stats.log_error();
                    if self.send(ResponseCode::ServerError, &[]).await.is_err() {
                        return;
                    }
                }
                None => {
                    // CrcInvalidResend: no response, loop back for the next frame.
                }
            }
        }
    }

    async fn send(&mut self, code: ResponseCode, payload: &[u8]) -> std::io::Result<()> {
        self.stats.log_response(code);
        if self.config.verbose {
            info!(
                "[{}] response opcode={:?} payload_len={}",
                self.addr, code, payload.len()
            );
        }
        let frame = encode_response(code, payload);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await
    }

    fn dispatch(&self, header: &RequestHeader, payload: &[u8]) -> Option<HandlerResult> {
        let Some(request_code) = RequestCode::from_u16(header.code) else {
            return Some(Err(FrameError::UnknownOpcode(header.code).into()));
        };

        match request_code {
            RequestCode::Register => Some(self.handle_register(payload)),
            RequestCode::SendPublicKey => Some(self.handle_send_public_key(payload)),
            RequestCode::Reconnect => Some(self.handle_reconnect(header, payload)),
            RequestCode::SendFile => Some(self.handle_send_file(header, payload)),
            RequestCode::CrcValid => {
                self.stats.log_crc_valid();
                Some(Ok((ResponseCode::GenericAck, header.client_id.to_vec())))
            }
            RequestCode::CrcInvalidResend => {
                self.stats.log_crc_invalid();
                None
            }
            RequestCode::CrcInvalidAbort => {
                self.stats.log_crc_aborted();
                Some(Ok((ResponseCode::GenericAck, header.client_id.to_vec())))
            }
        }
    }

    fn handle_register(&self, payload: &[u8]) -> HandlerResult {
        if payload.len() < USERNAME_SIZE {
            return Err(FrameError::PayloadTooShort {
                opcode: RequestCode::Register as u16,
                needed: USERNAME_SIZE,
                got: payload.len(),
            }
            .into());
        }
        let username = unpad_string(&payload[..USERNAME_SIZE])?;

        match self.registry.register(&username) {
            Ok(client_id) => {
                self.stats.log_registration();
                Ok((ResponseCode::RegisterSuccess, client_id.to_vec()))
            }
            Err(AuthError::AlreadyTaken) => Ok((ResponseCode::RegisterFailed, Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_send_public_key(&self, payload: &[u8]) -> HandlerResult {
        const RSA_SPKI_SIZE: usize = backup_common::crypto::RSA_SPKI_SIZE;
        if payload.len() < USERNAME_SIZE + RSA_SPKI_SIZE {
            return Err(FrameError::PayloadTooShort {
                opcode: RequestCode::SendPublicKey as u16,
                needed: USERNAME_SIZE + RSA_SPKI_SIZE,
                got: payload.len(),
            }
            .into());
        }
        let username = unpad_string(&payload[..USERNAME_SIZE])?;
        let spki = payload[USERNAME_SIZE..USERNAME_SIZE + RSA_SPKI_SIZE].to_vec();

        let (client_id, aes_key) = self.registry.attach_public_key(&username, spki.clone())?;
        let public_key = import_rsa_public_key(&spki)?;
        let wrapped = wrap_aes_key(&public_key, &aes_key)?;

        let mut body = client_id.to_vec();
        body.extend_from_slice(&wrapped);
        Ok((ResponseCode::PublicKeyReceived, body))
    }

    fn handle_reconnect(&self, header: &RequestHeader, payload: &[u8]) -> HandlerResult {
        if payload.len() < USERNAME_SIZE {
            return Err(FrameError::PayloadTooShort {
                opcode: RequestCode::Reconnect as u16,
                needed: USERNAME_SIZE,
                got: payload.len(),
            }
            .into());
        }
        let username = unpad_string(&payload[..USERNAME_SIZE])?;

        match self.registry.rekey_on_reconnect(&username) {
            Ok((client_id, aes_key)) => {
                let session = self.registry.lookup(&client_id)?;
                let Some(spki) = session.rsa_public_key else {
                    return Ok(denied(&self.registry, &username, &header.client_id));
                };
                let public_key = import_rsa_public_key(&spki)?;
                let wrapped = wrap_aes_key(&public_key, &aes_key)?;
                self.stats.log_reconnection();
                let mut body = client_id.to_vec();
                body.extend_from_slice(&wrapped);
                Ok((ResponseCode::ReconnectApproved, body))
            }
            Err(AuthError::UnknownUsername) => {
                Ok((ResponseCode::ReconnectDenied, header.client_id.to_vec()))
            }
            Err(AuthError::NoPublicKey) => {
                Ok(denied(&self.registry, &username, &header.client_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_send_file(&self, header: &RequestHeader, payload: &[u8]) -> HandlerResult {
        const MIN_LEN: usize = 4 + 4 + 2 + 2 + FILENAME_SIZE;
        if payload.len() < MIN_LEN {
            return Err(FrameError::PayloadTooShort {
                opcode: RequestCode::SendFile as u16,
                needed: MIN_LEN,
                got: payload.len(),
            }
            .into());
        }

        let mut buf = payload;
        let ciphertext_size = buf.get_u32_le();
        buf.advance(4); // original file size, unused server-side
        let packet_number = buf.get_u16_le();
        let total_packets = buf.get_u16_le();
        let filename_field = &buf[..FILENAME_SIZE];
        let ciphertext = &buf[FILENAME_SIZE..];

        if packet_number != 1 || total_packets != 1 {
            return Err(FrameError::UnsupportedFragmentation {
                packet_number,
                total_packets,
            }
            .into());
        }
        let filename = unpad_string(filename_field)?;

        let session = self.registry.lookup(&header.client_id)?;
        let aes_key = session.aes_key.ok_or(AuthError::NoSessionKey)?;

        let plaintext = decrypt_file(&aes_key, ciphertext)?;
        files::store(&self.config.files_dir, &header.client_id, &filename, &plaintext)?;

        let crc = cksum(&plaintext);
        self.stats.log_file_received(plaintext.len() as u64);

        let mut body = header.client_id.to_vec();
        body.extend_from_slice(&ciphertext_size.to_le_bytes());
        body.extend_from_slice(&pad_string(&filename, FILENAME_SIZE));
        body.extend_from_slice(&crc.to_le_bytes());
        Ok((ResponseCode::FileReceived, body))
    }
}

/// Compose a ReconnectDenied response, preferring the client ID already on
/// file for `username` and falling back to the one supplied in the request.
fn denied(
    registry: &SessionRegistry,
    username: &str,
    fallback: &[u8; CLIENT_ID_SIZE],
) -> (ResponseCode, Vec<u8>) {
    let client_id = registry.resolve_client_id(username).unwrap_or(*fallback);
    (ResponseCode::ReconnectDenied, client_id.to_vec())
}
