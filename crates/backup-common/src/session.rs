//! In-memory session registry: username <-> client ID <-> key material.
//!
//! All mutators take the registry's single mutex for the duration of one
//! operation. Crypto (RSA import/wrap) runs outside the lock: the caller
//! copies out the session handle and fresh key first, per §5 of the design.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use rand::rngs::OsRng;

use crate::crypto::AES_KEY_SIZE;
use crate::error::AuthError;
use crate::protocol::CLIENT_ID_SIZE;

pub type ClientId = [u8; CLIENT_ID_SIZE];

/// A single registered identity.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: ClientId,
    pub username: String,
    pub rsa_public_key: Option<Vec<u8>>,
    pub aes_key: Option<[u8; AES_KEY_SIZE]>,
}

impl ClientSession {
    fn new(client_id: ClientId, username: String) -> Self {
        Self {
            client_id,
            username,
            rsa_public_key: None,
            aes_key: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    usernames: HashMap<String, ClientId>,
    clients: HashMap<ClientId, ClientSession>,
}

/// Shared, mutex-guarded username/client-id/session bookkeeping.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_client_id() -> ClientId {
        let mut id = [0u8; CLIENT_ID_SIZE];
        OsRng.fill_bytes(&mut id);
        id
    }

    /// Register a fresh username, minting a new client ID.
    pub fn register(&self, username: &str) -> Result<ClientId, AuthError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.usernames.contains_key(username) {
            return Err(AuthError::AlreadyTaken);
        }

        let client_id = Self::mint_client_id();
        inner
            .usernames
            .insert(username.to_string(), client_id);
        inner
            .clients
            .insert(client_id, ClientSession::new(client_id, username.to_string()));

        Ok(client_id)
    }

    /// Store an RSA public key for `username` and mint a fresh AES session key.
    pub fn attach_public_key(
        &self,
        username: &str,
        rsa_spki: Vec<u8>,
    ) -> Result<(ClientId, [u8; AES_KEY_SIZE]), AuthError> {
        let mut inner = self.inner.lock().unwrap();
        let client_id = *inner
            .usernames
            .get(username)
            .ok_or(AuthError::UnknownUsername)?;

        let aes_key = crate::crypto::generate_aes_key();
        let session = inner
            .clients
            .get_mut(&client_id)
            .expect("username map and client map must stay consistent");
        session.rsa_public_key = Some(rsa_spki);
        session.aes_key = Some(aes_key);

        Ok((client_id, aes_key))
    }

    /// Mint a new AES session key for `username`, reusing its stored RSA key.
    /// Fails with `NoPublicKey` if the session never ran SendPublicKey.
    pub fn rekey_on_reconnect(
        &self,
        username: &str,
    ) -> Result<(ClientId, [u8; AES_KEY_SIZE]), AuthError> {
        let mut inner = self.inner.lock().unwrap();
        let client_id = *inner
            .usernames
            .get(username)
            .ok_or(AuthError::UnknownUsername)?;

        let session = inner
            .clients
            .get_mut(&client_id)
            .expect("username map and client map must stay consistent");
        if session.rsa_public_key.is_none() {
            return Err(AuthError::NoPublicKey);
        }

        let aes_key = crate::crypto::generate_aes_key();
        session.aes_key = Some(aes_key);

        Ok((client_id, aes_key))
    }

    /// Resolve a client ID to its best-known client ID even when the
    /// username lookup fails, for use composing a ReconnectDenied response.
    pub fn resolve_client_id(&self, username: &str) -> Option<ClientId> {
        let inner = self.inner.lock().unwrap();
        inner.usernames.get(username).copied()
    }

    /// Look up a session by client ID, returning an owned copy of the key
    /// material needed to decrypt a file.
    pub fn lookup(&self, client_id: &ClientId) -> Result<ClientSession, AuthError> {
        let inner = self.inner.lock().unwrap();
        inner
            .clients
            .get(client_id)
            .cloned()
            .ok_or(AuthError::UnknownClientId)
    }
}
