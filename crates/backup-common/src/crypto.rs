//! RSA-OAEP key wrap and AES-256-CBC file decryption.
//!
//! The wire protocol fixes the padding scheme and the IV, so the CBC
//! chaining and PKCS#7 stripping below are implemented directly over the
//! `aes` crate's block primitives rather than pulling in a dedicated
//! CBC-mode crate.

use crate::error::CryptoError;
use aes::Aes256;
use aes::cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray};
use rand::{RngCore, rngs::OsRng};
use rsa::{Oaep, RsaPublicKey, pkcs8::DecodePublicKey};
use sha2::Sha256;

/// Size in bytes of the X.509 SubjectPublicKeyInfo blob the protocol exchanges.
pub const RSA_SPKI_SIZE: usize = 160;

/// Size in bytes of an AES-256 session key.
pub const AES_KEY_SIZE: usize = 32;

const AES_BLOCK_SIZE: usize = 16;
const ZERO_IV: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

/// Parse a 160-byte X.509 SubjectPublicKeyInfo blob into an RSA public key.
pub fn import_rsa_public_key(spki_der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::RsaImport(e.to_string()))
}

/// Generate a fresh random AES-256 session key.
pub fn generate_aes_key() -> [u8; AES_KEY_SIZE] {
    let mut key = [0u8; AES_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Wrap `aes_key` under `public_key` with PKCS#1 OAEP (SHA-256 hash and
/// MGF1-SHA-256 mask, default empty label).
pub fn wrap_aes_key(public_key: &RsaPublicKey, aes_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut rng = OsRng;
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), aes_key)
        .map_err(|e| CryptoError::RsaWrap(e.to_string()))
}

/// Decrypt `ciphertext` as AES-256-CBC under `key` with a fixed all-zero IV,
/// then strip PKCS#7 padding.
pub fn decrypt_file(key: &[u8; AES_KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(AES_BLOCK_SIZE) {
        return Err(CryptoError::InvalidCiphertextLength);
    }

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut prev_block = ZERO_IV;

    for chunk in ciphertext.chunks(AES_BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        let mut cipher_block = ZERO_IV;
        cipher_block.copy_from_slice(&block);
        cipher.decrypt_block(&mut block);
        for (b, p) in block.iter_mut().zip(prev_block.iter()) {
            *b ^= p;
        }
        plaintext.extend_from_slice(&block);
        prev_block.copy_from_slice(&cipher_block);
    }

    strip_pkcs7(&mut plaintext)?;
    Ok(plaintext)
}

fn strip_pkcs7(data: &mut Vec<u8>) -> Result<(), CryptoError> {
    let padding_len = *data.last().ok_or(CryptoError::InvalidPadding)? as usize;
    if padding_len == 0 || padding_len > AES_BLOCK_SIZE || padding_len > data.len() {
        return Err(CryptoError::InvalidPadding);
    }
    let new_len = data.len() - padding_len;
    data.truncate(new_len);
    Ok(())
}
