//! Drives a real server instance over raw TCP sockets, the way an actual
//! client would, covering the end-to-end scenarios from the protocol design.

use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use backup_common::crc::cksum;
use backup_common::crypto::RSA_SPKI_SIZE;
use backup_common::protocol::{
    CLIENT_ID_SIZE, FILENAME_SIZE, PROTOCOL_VERSION, RESPONSE_HEADER_SIZE, USERNAME_SIZE,
    pad_string,
};
use rsa::pkcs8::EncodePublicKey;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ZERO_CLIENT_ID: [u8; CLIENT_ID_SIZE] = [0u8; CLIENT_ID_SIZE];

async fn send_frame(stream: &mut TcpStream, client_id: [u8; CLIENT_ID_SIZE], code: u16, payload: &[u8]) {
    let mut frame = Vec::with_capacity(23 + payload.len());
    frame.extend_from_slice(&client_id);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&code.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.unwrap();
    stream.flush().await.unwrap();
}

struct Response {
    version: u8,
    code: u16,
    payload: Vec<u8>,
}

async fn read_response(stream: &mut TcpStream) -> Response {
    let mut header = [0u8; RESPONSE_HEADER_SIZE];
    stream.read_exact(&mut header).await.unwrap();
    let version = header[0];
    let code = u16::from_le_bytes([header[1], header[2]]);
    let len = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    Response {
        version,
        code,
        payload,
    }
}

fn encrypt_cbc_zero_iv(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let padding_len = 16 - (plaintext.len() % 16);
    let mut padded = plaintext.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    let mut out = Vec::with_capacity(padded.len());
    let mut prev_block = [0u8; 16];
    for chunk in padded.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);
        for (b, p) in block.iter_mut().zip(prev_block.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        prev_block.copy_from_slice(block.as_slice());
    }
    out
}

fn keypair() -> (RsaPrivateKey, Vec<u8>) {
    // A public exponent of 3 (instead of the crate default 65537) is the
    // difference between a 160-byte and a 162-byte SPKI export at 1024 bits;
    // the wire protocol mandates 160. OAEP's padding keeps this exponent safe.
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new_with_exp(&mut rng, 1024, &BigUint::from(3u32)).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let spki = public_key.to_public_key_der().unwrap().as_bytes().to_vec();
    assert_eq!(spki.len(), RSA_SPKI_SIZE);
    (private_key, spki)
}

fn unwrap_aes_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> [u8; 32] {
    let unwrapped = private_key.decrypt(Oaep::new::<Sha256>(), wrapped).unwrap();
    unwrapped.try_into().unwrap()
}

fn send_file_payload(filename: &str, ciphertext: &[u8], original_len: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    payload.extend_from_slice(&original_len.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes());
    payload.extend_from_slice(&pad_string(filename, FILENAME_SIZE));
    payload.extend_from_slice(ciphertext);
    payload
}

#[tokio::test]
async fn register_key_exchange_upload_and_reconnect() {
    let addr = backup_server::spawn_test_server().await;

    // S1 - Register happy path.
    let mut conn = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut conn, ZERO_CLIENT_ID, 1025, &pad_string("alice", USERNAME_SIZE)).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.version, PROTOCOL_VERSION);
    assert_eq!(resp.code, 1600);
    assert_eq!(resp.payload.len(), CLIENT_ID_SIZE);
    let alice_id: [u8; CLIENT_ID_SIZE] = resp.payload.try_into().unwrap();

    // S2 - Register duplicate, on a second connection.
    let mut dup_conn = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut dup_conn, ZERO_CLIENT_ID, 1025, &pad_string("alice", USERNAME_SIZE)).await;
    let resp = read_response(&mut dup_conn).await;
    assert_eq!(resp.code, 1601);
    assert_eq!(resp.payload.len(), 0);

    // S3 - Key exchange.
    let (private_key, spki) = keypair();
    let mut payload = pad_string("alice", USERNAME_SIZE);
    payload.extend_from_slice(&spki);
    send_frame(&mut conn, alice_id, 1026, &payload).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1602);
    assert_eq!(&resp.payload[..CLIENT_ID_SIZE], &alice_id);
    let aes_1 = unwrap_aes_key(&private_key, &resp.payload[CLIENT_ID_SIZE..]);

    // S4 - File upload.
    let plaintext = b"hello world\n";
    let ciphertext = encrypt_cbc_zero_iv(&aes_1, plaintext);
    assert_eq!(ciphertext.len(), 16);
    let payload = send_file_payload("hello.txt", &ciphertext, plaintext.len() as u32);
    send_frame(&mut conn, alice_id, 1028, &payload).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1603);
    assert_eq!(&resp.payload[..CLIENT_ID_SIZE], &alice_id);
    let ciphertext_size = u32::from_le_bytes(resp.payload[16..20].try_into().unwrap());
    assert_eq!(ciphertext_size, 16);
    let crc = u32::from_le_bytes(resp.payload[20 + FILENAME_SIZE..].try_into().unwrap());
    assert_eq!(crc, cksum(plaintext));

    // S5 - CRC valid.
    send_frame(&mut conn, alice_id, 1029, &pad_string("hello.txt", FILENAME_SIZE)).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1604);
    assert_eq!(&resp.payload[..], &alice_id);

    // S6 - Reconnect flow, on a fresh connection.
    let mut reconnect_conn = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut reconnect_conn, ZERO_CLIENT_ID, 1027, &pad_string("alice", USERNAME_SIZE)).await;
    let resp = read_response(&mut reconnect_conn).await;
    assert_eq!(resp.code, 1605);
    assert_eq!(&resp.payload[..CLIENT_ID_SIZE], &alice_id);
    let aes_2 = unwrap_aes_key(&private_key, &resp.payload[CLIENT_ID_SIZE..]);
    assert_ne!(aes_1, aes_2);

    // A file encrypted under the new key succeeds.
    let ciphertext_2 = encrypt_cbc_zero_iv(&aes_2, plaintext);
    let payload = send_file_payload("hello2.txt", &ciphertext_2, plaintext.len() as u32);
    send_frame(&mut reconnect_conn, alice_id, 1028, &payload).await;
    let resp = read_response(&mut reconnect_conn).await;
    assert_eq!(resp.code, 1603);

    // A file encrypted under the stale key fails (decrypt/padding error).
    let stale_ciphertext = encrypt_cbc_zero_iv(&aes_1, plaintext);
    let payload = send_file_payload("hello3.txt", &stale_ciphertext, plaintext.len() as u32);
    send_frame(&mut reconnect_conn, alice_id, 1028, &payload).await;
    let resp = read_response(&mut reconnect_conn).await;
    assert_eq!(resp.code, 1607);
}

#[tokio::test]
async fn version_mismatch_is_rejected_without_closing_the_connection() {
    let addr = backup_server::spawn_test_server().await;
    let mut conn = TcpStream::connect(addr).await.unwrap();

    // A version-mismatched frame is rejected before its payload is read (the
    // dispatcher never gets far enough to know payload_len applies to a
    // request it won't service), so this probe carries no payload of its own.
    let mut frame = Vec::new();
    frame.extend_from_slice(&ZERO_CLIENT_ID);
    frame.push(PROTOCOL_VERSION + 1);
    frame.extend_from_slice(&1025u16.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    conn.write_all(&frame).await.unwrap();
    conn.flush().await.unwrap();

    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1607);

    // The connection stays open: a well-formed request now succeeds.
    send_frame(&mut conn, ZERO_CLIENT_ID, 1025, &pad_string("bob", USERNAME_SIZE)).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1600);
}

#[tokio::test]
async fn unknown_opcode_gets_server_error() {
    let addr = backup_server::spawn_test_server().await;
    let mut conn = TcpStream::connect(addr).await.unwrap();

    send_frame(&mut conn, ZERO_CLIENT_ID, 9999, &[]).await;
    let resp = read_response(&mut conn).await;
    assert_eq!(resp.code, 1607);
}
