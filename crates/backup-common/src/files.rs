//! Persist decrypted files under `{files_dir}/{client_id_hex}_{filename}`.

use std::path::{Path, PathBuf};

use crate::error::IoError;
use crate::session::ClientId;

/// Reject filenames that could escape `files_dir` via a path separator.
pub fn validate_filename(filename: &str) -> Result<(), IoError> {
    if filename.contains('/') || filename.contains('\\') {
        return Err(IoError::UnsafeFilename(filename.to_string()));
    }
    Ok(())
}

/// Where a client's file would be written, without touching the filesystem.
pub fn file_path(files_dir: &Path, client_id: &ClientId, filename: &str) -> PathBuf {
    files_dir.join(format!("{}_{}", hex::encode(client_id), filename))
}

/// Write `plaintext` to `{files_dir}/{client_id_hex}_{filename}`, creating
/// `files_dir` on demand and overwriting any existing file at that path.
pub fn store(
    files_dir: &Path,
    client_id: &ClientId,
    filename: &str,
    plaintext: &[u8],
) -> Result<PathBuf, IoError> {
    validate_filename(filename)?;
    std::fs::create_dir_all(files_dir)?;
    let path = file_path(files_dir, client_id, filename);
    std::fs::write(&path, plaintext)?;
    Ok(path)
}
