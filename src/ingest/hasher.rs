use sha2::{Digest, Sha256};

/// Hex SHA-256 of a seed file's bytes; identifies the file in the import ledger.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
