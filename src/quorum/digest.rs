use std::fmt;

/// Length in bytes of a content digest.
pub const DIGEST_LEN: usize = 32;

/// Fixed-size digest of one child's read buffer.
pub type Digest = [u8; DIGEST_LEN];

/// Raised when the hash engine cannot produce a digest. Not votable: the
/// operation that needed the digest fails outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashError(pub String);

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HashError {}

/// The hash primitive used to compare disagreeing read buffers.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> Result<Digest, HashError>;
}

/// Default hasher backed by BLAKE3.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn digest(&self, bytes: &[u8]) -> Result<Digest, HashError> {
        Ok(*blake3::hash(bytes).as_bytes())
    }
}
