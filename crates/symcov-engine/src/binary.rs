//! The binary under test and its content identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Content hash of an analyzed binary (lowercase hex SHA-256).
///
/// Coverage state is only meaningful for the exact bytes it was collected
/// against, so persisted state carries this identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinaryIdentity(String);

impl BinaryIdentity {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        BinaryIdentity(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for BinaryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loaded binary: where it came from and its raw bytes.
#[derive(Clone, Debug)]
pub struct BinaryImage {
    path: PathBuf,
    bytes: Vec<u8>,
    identity: BinaryIdentity,
}

impl BinaryImage {
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Ok(Self::from_bytes(path, bytes))
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let identity = BinaryIdentity::of_bytes(&bytes);
        Self {
            path: path.into(),
            bytes,
            identity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn identity(&self) -> &BinaryIdentity {
        &self.identity
    }
}
