//! # Content Fingerprinter
//!
//! SHA-256 digests of upload candidates, used to recognise the same bytes
//! resubmitted under a different name. Hashing never fails the caller: an
//! unreadable source yields [`Digest::Unknown`] and the upload falls back to
//! identity by metadata.

use sha2::{Digest as _, Sha256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Digest {
    /// Lowercase hex SHA-256
    Sha256(String),
    Unknown,
}

impl Digest {
    pub fn is_known(&self) -> bool {
        matches!(self, Digest::Sha256(_))
    }

    pub fn as_hex(&self) -> Option<&str> {
        match self {
            Digest::Sha256(hex) => Some(hex),
            Digest::Unknown => None,
        }
    }

    /// First `len` hex characters, or `None` for an unknown digest
    pub fn prefix(&self, len: usize) -> Option<String> {
        self.as_hex()
            .map(|hex| hex.chars().take(len).collect::<String>())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Digest::Sha256(hex) => write!(f, "sha256:{}", hex),
            Digest::Unknown => f.write_str("unknown"),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Digest of an in-memory buffer
pub fn digest(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest::Sha256(to_hex(&hasher.finalize()))
}

/// Digest of a streamed source, read in chunks
pub async fn digest_reader<R>(mut reader: R) -> Digest
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                warn!(error = %e, "Content could not be read for fingerprinting");
                return Digest::Unknown;
            }
        }
    }

    Digest::Sha256(to_hex(&hasher.finalize()))
}
