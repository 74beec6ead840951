//! Random credential material.
//!
//! The entropy source sits behind [`EntropySource`] so tests can swap in a
//! seeded generator; production always reads the operating system CSPRNG.

use rand::{RngCore, rngs::OsRng};
use std::sync::Arc;
use thiserror::Error;

/// Failure of the random source. Not retryable.
#[derive(Debug, Error)]
#[error("entropy source failed: {0}")]
pub struct EntropyError(pub String);

pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// Operating-system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| EntropyError(err.to_string()))
    }
}

/// Produces hex-encoded secrets of a fixed byte length.
#[derive(Clone)]
pub struct CredentialGenerator {
    source: Arc<dyn EntropySource>,
    bytes: usize,
}

impl CredentialGenerator {
    pub fn new(source: Arc<dyn EntropySource>, bytes: usize) -> Self {
        Self { source, bytes }
    }

    pub fn os(bytes: usize) -> Self {
        Self::new(Arc::new(OsEntropy), bytes)
    }

    /// Length in characters of every secret this generator produces.
    pub fn encoded_len(&self) -> usize {
        self.bytes * 2
    }

    pub fn generate(&self) -> Result<String, EntropyError> {
        let mut buf = vec![0u8; self.bytes];
        self.source.fill(&mut buf)?;
        Ok(hex::encode(buf))
    }
}
