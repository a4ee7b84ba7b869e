//! Transport error type.

use std::io;

use spear_core::BufferConfigError;
use spear_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no candidate addresses configured")]
    NoCandidates,

    #[error("failed to bind any of {attempts} candidate addresses: {source}")]
    Bind {
        attempts: usize,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid buffer configuration: {0}")]
    Buffer(#[from] BufferConfigError),

    #[error("configuration error: {0}")]
    Config(String),
}
