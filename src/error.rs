//! Error taxonomy for the marker engine
//!
//! Every variant is recovered locally: it either becomes a structured
//! failure result on the command channel or is logged and absorbed.

use thiserror::Error;

use crate::dom::DomError;

#[derive(Debug, Error)]
pub enum MarkerError {
    /// No element carries the requested label
    #[error("Element not found: {0}")]
    NotFound(String),

    /// No matching option after native lookup or composite-control expansion
    #[error("Option not found: {0}")]
    OptionUnavailable(String),

    /// Digest primitive missing, the overlay is skipped
    #[error("Encoding unavailable: {0}")]
    EncodingUnavailable(String),

    /// Socket primitive missing or connect failure, disables the remote surface only
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = MarkerError> = std::result::Result<T, E>;
