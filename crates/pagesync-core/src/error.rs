//! Error types for pagesync core.

use thiserror::Error;

/// Errors from encoding, decoding and validating core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("discovery payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Configuration errors.
///
/// These are build or deployment defects, not runtime conditions. A session
/// is never started with a configuration that produced one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid service descriptor {value:?}: {reason}")]
    InvalidDescriptor { value: String, reason: &'static str },

    #[error("derived service descriptor {derived:?} does not match declared service {declared:?}")]
    DescriptorMismatch { derived: String, declared: String },

    #[error("no application identifier or declared service name configured")]
    MissingIdentity,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
