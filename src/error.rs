//! Error types for container operations.

use thiserror::Error;

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in container operations.
///
/// Expected-absence outcomes (a missing child, a failed deallocation) are
/// reported through `Option`/`bool` returns, not through this enum.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file does not start with the container magic tag.
    #[error("invalid container format: expected magic 'SECD'")]
    InvalidMagic,

    /// The cipher recorded in the header does not match the supplied cipher.
    #[error("cipher mismatch: container was created with '{found}', got '{expected}'")]
    CipherMismatch { expected: String, found: String },

    /// The tree blob carries an unknown codec version.
    #[error("unsupported tree codec version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u16, found: u16 },

    /// The tree blob could not be decoded.
    #[error("corrupt tree blob: {0}")]
    TreeCorrupt(String),

    /// The user key is unusable (empty).
    #[error("invalid key: key must not be empty")]
    InvalidKey,

    /// A directory or file name is unusable (empty or contains the separator).
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A name would grow a secure path past what the tree codec can frame.
    #[error("secure path of {0} bytes exceeds the codec frame")]
    PathTooLong(usize),

    /// A sector list handed to a write does not match the data length.
    #[error("sector count mismatch: {needed} sectors needed, {provided} provided")]
    SectorMismatch { needed: u64, provided: usize },
}
