//! Crate-wide error types.
//!
//! Each subsystem gets its own error enum, following the same
//! per-module `thiserror` convention as `crypto` and `archive`; they
//! are composed into [`Error`] via `#[from]` so callers working through
//! the top-level API only need to match on one type.

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;

/// Errors from the two-tier storage pool and manager (C2/C3).
///
/// `Exhausted` and `Corrupted` are the two non-fatal kinds; both are
/// locally recoverable by the caller (retry after a purge, or skip the
/// candidate).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: i64, available: i64 },
    #[error("storage corrupted: {0}")]
    Corrupted(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors from archive (de)serialization — superblock, block headers,
/// file index.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid superblock magic")]
    InvalidMagic,
    #[error("superblock checksum mismatch")]
    ChecksumMismatch,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("file not found in archive: {0}")]
    FileNotFound(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Top-level crate error, used by the CLI and any caller that does not
/// want to distinguish subsystems.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
