//! Error types for tagcodex

use std::fmt;
use thiserror::Error;

/// Result type alias for tagcodex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tagcodex
#[derive(Error, Debug)]
pub enum Error {
    /// Structurally invalid, truncated, or missing-mandatory-chunk input
    #[error("Cannot read: {0}")]
    CannotRead(ReadFailure),

    /// The format's writer does not support the requested mutation
    #[error("Cannot write: {0}")]
    CannotWrite(String),

    /// Corrupt frame-level data
    #[error("Invalid frame at offset {offset}: {reason}")]
    InvalidFrame { offset: u64, reason: String },

    /// No codec for this file
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diagnostic context carried by [`Error::CannotRead`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub reason: String,
    pub chunk: Option<String>,
    pub offset: Option<u64>,
    pub declared_size: Option<u64>,
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(chunk) = &self.chunk {
            write!(f, " (chunk '{}'", chunk)?;
            if let Some(offset) = self.offset {
                write!(f, " at offset {}", offset)?;
            }
            if let Some(size) = self.declared_size {
                write!(f, ", declared size {}", size)?;
            }
            write!(f, ")")?;
        } else if let Some(offset) = self.offset {
            write!(f, " (at offset {})", offset)?;
        }
        Ok(())
    }
}

impl Error {
    /// Create a read error with no chunk context
    pub fn cannot_read<S: Into<String>>(reason: S) -> Self {
        Error::CannotRead(ReadFailure {
            reason: reason.into(),
            chunk: None,
            offset: None,
            declared_size: None,
        })
    }

    /// Create a read error pinned to a chunk
    pub fn chunk<S: Into<String>, C: Into<String>>(
        reason: S,
        chunk: C,
        offset: u64,
        declared_size: u64,
    ) -> Self {
        Error::CannotRead(ReadFailure {
            reason: reason.into(),
            chunk: Some(chunk.into()),
            offset: Some(offset),
            declared_size: Some(declared_size),
        })
    }

    /// Create a read error at a byte offset
    pub fn truncated(offset: u64, wanted: usize) -> Self {
        Error::CannotRead(ReadFailure {
            reason: format!("unexpected end of data, needed {} more bytes", wanted),
            chunk: None,
            offset: Some(offset),
            declared_size: None,
        })
    }

    /// Create a write error
    pub fn cannot_write<S: Into<String>>(msg: S) -> Self {
        Error::CannotWrite(msg.into())
    }

    /// Create a frame error
    pub fn invalid_frame<S: Into<String>>(offset: u64, reason: S) -> Self {
        Error::InvalidFrame {
            offset,
            reason: reason.into(),
        }
    }

    /// Attach a byte offset to a read error
    pub fn at_offset(self, offset: u64) -> Self {
        match self {
            Error::CannotRead(mut failure) => {
                failure.offset = Some(offset);
                Error::CannotRead(failure)
            }
            other => other,
        }
    }

    /// True for errors that abort a read of the whole container
    pub fn is_cannot_read(&self) -> bool {
        matches!(self, Error::CannotRead(_))
    }
}
