//! Error types for indexio.
//!
//! Every failure surfaced by the crate is an [`IndexIoError`]. The variants map
//! onto four broad kinds (see [`ErrorKind`]):
//!
//! - **I/O**: the medium could not deliver or accept the requested bytes
//!   (short file, closed handle, disk error).
//! - **Format**: an unknown tag, an implausible length or an inconsistent
//!   field sequence.
//! - **Policy**: a load-flag combination that is not supported, a flag-gated
//!   feature on a variant that does not implement it, or a mutation of a
//!   read-only or partially loaded object.
//! - **Lifetime**: mapped bytes accessed after their mapping was released.
//!
//! Errors always carry the entity path (for instance `IwPQ/ilar.sizes`) or the
//! offending tag so a failed load can be diagnosed without a debugger.
//!
//! # Examples
//!
//! ```
//! use indexio::error::{ErrorKind, IndexIoError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(IndexIoError::policy("mmap requires a mapping scope"))
//! }
//!
//! let err = example_operation().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Policy);
//! ```

use std::io;

use thiserror::Error;

use crate::registry::Tag;

/// The main error type for indexio operations.
#[derive(Error, Debug)]
pub enum IndexIoError {
    /// The underlying medium failed or ended early.
    #[error("I/O error at {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The stream is structurally invalid.
    #[error("Format error at {context}: {message}")]
    Format { context: String, message: String },

    /// A tag that is not registered for the family being decoded.
    #[error("Unsupported format: unknown {family} tag {tag} at {context}")]
    UnknownTag {
        family: &'static str,
        tag: Tag,
        context: String,
    },

    /// Unsupported flag combination or operation on a restricted object.
    #[error("Policy error: {0}")]
    Policy(String),

    /// Mapped memory accessed outside the lifetime of its mapping.
    #[error("Mapping lifetime error: {0}")]
    Lifetime(String),

    /// JSON serialization errors (CLI reports).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`IndexIoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Policy,
    Lifetime,
    Other,
}

/// Result type alias for operations that may fail with IndexIoError.
pub type Result<T> = std::result::Result<T, IndexIoError>;

impl IndexIoError {
    /// Create a new I/O error tagged with the entity path it happened at.
    pub fn io<S: Into<String>>(context: S, source: io::Error) -> Self {
        IndexIoError::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a new format error.
    pub fn format<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        IndexIoError::Format {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a new unknown-tag error.
    pub fn unknown_tag<S: Into<String>>(family: &'static str, tag: Tag, context: S) -> Self {
        IndexIoError::UnknownTag {
            family,
            tag,
            context: context.into(),
        }
    }

    /// Create a new policy error.
    pub fn policy<S: Into<String>>(msg: S) -> Self {
        IndexIoError::Policy(msg.into())
    }

    /// Create a new mapping lifetime error.
    pub fn lifetime<S: Into<String>>(msg: S) -> Self {
        IndexIoError::Lifetime(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexIoError::Io { .. } => ErrorKind::Io,
            IndexIoError::Format { .. } | IndexIoError::UnknownTag { .. } => ErrorKind::Format,
            IndexIoError::Policy(_) => ErrorKind::Policy,
            IndexIoError::Lifetime(_) => ErrorKind::Lifetime,
            IndexIoError::Json(_) => ErrorKind::Other,
        }
    }

    /// True for short reads, which is how a truncated stream shows up.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            IndexIoError::Io { source, .. } if source.kind() == io::ErrorKind::UnexpectedEof
        )
    }
}

impl From<io::Error> for IndexIoError {
    fn from(err: io::Error) -> Self {
        IndexIoError::io("<medium>", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = IndexIoError::format("IxFl.code_size", "expected 16, got 12");
        assert_eq!(
            error.to_string(),
            "Format error at IxFl.code_size: expected 16, got 12"
        );
        assert_eq!(error.kind(), ErrorKind::Format);

        let error = IndexIoError::policy("SKIP_STORAGE excludes MMAP_IFC");
        assert_eq!(error.to_string(), "Policy error: SKIP_STORAGE excludes MMAP_IFC");

        let error = IndexIoError::lifetime("mapping released");
        assert_eq!(error.kind(), ErrorKind::Lifetime);
    }

    #[test]
    fn test_unknown_tag_names_the_tag() {
        let error = IndexIoError::unknown_tag("index", Tag::from_fourcc(*b"Zzzz"), "<root>");
        let message = error.to_string();
        assert!(message.contains("Zzzz"));
        assert!(message.contains("index"));
        assert_eq!(error.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let error = IndexIoError::from(io_error);

        match error {
            IndexIoError::Io { ref context, .. } => assert_eq!(context, "<medium>"),
            _ => panic!("Expected IO error variant"),
        }
        assert!(error.is_truncation());
    }
}
