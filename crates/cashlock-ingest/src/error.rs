//! Normalizer errors.
//!
//! Only file-level problems are errors. A malformed individual record is
//! skipped and reported as [`crate::SkippedRecord`] evidence instead.

use cashlock_core::{CanonicalizationError, StatementFormat};
use thiserror::Error;

/// Failure that rejects a whole statement import.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The payload is empty.
    #[error("statement payload is empty")]
    Empty,

    /// The payload is not valid UTF-8.
    #[error("statement payload is not valid UTF-8 at byte {valid_up_to}")]
    Encoding {
        /// Length of the valid prefix.
        valid_up_to: usize,
    },

    /// The file header is missing or malformed.
    #[error("{format} header invalid: {detail}")]
    MalformedHeader {
        /// Declared format.
        format: StatementFormat,
        /// What is wrong.
        detail: String,
    },

    /// The file trailer is missing or malformed.
    #[error("{format} trailer invalid: {detail}")]
    MalformedTrailer {
        /// Declared format.
        format: StatementFormat,
        /// What is wrong.
        detail: String,
    },

    /// Structural problem outside header and trailer (unbalanced groups,
    /// missing mandatory blocks).
    #[error("{format} structure invalid at {location}: {detail}")]
    Structure {
        /// Declared format.
        format: StatementFormat,
        /// Line number or element path.
        location: String,
        /// What is wrong.
        detail: String,
    },

    /// The XML is not well-formed.
    #[error("camt053 XML error at byte {position}: {detail}")]
    Xml {
        /// Reader position of the error.
        position: usize,
        /// Parser message.
        detail: String,
    },

    /// The declared format name is not supported.
    #[error("unsupported statement format: {0}")]
    UnsupportedFormat(String),

    /// Canonical identity hashing failed.
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

impl IngestError {
    pub(crate) fn header(format: StatementFormat, detail: impl Into<String>) -> Self {
        Self::MalformedHeader {
            format,
            detail: detail.into(),
        }
    }

    pub(crate) fn trailer(format: StatementFormat, detail: impl Into<String>) -> Self {
        Self::MalformedTrailer {
            format,
            detail: detail.into(),
        }
    }

    pub(crate) fn structure(
        format: StatementFormat,
        location: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Structure {
            format,
            location: location.into(),
            detail: detail.into(),
        }
    }
}
