//! Error types for PDF structure processing

use std::io;
use thiserror::Error;

/// Main error type for PDF structure operations
#[derive(Error, Debug)]
pub enum PdfError {
    /// The file violates the PDF grammar or a structural invariant.
    /// `context` is a breadcrumb describing what was being resolved,
    /// e.g. "xref entry for object 5 generation 0".
    #[error("corrupted document: {reason} (while {context})")]
    Corrupted { reason: String, context: String },

    /// A required read ran past the end of the byte source
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The textual parser expected a specific token
    #[error("parse error at byte {offset}: expected {expected}")]
    Parse { offset: u64, expected: String },

    /// Filter, encryption algorithm or predictor not implemented
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Encryption setup was well-formed but the password did not verify
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A value coercion found the wrong object variant
    #[error("unexpected object type: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    /// Underlying byte source failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for PDF structure operations
pub type PdfResult<T> = Result<T, PdfError>;

impl PdfError {
    /// Create a new corrupted-document error with a context breadcrumb
    pub fn corrupted(reason: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Corrupted {
            reason: reason.into(),
            context: context.into(),
        }
    }

    /// Create a new parse error at a byte offset
    pub fn parse(offset: u64, expected: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            expected: expected.into(),
        }
    }

    /// Check if error is authentication related
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Check if error is related to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::Parse { .. } | Self::UnexpectedEof | Self::UnexpectedType { .. }
        )
    }
}
