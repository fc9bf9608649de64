//! Error types for the grayscale conversion library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the grayscale conversion library
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A named resource referenced by the content stream is not defined
    #[error("Resource /{name} not found in /{category}")]
    MissingResource { category: String, name: String },

    /// A pattern color where a device color was expected, or vice versa
    #[error("Unexpected color: {0}")]
    UnexpectedColorKind(String),

    /// Color space that cannot be mapped to gray
    #[error("Unsupported color space: {0}")]
    UnsupportedColorSpace(String),

    /// A function (tint transform) that cannot be read or evaluated
    #[error("Function error: {0}")]
    Function(String),

    /// Image re-encoding rejected the requested filter parameters
    #[error("Unsupported encoding parameters: {0}")]
    UnsupportedEncodingParameters(String),

    /// Operator carries operands of the wrong count or type
    #[error("Invalid operands for '{operator}': {reason}")]
    InvalidOperands { operator: String, reason: String },

    /// Form/pattern nesting deeper than the configured limit
    #[error("Nesting deeper than {0} levels (possible cycle between forms)")]
    RecursionLimit(usize),

    /// Page range expression could not be parsed
    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    /// Selected page does not exist in the document
    #[error("Page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: usize },

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid PDF (no pages)
    #[error("PDF has no pages: {}", .0.display())]
    EmptyPdf(PathBuf),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    pub(crate) fn missing(category: &[u8], name: &[u8]) -> Self {
        Error::MissingResource {
            category: String::from_utf8_lossy(category).into_owned(),
            name: String::from_utf8_lossy(name).into_owned(),
        }
    }

    pub(crate) fn operands(operator: &str, reason: impl Into<String>) -> Self {
        Error::InvalidOperands {
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}
