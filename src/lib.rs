//! PDF Grayscale Library
//!
//! Converts the pages of a PDF document from color to grayscale while keeping
//! their vector art, fills, images and patterns intact. This library provides
//! functionality to:
//! - Rewrite color operators in page and form content streams
//! - Convert colored tiling patterns and shading patterns
//! - Replace shading color spaces with DeviceN spaces that map to gray
//! - Convert image XObjects and inline images to 8-bit gray
//! - Restrict the conversion to a selection of pages
//!
//! # CMYK colors
//!
//! CMYK colors in content streams and shadings are mapped with
//! [`color::cmyk_to_gray`], which sums the ink coverage
//! (`0.30c + 0.59m + 0.11y + k`, clamped to 1). Full black ink therefore
//! becomes white: `0 0 0 1 K` is rewritten as `1 G`. CMYK images are
//! converted through RGB instead, so black image samples stay black.
//!
//! # Example
//!
//! ```no_run
//! use pdf_grayscale::pdf::{grayscale, GrayscaleOptions};
//! use pdf_grayscale::pages::PageSelection;
//! use std::path::PathBuf;
//!
//! let options = GrayscaleOptions {
//!     input_path: PathBuf::from("report.pdf"),
//!     output_path: PathBuf::from("report-gray.pdf"),
//!     pages: Some(PageSelection::parse("1-3,5").unwrap()),
//!     ..Default::default()
//! };
//!
//! grayscale(&options).expect("Failed to convert PDF");
//! ```

pub mod error;
pub mod color;
pub mod pages;
pub mod pdf;

// Re-export commonly used items
pub use error::{Error, Result};
