//! PDF content conversion module

pub mod content;
pub mod resources;
pub mod state;
pub mod function;
pub mod shading;
pub mod pattern;
pub mod image;
pub mod convert;
pub mod grayscale;

// Re-export commonly used items
pub use convert::{ConvertOptions, Converter};
pub use grayscale::{convert_document, convert_page, grayscale, GrayscaleOptions};
pub use resources::{Category, Resources};
pub use state::{GraphicsState, StateTracker};
