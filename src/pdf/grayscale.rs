//! Page-level grayscale conversion
//!
//! Drives the [`Converter`] over the selected pages of a document and
//! persists the result: each converted page gets one new content stream and
//! its own inline Resources dictionary, so objects shared with unselected
//! pages are never modified.

use std::path::{Path, PathBuf};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use crate::error::{Error, Result};
use crate::pages::PageSelection;
use crate::pdf::content;
use crate::pdf::convert::{ConvertOptions, Converter};
use crate::pdf::resources::Resources;

/// Options for converting a PDF file to grayscale
#[derive(Debug, Clone)]
pub struct GrayscaleOptions {
    /// Input PDF file path
    pub input_path: PathBuf,
    /// Output PDF file path; may equal `input_path`
    pub output_path: PathBuf,
    /// Password for encrypted input
    pub password: Option<String>,
    /// Pages to convert (all pages when `None` or empty)
    pub pages: Option<PageSelection>,
    /// Engine settings
    pub convert: ConvertOptions,
}

impl Default for GrayscaleOptions {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            password: None,
            pages: None,
            convert: ConvertOptions::default(),
        }
    }
}

/// Convert a PDF file to grayscale
///
/// The output is written to a temporary file next to `output_path` and moved
/// into place only once it is complete, so converting in place never leaves
/// a half-written file behind.
///
/// Returns the number of pages converted.
///
/// # Example
///
/// ```no_run
/// use pdf_grayscale::pdf::{grayscale, GrayscaleOptions};
/// use std::path::PathBuf;
///
/// let options = GrayscaleOptions {
///     input_path: PathBuf::from("color.pdf"),
///     output_path: PathBuf::from("gray.pdf"),
///     ..Default::default()
/// };
///
/// grayscale(&options).expect("Failed to convert");
/// ```
pub fn grayscale(options: &GrayscaleOptions) -> Result<usize> {
    if !options.input_path.exists() {
        return Err(Error::FileNotFound(options.input_path.clone()));
    }

    let mut doc = Document::load(&options.input_path)?;
    if doc.is_encrypted() {
        doc.decrypt(options.password.as_deref().unwrap_or(""))?;
    }
    if doc.get_pages().is_empty() {
        return Err(Error::EmptyPdf(options.input_path.clone()));
    }

    // Work on plain stream bytes throughout
    doc.decompress();

    let converted = convert_document(&mut doc, options.pages.as_ref(), &options.convert)?;

    doc.prune_objects();
    doc.compress();
    save_atomically(&mut doc, &options.output_path)?;

    log::info!(
        "Wrote {} ({} page(s) converted)",
        options.output_path.display(),
        converted
    );
    Ok(converted)
}

/// Convert the selected pages of a loaded document
///
/// Pages outside the selection are passed through untouched. Returns the
/// number of pages converted.
pub fn convert_document(
    doc: &mut Document,
    selection: Option<&PageSelection>,
    options: &ConvertOptions,
) -> Result<usize> {
    let pages = doc.get_pages();

    if let Some(last) = selection.and_then(|s| s.last()) {
        if last as usize > pages.len() {
            return Err(Error::PageOutOfRange {
                page: last,
                page_count: pages.len(),
            });
        }
    }

    let mut converted = 0;
    for (number, page_id) in pages {
        if !selection.map_or(true, |s| s.contains(number)) {
            log::debug!("Skipping page {}", number);
            continue;
        }
        log::info!("Converting page {}", number);
        convert_page(doc, page_id, options)?;
        converted += 1;
    }

    Ok(converted)
}

/// Convert one page's content stream and resources
pub fn convert_page(doc: &mut Document, page_id: ObjectId, options: &ConvertOptions) -> Result<()> {
    let bytes = doc.get_page_content(page_id)?;
    let operations = content::decode(&bytes)?;
    let mut resources = Resources::for_page(doc, page_id)?;

    let converted = Converter::new(doc, options.clone()).convert(&operations, &mut resources)?;

    let content_id = doc.add_object(Stream::new(Dictionary::new(), content::encode(&converted)?));
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Contents", Object::Reference(content_id));
    page.set("Resources", Object::Dictionary(resources.into_dictionary()));

    Ok(())
}

fn save_atomically(doc: &mut Document, output_path: &Path) -> Result<()> {
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.pdf".to_string());
    let temp_path = output_path.with_file_name(format!(".{}.tmp", file_name));

    if let Err(e) = doc.save(&temp_path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    std::fs::rename(&temp_path, output_path)?;
    Ok(())
}
