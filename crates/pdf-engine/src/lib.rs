mod bake;
pub mod coords;
mod embed;
pub mod font;
mod objects;
pub mod ocr;
mod pages;
pub mod recover;
pub mod session;
pub mod sidecar;

pub use bake::{BakeOutcome, BakeReport};
pub use font::{FaceId, FontResolver};
pub use session::{DocumentInfo, OpenSource};

use doc_model::{Annotation, EngineSettings};

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error(transparent)]
    Color(#[from] doc_model::ColorError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),
    #[error("malformed document: {0}")]
    Structure(String),
}

/// Document-level operations. Every call takes the whole document as bytes
/// and returns a fresh buffer; nothing is kept open between calls.
pub trait PdfService {
    /// Bakes `annotations` into the document and refreshes the sidecar.
    /// `scale` is the display zoom the edits were made at; annotations are
    /// already unscaled, so it never reaches the coordinates.
    fn save_with_annotations(
        &self,
        pdf: &[u8],
        annotations: &[Annotation],
        scale: f64,
    ) -> Result<Vec<u8>, PdfEngineError>;

    /// Editable annotations stored in the sidecar. Never fails.
    fn extract_annotations(&self, pdf: &[u8]) -> Vec<Annotation>;

    /// Removes the page at the 0-based `index`. Out of range is a no-op.
    fn delete_page(&self, pdf: &[u8], index: i32) -> Result<Vec<u8>, PdfEngineError>;

    /// Inserts a blank page before the 0-based `insert_index`, or appends
    /// when the index is negative or past the end.
    fn add_blank_page(&self, pdf: &[u8], insert_index: i32) -> Result<Vec<u8>, PdfEngineError>;

    /// Like [`PdfService::add_blank_page`] with a page showing `image`.
    fn add_image_page(
        &self,
        pdf: &[u8],
        image: &[u8],
        insert_index: i32,
    ) -> Result<Vec<u8>, PdfEngineError>;
}

/// The lopdf-backed engine. Owns the font resolver and the settings it was
/// built with; both are read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct LopdfEngine {
    fonts: FontResolver,
    settings: EngineSettings,
}

impl LopdfEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let fonts = FontResolver::from_settings(&settings);
        Self { fonts, settings }
    }

    pub fn with_fonts(fonts: FontResolver, settings: EngineSettings) -> Self {
        Self { fonts, settings }
    }

    pub fn fonts(&self) -> &FontResolver {
        &self.fonts
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn bake_with_report(
        &self,
        pdf: &[u8],
        annotations: &[Annotation],
    ) -> Result<BakeOutcome, PdfEngineError> {
        bake::bake(self, pdf, annotations)
    }

    /// Sidecar annotations when present, otherwise the annotations recovered
    /// from native objects.
    pub fn load_annotations(&self, pdf: &[u8]) -> Vec<Annotation> {
        recover::load_annotations(pdf)
    }
}

impl PdfService for LopdfEngine {
    fn save_with_annotations(
        &self,
        pdf: &[u8],
        annotations: &[Annotation],
        scale: f64,
    ) -> Result<Vec<u8>, PdfEngineError> {
        log::debug!("baking {} annotations edited at scale {scale}", annotations.len());
        Ok(self.bake_with_report(pdf, annotations)?.bytes)
    }

    fn extract_annotations(&self, pdf: &[u8]) -> Vec<Annotation> {
        sidecar::extract(pdf)
    }

    fn delete_page(&self, pdf: &[u8], index: i32) -> Result<Vec<u8>, PdfEngineError> {
        pages::delete_page(pdf, index)
    }

    fn add_blank_page(&self, pdf: &[u8], insert_index: i32) -> Result<Vec<u8>, PdfEngineError> {
        pages::add_blank_page(pdf, insert_index, self.settings.default_page_size)
    }

    fn add_image_page(
        &self,
        pdf: &[u8],
        image: &[u8],
        insert_index: i32,
    ) -> Result<Vec<u8>, PdfEngineError> {
        pages::add_image_page(pdf, image, insert_index, &self.settings)
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new(EngineSettings::default())
}
