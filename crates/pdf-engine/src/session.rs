use crate::{objects, recover, sidecar, PdfEngineError, PdfService};
use doc_model::{DocumentState, PageSize};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub page_sizes: Vec<PageSize>,
    /// Whether `/Keywords` carries a sidecar, parsable or not.
    pub has_sidecar: bool,
}

pub fn inspect(pdf: &[u8]) -> Result<DocumentInfo, PdfEngineError> {
    let doc = objects::load(pdf)?;
    let page_sizes: Vec<PageSize> =
        doc.get_pages().values().map(|page_id| objects::page_size(&doc, *page_id)).collect();

    if page_sizes.is_empty() {
        return Err(PdfEngineError::Structure("document has no pages".to_owned()));
    }

    Ok(DocumentInfo {
        page_count: page_sizes.len() as u32,
        page_sizes,
        has_sidecar: sidecar::has_sidecar(&doc),
    })
}

/// Reads a document and its editable annotations into a fresh session.
pub fn open(source: OpenSource) -> Result<DocumentState, PdfEngineError> {
    let (path, bytes) = match source {
        OpenSource::Path(path) => {
            let bytes = fs::read(&path)?;
            (Some(path), bytes)
        }
        OpenSource::Bytes(bytes) => (None, bytes),
    };

    let info = inspect(&bytes)?;
    let annotations = recover::load_annotations(&bytes);
    info!("opened document with {} pages and {} annotations", info.page_count, annotations.len());

    Ok(DocumentState::new(path, bytes, info.page_count, annotations))
}

/// Bakes the session's annotations and makes the result the session's
/// current bytes.
pub fn commit(service: &impl PdfService, state: &mut DocumentState) -> Result<Vec<u8>, PdfEngineError> {
    let bytes = service.save_with_annotations(&state.data, &state.annotations, state.scale)?;
    state.data = bytes.clone();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::numbered_pdf_bytes;
    use crate::default_engine;
    use doc_model::{apply_document_action, Annotation, AnnotationKind, DocumentAction, Rect};
    use lopdf::{dictionary, Document, Object};

    #[test]
    fn inspect_reports_pages_and_sizes() {
        let info = inspect(&numbered_pdf_bytes(3)).expect("inspect should succeed");

        assert_eq!(info.page_count, 3);
        assert_eq!(info.page_sizes, vec![PageSize::LETTER; 3]);
        assert!(!info.has_sidecar);
    }

    #[test]
    fn documents_without_pages_are_rejected() {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let bytes = objects::save(&mut doc).expect("save");

        assert!(matches!(inspect(&bytes), Err(PdfEngineError::Structure(_))));
    }

    #[test]
    fn open_from_path_names_the_session() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("scan.pdf");
        fs::write(&path, numbered_pdf_bytes(2)).expect("write should succeed");

        let state = open(OpenSource::from(path.as_path())).expect("open should succeed");

        assert_eq!(state.file_name, "scan.pdf");
        assert_eq!(state.total_pages, 2);
        assert_eq!(state.current_page, 1);
        assert!(state.annotations.is_empty());
    }

    #[test]
    fn open_rejects_unreadable_input() {
        assert!(open(OpenSource::Bytes(b"not a pdf".to_vec())).is_err());

        let missing = open(OpenSource::Path(PathBuf::from("/nonexistent/missing.pdf")));
        assert!(matches!(missing, Err(PdfEngineError::Io(_))));
    }

    #[test]
    fn commit_then_reopen_restores_the_annotations() {
        let engine = default_engine();
        let mut state = open(OpenSource::Bytes(numbered_pdf_bytes(2))).expect("open should succeed");
        apply_document_action(&mut state, DocumentAction::SetScale { scale: 2.0 });
        apply_document_action(
            &mut state,
            DocumentAction::AddAnnotation {
                annotation: Annotation::new(AnnotationKind::Underline, 2, Rect::default()),
                display_rect: Rect::new(100.0, 200.0, 80.0, 20.0),
            },
        );

        let bytes = commit(&engine, &mut state).expect("commit should succeed");
        assert_eq!(state.data, bytes);

        let reopened = open(OpenSource::Bytes(bytes)).expect("reopen should succeed");
        assert_eq!(reopened.annotations, state.annotations);
        assert_eq!(reopened.annotations[0].rect(), Rect::new(50.0, 100.0, 40.0, 10.0));
        assert!(inspect(&reopened.data).expect("inspect").has_sidecar);
    }
}
