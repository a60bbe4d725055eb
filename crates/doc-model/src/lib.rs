mod annotation;

pub use annotation::{Annotation, AnnotationId, AnnotationKind, ColorError, Rect, Rgb};

use annotation::sanitize_scale;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub const A4: PageSize = PageSize { width_pt: 595.0, height_pt: 842.0 };
    pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };
}

impl Default for PageSize {
    fn default() -> Self {
        Self::A4
    }
}

/// Knobs for the PDF engine, persisted by the `storage` crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the font programs. `None` means the platform store.
    pub font_dir: Option<PathBuf>,
    /// Size of inserted blank pages and the width limit for image pages.
    pub default_page_size: PageSize,
    /// Resolution used to turn image pixels into points.
    pub image_dpi: f32,
    pub ocr_font_family: String,
    pub annotation_font_family: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            font_dir: None,
            default_page_size: PageSize::default(),
            image_dpi: 96.0,
            ocr_font_family: "Malgun Gothic".to_owned(),
            annotation_font_family: "Malgun Gothic".to_owned(),
        }
    }
}

/// An opened document together with its editable annotation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    pub path: Option<PathBuf>,
    pub file_name: String,
    pub data: Vec<u8>,
    pub total_pages: u32,
    pub current_page: u32,
    /// Display zoom. Never applied to stored annotation coordinates.
    pub scale: f64,
    pub annotations: Vec<Annotation>,
}

impl DocumentState {
    pub const UNTITLED: &'static str = "Untitled";

    pub fn new(
        path: Option<PathBuf>,
        data: Vec<u8>,
        total_pages: u32,
        annotations: Vec<Annotation>,
    ) -> Self {
        let file_name = path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::UNTITLED.to_owned());

        Self { path, file_name, data, total_pages, current_page: 1, scale: 1.0, annotations }
    }

    pub fn annotations_on_page(&self, page: i32) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |annotation| annotation.page == page)
    }

    pub fn editable_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(|annotation| annotation.is_editable())
    }

    pub fn find(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|annotation| &annotation.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAction {
    /// `display_rect` is where the user drew the mark at the current zoom.
    AddAnnotation { annotation: Annotation, display_rect: Rect },
    MoveAnnotation { id: AnnotationId, display_rect: Rect },
    UpdateContent { id: AnnotationId, content: String },
    RemoveAnnotation { id: AnnotationId },
    /// Replaces every OCR word on `page`; `words` are already in page points.
    ReplaceOcrLayer { page: i32, words: Vec<Annotation> },
    SetCurrentPage { page: u32 },
    NextPage,
    PreviousPage,
    SetScale { scale: f64 },
}

pub fn apply_document_action(state: &mut DocumentState, action: DocumentAction) {
    match action {
        DocumentAction::AddAnnotation { mut annotation, display_rect } => {
            annotation.set_rect(display_rect.unscaled(state.scale));
            state.annotations.push(annotation);
        }
        DocumentAction::MoveAnnotation { id, display_rect } => {
            let rect = display_rect.unscaled(state.scale);
            if let Some(annotation) = state.annotations.iter_mut().find(|a| a.id == id) {
                annotation.set_rect(rect);
            }
        }
        DocumentAction::UpdateContent { id, content } => {
            if let Some(annotation) = state.annotations.iter_mut().find(|a| a.id == id) {
                annotation.content = content;
            }
        }
        DocumentAction::RemoveAnnotation { id } => {
            state.annotations.retain(|annotation| annotation.id != id);
        }
        DocumentAction::ReplaceOcrLayer { page, words } => {
            state.annotations.retain(|a| a.is_editable() || a.page != page);
            state.annotations.extend(
                words
                    .into_iter()
                    .filter(|word| !word.is_editable())
                    .map(|word| Annotation { page, ..word }),
            );
        }
        DocumentAction::SetCurrentPage { page } => {
            state.current_page = page.max(1).min(state.total_pages.max(1));
        }
        DocumentAction::NextPage => {
            state.current_page = (state.current_page + 1).min(state.total_pages.max(1));
        }
        DocumentAction::PreviousPage => {
            state.current_page = state.current_page.saturating_sub(1).max(1);
        }
        DocumentAction::SetScale { scale } => {
            state.scale = sanitize_scale(scale).clamp(MIN_SCALE, MAX_SCALE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_pages(total_pages: u32) -> DocumentState {
        DocumentState::new(Some(PathBuf::from("/tmp/report.pdf")), Vec::new(), total_pages, Vec::new())
    }

    #[test]
    fn file_name_comes_from_path_or_defaults() {
        assert_eq!(state_with_pages(1).file_name, "report.pdf");
        assert_eq!(DocumentState::new(None, Vec::new(), 1, Vec::new()).file_name, "Untitled");
    }

    #[test]
    fn added_annotations_are_stored_unscaled() {
        let mut state = state_with_pages(2);
        apply_document_action(&mut state, DocumentAction::SetScale { scale: 2.0 });

        let annotation = Annotation::new(AnnotationKind::Highlight, 1, Rect::default());
        apply_document_action(
            &mut state,
            DocumentAction::AddAnnotation {
                annotation,
                display_rect: Rect::new(100.0, 50.0, 40.0, 20.0),
            },
        );

        assert_eq!(state.annotations[0].rect(), Rect::new(50.0, 25.0, 20.0, 10.0));
    }

    #[test]
    fn moving_an_annotation_strips_scale() {
        let mut state = state_with_pages(1);
        let annotation = Annotation::new(AnnotationKind::Underline, 1, Rect::new(1.0, 1.0, 1.0, 1.0));
        let id = annotation.id.clone();
        state.annotations.push(annotation);
        state.scale = 0.5;

        apply_document_action(
            &mut state,
            DocumentAction::MoveAnnotation { id: id.clone(), display_rect: Rect::new(5.0, 5.0, 10.0, 2.0) },
        );

        assert_eq!(state.find(&id).map(Annotation::rect), Some(Rect::new(10.0, 10.0, 20.0, 4.0)));
    }

    #[test]
    fn update_and_remove_target_by_id() {
        let mut state = state_with_pages(1);
        let note = Annotation::free_text(1, Rect::default(), "old", Rgb::BLACK, 12.0);
        let id = note.id.clone();
        state.annotations.push(note);

        apply_document_action(
            &mut state,
            DocumentAction::UpdateContent { id: id.clone(), content: "new".to_owned() },
        );
        assert_eq!(state.find(&id).map(|a| a.content.as_str()), Some("new"));

        apply_document_action(&mut state, DocumentAction::RemoveAnnotation { id: id.clone() });
        assert!(state.find(&id).is_none());
    }

    #[test]
    fn replacing_ocr_layer_keeps_user_marks() {
        let mut state = state_with_pages(2);
        state.annotations.push(Annotation::new(AnnotationKind::Highlight, 1, Rect::default()));
        state.annotations.push(Annotation::ocr_word(1, Rect::default(), "stale"));
        state.annotations.push(Annotation::ocr_word(2, Rect::default(), "other page"));

        apply_document_action(
            &mut state,
            DocumentAction::ReplaceOcrLayer {
                page: 1,
                words: vec![Annotation::ocr_word(9, Rect::default(), "fresh")],
            },
        );

        let page_one: Vec<_> = state.annotations_on_page(1).map(|a| a.content.as_str()).collect();
        assert_eq!(page_one, vec!["", "fresh"]);
        assert_eq!(state.annotations_on_page(2).count(), 1);
        assert_eq!(state.editable_annotations().count(), 1);
    }

    #[test]
    fn page_navigation_is_clamped_to_document_bounds() {
        let mut state = state_with_pages(3);

        apply_document_action(&mut state, DocumentAction::SetCurrentPage { page: 100 });
        assert_eq!(state.current_page, 3);

        apply_document_action(&mut state, DocumentAction::NextPage);
        assert_eq!(state.current_page, 3);

        apply_document_action(&mut state, DocumentAction::SetCurrentPage { page: 0 });
        assert_eq!(state.current_page, 1);

        apply_document_action(&mut state, DocumentAction::PreviousPage);
        assert_eq!(state.current_page, 1);
    }

    #[test]
    fn scale_is_clamped() {
        let mut state = state_with_pages(1);

        apply_document_action(&mut state, DocumentAction::SetScale { scale: 0.001 });
        assert_eq!(state.scale, MIN_SCALE);

        apply_document_action(&mut state, DocumentAction::SetScale { scale: 99.0 });
        assert_eq!(state.scale, MAX_SCALE);

        apply_document_action(&mut state, DocumentAction::SetScale { scale: -1.0 });
        assert_eq!(state.scale, 1.0);
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"image_dpi":72.0}"#).expect("partial settings should parse");

        assert_eq!(settings.image_dpi, 72.0);
        assert_eq!(settings.default_page_size, PageSize::A4);
        assert_eq!(settings.ocr_font_family, "Malgun Gothic");
    }
}
