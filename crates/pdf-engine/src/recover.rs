//! Rebuilds the editable model from native annotation objects.
//!
//! Used when a document has lost its sidecar, e.g. after another tool
//! rewrote the metadata. Only the kinds the engine writes are recognized.

use crate::objects;
use crate::{coords, sidecar};
use doc_model::{Annotation, AnnotationId, AnnotationKind, Rect, Rgb};
use log::debug;
use lopdf::{Dictionary, Document, Object};

/// Sidecar annotations when the document has a readable sidecar, otherwise
/// whatever [`recover_annotations`] finds. Never fails.
pub fn load_annotations(pdf: &[u8]) -> Vec<Annotation> {
    let doc = match objects::load(pdf) {
        Ok(doc) => doc,
        Err(err) => {
            debug!("no annotations loaded from unreadable document: {err}");
            return Vec::new();
        }
    };

    if let Some(Ok(annotations)) = sidecar::read_keywords(&doc).map(|keywords| sidecar::decode(&keywords)) {
        return annotations;
    }
    recover_from(&doc)
}

pub fn recover_annotations(pdf: &[u8]) -> Vec<Annotation> {
    match objects::load(pdf) {
        Ok(doc) => recover_from(&doc),
        Err(err) => {
            debug!("nothing recovered from unreadable document: {err}");
            Vec::new()
        }
    }
}

fn recover_from(doc: &Document) -> Vec<Annotation> {
    let mut recovered = Vec::new();
    for (number, page_id) in doc.get_pages() {
        let page_height = f64::from(objects::page_size(doc, page_id).height_pt);
        for entry in objects::page_annotations(doc, page_id) {
            let Some(annot) = objects::resolve(doc, &entry).and_then(|object| object.as_dict().ok()) else {
                continue;
            };
            if let Some(annotation) = recover_one(doc, annot, number as i32, page_height) {
                recovered.push(annotation);
            }
        }
    }
    debug!("recovered {} annotations from native objects", recovered.len());
    recovered
}

fn recover_one(doc: &Document, annot: &Dictionary, page: i32, page_height: f64) -> Option<Annotation> {
    let subtype = annot.get(b"Subtype").and_then(Object::as_name).ok()?;
    let kind = match subtype {
        b"Highlight" if is_orange(annot) => AnnotationKind::HighlightCircle,
        b"Highlight" => AnnotationKind::Highlight,
        b"Underline" => AnnotationKind::Underline,
        b"FreeText" => AnnotationKind::FreeText,
        _ => return None,
    };

    let bounds = match kind {
        AnnotationKind::FreeText => rect_entry(annot)?,
        _ => quad_bounds(annot).or_else(|| rect_entry(annot))?,
    };
    let mut annotation = Annotation::new(kind, page, coords::to_ui_space(bounds, page_height));

    if let Some(id) = objects::string_value(doc, annot, b"NM").filter(|id| !id.is_empty()) {
        annotation.id = AnnotationId::from(id);
    }

    if kind == AnnotationKind::FreeText {
        annotation.content = objects::string_value(doc, annot, b"Contents").unwrap_or_default();
        let appearance = objects::string_value(doc, annot, b"DA").unwrap_or_default();
        let (size, color) = parse_default_appearance(&appearance);
        if let Some(size) = size {
            annotation.font_size = size;
        }
        if let Some(color) = color {
            annotation.color = color.to_hex();
        }
    }

    Some(annotation)
}

fn numbers(annot: &Dictionary, key: &[u8]) -> Option<Vec<f64>> {
    let array = annot.get(key).and_then(Object::as_array).ok()?;
    array.iter().map(|value| objects::number(value).map(f64::from)).collect()
}

fn rect_entry(annot: &Dictionary) -> Option<Rect> {
    let values = numbers(annot, b"Rect")?;
    let values: [f64; 4] = values.try_into().ok()?;
    Some(coords::rect_from_pdf(values))
}

/// Bounding box of every quadrilateral in `/QuadPoints`.
fn quad_bounds(annot: &Dictionary) -> Option<Rect> {
    let values = numbers(annot, b"QuadPoints")?;
    if values.is_empty() || values.len() % 8 != 0 {
        return None;
    }

    let xs = values.iter().step_by(2);
    let ys = values.iter().skip(1).step_by(2);
    let (min_x, max_x) = xs.fold((f64::MAX, f64::MIN), |(lo, hi), x| (lo.min(*x), hi.max(*x)));
    let (min_y, max_y) = ys.fold((f64::MAX, f64::MIN), |(lo, hi), y| (lo.min(*y), hi.max(*y)));
    Some(coords::rect_from_pdf([min_x, min_y, max_x, max_y]))
}

fn is_orange(annot: &Dictionary) -> bool {
    numbers(annot, b"C")
        .and_then(|channels| <[f64; 3]>::try_from(channels).ok())
        .map(|[r, g, b]| Rgb::from_normalized([r as f32, g as f32, b as f32]))
        == Some(Rgb::ORANGE)
}

/// Font size (operand of `Tf`) and fill color (`rg` or `g`) of a `/DA`
/// string.
pub(crate) fn parse_default_appearance(appearance: &str) -> (Option<f64>, Option<Rgb>) {
    let tokens: Vec<&str> = appearance.split_whitespace().collect();
    let operand = |index: usize| tokens.get(index).and_then(|token| token.parse::<f32>().ok());

    let mut size = None;
    let mut color = None;
    for (index, token) in tokens.iter().enumerate() {
        match *token {
            "Tf" if index >= 1 => size = operand(index - 1).map(f64::from),
            "rg" if index >= 3 => {
                if let (Some(r), Some(g), Some(b)) =
                    (operand(index - 3), operand(index - 2), operand(index - 1))
                {
                    color = Some(Rgb::from_normalized([r, g, b]));
                }
            }
            "g" if index >= 1 => {
                if let Some(gray) = operand(index - 1) {
                    color = Some(Rgb::from_normalized([gray, gray, gray]));
                }
            }
            _ => {}
        }
    }
    (size, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::numbered_pdf_bytes;
    use crate::{FontResolver, LopdfEngine};
    use doc_model::EngineSettings;

    fn baked(annotations: &[Annotation]) -> Vec<u8> {
        LopdfEngine::with_fonts(FontResolver::new("/nonexistent-font-dir"), EngineSettings::default())
            .bake_with_report(&numbered_pdf_bytes(2), annotations)
            .expect("bake should succeed")
            .bytes
    }

    fn strip_sidecar(bytes: &[u8]) -> Vec<u8> {
        let mut doc = Document::load_mem(bytes).expect("document should parse");
        doc.trailer.remove(b"Info");
        objects::save(&mut doc).expect("save")
    }

    fn sample() -> Vec<Annotation> {
        let mut annotations = vec![
            Annotation::new(AnnotationKind::Highlight, 1, Rect::new(50.0, 100.0, 200.0, 20.0)),
            Annotation::new(AnnotationKind::HighlightCircle, 1, Rect::new(10.0, 10.0, 40.0, 40.0)),
            Annotation::new(AnnotationKind::Underline, 2, Rect::new(72.0, 300.0, 120.0, 12.0)),
            Annotation::free_text(2, Rect::new(100.0, 400.0, 200.0, 60.0), "first\nsecond", Rgb::RED, 12.0),
        ];
        for (index, annotation) in annotations.iter_mut().enumerate() {
            annotation.id = AnnotationId::from(format!("mark-{index}"));
        }
        annotations
    }

    #[test]
    fn native_objects_map_back_to_the_editable_model() {
        let recovered = recover_annotations(&strip_sidecar(&baked(&sample())));

        assert_eq!(recovered, sample());
    }

    #[test]
    fn ocr_words_and_foreign_annotations_are_not_recovered() {
        let mut annotations = sample();
        annotations.push(Annotation::ocr_word(1, Rect::new(1.0, 1.0, 10.0, 10.0), "word"));

        let recovered = recover_annotations(&strip_sidecar(&baked(&annotations)));

        assert_eq!(recovered.len(), 4);
        assert!(recovered.iter().all(Annotation::is_editable));
    }

    #[test]
    fn load_prefers_the_sidecar() {
        let mut with_ocr = sample();
        with_ocr.push(Annotation::ocr_word(1, Rect::new(1.0, 1.0, 10.0, 10.0), "word"));
        let bytes = baked(&with_ocr);

        assert_eq!(load_annotations(&bytes), sample());
        assert_eq!(load_annotations(&strip_sidecar(&bytes)), sample());
    }

    #[test]
    fn load_of_unreadable_bytes_is_empty() {
        assert!(load_annotations(b"garbage").is_empty());
        assert!(recover_annotations(b"garbage").is_empty());
    }

    #[test]
    fn default_appearance_parsing() {
        assert_eq!(
            parse_default_appearance("/Helv 12 Tf 1 0 0 rg"),
            (Some(12.0), Some(Rgb::RED))
        );
        assert_eq!(parse_default_appearance("0 g /F1 9.5 Tf"), (Some(9.5), Some(Rgb::BLACK)));
        assert_eq!(parse_default_appearance(""), (None, None));
        assert_eq!(parse_default_appearance("Tf rg"), (None, None));
    }
}
