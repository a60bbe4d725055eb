//! The editable-annotation sidecar stored in the document's `/Keywords`.
//!
//! Wire format: the literal tag `[SMARTDOC]` immediately followed by a JSON
//! array of annotation records. Anything else in the field means "no
//! annotations". OCR words are never written; they are regenerated from the
//! page image on every load.

use crate::objects;
use crate::PdfEngineError;
use doc_model::Annotation;
use log::debug;
use lopdf::{Dictionary, Document, Object};

pub const SIDECAR_TAG: &str = "[SMARTDOC]";

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("metadata does not start with the {SIDECAR_TAG} tag")]
    MissingTag,
    #[error("sidecar JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(annotations: &[Annotation]) -> Result<String, serde_json::Error> {
    let editable: Vec<&Annotation> =
        annotations.iter().filter(|annotation| annotation.is_editable()).collect();
    Ok(format!("{SIDECAR_TAG}{}", serde_json::to_string(&editable)?))
}

pub fn decode(tagged: &str) -> Result<Vec<Annotation>, SidecarError> {
    let json = tagged.strip_prefix(SIDECAR_TAG).ok_or(SidecarError::MissingTag)?;
    Ok(serde_json::from_str(json)?)
}

/// [`decode`] with every failure collapsed into "no annotations".
pub fn try_decode(tagged: &str) -> Vec<Annotation> {
    decode(tagged).unwrap_or_else(|err| {
        debug!("ignoring sidecar: {err}");
        Vec::new()
    })
}

/// Raw `/Keywords` text of the document information dictionary.
pub fn read_keywords(doc: &Document) -> Option<String> {
    let info = objects::resolve(doc, doc.trailer.get(b"Info").ok()?)?.as_dict().ok()?;
    objects::string_value(doc, info, b"Keywords")
}

/// True when the document carries a tagged sidecar, parsable or not.
pub fn has_sidecar(doc: &Document) -> bool {
    read_keywords(doc).is_some_and(|keywords| keywords.starts_with(SIDECAR_TAG))
}

/// Editable annotations stored in `pdf`. Never fails: unreadable documents
/// and malformed sidecars both read as an empty list.
pub fn extract(pdf: &[u8]) -> Vec<Annotation> {
    match objects::load(pdf) {
        Ok(doc) => read_keywords(&doc).map(|keywords| try_decode(&keywords)).unwrap_or_default(),
        Err(err) => {
            debug!("no sidecar read from unreadable document: {err}");
            Vec::new()
        }
    }
}

pub(crate) fn write(doc: &mut Document, annotations: &[Annotation]) -> Result<(), PdfEngineError> {
    let tagged = encode(annotations)?;
    set_keywords(doc, &tagged)
}

/// Rewrites the page numbers of a stored sidecar after page surgery.
/// `remap` returns `None` for annotations that no longer have a page.
pub(crate) fn remap_pages(
    doc: &mut Document,
    remap: impl Fn(i32) -> Option<i32>,
) -> Result<(), PdfEngineError> {
    let Some(Ok(annotations)) = read_keywords(doc).map(|keywords| decode(&keywords)) else {
        return Ok(());
    };

    let remapped: Vec<Annotation> = annotations
        .into_iter()
        .filter_map(|annotation| {
            remap(annotation.page).map(|page| Annotation { page, ..annotation })
        })
        .collect();

    write(doc, &remapped)
}

fn set_keywords(doc: &mut Document, value: &str) -> Result<(), PdfEngineError> {
    let keywords = objects::text_string(value);

    match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => {
            let id = *id;
            objects::dict_mut(doc, id)?.set("Keywords", keywords);
        }
        Ok(Object::Dictionary(_)) => {
            if let Ok(Object::Dictionary(info)) = doc.trailer.get_mut(b"Info") {
                info.set("Keywords", keywords);
            }
        }
        _ => {
            let mut info = Dictionary::new();
            info.set("Keywords", keywords);
            let id = doc.add_object(info);
            doc.trailer.set("Info", id);
        }
    }

    Ok(())
}
