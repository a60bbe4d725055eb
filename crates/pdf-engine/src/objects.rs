//! Small lopdf helpers shared by the baking and page surgery code.

use crate::PdfEngineError;
use doc_model::PageSize;
use encoding_rs::{UTF_16BE, WINDOWS_1252};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

pub(crate) fn load(bytes: &[u8]) -> Result<Document, PdfEngineError> {
    if trailer_declares_encryption(bytes) {
        return Err(PdfEngineError::EncryptedUnsupported);
    }

    let doc = Document::load_mem(bytes)?;
    if doc.trailer.has(b"Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }

    Ok(doc)
}

/// Looks for `/Encrypt` after the last `trailer` keyword only. Object bodies
/// before it may hold user text.
fn trailer_declares_encryption(bytes: &[u8]) -> bool {
    const TRAILER: &[u8] = b"trailer";
    const ENCRYPT: &[u8] = b"/Encrypt";

    let Some(start) = bytes.windows(TRAILER.len()).rposition(|window| window == TRAILER) else {
        return false;
    };
    bytes[start..].windows(ENCRYPT.len()).any(|window| window == ENCRYPT)
}

pub(crate) fn save(doc: &mut Document) -> Result<Vec<u8>, PdfEngineError> {
    let mut output = Vec::new();
    doc.save_to(&mut output)?;
    Ok(output)
}

pub(crate) fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

/// Follows one level of indirection.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn dict_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary, PdfEngineError> {
    Ok(doc.get_object_mut(id)?.as_dict_mut()?)
}

pub(crate) fn catalog_id(doc: &Document) -> Result<ObjectId, PdfEngineError> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

pub(crate) fn pages_root_id(doc: &Document) -> Result<ObjectId, PdfEngineError> {
    let catalog = doc.get_object(catalog_id(doc)?)?.as_dict()?;
    Ok(catalog.get(b"Pages")?.as_reference()?)
}

/// Looks up a page attribute, walking up the page tree for inheritable keys.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(id) = current {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
        if depth > 64 {
            return None;
        }
    }
    None
}

/// Page size from the (possibly inherited) media box; US Letter when absent.
pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> PageSize {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|object| object.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let x0 = number(&array[0])?;
            let y0 = number(&array[1])?;
            let x1 = number(&array[2])?;
            let y1 = number(&array[3])?;
            Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
        })
        .unwrap_or(PageSize::LETTER)
}

/// Entries of the page's `/Annots` array, references resolved away.
pub(crate) fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    doc.get_object(page_id)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|page| page.get(b"Annots").ok())
        .and_then(|annots| resolve(doc, annots))
        .and_then(|annots| annots.as_array().ok())
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn append_annotation(
    doc: &mut Document,
    page_id: ObjectId,
    annot_id: ObjectId,
) -> Result<(), PdfEngineError> {
    let mut annots = page_annotations(doc, page_id);
    annots.push(Object::Reference(annot_id));
    dict_mut(doc, page_id)?.set("Annots", Object::Array(annots));
    Ok(())
}

/// Content stream references of a page, in paint order.
pub(crate) fn content_refs(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let Some(contents) = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|page| page.get(b"Contents").ok())
    else {
        return Vec::new();
    };

    match contents {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.iter().filter_map(|o| o.as_reference().ok()).collect(),
            _ => vec![*id],
        },
        Object::Array(items) => items.iter().filter_map(|o| o.as_reference().ok()).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn set_content_refs(
    doc: &mut Document,
    page_id: ObjectId,
    refs: Vec<ObjectId>,
) -> Result<(), PdfEngineError> {
    let page = dict_mut(doc, page_id)?;
    if refs.is_empty() {
        page.remove(b"Contents");
    } else {
        page.set("Contents", Object::Array(refs.into_iter().map(Object::Reference).collect()));
    }
    Ok(())
}

/// Adds `name` to the page's `category` resource dictionary (Font,
/// ExtGState, XObject ...). Inherited or shared resources are copied onto
/// the page first so other pages are unaffected.
pub(crate) fn insert_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name: &str,
    value: Object,
) -> Result<(), PdfEngineError> {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut entries = resources
        .get(category.as_bytes())
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    entries.set(name, value);
    resources.set(category, Object::Dictionary(entries));
    dict_mut(doc, page_id)?.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Encodes a PDF text string: plain bytes for ASCII, UTF-16BE with BOM
/// otherwise.
pub(crate) fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return UTF_16BE.decode_without_bom_handling(utf16).0.into_owned();
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
    }
}

pub(crate) fn string_value(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match resolve(doc, dict.get(key).ok()?)? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}
