use crate::objects::{self, real};
use crate::{sidecar, PdfEngineError};
use doc_model::{EngineSettings, PageSize};
use image::{DynamicImage, ImageFormat};
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::cmp::Ordering;

const IMAGE_NAME: &str = "SDImage";
const MAX_TREE_DEPTH: usize = 64;

pub(crate) fn delete_page(pdf: &[u8], index: i32) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = objects::load(pdf)?;
    let total = doc.get_pages().len();

    match usize::try_from(index).ok().filter(|index| *index < total) {
        Some(index) => {
            let number = index as u32 + 1;
            doc.delete_pages(&[number]);

            let removed = number as i32;
            sidecar::remap_pages(&mut doc, |page| match page.cmp(&removed) {
                Ordering::Less => Some(page),
                Ordering::Equal => None,
                Ordering::Greater => Some(page - 1),
            })?;
            doc.prune_objects();
            debug!("deleted page {number} of {total}");
        }
        None => warn!("page index {index} is outside 0..{total}; nothing deleted"),
    }

    objects::save(&mut doc)
}

pub(crate) fn add_blank_page(
    pdf: &[u8],
    insert_index: i32,
    size: PageSize,
) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = objects::load(pdf)?;
    let page = dictionary! {
        "Type" => "Page",
        "MediaBox" => media_box(f64::from(size.width_pt), f64::from(size.height_pt)),
        "Resources" => Dictionary::new(),
    };
    insert_page(&mut doc, page, insert_index)?;
    objects::save(&mut doc)
}

pub(crate) fn add_image_page(
    pdf: &[u8],
    image: &[u8],
    insert_index: i32,
    settings: &EngineSettings,
) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = objects::load(pdf)?;

    let format = image::guess_format(image)?;
    let decoded = image::load_from_memory_with_format(image, format)?;
    let (width, height) = image_page_size(
        decoded.width(),
        decoded.height(),
        settings.image_dpi,
        settings.default_page_size.width_pt,
    );

    let image_id = add_image_xobject(&mut doc, image, format, &decoded)?;
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    real(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.into())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

    let page = dictionary! {
        "Type" => "Page",
        "MediaBox" => media_box(width, height),
        "Resources" => dictionary! {
            "XObject" => dictionary! { IMAGE_NAME => image_id },
        },
        "Contents" => content_id,
    };
    insert_page(&mut doc, page, insert_index)?;
    objects::save(&mut doc)
}

/// Page size in points for an image of `width_px` x `height_px` at `dpi`,
/// shrunk proportionally when wider than `max_width`.
pub(crate) fn image_page_size(width_px: u32, height_px: u32, dpi: f32, max_width: f32) -> (f64, f64) {
    let dpi = if dpi.is_finite() && dpi > 0.0 { f64::from(dpi) } else { 96.0 };
    let mut width = f64::from(width_px) * 72.0 / dpi;
    let mut height = f64::from(height_px) * 72.0 / dpi;

    let max_width = f64::from(max_width);
    if width > max_width {
        height *= max_width / width;
        width = max_width;
    }
    (width, height)
}

fn media_box(width: f64, height: f64) -> Object {
    Object::Array(vec![Object::Integer(0), Object::Integer(0), real(width), real(height)])
}

/// JPEG data is embedded untouched; everything else is stored as 8-bit RGB
/// with the alpha channel, if any, as a soft mask.
fn add_image_xobject(
    doc: &mut Document,
    raw: &[u8],
    format: ImageFormat,
    decoded: &DynamicImage,
) -> Result<ObjectId, PdfEngineError> {
    let (width, height) = (i64::from(decoded.width()), i64::from(decoded.height()));
    let image_dict = |color_space: &str| {
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        }
    };

    if format == ImageFormat::Jpeg {
        let color_space = match decoded.color().channel_count() {
            1 => Some("DeviceGray"),
            3 => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            let mut dict = image_dict(color_space);
            dict.set("Filter", "DCTDecode");
            return Ok(doc.add_object(Stream::new(dict, raw.to_vec())));
        }
        debug!("JPEG with {:?} pixels is re-encoded as RGB", decoded.color());
    }

    let mut dict = image_dict("DeviceRGB");
    if decoded.color().has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|pixel| pixel[3]).collect();
        let mut mask = Stream::new(image_dict("DeviceGray"), alpha);
        let _ = mask.compress();
        dict.set("SMask", doc.add_object(mask));
    }

    let mut stream = Stream::new(dict, decoded.to_rgb8().into_raw());
    let _ = stream.compress();
    Ok(doc.add_object(stream))
}

/// Links `page` into the page tree before the page at the 0-based
/// `insert_index`, or at the end when the index is negative or past the
/// last page. Sidecar page numbers at or after the new page shift by one.
fn insert_page(
    doc: &mut Document,
    mut page: Dictionary,
    insert_index: i32,
) -> Result<ObjectId, PdfEngineError> {
    let pages = doc.get_pages();
    let total = pages.len();
    let before = usize::try_from(insert_index)
        .ok()
        .filter(|index| *index < total)
        .and_then(|index| pages.get(&(index as u32 + 1)).copied());

    let (parent_id, position) = match before {
        Some(sibling_id) => {
            let parent =
                doc.get_object(sibling_id)?.as_dict()?.get(b"Parent").and_then(Object::as_reference).ok();
            let parent_id = match parent {
                Some(parent_id) => parent_id,
                None => objects::pages_root_id(doc)?,
            };
            let position = kids_mut(doc, parent_id)?
                .iter()
                .position(|kid| kid.as_reference().ok() == Some(sibling_id))
                .ok_or_else(|| {
                    PdfEngineError::Structure(format!("page {sibling_id:?} is not a kid of its parent"))
                })?;
            (parent_id, Some(position))
        }
        None => (objects::pages_root_id(doc)?, None),
    };

    page.set("Parent", parent_id);
    let page_id = doc.add_object(page);

    let kids = kids_mut(doc, parent_id)?;
    match position {
        Some(position) => kids.insert(position, Object::Reference(page_id)),
        None => kids.push(Object::Reference(page_id)),
    }
    bump_counts(doc, parent_id)?;

    if let Some(index) = before.and(usize::try_from(insert_index).ok()) {
        let inserted = index as i32 + 1;
        sidecar::remap_pages(doc, |page| Some(if page >= inserted { page + 1 } else { page }))?;
        debug!("inserted page at position {inserted}");
    } else {
        debug!("appended page {}", total + 1);
    }

    Ok(page_id)
}

fn kids_mut(doc: &mut Document, node_id: ObjectId) -> Result<&mut Vec<Object>, PdfEngineError> {
    let indirect = objects::dict_mut(doc, node_id)?.get(b"Kids").and_then(Object::as_reference).ok();
    match indirect {
        Some(kids_id) => Ok(doc.get_object_mut(kids_id)?.as_array_mut()?),
        None => Ok(objects::dict_mut(doc, node_id)?.get_mut(b"Kids")?.as_array_mut()?),
    }
}

/// Adds one page to `/Count` of `node_id` and every ancestor.
fn bump_counts(doc: &mut Document, node_id: ObjectId) -> Result<(), PdfEngineError> {
    let mut current = Some(node_id);
    let mut depth = 0;
    while let Some(id) = current {
        let node = objects::dict_mut(doc, id)?;
        let count = node.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        node.set("Count", count + 1);
        current = node.get(b"Parent").and_then(Object::as_reference).ok();

        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err(PdfEngineError::Structure("page tree is too deep".to_owned()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{numbered_pdf_bytes, page_labels};
    use doc_model::{Annotation, AnnotationKind, Rect};
    use std::io::Cursor;

    fn encoded(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).expect("image should encode");
        bytes
    }

    fn page_size_of(bytes: &[u8], number: u32) -> PageSize {
        let doc = Document::load_mem(bytes).expect("document should parse");
        objects::page_size(&doc, doc.get_pages()[&number])
    }

    fn root_count(bytes: &[u8]) -> i64 {
        let doc = Document::load_mem(bytes).expect("document should parse");
        let root_id = objects::pages_root_id(&doc).expect("pages root");
        doc.get_dictionary(root_id)
            .and_then(|root| root.get(b"Count"))
            .and_then(Object::as_i64)
            .expect("count")
    }

    fn with_sidecar(bytes: &[u8], pages: &[i32]) -> Vec<u8> {
        let mut doc = Document::load_mem(bytes).expect("document should parse");
        let annotations: Vec<Annotation> = pages
            .iter()
            .map(|page| Annotation::new(AnnotationKind::Highlight, *page, Rect::new(0.0, 0.0, 1.0, 1.0)))
            .collect();
        sidecar::write(&mut doc, &annotations).expect("sidecar should be written");
        objects::save(&mut doc).expect("save")
    }

    fn sidecar_pages(bytes: &[u8]) -> Vec<i32> {
        sidecar::extract(bytes).into_iter().map(|annotation| annotation.page).collect()
    }

    #[test]
    fn deleting_keeps_remaining_pages_in_order() {
        let bytes = delete_page(&numbered_pdf_bytes(4), 1).expect("delete should succeed");

        assert_eq!(page_labels(&bytes), vec!["page-1", "page-3", "page-4"]);
        assert_eq!(root_count(&bytes), 3);
    }

    #[test]
    fn deleting_out_of_range_is_a_no_op() {
        for index in [-1, 3, 40] {
            let bytes = delete_page(&numbered_pdf_bytes(3), index).expect("delete should succeed");
            assert_eq!(page_labels(&bytes), vec!["page-1", "page-2", "page-3"]);
        }
    }

    #[test]
    fn deleting_renumbers_the_sidecar() {
        let source = with_sidecar(&numbered_pdf_bytes(3), &[1, 2, 3, 3]);

        let bytes = delete_page(&source, 1).expect("delete should succeed");

        assert_eq!(sidecar_pages(&bytes), vec![1, 2, 2]);
    }

    #[test]
    fn blank_page_is_inserted_before_index() {
        let bytes = add_blank_page(&numbered_pdf_bytes(2), 1, PageSize::A4).expect("insert");

        assert_eq!(page_labels(&bytes), vec!["page-1", "", "page-2"]);
        assert_eq!(page_size_of(&bytes, 2), PageSize::A4);
        assert_eq!(root_count(&bytes), 3);
    }

    #[test]
    fn blank_page_is_appended_for_negative_or_large_index() {
        for index in [-1, 2, 99] {
            let bytes = add_blank_page(&numbered_pdf_bytes(2), index, PageSize::A4).expect("insert");
            assert_eq!(page_labels(&bytes), vec!["page-1", "page-2", ""]);
        }
    }

    #[test]
    fn inserting_renumbers_the_sidecar() {
        let source = with_sidecar(&numbered_pdf_bytes(3), &[1, 2, 3]);

        let inserted = add_blank_page(&source, 1, PageSize::A4).expect("insert");
        let appended = add_blank_page(&source, -1, PageSize::A4).expect("append");

        assert_eq!(sidecar_pages(&inserted), vec![1, 3, 4]);
        assert_eq!(sidecar_pages(&appended), vec![1, 2, 3]);
    }

    #[test]
    fn wide_images_are_scaled_down_to_the_default_width() {
        let png = encoded(DynamicImage::new_rgba8(1600, 800), ImageFormat::Png);

        let bytes = add_image_page(&numbered_pdf_bytes(1), &png, -1, &EngineSettings::default())
            .expect("insert");

        let size = page_size_of(&bytes, 2);
        assert_eq!(size.width_pt, 595.0);
        assert!((size.height_pt - 297.5).abs() < 0.01);
    }

    #[test]
    fn narrow_images_keep_their_point_size() {
        assert_eq!(image_page_size(96, 48, 96.0, 595.0), (72.0, 36.0));
        assert_eq!(image_page_size(300, 150, 300.0, 595.0), (72.0, 36.0));
        assert_eq!(image_page_size(96, 48, 0.0, 595.0), (72.0, 36.0));
    }

    #[test]
    fn rgba_images_get_a_soft_mask() {
        let png = encoded(DynamicImage::new_rgba8(10, 10), ImageFormat::Png);

        let bytes = add_image_page(&numbered_pdf_bytes(1), &png, 0, &EngineSettings::default())
            .expect("insert");

        let doc = Document::load_mem(&bytes).expect("parse");
        let image = doc
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .find(|stream| stream.dict.has(b"SMask"))
            .expect("image with a soft mask");
        assert_eq!(image.dict.get(b"Width").and_then(Object::as_i64).ok(), Some(10));
        assert_eq!(page_labels(&bytes), vec!["", "page-1"]);
    }

    #[test]
    fn jpeg_data_is_embedded_as_is() {
        let jpeg = encoded(DynamicImage::new_rgb8(16, 8), ImageFormat::Jpeg);

        let bytes = add_image_page(&numbered_pdf_bytes(1), &jpeg, -1, &EngineSettings::default())
            .expect("insert");

        let doc = Document::load_mem(&bytes).expect("parse");
        let image = doc
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .find(|stream| {
                stream.dict.get(b"Filter").and_then(Object::as_name).is_ok_and(|name| name == b"DCTDecode")
            })
            .expect("DCT image");
        assert_eq!(image.content, jpeg);
    }

    #[test]
    fn unsupported_image_data_is_an_error() {
        let err = add_image_page(&numbered_pdf_bytes(1), b"not an image", -1, &EngineSettings::default())
            .expect_err("insert should fail");
        assert!(matches!(err, PdfEngineError::Image(_)));
    }
}
