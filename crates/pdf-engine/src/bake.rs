//! Commits an annotation list into a document.
//!
//! Visible marks become native annotation objects with their own appearance
//! streams. OCR words become an invisible text run in a tagged content stream
//! so the page is searchable. The editable list is also written to the
//! sidecar. Re-baking the same list gives the same native layer: everything a
//! previous bake added is removed first.

use crate::coords;
use crate::embed::{self, PdfFont};
use crate::font::FaceId;
use crate::objects::{self, real};
use crate::{sidecar, LopdfEngine, PdfEngineError};
use doc_model::{Annotation, AnnotationKind, Rect, Rgb};
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;

/// Marks content streams painted by the engine.
pub(crate) const LAYER_KEY: &str = "SmartDocLayer";
/// Marks annotation objects created by the engine.
pub(crate) const BAKED_KEY: &str = "SmartDocBaked";

const OCR_FONT: &str = "SDOcr";
const OCR_STATE: &str = "SDOcrGs";
const NOTE_FONT: &str = "SDNote";
const HIGHLIGHT_STATE: &str = "SDAlpha";

const MIN_VERSION: f32 = 1.7;
const HIGHLIGHT_OPACITY: f32 = 0.4;
const DEFAULT_FORM_FONT: &str = "Helv";
const OCR_SIZE_RATIO: f64 = 0.65;
const NOTE_INSET: f64 = 4.0;
const NOTE_LINE_HEIGHT: f64 = 1.2;
const UNDERLINE_WIDTH: f64 = 2.0;
const PRINT_FLAG: i64 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BakeReport {
    /// Native annotation objects written.
    pub baked: usize,
    /// Annotations left out because their data was malformed.
    pub skipped: usize,
    /// Annotations whose page does not exist.
    pub dropped: usize,
    /// Words painted into the invisible text layer.
    pub ocr_words: usize,
}

#[derive(Debug, Clone)]
pub struct BakeOutcome {
    pub bytes: Vec<u8>,
    pub report: BakeReport,
}

pub(crate) fn bake(
    engine: &LopdfEngine,
    pdf: &[u8],
    annotations: &[Annotation],
) -> Result<BakeOutcome, PdfEngineError> {
    let mut doc = objects::load(pdf)?;
    raise_version(&mut doc);
    sidecar::write(&mut doc, annotations)?;

    let pages = doc.get_pages();
    let mut report = BakeReport::default();

    let mut by_page: BTreeMap<u32, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations {
        match u32::try_from(annotation.page).ok().filter(|page| pages.contains_key(page)) {
            Some(page) => by_page.entry(page).or_default().push(annotation),
            None => {
                debug!(
                    "dropping annotation {} for page {} (document has {} pages)",
                    annotation.id,
                    annotation.page,
                    pages.len()
                );
                report.dropped += 1;
            }
        }
    }

    for (number, page_id) in &pages {
        if by_page.contains_key(number) {
            retain_annotations(&mut doc, *page_id, is_widget)?;
            remove_text_layer(&mut doc, *page_id)?;
        } else {
            retain_annotations(&mut doc, *page_id, |annot| !annot.has(BAKED_KEY.as_bytes()))?;
        }
    }

    let ocr_face = engine.fonts().resolve(&engine.settings().ocr_font_family, false, false);
    let note_face = engine.fonts().resolve(&engine.settings().annotation_font_family, false, false);
    let fonts = embed_fonts(&mut doc, engine, &by_page, ocr_face, note_face);

    for (number, group) in &by_page {
        let page_id = pages[number];
        let page_height = f64::from(objects::page_size(&doc, page_id).height_pt);

        let words: Vec<&Annotation> =
            group.iter().copied().filter(|annotation| !annotation.is_editable()).collect();
        if let Some(font) = fonts.get(&ocr_face) {
            report.ocr_words += paint_text_layer(&mut doc, page_id, page_height, font, &words)?;
        }

        for annotation in group {
            match build_annotation(&mut doc, annotation, page_id, page_height, fonts.get(&note_face))
            {
                Ok(Some(annot_id)) => {
                    objects::append_annotation(&mut doc, page_id, annot_id)?;
                    report.baked += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("skipping annotation {}: {err}", annotation.id);
                    report.skipped += 1;
                }
            }
        }
    }

    if let Err(err) = set_need_appearances(&mut doc) {
        warn!("could not flag form appearances for regeneration: {err}");
    }

    doc.prune_objects();
    let bytes = objects::save(&mut doc)?;
    debug!("bake finished: {report:?}");
    Ok(BakeOutcome { bytes, report })
}

fn raise_version(doc: &mut Document) {
    let current = doc.version.trim().parse::<f32>().unwrap_or(0.0);
    if current < MIN_VERSION {
        doc.version = "1.7".to_owned();
    }
}

fn is_widget(annot: &Dictionary) -> bool {
    annot.get(b"Subtype").and_then(Object::as_name).is_ok_and(|name| name == b"Widget")
}

/// Drops every `/Annots` entry of the page for which `keep` is false.
fn retain_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    keep: impl Fn(&Dictionary) -> bool,
) -> Result<(), PdfEngineError> {
    let annots = objects::page_annotations(doc, page_id);
    if annots.is_empty() {
        return Ok(());
    }

    let before = annots.len();
    let kept: Vec<Object> = annots
        .into_iter()
        .filter(|entry| {
            objects::resolve(doc, entry)
                .and_then(|object| object.as_dict().ok())
                .map_or(true, |annot| keep(annot))
        })
        .collect();

    if kept.len() == before {
        return Ok(());
    }

    let page = objects::dict_mut(doc, page_id)?;
    if kept.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(kept));
    }
    Ok(())
}

fn is_layer_stream(doc: &Document, id: ObjectId) -> bool {
    doc.get_object(id)
        .and_then(Object::as_stream)
        .is_ok_and(|stream| stream.dict.has(LAYER_KEY.as_bytes()))
}

pub(crate) fn remove_text_layer(doc: &mut Document, page_id: ObjectId) -> Result<(), PdfEngineError> {
    let refs = objects::content_refs(doc, page_id);
    let kept: Vec<ObjectId> = refs.iter().copied().filter(|id| !is_layer_stream(doc, *id)).collect();
    if kept.len() != refs.len() {
        objects::set_content_refs(doc, page_id, kept)?;
    }
    Ok(())
}

/// One font object per face, covering every character the bake will show
/// with it.
fn embed_fonts(
    doc: &mut Document,
    engine: &LopdfEngine,
    by_page: &BTreeMap<u32, Vec<&Annotation>>,
    ocr_face: FaceId,
    note_face: FaceId,
) -> BTreeMap<FaceId, PdfFont> {
    let mut coverage: BTreeMap<FaceId, String> = BTreeMap::new();
    for annotation in by_page.values().flatten() {
        let face = match annotation.kind {
            AnnotationKind::OcrText => ocr_face,
            AnnotationKind::FreeText => note_face,
            _ => continue,
        };
        coverage.entry(face).or_default().push_str(&annotation.content);
    }

    coverage
        .into_iter()
        .map(|(face, text)| {
            let program = engine.fonts().font_bytes(face);
            let font = PdfFont::embed(doc, &program, face.postscript_name(), &text);
            if !font.is_embedded() {
                debug!("{face:?} text is shown with Helvetica");
            }
            (face, font)
        })
        .collect()
}

/// Paints `words` (top-left page coordinates) as an invisible text run and
/// returns how many were painted.
fn paint_text_layer(
    doc: &mut Document,
    page_id: ObjectId,
    page_height: f64,
    font: &PdfFont,
    words: &[&Annotation],
) -> Result<usize, PdfEngineError> {
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(OCR_STATE.into())]),
        Operation::new(
            "cm",
            vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(-1),
                Object::Integer(0),
                real(page_height),
            ],
        ),
        Operation::new("rg", vec![Object::Integer(1), Object::Integer(1), Object::Integer(1)]),
        Operation::new("BT", vec![]),
    ];

    let mut painted = 0;
    for word in words {
        let rect = word.rect();
        if word.content.trim().is_empty() || !(rect.height > 0.0) {
            continue;
        }

        let size = rect.height * OCR_SIZE_RATIO;
        let baseline = rect.y + f64::from(font.ascent) * size;
        operations.push(Operation::new("Tf", vec![Object::Name(OCR_FONT.into()), real(size)]));
        operations.push(Operation::new(
            "Tm",
            vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(-1),
                real(rect.x),
                real(baseline),
            ],
        ));
        operations.push(Operation::new("Tj", vec![font.encode(&word.content)]));
        painted += 1;
    }

    if painted == 0 {
        return Ok(0);
    }

    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));

    let alpha = 1.0 / 255.0;
    let state_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => real(alpha),
        "CA" => real(alpha),
    });
    objects::insert_resource(doc, page_id, "Font", OCR_FONT, Object::Reference(font.id))?;
    objects::insert_resource(doc, page_id, "ExtGState", OCR_STATE, Object::Reference(state_id))?;

    let layer = Content { operations }.encode()?;
    let layer_id = doc.add_object(layer_stream(layer));

    let mut refs = objects::content_refs(doc, page_id);
    if !refs.is_empty() {
        // Isolate the page's own graphics state from the layer.
        let save_id = doc.add_object(layer_stream(b"q\n".to_vec()));
        let restore_id = doc.add_object(layer_stream(b"\nQ\n".to_vec()));
        refs.insert(0, save_id);
        refs.push(restore_id);
    }
    refs.push(layer_id);
    objects::set_content_refs(doc, page_id, refs)?;

    Ok(painted)
}

fn layer_stream(content: Vec<u8>) -> Stream {
    Stream::new(dictionary! { LAYER_KEY => "OcrText" }, content)
}

/// Native annotation object for one mark, or `None` for kinds that are not
/// native annotations.
fn build_annotation(
    doc: &mut Document,
    annotation: &Annotation,
    page_id: ObjectId,
    page_height: f64,
    note_font: Option<&PdfFont>,
) -> Result<Option<ObjectId>, PdfEngineError> {
    // Document space from here on.
    let rect = coords::to_document_space(annotation.rect(), page_height);

    let (mut dict, appearance) = match annotation.kind {
        AnnotationKind::Highlight => {
            let color = Rgb::YELLOW.normalized();
            (markup("Highlight", rect, color), highlight_appearance(rect, color, false)?)
        }
        AnnotationKind::HighlightCircle => {
            let color = Rgb::ORANGE.normalized();
            (markup("Highlight", rect, color), highlight_appearance(rect, color, true)?)
        }
        AnnotationKind::Underline => {
            let color = Rgb::RED.normalized();
            (markup("Underline", rect, color), underline_appearance(rect, color)?)
        }
        AnnotationKind::FreeText => {
            let color = annotation.rgb()?.normalized();
            let dict = free_text(annotation, rect, color);
            let appearance = match note_font {
                Some(font) => Some(note_appearance(annotation, rect, color, font)?),
                None => None,
            };
            (dict, appearance)
        }
        AnnotationKind::OcrText => return Ok(None),
    };

    if matches!(annotation.kind, AnnotationKind::Highlight | AnnotationKind::HighlightCircle) {
        dict.set("CA", Object::Real(HIGHLIGHT_OPACITY));
    }
    if let Some(appearance) = appearance {
        let appearance_id = doc.add_object(appearance);
        dict.set("AP", dictionary! { "N" => appearance_id });
    }
    dict.set("NM", objects::text_string(annotation.id.as_str()));
    dict.set("F", PRINT_FLAG);
    dict.set("P", page_id);
    dict.set(BAKED_KEY, true);

    Ok(Some(doc.add_object(dict)))
}

fn reals(values: &[f64]) -> Object {
    Object::Array(values.iter().copied().map(real).collect())
}

fn color_array(color: [f32; 3]) -> Object {
    Object::Array(color.iter().copied().map(Object::Real).collect())
}

fn markup(subtype: &str, rect: Rect, color: [f32; 3]) -> Dictionary {
    dictionary! {
        "Type" => "Annot",
        "Subtype" => subtype,
        "Rect" => reals(&coords::pdf_rect(rect)),
        "QuadPoints" => reals(&coords::quad_points(rect)),
        "C" => color_array(color),
    }
}

fn free_text(annotation: &Annotation, rect: Rect, color: [f32; 3]) -> Dictionary {
    let appearance = default_appearance(annotation.font_size, color);
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "FreeText",
        "Rect" => reals(&coords::pdf_rect(rect)),
        "Contents" => objects::text_string(&annotation.content),
        "DA" => Object::string_literal(appearance),
        "BS" => dictionary! { "W" => 0 },
    }
}

/// `/DA` string for free text: `/Helv <size> Tf <r> <g> <b> rg`.
pub(crate) fn default_appearance(font_size: f64, color: [f32; 3]) -> String {
    format!(
        "/Helv {} Tf {} {} {} rg",
        format_number(font_size),
        format_number(f64::from(color[0])),
        format_number(f64::from(color[1])),
        format_number(f64::from(color[2]))
    )
}

fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

fn form_xobject(rect: Rect, resources: Dictionary, operations: Vec<Operation>) -> Result<Stream, PdfEngineError> {
    let content = Content { operations }.encode()?;
    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => reals(&coords::pdf_rect(rect)),
            "Resources" => resources,
        },
        content,
    ))
}

fn highlight_appearance(rect: Rect, color: [f32; 3], ellipse: bool) -> Result<Option<Stream>, PdfEngineError> {
    let [llx, lly, urx, ury] = coords::pdf_rect(rect);
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(HIGHLIGHT_STATE.into())]),
        Operation::new("rg", color.iter().copied().map(Object::Real).collect()),
    ];

    if ellipse {
        operations.extend(ellipse_path(llx, lly, urx, ury));
    } else {
        operations.push(Operation::new(
            "re",
            vec![real(llx), real(lly), real(urx - llx), real(ury - lly)],
        ));
    }
    operations.push(Operation::new("f", vec![]));
    operations.push(Operation::new("Q", vec![]));

    let resources = dictionary! {
        "ExtGState" => dictionary! {
            HIGHLIGHT_STATE => dictionary! {
                "Type" => "ExtGState",
                "BM" => "Multiply",
            },
        },
    };
    form_xobject(rect, resources, operations).map(Some)
}

/// Four Bezier arcs approximating the ellipse inscribed in the box.
fn ellipse_path(llx: f64, lly: f64, urx: f64, ury: f64) -> Vec<Operation> {
    const KAPPA: f64 = 0.552_284_8;
    let (cx, cy) = ((llx + urx) / 2.0, (lly + ury) / 2.0);
    let (rx, ry) = ((urx - llx) / 2.0, (ury - lly) / 2.0);
    let (kx, ky) = (rx * KAPPA, ry * KAPPA);

    let curve = |points: [f64; 6]| Operation::new("c", points.iter().copied().map(real).collect());
    vec![
        Operation::new("m", vec![real(cx + rx), real(cy)]),
        curve([cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry]),
        curve([cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy]),
        curve([cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry]),
        curve([cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy]),
    ]
}

fn underline_appearance(rect: Rect, color: [f32; 3]) -> Result<Option<Stream>, PdfEngineError> {
    let [llx, lly, urx, _] = coords::pdf_rect(rect);
    let y = lly + UNDERLINE_WIDTH / 2.0;
    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new("RG", color.iter().copied().map(Object::Real).collect()),
        Operation::new("w", vec![real(UNDERLINE_WIDTH)]),
        Operation::new("m", vec![real(llx), real(y)]),
        Operation::new("l", vec![real(urx), real(y)]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ];
    form_xobject(rect, Dictionary::new(), operations).map(Some)
}

/// One text line per `\n`, starting `NOTE_INSET` points inside the box's
/// top-left corner.
fn note_appearance(
    annotation: &Annotation,
    rect: Rect,
    color: [f32; 3],
    font: &PdfFont,
) -> Result<Stream, PdfEngineError> {
    let [llx, _, _, ury] = coords::pdf_rect(rect);
    let size = annotation.font_size;
    let first_baseline = ury - NOTE_INSET - f64::from(font.ascent) * size;

    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("rg", color.iter().copied().map(Object::Real).collect()),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(NOTE_FONT.into()), real(size)]),
        Operation::new("TL", vec![real(size * NOTE_LINE_HEIGHT)]),
        Operation::new("Td", vec![real(llx + NOTE_INSET), real(first_baseline)]),
    ];
    for (index, line) in annotation.content.split('\n').enumerate() {
        if index > 0 {
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("Tj", vec![font.encode(line.trim_end_matches('\r'))]));
    }
    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));

    let resources = dictionary! {
        "Font" => dictionary! { NOTE_FONT => font.id },
    };
    form_xobject(rect, resources, operations)
}

/// Flags the form for appearance regeneration and makes sure `/Helv`, the
/// font every `/DA` string names, is in the form's default resources.
fn set_need_appearances(doc: &mut Document) -> Result<(), PdfEngineError> {
    let catalog_id = objects::catalog_id(doc)?;
    let form_id = indirect_entry(doc, catalog_id, "AcroForm")?;
    let form = objects::dict_mut(doc, form_id)?;
    form.set("NeedAppearances", true);
    if !form.has(b"Fields") {
        form.set("Fields", Vec::<Object>::new());
    }

    let resources_id = indirect_entry(doc, form_id, "DR")?;
    let fonts_id = indirect_entry(doc, resources_id, "Font")?;
    let fonts = objects::dict_mut(doc, fonts_id)?;
    if !fonts.has(DEFAULT_FORM_FONT.as_bytes()) {
        fonts.set(DEFAULT_FORM_FONT, embed::helvetica());
    }
    Ok(())
}

/// Id of the dictionary stored under `key`, moving an inline dictionary into
/// its own object and creating an empty one when the entry is absent.
fn indirect_entry(doc: &mut Document, owner_id: ObjectId, key: &str) -> Result<ObjectId, PdfEngineError> {
    let entry = doc.get_dictionary(owner_id)?.get(key.as_bytes()).ok().cloned();
    let id = match entry {
        Some(Object::Reference(id)) => return Ok(id),
        Some(Object::Dictionary(dict)) => doc.add_object(dict),
        _ => doc.add_object(Dictionary::new()),
    };
    objects::dict_mut(doc, owner_id)?.set(key, id);
    Ok(id)
}
