//! Conversions between the UI's top-left page space and PDF user space.
//!
//! Annotation rectangles are stored unscaled with a top-left origin. PDF user
//! space has its origin at the bottom-left of the page, so only the vertical
//! axis changes: `doc_y = page_height - ui_y - height`. The formula is its
//! own inverse.

use doc_model::Rect;

pub fn to_document_space(ui: Rect, page_height: f64) -> Rect {
    Rect::new(ui.x, page_height - ui.y - ui.height, ui.width, ui.height)
}

pub fn to_ui_space(doc: Rect, page_height: f64) -> Rect {
    Rect::new(doc.x, page_height - doc.y - doc.height, doc.width, doc.height)
}

/// Rectangle as drawn on screen at `scale`.
pub fn to_display(rect: Rect, scale: f64) -> Rect {
    rect.scaled(scale)
}

/// Strips the display scale from a rectangle drawn on screen.
pub fn from_display(rect: Rect, scale: f64) -> Rect {
    rect.unscaled(scale)
}

/// `/Rect` array values `[llx lly urx ury]` for a document-space rectangle.
pub fn pdf_rect(doc: Rect) -> [f64; 4] {
    let (x0, x1) = ordered(doc.x, doc.right());
    let (y0, y1) = ordered(doc.y, doc.bottom());
    [x0, y0, x1, y1]
}

/// `/QuadPoints` for a document-space rectangle: top-left, top-right,
/// bottom-left, bottom-right.
pub fn quad_points(doc: Rect) -> [f64; 8] {
    let [left, bottom, right, top] = pdf_rect(doc);
    [left, top, right, top, left, bottom, right, bottom]
}

/// Inverse of [`pdf_rect`].
pub fn rect_from_pdf(values: [f64; 4]) -> Rect {
    let (x0, x1) = ordered(values[0], values[2]);
    let (y0, y1) = ordered(values[1], values[3]);
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
