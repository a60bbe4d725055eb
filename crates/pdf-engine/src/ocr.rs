//! OCR collaborator seam and the invisible text layer it feeds.
//!
//! Recognition itself is a black box behind [`OcrEngine`]. This module only
//! turns recognized words, which arrive in image pixel space, into
//! [`AnnotationKind::OcrText`] annotations in unscaled page points so the
//! baking engine can paint them as searchable text.
//!
//! [`AnnotationKind::OcrText`]: doc_model::AnnotationKind::OcrText

use doc_model::{Annotation, PageSize, Rect};
use log::debug;
use std::io::Cursor;

/// Languages tried in order when choosing a recognizer.
pub const PREFERRED_LANGUAGES: [&str; 2] = ["ko-KR", "en-US"];

/// One recognized word with its bounding box in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl OcrWord {
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { text: text.into(), x, y, width, height }
    }
}

/// A text recognizer.
///
/// Implementations must not fail loudly: an engine that cannot recognize an
/// image returns no words. Callers treat "no words" and "no engine" the same.
pub trait OcrEngine {
    /// Words found in the encoded image, in reading order.
    fn recognize(&self, image: &[u8]) -> Vec<OcrWord>;

    /// Human-readable name of the recognition language, for diagnostics.
    fn active_language(&self) -> String;
}

/// Stand-in used when no recognizer could be initialized.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableOcr;

impl OcrEngine for UnavailableOcr {
    fn recognize(&self, _image: &[u8]) -> Vec<OcrWord> {
        Vec::new()
    }

    fn active_language(&self) -> String {
        "no OCR engine available (install an OCR language pack)".to_owned()
    }
}

/// First engine `create` can build for [`PREFERRED_LANGUAGES`], then for the
/// platform default (`None`), else [`UnavailableOcr`].
pub fn select_engine<F>(create: F) -> Box<dyn OcrEngine>
where
    F: Fn(Option<&str>) -> Option<Box<dyn OcrEngine>>,
{
    for language in PREFERRED_LANGUAGES {
        if let Some(engine) = create(Some(language)) {
            return engine;
        }
        debug!("OCR language {language} unavailable");
    }

    create(None).unwrap_or_else(|| {
        debug!("no OCR engine could be created");
        Box::new(UnavailableOcr)
    })
}

/// Converts pixel-space words into `OcrText` annotations on `page`.
///
/// `image_px` is the recognized image's size in pixels; the image is assumed
/// to cover the whole page. Words without text or area are dropped.
pub fn text_layer(words: &[OcrWord], image_px: (u32, u32), page_size: PageSize, page: i32) -> Vec<Annotation> {
    let (width_px, height_px) = image_px;
    if width_px == 0 || height_px == 0 {
        return Vec::new();
    }

    let sx = f64::from(page_size.width_pt) / f64::from(width_px);
    let sy = f64::from(page_size.height_pt) / f64::from(height_px);

    words
        .iter()
        .filter(|word| !word.text.trim().is_empty() && word.width > 0.0 && word.height > 0.0)
        .map(|word| {
            let rect = Rect::new(word.x * sx, word.y * sy, word.width * sx, word.height * sy);
            Annotation::ocr_word(page, rect, word.text.clone())
        })
        .collect()
}

/// Recognized words joined by single spaces.
pub fn plain_text(words: &[OcrWord]) -> String {
    words.iter().map(|word| word.text.as_str()).collect::<Vec<_>>().join(" ")
}

/// Runs `engine` on a page image and returns the page's text layer.
/// Undecodable images yield no words.
pub fn recognize_page(engine: &dyn OcrEngine, image: &[u8], page_size: PageSize, page: i32) -> Vec<Annotation> {
    let dimensions = image::ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.into_dimensions());

    match dimensions {
        Ok(image_px) => text_layer(&engine.recognize(image), image_px, page_size, page),
        Err(err) => {
            debug!("skipping OCR for page {page}: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::AnnotationKind;
    use image::{DynamicImage, ImageFormat};

    struct FixedOcr {
        language: &'static str,
        words: Vec<OcrWord>,
    }

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _image: &[u8]) -> Vec<OcrWord> {
            self.words.clone()
        }

        fn active_language(&self) -> String {
            self.language.to_owned()
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("png should encode");
        bytes
    }

    #[test]
    fn pixel_boxes_scale_into_page_points() {
        let words = vec![OcrWord::new("안녕", 100.0, 200.0, 50.0, 20.0)];
        let page = PageSize { width_pt: 600.0, height_pt: 800.0 };

        let layer = text_layer(&words, (1200, 1600), page, 3);

        assert_eq!(layer.len(), 1);
        assert_eq!(layer[0].kind, AnnotationKind::OcrText);
        assert_eq!(layer[0].page, 3);
        assert_eq!(layer[0].content, "안녕");
        assert_eq!(layer[0].rect(), Rect::new(50.0, 100.0, 25.0, 10.0));
    }

    #[test]
    fn blank_and_degenerate_words_are_dropped() {
        let words = vec![
            OcrWord::new(" ", 0.0, 0.0, 10.0, 10.0),
            OcrWord::new("flat", 0.0, 0.0, 10.0, 0.0),
            OcrWord::new("ok", 0.0, 0.0, 10.0, 10.0),
        ];

        let layer = text_layer(&words, (100, 100), PageSize::A4, 1);

        assert_eq!(layer.len(), 1);
        assert!(text_layer(&words, (0, 100), PageSize::A4, 1).is_empty());
    }

    #[test]
    fn plain_text_joins_with_spaces() {
        let words = vec![OcrWord::new("hello", 0.0, 0.0, 1.0, 1.0), OcrWord::new("world", 0.0, 0.0, 1.0, 1.0)];
        assert_eq!(plain_text(&words), "hello world");
        assert_eq!(plain_text(&[]), "");
    }

    #[test]
    fn unavailable_engine_degrades_to_nothing() {
        let engine = UnavailableOcr;
        assert!(engine.recognize(&png(4, 4)).is_empty());
        assert!(!engine.active_language().is_empty());
    }

    #[test]
    fn recognize_page_uses_image_dimensions() {
        let engine =
            FixedOcr { language: "English", words: vec![OcrWord::new("word", 10.0, 10.0, 20.0, 10.0)] };
        let page = PageSize { width_pt: 50.0, height_pt: 50.0 };

        let layer = recognize_page(&engine, &png(100, 100), page, 1);

        assert_eq!(layer[0].rect(), Rect::new(5.0, 5.0, 10.0, 5.0));
        assert!(recognize_page(&engine, b"not an image", page, 1).is_empty());
    }

    #[test]
    fn engine_selection_follows_language_preference() {
        let english = select_engine(|language| {
            (language == Some("en-US")).then(|| {
                Box::new(FixedOcr { language: "English", words: Vec::new() }) as Box<dyn OcrEngine>
            })
        });
        assert_eq!(english.active_language(), "English");

        let nothing = select_engine(|_| None);
        assert_eq!(nothing.active_language(), UnavailableOcr.active_language());
    }
}
