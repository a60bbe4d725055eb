use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque annotation identifier, stable across saves.
///
/// Freshly created annotations get a UUID v4; identifiers read back from a
/// sidecar or a native `/NM` entry are kept verbatim whatever their shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for AnnotationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AnnotationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    #[serde(rename = "HIGHLIGHT")]
    Highlight,
    #[serde(rename = "HIGHLIGHT_CIR")]
    HighlightCircle,
    #[serde(rename = "UNDERLINE")]
    Underline,
    #[serde(rename = "TEXT")]
    FreeText,
    /// Recognized word from the OCR collaborator. Never user-created and never
    /// written to the sidecar; it is regenerated from the page image.
    #[serde(rename = "OCR_TEXT")]
    OcrText,
}

impl AnnotationKind {
    pub fn is_editable(self) -> bool {
        !matches!(self, AnnotationKind::OcrText)
    }
}

/// Axis-aligned rectangle. The origin convention depends on the caller; the
/// model itself always stores unscaled top-left page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Display-space rectangle for a page shown at `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        let scale = sanitize_scale(scale);
        Self::new(self.x * scale, self.y * scale, self.width * scale, self.height * scale)
    }

    /// Inverse of [`Rect::scaled`]: strips the display scale.
    pub fn unscaled(&self, scale: f64) -> Self {
        let scale = sanitize_scale(scale);
        Self::new(self.x / scale, self.y / scale, self.width / scale, self.height / scale)
    }
}

pub(crate) fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColorError {
    #[error("color {0:?} must be six hex digits, optionally prefixed with '#'")]
    InvalidLength(String),
    #[error("color {0:?} contains non-hex digits")]
    InvalidDigit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    pub const YELLOW: Rgb = Rgb { r: 255, g: 255, b: 0 };
    pub const ORANGE: Rgb = Rgb { r: 255, g: 165, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_hex(value: &str) -> Result<Self, ColorError> {
        let digits = value.strip_prefix('#').unwrap_or(value);
        if digits.len() != 6 {
            return Err(ColorError::InvalidLength(value.to_owned()));
        }
        if !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(ColorError::InvalidDigit(value.to_owned()));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| ColorError::InvalidDigit(value.to_owned()))
        };

        Ok(Self { r: channel(0..2)?, g: channel(2..4)?, b: channel(4..6)? })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Channels mapped to `[0, 1]`, the form PDF color operators expect.
    pub fn normalized(self) -> [f32; 3] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0]
    }

    /// Nearest color for normalized channels; out-of-range input is clamped.
    pub fn from_normalized(channels: [f32; 3]) -> Self {
        let to_byte = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self { r: to_byte(channels[0]), g: to_byte(channels[1]), b: to_byte(channels[2]) }
    }
}

fn default_color() -> String {
    Rgb::BLACK.to_hex()
}

fn default_font_size() -> f64 {
    Annotation::DEFAULT_FONT_SIZE
}

/// One user-placed mark.
///
/// Serialized field names are the sidecar's wire names. Decoding also accepts
/// the PascalCase names written by earlier SmartDoc builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(alias = "Id", default)]
    pub id: AnnotationId,
    #[serde(rename = "type", alias = "Type")]
    pub kind: AnnotationKind,
    #[serde(alias = "Content", default)]
    pub content: String,
    #[serde(alias = "X")]
    pub x: f64,
    #[serde(alias = "Y")]
    pub y: f64,
    #[serde(alias = "Width")]
    pub width: f64,
    #[serde(alias = "Height")]
    pub height: f64,
    /// 1-based. Signed so that a bogus index decodes and is dropped at bake
    /// time instead of invalidating the whole sidecar.
    #[serde(alias = "Page")]
    pub page: i32,
    #[serde(alias = "Color", default = "default_color")]
    pub color: String,
    #[serde(rename = "fontSize", alias = "FontSize", default = "default_font_size")]
    pub font_size: f64,
}

impl Annotation {
    pub const DEFAULT_FONT_SIZE: f64 = 16.0;

    pub fn new(kind: AnnotationKind, page: i32, rect: Rect) -> Self {
        Self {
            id: AnnotationId::new(),
            kind,
            content: String::new(),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            page,
            color: default_color(),
            font_size: Self::DEFAULT_FONT_SIZE,
        }
    }

    pub fn free_text(page: i32, rect: Rect, content: impl Into<String>, color: Rgb, font_size: f64) -> Self {
        Self {
            content: content.into(),
            color: color.to_hex(),
            font_size,
            ..Self::new(AnnotationKind::FreeText, page, rect)
        }
    }

    pub fn ocr_word(page: i32, rect: Rect, text: impl Into<String>) -> Self {
        Self { content: text.into(), ..Self::new(AnnotationKind::OcrText, page, rect) }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.x = rect.x;
        self.y = rect.y;
        self.width = rect.width;
        self.height = rect.height;
    }

    pub fn is_editable(&self) -> bool {
        self.kind.is_editable()
    }

    pub fn rgb(&self) -> Result<Rgb, ColorError> {
        Rgb::from_hex(&self.color)
    }
}
