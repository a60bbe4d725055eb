//! Logical font family to font program lookup.

use doc_model::EngineSettings;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// A concrete face the resolver knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaceId {
    Malgun,
    MalgunBold,
    Arial,
}

impl FaceId {
    pub fn file_name(self) -> &'static str {
        match self {
            FaceId::Malgun => "malgun.ttf",
            FaceId::MalgunBold => "malgunbd.ttf",
            FaceId::Arial => "arial.ttf",
        }
    }

    /// Name used for `/BaseFont` when the program is embedded.
    pub fn postscript_name(self) -> &'static str {
        match self {
            FaceId::Malgun => "MalgunGothic",
            FaceId::MalgunBold => "MalgunGothicBold",
            FaceId::Arial => "ArialMT",
        }
    }
}

/// Immutable family table plus the directory the programs are read from.
///
/// Construct one and hand it to whoever needs glyph data; it is cheap to
/// clone and safe to share between threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontResolver {
    font_dir: PathBuf,
}

impl FontResolver {
    pub const CJK_FAMILY: &'static str = "Malgun Gothic";

    pub fn new(font_dir: impl Into<PathBuf>) -> Self {
        Self { font_dir: font_dir.into() }
    }

    pub fn system() -> Self {
        Self::new(platform_font_dir())
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        settings.font_dir.as_ref().map(Self::new).unwrap_or_else(Self::system)
    }

    pub fn font_dir(&self) -> &Path {
        &self.font_dir
    }

    /// Case-insensitive family match. Italic has no dedicated face and
    /// resolves like the upright request.
    pub fn resolve(&self, family: &str, bold: bool, _italic: bool) -> FaceId {
        if family.trim().eq_ignore_ascii_case(Self::CJK_FAMILY) {
            if bold {
                FaceId::MalgunBold
            } else {
                FaceId::Malgun
            }
        } else {
            FaceId::Arial
        }
    }

    /// Raw font program, or an empty vector when the file is not installed.
    /// Empty means "no glyphs available"; callers degrade instead of failing.
    pub fn font_bytes(&self, face: FaceId) -> Vec<u8> {
        let path = self.font_dir.join(face.file_name());
        match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("font program {} unavailable: {err}", path.display());
                Vec::new()
            }
        }
    }
}

impl Default for FontResolver {
    fn default() -> Self {
        Self::system()
    }
}

fn platform_font_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\Windows\Fonts")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/Library/Fonts")
    } else {
        PathBuf::from("/usr/share/fonts/truetype")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_lookup_is_case_insensitive() {
        let resolver = FontResolver::new("/nonexistent");

        assert_eq!(resolver.resolve("malgun gothic", false, false), FaceId::Malgun);
        assert_eq!(resolver.resolve("MALGUN GOTHIC", true, false), FaceId::MalgunBold);
        assert_eq!(resolver.resolve("Malgun Gothic", false, true), FaceId::Malgun);
    }

    #[test]
    fn unknown_families_fall_back_to_latin_face() {
        let resolver = FontResolver::new("/nonexistent");

        assert_eq!(resolver.resolve("Comic Sans", false, false), FaceId::Arial);
        assert_eq!(resolver.resolve("", true, true), FaceId::Arial);
    }

    #[test]
    fn missing_program_yields_empty_bytes() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let resolver = FontResolver::new(temp.path());

        assert!(resolver.font_bytes(FaceId::Arial).is_empty());
    }

    #[test]
    fn reads_program_from_font_dir() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        fs::write(temp.path().join("malgunbd.ttf"), b"bold program").expect("write should succeed");
        let resolver = FontResolver::new(temp.path());

        assert_eq!(resolver.font_bytes(FaceId::MalgunBold), b"bold program".to_vec());
        assert!(resolver.font_bytes(FaceId::Malgun).is_empty());
    }

    #[test]
    fn settings_override_font_dir() {
        let settings =
            EngineSettings { font_dir: Some(PathBuf::from("/opt/fonts")), ..EngineSettings::default() };

        assert_eq!(FontResolver::from_settings(&settings).font_dir(), Path::new("/opt/fonts"));
    }
}
