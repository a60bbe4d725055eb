//! Font objects for text the engine paints itself.
//!
//! A TrueType program is embedded as a Type0 font with `Identity-H`
//! encoding, so any glyph of the face can be shown, and a `ToUnicode` map
//! keeps the text searchable. Without a usable program the standard
//! Helvetica font is referenced instead and characters outside WinAnsi turn
//! into `?`.

use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as FmtWrite;
use ttf_parser::GlyphId;

const HELVETICA_ASCENT: f32 = 0.718;

#[derive(Debug, Clone)]
enum Encoding {
    Identity { glyphs: BTreeMap<char, u16> },
    WinAnsi,
}

#[derive(Debug, Clone)]
pub(crate) struct PdfFont {
    pub(crate) id: ObjectId,
    /// Ascender as a fraction of the font size.
    pub(crate) ascent: f32,
    encoding: Encoding,
}

impl PdfFont {
    /// Embeds `program` covering the characters of `text`, falling back to
    /// Helvetica when the program is empty or unparsable.
    pub(crate) fn embed(doc: &mut Document, program: &[u8], base_name: &str, text: &str) -> Self {
        if program.is_empty() {
            debug!("no font program for {base_name}; using Helvetica");
            return Self::standard(doc);
        }

        match ttf_parser::Face::parse(program, 0) {
            Ok(face) => Self::embed_face(doc, &face, program, base_name, text),
            Err(err) => {
                warn!("font program for {base_name} is unusable ({err}); using Helvetica");
                Self::standard(doc)
            }
        }
    }

    pub(crate) fn standard(doc: &mut Document) -> Self {
        let id = doc.add_object(helvetica());
        Self { id, ascent: HELVETICA_ASCENT, encoding: Encoding::WinAnsi }
    }

    pub(crate) fn is_embedded(&self) -> bool {
        matches!(self.encoding, Encoding::Identity { .. })
    }

    /// String operand for `Tj`.
    pub(crate) fn encode(&self, text: &str) -> Object {
        match &self.encoding {
            Encoding::Identity { glyphs } => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                for ch in text.chars() {
                    let gid = glyphs.get(&ch).copied().unwrap_or(0);
                    bytes.extend_from_slice(&gid.to_be_bytes());
                }
                Object::String(bytes, StringFormat::Hexadecimal)
            }
            Encoding::WinAnsi => {
                let bytes = text
                    .chars()
                    .map(|ch| match u8::try_from(u32::from(ch)) {
                        Ok(byte) if !ch.is_control() => byte,
                        _ => b'?',
                    })
                    .collect();
                Object::String(bytes, StringFormat::Literal)
            }
        }
    }

    fn embed_face(
        doc: &mut Document,
        face: &ttf_parser::Face<'_>,
        program: &[u8],
        base_name: &str,
        text: &str,
    ) -> Self {
        let units = f32::from(face.units_per_em().max(1));
        let to_pdf = |value: f32| (value * 1000.0 / units).round() as i64;

        let mut glyphs = BTreeMap::new();
        for ch in text.chars().collect::<BTreeSet<_>>() {
            let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
            glyphs.insert(ch, gid);
        }

        let mut widths = Vec::new();
        let used: BTreeSet<u16> = glyphs.values().copied().filter(|gid| *gid != 0).collect();
        for gid in used {
            let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
            widths.push(Object::Integer(i64::from(gid)));
            widths.push(Object::Array(vec![Object::Integer(to_pdf(f32::from(advance)))]));
        }

        let bbox = face.global_bounding_box();
        let ascender = f32::from(face.ascender());
        let descender = f32::from(face.descender());
        let cap_height = face.capital_height().map(f32::from).unwrap_or(ascender);

        let file_id = doc.add_object(Stream::new(
            dictionary! { "Length1" => program.len() as i64 },
            program.to_vec(),
        ));
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => base_name,
            "Flags" => 4,
            "FontBBox" => vec![
                Object::Integer(to_pdf(f32::from(bbox.x_min))),
                Object::Integer(to_pdf(f32::from(bbox.y_min))),
                Object::Integer(to_pdf(f32::from(bbox.x_max))),
                Object::Integer(to_pdf(f32::from(bbox.y_max))),
            ],
            "ItalicAngle" => 0,
            "Ascent" => to_pdf(ascender),
            "Descent" => to_pdf(descender),
            "CapHeight" => to_pdf(cap_height),
            "StemV" => 80,
            "FontFile2" => file_id,
        });
        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => base_name,
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });
        let to_unicode_id =
            doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&glyphs).into_bytes()));
        let id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => base_name,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        });

        Self { id, ascent: ascender / units, encoding: Encoding::Identity { glyphs } }
    }
}

pub(crate) fn helvetica() -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

fn to_unicode_cmap(glyphs: &BTreeMap<char, u16>) -> String {
    let mut by_gid: BTreeMap<u16, char> = BTreeMap::new();
    for (ch, gid) in glyphs {
        if *gid != 0 {
            by_gid.entry(*gid).or_insert(*ch);
        }
    }

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<_> = by_gid.into_iter().collect();
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String =
                ch.encode_utf16(&mut units).iter().map(|unit| format!("{unit:04X}")).collect();
            let _ = writeln!(cmap, "<{gid:04X}> <{hex}>");
        }
        let _ = writeln!(cmap, "endbfchar");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}
