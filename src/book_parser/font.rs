//! 字体加载与文字测量。
//!
//! 排版引擎只通过 [`TextMeasurer`] 获取宽度；[`FontSource`] 是它的生产实现：
//! 要么是嵌入的 TrueType 字体（`ttf-parser` 读取度量），要么是 PDF 内置的
//! Helvetica（仅 Latin-1，其余字符显示为 `?`）。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use ttf_parser::{Face, name_id};

use super::error::{GeneratorError, Result};

/// Width queries the layout engine needs from a font.
pub trait TextMeasurer {
    /// Advance width of `ch` at `font_size`, in points.
    fn char_width(&self, ch: char, font_size: f32) -> f32;

    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c, font_size)).sum()
    }

    fn line_height(&self, font_size: f32, line_spacing: f32) -> f32 {
        font_size * line_spacing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub id: u16,
    pub advance: u16,
}

/// A parsed TrueType font kept in memory for measuring and embedding.
pub struct FontFace {
    pub path: PathBuf,
    pub family: String,
    pub postscript_name: String,
    pub units_per_em: u16,
    pub cap_height: i16,
    pub ascender: i16,
    pub descender: i16,
    pub bbox: [i16; 4],
    notdef_advance: u16,
    glyphs: HashMap<char, Glyph>,
    data: Vec<u8>,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFace")
            .field("path", &self.path)
            .field("family", &self.family)
            .field("glyphs", &self.glyphs.len())
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl FontFace {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|source| GeneratorError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, data)
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Result<Self> {
        let parse_err = |reason: String| GeneratorError::FontParse {
            path: path.to_path_buf(),
            reason,
        };
        let face = Face::parse(&data, 0).map_err(|e| parse_err(e.to_string()))?;

        let units_per_em = face.units_per_em();
        if units_per_em == 0 {
            return Err(parse_err("unitsPerEm is zero".to_string()));
        }

        let family = font_name(&face, name_id::TYPOGRAPHIC_FAMILY)
            .or_else(|| font_name(&face, name_id::FAMILY))
            .unwrap_or_else(|| file_stem(path));
        let postscript_name = font_name(&face, name_id::POST_SCRIPT_NAME)
            .map(|n| pdf_name(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| pdf_name(&family));

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let Some(ch) = char::from_u32(cp) else {
                        return;
                    };
                    if glyphs.contains_key(&ch) {
                        return;
                    }
                    if let Some(gid) = subtable.glyph_index(cp)
                        && gid.0 != 0
                    {
                        let advance = face.glyph_hor_advance(gid).unwrap_or(0);
                        glyphs.insert(ch, Glyph { id: gid.0, advance });
                    }
                });
            }
        }
        if glyphs.is_empty() {
            return Err(parse_err("no unicode cmap subtable".to_string()));
        }

        let bb = face.global_bounding_box();
        let notdef_advance = face
            .glyph_hor_advance(ttf_parser::GlyphId(0))
            .unwrap_or(units_per_em / 2);
        let font = Self {
            path: path.to_path_buf(),
            family,
            postscript_name,
            units_per_em,
            cap_height: cap_height(&face),
            ascender: face.ascender(),
            descender: face.descender(),
            bbox: [bb.x_min, bb.y_min, bb.x_max, bb.y_max],
            notdef_advance,
            glyphs,
            data,
        };
        debug!(
            "字体 {} 已加载: family={}, glyphs={}, upem={}",
            path.display(),
            font.family,
            font.glyphs.len(),
            font.units_per_em
        );
        Ok(font)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn glyph(&self, ch: char) -> Option<Glyph> {
        self.glyphs.get(&ch).copied()
    }

    /// Glyph advance in PDF text-space units (1/1000 em).
    pub fn pdf_width(&self, advance: u16) -> i64 {
        (advance as i64 * 1000) / self.units_per_em as i64
    }

    /// Scales a design-unit metric to PDF text-space units.
    pub fn to_pdf_units(&self, value: i16) -> i64 {
        (value as i64 * 1000) / self.units_per_em as i64
    }

    /// Advance of glyph 0, drawn for characters the font lacks.
    pub fn notdef_advance(&self) -> u16 {
        self.notdef_advance
    }

    fn advance_em(&self, ch: char) -> f32 {
        let advance = self
            .glyph(ch)
            .map(|g| g.advance)
            .unwrap_or(self.notdef_advance);
        advance as f32 / self.units_per_em as f32
    }

    /// Cap height / units-per-em; lines spaced tighter than this overlap.
    pub fn min_line_spacing(&self) -> f32 {
        self.cap_height.max(0) as f32 / self.units_per_em as f32
    }
}

/// OS/2 tables older than version 2 carry no cap height: use the top of `H`,
/// then the ascender.
fn cap_height(face: &Face<'_>) -> i16 {
    face.capital_height()
        .filter(|h| *h > 0)
        .or_else(|| {
            face.glyph_index('H')
                .and_then(|gid| face.glyph_bounding_box(gid))
                .map(|bb| bb.y_max)
                .filter(|h| *h > 0)
        })
        .unwrap_or_else(|| face.ascender())
}

/// The font a PDF is laid out and rendered with.
#[derive(Debug, Clone, Default)]
pub enum FontSource {
    #[default]
    Builtin,
    Embedded(Arc<FontFace>),
}

impl FontSource {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::Embedded(Arc::new(FontFace::load(path)?)))
    }

    pub fn family(&self) -> &str {
        match self {
            Self::Builtin => "Helvetica",
            Self::Embedded(face) => &face.family,
        }
    }

    pub fn min_line_spacing(&self) -> f32 {
        match self {
            Self::Builtin => HELVETICA_CAP_HEIGHT as f32 / 1000.0,
            Self::Embedded(face) => face.min_line_spacing(),
        }
    }
}

impl TextMeasurer for FontSource {
    fn char_width(&self, ch: char, font_size: f32) -> f32 {
        match self {
            Self::Builtin => helvetica_width(builtin_byte(ch)) as f32 * font_size / 1000.0,
            Self::Embedded(face) => face.advance_em(ch) * font_size,
        }
    }
}

/// Title/content sizes and the effective line-spacing multiplier.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub title_size: f32,
    pub content_size: f32,
    pub line_spacing: f32,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: "Helvetica".to_string(),
            title_size: 24.0,
            content_size: 18.0,
            line_spacing: 1.2,
        }
    }
}

impl FontSpec {
    pub fn title_line(&self) -> f32 {
        self.title_size * self.line_spacing
    }

    pub fn content_line(&self) -> f32 {
        self.content_size * self.line_spacing
    }
}

/// The outcome of reconciling the requested line spacing with a font's minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSpacingAdjustment {
    pub requested: f32,
    pub minimum: f32,
    pub effective: f32,
}

impl LineSpacingAdjustment {
    pub fn raised(&self) -> bool {
        self.effective > self.requested
    }
}

pub fn reconcile_line_spacing(requested: f32, minimum: f32, family: &str) -> LineSpacingAdjustment {
    let effective = if requested < minimum { minimum } else { requested };
    let adjustment = LineSpacingAdjustment {
        requested,
        minimum,
        effective,
    };
    if adjustment.raised() {
        warn!(
            "行距 {requested} 小于字体 {family} 要求的最小值 {minimum:.3}，已提高到 {effective:.3}"
        );
    }
    adjustment
}

const HELVETICA_CAP_HEIGHT: i16 = 718;

/// Widths of Helvetica for 0x20..=0x7E, from the standard AFM.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// WinAnsi byte the builtin font renders for `ch`.
pub(crate) fn builtin_byte(ch: char) -> u8 {
    match ch as u32 {
        0x20..=0x7E => ch as u8,
        0xA0..=0xFF => ch as u8,
        // 全角空格（段首缩进）按普通空格输出
        0x3000 => b' ',
        _ => b'?',
    }
}

fn helvetica_width(byte: u8) -> u16 {
    match byte {
        0x20..=0x7E => HELVETICA_ASCII[(byte - 0x20) as usize],
        0xA0 => 278,
        _ => 556,
    }
}

fn font_name(face: &Face<'_>, id: u16) -> Option<String> {
    face.names()
        .into_iter()
        .filter(|n| n.name_id == id && n.is_unicode())
        .find_map(|n| n.to_string())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "CustomFont".to_string())
}

/// PDF name tokens: ASCII alphanumerics and `-` only.
fn pdf_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}
