//! 基于 lopdf 的 PDF 输出端。
//!
//! 每个打开的文件对应一个内存中的 `lopdf::Document`；关闭时补齐页树、字体
//! 与文档信息后写盘。嵌入字体走 Type0/CIDFontType2 + Identity-H，正文以
//! 两字节字形号写入；内置字体用 Helvetica + WinAnsiEncoding。

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, warn};

use super::error::{GeneratorError, Result};
use super::font::{FontFace, FontSource, builtin_byte};
use super::geometry::PageGeometry;
use super::layout::{DocumentInfo, PageSink, TextRun};

const FONT_RESOURCE: &str = "F1";
const PRODUCER: &str = concat!("ebook-press ", env!("CARGO_PKG_VERSION"));

/// One PDF being assembled.
struct PdfFile {
    doc: Document,
    geometry: PageGeometry,
    pages_id: ObjectId,
    font_id: ObjectId,
    resources_id: ObjectId,
    page_ids: Vec<ObjectId>,
    page: Option<Content>,
    /// Glyphs drawn with the embedded font, for `/W` and `/ToUnicode`.
    used_glyphs: BTreeMap<u16, char>,
    notdef_used: bool,
}

impl PdfFile {
    fn new(geometry: PageGeometry, font: &FontSource) -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.new_object_id();
        if matches!(font, FontSource::Builtin) {
            doc.objects.insert(
                font_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                }),
            );
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { FONT_RESOURCE => font_id },
        });
        Self {
            doc,
            geometry,
            pages_id,
            font_id,
            resources_id,
            page_ids: Vec::new(),
            page: None,
            used_glyphs: BTreeMap::new(),
            notdef_used: false,
        }
    }

    fn encode_text(&mut self, font: &FontSource, text: &str) -> Object {
        match font {
            FontSource::Builtin => {
                let bytes = text.chars().map(builtin_byte).collect();
                Object::String(bytes, StringFormat::Literal)
            }
            FontSource::Embedded(face) => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                for ch in text.chars() {
                    let gid = match face.glyph(ch) {
                        Some(glyph) => {
                            self.used_glyphs.entry(glyph.id).or_insert(ch);
                            glyph.id
                        }
                        None => {
                            debug!("字体 {} 缺少字符 {:?}", face.family, ch);
                            self.notdef_used = true;
                            0
                        }
                    };
                    bytes.extend_from_slice(&gid.to_be_bytes());
                }
                Object::String(bytes, StringFormat::Hexadecimal)
            }
        }
    }

    fn finish_page(&mut self) -> Result<()> {
        let Some(content) = self.page.take() else {
            return Ok(());
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));
        let g = self.geometry;
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), g.page_width.into(), g.page_height.into()],
            "Contents" => content_id,
            "Resources" => self.resources_id,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    fn finish(mut self, font: &FontSource, path: &Path, info: &DocumentInfo) -> Result<()> {
        self.finish_page()?;
        if let FontSource::Embedded(face) = font {
            embed_font(&mut self.doc, self.font_id, face, &self.used_glyphs, self.notdef_used);
        }

        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::from(*id)).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        let info_id = self.doc.add_object(info_dictionary(info));
        self.doc.trailer.set("Info", info_id);
        self.doc.compress();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| GeneratorError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| GeneratorError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.doc
            .save_to(&mut writer)
            .map_err(|e| GeneratorError::Save {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        writer.flush().map_err(|e| GeneratorError::io(path, e))?;
        debug!("PDF 已保存: {} ({} 页)", path.display(), self.page_ids.len());
        Ok(())
    }
}

/// [`PageSink`] that writes each file as a standalone PDF.
pub struct PdfSink {
    font: FontSource,
    file: Option<PdfFile>,
}

impl PdfSink {
    pub fn new(font: FontSource) -> Self {
        Self { font, file: None }
    }

    pub fn font(&self) -> &FontSource {
        &self.font
    }

    fn file_mut(&mut self) -> Result<&mut PdfFile> {
        self.file.as_mut().ok_or(GeneratorError::NotStarted)
    }
}

impl PageSink for PdfSink {
    fn open_file(&mut self, geometry: &PageGeometry) -> Result<()> {
        if self.file.is_some() {
            warn!("上一个 PDF 尚未关闭，已丢弃");
        }
        self.file = Some(PdfFile::new(*geometry, &self.font));
        Ok(())
    }

    fn open_page(&mut self) -> Result<()> {
        let file = self.file_mut()?;
        file.finish_page()?;
        file.page = Some(Content { operations: vec![] });
        Ok(())
    }

    fn draw_text(&mut self, run: &TextRun<'_>) {
        let font = self.font.clone();
        let Some(file) = self.file.as_mut() else {
            warn!("没有打开的页面，丢弃文本: {}", run.text);
            return;
        };
        let encoded = file.encode_text(&font, run.text);
        let baseline = file.geometry.page_height - run.top - run.font_size;
        let Some(content) = file.page.as_mut() else {
            warn!("没有打开的页面，丢弃文本: {}", run.text);
            return;
        };
        content.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![FONT_RESOURCE.into(), run.font_size.into()]),
            Operation::new("Td", vec![run.x.into(), baseline.into()]),
            Operation::new("Tj", vec![encoded]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn close_page(&mut self) -> Result<()> {
        self.file_mut()?.finish_page()
    }

    fn close_file(&mut self, path: &Path, info: &DocumentInfo) -> Result<()> {
        let file = self.file.take().ok_or(GeneratorError::NotStarted)?;
        file.finish(&self.font, path, info)
    }
}

fn embed_font(
    doc: &mut Document,
    font_id: ObjectId,
    face: &Arc<FontFace>,
    used: &BTreeMap<u16, char>,
    notdef_used: bool,
) {
    let data = face.data().to_vec();
    let length1 = data.len() as i64;
    let font_file_id = doc.add_object(Stream::new(dictionary! { "Length1" => length1 }, data));

    let name = face.postscript_name.clone();
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(name.clone().into_bytes()),
        "Flags" => 32,
        "FontBBox" => face.bbox.iter().map(|v| Object::Integer(face.to_pdf_units(*v))).collect::<Vec<_>>(),
        "ItalicAngle" => 0,
        "Ascent" => face.to_pdf_units(face.ascender),
        "Descent" => face.to_pdf_units(face.descender),
        "CapHeight" => face.to_pdf_units(face.cap_height),
        "StemV" => 80,
        "FontFile2" => font_file_id,
    });

    // 缺字画成 0 号字形，宽度要和排版时量的一致
    let mut widths = Vec::with_capacity(used.len() * 2 + 2);
    if notdef_used {
        widths.push(Object::Integer(0));
        widths.push(Object::Array(vec![Object::Integer(face.pdf_width(face.notdef_advance()))]));
    }
    for (gid, ch) in used {
        let advance = face.glyph(*ch).map(|g| g.advance).unwrap_or(0);
        widths.push(Object::Integer(*gid as i64));
        widths.push(Object::Array(vec![Object::Integer(face.pdf_width(advance))]));
    }

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => Object::Name(name.clone().into_bytes()),
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

    let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(used).into_bytes()));

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(name.into_bytes()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::from(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        }),
    );
}

fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> String {
    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<(&u16, &char)> = used.iter().collect();
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            out.push_str(&format!("<{gid:04X}> <{hex}>\n"));
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out
}

/// PDF text string: UTF-16BE with BOM, so CJK titles survive.
fn text_string(s: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn info_dictionary(info: &DocumentInfo) -> Dictionary {
    let created = OffsetDateTime::now_utc()
        .format(format_description!("D:[year][month][day][hour][minute][second]Z"))
        .unwrap_or_default();
    dictionary! {
        "Title" => text_string(&info.title),
        "Producer" => Object::string_literal(PRODUCER),
        "CreationDate" => Object::string_literal(created),
    }
}
