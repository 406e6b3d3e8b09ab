//! EPUB 生成器。
//!
//! 与 PDF 共用同一套生成器接口；版式相关的配置（纸张、边距、字号、分卷）
//! 对 EPUB 没有意义，调用方传入后直接忽略。

use std::fs;
use std::io::{Cursor, Read as _, Write as _};
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use tracing::{debug, info};

use super::error::{GeneratorError, Result};
use super::html_utils::{escape_html, normalize_content};
use crate::base_system::context::safe_fs_name;

/// 用于从书名确定性生成 UUID v5 的命名空间。
/// 同一书名重复生成时 dc:identifier 不变，阅读器能识别为同一本书。
const EPUB_UUID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

const GENERATOR: &str = concat!("ebook-press ", env!("CARGO_PKG_VERSION"));

const BASE_CSS: &str = "body { font-family: %FONT%; font-size: 1.0em; margin: 0 5px; }
h2 { font-family: %FONT%; font-size: 1.5em; font-weight: bold; margin: 0; line-height: 1.5em; }
p { font-family: %FONT%; font-size: 1.0em; text-indent: 2.0em; line-height: 1.2em; margin-top: 0; margin-bottom: 0; }
a { color: inherit; text-decoration: inherit; }";

fn epub_err(e: impl std::fmt::Display) -> GeneratorError {
    GeneratorError::Epub(e.to_string())
}

pub fn book_uuid(title: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&EPUB_UUID_NAMESPACE, title.as_bytes())
}

pub struct EpubBook {
    title: String,
    save_dir: PathBuf,
    output_override: Option<PathBuf>,
    font_file: Option<PathBuf>,
    chapters: Vec<(String, String)>,
    started: bool,
}

impl EpubBook {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            title: String::new(),
            save_dir: save_dir.into(),
            output_override: None,
            font_file: None,
            chapters: Vec::new(),
            started: false,
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.output_override = Some(path.into());
    }

    /// Embeds `path` and uses it for all text. The file must be readable now.
    pub fn set_font_file(&mut self, path: &Path) -> Result<()> {
        fs::metadata(path).map_err(|source| GeneratorError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        self.font_file = Some(path.to_path_buf());
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.output_override {
            Some(p) => p.clone(),
            None => self
                .save_dir
                .join(format!("{}.epub", safe_fs_name(&self.title, "_", 120))),
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.started {
            return Err(GeneratorError::AlreadyStarted);
        }
        self.chapters.clear();
        self.started = true;
        Ok(())
    }

    pub fn append_chapter(&mut self, title: &str, source_url: &str, html: &str) -> Result<()> {
        if !self.started {
            return Err(GeneratorError::NotStarted);
        }
        let file_name = format!("chapter_{:05}.xhtml", self.chapters.len() + 1);
        debug!("EPUB 章节 {} <- {}", title, source_url);
        self.chapters.push((file_name, chapter_xhtml(title, html)));
        Ok(())
    }

    pub fn end(&mut self) -> Result<PathBuf> {
        if !self.started {
            return Err(GeneratorError::NotStarted);
        }
        self.started = false;

        let zip = ZipLibrary::new().map_err(epub_err)?;
        let mut book = EpubBuilder::new(zip).map_err(epub_err)?;
        book.epub_version(EpubVersion::V30);
        book.set_uuid(book_uuid(&self.title));
        book.metadata("title", self.title.as_str()).map_err(epub_err)?;
        book.metadata("toc_name", self.title.as_str()).map_err(epub_err)?;
        book.metadata("lang", "zh").map_err(epub_err)?;
        book.metadata("generator", GENERATOR).map_err(epub_err)?;

        let font_family = match &self.font_file {
            Some(path) => {
                let bytes = fs::read(path).map_err(|source| GeneratorError::FontRead {
                    path: path.clone(),
                    source,
                })?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "font.ttf".to_string());
                let resource = format!("fonts/{name}");
                book.add_resource(&resource, Cursor::new(bytes), font_mime(&name))
                    .map_err(epub_err)?;
                Some(resource)
            }
            None => None,
        };
        // 使用 stylesheet() 而非 add_resource()，防止 epub-builder 自动创建空的 stylesheet.css。
        book.stylesheet(Cursor::new(stylesheet(font_family.as_deref())))
            .map_err(epub_err)?;

        for (file_name, html) in &self.chapters {
            book.add_content(
                EpubContent::new(file_name.clone(), Cursor::new(html.clone()))
                    .title(title_from_html(html).unwrap_or_else(|| file_name.clone()))
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_err)?;
        }

        let mut buffer = Vec::new();
        book.generate(&mut buffer).map_err(epub_err)?;
        let buffer = self.fixup_package(buffer)?;

        let output = self.output_path();
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| GeneratorError::io(parent, e))?;
        }
        fs::write(&output, buffer).map_err(|e| GeneratorError::io(&output, e))?;
        info!("EPUB 已写出: {} ({} 章)", output.display(), self.chapters.len());
        Ok(output)
    }

    /// 后处理 EPUB zip：
    /// 1. 在 toc.ncx 的 `<head>` 中补充 `dtb:uid`（epub-builder 模板未包含此项）
    /// 2. 移除 com.apple.ibooks.display-options.xml，避免阅读器误判内嵌字体
    fn fixup_package(&self, epub_bytes: Vec<u8>) -> Result<Vec<u8>> {
        let urn = format!("urn:uuid:{}", book_uuid(&self.title).hyphenated());
        let dtb_uid_meta = format!("<meta name=\"dtb:uid\" content=\"{urn}\" />");

        let mut archive = zip::ZipArchive::new(Cursor::new(epub_bytes)).map_err(epub_err)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(epub_err)?;
            let name = entry.name().to_string();
            let compression = entry.compression();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(epub_err)?;
            entries.push((name, compression, data));
        }
        drop(archive);

        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut out);
            for (name, compression, data) in entries {
                if name.contains("com.apple.ibooks.display-options") {
                    continue;
                }
                let options = zip::write::FileOptions::default().compression_method(compression);
                writer.start_file(&name, options).map_err(epub_err)?;
                let data = if name.ends_with("toc.ncx") {
                    match String::from_utf8(data) {
                        Ok(text) if !text.contains("dtb:uid") => text
                            .replace(
                                "<meta name=\"dtb:depth\"",
                                &format!("{dtb_uid_meta}\n    <meta name=\"dtb:depth\""),
                            )
                            .into_bytes(),
                        Ok(text) => text.into_bytes(),
                        Err(e) => e.into_bytes(),
                    }
                } else {
                    data
                };
                writer.write_all(&data).map_err(epub_err)?;
            }
            writer.finish().map_err(epub_err)?;
        }
        Ok(out.into_inner())
    }
}

fn font_mime(name: &str) -> &'static str {
    if name.to_ascii_lowercase().ends_with(".otf") {
        "font/otf"
    } else {
        "font/ttf"
    }
}

fn stylesheet(font_resource: Option<&str>) -> String {
    match font_resource {
        Some(resource) => {
            let face = format!(
                "@font-face {{ font-family: \"CustomFont\"; src: url({resource}); }}\n"
            );
            face + &BASE_CSS.replace("%FONT%", "\"CustomFont\"")
        }
        None => BASE_CSS.replace("%FONT%", "serif"),
    }
}

fn chapter_xhtml(title: &str, html: &str) -> String {
    let escaped_title = escape_html(title);
    let body: String = normalize_content(html)
        .lines()
        .map(|line| format!("<p>{}</p>\n", escape_html(line)))
        .collect();
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"zh\" xml:lang=\"zh\">\n  <head>\n    <title>{escaped_title}</title>\n    <link href=\"stylesheet.css\" rel=\"stylesheet\" type=\"text/css\"/>\n  </head>\n  <body><h2>{escaped_title}</h2>\n{body}  </body>\n</html>"
    )
}

fn title_from_html(html: &str) -> Option<String> {
    let start = html.find("<title>")? + "<title>".len();
    let end = html[start..].find("</title>")?;
    let raw = html[start..start + end].trim();
    if raw.is_empty() {
        None
    } else {
        Some(crate::book_parser::html_utils::unescape_basic_entities(raw).into_owned())
    }
}
