//! 统一的电子书生成器接口。
//!
//! `EbookGenerator` 按输出格式分派到 [`PdfBook`] 或 [`EpubBook`]；调用顺序为
//! 若干 `configure_*` → `begin` → `append_chapter`* → `end`。

use std::path::{Path, PathBuf};
use std::str::FromStr;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

use super::epub_generator::EpubBook;
use super::error::{GeneratorError, Result};
use super::font::{FontSource, FontSpec, LineSpacingAdjustment, reconcile_line_spacing};
use super::geometry::{PageGeometry, PagePreset};
use super::layout::{DocumentInfo, LayoutSettings, LayoutSummary, PaginationEngine};
use super::merger::{DocumentMerger, MergePolicy, MergeReport};
use super::pdf_sink::PdfSink;
use super::splitter::{FileSplitter, OutputNaming, SplitPolicy};
use crate::base_system::context::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Epub,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "epub" => Ok(Self::Epub),
            other => Err(format!("unsupported format '{other}'")),
        }
    }
}

/// What `end()` produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub files: Vec<PathBuf>,
    pub failed_parts: Vec<PathBuf>,
    pub pages: usize,
    pub chapters: usize,
    pub merge: Option<MergeReport>,
}

impl From<LayoutSummary> for GenerationReport {
    fn from(summary: LayoutSummary) -> Self {
        Self {
            files: summary.files,
            failed_parts: summary.failed_parts,
            pages: summary.pages,
            chapters: summary.chapters,
            merge: None,
        }
    }
}

pub struct PdfBook {
    preset: PagePreset,
    geometry: PageGeometry,
    font: FontSource,
    font_spec: FontSpec,
    requested_spacing: f32,
    split: SplitPolicy,
    merge: bool,
    merge_policy: MergePolicy,
    write_cover: bool,
    title: String,
    save_dir: PathBuf,
    output_override: Option<PathBuf>,
    engine: Option<PaginationEngine<FontSource, PdfSink>>,
}

impl PdfBook {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        let font_spec = FontSpec::default();
        Self {
            preset: PagePreset::lookup("a4"),
            geometry: PageGeometry::default(),
            font: FontSource::Builtin,
            requested_spacing: font_spec.line_spacing,
            font_spec,
            split: SplitPolicy::default(),
            merge: false,
            merge_policy: MergePolicy::default(),
            write_cover: false,
            title: String::new(),
            save_dir: save_dir.into(),
            output_override: None,
            engine: None,
        }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    pub fn font_spec(&self) -> &FontSpec {
        &self.font_spec
    }

    pub fn split_policy(&self) -> SplitPolicy {
        self.split
    }

    /// Page size by identifier; device presets may also set margins and sizes.
    pub fn configure_page(&mut self, page_type: &str) -> Result<()> {
        let preset = PagePreset::lookup(page_type);
        self.geometry = PageGeometry::from_preset(
            &preset,
            self.geometry.left_margin,
            self.geometry.top_margin,
        )?;
        if let Some((title, content)) = preset.font_sizes {
            self.configure_font_size(title, content)?;
        }
        debug!(
            "纸张 {}: {}x{}",
            preset.page_type, self.geometry.page_width, self.geometry.page_height
        );
        self.preset = preset;
        Ok(())
    }

    pub fn configure_margins(&mut self, left: f32, top: f32) -> Result<()> {
        self.geometry = self.geometry.with_margins(left, top)?;
        Ok(())
    }

    /// Loads a TrueType font (or the builtin one for `None`) and re-checks
    /// the line spacing against its minimum.
    pub fn configure_font(&mut self, path: Option<&Path>) -> Result<LineSpacingAdjustment> {
        self.font = match path {
            Some(p) => FontSource::load(p)?,
            None => FontSource::Builtin,
        };
        self.font_spec.family = self.font.family().to_string();
        Ok(self.apply_line_spacing())
    }

    pub fn configure_font_size(&mut self, title: u32, content: u32) -> Result<()> {
        if title == 0 || content == 0 {
            return Err(GeneratorError::InvalidFontSize { title, content });
        }
        self.font_spec.title_size = title as f32;
        self.font_spec.content_size = content as f32;
        Ok(())
    }

    pub fn configure_line_spacing(&mut self, multiplier: f32) -> Result<LineSpacingAdjustment> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(GeneratorError::InvalidLineSpacing(multiplier));
        }
        self.requested_spacing = multiplier;
        Ok(self.apply_line_spacing())
    }

    fn apply_line_spacing(&mut self) -> LineSpacingAdjustment {
        let adjustment = reconcile_line_spacing(
            self.requested_spacing,
            self.font.min_line_spacing(),
            self.font.family(),
        );
        self.font_spec.line_spacing = adjustment.effective;
        adjustment
    }

    pub fn configure_split(&mut self, pages_per_file: usize, chapters_per_file: usize) {
        self.split = SplitPolicy::new(pages_per_file, chapters_per_file);
    }

    pub fn configure_merge(&mut self, enabled: bool, policy: MergePolicy) {
        self.merge = enabled;
        self.merge_policy = policy;
    }

    pub fn set_write_cover(&mut self, enabled: bool) {
        self.write_cover = enabled;
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.output_override = Some(path.into());
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn naming(&self) -> OutputNaming {
        let mut naming = OutputNaming::new(&self.save_dir, &self.title, &self.preset.page_type, "pdf");
        naming.output_override = self.output_override.clone();
        naming
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Err(GeneratorError::AlreadyStarted);
        }
        let settings = LayoutSettings {
            geometry: self.geometry,
            font: self.font_spec.clone(),
            write_cover: self.write_cover,
        };
        let info = DocumentInfo {
            title: self.title.clone(),
            generated_at: today(),
        };
        let splitter = FileSplitter::new(self.split, self.naming());
        let mut engine = PaginationEngine::new(
            settings,
            self.font.clone(),
            PdfSink::new(self.font.clone()),
            splitter,
            info,
        );
        engine.begin()?;
        info!(
            "开始生成 PDF《{}》: {} 字号 {}/{} 行距 {:.2}",
            self.title,
            self.preset.page_type,
            self.font_spec.title_size,
            self.font_spec.content_size,
            self.font_spec.line_spacing
        );
        self.engine = Some(engine);
        Ok(())
    }

    pub fn append_chapter(&mut self, title: &str, source_url: &str, html: &str) -> Result<()> {
        self.engine
            .as_mut()
            .ok_or(GeneratorError::NotStarted)?
            .append_chapter(title, source_url, html)
    }

    pub fn end(&mut self) -> Result<GenerationReport> {
        let mut engine = self.engine.take().ok_or(GeneratorError::NotStarted)?;
        let mut report = GenerationReport::from(engine.end()?);

        if self.merge && self.split.is_splitting() {
            // 只合并本次写出的分卷，磁盘上旧的同名分卷不算
            let merged = DocumentMerger::new(self.merge_policy).merge_written(
                &report.files,
                &report.failed_parts,
                &self.naming(),
            )?;
            report.files = vec![merged.target.clone()];
            report.merge = Some(merged);
        }
        Ok(report)
    }
}

fn today() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

pub enum EbookGenerator {
    Pdf(PdfBook),
    Epub(EpubBook),
}

impl EbookGenerator {
    pub fn new(format: OutputFormat, save_dir: impl Into<PathBuf>) -> Self {
        match format {
            OutputFormat::Pdf => Self::Pdf(PdfBook::new(save_dir)),
            OutputFormat::Epub => Self::Epub(EpubBook::new(save_dir)),
        }
    }

    /// Builds and configures a generator from the loaded configuration.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let format = OutputFormat::from_str(&cfg.format).unwrap_or_else(|e| {
            warn!("{e}，使用 pdf");
            OutputFormat::Pdf
        });
        let mut generator = Self::new(format, cfg.default_save_dir());
        generator.configure_margins(cfg.left_margin, cfg.top_margin)?;
        generator.configure_font_size(cfg.title_font_size, cfg.content_font_size)?;
        generator.configure_page(&cfg.page_type)?;
        generator.configure_line_spacing(cfg.line_spacing)?;
        generator.configure_font(cfg.font_path().as_deref())?;
        generator.configure_split(cfg.pages_per_file, cfg.chapters_per_file);
        generator.configure_merge(cfg.merge_after_split, cfg.merge_policy);
        if let Self::Pdf(book) = &mut generator {
            book.set_write_cover(cfg.write_cover);
        }
        Ok(generator)
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            Self::Pdf(_) => OutputFormat::Pdf,
            Self::Epub(_) => OutputFormat::Epub,
        }
    }

    pub fn configure_page(&mut self, page_type: &str) -> Result<()> {
        match self {
            Self::Pdf(book) => book.configure_page(page_type),
            Self::Epub(_) => Ok(()),
        }
    }

    pub fn configure_margins(&mut self, left: f32, top: f32) -> Result<()> {
        match self {
            Self::Pdf(book) => book.configure_margins(left, top),
            Self::Epub(_) => Ok(()),
        }
    }

    /// For EPUB the font is embedded as-is and no spacing is reconciled.
    pub fn configure_font(&mut self, path: Option<&Path>) -> Result<Option<LineSpacingAdjustment>> {
        match self {
            Self::Pdf(book) => book.configure_font(path).map(Some),
            Self::Epub(book) => {
                if let Some(p) = path {
                    book.set_font_file(p)?;
                }
                Ok(None)
            }
        }
    }

    pub fn configure_font_size(&mut self, title: u32, content: u32) -> Result<()> {
        match self {
            Self::Pdf(book) => book.configure_font_size(title, content),
            Self::Epub(_) => Ok(()),
        }
    }

    pub fn configure_line_spacing(&mut self, multiplier: f32) -> Result<Option<LineSpacingAdjustment>> {
        match self {
            Self::Pdf(book) => book.configure_line_spacing(multiplier).map(Some),
            Self::Epub(_) => Ok(None),
        }
    }

    pub fn configure_split(&mut self, pages_per_file: usize, chapters_per_file: usize) {
        match self {
            Self::Pdf(book) => book.configure_split(pages_per_file, chapters_per_file),
            Self::Epub(_) => {
                if pages_per_file > 0 || chapters_per_file > 0 {
                    debug!("EPUB 不支持分卷，忽略");
                }
            }
        }
    }

    pub fn configure_merge(&mut self, enabled: bool, policy: MergePolicy) {
        if let Self::Pdf(book) = self {
            book.configure_merge(enabled, policy);
        }
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        match self {
            Self::Pdf(book) => book.set_output_path(path),
            Self::Epub(book) => book.set_output_path(path),
        }
    }

    pub fn set_title(&mut self, title: &str) {
        match self {
            Self::Pdf(book) => book.set_title(title),
            Self::Epub(book) => book.set_title(title),
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        match self {
            Self::Pdf(book) => book.begin(),
            Self::Epub(book) => book.begin(),
        }
    }

    pub fn append_chapter(&mut self, title: &str, source_url: &str, html: &str) -> Result<()> {
        match self {
            Self::Pdf(book) => book.append_chapter(title, source_url, html),
            Self::Epub(book) => book.append_chapter(title, source_url, html),
        }
    }

    pub fn end(&mut self) -> Result<GenerationReport> {
        match self {
            Self::Pdf(book) => book.end(),
            Self::Epub(book) => {
                let chapters = book.chapter_count();
                let path = book.end()?;
                Ok(GenerationReport {
                    files: vec![path],
                    chapters,
                    ..GenerationReport::default()
                })
            }
        }
    }
}
