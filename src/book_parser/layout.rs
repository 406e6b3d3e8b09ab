//! 分页排版引擎。
//!
//! 章节按顺序流入 [`PaginationEngine`]：逐字测量换行、页满换页、达到阈值时
//! 关闭当前文件并开启下一卷。引擎本身不知道输出格式，所有绘制都交给
//! [`PageSink`]。

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::error::{GeneratorError, Result};
use super::font::{FontSpec, TextMeasurer};
use super::geometry::PageGeometry;
use super::html_utils::indented_paragraphs;
use super::splitter::FileSplitter;

const COVER_TITLE_SIZE: f32 = 48.0;
const COVER_SUBTITLE_SIZE: f32 = 20.0;
/// Float slack when comparing accumulated offsets against the content box.
const EPSILON: f32 = 1e-3;

/// What a text run is, so sinks can style it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRole {
    CoverTitle,
    CoverSubtitle,
    Title,
    Content,
    PageNumber,
}

/// One positioned line. `top` is measured from the top edge of the page.
#[derive(Debug, Clone, Copy)]
pub struct TextRun<'a> {
    pub text: &'a str,
    pub x: f32,
    pub top: f32,
    pub font_size: f32,
    pub role: RunRole,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub title: String,
    pub generated_at: String,
}

/// Receives the page/file lifecycle and positioned text from the engine.
/// Exactly one file is open between `open_file` and `close_file`.
pub trait PageSink {
    fn open_file(&mut self, geometry: &PageGeometry) -> Result<()>;
    fn open_page(&mut self) -> Result<()>;
    fn draw_text(&mut self, run: &TextRun<'_>);
    fn close_page(&mut self) -> Result<()>;
    /// Writes the open file to `path` and releases it, even on error.
    fn close_file(&mut self, path: &Path, info: &DocumentInfo) -> Result<()>;
}

/// Vertical write position inside the current page's content box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutCursor {
    offset: f32,
    limit: f32,
}

impl LayoutCursor {
    pub fn new(content_height: f32) -> Self {
        Self {
            offset: 0.0,
            limit: content_height,
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn limit(&self) -> f32 {
        self.limit
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
    }

    pub fn is_at_top(&self) -> bool {
        self.offset <= EPSILON
    }

    /// Whether a line of `height` still fits below the cursor.
    pub fn fits(&self, height: f32) -> bool {
        self.offset + height <= self.limit + EPSILON
    }

    /// Moves down by `height`, never past the bottom of the content box.
    pub fn advance(&mut self, height: f32) {
        let next = self.offset + height;
        if next > self.limit + EPSILON {
            warn!(
                "行高 {height:.2} 超出剩余版心 {:.2}，已截断",
                self.limit - self.offset
            );
        }
        self.offset = next.min(self.limit);
    }
}

/// Splits `text` greedily into lines no wider than `max_width`. A single
/// character wider than the box gets a line of its own. A U+FFFD stops the
/// wrap: what was measured before it is the last line.
pub fn wrap_line<'a, M: TextMeasurer + ?Sized>(
    measurer: &M,
    text: &'a str,
    font_size: f32,
    max_width: f32,
) -> Vec<&'a str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut width = 0.0f32;

    for (idx, ch) in text.char_indices() {
        if ch == char::REPLACEMENT_CHARACTER {
            warn!("遇到无法解码的字符，截断该行: {:?}", &text[start..idx]);
            if idx > start {
                lines.push(&text[start..idx]);
            }
            return lines;
        }
        let w = measurer.char_width(ch, font_size);
        if width + w > max_width && idx > start {
            lines.push(&text[start..idx]);
            start = idx;
            width = 0.0;
        }
        width += w;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

#[derive(Debug, Clone)]
pub struct LayoutSettings {
    pub geometry: PageGeometry,
    pub font: FontSpec,
    pub write_cover: bool,
}

/// Outcome of one `begin..end` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutSummary {
    /// Files written, in order.
    pub files: Vec<PathBuf>,
    /// Split parts whose write failed; generation continued past them.
    pub failed_parts: Vec<PathBuf>,
    /// Numbered content pages (the cover is not counted).
    pub pages: usize,
    pub chapters: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Closed,
    Open,
}

pub struct PaginationEngine<M: TextMeasurer, S: PageSink> {
    settings: LayoutSettings,
    measurer: M,
    sink: S,
    splitter: FileSplitter,
    info: DocumentInfo,
    cursor: LayoutCursor,
    state: EngineState,
    page_open: bool,
    page_numbered: bool,
    page_number: usize,
    chapters: usize,
    summary: LayoutSummary,
}

impl<M: TextMeasurer, S: PageSink> PaginationEngine<M, S> {
    pub fn new(
        settings: LayoutSettings,
        measurer: M,
        sink: S,
        splitter: FileSplitter,
        info: DocumentInfo,
    ) -> Self {
        let cursor = LayoutCursor::new(settings.geometry.content_height());
        Self {
            settings,
            measurer,
            sink,
            splitter,
            info,
            cursor,
            state: EngineState::Closed,
            page_open: false,
            page_numbered: false,
            page_number: 0,
            chapters: 0,
            summary: LayoutSummary::default(),
        }
    }

    pub fn cursor(&self) -> &LayoutCursor {
        &self.cursor
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn splitter(&self) -> &FileSplitter {
        &self.splitter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn is_open(&self) -> bool {
        self.state == EngineState::Open
    }

    /// Opens the first file and its first content page (after the cover, if any).
    pub fn begin(&mut self) -> Result<()> {
        if self.state == EngineState::Open {
            return Err(GeneratorError::AlreadyStarted);
        }
        self.splitter.reset();
        self.page_number = 0;
        self.chapters = 0;
        self.summary = LayoutSummary::default();

        self.open_file()?;
        self.state = EngineState::Open;
        if self.settings.write_cover {
            self.write_cover()?;
        }
        self.open_page()
    }

    /// Lays out one chapter; may break pages and files along the way.
    pub fn append_chapter(&mut self, title: &str, source_url: &str, html: &str) -> Result<()> {
        if self.state != EngineState::Open {
            return Err(GeneratorError::NotStarted);
        }

        if self.splitter.chapter_threshold_reached() {
            debug!(
                "第 {} 卷已满 {} 章，开启新文件",
                self.splitter.split_index(),
                self.splitter.chapters_in_file()
            );
            self.close_page()?;
            self.close_file()?;
            self.open_file()?;
            self.open_page()?;
        }
        self.splitter.chapter_started();
        self.chapters += 1;
        debug!("排版章节 {} ({})", title, source_url);

        let font = self.settings.font.clone();
        self.write_line(title, font.title_size, font.title_line(), RunRole::Title)?;

        let max_width = self.settings.geometry.content_width();
        for paragraph in indented_paragraphs(html) {
            let lines = wrap_line(&self.measurer, &paragraph, font.content_size, max_width);
            for line in lines {
                self.write_line(line, font.content_size, font.content_line(), RunRole::Content)?;
            }
        }

        // 章节之间空一行，放不下就算了，不为空行换页
        if self.cursor.offset() + font.content_line() < self.cursor.limit() {
            self.cursor.advance(font.content_line());
        }
        Ok(())
    }

    /// Closes the open page and file. Generation can begin again afterwards.
    pub fn end(&mut self) -> Result<LayoutSummary> {
        if self.state != EngineState::Open {
            return Err(GeneratorError::NotStarted);
        }
        self.close_page()?;
        self.state = EngineState::Closed;
        self.close_file()?;

        self.summary.pages = self.page_number;
        self.summary.chapters = self.chapters;
        info!(
            "排版完成: {} 章, {} 页, {} 个文件",
            self.summary.chapters,
            self.summary.pages,
            self.summary.files.len()
        );
        Ok(self.summary.clone())
    }

    fn open_file(&mut self) -> Result<()> {
        self.splitter.file_opened();
        self.sink.open_file(&self.settings.geometry)
    }

    fn close_file(&mut self) -> Result<()> {
        let path = self.splitter.current_path();
        match self.sink.close_file(&path, &self.info) {
            Ok(()) => {
                info!("已写出 {}", path.display());
                self.summary.files.push(path);
                Ok(())
            }
            Err(err) if self.splitter.policy().is_splitting() => {
                error!("写出分卷 {} 失败，继续生成后续分卷: {err}", path.display());
                self.summary.failed_parts.push(path);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn open_page(&mut self) -> Result<()> {
        if self.splitter.page_threshold_reached() {
            debug!(
                "第 {} 卷已满 {} 页，开启新文件",
                self.splitter.split_index(),
                self.splitter.pages_in_file()
            );
            self.close_file()?;
            self.open_file()?;
        }
        self.sink.open_page()?;
        self.splitter.page_opened();
        self.cursor.reset();
        self.page_open = true;
        self.page_numbered = true;
        self.page_number += 1;
        Ok(())
    }

    fn close_page(&mut self) -> Result<()> {
        if !self.page_open {
            return Ok(());
        }
        if self.page_numbered {
            self.write_page_number();
        }
        self.page_open = false;
        self.sink.close_page()
    }

    fn page_break(&mut self) -> Result<()> {
        self.close_page()?;
        self.open_page()
    }

    /// Breaks the page first when `line_height` no longer fits. A page that is
    /// still empty is never broken, so an oversized line costs at most one break.
    fn write_line(&mut self, text: &str, font_size: f32, line_height: f32, role: RunRole) -> Result<()> {
        if !self.cursor.fits(line_height) && !self.cursor.is_at_top() {
            self.page_break()?;
        }
        let geometry = self.settings.geometry;
        self.sink.draw_text(&TextRun {
            text,
            x: geometry.left_margin,
            top: geometry.top_margin + self.cursor.offset(),
            font_size,
            role,
        });
        self.cursor.advance(line_height);
        Ok(())
    }

    fn write_page_number(&mut self) {
        let geometry = self.settings.geometry;
        let size = self.settings.font.content_size / 2.0;
        let label = self.page_number.to_string();
        let width = self.measurer.text_width(&label, size);
        // 页码居中放在下边距里
        let baseline_from_bottom = ((geometry.top_margin - 0.7 * size) / 2.0).max(1.0);
        self.sink.draw_text(&TextRun {
            text: &label,
            x: (geometry.page_width - width) / 2.0,
            top: geometry.page_height - baseline_from_bottom - size,
            font_size: size,
            role: RunRole::PageNumber,
        });
    }

    fn write_cover(&mut self) -> Result<()> {
        self.sink.open_page()?;
        self.splitter.page_opened();
        self.page_open = true;
        self.page_numbered = false;

        let geometry = self.settings.geometry;
        let spacing = self.settings.font.line_spacing;
        let mut top = (geometry.top_margin + geometry.content_height() / 2.0 - COVER_TITLE_SIZE)
            .max(geometry.top_margin);
        let title = self.info.title.clone();
        for line in wrap_line(&self.measurer, &title, COVER_TITLE_SIZE, geometry.content_width()) {
            self.sink.draw_text(&TextRun {
                text: line,
                x: geometry.left_margin,
                top,
                font_size: COVER_TITLE_SIZE,
                role: RunRole::CoverTitle,
            });
            top += COVER_TITLE_SIZE * spacing;
        }
        let generated_at = self.info.generated_at.clone();
        self.sink.draw_text(&TextRun {
            text: &generated_at,
            x: geometry.left_margin,
            top,
            font_size: COVER_SUBTITLE_SIZE,
            role: RunRole::CoverSubtitle,
        });
        self.close_page()
    }
}
