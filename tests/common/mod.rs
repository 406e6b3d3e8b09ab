#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ebook_press::book_parser::error::{GeneratorError, Result};
use ebook_press::book_parser::font::{FontSpec, TextMeasurer};
use ebook_press::book_parser::geometry::PageGeometry;
use ebook_press::book_parser::layout::{
    DocumentInfo, LayoutSettings, PageSink, PaginationEngine, RunRole, TextRun,
};
use ebook_press::book_parser::splitter::{FileSplitter, OutputNaming, SplitPolicy};

/// Every character is exactly `font_size` wide.
pub struct Monospace;

impl TextMeasurer for Monospace {
    fn char_width(&self, _ch: char, font_size: f32) -> f32 {
        font_size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub role: RunRole,
    pub text: String,
    pub x: f32,
    pub top: f32,
    pub size: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedFile {
    pub pages: Vec<Vec<Run>>,
    pub path: Option<PathBuf>,
}

impl RecordedFile {
    pub fn runs(&self, role: RunRole) -> impl Iterator<Item = &Run> {
        self.pages.iter().flatten().filter(move |r| r.role == role)
    }

    pub fn titles(&self) -> Vec<String> {
        self.runs(RunRole::Title).map(|r| r.text.clone()).collect()
    }
}

/// Keeps everything the engine draws; can be told to fail writing some paths.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub files: Vec<RecordedFile>,
    pub fail_on: HashSet<PathBuf>,
    open: bool,
}

impl RecordingSink {
    pub fn failing_on(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            fail_on: paths.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn all_runs(&self) -> impl Iterator<Item = &Run> {
        self.files.iter().flat_map(|f| f.pages.iter().flatten())
    }

    pub fn page_count(&self) -> usize {
        self.files.iter().map(|f| f.pages.len()).sum()
    }
}

impl PageSink for RecordingSink {
    fn open_file(&mut self, _geometry: &PageGeometry) -> Result<()> {
        assert!(!self.open, "a file was opened while another one is open");
        self.open = true;
        self.files.push(RecordedFile::default());
        Ok(())
    }

    fn open_page(&mut self) -> Result<()> {
        assert!(self.open, "page opened without a file");
        self.files.last_mut().unwrap().pages.push(Vec::new());
        Ok(())
    }

    fn draw_text(&mut self, run: &TextRun<'_>) {
        let page = self.files.last_mut().unwrap().pages.last_mut().unwrap();
        page.push(Run {
            role: run.role,
            text: run.text.to_string(),
            x: run.x,
            top: run.top,
            size: run.font_size,
        });
    }

    fn close_page(&mut self) -> Result<()> {
        Ok(())
    }

    fn close_file(&mut self, path: &Path, _info: &DocumentInfo) -> Result<()> {
        self.open = false;
        if self.fail_on.contains(path) {
            return Err(GeneratorError::Save {
                path: path.to_path_buf(),
                reason: "disk full".to_string(),
            });
        }
        self.files.last_mut().unwrap().path = Some(path.to_path_buf());
        Ok(())
    }
}

/// 200x140 page, 10pt margins: a 180x120 content box. Title lines are 20pt,
/// content lines 10pt, and ten-point characters fill a line at 18.
pub fn small_geometry() -> PageGeometry {
    PageGeometry::new(200.0, 140.0, 10.0, 10.0).unwrap()
}

pub fn small_font() -> FontSpec {
    FontSpec {
        family: "mono".to_string(),
        title_size: 20.0,
        content_size: 10.0,
        line_spacing: 1.0,
    }
}

pub fn naming() -> OutputNaming {
    OutputNaming::new("/out", "book", "test", "pdf")
}

pub fn engine_with(
    geometry: PageGeometry,
    policy: SplitPolicy,
    sink: RecordingSink,
    cover: bool,
) -> PaginationEngine<Monospace, RecordingSink> {
    let settings = LayoutSettings {
        geometry,
        font: small_font(),
        write_cover: cover,
    };
    let info = DocumentInfo {
        title: "book".to_string(),
        generated_at: "2024-05-01".to_string(),
    };
    PaginationEngine::new(
        settings,
        Monospace,
        sink,
        FileSplitter::new(policy, naming()),
        info,
    )
}

pub fn engine(policy: SplitPolicy) -> PaginationEngine<Monospace, RecordingSink> {
    engine_with(small_geometry(), policy, RecordingSink::default(), false)
}

/// One paragraph per entry, as chapter HTML.
pub fn html(paragraphs: &[&str]) -> String {
    paragraphs.iter().map(|p| format!("<p>{p}</p>")).collect()
}
