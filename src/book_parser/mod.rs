//! 排版与导出模块入口。
//!
//! 负责将章节内容排成分页 PDF（可按页数/章节数分卷并合并）或 EPUB。

pub mod epub_generator;
pub mod error;
pub mod font;
pub mod generator;
pub mod geometry;
pub mod html_utils;
pub mod layout;
pub mod manifest;
pub mod merger;
pub mod pdf_sink;
pub mod select;
pub mod splitter;

pub use error::{GeneratorError, Result};
pub use generator::{EbookGenerator, GenerationReport, OutputFormat, PdfBook};
