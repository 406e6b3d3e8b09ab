//! 生成器错误类型。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeneratorError>;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("can't read font file {path}: {source}")]
    FontRead { path: PathBuf, source: io::Error },

    #[error("can't parse TrueType font {path}: {reason}")]
    FontParse { path: PathBuf, reason: String },

    #[error(
        "invalid page geometry: {width}x{height} with margins {left}/{top} leaves no content box"
    )]
    InvalidGeometry {
        width: f32,
        height: f32,
        left: f32,
        top: f32,
    },

    #[error("invalid font size: title {title}, content {content}")]
    InvalidFontSize { title: u32, content: u32 },

    #[error("invalid line spacing {0}")]
    InvalidLineSpacing(f32),

    #[error("generator is not started, call begin() first")]
    NotStarted,

    #[error("generator already started")]
    AlreadyStarted,

    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("can't write {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("merge into {path} failed: {reason}")]
    Merge { path: PathBuf, reason: String },

    #[error("epub error: {0}")]
    Epub(String),
}

impl GeneratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
