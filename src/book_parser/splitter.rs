//! 分卷阈值与输出文件命名。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::base_system::context::safe_fs_name;

/// Thresholds that force a new physical file; 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPolicy {
    pub pages_per_file: usize,
    pub chapters_per_file: usize,
}

impl SplitPolicy {
    pub fn new(pages_per_file: usize, chapters_per_file: usize) -> Self {
        Self {
            pages_per_file,
            chapters_per_file,
        }
    }

    pub fn is_splitting(&self) -> bool {
        self.pages_per_file > 0 || self.chapters_per_file > 0
    }
}

pub fn should_split_on_page(pages_in_file: usize, pages_per_file: usize) -> bool {
    pages_per_file > 0 && pages_in_file >= pages_per_file
}

pub fn should_split_on_chapter(chapters_in_file: usize, chapters_per_file: usize) -> bool {
    chapters_per_file > 0 && chapters_in_file >= chapters_per_file
}

/// Deterministic output names: `{title}_{page_type}({i:04}).{ext}` for parts,
/// `{title}_{page_type}.{ext}` for the single or merged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub dir: PathBuf,
    pub title: String,
    pub page_type: String,
    pub extension: String,
    pub output_override: Option<PathBuf>,
}

impl OutputNaming {
    pub fn new(dir: impl Into<PathBuf>, title: &str, page_type: &str, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            title: title.to_string(),
            page_type: page_type.to_string(),
            extension: extension.to_string(),
            output_override: None,
        }
    }

    fn stem(&self) -> String {
        let title = safe_fs_name(&self.title, "_", 120);
        if self.page_type.is_empty() {
            title
        } else {
            format!("{}_{}", title, self.page_type)
        }
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}({:04}).{}", self.stem(), index, self.extension))
    }

    /// The non-split output, or the merge target.
    pub fn final_path(&self) -> PathBuf {
        match &self.output_override {
            Some(path) => path.clone(),
            None => self.dir.join(format!("{}.{}", self.stem(), self.extension)),
        }
    }
}

/// Counters the engine consults at page and chapter boundaries.
#[derive(Debug, Clone)]
pub struct FileSplitter {
    policy: SplitPolicy,
    naming: OutputNaming,
    pages_in_file: usize,
    chapters_in_file: usize,
    split_index: usize,
}

impl FileSplitter {
    pub fn new(policy: SplitPolicy, naming: OutputNaming) -> Self {
        Self {
            policy,
            naming,
            pages_in_file: 0,
            chapters_in_file: 0,
            split_index: 0,
        }
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn naming(&self) -> &OutputNaming {
        &self.naming
    }

    pub fn pages_in_file(&self) -> usize {
        self.pages_in_file
    }

    pub fn chapters_in_file(&self) -> usize {
        self.chapters_in_file
    }

    /// Index of the file currently open (1-based once a file is open).
    pub fn split_index(&self) -> usize {
        self.split_index
    }

    /// Checked when a page is about to open.
    pub fn page_threshold_reached(&self) -> bool {
        should_split_on_page(self.pages_in_file, self.policy.pages_per_file)
    }

    /// Checked when a chapter is about to start.
    pub fn chapter_threshold_reached(&self) -> bool {
        should_split_on_chapter(self.chapters_in_file, self.policy.chapters_per_file)
    }

    pub fn page_opened(&mut self) {
        self.pages_in_file += 1;
    }

    pub fn chapter_started(&mut self) {
        self.chapters_in_file += 1;
    }

    /// Advances to the next file and resets the per-file counters.
    pub fn file_opened(&mut self) {
        self.split_index += 1;
        self.pages_in_file = 0;
        self.chapters_in_file = 0;
    }

    pub fn reset(&mut self) {
        self.split_index = 0;
        self.pages_in_file = 0;
        self.chapters_in_file = 0;
    }

    /// Path the currently open file is written to when it closes.
    pub fn current_path(&self) -> PathBuf {
        if self.policy.is_splitting() {
            self.naming.part_path(self.split_index)
        } else {
            self.naming.final_path()
        }
    }
}
