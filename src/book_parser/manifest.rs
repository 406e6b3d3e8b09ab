//! 章节清单（JSON）。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Chapter HTML; fetched from `url` when absent.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<ManifestChapter>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("读取章节清单失败: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("解析章节清单失败: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        if manifest.title.trim().is_empty() {
            bail!("书名为空");
        }
        for (idx, chapter) in manifest.chapters.iter().enumerate() {
            if chapter.content.is_none() && chapter.url.trim().is_empty() {
                bail!("第 {} 章《{}》既没有正文也没有 url", idx + 1, chapter.title);
            }
        }
        Ok(manifest)
    }

    /// Whether any chapter has to be fetched over the network.
    pub fn needs_fetch(&self) -> bool {
        self.chapters.iter().any(|c| c.content.is_none())
    }
}
