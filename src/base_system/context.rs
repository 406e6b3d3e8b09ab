//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use crate::book_parser::merger::MergePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 输出配置
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default = "default_true")]
    pub write_cover: bool,

    // 版式配置
    #[serde(default = "default_page_type")]
    pub page_type: String,
    #[serde(default = "default_margin")]
    pub left_margin: f32,
    #[serde(default = "default_margin")]
    pub top_margin: f32,
    #[serde(default = "default_title_font_size")]
    pub title_font_size: u32,
    #[serde(default = "default_content_font_size")]
    pub content_font_size: u32,
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
    #[serde(default)]
    pub font_file: String,

    // 分卷配置
    #[serde(default)]
    pub pages_per_file: usize,
    #[serde(default)]
    pub chapters_per_file: usize,
    #[serde(default = "default_false")]
    pub merge_after_split: bool,
    #[serde(default)]
    pub merge_policy: MergePolicy,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_false")]
    pub insecure_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: default_format(),
            save_path: String::new(),
            write_cover: default_true(),
            page_type: default_page_type(),
            left_margin: default_margin(),
            top_margin: default_margin(),
            title_font_size: default_title_font_size(),
            content_font_size: default_content_font_size(),
            line_spacing: default_line_spacing(),
            font_file: String::new(),
            pages_per_file: 0,
            chapters_per_file: 0,
            merge_after_split: default_false(),
            merge_policy: MergePolicy::default(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_wait_ms: default_retry_wait_ms(),
            user_agent: default_user_agent(),
            insecure_tls: default_false(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 19] = [
            FieldMeta {
                name: "format",
                description: "输出格式, 可选: [pdf, epub]",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径（留空为当前目录）",
            },
            FieldMeta {
                name: "write_cover",
                description: "PDF 是否生成封面页",
            },
            FieldMeta {
                name: "page_type",
                description: "纸张/设备尺寸, 如 a4, a5, b6, 6inch, 7inch, pc, mobile",
            },
            FieldMeta {
                name: "left_margin",
                description: "左右页边距（pt）",
            },
            FieldMeta {
                name: "top_margin",
                description: "上下页边距（pt）",
            },
            FieldMeta {
                name: "title_font_size",
                description: "章节标题字号",
            },
            FieldMeta {
                name: "content_font_size",
                description: "正文字号",
            },
            FieldMeta {
                name: "line_spacing",
                description: "行距倍数（低于字体要求的最小值时会自动提高）",
            },
            FieldMeta {
                name: "font_file",
                description: "TrueType 字体文件路径（留空使用内置 Helvetica，不支持中文）",
            },
            FieldMeta {
                name: "pages_per_file",
                description: "每个 PDF 文件最多页数（0 表示不限制）",
            },
            FieldMeta {
                name: "chapters_per_file",
                description: "每个 PDF 文件最多章节数（0 表示不限制）",
            },
            FieldMeta {
                name: "merge_after_split",
                description: "分卷生成后是否合并为单个文件",
            },
            FieldMeta {
                name: "merge_policy",
                description: "合并策略, 可选: [strict, lossy]；lossy 会跳过无法读取的分卷",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "最大尝试次数",
            },
            FieldMeta {
                name: "retry_wait_ms",
                description: "重试间隔, 单位ms",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求 User-Agent",
            },
            FieldMeta {
                name: "insecure_tls",
                description: "是否忽略 TLS 证书错误",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.to_ascii_lowercase().as_str(), "pdf" | "epub") {
            return Err(ConfigError::Validation(format!(
                "unsupported format '{}'",
                self.format
            )));
        }
        if self.left_margin < 0.0 || self.top_margin < 0.0 {
            return Err(ConfigError::Validation(
                "margins must not be negative".to_string(),
            ));
        }
        if self.title_font_size == 0 || self.content_font_size == 0 {
            return Err(ConfigError::Validation(
                "font sizes must be positive".to_string(),
            ));
        }
        if self.line_spacing <= 0.0 {
            return Err(ConfigError::Validation(
                "line_spacing must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn font_path(&self) -> Option<PathBuf> {
        let trimmed = self.font_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}

/// 将任意标题转换为可安全用作文件名的字符串。
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let fallback = replacement.chars().next().unwrap_or('_');
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            // Windows 禁用字符替换为全角等价字符
            ':' => '：',
            '"' => '＂',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if c.is_control() => fallback,
            _ => ch,
        })
        .collect();

    trim_trailing_dots(&mut cleaned);

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.contains(&cleaned.to_uppercase().as_str()) {
        cleaned.insert(0, '_');
    }

    if cleaned.len() > max_len {
        // 不能在多字节字符中间截断
        let mut end = max_len;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        trim_trailing_dots(&mut cleaned);
    }

    cleaned
}

fn trim_trailing_dots(s: &mut String) {
    while s.ends_with(' ') || s.ends_with('.') {
        s.pop();
    }
    if s.is_empty() {
        s.push_str("unnamed");
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "pdf".to_string()
}

fn default_page_type() -> String {
    "a4".to_string()
}

fn default_margin() -> f32 {
    10.0
}

fn default_title_font_size() -> u32 {
    24
}

fn default_content_font_size() -> u32 {
    18
}

fn default_line_spacing() -> f32 {
    1.2
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_wait_ms() -> u64 {
    3000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string()
}
