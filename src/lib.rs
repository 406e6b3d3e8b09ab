//! ebook-press：把抓取到的网文章节排版为电子书。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试/文件工具等基础设施
//! - `book_parser`：分页排版、分卷与合并、PDF/EPUB 输出
//! - `network_parser`：章节内容抓取

pub mod base_system;
pub mod book_parser;
pub mod network_parser;
