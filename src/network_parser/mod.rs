//! 网络层：章节内容抓取。

pub mod network;
