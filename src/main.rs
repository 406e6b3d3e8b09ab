//! ebook-press 命令行入口。
//!
//! 读取章节清单（JSON），按配置与命令行参数排版输出 PDF 或 EPUB。

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, info, warn};

use ebook_press::base_system::config::{ConfigSpec, load_or_create};
use ebook_press::base_system::context::Config;
use ebook_press::base_system::fs_utils::{file_exists, is_empty_dir};
use ebook_press::base_system::logging::{LogOptions, LogSystem};
use ebook_press::book_parser::manifest::Manifest;
use ebook_press::book_parser::select::{ChapterSelector, Selection, TitleFilter};
use ebook_press::book_parser::{EbookGenerator, GenerationReport};
use ebook_press::network_parser::network::{FetchConfig, HttpFetcher};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "ebook-press")]
#[command(about = "把网文章节排版为 PDF / EPUB")]
struct Cli {
    /// 章节清单 JSON：{"title": ..., "chapters": [{"title", "url", "content"?}]}
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// 输出格式：pdf 或 epub
    #[arg(long)]
    format: Option<String>,

    /// 纸张/设备尺寸，如 a4, a5, 6inch, pc, mobile
    #[arg(long)]
    page_type: Option<String>,

    /// TrueType 字体文件
    #[arg(long)]
    font: Option<PathBuf>,

    /// 每个文件最多页数（0 不限制）
    #[arg(long)]
    pages_per_file: Option<usize>,

    /// 每个文件最多章节数（0 不限制）
    #[arg(long)]
    chapters_per_file: Option<usize>,

    /// 分卷完成后合并为单个文件
    #[arg(long, default_value_t = false)]
    merge: bool,

    /// 输出文件路径（默认 保存路径/书名_纸张.pdf）
    #[arg(long)]
    output: Option<PathBuf>,

    /// 从第几章开始（1 起）
    #[arg(long, default_value_t = 0)]
    from_chapter: usize,

    /// 到第几章结束（不含该章）
    #[arg(long, default_value_t = 0)]
    to_chapter: usize,

    /// 从该标题的章节开始
    #[arg(long)]
    from_title: Option<String>,

    /// 到该标题的章节结束（不含该章）
    #[arg(long)]
    to_title: Option<String>,

    /// 标题过滤：contains(x) / equal(x) / prefix(x) / suffix(x) / regex(x)，前缀 ! 取反
    #[arg(long)]
    filter: Option<String>,

    /// 配置文件路径（默认 数据目录/config.yml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据目录（存放 config.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("ebook-press v{VERSION}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref();
    // logs/ 建好之前看数据目录是否为空
    let fresh = data_dir.is_some_and(|dir| is_empty_dir(dir).unwrap_or(false));
    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "ebook-press v{VERSION}");
    if fresh {
        info!("数据目录为空，将写入默认配置");
    }

    // 之后的错误都要先落日志再退出
    let result = prepare(&cli).and_then(|prepared| match prepared {
        Some((config, manifest)) => run(&config, &cli, &manifest).map(Some),
        None => Ok(None),
    });
    match &result {
        Ok(Some(report)) => {
            for file in &report.files {
                info!("输出: {}", file.display());
            }
            if !report.failed_parts.is_empty() {
                warn!("{} 个分卷写出失败，详见日志", report.failed_parts.len());
            }
        }
        Ok(None) => {}
        Err(err) => error!("生成失败: {err:#}"),
    }
    log.safe_exit();
    result.map(|_| ())
}

/// Loads the config and the manifest. `None` when no manifest was given.
fn prepare(cli: &Cli) -> Result<Option<(Config, Manifest)>> {
    let mut config = load_or_create::<Config>(cli.config.as_deref(), cli.data_dir.as_deref())
        .map_err(|e| anyhow!(e.to_string()))?;
    apply_overrides(&mut config, cli);
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    let Some(manifest_path) = cli.manifest.as_deref() else {
        info!("未指定 --manifest，已生成/更新配置文件后退出");
        return Ok(None);
    };
    if !file_exists(manifest_path)? {
        return Err(anyhow!("章节清单不存在: {}", manifest_path.display()));
    }
    let manifest = Manifest::load(manifest_path)?;
    Ok(Some((config, manifest)))
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(format) = &cli.format {
        config.format = format.clone();
    }
    if let Some(page_type) = &cli.page_type {
        config.page_type = page_type.clone();
    }
    if let Some(font) = &cli.font {
        config.font_file = font.to_string_lossy().into_owned();
    }
    if let Some(pages) = cli.pages_per_file {
        config.pages_per_file = pages;
    }
    if let Some(chapters) = cli.chapters_per_file {
        config.chapters_per_file = chapters;
    }
    if cli.merge {
        config.merge_after_split = true;
    }
}

fn run(config: &Config, cli: &Cli, manifest: &Manifest) -> Result<GenerationReport> {
    let mut generator = EbookGenerator::from_config(config)?;
    generator.set_title(&manifest.title);
    if let Some(output) = &cli.output {
        generator.set_output_path(output);
    }

    let fetcher = if manifest.needs_fetch() {
        Some(HttpFetcher::new(FetchConfig::from_config(config))?)
    } else {
        None
    };

    let mut selector = ChapterSelector::new(
        cli.from_chapter,
        cli.to_chapter,
        cli.from_title.as_deref().unwrap_or_default(),
        cli.to_title.as_deref().unwrap_or_default(),
    );
    let filter = cli
        .filter
        .as_deref()
        .map(TitleFilter::parse)
        .unwrap_or_default();

    let bar = ProgressBar::with_draw_target(
        Some(manifest.chapters.len() as u64),
        ProgressDrawTarget::stderr(),
    );
    let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})")?
        .progress_chars("##-");
    bar.set_style(style);
    bar.set_prefix("排版");

    info!("开始生成《{}》，共 {} 章", manifest.title, manifest.chapters.len());
    generator.begin()?;
    let mut failed = 0usize;
    for chapter in &manifest.chapters {
        match selector.check(&chapter.title) {
            Selection::Stop => break,
            Selection::Skip => {
                bar.inc(1);
                continue;
            }
            Selection::Accept => {}
        }
        if !filter.accepts(&chapter.title) {
            bar.inc(1);
            continue;
        }

        let html = match (&chapter.content, &fetcher) {
            (Some(content), _) => content.clone(),
            (None, Some(fetcher)) => match fetcher.fetch_text(&chapter.url) {
                Ok(text) => text,
                Err(err) => {
                    error!("章节《{}》抓取失败，已跳过: {err:#}", chapter.title);
                    failed += 1;
                    bar.inc(1);
                    continue;
                }
            },
            (None, None) => String::new(),
        };
        generator.append_chapter(&chapter.title, &chapter.url, &html)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    let report = generator.end()?;
    if failed > 0 {
        warn!("{failed} 个章节抓取失败");
    }
    info!("完成: {} 章, {} 页", report.chapters, report.pages);
    Ok(report)
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
