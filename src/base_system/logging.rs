//! 日志系统：控制台 + 文件双输出。
//!
//! 文件日志写在 `<数据目录>/logs/ebook-press.log`；超过大小上限或进程退出时
//! 打包为 `ebook-press_<时间>.zip`，只保留最近若干个归档。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic, thread, time::Duration};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const FLUSH_WAIT_MS: u64 = 200;
const LOG_FILE: &str = "ebook-press.log";
const ARCHIVE_PREFIX: &str = "ebook-press_";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    /// Console at DEBUG instead of INFO. The file always gets DEBUG.
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    /// Archives kept in `logs/`; 0 keeps all of them.
    pub keep_archives: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            keep_archives: 10,
        }
    }
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    /// Installs the global subscriber. `base_dir` defaults to the working directory.
    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir
            .map(|b| b.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        fs::create_dir_all(&logs_dir)?;
        let log_file = logs_dir.join(LOG_FILE);

        if fs::metadata(&log_file).is_ok_and(|m| m.len() >= MAX_LOG_BYTES) {
            archive_log_file(&log_file, &logs_dir)?;
        }

        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(rolling::never(&logs_dir, LOG_FILE));

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        // 进度条也画在 stderr 上
        let console_layer = fmt::layer()
            .with_target(false)
            .with_ansi(options.use_color)
            .with_writer(BoxMakeWriter::new(io::stderr))
            .with_filter(console_level);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(LevelFilter::DEBUG);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        let runtime = Arc::new(LogRuntime {
            logs_dir,
            log_file,
            guard: Mutex::new(Some(guard)),
            exit_called: AtomicBool::new(false),
            options,
        });
        runtime.install_signal_handler();
        runtime.install_panic_hook();
        debug!(target: "startup", "日志目录 {}", runtime.logs_dir.display());

        Ok(Self { runtime })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.runtime.logs_dir
    }

    /// Flushes the file writer and archives the log. Runs at most once.
    pub fn safe_exit(&self) {
        self.runtime.safe_exit();
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    logs_dir: PathBuf,
    log_file: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
    options: LogOptions,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        // 中断时已写出的分卷保留在磁盘上，这里只负责落盘日志
        if let Err(err) = ctrlc::set_handler(move || {
            warn!("收到中断信号，已写出的文件保留");
            runtime.safe_exit();
            std::process::exit(130);
        }) {
            debug!("无法注册 Ctrl-C 处理: {err}");
        }
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            match info.location() {
                Some(at) => error!("panic at {}:{}: {info}", at.file(), at.line()),
                None => error!("panic: {info}"),
            }
            runtime.safe_exit();
            previous(info);
        }));
    }

    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
        if !self.options.archive_on_exit {
            return;
        }
        thread::sleep(Duration::from_millis(FLUSH_WAIT_MS));
        if let Err(err) = archive_log_file(&self.log_file, &self.logs_dir) {
            eprintln!("failed to archive log: {err}");
        }
        if let Err(err) = prune_archives(&self.logs_dir, self.options.keep_archives) {
            eprintln!("failed to prune log archives: {err}");
        }
    }
}

fn archive_log_file(log_file: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    match fs::metadata(log_file) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
        Ok(meta) if meta.len() == 0 => {
            let _ = fs::remove_file(log_file);
            return Ok(None);
        }
        Ok(_) => {}
    }

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let mut archive_path = logs_dir.join(format!("{ARCHIVE_PREFIX}{timestamp}.zip"));
    let mut n = 1;
    while archive_path.exists() {
        archive_path = logs_dir.join(format!("{ARCHIVE_PREFIX}{timestamp}-{n}.zip"));
        n += 1;
    }

    let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{timestamp}.log"), options)?;
    let mut source = File::open(log_file)?;
    io::copy(&mut source, &mut zip)?;
    zip.finish()?;
    drop(source);

    let _ = fs::remove_file(log_file);
    info!("日志已归档到 {}", archive_path.display());
    Ok(Some(archive_path))
}

/// Deletes the oldest archives beyond `keep`. Archive names sort by time.
fn prune_archives(logs_dir: &Path, keep: usize) -> io::Result<usize> {
    if keep == 0 {
        return Ok(0);
    }
    let mut archives: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(".zip"))
        })
        .collect();
    if archives.len() <= keep {
        return Ok(0);
    }
    archives.sort();
    let excess = archives.len() - keep;
    for old in &archives[..excess] {
        fs::remove_file(old)?;
    }
    Ok(excess)
}
