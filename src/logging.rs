use std::path::Path;

use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

// Log targets, one per pipeline stage
pub const PDF_PARSING: &str = "pdf_parse";
pub const KEYWORD_LOAD: &str = "keyword_load";
pub const KEYWORD_MATCH: &str = "keyword_match";
pub const OUTPUT: &str = "output";

pub const LOG_FILE_NAME: &str = "pdf-coords.log";

/// Map the CLI `-v` count onto a level. Zero keeps the console quiet apart
/// from warnings.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level_for_verbosity(verbosity)).into())
        .from_env_lossy()
}

/// Install a stderr subscriber. stdout is reserved for extraction results.
///
/// The returned guard flushes the non-blocking writer on drop and has to be
/// held until the process exits.
pub fn init_logging(verbosity: u8) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(writer)
        .with_filter(env_filter(verbosity));

    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();

    guard
}

/// Like [`init_logging`], and also append every event at `debug` or above to
/// `<log_dir>/pdf-coords.log`.
pub fn init_logging_with_dir(verbosity: u8, log_dir: &Path) -> std::io::Result<(WorkerGuard, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::NEVER, log_dir, LOG_FILE_NAME);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(file_writer)
        .with_filter(env_filter(verbosity.max(2)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(stderr_writer)
        .with_filter(env_filter(verbosity));

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    Ok((stderr_guard, file_guard))
}
