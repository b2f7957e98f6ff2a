use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard that must be kept alive for the duration of the application.
/// Dropping it flushes pending log entries and shuts down the non-blocking
/// writer worker thread.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Initialize tracing for an embedding application.
///
/// Writes daily-rotated files named `pgtunnel.YYYY-MM-DD.log` under
/// `log_dir`, and also logs to stdout when `with_stdout` is set. The level
/// defaults to `info` and is overridable via `RUST_LOG`; the protocol
/// crates are quieted so their frame-level chatter stays out of the way.
pub fn init_logging(log_dir: &Path, with_stdout: bool) -> LogGuard {
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("pgtunnel")
        .filename_suffix("log")
        .build(log_dir)
        .expect("Failed to create log appender");

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info")
            .add_directive("russh=info".parse().unwrap())
            .add_directive("tokio_postgres=info".parse().unwrap())
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    if with_stdout {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!("Logging initialized: dir={:?}", log_dir);

    LogGuard { _guard: guard }
}
