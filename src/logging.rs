use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

/// Logs go to a daily file under the data dir so they never draw over the
/// terminal UI. Keep the returned guard alive until exit to flush.
pub fn init(logs_dir: &Path, flag: Option<&str>, env: Option<&str>) -> Option<WorkerGuard> {
    std::fs::create_dir_all(logs_dir).ok()?;

    let appender = tracing_appender::rolling::daily(logs_dir, "jobtrack.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::registry().with(build_filter(flag, env)).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true),
    );
    let _ = tracing::subscriber::set_global_default(subscriber);

    Some(guard)
}

/// Precedence: `--log` flag, then `JOBTRACK_LOG`, then warn.
fn build_filter(flag: Option<&str>, env: Option<&str>) -> EnvFilter {
    flag.or(env)
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
