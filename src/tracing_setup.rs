use std::path::Path;

use tracing_subscriber::{
    EnvFilter, Layer, filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initializes the tracing subscriber with layered output:
/// 1. Stderr: human-readable, debug-level when `debug` is set. Stdout stays free for
///    the `stdout` output format.
/// 2. File: full JSON debug logs at `log_file` (if provided).
///
/// Returns a WorkerGuard that must be held by main() to ensure file logs are flushed.
pub fn init(
    debug: bool,
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let registry = tracing_subscriber::registry();
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_env_filter(debug));

    let (file_layer, guard) = match log_file.and_then(split_log_path) {
        Some((dir, file_name)) => {
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(Targets::new().with_default(tracing::Level::DEBUG));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug)
        .with_filter(console_filter);

    registry.with(console_layer).with(file_layer).init();

    guard
}

fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some((dir, file_name))
}

fn default_env_filter(debug: bool) -> EnvFilter {
    let spec = if debug {
        "promptbatch=debug,rig_core=warn,info"
    } else {
        "promptbatch=info,rig_core=warn,warn"
    };
    EnvFilter::new(spec)
}
