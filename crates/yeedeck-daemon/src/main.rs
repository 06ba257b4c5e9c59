//! Yeedeck entry point.
//!
//! Launched by the Stream Deck host with its single-dash flags; see
//! [`yeedeck_daemon::config`].

use std::path::Path;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use yeedeck_daemon::{Args, Config, normalize_args};

/// Set up logging to a timestamped file in `log_dir`.
/// The host discards plugin stderr, so the file is the main log; debug builds
/// also log to stderr.
fn setup_logging(log_dir: &Path) {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("yeedeck={default_level}")));

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let log_filename = format!("yeedeck-{timestamp}.log");
    let log_path = log_dir.join(&log_filename);

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("yeedeck.log");
        let _ = std::fs::remove_file(&symlink_path);
        let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    std::mem::forget(guard);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = cfg!(debug_assertions).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_from(normalize_args(std::env::args_os()));

    let log_dir = args.log_dir.clone().unwrap_or_else(std::env::temp_dir);
    setup_logging(&log_dir);

    let config = Config::from_args(args).inspect_err(|e| error!("Invalid launch arguments: {e}"))?;
    info!(
        "Starting yeedeck {} (port {}, release policy {:?})",
        env!("CARGO_PKG_VERSION"),
        config.port,
        config.release_policy
    );

    yeedeck_daemon::run(config)
        .await
        .inspect_err(|e| error!("Stopped with error: {e}"))?;

    info!("Yeedeck stopped");
    Ok(())
}
