//! Log pipeline: console output plus a daily-rotated file, with old files
//! pruned to a fixed count on startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides the platform log directory when set.
const ENV_LOG_DIR: &str = "CONECTOCA_LOG_DIR";

/// Rotated log files kept on disk.
const MAX_LOG_FILES: usize = 10;

/// File stem used by the rolling appender.
const LOG_FILE_PREFIX: &str = "sync";

/// Install the global tracing subscriber: a console layer plus a daily-rotated
/// file layer under [`log_dir`]. The returned guard flushes the file writer on
/// drop and must be held for the life of the process.
pub fn init() -> Result<WorkerGuard, io::Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,conectoca_sync=debug"));

    let log_dir = log_dir();
    fs::create_dir_all(&log_dir)?;
    prune_logs_in(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Directory that receives log files. `CONECTOCA_LOG_DIR` wins when set,
/// otherwise the platform data directory is used.
pub fn log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_LOG_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });

    base.join("conectoca-sync").join("logs")
}

/// Delete rotated log files beyond the newest [`MAX_LOG_FILES`].
pub fn prune_old_logs() {
    prune_logs_in(&log_dir());
}

fn prune_logs_in(dir: &Path) {
    if !dir.exists() {
        return;
    }

    let rotated_prefix = format!("{LOG_FILE_PREFIX}.");
    let mut log_files: Vec<(PathBuf, SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == LOG_FILE_PREFIX || name.starts_with(&rotated_prefix) {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first.
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not prune log file");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
