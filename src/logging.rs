// Tracing setup shared by the supervisor and the workers.
// Every process logs to stdout and to its own file in the log directory.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(log_dir: &Path, process_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_target(true) // Include module path in logs
        .with_file(true) // Include source file name
        .with_line_number(true); // Include line numbers

    let log_path = log_file_path(log_dir, process_name);
    let (file_layer, file_error) = match open_log_file(&log_path) {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    match file_error {
        None => tracing::info!("Logging to {}", log_path.display()),
        Some(e) => tracing::warn!(
            "Cannot open log file {}: {}. Logging to stdout only.",
            log_path.display(),
            e
        ),
    }
}

fn log_file_path(log_dir: &Path, process_name: &str) -> PathBuf {
    log_dir.join(format!("{}.log", process_name))
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_per_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(&dir.path().join("logs"), "worker-8001");

        assert!(path.ends_with("logs/worker-8001.log"));

        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }
}
