use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Spawn and supervise the worker processes
    Pool,
    /// Serve the API on a single port
    Worker,
}

impl Mode {
    fn as_arg(self) -> &'static str {
        match self {
            Mode::Pool => "pool",
            Mode::Worker => "worker",
        }
    }
}

/// Command line arguments for imghost-server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    /// Whether this process supervises the pool or is one of its workers.
    #[arg(long, env = "IMGHOST_MODE", value_enum, default_value_t = Mode::Pool)]
    pub mode: Mode,

    /// Hostname/IP the workers bind to. "*" listens on all interfaces (IPv6 dual-stack when available).
    #[arg(long, env = "WEB_SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port of this worker. Only used in worker mode; defaults to the start port.
    #[arg(long, env = "WEB_SERVER_PORT")]
    pub port: Option<u16>,

    /// Number of worker processes to spawn.
    #[arg(long, env = "WEB_SERVER_WORKERS", default_value_t = 1)]
    pub workers: u16,

    /// Port of the first worker; worker i listens on start_port + i.
    #[arg(long, env = "WEB_SERVER_START_PORT", default_value_t = 8000)]
    pub start_port: u16,

    /// Directory shared by all workers for the uploaded images.
    #[arg(long, env = "IMAGES_DIR", default_value = "images")]
    pub images_dir: PathBuf,

    /// Directory for the per-process log files.
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Maximum accepted size of an uploaded file, in bytes.
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// URL prefix under which the reverse proxy serves the images directory.
    #[arg(long, env = "IMAGES_URL_PREFIX", default_value = "/images")]
    pub public_url_prefix: String,
}

impl AppConfig {
    /// Checks the settings that would otherwise only fail once workers are running.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Worker count must be at least 1".to_string());
        }
        if self.max_file_size == 0 {
            return Err("Maximum file size must be at least 1 byte".to_string());
        }

        let last_port = u32::from(self.start_port) + u32::from(self.workers) - 1;
        if last_port > u32::from(u16::MAX) {
            return Err(format!(
                "Port range {}..={} exceeds {}",
                self.start_port,
                last_port,
                u16::MAX
            ));
        }

        Ok(())
    }

    /// The contiguous range of ports the proxy's upstream list must match.
    pub fn worker_ports(&self) -> Vec<u16> {
        (0..self.workers)
            .filter_map(|i| self.start_port.checked_add(i))
            .collect()
    }

    /// Port this process listens on when running as a worker.
    pub fn worker_port(&self) -> u16 {
        self.port.unwrap_or(self.start_port)
    }

    /// Arguments that re-launch this executable as the worker for `port`.
    ///
    /// Everything is passed explicitly so a worker does not depend on
    /// inheriting the supervisor's environment or working `.env`.
    pub fn worker_args(&self, port: u16) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            format!("--mode={}", Mode::Worker.as_arg()).into(),
            format!("--port={}", port).into(),
            format!("--host={}", self.host).into(),
            format!("--workers={}", self.workers).into(),
            format!("--start-port={}", self.start_port).into(),
            format!("--max-file-size={}", self.max_file_size).into(),
            format!("--public-url-prefix={}", self.public_url_prefix).into(),
        ];

        let mut images_dir = OsString::from("--images-dir=");
        images_dir.push(self.images_dir.as_os_str());
        args.push(images_dir);

        let mut log_dir = OsString::from("--log-dir=");
        log_dir.push(self.log_dir.as_os_str());
        args.push(log_dir);

        args
    }
}
