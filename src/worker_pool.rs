// Supervisor of the worker processes.
//
// Each worker is this same executable started in worker mode on its own port.
// Workers share nothing but the images directory. The reverse proxy in front
// of them round-robins over the same port range.

use crate::config::AppConfig;
use crate::error::BootError;
use crate::shutdown_signal::shutdown_signal;
use crate::storage::StorageManager;
use futures::future::select_all;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

// How long workers get to finish in-flight requests before being killed
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct WorkerProcess {
    port: u16,
    child: Child,
}

pub async fn run(config: &AppConfig) -> Result<(), BootError> {
    info!("Supervisor started with PID: {}", std::process::id());

    // No worker runs yet, so nothing can be mid-upload
    let storage = StorageManager::open(
        &config.images_dir,
        config.max_file_size,
        &config.public_url_prefix,
    )
    .await?;
    storage.purge_temp_files().await?;

    let executable = std::env::current_exe().map_err(BootError::CurrentExe)?;

    let mut workers = Vec::with_capacity(usize::from(config.workers));
    for (index, port) in config.worker_ports().into_iter().enumerate() {
        match spawn_worker(&executable, config, port) {
            Ok(child) => {
                info!(
                    "Starting worker {} on port {} (PID {})",
                    index + 1,
                    port,
                    child.id().unwrap_or(0)
                );
                workers.push(WorkerProcess { port, child });
            }
            Err(source) => {
                stop_workers(&mut workers, Duration::ZERO).await;
                return Err(BootError::Spawn { port, source });
            }
        }
    }

    info!(
        "Worker pool running: {} worker(s) on ports {}..={}",
        workers.len(),
        config.start_port,
        config.start_port + config.workers - 1
    );

    let (result, grace) = tokio::select! {
        (port, reason) = wait_for_any_exit(&mut workers) => {
            error!("Worker on port {} exited: {}", port, reason);
            (Err(BootError::WorkerExited { port, reason }), Duration::ZERO)
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping workers");
            // A SIGTERM sent to the supervisor alone never reaches the workers
            terminate_workers(&workers);
            (Ok(()), WORKER_SHUTDOWN_GRACE)
        }
    };

    stop_workers(&mut workers, grace).await;
    info!("Worker pool has shut down.");
    result
}

fn spawn_worker(executable: &Path, config: &AppConfig, port: u16) -> std::io::Result<Child> {
    Command::new(executable)
        .args(config.worker_args(port))
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

// Resolves with the port of the first worker to exit, for whatever reason
async fn wait_for_any_exit(workers: &mut [WorkerProcess]) -> (u16, String) {
    if workers.is_empty() {
        return std::future::pending().await;
    }

    let waits = workers.iter_mut().map(|worker| {
        Box::pin(async move {
            let reason = match worker.child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("failed to wait for process: {}", e),
            };
            (worker.port, reason)
        })
    });

    let (exited, _, _) = select_all(waits).await;
    exited
}

// Asks every worker to drain and exit, the same way a SIGTERM from the service manager would
#[cfg(unix)]
fn terminate_workers(workers: &[WorkerProcess]) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    for worker in workers {
        let Some(pid) = worker.child.id().and_then(|id| i32::try_from(id).ok()) else {
            continue;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to worker on port {}: {}", worker.port, e);
        }
    }
}

// Ctrl-C already reached the workers through the console
#[cfg(not(unix))]
fn terminate_workers(_workers: &[WorkerProcess]) {}

// Gives every worker until a shared deadline to exit on its own, then kills it
async fn stop_workers(workers: &mut [WorkerProcess], grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;

    for worker in workers.iter_mut() {
        match tokio::time::timeout_at(deadline, worker.child.wait()).await {
            Ok(Ok(status)) => info!("Worker on port {} stopped: {}", worker.port, status),
            Ok(Err(e)) => warn!("Failed to wait for worker on port {}: {}", worker.port, e),
            Err(_) => {
                warn!("Worker on port {} still running, killing it", worker.port);
                if let Err(e) = worker.child.kill().await {
                    warn!("Failed to kill worker on port {}: {}", worker.port, e);
                }
            }
        }
    }
}
