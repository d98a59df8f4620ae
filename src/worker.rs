// One worker process: a single listener on its own port serving the API
// against the shared images directory.

use crate::config::AppConfig;
use crate::error::BootError;
use crate::shutdown_signal::shutdown_signal;
use crate::storage::StorageManager;
use crate::web::{create_app, create_listener};
use std::sync::Arc;
use tracing::info;

pub async fn run(config: &AppConfig) -> Result<(), BootError> {
    let port = config.worker_port();
    info!(
        "Worker process started with PID {} for port {}",
        std::process::id(),
        port
    );

    let storage = StorageManager::open(
        &config.images_dir,
        config.max_file_size,
        &config.public_url_prefix,
    )
    .await?;
    info!(
        "Images directory: {} (max file size {} bytes)",
        storage.images_dir().display(),
        storage.max_file_size()
    );

    let app = create_app(Arc::new(storage));

    // A port that cannot be bound is a deployment error; no retry
    let (addr, listener) = create_listener(&config.host, port)
        .await
        .map_err(|source| BootError::Bind { port, source })?;
    info!("Worker successfully bound. Listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(BootError::Serve)?;

    info!("Worker on port {} has shut down.", port);
    Ok(())
}
