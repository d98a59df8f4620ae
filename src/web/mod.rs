// Web server module for a worker process
// Handles the HTTP API endpoints for uploading, listing and deleting images

mod app;
mod error;
mod extract_upload;
mod handlers;
mod listeners;
mod models;

pub use app::create_app;
pub use listeners::create_listener;

use crate::storage::StorageManager;
use std::sync::Arc;

// Room for multipart boundaries and part headers on top of the file itself
pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub type SharedStorage = Arc<StorageManager>;
