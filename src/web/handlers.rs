// API handlers for the web server

use super::{
    SharedStorage,
    error::ApiError,
    extract_upload::save_multipart_upload,
    models::*,
};
use axum::{
    Json,
    extract::{Path, Request, State},
    http::StatusCode,
};
use axum_extra::TypedHeader;
use headers::ContentLength;
use tracing::{debug, info};

// --- GET / ---
// Health check
pub async fn welcome() -> Json<WelcomeResponse> {
    debug!("Healthcheck endpoint hit: /");
    Json(WelcomeResponse {
        message: "Welcome to the Image Hosting Server".to_string(),
    })
}

// --- GET /upload ---
// Lists the stored images; an empty directory yields an empty array
pub async fn list_images(
    State(storage): State<SharedStorage>,
) -> Result<Json<Vec<ImageEntry>>, ApiError> {
    let images = storage.list().await?;

    info!("Returned list of {} uploaded images.", images.len());
    Ok(Json(images.into_iter().map(ImageEntry::from).collect()))
}

// --- POST /upload ---
// Stores the single image of a multipart form
pub async fn upload_image(
    State(storage): State<SharedStorage>,
    content_length: Option<TypedHeader<ContentLength>>,
    request: Request,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let content_length = content_length.map(|TypedHeader(ContentLength(length))| length);
    let image = save_multipart_upload(&storage, content_length, request).await?;

    info!(
        "File '{}' ({}, {} bytes) uploaded successfully.",
        image.filename,
        image.kind.mime(),
        image.size_bytes
    );
    Ok((StatusCode::CREATED, Json(UploadResponse::from(image))))
}

// --- DELETE /upload/{filename} ---
pub async fn delete_image(
    State(storage): State<SharedStorage>,
    Path(filename): Path<String>,
) -> Result<StatusCode, ApiError> {
    debug!("Delete request: filename={}", filename);

    if filename.is_empty() {
        return Err(missing_filename());
    }

    if storage.delete(&filename).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("File not found.".to_string()))
    }
}

// --- DELETE /upload/ ---
pub async fn delete_without_filename() -> ApiError {
    missing_filename()
}

fn missing_filename() -> ApiError {
    ApiError::BadRequest("Filename not provided.".to_string())
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed("Method not allowed".to_string())
}
