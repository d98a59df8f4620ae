use axum::{
    extract::{FromRequest, Multipart, Request, multipart::Field},
    http::header,
};
use tracing::{debug, warn};

use super::{MULTIPART_OVERHEAD_BYTES, error::ApiError};
use crate::storage::{ImageKind, StagedImage, StorageError, StorageManager, StoredImage};

/// Streams the single file field of a multipart request into storage.
///
/// The file is published only after the whole form has been read, so a form
/// rejected for carrying a second file never exposes the first one.
pub async fn save_multipart_upload(
    storage: &StorageManager,
    content_length: Option<u64>,
    request: Request,
) -> Result<StoredImage, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.starts_with("multipart/form-data") {
        return Err(ApiError::BadRequest(
            "Bad request: Expected 'multipart/form-data'.".to_string(),
        ));
    }

    // Refuse before reading a single byte when the client announces an oversized body
    if let Some(length) = content_length {
        if length > storage.max_file_size() + MULTIPART_OVERHEAD_BYTES {
            return Err(StorageError::TooLarge {
                limit: storage.max_file_size(),
            }
            .into());
        }
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to process multipart request: {}", e)))?;

    let mut staged: Option<StagedImage> = None;
    let mut ignored_fields = 0;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard_staged(storage, staged.take()).await;
                return Err(ApiError::BadRequest(format!(
                    "Failed to process multipart field: {}",
                    e
                )));
            }
        };

        if !is_file_field(&field) {
            let field_name = field.name().unwrap_or("unnamed").to_string();
            debug!("Ignoring multipart field: {}", field_name);
            ignored_fields += 1;
            continue;
        }

        if staged.is_some() {
            warn!("Multiple file fields found in multipart request, rejecting upload");
            discard_staged(storage, staged.take()).await;
            return Err(ApiError::BadRequest(
                "Only one file may be uploaded per request.".to_string(),
            ));
        }

        let declared_type = declared_type(&field);
        debug!("Received file with declared type: {}", declared_type);

        staged = Some(storage.stage(field, &declared_type, None).await?);
    }

    if ignored_fields > 0 {
        debug!(
            "Ignored {} non-file fields in multipart request",
            ignored_fields
        );
    }

    let Some(staged) = staged else {
        return Err(ApiError::BadRequest(
            "Missing 'file' field in multipart request.".to_string(),
        ));
    };

    Ok(storage.publish(staged).await?)
}

fn is_file_field(field: &Field<'_>) -> bool {
    field.name() == Some("file") || field.file_name().is_some()
}

// Falls back to the client filename when the part carries no useful content type
fn declared_type(field: &Field<'_>) -> String {
    let content_type = field
        .content_type()
        .filter(|ct| !ct.starts_with("application/octet-stream"));

    if let Some(content_type) = content_type {
        return content_type.to_string();
    }

    field
        .file_name()
        .and_then(ImageKind::from_filename)
        .map(|kind| kind.mime().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

async fn discard_staged(storage: &StorageManager, staged: Option<StagedImage>) {
    if let Some(staged) = staged {
        storage.discard(staged).await;
    }
}
