// API-specific data models for the web server

use crate::storage::StoredImage;
use serde::{Deserialize, Serialize};

/// Response to a successful upload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub filename: String,
    pub url: String,
}

impl From<StoredImage> for UploadResponse {
    fn from(image: StoredImage) -> Self {
        Self {
            filename: image.filename,
            url: image.url,
        }
    }
}

/// One entry of the image listing. Clients derive the URL from the filename.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub filename: String,
}

impl From<StoredImage> for ImageEntry {
    fn from(image: StoredImage) -> Self {
        Self {
            filename: image.filename,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WelcomeResponse {
    pub message: String,
}
