use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unsupported file type '{0}'. Allowed types: image/jpeg, image/png, image/gif.")]
    UnsupportedType(String),

    #[error("File exceeds the maximum allowed size of {limit} bytes.")]
    TooLarge { limit: u64 },

    #[error("Uploaded file is empty.")]
    EmptyPayload,

    #[error("File content does not match the declared type {0}.")]
    ContentMismatch(mime::Mime),

    #[error("Invalid filename: {0}")]
    InvalidFilename(&'static str),

    // The client stream broke off before the payload was complete
    #[error("Failed to read upload data: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for errors caused by the request rather than by the server.
    pub fn is_validation(&self) -> bool {
        !matches!(self, StorageError::Io(_))
    }
}
