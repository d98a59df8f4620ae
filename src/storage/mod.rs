// Filesystem-backed image storage shared by every worker process.
//
// Several independent processes operate on the same directory, so nothing in
// here relies on in-process state for correctness:
// - new names embed a random UUID and are published with `hard_link`, which
//   refuses to clobber an existing file
// - payloads are written and fsynced under a temporary name first, so a
//   listed file is always complete, and the caller decides when to publish
// - removing a file that is already gone reports absence, not failure

mod error;
mod image_kind;

pub use error::StorageError;
pub use image_kind::ImageKind;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Files starting with this prefix are in-progress uploads
const TEMP_PREFIX: &str = ".";
/// Suffix of in-progress uploads. Never part of the extension allow-list.
const TEMP_SUFFIX: &str = ".part";

// Enough bytes to recognize every allowed format's magic number
const SIGNATURE_LEN: usize = 16;

// UUID v4 collisions are not expected in practice; the retry only guards the
// no-overwrite invariant
const MAX_NAME_ATTEMPTS: usize = 8;

/// An image persisted in the images directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub filename: String,
    pub kind: ImageKind,
    pub size_bytes: u64,
    pub url: String,
}

/// A complete upload held under a temporary name.
///
/// Dropping it without [`StorageManager::publish`] or
/// [`StorageManager::discard`] leaves the temp file for the next boot purge.
#[derive(Debug)]
pub struct StagedImage {
    temp_path: PathBuf,
    kind: ImageKind,
    size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StorageManager {
    images_dir: PathBuf,
    max_file_size: u64,
    public_url_prefix: String,
}

impl StorageManager {
    /// Opens the images directory, creating it if it does not exist yet.
    pub async fn open(
        images_dir: impl Into<PathBuf>,
        max_file_size: u64,
        public_url_prefix: &str,
    ) -> Result<Self, StorageError> {
        let images_dir = images_dir.into();
        fs::create_dir_all(&images_dir).await?;

        Ok(Self {
            images_dir,
            max_file_size,
            public_url_prefix: public_url_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Public URL under which the proxy serves `filename`.
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}/{}", self.public_url_prefix, filename)
    }

    /// Streams an upload into a temporary file that no listing can see yet.
    ///
    /// `declared_type` must be one of the allowed image content types and
    /// `declared_size`, when the client provided one, must not exceed the
    /// configured maximum. The size ceiling is enforced again while reading,
    /// so an understated size is cut off as soon as the limit is crossed.
    /// On any failure the temporary file is removed.
    ///
    /// The staged file becomes visible only through [`StorageManager::publish`].
    pub async fn stage<S, E>(
        &self,
        stream: S,
        declared_type: &str,
        declared_size: Option<u64>,
    ) -> Result<StagedImage, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let kind = ImageKind::from_content_type(declared_type)
            .ok_or_else(|| StorageError::UnsupportedType(declared_type.to_string()))?;

        if declared_size.is_some_and(|size| size > self.max_file_size) {
            return Err(StorageError::TooLarge {
                limit: self.max_file_size,
            });
        }

        let temp_path = self.temp_path();
        match self.write_temp(&temp_path, stream, kind).await {
            Ok(size_bytes) => Ok(StagedImage {
                temp_path,
                kind,
                size_bytes,
            }),
            Err(err) => {
                remove_temp(&temp_path).await;
                Err(err)
            }
        }
    }

    /// Publishes a staged upload under a freshly generated name.
    pub async fn publish(&self, staged: StagedImage) -> Result<StoredImage, StorageError> {
        let filename = match self.link_unique(&staged.temp_path, staged.kind).await {
            Ok(filename) => filename,
            Err(err) => {
                remove_temp(&staged.temp_path).await;
                return Err(err);
            }
        };

        info!("Stored '{}' ({} bytes)", filename, staged.size_bytes);

        Ok(StoredImage {
            url: self.public_url(&filename),
            filename,
            kind: staged.kind,
            size_bytes: staged.size_bytes,
        })
    }

    /// Drops a staged upload without ever publishing it.
    pub async fn discard(&self, staged: StagedImage) {
        remove_temp(&staged.temp_path).await;
    }

    async fn write_temp<S, E>(
        &self,
        temp_path: &Path,
        stream: S,
        kind: ImageKind,
    ) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await?;

        let mut written: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(SIGNATURE_LEN);
        let mut signature_checked = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::Payload(e.to_string()))?;

            written += chunk.len() as u64;
            if written > self.max_file_size {
                return Err(StorageError::TooLarge {
                    limit: self.max_file_size,
                });
            }

            if !signature_checked {
                let missing = SIGNATURE_LEN - head.len();
                head.extend_from_slice(&chunk[..missing.min(chunk.len())]);
                if head.len() == SIGNATURE_LEN {
                    check_signature(kind, &head)?;
                    signature_checked = true;
                }
            }

            file.write_all(&chunk).await?;
        }

        if written == 0 {
            return Err(StorageError::EmptyPayload);
        }
        if !signature_checked {
            check_signature(kind, &head)?;
        }

        file.flush().await?;
        file.sync_all().await?;

        debug!("Wrote {} bytes to {}", written, temp_path.display());
        Ok(written)
    }

    // Links the finished temp file under a new unique name, then drops the temp name.
    async fn link_unique(&self, temp_path: &Path, kind: ImageKind) -> Result<String, StorageError> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = format!("{}.{}", Uuid::new_v4().simple(), kind.extension());
            let final_path = self.images_dir.join(&filename);

            match fs::hard_link(temp_path, &final_path).await {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(temp_path).await {
                        // The image is already visible; the leftover is purged at next boot
                        warn!(
                            "Failed to remove temporary file {}: {}",
                            temp_path.display(),
                            e
                        );
                    }
                    return Ok(filename);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("Generated filename '{}' already exists, retrying", filename);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique filename",
        )))
    }

    fn temp_path(&self) -> PathBuf {
        self.images_dir.join(format!(
            "{}{}{}",
            TEMP_PREFIX,
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ))
    }

    /// Lists every stored image, ordered by filename.
    ///
    /// In-progress uploads and files outside the allow-list are skipped. A
    /// file removed by another worker between enumeration and `stat` is
    /// skipped as well.
    pub async fn list(&self) -> Result<Vec<StoredImage>, StorageError> {
        let mut entries = fs::read_dir(&self.images_dir).await?;
        let mut images = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if filename.starts_with(TEMP_PREFIX) {
                continue;
            }
            let Some(kind) = ImageKind::from_filename(&filename) else {
                continue;
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            images.push(StoredImage {
                url: self.public_url(&filename),
                filename,
                kind,
                size_bytes: metadata.len(),
            });
        }

        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(images)
    }

    /// Removes `filename` from the directory.
    ///
    /// Returns `Ok(false)` when there was nothing to remove, which is what a
    /// losing concurrent delete observes.
    pub async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        validate_filename(filename)?;

        match fs::remove_file(self.images_dir.join(filename)).await {
            Ok(()) => {
                info!("Deleted '{}'", filename);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Delete of '{}': file not present", filename);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes temporary files left behind by a crashed upload.
    ///
    /// Only safe while no worker is running against the directory.
    pub async fn purge_temp_files(&self) -> Result<usize, StorageError> {
        let mut entries = fs::read_dir(&self.images_dir).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !(name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!("Purged {} stale temporary file(s)", removed);
        }
        Ok(removed)
    }
}

async fn remove_temp(temp_path: &Path) {
    match fs::remove_file(temp_path).await {
        Ok(()) => debug!("Discarded temporary file {}", temp_path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to discard temporary file {}: {}",
            temp_path.display(),
            e
        ),
    }
}

fn check_signature(kind: ImageKind, head: &[u8]) -> Result<(), StorageError> {
    if kind.matches_signature(head) {
        Ok(())
    } else {
        Err(StorageError::ContentMismatch(kind.mime()))
    }
}

/// Rejects anything that could address a file other than a stored image.
fn validate_filename(filename: &str) -> Result<ImageKind, StorageError> {
    if filename.is_empty() {
        return Err(StorageError::InvalidFilename("filename is empty"));
    }
    if filename.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidFilename(
            "filename must not contain path separators",
        ));
    }
    if filename.contains("..") {
        return Err(StorageError::InvalidFilename(
            "filename must not contain '..'",
        ));
    }
    if filename.starts_with(TEMP_PREFIX) {
        return Err(StorageError::InvalidFilename(
            "filename must not start with '.'",
        ));
    }

    ImageKind::from_filename(filename)
        .ok_or(StorageError::InvalidFilename("unsupported file extension"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::convert::Infallible;
    use tempfile::tempdir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";
    const GIF: &[u8] = b"GIF89a\x01\0\x01\0\x80\0\0\0\0\0";

    impl StorageManager {
        async fn save<S, E>(
            &self,
            stream: S,
            declared_type: &str,
            declared_size: Option<u64>,
        ) -> Result<StoredImage, StorageError>
        where
            S: Stream<Item = Result<Bytes, E>>,
            E: std::fmt::Display,
        {
            let staged = self.stage(stream, declared_type, declared_size).await?;
            self.publish(staged).await
        }
    }

    fn one_chunk(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        futures::stream::iter([Ok(Bytes::from_static(data))])
    }

    async fn open_storage(dir: &Path, max_file_size: u64) -> StorageManager {
        StorageManager::open(dir, max_file_size, "/images/")
            .await
            .expect("open storage")
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_save_then_list() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let image = storage
            .save(one_chunk(PNG), "image/png", Some(PNG.len() as u64))
            .await
            .expect("save");

        assert!(image.filename.ends_with(".png"));
        assert_eq!(image.kind, ImageKind::Png);
        assert_eq!(image.size_bytes, PNG.len() as u64);
        assert_eq!(image.url, format!("/images/{}", image.filename));

        let listed = storage.list().await.unwrap();
        assert_eq!(listed, vec![image.clone()]);

        let on_disk = std::fs::read(dir.path().join(&image.filename)).unwrap();
        assert_eq!(on_disk, PNG);
        // No temp file left behind
        assert_eq!(dir_entries(dir.path()), vec![image.filename]);
    }

    #[tokio::test]
    async fn test_staged_upload_is_not_listed() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let staged = storage.stage(one_chunk(PNG), "image/png", None).await.unwrap();

        assert!(storage.list().await.unwrap().is_empty());
        let entries = dir_entries(dir.path());
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with('.') && entries[0].ends_with(".part"));

        let image = storage.publish(staged).await.unwrap();
        assert_eq!(dir_entries(dir.path()), vec![image.filename]);
    }

    #[tokio::test]
    async fn test_discard_staged_upload() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let staged = storage.stage(one_chunk(PNG), "image/png", None).await.unwrap();
        storage.discard(staged).await;

        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_accepts_chunked_stream() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let chunks = PNG
            .chunks(3)
            .map(|c| Ok::<_, Infallible>(Bytes::copy_from_slice(c)))
            .collect::<Vec<_>>();
        let image = storage
            .save(futures::stream::iter(chunks), "image/png", None)
            .await
            .expect("save");

        assert_eq!(image.size_bytes, PNG.len() as u64);
    }

    #[tokio::test]
    async fn test_save_rejects_unsupported_type() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let err = storage
            .save(one_chunk(PNG), "application/zip", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::UnsupportedType(_)));
        assert!(err.is_validation());
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_declared_oversize() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 8).await;

        let err = storage
            .save(one_chunk(PNG), "image/png", Some(9))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::TooLarge { limit: 8 }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_cuts_off_oversized_stream() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 20).await;

        let mut body = PNG.to_vec();
        body.extend_from_slice(&[0u8; 64]);
        let chunks = body
            .chunks(8)
            .map(|c| Ok::<_, Infallible>(Bytes::copy_from_slice(c)))
            .collect::<Vec<_>>();

        // Declared size understates the real payload
        let err = storage
            .save(futures::stream::iter(chunks), "image/png", Some(10))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::TooLarge { limit: 20 }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_mismatched_content() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let err = storage
            .save(one_chunk(GIF), "image/png", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::ContentMismatch(_)));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_empty_payload() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let err = storage
            .save(futures::stream::empty::<Result<Bytes, Infallible>>(), "image/gif", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::EmptyPayload));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_save_stream_error_leaves_nothing() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(PNG)),
            Err("connection reset".to_string()),
        ];
        let err = storage
            .save(futures::stream::iter(chunks), "image/png", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Payload(_)));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_names() {
        let dir = tempdir().unwrap();
        // Two managers on one directory stand in for two worker processes
        let first = open_storage(dir.path(), 1024).await;
        let second = open_storage(dir.path(), 1024).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let storage = if i % 2 == 0 { first.clone() } else { second.clone() };
            tasks.push(tokio::spawn(async move {
                storage.save(one_chunk(PNG), "image/png", None).await
            }));
        }

        let mut names = HashSet::new();
        for task in tasks {
            let image = task.await.unwrap().expect("save");
            assert!(names.insert(image.filename));
        }

        assert_eq!(first.list().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.png", "a.gif", "c.JPEG", "notes.txt", ".abc.part", ".hidden.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        let names: Vec<String> = storage
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|image| image.filename)
            .collect();

        assert_eq!(names, vec!["a.gif", "b.png", "c.JPEG"]);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;
        let image = storage.save(one_chunk(PNG), "image/png", None).await.unwrap();

        assert!(storage.delete(&image.filename).await.unwrap());
        assert!(!storage.delete(&image.filename).await.unwrap());
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_deletes_report_one_removal() {
        let dir = tempdir().unwrap();
        let storage = open_storage(dir.path(), 1024).await;
        let image = storage.save(one_chunk(PNG), "image/png", None).await.unwrap();

        let (a, b) = tokio::join!(
            storage.delete(&image.filename),
            storage.delete(&image.filename)
        );

        let removed = [a.unwrap(), b.unwrap()];
        assert_eq!(removed.iter().filter(|r| **r).count(), 1);
    }

    #[tokio::test]
    async fn test_delete_rejects_traversal() {
        let outer = tempdir().unwrap();
        let images = outer.path().join("images");
        let victim = outer.path().join("victim.png");
        std::fs::write(&victim, b"keep me").unwrap();
        let storage = open_storage(&images, 1024).await;

        for name in ["../victim.png", "../../etc/passwd", "..", "a/b.png", "a\\b.png"] {
            let err = storage.delete(name).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidFilename(_)), "{name}");
        }

        assert!(victim.exists());
    }

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("abc.png").unwrap(), ImageKind::Png);
        assert_eq!(validate_filename("abc.jpg").unwrap(), ImageKind::Jpeg);
        assert!(validate_filename("").is_err());
        assert!(validate_filename(".abc.part").is_err());
        assert!(validate_filename(".png").is_err());
        assert!(validate_filename("abc.exe").is_err());
        assert!(validate_filename("abc..png").is_err());
        assert!(validate_filename("abc.png\0").is_err());
    }

    #[tokio::test]
    async fn test_purge_temp_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".1234.part"), b"half").unwrap();
        std::fs::write(dir.path().join("keep.png"), b"x").unwrap();
        let storage = open_storage(dir.path(), 1024).await;

        assert_eq!(storage.purge_temp_files().await.unwrap(), 1);
        assert_eq!(dir_entries(dir.path()), vec!["keep.png"]);
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("a").join("b");

        let storage = open_storage(&images, 1024).await;

        assert!(images.is_dir());
        assert_eq!(storage.images_dir(), images.as_path());
        assert_eq!(storage.public_url("x.png"), "/images/x.png");
    }
}
