use image::ImageFormat;

/// Image formats accepted for upload and served back from the images directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    /// Extension used when naming a newly stored file
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
        }
    }

    pub fn mime(self) -> mime::Mime {
        match self {
            ImageKind::Jpeg => mime::IMAGE_JPEG,
            ImageKind::Png => mime::IMAGE_PNG,
            ImageKind::Gif => mime::IMAGE_GIF,
        }
    }

    /// Case-insensitive lookup of a file extension (without the leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }

    /// Resolves the kind of a stored filename, `None` for anything outside the allow-list.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (stem, ext) = filename.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::from_extension(ext)
    }

    /// Parses a declared content type such as `image/png; charset=binary`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime: mime::Mime = content_type.trim().parse().ok()?;
        Self::try_from(&mime).ok()
    }

    /// Checks the leading bytes of a payload against this kind's magic number.
    pub fn matches_signature(self, head: &[u8]) -> bool {
        match image::guess_format(head) {
            Ok(ImageFormat::Jpeg) => self == ImageKind::Jpeg,
            Ok(ImageFormat::Png) => self == ImageKind::Png,
            Ok(ImageFormat::Gif) => self == ImageKind::Gif,
            _ => false,
        }
    }
}

impl TryFrom<&mime::Mime> for ImageKind {
    type Error = ();

    fn try_from(value: &mime::Mime) -> Result<Self, Self::Error> {
        if value.type_() != mime::IMAGE {
            return Err(());
        }

        match value.subtype().as_str() {
            "jpeg" | "jpg" | "pjpeg" => Ok(ImageKind::Jpeg),
            "png" => Ok(ImageKind::Png),
            "gif" => Ok(ImageKind::Gif),
            _ => Err(()),
        }
    }
}
