pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_PER_FIELD_SIZE_LIMIT: u64 = u64::MAX;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const LF: &str = "\n";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";
pub(crate) const LF_LF: &str = "\n\n";

/// Default cap on normalized image width, in pixels.
pub(crate) const DEFAULT_MAX_IMAGE_WIDTH: u32 = 600;

/// Content types the image field accepts.
pub(crate) const ALLOWED_IMAGE_CONTENT_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/webp", "image/bmp"];

/// Filename extensions matching [`ALLOWED_IMAGE_CONTENT_TYPES`], lower-case,
/// including the leading dot.
pub(crate) const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".bmp"];
