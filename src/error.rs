use std::fmt::{self, Debug, Display, Formatter};

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while parsing a multipart stream and
/// normalizing its image field.
///
/// Every variant is terminal for the current request: nothing is retried and
/// no partial result is handed back. The surrounding server decides how each
/// kind maps to a client-visible response.
#[derive(Error)]
#[non_exhaustive]
pub enum Error {
    /// The `Content-Type` header value does not carry a usable boundary.
    #[error("malformed Content-Type header: {0}")]
    MalformedContentType(String),

    /// The stream ended before the closing `--boundary--` delimiter.
    #[error("multipart body ended before the closing boundary")]
    TruncatedBody,

    /// A section's payload has no blank line separating headers from body,
    /// or its header block could not be parsed.
    #[error("malformed multipart section: {0}")]
    MalformedSection(String),

    /// A section carried zero or more than one `Content-Disposition` header.
    #[error("section must carry exactly one Content-Disposition header")]
    MissingContentDisposition,

    /// The `Content-Disposition` header has no non-empty `name` parameter.
    #[error("Content-Disposition carries no field name")]
    MissingFieldName,

    /// The same field name appeared in two sections.
    #[error("field '{field_name}' appeared more than once")]
    DuplicateField { field_name: String },

    /// A section declared a content type outside the image allow-list.
    #[error("unsupported content type '{content_type}' for field '{field_name}'")]
    UnsupportedContentType {
        field_name: String,
        content_type: String,
    },

    /// A section declared an image content type but no `filename` parameter.
    #[error("field '{field_name}' declares an image content type but no filename")]
    MissingFilename { field_name: String },

    /// The declared filename has no `.`-delimited extension.
    #[error("filename '{file_name}' has no extension")]
    MissingExtension { file_name: String },

    /// The filename extension is outside the image allow-list.
    #[error("unsupported file extension '{extension}'")]
    UnsupportedExtension { extension: String },

    /// A declared field never appeared in the stream. Reported for the first
    /// absent field in declaration order.
    #[error("required field '{field_name}' is missing")]
    MissingRequiredField { field_name: String },

    /// The image payload could not be decoded in the format its extension
    /// claims.
    #[error("failed to decode image payload: {0}")]
    ImageDecodeFailure(#[source] image::ImageError),

    /// The resize target was degenerate (e.g. a computed height of zero).
    #[error("failed to resize image: {0}")]
    ImageResizeFailure(String),

    /// Re-encoding the resized bitmap failed.
    #[error("failed to re-encode image: {0}")]
    ImageEncodeFailure(#[source] image::ImageError),

    /// An incoming field exceeded its size limit.
    #[error("field '{}' exceeded the size limit of {limit} bytes", field_name.as_deref().unwrap_or("<unknown>"))]
    FieldSizeExceeded {
        limit: u64,
        field_name: Option<String>,
    },

    /// The whole stream exceeded its size limit.
    #[error("stream exceeded the size limit of {limit} bytes")]
    StreamSizeExceeded { limit: u64 },

    /// The underlying byte stream produced an error.
    #[error("stream read failed: {0}")]
    StreamReadFailed(#[source] BoxError),

    /// Field data could not be decoded as JSON.
    #[cfg(feature = "json")]
    #[error("failed to decode field data as JSON: {0}")]
    DecodeJson(#[source] serde_json::Error),
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
