//! An async `multipart/form-data` intake pipeline with typed field
//! validation and image normalization.
//!
//! `multiform` sits between an HTTP layer and whatever persists or echoes an
//! upload. It receives a raw byte stream plus the boundary token from the
//! request's `Content-Type` header, splits the stream into sections, maps
//! each section onto a caller-declared [`FormSchema`], and, for the image
//! field, downscales oversized payloads to a width cap while preserving the
//! original format. The caller gets back either a [`FormData`] or one typed
//! [`Error`]; the crate performs no network I/O and knows nothing about
//! status codes.
//!
//! # Examples
//!
//! ```
//! use multiform::{parse_boundary, parse_form, FormSchema};
//! use bytes::Bytes;
//! use std::convert::Infallible;
//! use futures_util::stream::once;
//!
//! # async fn run() {
//! let boundary = parse_boundary("multipart/form-data; boundary=X-BOUNDARY").unwrap();
//!
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"customerId\"\r\n\r\n123456\r\n--X-BOUNDARY--\r\n";
//! let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//! let schema = FormSchema::new().text_field("customerId");
//!
//! let form = parse_form(stream, boundary, &schema).await.unwrap();
//! assert_eq!(form.fields().get("customerId").unwrap().text(), "123456");
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! For lower-level access, [`SectionStream`] yields the raw sections of a
//! multipart body without any schema applied.

pub use error::Error;
pub use form::{parse_form, FieldValue, FormData, ParsedForm};
#[cfg(feature = "tokio-io")]
pub use form::parse_form_from_reader;
pub use normalizer::NormalizedImage;
pub use schema::{FieldKind, FormSchema, ImagePolicy};
pub use section::{RawSection, SectionStream};

mod buffer;
mod constants;
mod disposition;
mod error;
mod form;
mod normalizer;
mod schema;
mod section;

/// A Result type often returned from methods that can have `multiform`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;

/// The boxed stream every section splitter reads from.
pub(crate) type SectionByteStream =
    futures_util::stream::BoxStream<'static, Result<bytes::Bytes>>;

/// Parses a `Content-Type` header value to extract the boundary token.
///
/// The value must split into exactly two parts on `;`: the media type and a
/// `boundary=` parameter. A single pair of surrounding quotes around the
/// boundary is stripped. Anything else, including an empty or
/// whitespace-only boundary, fails with
/// [`MalformedContentType`](Error::MalformedContentType).
///
/// # Examples
///
/// ```
/// let boundary = multiform::parse_boundary("multipart/form-data; boundary=ABCDEFG").unwrap();
/// assert_eq!(boundary, "ABCDEFG");
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let value = content_type.as_ref();
    let mut parts = value.split(';');

    let (media_type, parameter) = match (parts.next(), parts.next(), parts.next()) {
        (Some(media_type), Some(parameter), None) => (media_type, parameter),
        _ => {
            return Err(Error::MalformedContentType(
                "expected a media type and exactly one `boundary=` parameter".to_owned(),
            ));
        }
    };

    if !media_type.trim().eq_ignore_ascii_case("multipart/form-data") {
        log::warn!("parsing a boundary out of a '{}' content type", media_type.trim());
    }

    let boundary = parameter
        .trim()
        .strip_prefix("boundary=")
        .ok_or_else(|| Error::MalformedContentType("missing `boundary=` parameter".to_owned()))?;

    let boundary = boundary
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(boundary);

    if boundary.trim().is_empty() {
        return Err(Error::MalformedContentType(
            "boundary value is empty".to_owned(),
        ));
    }

    Ok(boundary.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary() {
        let content_type = "multipart/form-data; boundary=ABCDEFG";
        assert_eq!(parse_boundary(content_type).unwrap(), "ABCDEFG");

        let content_type = "multipart/form-data; boundary=------ABCDEFG";
        assert_eq!(parse_boundary(content_type).unwrap(), "------ABCDEFG");

        let content_type = "multipart/form-data; boundary=\"quoted\"";
        assert_eq!(parse_boundary(content_type).unwrap(), "quoted");
    }

    #[test]
    fn test_parse_boundary_requires_exactly_one_parameter() {
        // Zero `;`.
        assert!(parse_boundary("multipart/form-data").is_err());
        // More than one `;`.
        assert!(parse_boundary("multipart/form-data; boundary=AB; charset=utf-8").is_err());
    }

    #[test]
    fn test_parse_boundary_rejects_missing_or_empty_boundary() {
        assert!(parse_boundary("multipart/form-data; bound=ABCDEFG").is_err());
        // The `boundary=` token is matched case-sensitively.
        assert!(parse_boundary("multipart/form-data; Boundary=ABCDEFG").is_err());
        assert!(parse_boundary("multipart/form-data; boundary=").is_err());
        assert!(parse_boundary("multipart/form-data; boundary=\"\"").is_err());
        assert!(parse_boundary("multipart/form-data; boundary=   ").is_err());
    }
}
