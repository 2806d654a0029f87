use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header;
use mime::Mime;
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
#[cfg(feature = "tokio-io")]
use tokio::io::AsyncRead;
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

use crate::disposition::ContentDisposition;
use crate::normalizer::{self, NormalizedImage};
use crate::schema::{FieldRole, FormSchema};
use crate::section::{RawSection, SectionStream};

/// A single parsed field: its raw bytes plus, for image uploads, the
/// extension derived from the declared filename.
#[derive(Debug, Clone)]
pub struct FieldValue {
    bytes: Bytes,
    extension: Option<String>,
    content_type: Option<Mime>,
}

impl FieldValue {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Lower-cased filename extension, including the leading dot. Populated
    /// only when the section declared an allow-listed image content type.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// The section's `Content-Type` header, passed through unmodified.
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// Decodes the bytes as text, honoring the `charset` parameter of the
    /// section's content type and falling back to UTF-8.
    pub fn text(&self) -> String {
        self.text_with_charset("utf-8")
    }

    /// Decodes the bytes as text with `default_encoding` as the fallback
    /// charset label.
    pub fn text_with_charset(&self, default_encoding: &str) -> String {
        let encoding_name = self
            .content_type
            .as_ref()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str())
            .unwrap_or(default_encoding);

        let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);

        let (text, _, _) = encoding.decode(&self.bytes);

        match text {
            Cow::Owned(s) => s,
            Cow::Borrowed(s) => String::from(s),
        }
    }

    /// Deserializes the bytes as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.bytes).map_err(crate::Error::DecodeJson)
    }
}

/// The validated field map built while the section stream is consumed.
///
/// Keys are unique; a repeated field name rejects the whole form. On
/// completion every declared field is present.
#[derive(Debug, Default)]
pub struct ParsedForm {
    entries: HashMap<String, FieldValue>,
}

impl ParsedForm {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.get(name)
    }

    /// Removes and returns a field, transferring ownership of its bytes.
    pub fn take(&mut self, name: &str) -> Option<FieldValue> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// The assembled result handed back to the caller: the field map plus the
/// normalized image when the schema declares an image field.
#[derive(Debug)]
pub struct FormData {
    form: ParsedForm,
    image: Option<NormalizedImage>,
}

impl FormData {
    pub fn fields(&self) -> &ParsedForm {
        &self.form
    }

    pub fn image(&self) -> Option<&NormalizedImage> {
        self.image.as_ref()
    }

    pub fn into_parts(self) -> (ParsedForm, Option<NormalizedImage>) {
        (self.form, self.image)
    }
}

/// Parses a multipart byte stream against `schema` and normalizes the image
/// field.
///
/// The stream is consumed in a single forward pass; on any failure all
/// accumulated state is discarded and only the error is returned.
///
/// # Examples
///
/// ```
/// use multiform::{parse_form, FormSchema};
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"customerId\"\r\n\r\n123456\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let schema = FormSchema::new().text_field("customerId");
///
/// let form = parse_form(stream, "X-BOUNDARY", &schema).await.unwrap();
/// assert_eq!(form.fields().get("customerId").unwrap().text(), "123456");
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub async fn parse_form<S, O, E, B>(
    stream: S,
    boundary: B,
    schema: &FormSchema,
) -> crate::Result<FormData>
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    B: Into<String>,
{
    let mut sections = SectionStream::with_limits(
        stream,
        boundary,
        schema.stream_limit(),
        schema.field_limit(),
    );

    let mut form = ParsedForm::default();

    while let Some(section) = sections.try_next().await? {
        fold_section(&mut form, section, schema)?;
    }

    for name in schema.required_field_names() {
        if !form.contains(name) {
            return Err(crate::Error::MissingRequiredField {
                field_name: name.to_owned(),
            });
        }
    }

    let image = match schema.image_field_name() {
        Some(image_field) => {
            // Completeness was just checked, and the classifier populates an
            // extension for every declared image field it accepts.
            let value = form.get(image_field).ok_or_else(|| {
                crate::Error::MissingRequiredField {
                    field_name: image_field.to_owned(),
                }
            })?;
            let extension = value.extension().ok_or_else(|| {
                crate::Error::MissingFilename {
                    field_name: image_field.to_owned(),
                }
            })?;

            Some(normalizer::normalize(
                value.bytes(),
                extension,
                schema.policy().width_cap(),
            )?)
        }
        None => None,
    };

    Ok(FormData { form, image })
}

/// Parses a multipart body from an [`AsyncRead`](tokio::io::AsyncRead)
/// reader. See [`parse_form`].
///
/// # Optional
///
/// This requires the optional `tokio-io` feature to be enabled.
#[cfg(feature = "tokio-io")]
pub async fn parse_form_from_reader<R, B>(
    reader: R,
    boundary: B,
    schema: &FormSchema,
) -> crate::Result<FormData>
where
    R: AsyncRead + Send + 'static,
    B: Into<String>,
{
    parse_form(ReaderStream::new(reader), boundary, schema).await
}

/// Classifies and validates one section, folding it into `form`.
fn fold_section(
    form: &mut ParsedForm,
    section: RawSection,
    schema: &FormSchema,
) -> crate::Result<()> {
    let disposition = ContentDisposition::parse(&section.headers)?;

    let name = disposition
        .field_name
        .filter(|name| !name.is_empty())
        .ok_or(crate::Error::MissingFieldName)?;

    let role = schema.classify(&name);

    let content_type = match section.headers.get(header::CONTENT_TYPE) {
        Some(value) => {
            let raw = value.to_str().unwrap_or_default();
            match raw.parse::<Mime>() {
                Ok(mime) => Some(mime),
                Err(_) => {
                    return Err(crate::Error::UnsupportedContentType {
                        field_name: name,
                        content_type: raw.to_owned(),
                    });
                }
            }
        }
        None => None,
    };

    let extension = match &content_type {
        Some(content_type) => {
            if !schema.policy().allows_content_type(content_type) {
                return Err(crate::Error::UnsupportedContentType {
                    field_name: name,
                    content_type: content_type.to_string(),
                });
            }

            let file_name = match disposition.file_name {
                Some(file_name) => file_name,
                None => return Err(crate::Error::MissingFilename { field_name: name }),
            };

            let extension = match file_name.rfind('.') {
                Some(idx) => file_name[idx..].to_lowercase(),
                None => return Err(crate::Error::MissingExtension { file_name }),
            };

            if !schema.policy().allows_extension(&extension) {
                return Err(crate::Error::UnsupportedExtension { extension });
            }

            Some(extension)
        }
        None => {
            // A declared image field must arrive with an image content type.
            if role == FieldRole::Image {
                return Err(crate::Error::UnsupportedContentType {
                    field_name: name,
                    content_type: "<missing>".to_owned(),
                });
            }

            None
        }
    };

    if form.contains(&name) {
        return Err(crate::Error::DuplicateField { field_name: name });
    }

    log::debug!(
        "accepted field '{name}' ({role:?}, {} byte(s), extension {:?})",
        section.body.len(),
        extension
    );

    form.entries.insert(
        name,
        FieldValue {
            bytes: section.body,
            extension,
            content_type,
        },
    );

    Ok(())
}
