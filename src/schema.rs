use mime::Mime;

use crate::constants;

/// Width cap and allow-lists applied to the image field.
///
/// The defaults accept `image/jpeg`, `image/png`, `image/webp` and
/// `image/bmp` payloads named with a matching extension, and cap the
/// normalized width at 600 pixels.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    max_width: u32,
    content_types: Vec<String>,
    extensions: Vec<String>,
}

impl ImagePolicy {
    pub fn new() -> ImagePolicy {
        ImagePolicy::default()
    }

    /// Sets the maximum width, in pixels, above which images are resized.
    pub fn max_width(mut self, max_width: u32) -> ImagePolicy {
        self.max_width = max_width;
        self
    }

    /// Replaces the content-type allow-list, e.g. `["image/png"]`.
    pub fn content_types<I, T>(mut self, content_types: I) -> ImagePolicy
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.content_types = content_types.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the extension allow-list, e.g. `[".png"]`. Entries are
    /// compared case-insensitively, including the leading dot.
    pub fn extensions<I, T>(mut self, extensions: I) -> ImagePolicy
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.into().to_lowercase())
            .collect();
        self
    }

    pub(crate) fn allows_content_type(&self, content_type: &Mime) -> bool {
        self.content_types
            .iter()
            .any(|allowed| allowed == content_type.essence_str())
    }

    /// `extension` must already be lower-cased with its leading dot.
    pub(crate) fn allows_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|allowed| allowed == extension)
    }

    pub(crate) fn width_cap(&self) -> u32 {
        self.max_width
    }
}

impl Default for ImagePolicy {
    fn default() -> Self {
        ImagePolicy {
            max_width: constants::DEFAULT_MAX_IMAGE_WIDTH,
            content_types: constants::ALLOWED_IMAGE_CONTENT_TYPES
                .iter()
                .map(|&ct| ct.to_owned())
                .collect(),
            extensions: constants::ALLOWED_IMAGE_EXTENSIONS
                .iter()
                .map(|&ext| ext.to_owned())
                .collect(),
        }
    }
}

/// What a declared field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A plain text or binary value, kept as raw bytes.
    Text,
    /// A file upload that must satisfy the [`ImagePolicy`] and is normalized
    /// after validation.
    Image,
}

/// The role a section plays within a declared schema, resolved once per
/// section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldRole {
    Text,
    Image,
    Unrecognized,
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    kind: FieldKind,
}

/// The caller's declaration of a form: which fields are required, in which
/// order they are reported missing, and the policy applied to the image
/// field.
///
/// Every declared field is required exactly once; sections with undeclared
/// names are kept as plain entries.
///
/// # Examples
///
/// ```
/// use multiform::{FormSchema, ImagePolicy};
///
/// let schema = FormSchema::new()
///     .text_field("customerId")
///     .image_field("image")
///     .image_policy(ImagePolicy::new().max_width(600));
/// ```
#[derive(Debug, Clone)]
pub struct FormSchema {
    fields: Vec<FieldSpec>,
    image_policy: ImagePolicy,
    whole_stream_size_limit: u64,
    per_field_size_limit: u64,
}

impl FormSchema {
    pub fn new() -> FormSchema {
        FormSchema::default()
    }

    /// Declares a required plain field.
    pub fn text_field<N: Into<String>>(mut self, name: N) -> FormSchema {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind: FieldKind::Text,
        });
        self
    }

    /// Declares the required image field. A schema holds at most one image
    /// field; declaring a second one replaces the first.
    pub fn image_field<N: Into<String>>(mut self, name: N) -> FormSchema {
        self.fields.retain(|field| field.kind != FieldKind::Image);
        self.fields.push(FieldSpec {
            name: name.into(),
            kind: FieldKind::Image,
        });
        self
    }

    /// Replaces the default [`ImagePolicy`].
    pub fn image_policy(mut self, policy: ImagePolicy) -> FormSchema {
        self.image_policy = policy;
        self
    }

    /// Caps the total number of bytes read from the stream.
    pub fn whole_stream_size_limit(mut self, limit: u64) -> FormSchema {
        self.whole_stream_size_limit = limit;
        self
    }

    /// Caps the number of bytes buffered for a single field.
    pub fn per_field_size_limit(mut self, limit: u64) -> FormSchema {
        self.per_field_size_limit = limit;
        self
    }

    pub(crate) fn classify(&self, name: &str) -> FieldRole {
        match self.fields.iter().find(|field| field.name == name) {
            Some(field) => match field.kind {
                FieldKind::Text => FieldRole::Text,
                FieldKind::Image => FieldRole::Image,
            },
            None => FieldRole::Unrecognized,
        }
    }

    /// Declared field names, in declaration order.
    pub(crate) fn required_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub(crate) fn image_field_name(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.kind == FieldKind::Image)
            .map(|field| field.name.as_str())
    }

    pub(crate) fn policy(&self) -> &ImagePolicy {
        &self.image_policy
    }

    pub(crate) fn stream_limit(&self) -> u64 {
        self.whole_stream_size_limit
    }

    pub(crate) fn field_limit(&self) -> u64 {
        self.per_field_size_limit
    }
}

impl Default for FormSchema {
    fn default() -> Self {
        FormSchema {
            fields: Vec::new(),
            image_policy: ImagePolicy::default(),
            whole_stream_size_limit: constants::DEFAULT_WHOLE_STREAM_SIZE_LIMIT,
            per_field_size_limit: constants::DEFAULT_PER_FIELD_SIZE_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let schema = FormSchema::new().text_field("customerId").image_field("image");

        assert_eq!(schema.classify("customerId"), FieldRole::Text);
        assert_eq!(schema.classify("image"), FieldRole::Image);
        assert_eq!(schema.classify("comment"), FieldRole::Unrecognized);
        assert_eq!(schema.image_field_name(), Some("image"));
    }

    #[test]
    fn test_second_image_field_replaces_first() {
        let schema = FormSchema::new().image_field("avatar").image_field("photo");
        assert_eq!(schema.image_field_name(), Some("photo"));
        assert_eq!(schema.classify("avatar"), FieldRole::Unrecognized);
    }

    #[test]
    fn test_default_policy_allow_lists() {
        let policy = ImagePolicy::default();

        assert!(policy.allows_content_type(&mime::IMAGE_JPEG));
        assert!(policy.allows_content_type(&mime::IMAGE_PNG));
        assert!(!policy.allows_content_type(&mime::IMAGE_GIF));

        assert!(policy.allows_extension(".jpg"));
        assert!(policy.allows_extension(".webp"));
        assert!(!policy.allows_extension(".gif"));
    }
}
