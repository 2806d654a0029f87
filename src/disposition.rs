use http::header::{self, HeaderMap};

/// The `name` and `filename` parameters of a section's `Content-Disposition`
/// header.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    /// Requires exactly one `Content-Disposition` header in `headers` and
    /// tokenizes its parameter list.
    pub fn parse(headers: &HeaderMap) -> crate::Result<ContentDisposition> {
        let mut values = headers.get_all(header::CONTENT_DISPOSITION).iter();

        let value = match (values.next(), values.next()) {
            (Some(value), None) => value,
            _ => return Err(crate::Error::MissingContentDisposition),
        };

        let value = value
            .to_str()
            .map_err(|_| crate::Error::MissingContentDisposition)?;

        Ok(Self::parse_value(value))
    }

    /// Tokenizes a `Content-Disposition` value such as
    /// `form-data; name="customerId"; filename="photo.jpg"`.
    ///
    /// Parameters are `;`-separated `key=value` pairs. Keys are matched
    /// case-insensitively, values may be quoted (with `\"` escapes) or bare,
    /// and the parameter order is irrelevant. The leading disposition type
    /// (`form-data`) carries no `=` and is skipped.
    fn parse_value(value: &str) -> ContentDisposition {
        let mut disposition = ContentDisposition::default();

        for (key, val) in Tokenizer::new(value) {
            if key.eq_ignore_ascii_case("name") {
                disposition.field_name.get_or_insert(val);
            } else if key.eq_ignore_ascii_case("filename") {
                disposition.file_name.get_or_insert(val);
            }
        }

        disposition
    }
}

/// Iterator over `key=value` parameters of a semicolon-delimited header value.
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(value: &'a str) -> Self {
        Tokenizer { rest: value }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = (&'a str, String);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = self.rest.trim_start_matches([' ', '\t', ';']);
            if rest.is_empty() {
                self.rest = rest;
                return None;
            }

            // Key runs up to `=` or the next `;` (a bare token such as
            // `form-data`, which carries no value).
            let key_end = rest.find(['=', ';']).unwrap_or(rest.len());
            let key = rest[..key_end].trim();

            if !rest[key_end..].starts_with('=') {
                self.rest = &rest[key_end..];
                continue;
            }

            let after_eq = &rest[key_end + 1..];

            if let Some(quoted) = after_eq.strip_prefix('"') {
                let mut value = String::new();
                let mut chars = quoted.char_indices();
                let mut consumed = quoted.len();

                while let Some((idx, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => {
                            consumed = idx + 1;
                            break;
                        }
                        _ => value.push(ch),
                    }
                }

                self.rest = &quoted[consumed..];
                return Some((key, value));
            }

            let value_end = after_eq.find(';').unwrap_or(after_eq.len());
            let value = after_eq[..value_end].trim().to_owned();
            self.rest = &after_eq[value_end..];
            return Some((key, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> ContentDisposition {
        ContentDisposition::parse_value(value)
    }

    #[test]
    fn test_field_name() {
        let cd = parse(r#"form-data; name="my_field""#);
        assert_eq!(cd.field_name.as_deref(), Some("my_field"));
        assert_eq!(cd.file_name, None);

        let cd = parse(r#"form-data; name="my field""#);
        assert_eq!(cd.field_name.as_deref(), Some("my field"));

        let cd = parse("form-data; name=\"你好\"; filename=\"file abc.txt\"");
        assert_eq!(cd.field_name.as_deref(), Some("你好"));
        assert_eq!(cd.file_name.as_deref(), Some("file abc.txt"));
    }

    #[test]
    fn test_file_name() {
        let cd = parse(r#"form-data; name="my_field"; filename="file_name.txt""#);
        assert_eq!(cd.file_name.as_deref(), Some("file_name.txt"));

        let cd = parse(r#"form-data; filename="file-name.txt""#);
        assert_eq!(cd.field_name, None);
        assert_eq!(cd.file_name.as_deref(), Some("file-name.txt"));
    }

    #[test]
    fn test_reordered_attributes() {
        let cd = parse(r#"form-data; filename="photo.jpg"; name="image""#);
        assert_eq!(cd.field_name.as_deref(), Some("image"));
        assert_eq!(cd.file_name.as_deref(), Some("photo.jpg"));
    }

    #[test]
    fn test_escaped_quotes() {
        let cd = parse(r#"form-data; name="a\"b"; filename="we \"love\" quotes.png""#);
        assert_eq!(cd.field_name.as_deref(), Some(r#"a"b"#));
        assert_eq!(cd.file_name.as_deref(), Some(r#"we "love" quotes.png"#));
    }

    #[test]
    fn test_bare_values() {
        let cd = parse("form-data; name=plain; filename=data.bin");
        assert_eq!(cd.field_name.as_deref(), Some("plain"));
        assert_eq!(cd.file_name.as_deref(), Some("data.bin"));
    }

    #[test]
    fn test_case_insensitive_keys() {
        let cd = parse(r#"form-data; Name="a"; FILENAME="b.png""#);
        assert_eq!(cd.field_name.as_deref(), Some("a"));
        assert_eq!(cd.file_name.as_deref(), Some("b.png"));
    }

    #[test]
    fn test_missing_parameters() {
        let cd = parse("form-data");
        assert_eq!(cd, ContentDisposition::default());

        let cd = parse("");
        assert_eq!(cd, ContentDisposition::default());
    }
}
