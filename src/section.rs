use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
#[cfg(feature = "tokio-io")]
use tokio::io::AsyncRead;
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

use crate::buffer::StreamBuffer;
use crate::constants;
use crate::disposition::ContentDisposition;
use crate::SectionByteStream;

/// One self-contained part of a multipart body: its header block and its
/// payload bytes.
///
/// Repeated header names keep every value in encounter order.
#[derive(Debug)]
pub struct RawSection {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FindingFirstBoundary,
    DeterminingBoundaryType,
    ReadingSectionHeaders,
    ReadingSectionBody,
    Eof,
}

/// Splits a multipart byte stream into an ordered sequence of
/// [`RawSection`]s via its [`Stream`] implementation.
///
/// Sections are produced lazily and in order; the stream finishes exactly
/// when the closing `--<boundary>--` delimiter is read. Each section's body
/// is buffered whole before it is yielded, so callers handling anything
/// larger than small form uploads should cap it with
/// [`with_limits`](SectionStream::with_limits).
///
/// # Examples
///
/// ```
/// use multiform::SectionStream;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::{once, TryStreamExt};
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut sections = SectionStream::new(stream, "X-BOUNDARY");
///
/// while let Some(section) = sections.try_next().await.unwrap() {
///     println!("Section body: {:?}", section.body);
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct SectionStream {
    buffer: StreamBuffer,
    boundary: String,
    stage: Stage,
    per_field_size_limit: u64,
    pending_headers: Option<HeaderMap>,
    next_section_idx: usize,
}

impl SectionStream {
    /// Constructs a new `SectionStream` over the given byte stream and
    /// boundary, with no size limits.
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> SectionStream
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        Self::with_limits(
            stream,
            boundary,
            constants::DEFAULT_WHOLE_STREAM_SIZE_LIMIT,
            constants::DEFAULT_PER_FIELD_SIZE_LIMIT,
        )
    }

    /// Constructs a new `SectionStream` that fails with
    /// [`StreamSizeExceeded`](crate::Error::StreamSizeExceeded) or
    /// [`FieldSizeExceeded`](crate::Error::FieldSizeExceeded) once the given
    /// byte counts are crossed.
    pub fn with_limits<S, O, E, B>(
        stream: S,
        boundary: B,
        whole_stream_size_limit: u64,
        per_field_size_limit: u64,
    ) -> SectionStream
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(Into::into)
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        let stream: SectionByteStream = Box::pin(stream);

        SectionStream {
            buffer: StreamBuffer::new(stream, whole_stream_size_limit),
            boundary: boundary.into(),
            stage: Stage::FindingFirstBoundary,
            per_field_size_limit,
            pending_headers: None,
            next_section_idx: 0,
        }
    }

    /// Constructs a new `SectionStream` over an
    /// [`AsyncRead`](tokio::io::AsyncRead) reader.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub fn with_reader<R, B>(reader: R, boundary: B) -> SectionStream
    where
        R: AsyncRead + Send + 'static,
        B: Into<String>,
    {
        SectionStream::new(ReaderStream::new(reader), boundary)
    }

    /// Yields the next [`RawSection`] if available.
    pub async fn next_section(&mut self) -> crate::Result<Option<RawSection>> {
        self.try_next().await
    }

    fn current_field_name(&self) -> Option<String> {
        self.pending_headers
            .as_ref()
            .and_then(|headers| ContentDisposition::parse(headers).ok())
            .and_then(|cd| cd.field_name)
    }
}

impl Stream for SectionStream {
    type Item = Result<RawSection, crate::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.stage == Stage::Eof {
            return Poll::Ready(None);
        }

        if let Err(err) = this.buffer.poll_stream(cx) {
            this.stage = Stage::Eof;
            return Poll::Ready(Some(Err(err)));
        }

        let dash_boundary = format!("{}{}", constants::BOUNDARY_EXT, this.boundary);

        loop {
            match this.stage {
                Stage::FindingFirstBoundary => {
                    match this.buffer.read_until(dash_boundary.as_bytes()) {
                        Some(_) => this.stage = Stage::DeterminingBoundaryType,
                        None => {
                            return if this.buffer.eof {
                                this.stage = Stage::Eof;
                                Poll::Ready(Some(Err(crate::Error::TruncatedBody)))
                            } else {
                                Poll::Pending
                            };
                        }
                    }
                }
                Stage::DeterminingBoundaryType => {
                    // The two bytes after a dash-boundary decide whether it
                    // opens a section or closes the stream.
                    if this.buffer.buf.len() >= 2 {
                        if &this.buffer.buf[..2] == constants::BOUNDARY_EXT.as_bytes() {
                            log::debug!("reached the closing boundary after {} section(s)", this.next_section_idx);
                            this.buffer.advance(2);
                            this.stage = Stage::Eof;
                            return Poll::Ready(None);
                        } else if &this.buffer.buf[..2] == constants::CRLF.as_bytes() {
                            this.buffer.advance(2);
                            this.stage = Stage::ReadingSectionHeaders;
                        } else if this.buffer.buf[0] == b'\n' {
                            this.buffer.advance(1);
                            this.stage = Stage::ReadingSectionHeaders;
                        } else {
                            this.stage = Stage::Eof;
                            return Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                "unexpected bytes after a boundary delimiter".to_owned(),
                            ))));
                        }
                    } else if this.buffer.eof {
                        this.stage = Stage::Eof;
                        return Poll::Ready(Some(Err(crate::Error::TruncatedBody)));
                    } else {
                        return Poll::Pending;
                    }
                }
                Stage::ReadingSectionHeaders => {
                    // The header block runs up to the first blank line,
                    // terminated by either CRLF or bare LF.
                    let crlf_end = this
                        .buffer
                        .find(constants::CRLF_CRLF.as_bytes())
                        .map(|idx| idx + constants::CRLF_CRLF.len());
                    let lf_end = this
                        .buffer
                        .find(constants::LF_LF.as_bytes())
                        .map(|idx| idx + constants::LF_LF.len());

                    let block_end = match (crlf_end, lf_end) {
                        (Some(a), Some(b)) => a.min(b),
                        (Some(a), None) => a,
                        (None, Some(b)) => b,
                        (None, None) => {
                            return if this.buffer.eof {
                                this.stage = Stage::Eof;
                                if this.buffer.find(dash_boundary.as_bytes()).is_some() {
                                    Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                        "no blank line between section headers and body".to_owned(),
                                    ))))
                                } else {
                                    Poll::Ready(Some(Err(crate::Error::TruncatedBody)))
                                }
                            } else {
                                Poll::Pending
                            };
                        }
                    };

                    // Length is checked above, `read_exact` cannot miss.
                    let header_bytes = match this.buffer.read_exact(block_end) {
                        Some(bytes) => bytes,
                        None => {
                            this.stage = Stage::Eof;
                            return Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                "section header block vanished from the buffer".to_owned(),
                            ))));
                        }
                    };

                    let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

                    let headers = match httparse::parse_headers(&header_bytes, &mut headers) {
                        Ok(httparse::Status::Complete((_, raw_headers))) => {
                            match convert_raw_headers(raw_headers) {
                                Ok(headers) => headers,
                                Err(err) => {
                                    this.stage = Stage::Eof;
                                    return Poll::Ready(Some(Err(err)));
                                }
                            }
                        }
                        Ok(httparse::Status::Partial) => {
                            this.stage = Stage::Eof;
                            return Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                "incomplete section header block".to_owned(),
                            ))));
                        }
                        Err(err) => {
                            this.stage = Stage::Eof;
                            return Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                format!("invalid section header block: {err}"),
                            ))));
                        }
                    };

                    this.pending_headers = Some(headers);
                    this.stage = Stage::ReadingSectionBody;
                }
                Stage::ReadingSectionBody => {
                    // The body runs up to, but not including, the line break
                    // that precedes the next dash-boundary.
                    let body_delimiter = format!("{}{}", constants::LF, dash_boundary);

                    match this.buffer.find(body_delimiter.as_bytes()) {
                        Some(idx) => {
                            if idx as u64 > this.per_field_size_limit {
                                let field_name = this.current_field_name();
                                this.stage = Stage::Eof;
                                return Poll::Ready(Some(Err(crate::Error::FieldSizeExceeded {
                                    limit: this.per_field_size_limit,
                                    field_name,
                                })));
                            }

                            let mut body = match this.buffer.read_exact(idx) {
                                Some(bytes) => bytes,
                                None => {
                                    this.stage = Stage::Eof;
                                    return Poll::Ready(Some(Err(crate::Error::MalformedSection(
                                        "section body vanished from the buffer".to_owned(),
                                    ))));
                                }
                            };

                            // Consume the line break and the delimiter itself.
                            this.buffer.advance(body_delimiter.len());

                            if body.last() == Some(&b'\r') {
                                body.truncate(body.len() - 1);
                            }

                            let headers = this.pending_headers.take().unwrap_or_default();
                            let idx = this.next_section_idx;
                            this.next_section_idx += 1;
                            this.stage = Stage::DeterminingBoundaryType;

                            log::trace!("yielding section #{idx} with {} body byte(s)", body.len());

                            return Poll::Ready(Some(Ok(RawSection { headers, body })));
                        }
                        None => {
                            if this.buffer.eof {
                                this.stage = Stage::Eof;
                                return Poll::Ready(Some(Err(crate::Error::TruncatedBody)));
                            }

                            if this.buffer.buf.len() as u64 > this.per_field_size_limit {
                                let field_name = this.current_field_name();
                                this.stage = Stage::Eof;
                                return Poll::Ready(Some(Err(crate::Error::FieldSizeExceeded {
                                    limit: this.per_field_size_limit,
                                    field_name,
                                })));
                            }

                            return Poll::Pending;
                        }
                    }
                }
                Stage::Eof => return Poll::Ready(None),
            }
        }
    }
}

fn convert_raw_headers(raw_headers: &[httparse::Header<'_>]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name).map_err(|err| {
            crate::Error::MalformedSection(format!(
                "invalid section header name {:?}: {err}",
                raw_header.name
            ))
        })?;

        let value = HeaderValue::try_from(raw_header.value).map_err(|err| {
            crate::Error::MalformedSection(format!("invalid section header value: {err}"))
        })?;

        // `append` keeps repeated names in encounter order.
        headers.append(name, value);
    }

    Ok(headers)
}

impl std::fmt::Debug for SectionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionStream")
            .field("boundary", &self.boundary)
            .field("stage", &self.stage)
            .field("next_section_idx", &self.next_section_idx)
            .finish()
    }
}
