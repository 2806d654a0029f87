use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;

use crate::SectionByteStream;

/// Accumulates chunks from the underlying byte stream so the splitter can
/// scan for delimiters across chunk boundaries.
pub(crate) struct StreamBuffer {
    pub(crate) eof: bool,
    pub(crate) buf: BytesMut,
    pub(crate) stream: SectionByteStream,
    pub(crate) whole_stream_size_limit: u64,
    pub(crate) stream_size_counter: u64,
}

impl StreamBuffer {
    pub fn new(stream: SectionByteStream, whole_stream_size_limit: u64) -> Self {
        StreamBuffer {
            eof: false,
            buf: BytesMut::new(),
            stream,
            whole_stream_size_limit,
            stream_size_counter: 0,
        }
    }

    pub fn poll_stream(&mut self, cx: &mut Context<'_>) -> Result<(), crate::Error> {
        if self.eof {
            return Ok(());
        }

        loop {
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => {
                    self.stream_size_counter += data.len() as u64;

                    if self.stream_size_counter > self.whole_stream_size_limit {
                        return Err(crate::Error::StreamSizeExceeded {
                            limit: self.whole_stream_size_limit,
                        });
                    }

                    self.buf.extend_from_slice(&data);
                }
                Poll::Ready(Some(Err(err))) => return Err(err),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Ok(());
                }
                Poll::Pending => return Ok(()),
            }
        }
    }

    /// Position of the first occurrence of `pattern` in the buffered bytes.
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        memchr::memmem::find(&self.buf, pattern)
    }

    /// Splits off and returns the first `size` buffered bytes, if available.
    pub fn read_exact(&mut self, size: usize) -> Option<Bytes> {
        if size <= self.buf.len() {
            Some(self.buf.split_to(size).freeze())
        } else {
            None
        }
    }

    /// Reads up to and including the first occurrence of `pattern`.
    pub fn read_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        self.find(pattern)
            .map(|idx| self.buf.split_to(idx + pattern.len()).freeze())
    }

    /// Drops the first `size` buffered bytes.
    pub fn advance(&mut self, size: usize) {
        drop(self.buf.split_to(size));
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("eof", &self.eof)
            .field("buffered", &self.buf.len())
            .finish()
    }
}
