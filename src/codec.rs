//! JSON-RPC framing codec for the LSP transport.
//!
//! LSP uses `Content-Length: N\r\n\r\n<body>` framing over stdin/stdout. The
//! splitter is a pure function over a byte buffer so it can be tested against
//! literal wire input; [`FrameReader`] and [`FrameWriter`] wrap it for async
//! streams.
//!
//! A malformed header block (no `Content-Length`, or a non-positive or
//! non-numeric value) is skipped, not fatal: the stream resumes at the next
//! header terminator.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length";

/// Read buffer growth increment.
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("malformed Content-Length header")]
    Malformed,
    #[error("Content-Length must be a positive integer, got {0}")]
    NonPositive(i64),
}

/// One splitter step over buffered input.
#[derive(Debug, PartialEq, Eq)]
pub enum Split {
    /// No complete frame yet; read more input.
    NeedMore,
    /// Header block is malformed; discard `advance` bytes and retry.
    SkipHeader { advance: usize, reason: HeaderError },
    /// A complete frame: body at `body_start..body_start + body_len`,
    /// consume `advance` bytes total.
    Frame {
        advance: usize,
        body_start: usize,
        body_len: usize,
    },
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Parse the `Content-Length` value out of a header block. The last
/// occurrence wins when a stray earlier one is present (e.g. garbage from a
/// previous malformed frame).
fn header_content_length(header: &[u8]) -> Result<usize, HeaderError> {
    let name_at = rfind(header, CONTENT_LENGTH).ok_or(HeaderError::MissingContentLength)?;
    let line = &header[name_at..];
    let line = match find(line, b"\r\n") {
        Some(eol) => &line[..eol],
        None => line,
    };

    let colon = find(line, b":").ok_or(HeaderError::Malformed)?;
    let value = std::str::from_utf8(&line[colon + 1..]).map_err(|_| HeaderError::Malformed)?;
    let value: i64 = value.trim().parse().map_err(|_| HeaderError::Malformed)?;
    if value <= 0 {
        return Err(HeaderError::NonPositive(value));
    }
    Ok(value as usize)
}

/// Locate the next frame in `buf`. Never consumes bytes itself; the caller
/// drains `advance` bytes on `SkipHeader` and `Frame`.
pub fn split_frame(buf: &[u8]) -> Split {
    let Some(terminator) = find(buf, HEADER_TERMINATOR) else {
        return Split::NeedMore;
    };
    let body_start = terminator + HEADER_TERMINATOR.len();

    match header_content_length(&buf[..terminator]) {
        Err(reason) => Split::SkipHeader {
            advance: body_start,
            reason,
        },
        Ok(body_len) => {
            if buf.len() - body_start < body_len {
                Split::NeedMore
            } else {
                Split::Frame {
                    advance: body_start + body_len,
                    body_start,
                    body_len,
                }
            }
        }
    }
}

/// Prefix `body` with its `Content-Length` header. The result is written in
/// a single output operation so concurrent writers never interleave frames.
pub fn encode(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Reads framed message bodies from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK_BYTES),
        }
    }

    /// Next frame body, or `None` once the stream is exhausted.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match split_frame(&self.buf) {
                Split::Frame {
                    advance,
                    body_start,
                    body_len,
                } => {
                    let body = self.buf[body_start..body_start + body_len].to_vec();
                    self.buf.drain(..advance);
                    return Ok(Some(body));
                }
                Split::SkipHeader { advance, reason } => {
                    tracing::warn!(%reason, "skipping malformed frame header");
                    self.buf.drain(..advance);
                }
                Split::NeedMore => {
                    let n = self
                        .reader
                        .read_buf(&mut self.buf)
                        .await
                        .context("reading from input stream")?;
                    if n == 0 {
                        if !self.buf.is_empty() {
                            tracing::warn!(
                                unconsumed = self.buf.len(),
                                "input stream ended mid-frame"
                            );
                        }
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Writes framed message bodies to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let frame = encode(body);
        self.writer
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
