//! Streaming HTTP/1.1 response parser.
//!
//! Header blocks are parsed with `httparse` once complete. The entity is
//! streamed to the [`ResponseHandler`] as it arrives, framed by
//! `Content-Length`, chunked transfer coding, or the end of the connection.

use bytes::{Buf, Bytes, BytesMut};

use super::headers::{HeaderMap, ResponseHeaders};
use crate::error::{Error, Result};

const MAX_HEADERS: usize = 64;

/// How the entity of a response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes follow.
    Length(u64),
    Chunked,
    /// Everything until the server closes the connection.
    UntilEof,
}

/// Hooks called by [`ResponseParser`].
pub trait ResponseHandler {
    fn on_response_headers(
        &mut self,
        headers: ResponseHeaders,
        transfer_encoding: String,
        framing: BodyFraming,
    ) -> Result<()>;

    /// Entity bytes at `offset`, already dechunked.
    fn on_response_entity(&mut self, offset: u64, is_chunked: bool, data: Bytes) -> Result<()>;

    /// The response is complete. `content_length` is the total entity size;
    /// `trailers` holds headers sent after the last chunk.
    ///
    /// Returning `false` pauses the parser until the next feed.
    fn on_response_end(
        &mut self,
        content_length: u64,
        is_chunked: bool,
        trailers: HeaderMap,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Headers,
    Body { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkEnd,
    Trailers,
    UntilEof,
}

/// Incremental response parser for one connection.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    input: BytesMut,
    max_header_size: usize,
    entity_offset: u64,
}

impl ResponseParser {
    #[must_use]
    pub fn new(max_header_size: usize) -> Self {
        Self {
            state: State::Headers,
            input: BytesMut::new(),
            max_header_size,
            entity_offset: 0,
        }
    }

    /// Whether the parser sits between responses.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::Headers && self.input.is_empty()
    }

    /// Append `data` and parse as far as possible. An empty slice resumes a
    /// paused parser.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHttp`] on a syntax error, or whatever a hook returns.
    pub fn feed<H: ResponseHandler + ?Sized>(&mut self, data: &[u8], handler: &mut H) -> Result<()> {
        self.input.extend_from_slice(data);
        loop {
            let progressed = match self.state {
                State::Headers => self.read_headers(handler)?,
                State::Body { remaining } => {
                    let remaining = self.deliver(remaining, false, handler)?;
                    if remaining == 0 {
                        if !self.finish_response(false, HeaderMap::new(), handler)? {
                            return Ok(());
                        }
                        true
                    } else {
                        self.state = State::Body { remaining };
                        false
                    }
                }
                State::ChunkSize => self.read_chunk_size()?,
                State::ChunkData { remaining } => {
                    let remaining = self.deliver(remaining, true, handler)?;
                    self.state = if remaining == 0 {
                        State::ChunkEnd
                    } else {
                        State::ChunkData { remaining }
                    };
                    remaining == 0
                }
                State::ChunkEnd => {
                    if self.input.len() < 2 {
                        false
                    } else if &self.input[..2] == b"\r\n" {
                        self.input.advance(2);
                        self.state = State::ChunkSize;
                        true
                    } else {
                        return Err(Error::MalformedHttp("missing CRLF after chunk".into()));
                    }
                }
                State::Trailers => match self.read_trailers()? {
                    Some(trailers) => {
                        if !self.finish_response(true, trailers, handler)? {
                            return Ok(());
                        }
                        true
                    }
                    None => false,
                },
                State::UntilEof => {
                    let len = self.input.len() as u64;
                    self.deliver(len, false, handler)?;
                    false
                }
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// The server closed the connection.
    ///
    /// Completes a response delimited by end of stream.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHttp`] if a response was cut off mid-way.
    pub fn finish<H: ResponseHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        match self.state {
            State::UntilEof => {
                self.finish_response(false, HeaderMap::new(), handler)?;
                Ok(())
            }
            State::Headers if self.input.is_empty() => Ok(()),
            _ => Err(Error::MalformedHttp("connection closed mid-response".into())),
        }
    }

    fn read_headers<H: ResponseHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        if self.input.is_empty() {
            return Ok(false);
        }
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut slots);
        let consumed = match response.parse(&self.input)? {
            httparse::Status::Complete(consumed) => consumed,
            httparse::Status::Partial => {
                if self.input.len() > self.max_header_size {
                    return Err(Error::MalformedHttp(format!(
                        "response headers exceed {} bytes",
                        self.max_header_size
                    )));
                }
                return Ok(false);
            }
        };
        let headers = HeaderMap::from_httparse(response.headers)
            .ok_or_else(|| Error::MalformedHttp("header value is not UTF-8".into()))?;
        let headers = ResponseHeaders {
            version: response.version.unwrap_or(1),
            status: response.code.unwrap_or(0),
            reason: response.reason.unwrap_or("").to_owned(),
            headers,
        };
        self.input.advance(consumed);

        // Interim responses precede the final one for the same request.
        if (100..200).contains(&headers.status) && headers.status != 101 {
            return Ok(true);
        }

        let transfer_encoding = headers
            .headers
            .get("transfer-encoding")
            .unwrap_or("")
            .to_owned();
        let framing = if headers.is_bodiless() {
            BodyFraming::Length(0)
        } else if headers.is_chunked() {
            BodyFraming::Chunked
        } else if let Some(len) = headers.content_length() {
            BodyFraming::Length(len)
        } else if headers.headers.contains("content-length") {
            return Err(Error::MalformedHttp("invalid content-length".into()));
        } else {
            BodyFraming::UntilEof
        };

        self.entity_offset = 0;
        self.state = match framing {
            BodyFraming::Length(remaining) => State::Body { remaining },
            BodyFraming::Chunked => State::ChunkSize,
            BodyFraming::UntilEof => State::UntilEof,
        };
        handler.on_response_headers(headers, transfer_encoding, framing)?;
        Ok(true)
    }

    fn read_chunk_size(&mut self) -> Result<bool> {
        match httparse::parse_chunk_size(&self.input) {
            Ok(httparse::Status::Complete((consumed, size))) => {
                self.input.advance(consumed);
                self.state = if size == 0 {
                    State::Trailers
                } else {
                    State::ChunkData { remaining: size }
                };
                Ok(true)
            }
            Ok(httparse::Status::Partial) => Ok(false),
            Err(_) => Err(Error::MalformedHttp("invalid chunk size".into())),
        }
    }

    fn read_trailers(&mut self) -> Result<Option<HeaderMap>> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        match httparse::parse_headers(&self.input, &mut slots)? {
            httparse::Status::Complete((consumed, parsed)) => {
                let trailers = HeaderMap::from_httparse(parsed)
                    .ok_or_else(|| Error::MalformedHttp("trailer value is not UTF-8".into()))?;
                self.input.advance(consumed);
                Ok(Some(trailers))
            }
            httparse::Status::Partial => Ok(None),
        }
    }

    /// Hand up to `remaining` buffered bytes to the handler; returns what is
    /// still outstanding.
    fn deliver<H: ResponseHandler + ?Sized>(
        &mut self,
        remaining: u64,
        is_chunked: bool,
        handler: &mut H,
    ) -> Result<u64> {
        let take = remaining.min(self.input.len() as u64) as usize;
        if take == 0 {
            return Ok(remaining);
        }
        let chunk = self.input.split_to(take).freeze();
        let offset = self.entity_offset;
        self.entity_offset += take as u64;
        handler.on_response_entity(offset, is_chunked, chunk)?;
        Ok(remaining - take as u64)
    }

    fn finish_response<H: ResponseHandler + ?Sized>(
        &mut self,
        is_chunked: bool,
        trailers: HeaderMap,
        handler: &mut H,
    ) -> Result<bool> {
        let content_length = self.entity_offset;
        self.entity_offset = 0;
        self.state = State::Headers;
        handler.on_response_end(content_length, is_chunked, trailers)
    }
}
