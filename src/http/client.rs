//! HTTP/1.1 client session.
//!
//! Requests are written straight to the connection. Responses are parsed on
//! the reactor side and handed to the [`HttpHandler`] as one job each, with
//! the entity fully reassembled and any trailers merged into the headers.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::headers::{HeaderMap, ResponseHeaders};
use super::parser::{BodyFraming, ResponseHandler, ResponseParser};
use crate::buffer::ByteQueue;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{Job, JobSender};
use crate::net::{Connection, ConnectionId, ShutdownGuard, StreamHandler};

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status line and headers, trailers appended.
    pub headers: ResponseHeaders,
    /// Raw `Transfer-Encoding` value, empty when absent.
    pub transfer_encoding: String,
    pub entity: Bytes,
}

impl Response {
    #[must_use]
    pub fn status(&self) -> u16 {
        self.headers.status
    }
}

/// Application callbacks for an HTTP client connection. Calls are serialized
/// per connection.
pub trait HttpHandler: Send + 'static {
    /// The connection is established. Typically sends the first request.
    fn on_connect(&mut self, ctx: &HttpContext) -> Result<()> {
        info!(conn = %ctx.id(), remote = %ctx.remote_address(), "http client connected");
        Ok(())
    }

    fn on_response(&mut self, ctx: &HttpContext, response: Response) -> Result<()>;

    fn on_disconnect(&mut self, ctx: &HttpContext) {
        let _ = ctx;
    }
}

/// Handle given to handlers for issuing requests.
#[derive(Debug, Clone)]
pub struct HttpContext {
    connection: Arc<Connection>,
}

impl HttpContext {
    #[must_use]
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    #[must_use]
    pub fn remote_address(&self) -> &str {
        self.connection.remote_address()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Queue an HTTP/1.1 request.
    ///
    /// `Content-Length` is added when an entity is given and the caller did
    /// not set one.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeaderValue`] if any part contains CR or LF, or
    /// [`Error::ShutdownRequested`] once the connection is closing.
    pub fn send_request(
        &self,
        method: &str,
        uri: &str,
        headers: &HeaderMap,
        entity: Option<&[u8]>,
    ) -> Result<()> {
        let mut request = encode_request(method, uri, headers, entity)?;
        self.connection.queue_write_queue(&mut request)
    }

    /// Shut down once pending requests are flushed.
    pub fn close(&self) {
        self.connection.shutdown();
    }
}

fn check_line(part: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(Error::InvalidHeaderValue {
            header: part.to_owned(),
            reason: "contains CR or LF".into(),
        });
    }
    Ok(())
}

fn encode_request(
    method: &str,
    uri: &str,
    headers: &HeaderMap,
    entity: Option<&[u8]>,
) -> Result<ByteQueue> {
    check_line("method", method)?;
    check_line("uri", uri)?;
    if method.is_empty() || method.contains(' ') || uri.is_empty() || uri.contains(' ') {
        return Err(Error::MalformedHttp(format!("bad request line: {method} {uri}")));
    }
    for (name, value) in headers.iter() {
        check_line(name, name)?;
        check_line(name, value)?;
    }

    let mut head = format!("{method} {uri} HTTP/1.1\r\n{headers}");
    if let Some(entity) = entity {
        if !headers.contains("content-length") {
            head.push_str(&format!("Content-Length: {}\r\n", entity.len()));
        }
    }
    head.push_str("\r\n");

    let mut out = ByteQueue::new();
    out.put_bytes(Bytes::from(head));
    if let Some(entity) = entity {
        out.put(entity);
    }
    Ok(out)
}

/// Response being reassembled.
#[derive(Debug, Default)]
struct Pending {
    headers: Option<ResponseHeaders>,
    transfer_encoding: String,
    entity: ByteQueue,
    size: u64,
}

struct Reader {
    parser: ResponseParser,
    pending: Pending,
    failed: bool,
}

/// One HTTP client connection's protocol state.
pub struct HttpClient<H> {
    context: HttpContext,
    jobs: JobSender,
    max_response_size: u64,
    keep_alive: Duration,
    reader: Mutex<Reader>,
    handler: Mutex<H>,
    this: Weak<Self>,
}

impl<H: HttpHandler> HttpClient<H> {
    pub fn new(connection: Arc<Connection>, config: &Config, jobs: JobSender, handler: H) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            context: HttpContext::new(connection),
            jobs,
            max_response_size: config.limits.max_response_size,
            keep_alive: config.timeouts.http_keep_alive,
            reader: Mutex::new(Reader {
                parser: ResponseParser::new(config.limits.max_handshake_size),
                pending: Pending::default(),
                failed: false,
            }),
            handler: Mutex::new(handler),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn context(&self) -> &HttpContext {
        &self.context
    }

    /// Lock the application handler, for inspection outside of jobs.
    pub fn handler(&self) -> parking_lot::MutexGuard<'_, H> {
        self.handler.lock()
    }

    /// # Errors
    ///
    /// See [`HttpContext::send_request`].
    pub fn send_request(
        &self,
        method: &str,
        uri: &str,
        headers: &HeaderMap,
        entity: Option<&[u8]>,
    ) -> Result<()> {
        self.context.send_request(method, uri, headers, entity)
    }

    fn enqueue<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()> + Send + 'static,
    {
        let guard = ShutdownGuard::new(Arc::clone(self.context.connection()));
        self.jobs
            .enqueue(Job::from_weak(self.this.clone(), guard, work))
    }

    fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut H, &HttpContext) -> Result<()>,
    {
        if self.context.connection().is_closed() {
            return Ok(());
        }
        let mut handler = self.handler.lock();
        f(&mut handler, &self.context)
    }

    fn fail(&self, error: &Error) {
        warn!(conn = %self.context.id(), error = %error, "http stream error");
        self.context.connection().force_shutdown();
    }
}

/// Parser hooks wired to the pending response and the job queue.
struct Delivery<'a, H> {
    client: &'a HttpClient<H>,
    pending: &'a mut Pending,
}

impl<H: HttpHandler> ResponseHandler for Delivery<'_, H> {
    fn on_response_headers(
        &mut self,
        headers: ResponseHeaders,
        transfer_encoding: String,
        framing: BodyFraming,
    ) -> Result<()> {
        if let BodyFraming::Length(len) = framing {
            if len > self.client.max_response_size {
                return Err(Error::ResponseTooLarge {
                    size: len,
                    max: self.client.max_response_size,
                });
            }
        }
        *self.pending = Pending {
            headers: Some(headers),
            transfer_encoding,
            ..Pending::default()
        };
        Ok(())
    }

    fn on_response_entity(&mut self, _offset: u64, _is_chunked: bool, data: Bytes) -> Result<()> {
        self.pending.size += data.len() as u64;
        if self.pending.size > self.client.max_response_size {
            return Err(Error::ResponseTooLarge {
                size: self.pending.size,
                max: self.client.max_response_size,
            });
        }
        self.pending.entity.put_bytes(data);
        Ok(())
    }

    fn on_response_end(
        &mut self,
        content_length: u64,
        _is_chunked: bool,
        trailers: HeaderMap,
    ) -> Result<bool> {
        let pending = std::mem::take(&mut *self.pending);
        let Some(mut headers) = pending.headers else {
            return Err(Error::MalformedHttp("response ended before headers".into()));
        };
        headers.headers.extend(trailers);
        debug!(
            conn = %self.client.context.id(),
            status = headers.status,
            len = content_length,
            "response received"
        );
        let response = Response {
            headers,
            transfer_encoding: pending.transfer_encoding,
            entity: pending.entity.freeze(),
        };
        self.client.enqueue(move |client| {
            client.context.connection().set_timeout(client.keep_alive);
            client.run(|handler, ctx| handler.on_response(ctx, response))
        })?;
        Ok(true)
    }
}

impl<H: HttpHandler> HttpClient<H> {
    fn parse(&self, data: &[u8], eof: bool) {
        let mut guard = self.reader.lock();
        let reader = &mut *guard;
        if reader.failed {
            return;
        }
        let mut delivery = Delivery {
            client: self,
            pending: &mut reader.pending,
        };
        let result = if eof {
            reader.parser.finish(&mut delivery)
        } else {
            reader.parser.feed(data, &mut delivery)
        };
        if let Err(e) = result {
            reader.failed = true;
            drop(guard);
            self.fail(&e);
        }
    }
}

impl<H: HttpHandler> StreamHandler for HttpClient<H> {
    fn on_connect(&self) {
        self.context.connection().set_timeout(self.keep_alive);
        if let Err(e) = self.enqueue(|client| client.run(|handler, ctx| handler.on_connect(ctx))) {
            self.fail(&e);
        }
    }

    fn on_read_avail(&self, data: &[u8]) {
        if self.context.connection().is_shutdown_requested() {
            return;
        }
        self.parse(data, false);
    }

    fn on_read_hup(&self) {
        self.parse(&[], true);
        let connection = self.context.connection();
        if !connection.is_closed() {
            let queued = self.enqueue(|client| {
                client.run(|handler, ctx| {
                    handler.on_disconnect(ctx);
                    Ok(())
                })
            });
            if let Err(e) = queued {
                debug!(conn = %self.context.id(), error = %e, "disconnect not delivered");
            }
        }
        connection.shutdown();
    }

    fn connection(&self) -> &Arc<Connection> {
        self.context.connection()
    }
}

impl<H> fmt::Debug for HttpClient<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("context", &self.context)
            .field("max_response_size", &self.max_response_size)
            .finish_non_exhaustive()
    }
}
