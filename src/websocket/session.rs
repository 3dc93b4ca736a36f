//! WebSocket session: turns a connection's byte stream into handler calls.
//!
//! The reactor side ([`StreamHandler`]) decodes frames under the reader lock
//! and enqueues one job per complete data or control message. The job side
//! locks the application handler; since jobs of one connection never overlap
//! that lock is uncontended.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::close::{CloseCode, CloseFrame};
use super::decoder::{FrameDecoder, FrameHandler};
use super::frame::Frame;
use super::handshake::{HandshakeRequest, HandshakeResponse, reject_response};
use super::mask::random_mask;
use super::message::Message;
use super::opcode::OpCode;
use super::role::Role;
use crate::buffer::ByteQueue;
use crate::config::{Config, Limits};
use crate::error::{Error, Result};
use crate::job::{Job, JobSender};
use crate::net::{Connection, ConnectionId, ShutdownGuard, StreamHandler};

/// Application callbacks for one WebSocket connection.
///
/// Every method runs inside a dispatcher job; calls for one connection are
/// serialized. Returning [`Error::Close`] closes the session with that status.
/// Any other error force-closes the connection and is reported to the
/// dispatcher's fault hook.
pub trait WebSocketHandler: Send + 'static {
    /// The session is ready to exchange messages.
    fn on_open(&mut self, ctx: &WsContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn on_message(&mut self, ctx: &WsContext, message: Message) -> Result<()>;

    /// Default: answer with a pong carrying the same payload.
    fn on_ping(&mut self, ctx: &WsContext, payload: Bytes) -> Result<()> {
        ctx.send_frame(&Frame::pong(payload))
    }

    /// Default: log only.
    fn on_pong(&mut self, ctx: &WsContext, payload: Bytes) -> Result<()> {
        debug!(conn = %ctx.id(), len = payload.len(), "pong received");
        Ok(())
    }

    /// Default: reply with a normal-closure frame and shut down.
    fn on_close(&mut self, ctx: &WsContext, frame: Option<CloseFrame>) -> Result<()> {
        debug!(conn = %ctx.id(), code = ?frame.as_ref().map(|f| f.code), "close received");
        ctx.close(CloseCode::Normal, "");
        Ok(())
    }

    /// The peer hung up.
    fn on_disconnect(&mut self, ctx: &WsContext) {
        let _ = ctx;
    }
}

/// Handle given to handlers for writing back to the peer.
#[derive(Debug, Clone)]
pub struct WsContext {
    connection: Arc<Connection>,
    role: Role,
}

impl WsContext {
    #[must_use]
    pub fn new(connection: Arc<Connection>, role: Role) -> Self {
        Self { connection, role }
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

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Queue one frame, masked if this end is a client.
    ///
    /// # Errors
    ///
    /// [`Error::ShutdownRequested`] once the session is closing.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mask = self.role.masks_output().then(random_mask);
        self.connection.queue_write(&frame.to_bytes(mask))
    }

    /// # Errors
    ///
    /// See [`send_frame`](Self::send_frame).
    pub fn send(&self, message: Message) -> Result<()> {
        self.send_frame(&Frame::from(message))
    }

    /// # Errors
    ///
    /// See [`send_frame`](Self::send_frame).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(&Frame::text(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// # Errors
    ///
    /// See [`send_frame`](Self::send_frame).
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_frame(&Frame::binary(data))
    }

    /// # Errors
    ///
    /// See [`send_frame`](Self::send_frame).
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(&Frame::ping(payload))
    }

    /// Send a close frame and shut the connection down once it is flushed.
    ///
    /// Does nothing if the session is already closing.
    pub fn close(&self, code: CloseCode, reason: &str) {
        if self.connection.is_shutdown_requested() {
            return;
        }
        let frame = Frame::close(&CloseFrame::new(code, reason));
        if let Err(e) = self.send_frame(&frame) {
            debug!(conn = %self.id(), error = %e, "close frame not queued");
        }
        debug!(conn = %self.id(), code = code.as_u16(), "closing session");
        self.connection.shutdown();
    }

    /// Drop the connection without a close frame.
    pub fn force_close(&self) {
        self.connection.force_shutdown();
    }
}

#[derive(Debug)]
enum Phase {
    /// Waiting for the client's upgrade request.
    Handshake(BytesMut),
    Open,
    /// A close frame arrived or the stream failed; further input is ignored.
    Closed,
}

/// Message being reassembled.
#[derive(Debug)]
struct Accumulator {
    opcode: OpCode,
    payload: ByteQueue,
    size: u64,
}

impl Accumulator {
    fn reset(&mut self, opcode: OpCode) {
        self.opcode = opcode;
        self.payload.clear();
        self.size = 0;
    }
}

struct Reader {
    phase: Phase,
    decoder: FrameDecoder,
    accumulator: Accumulator,
}

/// One WebSocket connection's protocol state.
pub struct WsSession<H> {
    context: WsContext,
    jobs: JobSender,
    limits: Limits,
    keep_alive: Duration,
    reader: Mutex<Reader>,
    handler: Mutex<H>,
    this: Weak<Self>,
}

impl<H: WebSocketHandler> WsSession<H> {
    /// A session on an already upgraded connection.
    pub fn new(
        connection: Arc<Connection>,
        role: Role,
        config: &Config,
        jobs: JobSender,
        handler: H,
    ) -> Arc<Self> {
        Self::build(connection, role, Phase::Open, config, jobs, handler)
    }

    /// A server session that first answers the HTTP upgrade request.
    pub fn accept(
        connection: Arc<Connection>,
        config: &Config,
        jobs: JobSender,
        handler: H,
    ) -> Arc<Self> {
        let phase = Phase::Handshake(BytesMut::new());
        Self::build(connection, Role::Server, phase, config, jobs, handler)
    }

    fn build(
        connection: Arc<Connection>,
        role: Role,
        phase: Phase,
        config: &Config,
        jobs: JobSender,
        handler: H,
    ) -> Arc<Self> {
        let decoder = FrameDecoder::new(role, config.limits.max_frame_size)
            .with_accept_unmasked(config.accept_unmasked_frames);
        Arc::new_cyclic(|this| Self {
            context: WsContext::new(connection, role),
            jobs,
            limits: config.limits.clone(),
            keep_alive: config.timeouts.websocket_keep_alive,
            reader: Mutex::new(Reader {
                phase,
                decoder,
                accumulator: Accumulator {
                    opcode: OpCode::Binary,
                    payload: ByteQueue::new(),
                    size: 0,
                },
            }),
            handler: Mutex::new(handler),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn context(&self) -> &WsContext {
        &self.context
    }

    /// Lock the application handler, for inspection outside of jobs.
    pub fn handler(&self) -> parking_lot::MutexGuard<'_, H> {
        self.handler.lock()
    }

    fn enqueue<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()> + Send + 'static,
    {
        let guard = ShutdownGuard::new(Arc::clone(self.context.connection()));
        self.jobs
            .enqueue(Job::from_weak(self.this.clone(), guard, work))
    }

    /// Run a handler callback inside a job and apply its outcome.
    fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut H, &WsContext) -> Result<()>,
    {
        if self.context.connection().is_closed() {
            return Ok(());
        }
        let result = {
            let mut handler = self.handler.lock();
            f(&mut handler, &self.context)
        };
        self.context.connection().set_timeout(self.keep_alive);
        match result {
            Err(Error::Close { code, reason }) => {
                self.context.close(code, &reason);
                Ok(())
            }
            other => other,
        }
    }

    fn deliver_control(&self, opcode: OpCode, payload: Bytes) -> Result<()> {
        self.run(|handler, ctx| match opcode {
            OpCode::Ping => handler.on_ping(ctx, payload),
            OpCode::Pong => handler.on_pong(ctx, payload),
            OpCode::Close => match CloseFrame::parse(&payload) {
                Ok(frame) => handler.on_close(ctx, frame),
                Err(e) => {
                    warn!(conn = %ctx.id(), error = %e, "malformed close frame");
                    ctx.close(e.close_code(), "");
                    Ok(())
                }
            },
            _ => Ok(()),
        })
    }

    /// Tear the session down after a framing or handshake failure.
    fn fail(&self, error: &Error) {
        warn!(conn = %self.context.id(), error = %error, "websocket stream error");
        match error {
            Error::DispatcherStopped | Error::Io(_) => self.context.force_close(),
            _ => self.context.close(error.close_code(), ""),
        }
    }

    fn read_handshake(&self, buf: &mut BytesMut, data: &[u8]) -> Result<Option<BytesMut>> {
        buf.extend_from_slice(data);
        let parsed = HandshakeRequest::parse(&buf[..], self.limits.max_handshake_size)
            .and_then(|parsed| {
                if let Some((request, _)) = &parsed {
                    request.validate()?;
                }
                Ok(parsed)
            });
        let (request, consumed) = match parsed {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(conn = %self.context.id(), error = %e, "upgrade rejected");
                if let Err(e) = self
                    .context
                    .connection()
                    .queue_write(&reject_response(400, "Bad Request"))
                {
                    debug!(conn = %self.context.id(), error = %e, "rejection not queued");
                }
                self.context.connection().shutdown();
                return Err(e);
            }
        };
        let response = HandshakeResponse::from_request(&request).to_bytes()?;
        self.context.connection().queue_write(&response)?;
        debug!(conn = %self.context.id(), path = %request.path, "websocket upgraded");
        self.enqueue(|session| session.run(|handler, ctx| handler.on_open(ctx)))?;
        Ok(Some(buf.split_off(consumed)))
    }
}

/// Frame hooks wired to the accumulator and the job queue.
struct Delivery<'a, H> {
    session: &'a WsSession<H>,
    accumulator: &'a mut Accumulator,
    closed: bool,
}

impl<H: WebSocketHandler> FrameHandler for Delivery<'_, H> {
    fn on_message_header(&mut self, opcode: OpCode) -> Result<()> {
        self.accumulator.reset(opcode);
        Ok(())
    }

    fn on_message_payload(&mut self, _offset: u64, data: Bytes) -> Result<()> {
        self.accumulator.size += data.len() as u64;
        self.session
            .limits
            .check_message_size(self.accumulator.size)?;
        self.accumulator.payload.put_bytes(data);
        Ok(())
    }

    fn on_message_end(&mut self, size: u64) -> Result<bool> {
        debug_assert_eq!(size, self.accumulator.size);
        let payload = std::mem::take(&mut self.accumulator.payload).freeze();
        let message = match self.accumulator.opcode {
            OpCode::Text => Message::Text(std::str::from_utf8(&payload)?.to_owned()),
            _ => Message::Binary(payload),
        };
        self.session.enqueue(move |session| {
            session.run(|handler, ctx| handler.on_message(ctx, message))
        })?;
        Ok(true)
    }

    fn on_control_message(&mut self, opcode: OpCode, payload: Bytes) -> Result<bool> {
        debug!(conn = %self.session.context.id(), opcode = %opcode, len = payload.len(), "control frame");
        self.session
            .enqueue(move |session| session.deliver_control(opcode, payload))?;
        if opcode == OpCode::Close {
            self.closed = true;
            return Ok(false);
        }
        Ok(true)
    }
}

impl<H: WebSocketHandler> StreamHandler for WsSession<H> {
    fn on_connect(&self) {
        self.context.connection().set_timeout(self.keep_alive);
        let open = matches!(self.reader.lock().phase, Phase::Open);
        if open {
            if let Err(e) = self.enqueue(|session| session.run(|handler, ctx| handler.on_open(ctx))) {
                self.fail(&e);
            }
        }
    }

    fn on_read_avail(&self, data: &[u8]) {
        if self.context.connection().is_shutdown_requested() {
            return;
        }
        let mut guard = self.reader.lock();
        let reader = &mut *guard;

        let handshake = match &mut reader.phase {
            Phase::Closed => return,
            Phase::Open => None,
            Phase::Handshake(buf) => Some(self.read_handshake(buf, data)),
        };
        let rest = match handshake {
            None => None,
            Some(Ok(None)) => return,
            Some(Ok(Some(rest))) => {
                reader.phase = Phase::Open;
                Some(rest)
            }
            Some(Err(_)) => {
                reader.phase = Phase::Closed;
                return;
            }
        };
        let data = rest.as_deref().unwrap_or(data);

        let mut delivery = Delivery {
            session: self,
            accumulator: &mut reader.accumulator,
            closed: false,
        };
        let result = reader.decoder.feed(data, &mut delivery);
        let closed = delivery.closed;
        match result {
            Ok(()) if closed => reader.phase = Phase::Closed,
            Ok(()) => {}
            Err(e) => {
                reader.phase = Phase::Closed;
                drop(guard);
                self.fail(&e);
            }
        }
    }

    fn on_read_hup(&self) {
        self.reader.lock().phase = Phase::Closed;
        let connection = self.context.connection();
        if !connection.is_closed() {
            let queued = self.enqueue(|session| {
                session.run(|handler, ctx| {
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

impl<H> std::fmt::Debug for WsSession<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("context", &self.context)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}
