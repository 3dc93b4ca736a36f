//! # wharf - network server core
//!
//! `wharf` is the connection and dispatch layer of a multi-protocol server.
//!
//! ## Layers
//!
//! - **Connections** ([`net`]): non-blocking sockets with a pending-write
//!   queue and cooperative shutdown held off by [`ShutdownGuard`]s
//! - **Job dispatch** ([`job`]): a worker pool that runs jobs of the same
//!   connection strictly in order and jobs of different connections in
//!   parallel
//! - **WebSocket** ([`websocket`]): RFC 6455 framing, server handshake and a
//!   session that turns messages into jobs
//! - **HTTP client** ([`http`]): request encoding and streaming response
//!   parsing with chunked transfer coding and trailers
//! - **Message codec** ([`codec`]): 50-bit varints and declarative field
//!   layouts for the binary message protocol
//! - **Reactor** (`reactor`, feature `async-tokio`): a tokio event loop that
//!   drives connections
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wharf::{Config, JobDispatcher, Reactor, WsSession};
//!
//! let config = Config::default();
//! let dispatcher = JobDispatcher::start(&config)?;
//! let jobs = dispatcher.sender();
//! let reactor = Reactor::new(config.clone());
//! reactor
//!     .serve(listener, move |conn| WsSession::accept(conn, &config, jobs.clone(), Echo))
//!     .await?;
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod logging;
pub mod net;
pub mod websocket;

#[cfg(all(feature = "async-tokio", unix))]
pub mod reactor;

pub use buffer::ByteQueue;
pub use config::{Config, Limits, Timeouts};
pub use error::{Error, Result};
pub use http::{HeaderMap, HttpClient, HttpContext, HttpHandler, Response, ResponseHeaders};
pub use job::{Job, JobDispatcher, JobSender};
pub use net::{Connection, ConnectionId, ShutdownGuard, StreamHandler};
pub use websocket::{CloseCode, CloseFrame, Message, OpCode, Role, WebSocketHandler, WsContext, WsSession};

#[cfg(all(feature = "async-tokio", unix))]
pub use reactor::Reactor;
