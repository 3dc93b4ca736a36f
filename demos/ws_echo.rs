//! WebSocket echo server on the tokio reactor.
//!
//! Run with: cargo run --example ws_echo [config.toml]
//!
//! The optional TOML file uses the keys documented in `wharf::config`, e.g.
//!
//! ```toml
//! websocket_max_request_length = 65536
//! websocket_keep_alive_timeout = 60000
//! job_worker_threads = 4
//! ```

use std::error::Error;

use tokio::net::TcpListener;
use tracing::info;
use wharf::{Config, JobDispatcher, Message, Reactor, WebSocketHandler, WsContext, WsSession};

const ADDR: &str = "127.0.0.1:9001";

struct Echo {
    echoed: u64,
}

impl WebSocketHandler for Echo {
    fn on_open(&mut self, ctx: &WsContext) -> wharf::Result<()> {
        info!(conn = %ctx.id(), remote = %ctx.remote_address(), "session open");
        Ok(())
    }

    fn on_message(&mut self, ctx: &WsContext, message: Message) -> wharf::Result<()> {
        self.echoed += 1;
        ctx.send(message)
    }

    fn on_disconnect(&mut self, ctx: &WsContext) {
        info!(conn = %ctx.id(), echoed = self.echoed, "session closed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    wharf::logging::init_logging("info,wharf=debug");

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let dispatcher = JobDispatcher::start(&config)?;
    let reactor = Reactor::new(config.clone());

    let listener = TcpListener::bind(ADDR).await?;
    info!(addr = ADDR, workers = config.worker_threads, "ws_echo listening");

    let jobs = dispatcher.sender();
    let session_config = config.clone();
    let server = reactor.clone().serve(listener, move |conn| {
        WsSession::accept(conn, &session_config, jobs.clone(), Echo { echoed: 0 })
    });

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(open = reactor.connection_count(), "shutting down");
            reactor.shutdown_all();
        }
    }
    dispatcher.stop();
    Ok(())
}
