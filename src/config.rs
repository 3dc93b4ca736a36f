//! Configuration and limits for connections, sessions and the dispatcher.
//!
//! A [`Config`] is built in code with the `with_*` builders or loaded from a
//! flat TOML file:
//!
//! ```toml
//! websocket_max_request_length = 16384
//! websocket_keep_alive_timeout = 30000   # milliseconds
//! http_max_response_length = 16777216
//! job_worker_threads = 4
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Size limits enforced by the protocol layers.
///
/// These limits prevent resource exhaustion and ensure bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload length of a single WebSocket frame.
    ///
    /// Default: 16 MB
    pub max_frame_size: u64,

    /// Maximum size of a reassembled WebSocket message.
    ///
    /// Default: 16 KB
    pub max_message_size: u64,

    /// Maximum size of a buffered HTTP response (headers plus entity).
    ///
    /// Default: 16 MB
    pub max_response_size: u64,

    /// Maximum size of an upgrade handshake or HTTP header block.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 16 * 1024,
            max_response_size: 16 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: u64,
        max_message_size: u64,
        max_response_size: u64,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_response_size,
            max_handshake_size,
        }
    }

    /// Validate that an accumulated message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: u64) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a declared frame length is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a buffered response is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_response_size(&self, size: u64) -> Result<()> {
        if size > self.max_response_size {
            Err(Error::ResponseTooLarge {
                size,
                max: self.max_response_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Idle timeouts, reset after every delivered message.
///
/// Enforcement is the reactor's job; sessions only move the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Keep-alive window for WebSocket sessions.
    ///
    /// Default: 30 seconds
    pub websocket_keep_alive: Duration,

    /// Keep-alive window for HTTP client connections.
    ///
    /// Default: 15 seconds
    pub http_keep_alive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            websocket_keep_alive: Duration::from_millis(30_000),
            http_keep_alive: Duration::from_millis(15_000),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Idle timeouts.
    pub timeouts: Timeouts,

    /// Number of job dispatcher worker threads.
    ///
    /// Default: available parallelism
    pub worker_threads: usize,

    /// Size of a single non-blocking read.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Accept unmasked frames from clients (server only, not RFC compliant).
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            worker_threads: default_worker_threads(),
            read_buffer_size: 8192,
            accept_unmasked_frames: false,
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// On-disk representation; every key is optional.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    websocket_max_request_length: u64,
    websocket_max_frame_length: u64,
    websocket_keep_alive_timeout: u64,
    websocket_accept_unmasked_frames: bool,
    http_max_response_length: u64,
    http_keep_alive_timeout: u64,
    max_handshake_length: usize,
    job_worker_threads: usize,
    read_buffer_size: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config = Config::default();
        Self {
            websocket_max_request_length: config.limits.max_message_size,
            websocket_max_frame_length: config.limits.max_frame_size,
            websocket_keep_alive_timeout: config.timeouts.websocket_keep_alive.as_millis() as u64,
            websocket_accept_unmasked_frames: config.accept_unmasked_frames,
            http_max_response_length: config.limits.max_response_size,
            http_keep_alive_timeout: config.timeouts.http_keep_alive.as_millis() as u64,
            max_handshake_length: config.limits.max_handshake_size,
            job_worker_threads: config.worker_threads,
            read_buffer_size: config.read_buffer_size,
        }
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            limits: Limits::new(
                file.websocket_max_frame_length,
                file.websocket_max_request_length,
                file.http_max_response_length,
                file.max_handshake_length,
            ),
            timeouts: Timeouts {
                websocket_keep_alive: Duration::from_millis(file.websocket_keep_alive_timeout),
                http_keep_alive: Duration::from_millis(file.http_keep_alive_timeout),
            },
            worker_threads: file.job_worker_threads,
            read_buffer_size: file.read_buffer_size,
            accept_unmasked_frames: file.websocket_accept_unmasked_frames,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on syntax errors, unknown keys or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = Config::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Check values that would make the runtime unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("job_worker_threads must be at least 1".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be at least 1".into()));
        }
        if self.limits.max_message_size == 0 {
            return Err(Error::Config(
                "websocket_max_request_length must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum reassembled WebSocket message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: u64) -> Self {
        self.limits.max_message_size = size;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the WebSocket keep-alive window.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.timeouts.websocket_keep_alive = keep_alive;
        self
    }

    /// Set the number of dispatcher worker threads.
    #[must_use]
    pub const fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Accept unmasked client frames on server sessions.
    #[must_use]
    pub const fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }
}
