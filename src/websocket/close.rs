//! Close status codes and close frame payloads (RFC 6455 section 7.4).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Longest reason that fits in a control frame next to the status code.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001
    GoingAway,
    /// 1002, malformed frame or protocol violation.
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1007, text message that is not UTF-8.
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009, message longer than the configured maximum.
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// Registered (1012-1014) or application (3000-4999) code.
    Other(u16),
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether an endpoint may put this code on the wire.
    ///
    /// 1004-1006 and 1015 are reserved for local reporting only.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Encode as a control frame payload.
    ///
    /// The reason is cut to [`MAX_CLOSE_REASON`] bytes on a character
    /// boundary.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut end = self.reason.len().min(MAX_CLOSE_REASON);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(self.code.as_u16());
        payload.put_slice(&self.reason.as_bytes()[..end]);
        payload.freeze()
    }

    /// Decode a received close payload. An empty payload carries no status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a one-byte payload or a code
    /// that must not be sent, and [`Error::InvalidUtf8`] for a bad reason.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [_] => Err(Error::ProtocolViolation(
                "close payload of one byte".into(),
            )),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
                if !code.is_sendable() {
                    return Err(Error::ProtocolViolation(format!(
                        "close code {} not allowed on the wire",
                        code.as_u16()
                    )));
                }
                let reason = std::str::from_utf8(reason)?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }
}
