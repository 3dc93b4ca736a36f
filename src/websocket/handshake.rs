//! Server side of the HTTP upgrade handshake (RFC 6455 section 4.2).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http::HeaderMap;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_HEADERS: usize = 64;

/// Headers that must appear at most once in an upgrade request.
const SINGLE_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// `Sec-WebSocket-Accept` for a client key: Base64(SHA-1(key + GUID)).
///
/// ```
/// use wharf::websocket::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn check_header_value(header: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: header.to_owned(),
            reason: "contains CR or LF characters".to_owned(),
        });
    }
    Ok(())
}

/// A client's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub path: String,
    pub host: String,
    pub key: String,
    pub version: u8,
    pub origin: Option<String>,
    /// Offered subprotocols, in preference order.
    pub protocols: Vec<String>,
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    /// Parse an upgrade request from the front of `data`.
    ///
    /// Returns `Ok(None)` while the header block is incomplete, otherwise the
    /// request and the number of bytes it occupied. Anything after that
    /// belongs to the frame stream.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandshake`] for a malformed request, a missing or
    /// duplicated required header, or a header block longer than `max_size`.
    pub fn parse(data: &[u8], max_size: usize) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let consumed = match request.parse(data) {
            Ok(httparse::Status::Complete(consumed)) => consumed,
            Ok(httparse::Status::Partial) => {
                if data.len() > max_size {
                    return Err(Error::InvalidHandshake(format!(
                        "request headers exceed {max_size} bytes"
                    )));
                }
                return Ok(None);
            }
            Err(e) => return Err(Error::InvalidHandshake(e.to_string())),
        };
        if consumed > max_size {
            return Err(Error::InvalidHandshake(format!(
                "request headers exceed {max_size} bytes"
            )));
        }

        if request.method != Some("GET") {
            return Err(Error::InvalidHandshake(format!(
                "expected GET, got {}",
                request.method.unwrap_or("")
            )));
        }
        if request.version != Some(1) {
            return Err(Error::InvalidHandshake("expected HTTP/1.1".into()));
        }
        let path = request.path.unwrap_or("/").to_owned();
        let headers = HeaderMap::from_httparse(request.headers)
            .ok_or_else(|| Error::InvalidHandshake("header value is not UTF-8".into()))?;

        for name in SINGLE_HEADERS {
            if headers.get_all(name).count() > 1 {
                return Err(Error::InvalidHandshake(format!("duplicate header: {name}")));
            }
        }

        let required = |name: &str| {
            headers
                .get(name)
                .map(str::to_owned)
                .ok_or_else(|| Error::InvalidHandshake(format!("missing {name} header")))
        };

        let upgrade = required("upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "invalid upgrade header: {upgrade}"
            )));
        }
        if !headers.has_token("connection", "upgrade") {
            return Err(Error::InvalidHandshake(
                "connection header does not request an upgrade".into(),
            ));
        }
        let host = required("host")?;
        let key = required("sec-websocket-key")?;
        let version_text = required("sec-websocket-version")?;
        let version = version_text
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("invalid version: {version_text}")))?;

        let origin = headers.get("origin").map(str::to_owned);
        let protocols = headers
            .get_all("sec-websocket-protocol")
            .flat_map(|v| v.split(','))
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();

        let request = Self {
            path,
            host,
            key,
            version,
            origin,
            protocols,
            headers,
        };
        Ok(Some((request, consumed)))
    }

    /// Semantic checks: version 13, a 16-byte Base64 key, a non-empty host.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandshake`] naming the failed check.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "unsupported version {} (expected 13)",
                self.version
            )));
        }
        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "key must decode to 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => return Err(Error::InvalidHandshake("key is not valid Base64".into())),
        }
        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("empty host header".into()));
        }
        Ok(())
    }
}

/// The `101 Switching Protocols` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub accept: String,
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Accept `request` without selecting a subprotocol.
    #[must_use]
    pub fn from_request(request: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&request.key),
            protocol: None,
        }
    }

    /// Select the first offered protocol that `supported` also lists.
    #[must_use]
    pub fn with_protocol_from(mut self, request: &HandshakeRequest, supported: &[&str]) -> Self {
        self.protocol = request
            .protocols
            .iter()
            .find(|p| supported.contains(&p.as_str()))
            .cloned();
        self
    }

    /// Serialize the response.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeaderValue`] if the protocol contains CR or LF.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(160);
        buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.put_slice(b"Upgrade: websocket\r\n");
        buf.put_slice(b"Connection: Upgrade\r\n");
        buf.put_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        if let Some(protocol) = &self.protocol {
            check_header_value("Sec-WebSocket-Protocol", protocol)?;
            buf.put_slice(format!("Sec-WebSocket-Protocol: {protocol}\r\n").as_bytes());
        }
        buf.put_slice(b"\r\n");
        Ok(buf.freeze())
    }
}

/// A bodiless error response sent before closing a failed upgrade.
#[must_use]
pub fn reject_response(status: u16, reason: &str) -> Bytes {
    let mut text = format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n");
    if status == 426 {
        text.push_str("Sec-WebSocket-Version: 13\r\n");
    }
    text.push_str("\r\n");
    Bytes::from(text)
}
