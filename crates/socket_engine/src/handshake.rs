//! HTTP/1.1 opening handshake (RFC 6455 section 4.2).
//!
//! [`process`] is fed the raw bytes received on a fresh connection. It waits
//! for the complete header block, validates the upgrade request and produces
//! either the `101 Switching Protocols` response or the HTTP rejection that
//! goes out before the socket is closed.

use crate::error::HandshakeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the request header block.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// `base64(SHA1(key + GUID))`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Parsed request line and headers. Header names are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Parses a header block, with or without its terminating blank line.
    pub fn parse(block: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| HandshakeError::Malformed("request is not valid UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split(' ').collect();
        let &[method, path, version] = parts.as_slice() else {
            return Err(HandshakeError::Malformed(format!(
                "bad request line {request_line:?}"
            )));
        };
        if version != "HTTP/1.1" {
            return Err(HandshakeError::Malformed(format!("unsupported HTTP version {version:?}")));
        }
        if method != "GET" {
            return Err(HandshakeError::MethodNotAllowed(method.to_string()));
        }
        if path.is_empty() {
            return Err(HandshakeError::Malformed("empty request path".into()));
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                return Err(HandshakeError::Malformed(format!("bad header line {line:?}")));
            };
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// First value of a header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a possibly repeated header, in request order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Comma separated tokens across every occurrence of a header.
    fn header_tokens<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.header_values(name)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// A validated upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub path: String,
    pub accept_key: String,
    pub protocol: Option<String>,
}

impl Accepted {
    /// The `101 Switching Protocols` response.
    pub fn response(&self) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            self.accept_key
        );
        if let Some(protocol) = &self.protocol {
            response.push_str("Sec-WebSocket-Protocol: ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");
        response.into_bytes()
    }
}

/// Picks the first subprotocol in the client's preference order that the
/// server also offers.
pub fn negotiate_subprotocol<'a>(
    offered: impl IntoIterator<Item = &'a str>,
    supported: &[String],
) -> Option<String> {
    offered
        .into_iter()
        .find(|candidate| supported.iter().any(|s| s == candidate))
        .map(str::to_string)
}

/// Validates the upgrade headers in the order the protocol requires.
pub fn validate(request: &UpgradeRequest, subprotocols: &[String]) -> Result<Accepted, HandshakeError> {
    match request.header("upgrade") {
        Some(upgrade) if upgrade.eq_ignore_ascii_case("websocket") => {}
        _ => return Err(HandshakeError::InvalidHeader("Upgrade")),
    }

    if !request
        .header_tokens("connection")
        .any(|token| token.eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::InvalidHeader("Connection"));
    }

    match request.header("sec-websocket-version") {
        Some("13") => {}
        other => return Err(HandshakeError::UnsupportedVersion(other.map(str::to_string))),
    }

    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::InvalidHeader("Sec-WebSocket-Key"))?;
    match BASE64.decode(key) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    Ok(Accepted {
        path: request.path.clone(),
        accept_key: compute_accept_key(key),
        protocol: negotiate_subprotocol(request.header_tokens("sec-websocket-protocol"), subprotocols),
    })
}

/// Outcome of feeding buffered bytes to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The header block is not complete yet.
    Incomplete,
    /// The upgrade succeeded; `consumed` bytes belong to the request, anything
    /// after them is already frame data.
    Accepted { accepted: Accepted, consumed: usize },
    Rejected(HandshakeError),
}

/// Runs the handshake over everything buffered so far.
pub fn process(buf: &[u8], subprotocols: &[String]) -> HandshakeOutcome {
    let Some(end) = find_header_end(buf) else {
        if buf.len() > MAX_REQUEST_BYTES {
            return HandshakeOutcome::Rejected(HandshakeError::TooLarge(MAX_REQUEST_BYTES));
        }
        return HandshakeOutcome::Incomplete;
    };
    if end > MAX_REQUEST_BYTES {
        return HandshakeOutcome::Rejected(HandshakeError::TooLarge(MAX_REQUEST_BYTES));
    }

    let result = UpgradeRequest::parse(&buf[..end]).and_then(|request| validate(&request, subprotocols));
    match result {
        Ok(accepted) => HandshakeOutcome::Accepted {
            accepted,
            consumed: end + HEADER_TERMINATOR.len(),
        },
        Err(e) => HandshakeOutcome::Rejected(e),
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}
