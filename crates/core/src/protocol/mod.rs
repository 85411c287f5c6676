//! RTSP protocol implementation (RFC 2326), client side.
//!
//! This module handles the text-based RTSP signaling protocol: building
//! requests, parsing responses, reading SDP session descriptions and
//! negotiating transports.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Different methods: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN.
//! - Session header carries a server-assigned ID (RFC 2326 §12.37).
//! - Over TCP, `$`-framed RTP can be interleaved with responses (§10.12).
//!
//! ## Methods issued by the client
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery and health probe |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport (interleaved channels or UDP ports) |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use sdp::{MediaDescription, SessionDescription};
pub use transport::TransportHeader;

use crate::error::{ParseErrorKind, Result};

/// Parse `Name: Value` lines up to the first blank line.
pub(crate) fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(ParseErrorKind::InvalidHeader)?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

/// Declared body length; 0 when the header is absent.
pub(crate) fn content_length(headers: &[(String, String)]) -> Result<usize> {
    match find_header(headers, "Content-Length") {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ParseErrorKind::InvalidBody.into()),
        None => Ok(0),
    }
}

/// Case-insensitive header lookup (RFC 2326 §4.2).
pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
