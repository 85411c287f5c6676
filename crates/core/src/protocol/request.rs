use crate::error::{ParseErrorKind, Result};

/// Client identification string sent with every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "rtsp-camera/0.1";

/// A request to the camera (RFC 2326 §6).
///
/// ```
/// use rtsp_camera::protocol::RtspRequest;
///
/// let wire = RtspRequest::new("DESCRIBE", "rtsp://cam/live")
///     .add_header("CSeq", "2")
///     .add_header("Accept", "application/sdp")
///     .serialize();
/// assert_eq!(
///     wire,
///     "DESCRIBE rtsp://cam/live RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"
/// );
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspRequest {
    pub method: String,
    /// Presentation or track URL.
    pub uri: String,
    pub version: String,
    /// In insertion order; names keep their case.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "RTSP/1.0".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Request head as sent. This client never sends a body.
    pub fn serialize(&self) -> String {
        let mut head = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head
    }

    /// Parse a request head. Cameras send these on the control connection
    /// too (keepalive OPTIONS, GET_PARAMETER, ANNOUNCE); any body is read
    /// separately using [`content_length`](Self::content_length).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let first = lines.next().ok_or(ParseErrorKind::EmptyMessage)?;
        let mut words = first.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (words.next(), words.next(), words.next(), words.next())
        else {
            return Err(ParseErrorKind::InvalidRequestLine.into());
        };

        Ok(Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers: super::parse_headers(lines)?,
        })
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        super::find_header(&self.headers, name)
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    pub fn content_length(&self) -> Result<usize> {
        super::content_length(&self.headers)
    }
}
