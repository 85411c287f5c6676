use std::fmt;

use crate::error::{CameraError, ParseErrorKind, Result};

/// A response from the camera (RFC 2326 §7).
///
/// Heads are read with [`parse_head`](Self::parse_head); the reader then
/// pulls `Content-Length` bytes of body, usually SDP after DESCRIBE:
///
/// ```text
/// RTSP/1.0 401 Unauthorized\r\n
/// CSeq: 3\r\n
/// WWW-Authenticate: Basic realm="camera"\r\n
/// \r\n
/// ```
///
/// The builder methods and the [`Display`](fmt::Display) form are used
/// to answer requests the camera sends on the control connection.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse the status line and headers of a response. The body, if any,
    /// is read separately using [`content_length`](Self::content_length).
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().ok_or(ParseErrorKind::EmptyMessage)?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("RTSP/") {
            return Err(ParseErrorKind::InvalidStatusLine.into());
        }
        let status_code = parts
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok())
            .ok_or(ParseErrorKind::InvalidStatusLine)?;
        let status_text = parts.next().unwrap_or("").trim().to_string();

        let headers = super::parse_headers(lines)?;

        Ok(Self {
            status_code,
            status_text,
            headers,
            body: None,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        super::find_header(&self.headers, name)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Declared body length; 0 when the header is absent.
    pub fn content_length(&self) -> Result<usize> {
        super::content_length(&self.headers)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Turn a non-2xx response into [`CameraError::Status`].
    pub fn ensure_success(self, method: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CameraError::Status {
                method: method.to_string(),
                status: self.status_code,
                reason: self.status_text,
            })
        }
    }

    /// Wire form; `Content-Length` is derived from the body.
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RtspResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTSP/1.0 {} {}\r\n", self.status_code, self.status_text)?;
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        match &self.body {
            Some(body) => write!(f, "Content-Length: {}\r\n\r\n{body}", body.len()),
            None => f.write_str("\r\n"),
        }
    }
}
