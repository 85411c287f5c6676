//! Error types for the RTSP camera library.

use std::fmt;
use std::io;

use crate::passthrough::SubscriptionId;

/// Errors that can occur in the RTSP camera library.
///
/// Variants fall into the families the connection supervisor and the packet
/// path care about:
///
/// - **Transport**: [`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed),
///   [`Timeout`](Self::Timeout), [`Status`](Self::Status). These make a session
///   unusable and drive reconnection (see [`is_connection_error`](Self::is_connection_error)).
/// - **Negotiation**: [`NoSupportedTrack`](Self::NoSupportedTrack),
///   [`UnsupportedCodec`](Self::UnsupportedCodec),
///   [`PassthroughRequiresH264`](Self::PassthroughRequiresH264). Fatal to one
///   connect attempt.
/// - **Unit-level**: [`Decode`](Self::Decode),
///   [`NonMonotonicPts`](Self::NonMonotonicPts). Contained to the offending
///   access unit.
/// - **Subscription**: [`SubscriptionNotFound`](Self::SubscriptionNotFound),
///   [`QueueFull`](Self::QueueFull), [`SubscriptionClosed`](Self::SubscriptionClosed),
///   [`Callback`](Self::Callback), [`PassthroughNotEnabled`](Self::PassthroughNotEnabled).
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the RTSP connection, or the receive thread exited.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// No response to an RTSP request within the configured timeout.
    #[error("timed out waiting for {method} response")]
    Timeout { method: String },

    /// The server answered an RTSP request with a non-2xx status.
    #[error("{method} failed: {status} {reason}")]
    Status {
        method: String,
        status: u16,
        reason: String,
    },

    /// Malformed RTSP, SDP or RTP data.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The configured stream address is not a usable rtsp:// URL.
    #[error("invalid RTSP address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session description carries no H.264 or H.265 video track.
    #[error("no supported video track (H.264 or H.265) in session description")]
    NoSupportedTrack,

    /// A codec was requested that this library cannot decode.
    #[error("codec not supported: {0}")]
    UnsupportedCodec(String),

    /// Passthrough was enabled but the source only offers H.265.
    #[error("address reports to have only an H.265 track but H.264 passthrough was enabled")]
    PassthroughRequiresH264,

    /// [`subscribe`](crate::RtspCamera::subscribe_rtp) called on a camera
    /// whose passthrough was not enabled.
    #[error("H.264 passthrough is not enabled")]
    PassthroughNotEnabled,

    /// No subscription is registered under the given id.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// The subscription's bounded queue was full; the batch was dropped.
    #[error("subscription {id} queue full (capacity {capacity}), packet batch dropped")]
    QueueFull { id: SubscriptionId, capacity: usize },

    /// Publish was attempted on a subscription that is not active.
    #[error("subscription {0} is closed")]
    SubscriptionClosed(SubscriptionId),

    /// A subscriber's packet callback reported a failure.
    #[error("subscriber callback failed: {0}")]
    Callback(String),

    /// An access unit could not be packetized for passthrough.
    #[error("passthrough encoding failed: {0}")]
    Encode(String),

    /// The raw-frame decoder rejected its input.
    #[error("decoder error: {0}")]
    Decode(String),

    /// A passthrough unit's presentation timestamp went backwards.
    #[error(
        "presentation timestamp went backwards ({current} < {previous}); streams with B-frames cannot be passed through"
    )]
    NonMonotonicPts { previous: i64, current: i64 },

    /// Nothing has been decoded yet.
    #[error("no frame yet")]
    NoFrameYet,

    /// Operation on a camera that has already been closed.
    #[error("camera closed")]
    Closed,
}

impl CameraError {
    /// Whether this error means the RTSP connection itself is gone.
    ///
    /// Covers a terminated client (peer closed, receive thread exited), broken
    /// pipe, refused or reset connections, end-of-stream and unanswered
    /// requests.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::Timeout { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Specific kind of parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a number or the body was truncated.
    InvalidBody,
    /// An SDP line or attribute could not be interpreted.
    InvalidSdp(String),
    /// A `Transport` header could not be interpreted.
    InvalidTransport(String),
    /// An RTP packet was truncated or carried an unsupported version.
    InvalidRtp(&'static str),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidBody => write!(f, "invalid or truncated body"),
            Self::InvalidSdp(detail) => write!(f, "invalid SDP: {detail}"),
            Self::InvalidTransport(value) => write!(f, "invalid Transport header: {value}"),
            Self::InvalidRtp(detail) => write!(f, "invalid RTP packet: {detail}"),
        }
    }
}

impl From<ParseErrorKind> for CameraError {
    fn from(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Outcome of feeding one RTP packet into a depacketizer that did not
/// produce an access unit.
///
/// The first two variants are the normal state of a live stream and never
/// indicate a broken session; only [`Malformed`](Self::Malformed) is worth
/// logging as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepacketizeError {
    /// The access unit is not complete yet.
    #[error("more RTP packets are needed")]
    MorePacketsNeeded,
    /// A continuation fragment arrived with no preceding start fragment,
    /// typically because the stream was joined mid-unit.
    #[error("received a non-starting fragment without any previous starting fragment")]
    NonStartingPacketAndNoPrevious,
    /// The payload violates the packetization rules.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl DepacketizeError {
    /// Expected while a stream is running; not a failure.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::MorePacketsNeeded | Self::NonStartingPacketAndNoPrevious
        )
    }
}

/// Convenience alias for `Result<T, CameraError>`.
pub type Result<T> = std::result::Result<T, CameraError>;
