use crate::error::{ParseErrorKind, Result};

/// Transport parameters negotiated by SETUP (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// TCP interleaved:
///   Client → Server:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///   Server → Client:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// UDP:
///   Client → Server:  Transport: RTP/AVP;unicast;client_port=8000-8001
///   Server → Client:  Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
///
/// Parsed from the server's reply; the channel or port pair there is what
/// the client must use, which may differ from what it asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// `interleaved=` channel pair (RTP, RTCP).
    pub interleaved: Option<(u8, u8)>,
    /// `client_port=` pair (RTP, RTCP).
    pub client_port: Option<(u16, u16)>,
}

impl TransportHeader {
    /// Request value for TCP interleaved delivery on channels `rtp`/`rtp+1`.
    pub fn interleaved_request(rtp_channel: u8) -> String {
        format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            rtp_channel,
            rtp_channel.wrapping_add(1)
        )
    }

    /// Request value for UDP delivery to the given local port pair.
    pub fn udp_request(rtp_port: u16, rtcp_port: u16) -> String {
        format!("RTP/AVP;unicast;client_port={}-{}", rtp_port, rtcp_port)
    }

    /// Parse a `Transport` header value.
    ///
    /// Only the first transport spec of a comma-separated list is read.
    /// Parameters other than the channel and client port pairs
    /// (`server_port`, `ssrc`, ...) are ignored; packets are accepted by
    /// arrival channel or port alone.
    pub fn parse(header: &str) -> Result<Self> {
        let spec = header.split(',').next().unwrap_or("");
        let mut th = TransportHeader::default();

        for part in spec.split(';') {
            let part = part.trim();
            let invalid = || ParseErrorKind::InvalidTransport(header.to_string());

            if let Some(channels) = part.strip_prefix("interleaved=") {
                th.interleaved = Some(parse_channels(channels).ok_or_else(invalid)?);
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                th.client_port = Some(parse_pair(ports).ok_or_else(invalid)?);
            }
        }
        Ok(th)
    }
}

/// `a-b` or a single `a` (meaning `a-(a+1)`).
fn parse_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: u16 = value.trim().parse().ok()?;
            Some((a, a.checked_add(1)?))
        }
    }
}

fn parse_channels(value: &str) -> Option<(u8, u8)> {
    let (rtp, rtcp) = parse_pair(value)?;
    Some((u8::try_from(rtp).ok()?, u8::try_from(rtcp).ok()?))
}
