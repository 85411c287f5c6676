//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Reads the body of a DESCRIBE response. Only what track selection needs
//! is kept:
//!
//! ```text
//! v=0
//! o=- 1234 1 IN IP4 192.168.1.10
//! s=Camera
//! a=control:*                                   ← session control URL
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHpWoKA9k,aM48gA==
//! a=control:trackID=1                           ← track control URL
//! ```
//!
//! Out-of-band parameter sets come from `sprop-parameter-sets` for H.264
//! (RFC 6184 §8.1) and `sprop-vps` / `sprop-sps` / `sprop-pps` for H.265
//! (RFC 7798 §7.1).

use base64::prelude::{BASE64_STANDARD, BASE64_STANDARD_NO_PAD, Engine as _};

use crate::error::{ParseErrorKind, Result};
use crate::media::Codec;

/// A parsed session description.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    /// Session-level `a=control`, if any.
    pub control: Option<String>,
    pub media: Vec<MediaDescription>,
}

/// One `m=` section and the attributes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// `video`, `audio`, `application`, ...
    pub media_type: String,
    /// First payload type listed on the `m=` line.
    pub payload_type: u8,
    /// Encoding name from the matching `a=rtpmap` (e.g. `H264`).
    pub encoding_name: Option<String>,
    pub clock_rate: Option<u32>,
    pub control: Option<String>,
    /// `a=fmtp` parameters for the payload type, in order.
    pub format_parameters: Vec<(String, String)>,
}

impl SessionDescription {
    pub fn parse(body: &str) -> Result<Self> {
        let mut sdp = SessionDescription::default();

        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((kind, value)) = line.split_once('=') else {
                return Err(ParseErrorKind::InvalidSdp(format!("line without '=': {line}")).into());
            };

            match kind {
                "m" => sdp.media.push(parse_media_line(value)?),
                "a" => {
                    let (name, attr) = value.split_once(':').unwrap_or((value, ""));
                    match sdp.media.last_mut() {
                        Some(media) => media.apply_attribute(name, attr)?,
                        None if name == "control" => sdp.control = Some(attr.trim().to_string()),
                        None => {}
                    }
                }
                _ => {}
            }
        }

        tracing::trace!(media = sdp.media.len(), "SDP parsed");
        Ok(sdp)
    }

    /// First video section advertising the given codec.
    pub fn video_track(&self, codec: Codec) -> Option<&MediaDescription> {
        self.media
            .iter()
            .find(|m| m.media_type == "video" && m.codec() == Some(codec))
    }
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    // <media> <port> <proto> <fmt> ...
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ParseErrorKind::InvalidSdp(format!("m= line: {value}")).into());
    }
    let payload_type = parts[3]
        .parse::<u8>()
        .map_err(|_| ParseErrorKind::InvalidSdp(format!("payload type: {}", parts[3])))?;

    Ok(MediaDescription {
        media_type: parts[0].to_string(),
        payload_type,
        encoding_name: None,
        clock_rate: None,
        control: None,
        format_parameters: Vec::new(),
    })
}

impl MediaDescription {
    fn apply_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "control" => self.control = Some(value.trim().to_string()),
            "rtpmap" => {
                // <pt> <encoding>/<clock>[/<channels>]
                let Some((pt, encoding)) = value.split_once(' ') else {
                    return Err(ParseErrorKind::InvalidSdp(format!("rtpmap: {value}")).into());
                };
                if pt.trim().parse::<u8>().ok() != Some(self.payload_type) {
                    return Ok(());
                }
                let mut fields = encoding.trim().split('/');
                self.encoding_name = fields.next().map(str::to_string);
                self.clock_rate = fields.next().and_then(|c| c.parse().ok());
            }
            "fmtp" => {
                let Some((pt, params)) = value.split_once(' ') else {
                    return Ok(());
                };
                if pt.trim().parse::<u8>().ok() != Some(self.payload_type) {
                    return Ok(());
                }
                self.format_parameters = params
                    .split(';')
                    .filter_map(|p| {
                        let (k, v) = p.trim().split_once('=')?;
                        Some((k.trim().to_string(), v.trim().to_string()))
                    })
                    .collect();
            }
            _ => {}
        }
        Ok(())
    }

    pub fn codec(&self) -> Option<Codec> {
        self.encoding_name.as_deref().and_then(Codec::from_encoding_name)
    }

    /// Look up an `a=fmtp` parameter (case-insensitive name).
    pub fn format_parameter(&self, name: &str) -> Option<&str> {
        self.format_parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decode the out-of-band parameter sets advertised for `codec`, in
    /// the order a decoder expects them (VPS, SPS, PPS).
    ///
    /// Missing parameters yield an empty list; invalid base64 is an error.
    pub fn parameter_sets(&self, codec: Codec) -> Result<Vec<Vec<u8>>> {
        let encoded: Vec<&str> = match codec {
            Codec::H264 => self
                .format_parameter("sprop-parameter-sets")
                .map(|v| v.split(',').collect())
                .unwrap_or_default(),
            Codec::H265 => ["sprop-vps", "sprop-sps", "sprop-pps"]
                .iter()
                .filter_map(|name| self.format_parameter(name))
                .flat_map(|v| v.split(','))
                .collect(),
        };

        encoded
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(decode_base64)
            .collect()
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(value)
        .or_else(|_| BASE64_STANDARD_NO_PAD.decode(value))
        .map_err(|e| ParseErrorKind::InvalidSdp(format!("parameter set {value}: {e}")).into())
}

/// Resolve a track's `a=control` against the presentation base URL
/// (RFC 2326 §C.1.1).
///
/// Absolute controls are used as-is; `*` or no control means the base
/// itself; anything else is appended to the base with exactly one `/`.
pub fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control.map(str::trim) {
        None | Some("") | Some("*") => base.to_string(),
        Some(c) if c.starts_with("rtsp://") || c.starts_with("rtsps://") => c.to_string(),
        Some(c) => {
            if base.ends_with('/') {
                format!("{base}{c}")
            } else {
                format!("{base}/{c}")
            }
        }
    }
}
