//! Media codecs, RTP parsing and access-unit depacketization.
//!
//! Inbound RTP packets for the negotiated track are turned into
//! [`AccessUnit`]s by a [`Depacketizer`]: a codec-tagged unpacker that
//! reassembles NAL units from the packetization modes of its RFC, plus a
//! shared builder that groups NAL units into one access unit per RTP marker
//! bit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Inbound | Passthrough |
//! |-------|--------|-----|---------|-------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | single NAL, STAP-A, FU-A | yes |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | single NAL, AP, FU | no |

pub mod h264;
pub mod h265;
pub mod rtp;
pub mod timeline;

use std::fmt;

use crate::error::DepacketizeError;
use rtp::RtpPacket;

pub use timeline::Timeline;

/// Upper bound on NAL units in one access unit.
const MAX_NALUS_PER_ACCESS_UNIT: usize = 128;

/// Upper bound on the payload bytes of one access unit.
const MAX_ACCESS_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// Video codecs a stream session can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
}

impl Codec {
    /// Match an SDP `a=rtpmap` encoding name (case-insensitive).
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("H264") {
            Some(Self::H264)
        } else if name.eq_ignore_ascii_case("H265") || name.eq_ignore_ascii_case("HEVC") {
            Some(Self::H265)
        } else {
            None
        }
    }

    /// Whether the access unit can be decoded without earlier frames.
    pub fn is_keyframe(self, nalus: &[Vec<u8>]) -> bool {
        match self {
            Self::H264 => h264::idr_present(nalus),
            Self::H265 => h265::random_access_present(nalus),
        }
    }

    /// Whether a NAL unit is a VPS, SPS or PPS.
    pub fn is_parameter_set(self, nalu: &[u8]) -> bool {
        match self {
            Self::H264 => h264::is_parameter_set(nalu),
            Self::H265 => h265::is_parameter_set(nalu),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
        })
    }
}

/// One codec access unit: the NAL units of one frame, its presentation
/// timestamp and the transport packets it was carried in.
///
/// Immutable once produced; shared between the raw-frame decoder and the
/// passthrough encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// NAL units in bitstream order, without start codes.
    pub nalus: Vec<Vec<u8>>,
    /// Presentation timestamp in clock ticks relative to the first packet of
    /// the session. Negative when a packet precedes the first one received.
    pub pts: i64,
    /// The RTP packets this unit was reassembled from, in arrival order.
    pub rtp_packets: Vec<RtpPacket>,
}

impl AccessUnit {
    /// RTP timestamp of the first packet of this unit.
    pub fn first_rtp_timestamp(&self) -> Option<u32> {
        self.rtp_packets.first().map(|p| p.timestamp)
    }
}

/// Per-codec NAL reassembly state.
#[derive(Debug)]
enum Unpacker {
    H264(h264::H264Unpacker),
    H265(h265::H265Unpacker),
}

impl Unpacker {
    fn unpack(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, DepacketizeError> {
        match self {
            Self::H264(u) => u.unpack(payload),
            Self::H265(u) => u.unpack(payload),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::H264(u) => u.reset(),
            Self::H265(u) => u.reset(),
        }
    }
}

/// Turns a sequence of RTP packets into [`AccessUnit`]s.
///
/// [`push`](Self::push) yields a unit when a packet carrying the marker bit
/// completes it. Every other packet produces a [`DepacketizeError`]; see
/// [`DepacketizeError::is_benign`] for which of those are routine.
#[derive(Debug)]
pub struct Depacketizer {
    codec: Codec,
    unpacker: Unpacker,
    nalus: Vec<Vec<u8>>,
    packets: Vec<RtpPacket>,
    size: usize,
}

impl Depacketizer {
    pub fn new(codec: Codec) -> Self {
        let unpacker = match codec {
            Codec::H264 => Unpacker::H264(h264::H264Unpacker::default()),
            Codec::H265 => Unpacker::H265(h265::H265Unpacker::default()),
        };
        Self {
            codec,
            unpacker,
            nalus: Vec::new(),
            packets: Vec::new(),
            size: 0,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Feed one RTP packet. `pts` is the presentation timestamp the unit
    /// will carry if this packet completes it.
    pub fn push(&mut self, packet: &RtpPacket, pts: i64) -> Result<AccessUnit, DepacketizeError> {
        let nalus = match self.unpacker.unpack(&packet.payload) {
            Ok(nalus) => nalus,
            Err(DepacketizeError::MorePacketsNeeded) => {
                // mid-fragment: the packet belongs to the unit being built
                self.packets.push(packet.clone());
                return Err(DepacketizeError::MorePacketsNeeded);
            }
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        self.packets.push(packet.clone());
        for nalu in nalus {
            self.size += nalu.len();
            self.nalus.push(nalu);
        }

        if self.nalus.len() > MAX_NALUS_PER_ACCESS_UNIT {
            let count = self.nalus.len();
            self.reset();
            return Err(DepacketizeError::Malformed(format!(
                "access unit has {count} NAL units, limit is {MAX_NALUS_PER_ACCESS_UNIT}"
            )));
        }
        if self.size > MAX_ACCESS_UNIT_SIZE {
            let size = self.size;
            self.reset();
            return Err(DepacketizeError::Malformed(format!(
                "access unit is {size} bytes, limit is {MAX_ACCESS_UNIT_SIZE}"
            )));
        }

        if !packet.marker {
            return Err(DepacketizeError::MorePacketsNeeded);
        }

        self.size = 0;
        Ok(AccessUnit {
            nalus: std::mem::take(&mut self.nalus),
            pts,
            rtp_packets: std::mem::take(&mut self.packets),
        })
    }

    /// Discard any partially assembled unit, e.g. after packet loss.
    pub fn reset(&mut self) {
        self.unpacker.reset();
        self.nalus.clear();
        self.packets.clear();
        self.size = 0;
    }
}
