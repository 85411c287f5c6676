use crate::error::{ParseErrorKind, Result};

/// Length of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// An RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       CSRC list (CC * 4)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Header extensions and padding are stripped on parse and never written;
/// [`marshal`](Self::marshal) always emits version 2 with P=0, X=0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Marker bit. For video, set on the last packet of an access unit.
    pub marker: bool,
    /// Payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    /// 16-bit wrapping sequence number.
    pub sequence_number: u16,
    /// Media clock timestamp (90 kHz for video).
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    /// Contributing sources.
    pub csrc: Vec<u32>,
    /// Codec payload.
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Parse an RTP packet from its wire representation.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(ParseErrorKind::InvalidRtp("shorter than fixed header").into());
        }
        if buf[0] >> 6 != 2 {
            return Err(ParseErrorKind::InvalidRtp("version is not 2").into());
        }

        let padding = buf[0] & 0x20 != 0;
        let extension = buf[0] & 0x10 != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;
        let marker = buf[1] & 0x80 != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = RTP_HEADER_LEN;
        if buf.len() < offset + csrc_count * 4 {
            return Err(ParseErrorKind::InvalidRtp("truncated CSRC list").into());
        }
        let csrc = (0..csrc_count)
            .map(|i| {
                let at = offset + i * 4;
                u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
            })
            .collect();
        offset += csrc_count * 4;

        if extension {
            // 16-bit profile, 16-bit length in 32-bit words (RFC 3550 §5.3.1)
            if buf.len() < offset + 4 {
                return Err(ParseErrorKind::InvalidRtp("truncated header extension").into());
            }
            let words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if buf.len() < offset {
                return Err(ParseErrorKind::InvalidRtp("truncated header extension").into());
            }
        }

        let mut end = buf.len();
        if padding {
            let pad = buf[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(ParseErrorKind::InvalidRtp("invalid padding").into());
            }
            end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            payload: buf[offset..end].to_vec(),
        })
    }

    /// Serialize to the RTP wire format.
    pub fn marshal(&self) -> Vec<u8> {
        let csrc_count = self.csrc.len().min(15);
        let mut out = Vec::with_capacity(RTP_HEADER_LEN + csrc_count * 4 + self.payload.len());
        out.push((2 << 6) | csrc_count as u8);
        out.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrc[..csrc_count] {
            out.extend_from_slice(&csrc.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Outbound RTP header state shared by payloaders.
///
/// Manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp offset**: every packet is stamped with this offset; the
///   caller adds the media time on top.
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
#[derive(Debug)]
pub struct RtpSequencer {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp_offset: u32,
}

impl RtpSequencer {
    /// Create a sequencer with explicit SSRC, first sequence number and
    /// timestamp offset.
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16, timestamp_offset: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            initial_sequence,
            timestamp_offset,
            "RTP sequencer created"
        );
        Self {
            pt,
            ssrc,
            sequence: initial_sequence,
            timestamp_offset,
        }
    }

    /// Create with random SSRC, initial sequence number and timestamp offset.
    ///
    /// RFC 3550 §5.1 recommends random initial values for both the
    /// sequence number and the timestamp.
    pub fn with_random_state(pt: u8) -> Self {
        Self::new(pt, rand::random(), rand::random(), rand::random())
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Build the next packet and advance the sequence number.
    pub fn next_packet(&mut self, marker: bool, payload: Vec<u8>) -> RtpPacket {
        let packet = RtpPacket {
            marker,
            payload_type: self.pt,
            sequence_number: self.sequence,
            timestamp: self.timestamp_offset,
            ssrc: self.ssrc,
            csrc: Vec::new(),
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }
}
