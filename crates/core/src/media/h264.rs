use crate::error::{CameraError, DepacketizeError, Result};

use super::rtp::{RtpPacket, RtpSequencer};

/// Coded slice of an IDR picture.
pub const NAL_IDR: u8 = 5;
/// Sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// Picture parameter set.
pub const NAL_PPS: u8 = 8;
/// Single-time aggregation packet (RFC 6184 §5.7.1).
pub const NAL_STAP_A: u8 = 24;
/// Fragmentation unit A (RFC 6184 §5.8).
pub const NAL_FU_A: u8 = 28;

const MAX_NALU_SIZE: usize = 4 * 1024 * 1024;

/// NAL unit type from the first header byte (`F|NRI|Type`).
pub fn nal_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| b & 0x1f)
}

/// Whether the access unit contains an IDR slice.
pub fn idr_present(nalus: &[Vec<u8>]) -> bool {
    nalus.iter().any(|n| nal_type(n) == Some(NAL_IDR))
}

pub fn is_parameter_set(nalu: &[u8]) -> bool {
    matches!(nal_type(nalu), Some(NAL_SPS | NAL_PPS))
}

/// Reassembles H.264 NAL units from RTP payloads (RFC 6184).
///
/// Handles the three packetization types non-interleaved mode allows:
///
/// - **Single NAL Unit** (§5.6): types 1–23, the payload is the NAL.
/// - **STAP-A** (§5.7.1): type 24, several NALs each prefixed with a
///   16-bit size.
/// - **FU-A** (§5.8): type 28, one NAL split over several packets:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
///   The original NAL header is rebuilt from the indicator's F/NRI bits and
///   the FU header's type.
#[derive(Debug, Default)]
pub struct H264Unpacker {
    fragment: Option<Vec<u8>>,
}

impl H264Unpacker {
    /// Returns the complete NAL units carried by this payload.
    pub fn unpack(&mut self, payload: &[u8]) -> std::result::Result<Vec<Vec<u8>>, DepacketizeError> {
        let Some(typ) = nal_type(payload) else {
            return Err(DepacketizeError::Malformed("empty RTP payload".into()));
        };

        match typ {
            NAL_FU_A => self.unpack_fu_a(payload),
            NAL_STAP_A => {
                self.discard_fragment();
                split_aggregate(&payload[1..])
            }
            25..=27 | 29 => {
                self.discard_fragment();
                Err(DepacketizeError::Malformed(format!(
                    "packetization type {typ} is not supported in non-interleaved mode"
                )))
            }
            0 | 30 | 31 => {
                self.discard_fragment();
                Err(DepacketizeError::Malformed(format!("reserved NAL type {typ}")))
            }
            _ => {
                self.discard_fragment();
                Ok(vec![payload.to_vec()])
            }
        }
    }

    fn unpack_fu_a(&mut self, payload: &[u8]) -> std::result::Result<Vec<Vec<u8>>, DepacketizeError> {
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed("FU-A payload too short".into()));
        }
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;

        if start {
            if end {
                return Err(DepacketizeError::Malformed(
                    "FU-A with both start and end bits set".into(),
                ));
            }
            self.discard_fragment();
            let mut nalu = Vec::with_capacity(payload.len() * 4);
            nalu.push((payload[0] & 0xe0) | (fu_header & 0x1f));
            nalu.extend_from_slice(&payload[2..]);
            self.fragment = Some(nalu);
            return Err(DepacketizeError::MorePacketsNeeded);
        }

        let Some(mut nalu) = self.fragment.take() else {
            return Err(DepacketizeError::NonStartingPacketAndNoPrevious);
        };
        nalu.extend_from_slice(&payload[2..]);
        if nalu.len() > MAX_NALU_SIZE {
            return Err(DepacketizeError::Malformed(format!(
                "NAL unit size exceeds {MAX_NALU_SIZE} bytes"
            )));
        }

        if end {
            Ok(vec![nalu])
        } else {
            self.fragment = Some(nalu);
            Err(DepacketizeError::MorePacketsNeeded)
        }
    }

    fn discard_fragment(&mut self) {
        if let Some(partial) = self.fragment.take() {
            tracing::trace!(bytes = partial.len(), "discarding incomplete FU-A fragment");
        }
    }

    pub fn reset(&mut self) {
        self.fragment = None;
    }
}

/// Split an aggregation payload (after its own header) into NAL units, each
/// prefixed with a 16-bit big-endian size. Shared with H.265 AP packets.
pub(crate) fn split_aggregate(
    mut data: &[u8],
) -> std::result::Result<Vec<Vec<u8>>, DepacketizeError> {
    let mut nalus = Vec::new();
    while !data.is_empty() {
        if data.len() < 2 {
            return Err(DepacketizeError::Malformed(
                "aggregation packet truncated in size field".into(),
            ));
        }
        let size = u16::from_be_bytes([data[0], data[1]]) as usize;
        data = &data[2..];
        if size == 0 || size > data.len() {
            return Err(DepacketizeError::Malformed(format!(
                "aggregation packet NAL size {size} invalid ({} bytes left)",
                data.len()
            )));
        }
        nalus.push(data[..size].to_vec());
        data = &data[size..];
    }
    if nalus.is_empty() {
        return Err(DepacketizeError::Malformed("empty aggregation packet".into()));
    }
    Ok(nalus)
}

/// H.264 RTP payloader (RFC 6184, packetization mode 1).
///
/// Converts the NAL units of one access unit into RTP packets whose payload
/// never exceeds `max_payload` bytes:
///
/// - Consecutive NALs that fit together are aggregated into one **STAP-A**
///   packet (§5.7.1); a lone NAL that fits is sent as a **Single NAL Unit**
///   packet (§5.6).
/// - NALs larger than `max_payload` are split into **FU-A** fragments
///   (§5.8), each carrying at most `max_payload - 2` NAL bytes after the
///   FU indicator and FU header. S is set on the first fragment and E on
///   the last.
///
/// ## Marker bit
///
/// Per RFC 6184 §5.1, the RTP marker bit is set on the last RTP packet
/// of the access unit. Every packet of one unit carries the sequencer's
/// timestamp offset; callers add the media time.
#[derive(Debug)]
pub struct H264Payloader {
    header: RtpSequencer,
    max_payload: usize,
}

impl H264Payloader {
    /// Create with explicit RTP state.
    pub fn new(header: RtpSequencer, max_payload: usize) -> Self {
        Self {
            header,
            max_payload: max_payload.max(3),
        }
    }

    /// Create with random SSRC, sequence number and timestamp offset.
    pub fn with_random_state(pt: u8, max_payload: usize) -> Self {
        Self::new(RtpSequencer::with_random_state(pt), max_payload)
    }

    /// Packetize one access unit.
    pub fn payload(&mut self, nalus: &[Vec<u8>]) -> Result<Vec<RtpPacket>> {
        let mut payloads: Vec<Vec<u8>> = Vec::new();
        let mut batch: Vec<&[u8]> = Vec::new();

        for nalu in nalus {
            if nalu.is_empty() {
                return Err(CameraError::Encode("empty NAL unit".into()));
            }

            if nalu.len() > self.max_payload {
                flush_batch(&mut batch, &mut payloads);
                self.fragment(nalu, &mut payloads);
                continue;
            }

            if !batch.is_empty() && aggregate_size(&batch) + 2 + nalu.len() > self.max_payload {
                flush_batch(&mut batch, &mut payloads);
            }
            batch.push(nalu);
        }
        flush_batch(&mut batch, &mut payloads);

        let count = payloads.len();
        let packets: Vec<RtpPacket> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| self.header.next_packet(i + 1 == count, payload))
            .collect();

        tracing::trace!(
            nal_count = nalus.len(),
            rtp_packets = packets.len(),
            seq = self.header.sequence(),
            "access unit packetized"
        );

        Ok(packets)
    }

    fn fragment(&self, nalu: &[u8], payloads: &mut Vec<Vec<u8>>) {
        let nal_header = nalu[0];
        let nal_type = nal_header & 0x1f;
        // FU indicator: F and NRI from original NAL, type = 28 (FU-A)
        let fu_indicator = (nal_header & 0xe0) | NAL_FU_A;
        let body = &nalu[1..];

        let max_fragment = self.max_payload - 2;
        let before = payloads.len();
        let mut chunks = body.chunks(max_fragment).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last { 0x40 } else { 0x00 };

            let mut payload = Vec::with_capacity(2 + chunk.len());
            payload.push(fu_indicator);
            payload.push(start_bit | end_bit | nal_type);
            payload.extend_from_slice(chunk);
            payloads.push(payload);
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nalu.len(),
            fragments = payloads.len() - before,
            "FU-A fragmented NAL unit"
        );
    }
}

fn aggregate_size(batch: &[&[u8]]) -> usize {
    1 + batch.iter().map(|n| 2 + n.len()).sum::<usize>()
}

fn flush_batch(batch: &mut Vec<&[u8]>, payloads: &mut Vec<Vec<u8>>) {
    match batch.len() {
        0 => {}
        1 => payloads.push(batch[0].to_vec()),
        _ => {
            // STAP-A header: F is OR-ed, NRI is the maximum of the aggregated NALs
            let f = batch.iter().fold(0u8, |acc, n| acc | (n[0] & 0x80));
            let nri = batch.iter().map(|n| n[0] & 0x60).max().unwrap_or(0);
            let mut payload = Vec::with_capacity(aggregate_size(batch));
            payload.push(f | nri | NAL_STAP_A);
            for nalu in batch.iter() {
                payload.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
                payload.extend_from_slice(nalu);
            }
            payloads.push(payload);
        }
    }
    batch.clear();
}
