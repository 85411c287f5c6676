use super::{MAX_PAYLOAD_SIZE, PAYLOAD_TYPE, PacketBatch, SubscriptionRegistry};
use crate::error::{CameraError, Result};
use crate::media::h264::{self, H264Payloader};
use crate::media::rtp::RtpPacket;
use crate::media::{AccessUnit, Codec};

/// Re-packetizes H.264 access units for passthrough subscribers.
///
/// Units must arrive with non-decreasing presentation timestamps; streams
/// that reorder frames (B-frames) are rejected unit by unit. Each emitted
/// packet's timestamp is the payloader's random offset plus the RTP
/// timestamp of the unit's first source packet, so receivers stay aligned
/// with the camera clock.
///
/// The most recent SPS and PPS are remembered and put in front of IDR units
/// that arrive without them, so a subscriber joining mid-stream can start at
/// the next keyframe.
#[derive(Debug)]
pub struct PassthroughEncoder {
    payloader: H264Payloader,
    first_received: bool,
    last_pts: i64,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl PassthroughEncoder {
    /// Create an encoder with random RTP state, seeded with the out-of-band
    /// parameter sets of the track.
    pub fn new(parameter_sets: &[Vec<u8>]) -> Self {
        Self::with_payloader(
            H264Payloader::with_random_state(PAYLOAD_TYPE, MAX_PAYLOAD_SIZE),
            parameter_sets,
        )
    }

    pub fn with_payloader(payloader: H264Payloader, parameter_sets: &[Vec<u8>]) -> Self {
        let mut encoder = Self {
            payloader,
            first_received: false,
            last_pts: 0,
            sps: None,
            pps: None,
        };
        for nalu in parameter_sets {
            encoder.remember_parameter_set(nalu);
        }
        encoder
    }

    /// Packetize one access unit.
    ///
    /// Returns no packets for a unit without picture data. A timestamp
    /// lower than the previous accepted unit's yields
    /// [`CameraError::NonMonotonicPts`] and leaves the encoder state as it
    /// was.
    pub fn encode(&mut self, au: &AccessUnit) -> Result<Vec<RtpPacket>> {
        for nalu in &au.nalus {
            self.remember_parameter_set(nalu);
        }
        if !au.nalus.iter().any(|n| !n.is_empty() && !h264::is_parameter_set(n)) {
            return Ok(Vec::new());
        }

        if self.first_received && au.pts < self.last_pts {
            return Err(CameraError::NonMonotonicPts {
                previous: self.last_pts,
                current: au.pts,
            });
        }
        self.first_received = true;
        self.last_pts = au.pts;

        let nalus = self.with_parameter_sets(&au.nalus);
        let mut packets = self.payloader.payload(&nalus)?;

        // truncation to the 32-bit RTP clock is intended
        let source_ts = au.first_rtp_timestamp().unwrap_or(au.pts as u32);
        for packet in &mut packets {
            packet.timestamp = packet.timestamp.wrapping_add(source_ts);
        }
        Ok(packets)
    }

    /// Encode one unit and hand the batch to every subscriber.
    ///
    /// Never fails: ordering violations are logged and the unit skipped,
    /// other encoding failures drop the unit silently.
    pub fn publish(&mut self, au: &AccessUnit, registry: &SubscriptionRegistry) {
        match self.encode(au) {
            Ok(packets) if packets.is_empty() => {}
            Ok(packets) => {
                let batch: PacketBatch = packets.into();
                registry.publish(&batch);
            }
            Err(e @ CameraError::NonMonotonicPts { .. }) => {
                tracing::warn!(error = %e, "passthrough unit rejected");
            }
            Err(e) => {
                tracing::trace!(error = %e, "passthrough unit dropped");
            }
        }
    }

    fn remember_parameter_set(&mut self, nalu: &[u8]) {
        match h264::nal_type(nalu) {
            Some(h264::NAL_SPS) => self.sps = Some(nalu.to_vec()),
            Some(h264::NAL_PPS) => self.pps = Some(nalu.to_vec()),
            _ => {}
        }
    }

    fn with_parameter_sets(&self, nalus: &[Vec<u8>]) -> Vec<Vec<u8>> {
        if !Codec::H264.is_keyframe(nalus) {
            return nalus.to_vec();
        }
        let has = |t| nalus.iter().any(|n| h264::nal_type(n) == Some(t));
        let mut out = Vec::with_capacity(nalus.len() + 2);
        if !has(h264::NAL_SPS)
            && let Some(sps) = &self.sps
        {
            out.push(sps.clone());
        }
        if !has(h264::NAL_PPS)
            && let Some(pps) = &self.pps
        {
            out.push(pps.clone());
        }
        out.extend_from_slice(nalus);
        out
    }
}
