use std::sync::Arc;

use super::FrameDecoder;
use crate::error::DepacketizeError;
use crate::frame_slot::FrameSlot;
use crate::media::rtp::RtpPacket;
use crate::media::{AccessUnit, Codec, Depacketizer, Timeline, h264, h265};

/// Where a [`DecodePipeline`] is in its startup sequence.
///
/// ```text
/// AwaitingParameters ──(all parameter sets seen)──▶ AwaitingKeyframe
///         │                                             │
///         └──────────────(keyframe unit)────────────────┴──▶ Streaming
/// ```
///
/// No image reaches the [`FrameSlot`] before `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    AwaitingParameters,
    AwaitingKeyframe,
    Streaming,
}

/// Per-track decode state: RTP packets in, images into the [`FrameSlot`].
///
/// Created once per stream session and discarded on reconnect, so the
/// keyframe gate starts closed for every new connection.
pub struct DecodePipeline {
    codec: Codec,
    depacketizer: Depacketizer,
    timeline: Timeline,
    last_sequence: Option<u16>,
    decoder: Option<Box<dyn FrameDecoder>>,
    slot: Arc<FrameSlot>,
    state: PipelineState,
    seen_parameter_sets: Vec<u8>,
    waiting_logged: bool,
}

impl DecodePipeline {
    /// Build a pipeline, feeding the out-of-band parameter sets from the
    /// session description to the decoder straight away.
    ///
    /// Missing parameter sets are logged, not fatal: some encoders only send
    /// them in-band.
    pub fn new(
        codec: Codec,
        mut decoder: Box<dyn FrameDecoder>,
        parameter_sets: &[Vec<u8>],
        slot: Arc<FrameSlot>,
    ) -> Self {
        let mut seen = Vec::new();
        for nalu in parameter_sets {
            if let Err(e) = decoder.feed_parameter_set(nalu) {
                tracing::debug!(%codec, error = %e, "decoder rejected parameter set");
            }
            if let Some(t) = parameter_set_type(codec, nalu) {
                seen.push(t);
            }
        }

        for (t, name) in expected_parameter_sets(codec) {
            if !seen.contains(t) {
                tracing::warn!(%codec, "no {name} found in session description");
            }
        }

        let mut pipeline = Self {
            codec,
            depacketizer: Depacketizer::new(codec),
            timeline: Timeline::new(),
            last_sequence: None,
            decoder: Some(decoder),
            slot,
            state: PipelineState::AwaitingParameters,
            seen_parameter_sets: seen,
            waiting_logged: false,
        };
        pipeline.update_parameter_state();
        pipeline
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Depacketize one RTP packet and decode the unit it completes.
    ///
    /// Returns the completed access unit, whether or not it was admitted
    /// past the keyframe gate, so it can be forwarded further.
    pub fn handle_packet(&mut self, packet: &RtpPacket) -> Option<Arc<AccessUnit>> {
        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if packet.sequence_number != expected {
                tracing::debug!(
                    expected,
                    received = packet.sequence_number,
                    "RTP sequence gap, discarding partial access unit"
                );
                self.depacketizer.reset();
            }
        }
        self.last_sequence = Some(packet.sequence_number);

        let pts = self.timeline.pts(packet.timestamp);
        match self.depacketizer.push(packet, pts) {
            Ok(au) => {
                let au = Arc::new(au);
                self.decode_unit(&au);
                Some(au)
            }
            Err(e) if e.is_benign() => None,
            Err(DepacketizeError::Malformed(reason)) => {
                tracing::error!(codec = %self.codec, %reason, "error depacketizing RTP stream");
                None
            }
            Err(_) => None,
        }
    }

    /// Run one access unit through the keyframe gate and the decoder.
    pub fn decode_unit(&mut self, au: &AccessUnit) {
        for nalu in &au.nalus {
            if let Some(t) = parameter_set_type(self.codec, nalu)
                && !self.seen_parameter_sets.contains(&t)
            {
                self.seen_parameter_sets.push(t);
            }
        }
        self.update_parameter_state();

        if self.state != PipelineState::Streaming {
            if !self.codec.is_keyframe(&au.nalus) {
                if !self.waiting_logged {
                    tracing::debug!(codec = %self.codec, "waiting for keyframe");
                    self.waiting_logged = true;
                }
                return;
            }
            tracing::debug!(codec = %self.codec, pts = au.pts, "got keyframe");
            self.state = PipelineState::Streaming;
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        for nalu in &au.nalus {
            match decoder.decode(nalu) {
                Ok(Some(frame)) => self.slot.store(frame),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(codec = %self.codec, error = %e, "error decoding access unit");
                    return;
                }
            }
        }
    }

    /// Release the decoder. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
            tracing::debug!(codec = %self.codec, "decode pipeline closed");
        }
    }

    fn update_parameter_state(&mut self) {
        if self.state == PipelineState::AwaitingParameters
            && expected_parameter_sets(self.codec)
                .iter()
                .all(|(t, _)| self.seen_parameter_sets.contains(t))
        {
            self.state = PipelineState::AwaitingKeyframe;
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DecodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodePipeline")
            .field("codec", &self.codec)
            .field("state", &self.state)
            .field("closed", &self.decoder.is_none())
            .finish()
    }
}

fn expected_parameter_sets(codec: Codec) -> &'static [(u8, &'static str)] {
    match codec {
        Codec::H264 => &[(h264::NAL_SPS, "SPS"), (h264::NAL_PPS, "PPS")],
        Codec::H265 => &[
            (h265::NAL_VPS, "VPS"),
            (h265::NAL_SPS, "SPS"),
            (h265::NAL_PPS, "PPS"),
        ],
    }
}

fn parameter_set_type(codec: Codec, nalu: &[u8]) -> Option<u8> {
    if !codec.is_parameter_set(nalu) {
        return None;
    }
    match codec {
        Codec::H264 => h264::nal_type(nalu),
        Codec::H265 => h265::nal_type(nalu),
    }
}
