//! One negotiated RTSP stream: connection, track, decode pipeline and
//! optional passthrough encoder.
//!
//! ## Connect sequence
//!
//! ```text
//! TCP connect -> DESCRIBE -> pick track (H.264, else H.265)
//!             -> decoder + pipeline (+ passthrough encoder)
//!             -> SETUP (track control) -> install packet handler
//!             -> PLAY (session control)
//! ```
//!
//! Any failure drops everything built so far: the client's close tears the
//! connection down and releases the handler, which owns the pipeline and
//! encoder. A session is never retried from here; the supervisor does that.

use std::sync::Arc;

use crate::client::{ClientOptions, RtspClient};
use crate::config::CameraConfig;
use crate::decode::{DecodePipeline, DecoderFactory};
use crate::error::{CameraError, Result};
use crate::frame_slot::FrameSlot;
use crate::media::Codec;
use crate::passthrough::{PassthroughEncoder, SubscriptionRegistry};
use crate::protocol::sdp::resolve_control;

/// Everything a session needs that outlives it across reconnects.
#[derive(Clone)]
pub struct SessionContext {
    pub config: CameraConfig,
    pub decoders: Arc<dyn DecoderFactory>,
    pub slot: Arc<FrameSlot>,
    pub registry: Arc<SubscriptionRegistry>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("address", &self.config.address)
            .field("rtp_passthrough", &self.config.rtp_passthrough)
            .finish_non_exhaustive()
    }
}

/// A playing RTSP stream.
#[derive(Debug)]
pub struct StreamSession {
    client: Option<RtspClient>,
    codec: Codec,
}

impl StreamSession {
    /// Connect, negotiate one video track and start playback.
    pub fn connect(ctx: &SessionContext) -> Result<Self> {
        let config = &ctx.config;
        let client = RtspClient::connect(
            &config.address,
            ClientOptions {
                transport: config.transport,
                request_timeout: config.request_timeout,
            },
        )?;

        let presentation = client.describe()?;
        let sdp = &presentation.sdp;

        let (codec, track) = match sdp
            .video_track(Codec::H264)
            .map(|t| (Codec::H264, t))
            .or_else(|| sdp.video_track(Codec::H265).map(|t| (Codec::H265, t)))
        {
            Some(found) => found,
            None => {
                let offered: Vec<String> = sdp
                    .media
                    .iter()
                    .map(|m| format!("{}/{}", m.media_type, m.encoding_name.as_deref().unwrap_or("?")))
                    .collect();
                tracing::warn!(url = client.url(), ?offered, "no H.264 or H.265 track offered");
                return Err(CameraError::NoSupportedTrack);
            }
        };

        if codec == Codec::H265 && config.rtp_passthrough {
            return Err(CameraError::PassthroughRequiresH264);
        }

        let parameter_sets = track.parameter_sets(codec)?;
        let decoder = ctx.decoders.create(codec)?;
        let mut pipeline = DecodePipeline::new(codec, decoder, &parameter_sets, Arc::clone(&ctx.slot));
        let mut encoder = config
            .rtp_passthrough
            .then(|| PassthroughEncoder::new(&parameter_sets));
        let passthrough = encoder.is_some();

        let control = resolve_control(&presentation.base_url, track.control.as_deref());
        client.setup(&control)?;

        let registry = Arc::clone(&ctx.registry);
        client.set_packet_handler(Box::new(move |packet| {
            // raw frames first; passthrough only sees what the pipeline assembled
            let Some(au) = pipeline.handle_packet(packet) else {
                return;
            };
            if let Some(encoder) = encoder.as_mut() {
                encoder.publish(&au, &registry);
            }
        }));

        // aggregate control: PLAY goes to the session-level URL, not the track
        client.play(&resolve_control(&presentation.base_url, sdp.control.as_deref()))?;

        tracing::info!(url = client.url(), %codec, passthrough, "stream playing");
        Ok(Self {
            client: Some(client),
            codec,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Health probe: OPTIONS must come back with a 2xx status.
    pub fn probe(&self) -> Result<()> {
        let client = self.client.as_ref().ok_or(CameraError::ConnectionClosed)?;
        if !client.is_connected() {
            return Err(CameraError::ConnectionClosed);
        }
        client.options()?.ensure_success("OPTIONS")?;
        Ok(())
    }

    /// Tear down the stream. Idempotent.
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.close();
            tracing::info!(url = client.url(), codec = %self.codec, "stream closed");
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
