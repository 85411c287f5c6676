//! Raw-frame decoding.
//!
//! The codec transform itself is a pluggable capability: a
//! [`DecoderFactory`] hands out one [`FrameDecoder`] per negotiated
//! [`Codec`], and the [`DecodePipeline`] drives it with access units while
//! enforcing the keyframe gate.
//!
//! | Backend | Availability | Produces images |
//! |---------|--------------|-----------------|
//! | [`NullDecoderFactory`] | always | no (passthrough-only hosts) |
//! | `FfmpegDecoderFactory` | `ffmpeg` feature | yes, RGB24 |

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod pipeline;

pub use pipeline::{DecodePipeline, PipelineState};

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegDecoderFactory;

use crate::error::Result;
use crate::media::Codec;

/// A decoded image, 8-bit RGB.
pub type Frame = image::RgbImage;

/// Turns NAL units of one codec into images.
///
/// NAL units are passed without start codes. Implementations keep whatever
/// reference state the codec needs between calls.
pub trait FrameDecoder: Send {
    /// Feed a VPS, SPS or PPS ahead of picture data.
    fn feed_parameter_set(&mut self, nalu: &[u8]) -> Result<()>;

    /// Decode one NAL unit. Returns an image when one is complete.
    fn decode(&mut self, nalu: &[u8]) -> Result<Option<Frame>>;

    /// Release decoder resources. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Creates a [`FrameDecoder`] for a negotiated codec.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, codec: Codec) -> Result<Box<dyn FrameDecoder>>;
}

/// Factory for hosts that only consume passthrough packets.
///
/// Its decoders accept everything and never produce an image, so
/// `latest_frame` keeps reporting that nothing has been decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecoderFactory;

impl DecoderFactory for NullDecoderFactory {
    fn create(&self, codec: Codec) -> Result<Box<dyn FrameDecoder>> {
        tracing::debug!(%codec, "raw-frame decoding disabled");
        Ok(Box::new(NullDecoder))
    }
}

#[derive(Debug)]
struct NullDecoder;

impl FrameDecoder for NullDecoder {
    fn feed_parameter_set(&mut self, _nalu: &[u8]) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _nalu: &[u8]) -> Result<Option<Frame>> {
        Ok(None)
    }

    fn close(&mut self) {}
}

/// Prefix a NAL unit with an Annex B start code.
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
pub(crate) fn annex_b(nalu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nalu.len() + 4);
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(nalu);
    out
}
