//! FFmpeg-backed raw-frame decoder (`ffmpeg` feature).
//!
//! NAL units are sent to libavcodec one at a time in Annex B form; decoded
//! pictures are converted to RGB24 with swscale. The scaler is created on
//! the first picture, once the stream dimensions are known, and rebuilt if
//! they change.

use ffmpeg_next as ffmpeg;

use super::{DecoderFactory, Frame, FrameDecoder, annex_b};
use crate::error::{CameraError, Result};
use crate::media::Codec;

/// Creates [`FfmpegDecoder`]s for H.264 and H.265.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegDecoderFactory;

impl FfmpegDecoderFactory {
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(decode_error)?;
        Ok(Self)
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn create(&self, codec: Codec) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(FfmpegDecoder::new(codec)?))
    }
}

pub struct FfmpegDecoder {
    codec: Codec,
    decoder: Option<ffmpeg::codec::decoder::Video>,
    scaler: Option<Scaler>,
}

struct Scaler {
    context: ffmpeg::software::scaling::Context,
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
}

impl FfmpegDecoder {
    pub fn new(codec: Codec) -> Result<Self> {
        let id = match codec {
            Codec::H264 => ffmpeg::codec::Id::H264,
            Codec::H265 => ffmpeg::codec::Id::HEVC,
        };
        let av_codec = ffmpeg::codec::decoder::find(id)
            .ok_or_else(|| CameraError::UnsupportedCodec(codec.to_string()))?;
        let decoder = ffmpeg::codec::context::Context::new()
            .decoder()
            .open_as(av_codec)
            .and_then(|opened| opened.video())
            .map_err(decode_error)?;

        tracing::debug!(%codec, "ffmpeg decoder opened");
        Ok(Self {
            codec,
            decoder: Some(decoder),
            scaler: None,
        })
    }

    fn send(&mut self, nalu: &[u8]) -> Result<Option<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CameraError::Decode(format!("{} decoder closed", self.codec)));
        };

        let packet = ffmpeg::Packet::copy(&annex_b(nalu));
        decoder.send_packet(&packet).map_err(decode_error)?;

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut latest = None;
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut scaler = match self.scaler.take() {
                Some(s)
                    if s.format == decoded.format()
                        && s.width == decoded.width()
                        && s.height == decoded.height() =>
                {
                    s
                }
                _ => Scaler::for_frame(&decoded)?,
            };
            let mut rgb = ffmpeg::frame::Video::empty();
            let scaled = scaler.context.run(&decoded, &mut rgb);
            self.scaler = Some(scaler);
            scaled.map_err(decode_error)?;
            latest = Some(to_image(&rgb)?);
        }
        Ok(latest)
    }
}

impl Scaler {
    fn for_frame(frame: &ffmpeg::frame::Video) -> Result<Self> {
        let context = ffmpeg::software::scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            ffmpeg::format::Pixel::RGB24,
            frame.width(),
            frame.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(decode_error)?;
        Ok(Self {
            context,
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        })
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn feed_parameter_set(&mut self, nalu: &[u8]) -> Result<()> {
        self.send(nalu).map(|_| ())
    }

    fn decode(&mut self, nalu: &[u8]) -> Result<Option<Frame>> {
        self.send(nalu)
    }

    fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.send_eof();
            self.scaler = None;
            tracing::debug!(codec = %self.codec, "ffmpeg decoder closed");
        }
    }
}

/// Copy an RGB24 picture into an image, dropping row padding.
fn to_image(frame: &ffmpeg::frame::Video) -> Result<Frame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| CameraError::Decode("ffmpeg frame row is out of bounds".into()))?;
        pixels.extend_from_slice(line);
    }

    Frame::from_raw(width, height, pixels)
        .ok_or_else(|| CameraError::Decode("frame buffer size mismatch".into()))
}

fn decode_error(e: ffmpeg::Error) -> CameraError {
    CameraError::Decode(e.to_string())
}
