pub mod camera;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame_slot;
pub mod media;
pub mod passthrough;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use camera::RtspCamera;
pub use client::{ClientOptions, RtspClient};
pub use config::{BrownConrady, CameraConfig, PinholeIntrinsics, TransportMode};
pub use decode::{DecoderFactory, Frame, FrameDecoder, NullDecoderFactory};
pub use error::{CameraError, Result};
pub use frame_slot::FrameSlot;
pub use media::{AccessUnit, Codec};
pub use passthrough::{PacketCallback, SubscriptionId};
pub use session::StreamSession;

#[cfg(feature = "ffmpeg")]
pub use decode::FfmpegDecoderFactory;
