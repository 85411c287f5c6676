use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BrownConrady, CameraConfig, PinholeIntrinsics};
use crate::decode::{DecoderFactory, Frame};
use crate::error::{CameraError, Result};
use crate::frame_slot::FrameSlot;
use crate::media::Codec;
use crate::passthrough::{ErrorHandler, PacketCallback, SubscriptionId, SubscriptionRegistry};
use crate::session::{SessionContext, StreamSession};
use crate::supervisor::{Supervised, Supervisor};

/// The active session, swapped by the supervisor on reconnect.
type ActiveSession = Arc<Mutex<Option<StreamSession>>>;

/// An RTSP camera: latest decoded frame plus optional H.264 passthrough.
///
/// Construction connects once and fails if that attempt fails. After that a
/// supervisor probes the connection every
/// [`health_check_interval`](CameraConfig::health_check_interval) and
/// rebuilds the session when it dies; frames and subscriptions carry over.
///
/// ```no_run
/// use std::sync::Arc;
/// use rtsp_camera::{CameraConfig, NullDecoderFactory, RtspCamera};
///
/// let mut config = CameraConfig::new("rtsp://192.168.1.20/stream1");
/// config.rtp_passthrough = true;
/// let camera = RtspCamera::new(config, Arc::new(NullDecoderFactory))?;
/// let id = camera.subscribe_rtp(64, Box::new(|packets| {
///     println!("{} packets", packets.len());
///     Ok(())
/// }))?;
/// camera.unsubscribe(id)?;
/// # Ok::<(), rtsp_camera::CameraError>(())
/// ```
pub struct RtspCamera {
    config: CameraConfig,
    slot: Arc<FrameSlot>,
    registry: Arc<SubscriptionRegistry>,
    session: ActiveSession,
    supervisor: Mutex<Option<Supervisor>>,
    closed: Mutex<bool>,
}

impl RtspCamera {
    pub fn new(config: CameraConfig, decoders: Arc<dyn DecoderFactory>) -> Result<Self> {
        config.validate()?;

        let slot = Arc::new(FrameSlot::new());
        let registry = Arc::new(SubscriptionRegistry::new(config.rtp_passthrough));
        let ctx = SessionContext {
            config: config.clone(),
            decoders,
            slot: Arc::clone(&slot),
            registry: Arc::clone(&registry),
        };

        let session: ActiveSession = Arc::new(Mutex::new(Some(StreamSession::connect(&ctx)?)));
        let link = SessionLink {
            ctx,
            session: Arc::clone(&session),
        };
        let supervisor = Supervisor::start(link, config.health_check_interval)?;

        tracing::info!(url = %config.address, passthrough = config.rtp_passthrough, "camera opened");
        Ok(Self {
            config,
            slot,
            registry,
            session,
            supervisor: Mutex::new(Some(supervisor)),
            closed: Mutex::new(false),
        })
    }

    /// The most recently decoded frame.
    pub fn latest_frame(&self) -> Result<Arc<Frame>> {
        self.slot.load().ok_or(CameraError::NoFrameYet)
    }

    /// Receive passthrough RTP, one batch per access unit.
    ///
    /// `buffer_size` bounds the batches queued for this subscriber; when it
    /// is full new batches are dropped and logged. Requires
    /// [`rtp_passthrough`](CameraConfig::rtp_passthrough).
    pub fn subscribe_rtp(&self, buffer_size: usize, callback: PacketCallback) -> Result<SubscriptionId> {
        let on_error: ErrorHandler = Arc::new(|e| {
            tracing::error!(error = %e, "passthrough subscriber error");
        });
        self.subscribe_rtp_with_handler(buffer_size, callback, on_error)
    }

    /// Like [`subscribe_rtp`](Self::subscribe_rtp), with a custom handler
    /// for dropped batches and callback failures.
    pub fn subscribe_rtp_with_handler(
        &self,
        buffer_size: usize,
        callback: PacketCallback,
        on_error: ErrorHandler,
    ) -> Result<SubscriptionId> {
        if *self.closed.lock() {
            return Err(CameraError::Closed);
        }
        self.registry.subscribe(buffer_size, callback, on_error)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.registry.unsubscribe(id)
    }

    pub fn intrinsics(&self) -> Option<PinholeIntrinsics> {
        self.config.intrinsic_parameters
    }

    pub fn distortion(&self) -> Option<BrownConrady> {
        self.config.distortion_parameters
    }

    /// Codec of the current session, if one is up.
    pub fn codec(&self) -> Option<Codec> {
        self.session.lock().as_ref().map(StreamSession::codec)
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Stop the supervisor, drop every subscription and close the session,
    /// waiting for all background threads. Later calls do nothing.
    pub fn close(&self) {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
        }

        if let Some(mut supervisor) = self.supervisor.lock().take() {
            supervisor.stop();
        }
        self.registry.unsubscribe_all();
        if let Some(mut session) = self.session.lock().take() {
            session.close();
        }
        tracing::info!(url = %self.config.address, "camera closed");
    }
}

impl Drop for RtspCamera {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RtspCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtspCamera")
            .field("address", &self.config.address)
            .field("codec", &self.codec())
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}

/// Supervisor's handle on the camera's active session.
struct SessionLink {
    ctx: SessionContext,
    session: ActiveSession,
}

impl Supervised for SessionLink {
    fn probe(&self) -> Result<()> {
        match self.session.lock().as_ref() {
            Some(session) => session.probe(),
            None => Err(CameraError::ConnectionClosed),
        }
    }

    fn reconnect(&self) -> Result<()> {
        // the old session is fully closed before a new one is built
        if let Some(mut old) = self.session.lock().take() {
            old.close();
        }
        let fresh = StreamSession::connect(&self.ctx)?;
        *self.session.lock() = Some(fresh);
        Ok(())
    }
}
