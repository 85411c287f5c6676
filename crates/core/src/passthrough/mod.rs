//! H.264 RTP passthrough.
//!
//! Access units produced for the raw-frame path are re-packetized for a
//! browser-style transport (1200-byte datagrams, payload type 96) and fanned
//! out to independent subscribers:
//!
//! ```text
//! AccessUnit ─▶ PassthroughEncoder ─▶ SubscriptionRegistry ─┬▶ Subscription ─▶ callback
//!                (ordering check,      (read lock)          ├▶ Subscription ─▶ callback
//!                 timestamp fix)                            └▶ ...
//! ```
//!
//! Every subscription has its own bounded queue and delivery thread. A full
//! queue drops the batch for that subscriber only; the packet-receive
//! thread never waits on a subscriber.

pub mod encoder;
pub mod registry;
pub mod subscription;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use encoder::PassthroughEncoder;
pub use registry::SubscriptionRegistry;
pub use subscription::{Subscription, SubscriptionState};

use crate::error::{CameraError, Result};
use crate::media::rtp::RtpPacket;

/// Largest RTP payload sent to subscribers: 1200-byte MTU minus the
/// 12-byte RTP header.
pub const MAX_PAYLOAD_SIZE: usize = 1188;

/// Dynamic payload type advertised for the passthrough stream.
pub const PAYLOAD_TYPE: u8 = 96;

/// One access unit worth of transport-ready packets, shared by every
/// subscriber it is delivered to.
pub type PacketBatch = Arc<[RtpPacket]>;

/// Receives each packet batch on the subscription's delivery thread.
pub type PacketCallback = Box<dyn FnMut(&[RtpPacket]) -> Result<()> + Send>;

/// Told about a subscription's own failures: dropped batches and callback
/// errors.
pub type ErrorHandler = Arc<dyn Fn(CameraError) + Send + Sync>;

/// Opaque handle returned by `subscribe`. Unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
