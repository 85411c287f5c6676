//! Media transports for the RTSP client.
//!
//! RTP can reach the client two ways, chosen at SETUP:
//!
//! - **TCP interleaved** ([`tcp`]): RTP and RTCP travel on the RTSP
//!   connection itself, framed as `$ <channel> <length> <data>`
//!   (RFC 2326 §10.12). One reader thread demultiplexes frames from RTSP
//!   responses. Works through NAT and firewalls; the default.
//!
//! - **UDP** ([`udp`]): RTP arrives on a local even/odd port pair, read by a
//!   dedicated thread.
//!
//! Both hand parsed packets to the same registered [`PacketHandler`], one at
//! a time, in arrival order.

pub mod tcp;
pub mod udp;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::rtp::RtpPacket;

pub use udp::UdpReceiver;

/// Called on the receive thread for every inbound RTP packet.
pub type PacketHandler = Box<dyn FnMut(&RtpPacket) + Send>;

/// Handler slot shared between the client and its receive thread.
pub(crate) type SharedHandler = Arc<Mutex<Option<PacketHandler>>>;

/// Parse one RTP datagram and pass it to the handler, if any.
pub(crate) fn dispatch(handler: &SharedHandler, data: &[u8]) {
    match RtpPacket::parse(data) {
        Ok(packet) => {
            tracing::trace!(
                seq = packet.sequence_number,
                ts = packet.timestamp,
                marker = packet.marker,
                len = packet.payload.len(),
                "RTP packet"
            );
            if let Some(handler) = handler.lock().as_mut() {
                handler(&packet);
            }
        }
        Err(e) => tracing::debug!(error = %e, len = data.len(), "dropping invalid RTP packet"),
    }
}
