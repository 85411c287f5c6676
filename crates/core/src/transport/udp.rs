use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{SharedHandler, dispatch};
use crate::error::{CameraError, Result};

/// Largest datagram accepted on the RTP socket.
const MAX_DATAGRAM: usize = 65_536;

/// How often the receive loop checks whether it should stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const BIND_ATTEMPTS: usize = 16;

/// UDP transport for inbound RTP.
///
/// Binds an even RTP port and the odd port above it for RTCP
/// (RFC 3550 §11). RTCP is bound only so the port pair stays reserved;
/// nothing is read from it.
#[derive(Debug)]
pub struct UdpReceiver {
    rtp: Arc<UdpSocket>,
    rtcp: UdpSocket,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl UdpReceiver {
    /// Bind an ephemeral even/odd port pair.
    pub fn bind() -> Result<Self> {
        for _ in 0..BIND_ATTEMPTS {
            let rtp = UdpSocket::bind("0.0.0.0:0")?;
            let port = rtp.local_addr()?.port();
            if port % 2 != 0 || port == u16::MAX {
                continue;
            }
            match UdpSocket::bind(("0.0.0.0", port + 1)) {
                Ok(rtcp) => {
                    tracing::debug!(rtp_port = port, rtcp_port = port + 1, "UDP ports bound");
                    return Ok(Self {
                        rtp: Arc::new(rtp),
                        rtcp,
                        running: Arc::new(AtomicBool::new(false)),
                        worker: None,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CameraError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no free UDP port pair for RTP/RTCP",
        )))
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtcp.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Start the receive thread.
    pub(crate) fn start(&mut self, handler: SharedHandler) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.rtp.set_read_timeout(Some(POLL_INTERVAL))?;
        self.running.store(true, Ordering::SeqCst);

        let socket = Arc::clone(&self.rtp);
        let running = Arc::clone(&self.running);
        let worker = thread::Builder::new()
            .name("rtsp-udp-rx".into())
            .spawn(move || receive_loop(&socket, &handler, &running))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the receive thread and wait for it. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("UDP receive thread panicked");
        }
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(socket: &UdpSocket, handler: &SharedHandler, running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => dispatch(handler, &buf[..len]),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "UDP receive error");
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    tracing::debug!("UDP receive loop exited");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::transport::PacketHandler;

    #[test]
    fn binds_even_odd_pair() {
        let rx = UdpReceiver::bind().unwrap();
        assert_eq!(rx.rtp_port() % 2, 0);
        assert_eq!(rx.rtcp_port(), rx.rtp_port() + 1);
    }

    #[test]
    fn delivers_datagrams_to_handler() {
        let mut rx = UdpReceiver::bind().unwrap();
        let (tx, got) = crossbeam_channel::unbounded();
        let on_packet: PacketHandler = Box::new(move |p: &RtpPacket| {
            tx.send(p.sequence_number).ok();
        });
        let handler: SharedHandler = Arc::new(Mutex::new(Some(on_packet)));
        rx.start(handler).unwrap();

        let packet = RtpPacket {
            marker: true,
            payload_type: 96,
            sequence_number: 77,
            timestamp: 0,
            ssrc: 1,
            csrc: Vec::new(),
            payload: vec![0x65],
        };
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&packet.marshal(), ("127.0.0.1", rx.rtp_port()))
            .unwrap();
        assert_eq!(got.recv_timeout(Duration::from_secs(2)).unwrap(), 77);

        let started = Instant::now();
        rx.close();
        rx.close();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
