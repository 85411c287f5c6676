//! Integration tests: a camera against a scripted RTSP server on loopback.
//!
//! The server answers OPTIONS, DESCRIBE, SETUP, PLAY and TEARDOWN from a
//! fixed SDP and, after PLAY, streams a non-IDR slice followed by an IDR
//! slice every 20 ms, interleaved on the RTSP connection or over UDP.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rtsp_camera::media::rtp::RtpPacket;
use rtsp_camera::passthrough::ErrorHandler;
use rtsp_camera::protocol::{RtspRequest, RtspResponse, TransportHeader};
use rtsp_camera::{
    CameraConfig, CameraError, Codec, DecoderFactory, Frame, FrameDecoder, RtspCamera,
    TransportMode,
};

const H264_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Stream\r\n\
t=0 0\r\n\
a=control:aggregate\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHg==,aM4=\r\n\
a=control:trackID=0\r\n";

const H265_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Stream\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 98\r\n\
a=rtpmap:98 H265/90000\r\n\
a=control:trackID=0\r\n";

const MJPEG_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Stream\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 26\r\n\
a=rtpmap:26 JPEG/90000\r\n";

const NON_IDR: &[u8] = &[0x41, 0x9a, 0x02, 0x03];
const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x10];

// ── scripted server ─────────────────────────────────────────────

struct ScriptedServer {
    addr: SocketAddr,
    sdp: &'static str,
    /// Expected `Authorization` value; requests without it get a 401.
    auth: Option<&'static str>,
    describes: AtomicUsize,
    unauthorized: AtomicUsize,
    teardowns: AtomicUsize,
    /// `METHOD uri` of every PLAY and TEARDOWN received.
    session_requests: Mutex<Vec<String>>,
    connections: Mutex<Vec<TcpStream>>,
    stop: AtomicBool,
}

struct ServerHandle {
    server: Arc<ScriptedServer>,
    worker: Option<JoinHandle<()>>,
}

impl ServerHandle {
    fn start(sdp: &'static str) -> Self {
        Self::start_with_auth(sdp, None)
    }

    fn start_with_auth(sdp: &'static str, auth: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind scripted server");
        listener.set_nonblocking(true).unwrap();
        let server = Arc::new(ScriptedServer {
            addr: listener.local_addr().unwrap(),
            sdp,
            auth,
            describes: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            session_requests: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });

        let worker = {
            let server = Arc::clone(&server);
            thread::spawn(move || {
                while !server.stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).unwrap();
                            server.connections.lock().push(stream.try_clone().unwrap());
                            let server = Arc::clone(&server);
                            thread::spawn(move || serve(server, stream));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            server,
            worker: Some(worker),
        }
    }

    fn url(&self) -> String {
        format!("rtsp://{}/stream", self.server.addr)
    }

    fn describes(&self) -> usize {
        self.server.describes.load(Ordering::SeqCst)
    }

    /// Drop every open connection, as a camera reboot would.
    fn kick(&self) {
        for conn in self.server.connections.lock().drain(..) {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.stop.store(true, Ordering::SeqCst);
        self.kick();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

enum Delivery {
    Interleaved(Arc<Mutex<TcpStream>>),
    Udp(UdpSocket, SocketAddr),
}

impl Delivery {
    fn send(&self, packet: &RtpPacket) -> std::io::Result<()> {
        let bytes = packet.marshal();
        match self {
            Delivery::Interleaved(writer) => {
                let mut frame = vec![b'$', 0];
                frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                frame.extend_from_slice(&bytes);
                writer.lock().write_all(&frame)
            }
            Delivery::Udp(socket, to) => socket.send_to(&bytes, to).map(|_| ()),
        }
    }
}

fn read_head(reader: &mut impl BufRead) -> Option<String> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        if (line == "\r\n" || line == "\n") && head.is_empty() {
            continue;
        }
        head.push_str(&line);
        if line == "\r\n" || line == "\n" {
            return Some(head);
        }
    }
}

fn serve(server: Arc<ScriptedServer>, stream: TcpStream) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let writer = Arc::new(Mutex::new(stream));
    let streaming = Arc::new(AtomicBool::new(false));
    let mut udp_target: Option<u16> = None;
    let base = format!("rtsp://{}/stream/", server.addr);

    while let Some(head) = read_head(&mut reader) {
        let request = RtspRequest::parse(&head).expect("client sent a valid request");
        let cseq = request.cseq().unwrap_or("0").to_string();

        if let Some(expected) = server.auth
            && request.get_header("Authorization") != Some(expected)
        {
            server.unauthorized.fetch_add(1, Ordering::SeqCst);
            let response = RtspResponse::new(401, "Unauthorized")
                .add_header("CSeq", &cseq)
                .add_header("WWW-Authenticate", "Basic realm=\"camera\"");
            if writer.lock().write_all(response.serialize().as_bytes()).is_err() {
                break;
            }
            continue;
        }

        let response = match request.method.as_str() {
            "OPTIONS" => RtspResponse::ok()
                .add_header("CSeq", &cseq)
                .add_header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN"),
            "DESCRIBE" => {
                server.describes.fetch_add(1, Ordering::SeqCst);
                let response = RtspResponse::ok()
                    .add_header("CSeq", &cseq)
                    .add_header("Content-Base", &base)
                    .add_header("Content-Type", "application/sdp");
                RtspResponse {
                    body: Some(server.sdp.to_string()),
                    ..response
                }
            }
            "SETUP" => {
                assert_eq!(request.uri, format!("{base}trackID=0"));
                let offer = TransportHeader::parse(request.get_header("Transport").unwrap()).unwrap();
                let transport = match offer.client_port {
                    Some((rtp, rtcp)) => {
                        udp_target = Some(rtp);
                        format!("RTP/AVP;unicast;client_port={rtp}-{rtcp};server_port=6970-6971;ssrc=12345678")
                    }
                    None => "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
                };
                RtspResponse::ok()
                    .add_header("CSeq", &cseq)
                    .add_header("Session", "4F2A11C0;timeout=60")
                    .add_header("Transport", &transport)
            }
            "PLAY" => {
                assert_eq!(request.get_header("Session"), Some("4F2A11C0"));
                streaming.store(true, Ordering::SeqCst);
                RtspResponse::ok()
                    .add_header("CSeq", &cseq)
                    .add_header("Session", "4F2A11C0")
            }
            "TEARDOWN" => {
                server.teardowns.fetch_add(1, Ordering::SeqCst);
                streaming.store(false, Ordering::SeqCst);
                RtspResponse::ok().add_header("CSeq", &cseq)
            }
            _ => RtspResponse::new(405, "Method Not Allowed").add_header("CSeq", &cseq),
        };

        if matches!(request.method.as_str(), "PLAY" | "TEARDOWN") {
            server
                .session_requests
                .lock()
                .push(format!("{} {}", request.method, request.uri));
        }

        let start_stream = request.method == "PLAY";
        if writer.lock().write_all(response.serialize().as_bytes()).is_err() {
            break;
        }
        if start_stream {
            let delivery = match udp_target {
                Some(port) => Delivery::Udp(
                    UdpSocket::bind("127.0.0.1:0").unwrap(),
                    SocketAddr::from(([127, 0, 0, 1], port)),
                ),
                None => Delivery::Interleaved(Arc::clone(&writer)),
            };
            let streaming = Arc::clone(&streaming);
            thread::spawn(move || stream_units(delivery, streaming));
        }
    }
    streaming.store(false, Ordering::SeqCst);
}

fn stream_units(delivery: Delivery, streaming: Arc<AtomicBool>) {
    let mut sequence_number: u16 = 7000;
    let mut timestamp: u32 = 90_000;
    while streaming.load(Ordering::SeqCst) {
        for payload in [NON_IDR, IDR] {
            let packet = RtpPacket {
                marker: true,
                payload_type: 96,
                sequence_number,
                timestamp,
                ssrc: 0x1234_5678,
                csrc: Vec::new(),
                payload: payload.to_vec(),
            };
            if delivery.send(&packet).is_err() {
                return;
            }
            sequence_number = sequence_number.wrapping_add(1);
            timestamp = timestamp.wrapping_add(3000);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

// ── fake decoder ────────────────────────────────────────────────

#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
}

impl DecoderFactory for CountingFactory {
    fn create(&self, _codec: Codec) -> rtsp_camera::Result<Box<dyn FrameDecoder>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(KeyframeDecoder))
    }
}

/// Produces a 4x2 image for every IDR slice and nothing otherwise.
struct KeyframeDecoder;

impl FrameDecoder for KeyframeDecoder {
    fn feed_parameter_set(&mut self, _nalu: &[u8]) -> rtsp_camera::Result<()> {
        Ok(())
    }

    fn decode(&mut self, nalu: &[u8]) -> rtsp_camera::Result<Option<Frame>> {
        Ok((nalu.first().map(|b| b & 0x1f) == Some(5)).then(|| Frame::new(4, 2)))
    }

    fn close(&mut self) {}
}

fn config(url: &str, passthrough: bool) -> CameraConfig {
    CameraConfig {
        address: url.to_string(),
        rtp_passthrough: passthrough,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

// ── tests ───────────────────────────────────────────────────────

#[test]
fn h264_interleaved_frames_and_passthrough() {
    let server = ServerHandle::start(H264_SDP);
    let factory = Arc::new(CountingFactory::default());
    let camera = RtspCamera::new(config(&server.url(), true), factory.clone()).expect("camera connects");
    assert_eq!(camera.codec(), Some(Codec::H264));
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);

    let (tx, rx) = crossbeam_channel::unbounded::<Vec<RtpPacket>>();
    let id = camera
        .subscribe_rtp(
            64,
            Box::new(move |packets| {
                tx.send(packets.to_vec()).ok();
                Ok(())
            }),
        )
        .expect("passthrough enabled");

    assert!(
        wait_until(Duration::from_secs(5), || camera.latest_frame().is_ok()),
        "no frame decoded"
    );
    let frame = camera.latest_frame().unwrap();
    assert_eq!(frame.dimensions(), (4, 2));

    let first = rx.recv_timeout(Duration::from_secs(5)).expect("passthrough batch");
    assert!(!first.is_empty());
    assert!(first.last().unwrap().marker);
    assert!(first.iter().all(|p| p.payload_type == 96));
    let second = rx.recv_timeout(Duration::from_secs(5)).expect("second batch");
    assert_eq!(
        second[0].sequence_number,
        first.last().unwrap().sequence_number.wrapping_add(1)
    );
    assert_eq!(second[0].timestamp.wrapping_sub(first[0].timestamp), 3000);

    camera.unsubscribe(id).unwrap();
    camera.close();
    assert_eq!(server.server.teardowns.load(Ordering::SeqCst), 1);

    // session-level control, not the track's, for PLAY and TEARDOWN
    let aggregate = format!("{}/aggregate", server.url());
    assert_eq!(
        *server.server.session_requests.lock(),
        vec![format!("PLAY {aggregate}"), format!("TEARDOWN {aggregate}")]
    );
}

#[test]
fn h264_over_udp_populates_frame() {
    let server = ServerHandle::start(H264_SDP);
    let mut config = config(&server.url(), false);
    config.transport = TransportMode::Udp;
    let camera = RtspCamera::new(config, Arc::new(CountingFactory::default())).expect("camera connects");

    assert!(
        wait_until(Duration::from_secs(5), || camera.latest_frame().is_ok()),
        "no frame decoded over UDP"
    );
    camera.close();
}

#[test]
fn h265_source_with_passthrough_is_rejected_before_decoding() {
    let server = ServerHandle::start(H265_SDP);
    let factory = Arc::new(CountingFactory::default());

    let err = RtspCamera::new(config(&server.url(), true), factory.clone()).unwrap_err();
    assert!(matches!(err, CameraError::PassthroughRequiresH264), "{err}");
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[test]
fn h265_source_without_passthrough_connects() {
    let server = ServerHandle::start(H265_SDP);
    let camera = RtspCamera::new(config(&server.url(), false), Arc::new(CountingFactory::default()))
        .expect("H.265 decode-only session");
    assert_eq!(camera.codec(), Some(Codec::H265));
    assert!(matches!(
        camera.subscribe_rtp(8, Box::new(|_| Ok(()))),
        Err(CameraError::PassthroughNotEnabled)
    ));
}

#[test]
fn unsupported_track_fails_negotiation() {
    let server = ServerHandle::start(MJPEG_SDP);
    let factory = Arc::new(CountingFactory::default());
    let err = RtspCamera::new(config(&server.url(), false), factory.clone()).unwrap_err();
    assert!(matches!(err, CameraError::NoSupportedTrack), "{err}");
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[test]
fn basic_auth_retried_after_401() {
    // admin:secret
    let server = ServerHandle::start_with_auth(H264_SDP, Some("Basic YWRtaW46c2VjcmV0"));
    let url = server.url().replace("rtsp://", "rtsp://admin:secret@");
    let camera = RtspCamera::new(config(&url, false), Arc::new(CountingFactory::default()))
        .expect("authenticated session");
    assert_eq!(server.server.unauthorized.load(Ordering::SeqCst), 1);
    camera.close();
}

#[test]
fn missing_credentials_surface_status_error() {
    let server = ServerHandle::start_with_auth(H264_SDP, Some("Basic YWRtaW46c2VjcmV0"));
    let err = RtspCamera::new(config(&server.url(), false), Arc::new(CountingFactory::default()))
        .unwrap_err();
    assert!(
        matches!(err, CameraError::Status { status: 401, .. }),
        "{err}"
    );
}

#[test]
fn supervisor_reconnects_after_connection_drop() {
    let server = ServerHandle::start(H264_SDP);
    let mut config = config(&server.url(), true);
    config.health_check_interval = Duration::from_millis(100);
    let camera = RtspCamera::new(config, Arc::new(CountingFactory::default())).expect("camera connects");

    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);
    let id = camera
        .subscribe_rtp(
            64,
            Box::new(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    assert_eq!(server.describes(), 1);
    server.kick();
    assert!(
        wait_until(Duration::from_secs(5), || server.describes() >= 2),
        "no reconnect"
    );

    // the subscription survives the reconnect
    let before = delivered.load(Ordering::SeqCst);
    assert!(
        wait_until(Duration::from_secs(5), || delivered.load(Ordering::SeqCst) > before),
        "no packets after reconnect"
    );
    camera.unsubscribe(id).unwrap();
}

#[test]
fn unsubscribe_unknown_and_twice() {
    let server = ServerHandle::start(H264_SDP);
    let camera = RtspCamera::new(config(&server.url(), true), Arc::new(CountingFactory::default()))
        .expect("camera connects");

    let on_error: ErrorHandler = Arc::new(|_| {});
    let id = camera
        .subscribe_rtp_with_handler(4, Box::new(|_| Ok(())), on_error)
        .unwrap();
    camera.unsubscribe(id).unwrap();
    assert!(matches!(
        camera.unsubscribe(id),
        Err(CameraError::SubscriptionNotFound(got)) if got == id
    ));
}

#[test]
fn close_is_idempotent() {
    let server = ServerHandle::start(H264_SDP);
    let camera = RtspCamera::new(config(&server.url(), true), Arc::new(CountingFactory::default()))
        .expect("camera connects");
    camera.subscribe_rtp(4, Box::new(|_| Ok(()))).unwrap();

    camera.close();
    camera.close();
    assert_eq!(camera.codec(), None);
    assert!(matches!(
        camera.subscribe_rtp(4, Box::new(|_| Ok(()))),
        Err(CameraError::Closed)
    ));
    drop(camera);
    assert_eq!(server.server.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn unreachable_camera_fails_construction() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let err = RtspCamera::new(
        config(&format!("rtsp://127.0.0.1:{port}/stream"), false),
        Arc::new(CountingFactory::default()),
    )
    .unwrap_err();
    assert!(err.is_connection_error(), "{err}");
}

#[test]
fn invalid_address_fails_validation() {
    let err = RtspCamera::new(config("http://camera/stream", false), Arc::new(CountingFactory::default()))
        .unwrap_err();
    assert!(matches!(err, CameraError::InvalidAddress { .. }));
}
