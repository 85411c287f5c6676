use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::{SharedHandler, dispatch};
use crate::error::{CameraError, Result};
use crate::protocol::{RtspRequest, RtspResponse};

/// Upper bound on a message head, to stop a misbehaving server from
/// growing the buffer without limit.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on a message body (SDP is a few hundred bytes).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Marker byte of an interleaved binary frame (RFC 2326 §10.12).
const INTERLEAVED_MAGIC: u8 = b'$';

/// One item read from the RTSP connection.
#[derive(Debug)]
pub enum Message {
    Response(RtspResponse),
    /// A request from the server; its body, if any, has been consumed.
    Request(RtspRequest),
    /// `$`-framed binary data on the given channel.
    Interleaved { channel: u8, data: Vec<u8> },
}

/// Read the next response, server request or interleaved frame.
///
/// Returns `Ok(None)` on a clean end of stream. A head that is neither a
/// status line nor a request line is a parse error; the stream position
/// after one is unknown.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<Message>> {
    let mut first = [0u8; 1];
    loop {
        if reader.read(&mut first)? == 0 {
            return Ok(None);
        }
        // skip blank lines between messages
        if first[0] != b'\r' && first[0] != b'\n' {
            break;
        }
    }

    if first[0] == INTERLEAVED_MAGIC {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header)?;
        let channel = header[0];
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        return Ok(Some(Message::Interleaved { channel, data }));
    }

    let mut head = vec![first[0]];
    while !(head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n")) {
        if reader.read_until(b'\n', &mut head)? == 0 {
            return Err(CameraError::ConnectionClosed);
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(
                io::Error::new(io::ErrorKind::InvalidData, "RTSP message head too large").into(),
            );
        }
    }

    let text = String::from_utf8_lossy(&head);
    if !text.starts_with("RTSP/") {
        let request = RtspRequest::parse(&text)?;
        read_body(reader, request.content_length()?)?;
        return Ok(Some(Message::Request(request)));
    }

    let mut response = RtspResponse::parse_head(&text)?;
    let body = read_body(reader, response.content_length()?)?;
    if !body.is_empty() {
        response.body = Some(String::from_utf8_lossy(&body).into_owned());
    }
    Ok(Some(Message::Response(response)))
}

fn read_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    if len > MAX_BODY_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "RTSP message body too large").into());
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Answer a request the server sent on the control connection.
///
/// Keepalive OPTIONS and GET_PARAMETER get a 200; anything else is
/// refused with 501 so the server does not wait on it.
fn reply(writer: &Mutex<TcpStream>, request: &RtspRequest) -> io::Result<()> {
    let response = match request.method.as_str() {
        "OPTIONS" => RtspResponse::ok().add_header("Public", "OPTIONS, GET_PARAMETER"),
        "GET_PARAMETER" => RtspResponse::ok(),
        _ => RtspResponse::new(501, "Not Implemented"),
    };
    let response = match request.cseq() {
        Some(cseq) => response.add_header("CSeq", cseq),
        None => response,
    };
    writer.lock().write_all(response.serialize().as_bytes())
}

/// Receive loop for a TCP RTSP connection.
///
/// Responses go to `responses`; frames on `rtp_channel` are parsed as RTP
/// and dispatched; server requests are answered on `writer`. Runs until
/// the peer closes the connection, a read fails, a message cannot be
/// parsed, or `running` is cleared. Returns the reason for exiting.
pub(crate) fn read_loop(
    stream: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    responses: Sender<RtspResponse>,
    handler: SharedHandler,
    rtp_channel: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
) -> &'static str {
    let mut reader = BufReader::new(stream);
    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            break "client closing";
        }
        match read_message(&mut reader) {
            Ok(Some(Message::Response(response))) => {
                tracing::debug!(
                    status = response.status_code,
                    cseq = ?response.cseq(),
                    "response"
                );
                if responses.send(response).is_err() {
                    break "client dropped";
                }
            }
            Ok(Some(Message::Request(request))) => {
                tracing::debug!(method = %request.method, cseq = ?request.cseq(), "server request");
                if let Err(e) = reply(&writer, &request) {
                    tracing::debug!(error = %e, "failed to answer server request");
                }
            }
            Ok(Some(Message::Interleaved { channel, data })) => {
                if channel == rtp_channel.load(Ordering::Relaxed) {
                    dispatch(&handler, &data);
                } else {
                    tracing::trace!(channel, len = data.len(), "ignoring interleaved frame");
                }
            }
            Ok(None) => break "connection closed by server",
            Err(CameraError::Parse { kind }) => {
                tracing::warn!(error = %kind, "unparseable message from server");
                break "protocol error";
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::debug!(error = %e, "RTSP read failed");
                }
                break "read error";
            }
        }
    };
    running.store(false, Ordering::SeqCst);
    reason
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_response_with_body() {
        let raw = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let mut reader = Cursor::new(&raw[..]);
        match read_message(&mut reader).unwrap() {
            Some(Message::Response(r)) => {
                assert_eq!(r.cseq(), Some(2));
                assert_eq!(r.body.as_deref(), Some("v=0\r\n"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn demultiplexes_interleaved_frames() {
        let mut raw = vec![b'$', 0, 0, 3, 0xAA, 0xBB, 0xCC];
        raw.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n");
        raw.extend_from_slice(&[b'$', 1, 0, 1, 0xDD]);
        let mut reader = Cursor::new(raw);

        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Interleaved { channel: 0, ref data }) if data == &[0xAA, 0xBB, 0xCC]
        ));
        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Response(ref r)) if r.cseq() == Some(5)
        ));
        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Interleaved { channel: 1, .. })
        ));
    }

    #[test]
    fn skips_blank_lines_between_messages() {
        let mut reader = Cursor::new(&b"\r\nRTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n"[..]);
        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Response(ref r)) if r.status_code == 200
        ));
    }

    #[test]
    fn server_request_body_is_consumed() {
        let mut raw = b"ANNOUNCE rtsp://cam/live RTSP/1.0\r\nCSeq: 4\r\nContent-Length: 10\r\n\r\n".to_vec();
        raw.extend_from_slice(b"RTSP/1.0 0");
        raw.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 6\r\n\r\n");
        let mut reader = Cursor::new(raw);

        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Request(ref r)) if r.method == "ANNOUNCE" && r.cseq() == Some("4")
        ));
        assert!(matches!(
            read_message(&mut reader).unwrap(),
            Some(Message::Response(ref r)) if r.cseq() == Some(6)
        ));
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn garbage_head_is_a_parse_error() {
        let mut reader = Cursor::new(&b"HELLO\r\n\r\n"[..]);
        assert!(matches!(
            read_message(&mut reader),
            Err(CameraError::Parse { .. })
        ));
    }

    /// Runs `read_loop` against a loopback socket; returns the server end,
    /// the response receiver and the loop's join handle.
    fn spawn_loop() -> (
        TcpStream,
        crossbeam_channel::Receiver<RtspResponse>,
        std::thread::JoinHandle<&'static str>,
    ) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let writer = Arc::new(Mutex::new(client.try_clone().unwrap()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let handler: SharedHandler = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let handle = std::thread::spawn(move || {
            read_loop(client, writer, tx, handler, Arc::new(AtomicU8::new(0)), running)
        });
        (server, rx, handle)
    }

    #[test]
    fn answers_server_requests_and_keeps_reading() {
        let (mut server, responses, handle) = spawn_loop();
        server
            .write_all(
                b"SET_PARAMETER rtsp://cam/live RTSP/1.0\r\nCSeq: 11\r\nContent-Length: 8\r\n\r\nfoo: 1\r\n\
                  GET_PARAMETER rtsp://cam/live RTSP/1.0\r\nCSeq: 12\r\n\r\n\
                  RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n",
            )
            .unwrap();

        let response = responses
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap();
        assert_eq!(response.cseq(), Some(3));

        let mut replies = BufReader::new(server.try_clone().unwrap());
        let first = read_message(&mut replies).unwrap();
        assert!(matches!(
            first,
            Some(Message::Response(ref r)) if r.status_code == 501 && r.cseq() == Some(11)
        ));
        let second = read_message(&mut replies).unwrap();
        assert!(matches!(
            second,
            Some(Message::Response(ref r)) if r.status_code == 200 && r.cseq() == Some(12)
        ));

        server.shutdown(std::net::Shutdown::Both).unwrap();
        assert_eq!(handle.join().unwrap(), "connection closed by server");
    }

    #[test]
    fn unparseable_head_ends_the_loop() {
        let (mut server, responses, handle) = spawn_loop();
        server.write_all(b"HELLO\r\n\r\n").unwrap();
        assert_eq!(handle.join().unwrap(), "protocol error");
        assert!(responses.try_recv().is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut reader = Cursor::new(vec![b'$', 0, 0, 10, 0xAA]);
        assert!(read_message(&mut reader).is_err());
    }
}
