use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{bounded, select, tick};
use rtsp_camera::{CameraConfig, DecoderFactory, RtspCamera, TransportMode};

#[derive(Parser)]
#[command(
    name = "rtsp-camera",
    about = "Pull an H.264/H.265 RTSP stream, decode frames and optionally pass RTP through"
)]
struct Args {
    /// Stream address, rtsp://[user:pass@]host[:port]/path
    url: String,

    /// Re-packetize H.264 for passthrough and count the packets
    #[arg(long)]
    passthrough: bool,

    /// RTP transport (tcp = interleaved on the RTSP connection)
    #[arg(long, default_value_t = TransportMode::Tcp)]
    transport: TransportMode,

    /// Write the latest frame as PNG on exit
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,
}

#[cfg(feature = "ffmpeg")]
fn decoders() -> rtsp_camera::Result<Arc<dyn DecoderFactory>> {
    Ok(Arc::new(rtsp_camera::FfmpegDecoderFactory::new()?))
}

#[cfg(not(feature = "ffmpeg"))]
fn decoders() -> rtsp_camera::Result<Arc<dyn DecoderFactory>> {
    tracing::warn!("built without the ffmpeg feature, frames will not be decoded");
    Ok(Arc::new(rtsp_camera::NullDecoderFactory))
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = CameraConfig {
        address: args.url.clone(),
        rtp_passthrough: args.passthrough,
        transport: args.transport,
        ..Default::default()
    };

    let camera = match decoders().and_then(|d| RtspCamera::new(config, d)) {
        Ok(camera) => Arc::new(camera),
        Err(e) => {
            eprintln!("Failed to open camera: {}", e);
            return;
        }
    };

    let packets = Arc::new(AtomicU64::new(0));
    if args.passthrough {
        let counter = Arc::clone(&packets);
        let subscribed = camera.subscribe_rtp(
            256,
            Box::new(move |batch| {
                counter.fetch_add(batch.len() as u64, Ordering::Relaxed);
                Ok(())
            }),
        );
        if let Err(e) = subscribed {
            eprintln!("Failed to subscribe: {}", e);
        }
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    let reporter = {
        let camera = Arc::clone(&camera);
        let packets = Arc::clone(&packets);
        thread::spawn(move || {
            let ticker = tick(Duration::from_secs(1));
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => match camera.latest_frame() {
                        Ok(frame) => tracing::info!(
                            width = frame.width(),
                            height = frame.height(),
                            passthrough_packets = packets.load(Ordering::Relaxed),
                            "frame available"
                        ),
                        Err(e) => tracing::info!(
                            status = %e,
                            passthrough_packets = packets.load(Ordering::Relaxed),
                            "waiting for frames"
                        ),
                    },
                }
            }
        })
    };

    println!("Streaming from {}, press Enter to stop", args.url);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    drop(stop_tx);
    let _ = reporter.join();

    if let Some(path) = &args.snapshot {
        match camera.latest_frame() {
            Ok(frame) => match frame.save(path) {
                Ok(()) => println!("Saved {}", path.display()),
                Err(e) => eprintln!("Failed to write {}: {}", path.display(), e),
            },
            Err(e) => eprintln!("No snapshot written: {}", e),
        }
    }

    camera.close();
}
