//! Headless viewer
//!
//! Run with: cargo run --example viewer [URL]
//!
//! Examples:
//!   cargo run --example viewer                                 # ws://127.0.0.1:8080/media
//!   cargo run --example viewer ws://192.168.1.20:8080/media
//!
//! Logs connection events and prints frame statistics every five seconds.
//! Audio is pulled from the jitter buffer at the output rate and discarded.

use std::time::Duration;

use mediacast::client::ConnectionEvent;
use mediacast::{ClientConfig, Viewer, ViewerEvent};
use tracing_subscriber::EnvFilter;

/// Samples per output callback at 44.1 kHz
const OUTPUT_BLOCK: usize = 2048;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mediacast=debug".parse()?))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/media".to_string());

    let config = ClientConfig::new(url).screen_size(1280, 720);
    let (viewer, mut events) = Viewer::new(config)?;
    let handle = viewer.spawn();
    handle.connect();

    // Stand-in for an audio output device
    let playback = handle.playback();
    let audio = tokio::spawn(async move {
        let mut out = vec![0.0f32; OUTPUT_BLOCK];
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(
            OUTPUT_BLOCK as f64 / 44_100.0,
        ));
        loop {
            ticker.tick().await;
            playback.pull_into(&mut out);
        }
    });

    let mut report = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ViewerEvent::Connection(ConnectionEvent::Metadata(metadata))) => {
                        println!(
                            "Stream: {}x{} @ {} fps, audio {} Hz {} ch {} (id {})",
                            metadata.video_width,
                            metadata.video_height,
                            metadata.video_fps,
                            metadata.audio_sample_rate,
                            metadata.audio_channels,
                            metadata.audio_format,
                            metadata.client_id,
                        );
                    }
                    Some(ViewerEvent::Connection(ConnectionEvent::ReconnectExhausted { attempts })) => {
                        println!("Gave up after {} attempts", attempts);
                        break;
                    }
                    Some(ViewerEvent::Connection(event)) => println!("Event: {:?}", event),
                    Some(ViewerEvent::Video(jpeg)) => {
                        tracing::trace!(size = jpeg.len(), "Video frame");
                    }
                    None => break,
                }
            }
            _ = report.tick() => {
                let stats = handle.stats();
                println!(
                    "Stats: video={} dropped={} ({:.0}%) audio={} audio_dropped={} errors={}",
                    stats.video_frames,
                    stats.dropped_video_frames,
                    stats.video_drop_ratio() * 100.0,
                    stats.audio_frames,
                    stats.dropped_audio_blocks,
                    stats.errors,
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    audio.abort();
    handle.shutdown().await;
    Ok(())
}
