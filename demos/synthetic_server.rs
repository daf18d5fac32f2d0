//! Media server fed by a synthetic capture source
//!
//! Run with: cargo run --example synthetic_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example synthetic_server                  # binds to 0.0.0.0:8080
//!   cargo run --example synthetic_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Video frames are small JPEG-framed test patterns at 15 fps; audio is a
//! 440 Hz sine tone in 2048-sample PCM16 blocks. Capture only runs while at
//! least one viewer is connected.
//!
//! Watch it with: cargo run --example viewer ws://127.0.0.1:8080/media

use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use mediacast::media::{pcm, CaptureError, FrameSender};
use mediacast::protocol::unix_millis;
use mediacast::{CaptureControl, MediaFrame, MediaServer, ServerConfig};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const SAMPLE_RATE: u32 = 44_100;
const BLOCK_SAMPLES: usize = 2048;
const TONE_HZ: f32 = 440.0;

/// Capture source producing test frames while started
struct SyntheticCapture {
    frames: FrameSender,
    fps: u32,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCapture {
    fn new(frames: FrameSender, fps: u32) -> Self {
        Self {
            frames,
            fps: fps.max(1),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CaptureControl for SyntheticCapture {
    async fn start(&self) -> Result<(), CaptureError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| CaptureError::new("capture state poisoned"))?;
        if running.is_some() {
            return Ok(());
        }

        let frames = self.frames.clone();
        let video_period = Duration::from_secs(1) / self.fps;
        let audio_period =
            Duration::from_secs_f64(BLOCK_SAMPLES as f64 / SAMPLE_RATE as f64);

        *running = Some(tokio::spawn(async move {
            let mut video = tokio::time::interval(video_period);
            let mut audio = tokio::time::interval(audio_period);
            let mut frame_no: u32 = 0;
            let mut phase: f32 = 0.0;

            loop {
                tokio::select! {
                    _ = video.tick() => {
                        frames.push(MediaFrame::video(unix_millis(), test_pattern(frame_no)));
                        frame_no = frame_no.wrapping_add(1);
                    }
                    _ = audio.tick() => {
                        let block = sine_block(&mut phase);
                        frames.push(MediaFrame::audio(unix_millis(), pcm::encode_samples(&block)));
                    }
                }
            }
        }));

        tracing::info!(fps = self.fps, "Synthetic capture started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CaptureError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| CaptureError::new("capture state poisoned"))?;
        if let Some(task) = running.take() {
            task.abort();
            tracing::info!("Synthetic capture stopped");
        }
        Ok(())
    }
}

/// JPEG-framed payload (SOI, counter, filler, EOI)
fn test_pattern(frame_no: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);
    buf.put_slice(&[0xFF, 0xD8]);
    buf.put_u32(frame_no);
    for i in 0..1000u32 {
        buf.put_u8((i.wrapping_add(frame_no) & 0xFF) as u8);
    }
    buf.put_slice(&[0xFF, 0xD9]);
    buf.freeze()
}

fn sine_block(phase: &mut f32) -> Vec<i16> {
    let step = TAU * TONE_HZ / SAMPLE_RATE as f32;
    (0..BLOCK_SAMPLES)
        .map(|_| {
            let sample = (phase.sin() * 0.3 * i16::MAX as f32) as i16;
            *phase = (*phase + step) % TAU;
            sample
        })
        .collect()
}

fn parse_bind_addr(arg: Option<String>) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    match arg.as_deref() {
        None => Ok(SocketAddr::from(([0, 0, 0, 0], 8080))),
        Some("localhost") => Ok(SocketAddr::from(([127, 0, 0, 1], 8080))),
        Some(addr) => Ok(addr.parse()?),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mediacast=debug".parse()?))
        .init();

    let addr = parse_bind_addr(std::env::args().nth(1))?;
    let config = ServerConfig::with_addr(addr);
    let fps = config.stream.video_fps;

    let server = MediaServer::new(config);
    let capture = Arc::new(SyntheticCapture::new(server.frame_sender(), fps));
    let server = server.with_capture(capture);

    println!("Media server on ws://{}/media (status on /status)", addr);
    println!("Press Ctrl+C to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.stats().snapshot();
    println!(
        "Stats: viewers={} frames={} delivered={} evicted={} idle={}",
        stats.total_connections,
        stats.frames_broadcast,
        stats.frames_delivered,
        stats.send_evictions,
        stats.idle_evictions,
    );

    Ok(())
}
