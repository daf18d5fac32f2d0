//! Viewer-side frame consumer
//!
//! Turns decoded binary messages into display and playback input:
//! - video: at most one frame per `min_video_interval`, latest wins
//! - audio: PCM16 blocks into the jitter buffer, pulled by the output device
//!
//! The audio output may start suspended (platforms that require a user
//! gesture). A resume is then requested once and applied on the next gesture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::media::{pcm, FrameKind};
use crate::protocol::frame;
use crate::stats::ViewerStats;

use super::config::ClientConfig;
use super::jitter::JitterBuffer;

/// Audio output state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    /// Output not created yet
    Uninitialized,
    /// Output created but waiting for a user gesture
    Suspended,
    /// Output playing
    Running,
}

/// Handle used by the audio output callback
///
/// Only ever reads the already-populated jitter buffer.
#[derive(Debug, Clone)]
pub struct AudioPlayback {
    buffer: Arc<Mutex<JitterBuffer>>,
    enabled: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Fill one output cycle; silence when nothing is buffered or audio is off
    ///
    /// Returns true if buffered audio was played.
    pub fn pull_into(&self, out: &mut [f32]) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            out.fill(0.0);
            return false;
        }
        lock(&self.buffer).pull_into(out)
    }

    /// Blocks waiting to be played
    pub fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }
}

/// What a binary message produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// Replace the displayed image
    Display(Bytes),
    /// Video frame dropped by the rate limit
    VideoDropped,
    /// Audio block buffered
    Audio,
    /// Audio ignored (audio disabled)
    AudioMuted,
}

/// Rate limiting, jitter buffering and audio output state for one viewer
#[derive(Debug)]
pub struct FrameConsumer {
    min_video_interval: Duration,
    max_frame_size: usize,
    last_video: Option<Instant>,

    playback: AudioPlayback,
    audio: AudioState,
    audio_requires_gesture: bool,
    resume_pending: bool,

    stats: ViewerStats,
}

impl FrameConsumer {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            min_video_interval: config.min_video_interval,
            max_frame_size: config.max_frame_size,
            last_video: None,
            playback: AudioPlayback {
                buffer: Arc::new(Mutex::new(JitterBuffer::with_capacity(config.jitter_capacity))),
                enabled: Arc::new(AtomicBool::new(true)),
            },
            audio: AudioState::Uninitialized,
            audio_requires_gesture: config.audio_requires_gesture,
            resume_pending: false,
            stats: ViewerStats::new(),
        }
    }

    /// Decode and consume one binary message
    ///
    /// Malformed messages are counted and returned as errors; the connection
    /// is unaffected.
    pub fn on_binary(&mut self, data: Bytes, now: Instant) -> Result<Consumed, ProtocolError> {
        let wire = match frame::decode(data, self.max_frame_size) {
            Ok(wire) => wire,
            Err(e) => {
                self.stats.errors += 1;
                return Err(e);
            }
        };

        match wire.kind {
            FrameKind::Video => Ok(self.on_video(wire.payload, now)),
            FrameKind::Audio => {
                let result = self.on_audio(&wire.payload, now);
                if result.is_err() {
                    self.record_error();
                }
                result
            }
        }
    }

    /// Rate-limit one video frame
    pub fn on_video(&mut self, payload: Bytes, now: Instant) -> Consumed {
        if let Some(last) = self.last_video {
            if now.saturating_duration_since(last) < self.min_video_interval {
                self.stats.dropped_video_frames += 1;
                return Consumed::VideoDropped;
            }
        }

        self.last_video = Some(now);
        self.stats.video_frames += 1;
        self.stats.last_video_at = Some(now);
        Consumed::Display(payload)
    }

    /// Buffer one PCM16 block
    pub fn on_audio(&mut self, payload: &[u8], now: Instant) -> Result<Consumed, ProtocolError> {
        if !self.audio_enabled() {
            return Ok(Consumed::AudioMuted);
        }

        let samples = pcm::decode_samples(payload)?;
        let dropped = lock(&self.playback.buffer).push(samples);

        self.stats.audio_frames += 1;
        self.stats.dropped_audio_blocks += dropped as u64;
        self.stats.last_audio_at = Some(now);

        if self.audio == AudioState::Suspended && !self.resume_pending {
            tracing::debug!("Audio suspended, resume on next user gesture");
            self.resume_pending = true;
        }

        Ok(Consumed::Audio)
    }

    /// Create the audio output if needed (idempotent)
    pub fn init_audio(&mut self) {
        if self.audio != AudioState::Uninitialized {
            return;
        }

        if self.audio_requires_gesture {
            self.audio = AudioState::Suspended;
            self.resume_pending = true;
            tracing::info!("Audio output suspended until user gesture");
        } else {
            self.audio = AudioState::Running;
            tracing::info!("Audio output running");
        }
    }

    /// A user gesture happened; resumes suspended audio
    ///
    /// Returns true if audio was resumed.
    pub fn on_user_gesture(&mut self) -> bool {
        if self.audio != AudioState::Suspended {
            return false;
        }

        self.audio = AudioState::Running;
        self.resume_pending = false;
        tracing::info!("Audio output resumed");
        true
    }

    /// Turn audio on or off; turning it off empties the jitter buffer
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.playback.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            lock(&self.playback.buffer).clear();
        }
        tracing::debug!(enabled, "Audio toggled");
    }

    pub fn audio_enabled(&self) -> bool {
        self.playback.enabled.load(Ordering::Relaxed)
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio
    }

    /// Whether a resume is waiting for a user gesture
    pub fn resume_pending(&self) -> bool {
        self.resume_pending
    }

    /// Handle for the audio output callback
    pub fn playback(&self) -> AudioPlayback {
        self.playback.clone()
    }

    /// Count a message that could not be handled
    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    /// Count an event the receiver had no room for
    pub fn record_dropped_event(&mut self) {
        self.stats.dropped_events += 1;
    }

    pub fn stats(&self) -> &ViewerStats {
        &self.stats
    }
}

fn lock(buffer: &Mutex<JitterBuffer>) -> MutexGuard<'_, JitterBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFrame;

    fn consumer() -> FrameConsumer {
        FrameConsumer::new(&ClientConfig::default())
    }

    fn wire(frame: MediaFrame) -> Bytes {
        frame::encode(&frame, usize::MAX).unwrap()
    }

    #[test]
    fn test_video_rate_limit() {
        let mut c = consumer();
        let t0 = Instant::now();
        let jpeg = Bytes::from_static(b"\xff\xd8jpeg");

        assert!(matches!(c.on_video(jpeg.clone(), t0), Consumed::Display(_)));
        assert_eq!(
            c.on_video(jpeg.clone(), t0 + Duration::from_millis(10)),
            Consumed::VideoDropped
        );
        assert!(matches!(
            c.on_video(jpeg, t0 + Duration::from_millis(40)),
            Consumed::Display(_)
        ));

        assert_eq!(c.stats().video_frames, 2);
        assert_eq!(c.stats().dropped_video_frames, 1);
    }

    #[test]
    fn test_video_two_frames_apart() {
        let t0 = Instant::now();
        let jpeg = Bytes::from_static(b"frame");

        let mut close = consumer();
        close.on_video(jpeg.clone(), t0);
        close.on_video(jpeg.clone(), t0 + Duration::from_millis(10));
        assert_eq!(close.stats().video_frames, 1);

        let mut apart = consumer();
        apart.on_video(jpeg.clone(), t0);
        apart.on_video(jpeg, t0 + Duration::from_millis(40));
        assert_eq!(apart.stats().video_frames, 2);
    }

    #[test]
    fn test_binary_dispatch() {
        let mut c = consumer();
        let now = Instant::now();

        let video = wire(MediaFrame::video(0, Bytes::from_static(&[1, 2, 3])));
        assert_eq!(
            c.on_binary(video, now).unwrap(),
            Consumed::Display(Bytes::from_static(&[1, 2, 3]))
        );

        let audio = wire(MediaFrame::audio(0, pcm::encode_samples(&[100, -100])));
        assert_eq!(c.on_binary(audio, now).unwrap(), Consumed::Audio);
        assert_eq!(c.playback().buffered(), 1);
    }

    #[test]
    fn test_malformed_binary_counted() {
        let mut c = consumer();
        let now = Instant::now();

        assert!(c.on_binary(Bytes::from_static(&[0, 0, 0, 0]), now).is_err());
        assert!(c
            .on_binary(Bytes::from_static(&[1, 0, 0, 0, 3, 1, 2, 3]), now)
            .is_err());
        assert_eq!(c.stats().errors, 2);
        assert_eq!(c.stats().audio_frames, 0);
    }

    #[test]
    fn test_jitter_overflow_counted() {
        let mut c = consumer();
        let now = Instant::now();
        for i in 0..6 {
            c.on_audio(&pcm::encode_samples(&[i]), now).unwrap();
        }

        assert_eq!(c.playback().buffered(), 5);
        assert_eq!(c.stats().dropped_audio_blocks, 1);
    }

    #[test]
    fn test_playback_pull() {
        let mut c = consumer();
        c.on_audio(&pcm::encode_samples(&[16384]), Instant::now())
            .unwrap();

        let playback = c.playback();
        let mut out = [0.0f32; 2];
        assert!(playback.pull_into(&mut out));
        assert_eq!(out, [0.5, 0.0]);

        out = [1.0; 2];
        assert!(!playback.pull_into(&mut out));
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_audio_toggle() {
        let mut c = consumer();
        let now = Instant::now();
        c.on_audio(&pcm::encode_samples(&[1, 2]), now).unwrap();

        c.set_audio_enabled(false);
        assert_eq!(c.playback().buffered(), 0);
        assert_eq!(
            c.on_audio(&pcm::encode_samples(&[3]), now).unwrap(),
            Consumed::AudioMuted
        );
        assert_eq!(c.playback().buffered(), 0);

        c.set_audio_enabled(true);
        c.on_audio(&pcm::encode_samples(&[3]), now).unwrap();
        assert_eq!(c.playback().buffered(), 1);
    }

    #[test]
    fn test_gesture_resume() {
        let config = ClientConfig::default().audio_requires_gesture(true);
        let mut c = FrameConsumer::new(&config);
        assert!(!c.on_user_gesture());

        c.init_audio();
        c.init_audio();
        assert_eq!(c.audio_state(), AudioState::Suspended);
        assert!(c.resume_pending());

        c.on_audio(&pcm::encode_samples(&[1]), Instant::now())
            .unwrap();
        assert!(c.resume_pending());

        assert!(c.on_user_gesture());
        assert_eq!(c.audio_state(), AudioState::Running);
        assert!(!c.resume_pending());
        assert!(!c.on_user_gesture());
    }

    #[test]
    fn test_init_audio_without_gesture() {
        let mut c = consumer();
        c.init_audio();
        assert_eq!(c.audio_state(), AudioState::Running);
        assert!(!c.resume_pending());
    }
}
