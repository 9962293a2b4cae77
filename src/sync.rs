//! A/V synchronization policy, grounded in
//! `original_source/codethread.cpp::synchronizeFrames` / the video-frame
//! encode path's drift calculation, with the wall-clock anchor the original
//! mixed in deliberately dropped: the anchor is the encoder's own monotonic
//! counter (video) and resampler sample cursor (audio).

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub const SYNC_THRESHOLD_MS: i64 = 25;
pub const SYNC_MAX_WAIT_MS: i64 = 1000;
pub const SYNC_WAIT_CAP_MS: i64 = 20;
pub const WARMUP_TIMEOUT: Duration = Duration::from_secs(1);

/// First-frame PTS of each modality, as observed by the controller. Once both
/// are set the "synchronized" flag latches true until shutdown.
#[derive(Default)]
pub struct SyncAnchor {
    first_audio_pts: Option<i64>,
    first_video_pts: Option<i64>,
    warmup_started: Option<Instant>,
    warmup_expired: bool,
}

impl SyncAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_first_video_pts(&mut self, pts: i64) {
        self.first_video_pts.get_or_insert(pts);
    }

    pub fn note_first_audio_pts(&mut self, pts: i64) {
        self.first_audio_pts.get_or_insert(pts);
    }

    pub fn is_synchronized(&self) -> bool {
        self.first_audio_pts.is_some() && self.first_video_pts.is_some()
    }

    /// Warm-up drop: until both anchors are set, the video encoder discards
    /// incoming frames, up to a 1s timeout after which it proceeds unsynced.
    pub fn warming_up(&mut self) -> bool {
        if self.is_synchronized() || self.warmup_expired {
            return false;
        }
        let started = *self.warmup_started.get_or_insert_with(Instant::now);
        if started.elapsed() >= WARMUP_TIMEOUT {
            self.warmup_expired = true;
            false
        } else {
            true
        }
    }

    pub fn first_video_pts(&self) -> Option<i64> {
        self.first_video_pts
    }

    pub fn first_audio_pts(&self) -> Option<i64> {
        self.first_audio_pts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Encode the frame normally.
    Proceed,
    /// Wait on the audio-packet condition variable for up to this long, then
    /// re-evaluate.
    Wait(Duration),
    /// Drop the video frame; it is never buffered.
    Drop,
}

/// Pure decision function over the drift table:
///
/// | drift | action |
/// |---|---|
/// | `\|drift\| <= 25ms` | proceed |
/// | `25ms < drift <= 1000ms` (video ahead) | wait `min(drift, 20ms)` |
/// | `drift > 1000ms` (video ahead) | drop |
/// | `drift < -25ms` (video behind) | drop |
pub fn decide(drift_us: i64) -> SyncDecision {
    let drift_ms = drift_us / 1000;
    if drift_ms.abs() <= SYNC_THRESHOLD_MS {
        SyncDecision::Proceed
    } else if drift_ms > SYNC_MAX_WAIT_MS {
        SyncDecision::Drop
    } else if drift_ms > SYNC_THRESHOLD_MS {
        let wait_ms = drift_ms.min(SYNC_WAIT_CAP_MS);
        SyncDecision::Wait(Duration::from_millis(wait_ms.max(0) as u64))
    } else {
        // drift_ms < -SYNC_THRESHOLD_MS: video behind audio.
        SyncDecision::Drop
    }
}

/// `video_us - audio_us`, both rescaled from their native time-bases to
/// microseconds relative to their respective anchors.
pub fn drift_us(
    video_pts: i64,
    first_video_pts: i64,
    fps: i32,
    audio_pts: i64,
    first_audio_pts: i64,
    sample_rate: i32,
) -> i64 {
    let video_us = rescale_to_us(video_pts - first_video_pts, 1, fps as i64);
    let audio_us = rescale_to_us(audio_pts - first_audio_pts, 1, sample_rate as i64);
    video_us - audio_us
}

fn rescale_to_us(value: i64, num: i64, den: i64) -> i64 {
    // value * (num / den) seconds, in microseconds: value * num * 1_000_000 / den
    (value as i128 * num as i128 * 1_000_000 / den as i128) as i64
}

/// Shared drift state between the video encoder (C3) and audio encoder (C4),
/// owned by the controller and handed to both as an `Arc`. The video encoder
/// is the only consumer of `evaluate`/`wait_for_audio`; the audio encoder
/// only ever calls `note_audio_progress`.
pub struct SyncCoordinator {
    anchor: Mutex<SyncAnchor>,
    latest_audio_samples: Mutex<i64>,
    cond: Condvar,
    sample_rate: i32,
    fps: i32,
}

impl SyncCoordinator {
    pub fn new(sample_rate: i32, fps: i32) -> Self {
        Self {
            anchor: Mutex::new(SyncAnchor::new()),
            latest_audio_samples: Mutex::new(0),
            cond: Condvar::new(),
            sample_rate,
            fps,
        }
    }

    /// The video encoder's PTS counter starts at 0 and is monotonic, so this
    /// only ever needs calling once, before the encode loop begins.
    pub fn note_video_start(&self) {
        self.anchor.lock().unwrap().note_first_video_pts(0);
    }

    /// Called by the audio encoder after every frame it emits: latches the
    /// anchor on the first call and wakes any video-encoder waiter.
    pub fn note_audio_progress(&self, first_sample_pts: i64, samples_emitted_so_far: i64) {
        self.anchor.lock().unwrap().note_first_audio_pts(first_sample_pts);
        *self.latest_audio_samples.lock().unwrap() = samples_emitted_so_far;
        self.cond.notify_all();
    }

    /// Whether the video encoder should proceed, wait, or drop the frame
    /// about to be encoded with PTS `video_pts`. Returns `Drop`
    /// unconditionally during warm-up.
    pub fn evaluate(&self, video_pts: i64) -> SyncDecision {
        let mut anchor = self.anchor.lock().unwrap();
        if anchor.warming_up() {
            return SyncDecision::Drop;
        }
        let (Some(first_video), Some(first_audio)) =
            (anchor.first_video_pts(), anchor.first_audio_pts())
        else {
            return SyncDecision::Proceed;
        };
        drop(anchor);
        let audio_pts = *self.latest_audio_samples.lock().unwrap();
        let drift = drift_us(video_pts, first_video, self.fps, audio_pts, first_audio, self.sample_rate);
        decide(drift)
    }

    /// Blocks the calling (video encoder) thread on new audio progress for up
    /// to `timeout`, used to implement `SyncDecision::Wait`.
    pub fn wait_for_audio(&self, timeout: Duration) {
        let guard = self.latest_audio_samples.lock().unwrap();
        let _ = self.cond.wait_timeout(guard, timeout).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_threshold_proceeds() {
        assert_eq!(decide(24_000), SyncDecision::Proceed);
        assert_eq!(decide(-24_000), SyncDecision::Proceed);
        assert_eq!(decide(0), SyncDecision::Proceed);
    }

    #[test]
    fn video_ahead_moderately_waits_capped_at_20ms() {
        assert_eq!(decide(30_000), SyncDecision::Wait(Duration::from_millis(20)));
        assert_eq!(decide(500_000), SyncDecision::Wait(Duration::from_millis(20)));
    }

    #[test]
    fn video_ahead_past_one_second_drops() {
        assert_eq!(decide(1_001_000), SyncDecision::Drop);
        assert_eq!(decide(1_500_000), SyncDecision::Drop);
    }

    #[test]
    fn video_behind_drops() {
        assert_eq!(decide(-26_000), SyncDecision::Drop);
        assert_eq!(decide(-500_000), SyncDecision::Drop);
    }

    #[test]
    fn anchor_latches_once_both_modalities_seen() {
        let mut anchor = SyncAnchor::new();
        assert!(!anchor.is_synchronized());
        anchor.note_first_video_pts(0);
        assert!(!anchor.is_synchronized());
        anchor.note_first_audio_pts(0);
        assert!(anchor.is_synchronized());
        // Later calls don't move the anchor.
        anchor.note_first_video_pts(42);
        assert_eq!(anchor.first_video_pts(), Some(0));
    }

    #[test]
    fn drift_us_matches_rescale_of_pts_deltas() {
        // 30 video frames in at 30fps = 1s; 44100 audio samples at 44100Hz = 1s.
        let drift = drift_us(30, 0, 30, 44_100, 0, 44_100);
        assert_eq!(drift, 0);
    }
}
