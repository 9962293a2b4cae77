//! Five error kinds with distinct surface behaviour.

use thiserror::Error;

/// Which stage a codec error was raised from, so the controller can key its
/// per-stage consecutive-failure counter correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    VideoCapture,
    AudioCapture,
    VideoEncoder,
    AudioEncoder,
    Muxer,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::VideoCapture => "video capture",
            Stage::AudioCapture => "audio capture",
            Stage::VideoEncoder => "video encoder",
            Stage::AudioEncoder => "audio encoder",
            Stage::Muxer => "muxer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing URL, unknown source — refuse to start.
    #[error("config: {0}")]
    Config(String),

    /// No capture device, format unsupported — refuse to start or stop mid-run.
    #[error("device ({stage}): {message}")]
    Device { stage: Stage, message: String },

    /// Encoder open failed, send/receive failure. Five consecutive failures
    /// on the same stage is fatal (enforced by `FailureCounter`, not here).
    #[error("codec ({stage}): {message}")]
    Codec { stage: Stage, message: String },

    /// write_frame < 0, avio_open failed, trailer write failed.
    #[error("network: {0}")]
    Network(String),

    /// Muxer header/trailer failure — immediately fatal.
    #[error("protocol: {0}")]
    Protocol(String),
}

impl PipelineError {
    /// Protocol and Config errors are fatal on first occurrence; Device is
    /// fatal for the stage that raised it; Codec/Network are fatal only
    /// through the controller's failure-counting policy.
    pub fn immediately_fatal(&self) -> bool {
        matches!(self, PipelineError::Protocol(_) | PipelineError::Config(_))
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Device { stage, .. } | PipelineError::Codec { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

/// Per-stage consecutive-failure counter: 5 consecutive codec failures on the
/// same stage is fatal.
#[derive(Default)]
pub struct FailureCounter {
    counts: std::collections::HashMap<Stage, u32>,
}

impl FailureCounter {
    pub const FATAL_THRESHOLD: u32 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `stage`, returning true if this failure makes the
    /// stage fatal (threshold reached).
    pub fn record_failure(&mut self, stage: Stage) -> bool {
        let count = self.counts.entry(stage).or_insert(0);
        *count += 1;
        *count >= Self::FATAL_THRESHOLD
    }

    /// A successful cycle resets the stage's consecutive-failure count.
    pub fn record_success(&mut self, stage: Stage) {
        self.counts.insert(stage, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_consecutive_failures_are_fatal() {
        let mut counter = FailureCounter::new();
        for _ in 0..4 {
            assert!(!counter.record_failure(Stage::VideoEncoder));
        }
        assert!(counter.record_failure(Stage::VideoEncoder));
    }

    #[test]
    fn success_resets_the_streak() {
        let mut counter = FailureCounter::new();
        for _ in 0..4 {
            counter.record_failure(Stage::AudioEncoder);
        }
        counter.record_success(Stage::AudioEncoder);
        for _ in 0..4 {
            assert!(!counter.record_failure(Stage::AudioEncoder));
        }
    }

    #[test]
    fn stages_are_counted_independently() {
        let mut counter = FailureCounter::new();
        for _ in 0..4 {
            counter.record_failure(Stage::VideoEncoder);
        }
        assert!(!counter.record_failure(Stage::AudioEncoder));
    }
}
