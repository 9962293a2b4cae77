//! Data model shared by every pipeline stage.

use ffmpeg_next as ffmpeg;

/// A decoded image, still owned by whichever stage currently holds it.
///
/// Ownership moves from capture to the video encoder on dequeue; it is never
/// shared between threads.
pub struct RawVideoFrame {
    pub frame: ffmpeg::util::frame::video::Video,
    /// Capture-side timestamp, informational only — the encoder assigns the
    /// authoritative PTS from its own monotonic counter.
    pub captured_at: std::time::Instant,
}

/// A contiguous run of signed 16-bit little-endian PCM, reference-counted so
/// capture → encode delivery is zero-copy.
#[derive(Clone)]
pub struct RawAudioBuffer {
    pub data: bytes::Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Which output stream a packet belongs to. Video is always index 0, audio
/// index 1, by the output context's registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn stream_index(self) -> usize {
        match self {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
        }
    }
}

/// An encoded packet in flight between an encoder stage and the muxer.
///
/// `time_base` is the encoder's own time base (`1/fps` for video, `1/sample_rate`
/// for audio) at the moment the packet was produced; the muxer rescales into
/// the live output stream's time base immediately before writing, since it is
/// the only stage that touches the output context.
pub struct CompressedPacket {
    pub packet: ffmpeg::Packet,
    pub kind: StreamKind,
    pub time_base: ffmpeg::Rational,
}

/// Process-wide pipeline state. Monotonic except for the explicit
/// idle -> initializing -> running -> stopping -> idle cycle, and
/// any-state -> failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Failed,
}

/// Distinct from `PipelineState`: tracks the push-controller's own view
/// used for GUI state-change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    None,
    Decoding,
    Playing,
    Paused,
    Error,
    Ended,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::None => "none",
            ControllerState::Decoding => "decoding",
            ControllerState::Playing => "playing",
            ControllerState::Paused => "paused",
            ControllerState::Error => "error",
            ControllerState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Throughput statistics surfaced to the GUI.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub frames_written: u64,
    pub effective_bitrate_bps: u64,
}
