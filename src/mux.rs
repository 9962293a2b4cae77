//! C5: Muxer/Pusher.
//!
//! Rescales each packet from its encoder's time base into the live output
//! stream's time base, then writes it interleaved; runs on its own thread as
//! the sole owner of the output context's write half.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg::format;

use crate::capture::RunFlag;
use crate::error::PipelineError;
use crate::queue::{BoundedQueue, UnboundedQueue};
use crate::types::{CompressedPacket, StreamKind};

/// Idle sleep when both input queues are empty but the muxer hasn't been
/// told to stop yet — keeps CPU usage near zero without adding noticeable
/// latency.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSource {
    Video,
    Audio,
}

/// Pure interleaving decision: given the head packet's timestamp (in
/// microseconds, already rescaled) of each queue, which one should be
/// written next. Ties favor video so a simultaneous keyframe/audio-frame
/// pair keeps the video sample leading.
pub fn order_next(video_head_us: Option<i64>, audio_head_us: Option<i64>) -> Option<NextSource> {
    match (video_head_us, audio_head_us) {
        (None, None) => None,
        (Some(_), None) => Some(NextSource::Video),
        (None, Some(_)) => Some(NextSource::Audio),
        (Some(v), Some(a)) => {
            if v <= a {
                Some(NextSource::Video)
            } else {
                Some(NextSource::Audio)
            }
        }
    }
}

fn packet_head_us(packet: &CompressedPacket) -> i64 {
    let pts = packet.packet.pts().or_else(|| packet.packet.dts()).unwrap_or(0);
    let tb = packet.time_base;
    (pts as i128 * tb.numerator() as i128 * 1_000_000 / tb.denominator() as i128) as i64
}

pub struct Muxer {
    octx: format::context::Output,
}

impl Muxer {
    pub fn new(octx: format::context::Output) -> Self {
        Self { octx }
    }

    pub fn write_header(&mut self) -> Result<(), PipelineError> {
        self.octx
            .write_header()
            .map_err(|e| PipelineError::Protocol(format!("write_header: {e}")))
    }

    pub fn write_trailer(&mut self) -> Result<(), PipelineError> {
        self.octx
            .write_trailer()
            .map_err(|e| PipelineError::Protocol(format!("write_trailer: {e}")))
    }

    fn write_one(&mut self, mut compressed: CompressedPacket, errors: &Sender<PipelineError>) {
        let stream_index = compressed.kind.stream_index();
        let dst_tb = self.octx.stream(stream_index).expect("stream registered at init").time_base();
        compressed.packet.rescale_ts(compressed.time_base, dst_tb);
        if let Err(e) = compressed.packet.write_interleaved(&mut self.octx) {
            let _ = errors.send(PipelineError::Network(format!(
                "write_interleaved ({:?}): {e}",
                compressed.kind
            )));
        }
    }

    /// Runs until `run_flag` is cleared and both queues have drained — the
    /// controller clears the flag only after C3/C4 have been flushed, so
    /// "queues empty" at that point means every encoded packet made it out.
    pub fn run(
        &mut self,
        run_flag: RunFlag,
        video_queue: Arc<BoundedQueue<CompressedPacket>>,
        audio_queue: Arc<UnboundedQueue<CompressedPacket>>,
        errors: Sender<PipelineError>,
    ) {
        loop {
            let still_running = run_flag.is_running();
            let video_head = video_queue.peek_is_some(packet_head_us);
            let audio_head = audio_queue.peek_is_some(packet_head_us);

            match order_next(video_head, audio_head) {
                Some(NextSource::Video) => {
                    if let Some(p) = video_queue.try_pop() {
                        self.write_one(p, &errors);
                    }
                }
                Some(NextSource::Audio) => {
                    if let Some(p) = audio_queue.try_pop() {
                        self.write_one(p, &errors);
                    }
                }
                None => {
                    if !still_running {
                        break;
                    }
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_empty_yields_none() {
        assert_eq!(order_next(None, None), None);
    }

    #[test]
    fn only_video_available() {
        assert_eq!(order_next(Some(100), None), Some(NextSource::Video));
    }

    #[test]
    fn only_audio_available() {
        assert_eq!(order_next(None, Some(100)), Some(NextSource::Audio));
    }

    #[test]
    fn ties_favor_video() {
        assert_eq!(order_next(Some(500), Some(500)), Some(NextSource::Video));
    }

    #[test]
    fn earlier_timestamp_wins() {
        assert_eq!(order_next(Some(1000), Some(200)), Some(NextSource::Audio));
        assert_eq!(order_next(Some(200), Some(1000)), Some(NextSource::Video));
    }
}
