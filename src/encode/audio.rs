//! C4: Audio Encoder.
//!
//! Grounded in `video/stream_puffer.rs::encode_to_mp4`'s AAC frame
//! accumulation: raw s16le PCM is normalized to interleaved f32, split into
//! planar channels once `frame_size` samples have accumulated, and encoded.
//! Audio is never dropped, so both queues either side of this stage are
//! unbounded.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, format, Rational};

use crate::capture::video::POLL_INTERVAL;
use crate::capture::RunFlag;
use crate::error::{PipelineError, Stage};
use crate::queue::UnboundedQueue;
use crate::sync::SyncCoordinator;
use crate::types::{CompressedPacket, RawAudioBuffer, StreamKind};

/// AAC at a fixed 64kbps, leaving most of the bitrate budget for video while
/// keeping audio quality acceptable for speech and desktop sound.
pub const AUDIO_BITRATE_BPS: usize = 64_000;

pub struct AudioEncoder {
    encoder: Option<ffmpeg::encoder::Audio>,
    stream_index: usize,
    time_base: Rational,
    channels: u16,
    frame_size: usize,
    sample_buffer: Vec<f32>,
    samples_emitted: i64,
}

impl AudioEncoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            stream_index: usize::MAX,
            time_base: Rational::new(1, 1),
            channels: 0,
            frame_size: 0,
            sample_buffer: Vec::new(),
            samples_emitted: 0,
        }
    }

    /// Adds the AAC audio stream to `octx` and opens the encoder. Must be
    /// called before `octx.write_header()`.
    pub fn initialize(
        &mut self,
        octx: &mut format::context::Output,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), PipelineError> {
        self.channels = channels;
        self.time_base = Rational::new(1, sample_rate as i32);

        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let codec = codec::encoder::find(codec::Id::AAC).ok_or_else(|| PipelineError::Codec {
            stage: Stage::AudioEncoder,
            message: "AAC encoder not available".to_string(),
        })?;

        let mut ost = octx.add_stream(codec).map_err(|e| PipelineError::Codec {
            stage: Stage::AudioEncoder,
            message: format!("adding audio stream: {e}"),
        })?;
        let stream_index = ost.index();

        let mut enc_ctx = codec::Context::new().encoder().audio().map_err(|e| PipelineError::Codec {
            stage: Stage::AudioEncoder,
            message: format!("creating audio encoder context: {e}"),
        })?;

        enc_ctx.set_rate(sample_rate as i32);
        enc_ctx.set_channel_layout(ffmpeg::ChannelLayout::default(channels as i32));
        // AAC requires planar float samples.
        enc_ctx.set_format(format::Sample::F32(format::sample::Type::Planar));
        enc_ctx.set_bit_rate(AUDIO_BITRATE_BPS);
        enc_ctx.set_time_base(self.time_base);

        if global_header {
            enc_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let opened = enc_ctx.open_as(codec).map_err(|e| PipelineError::Codec {
            stage: Stage::AudioEncoder,
            message: format!("opening AAC encoder: {e}"),
        })?;
        ost.set_parameters(&opened);

        self.frame_size = opened.frame_size() as usize;
        self.encoder = Some(opened);
        self.stream_index = stream_index;
        self.samples_emitted = 0;
        self.sample_buffer.clear();
        Ok(())
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn drain_packets(&mut self, out_queue: &UnboundedQueue<CompressedPacket>) {
        let stream_index = self.stream_index;
        let time_base = self.time_base;
        let encoder = match self.encoder.as_mut() {
            Some(e) => e,
            None => return,
        };
        let mut packet = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream_index);
            out_queue.push(CompressedPacket {
                packet: std::mem::replace(&mut packet, ffmpeg::Packet::empty()),
                kind: StreamKind::Audio,
                time_base,
            });
        }
    }

    /// Runs until `run_flag` is cleared: accumulates raw PCM into fixed-size
    /// AAC frames, encodes, enqueues for C5, and reports progress to `sync`
    /// so the video encoder's drift decisions have something to compare
    /// against.
    pub fn run(
        &mut self,
        run_flag: RunFlag,
        in_queue: Arc<UnboundedQueue<RawAudioBuffer>>,
        out_queue: Arc<UnboundedQueue<CompressedPacket>>,
        sync: Arc<SyncCoordinator>,
        errors: Sender<PipelineError>,
    ) {
        let channels = self.channels as usize;

        while run_flag.is_running() {
            let Some(buf) = in_queue.pop_timeout(POLL_INTERVAL) else {
                continue;
            };

            for chunk in buf.data.chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                self.sample_buffer.push(sample as f32 / 32_768.0);
            }

            while self.sample_buffer.len() >= self.frame_size * channels {
                let mut frame = ffmpeg::util::frame::audio::Audio::new(
                    format::Sample::F32(format::sample::Type::Planar),
                    self.frame_size,
                    ffmpeg::ChannelLayout::default(self.channels as i32),
                );
                for c in 0..channels {
                    let plane = frame.plane_mut::<f32>(c);
                    for i in 0..self.frame_size {
                        plane[i] = self.sample_buffer[i * channels + c];
                    }
                }
                self.sample_buffer.drain(0..self.frame_size * channels);

                frame.set_pts(Some(self.samples_emitted));

                let encoder = match self.encoder.as_mut() {
                    Some(e) => e,
                    None => return,
                };
                if let Err(e) = encoder.send_frame(&frame) {
                    let _ = errors.send(PipelineError::Codec {
                        stage: Stage::AudioEncoder,
                        message: format!("send_frame: {e}"),
                    });
                    continue;
                }
                self.drain_packets(&out_queue);

                self.samples_emitted += self.frame_size as i64;
                sync.note_audio_progress(0, self.samples_emitted);
            }
        }

        self.flush(&out_queue);
    }

    /// Sends EOF and drains any remaining buffered packets.
    pub fn flush(&mut self, out_queue: &UnboundedQueue<CompressedPacket>) {
        if let Some(encoder) = self.encoder.as_mut() {
            let _ = encoder.send_eof();
        }
        self.drain_packets(out_queue);
    }
}

impl Default for AudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}
