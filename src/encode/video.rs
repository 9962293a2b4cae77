//! C3: Video Encoder.
//!
//! Grounded in `video/stream_puffer.rs::encode_to_mp4`'s encoder setup (add
//! stream, build `codec::Context::new().encoder().video()`, `open_as`, copy
//! parameters back onto the stream) and `original_source/codethread.cpp`'s
//! H.264 CBR option dictionary (`preset=superfast`, `tune=zerolatency`,
//! `nal-hrd=cbr`, `x264-params` with `vbv-maxrate`/`vbv-bufsize`/`force-cfr=1`).

use std::sync::mpsc::Sender;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, format, software::scaling, Rational};

use crate::capture::video::POLL_INTERVAL;
use crate::capture::RunFlag;
use crate::error::{PipelineError, Stage};
use crate::queue::BoundedQueue;
use crate::sync::{SyncCoordinator, SyncDecision};
use crate::types::{CompressedPacket, RawVideoFrame, StreamKind};

/// I-frame interval: 1s at 30fps, per `codethread.cpp`'s `gop_size = 30`.
pub const GOP_SIZE: u32 = 30;
/// Capacity of the compressed-video queue feeding the muxer: generous
/// enough to absorb a brief muxer stall without dropping keyframes under
/// normal operation.
pub const MUX_VIDEO_QUEUE_CAPACITY: usize = 60;

pub struct VideoEncoder {
    encoder: Option<ffmpeg::encoder::Video>,
    stream_index: usize,
    time_base: Rational,
    width: u32,
    height: u32,
    scaler: Option<scaling::Context>,
    scaler_src_format: Option<format::Pixel>,
    next_pts: i64,
}

impl VideoEncoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            stream_index: usize::MAX,
            time_base: Rational::new(1, 1),
            width: 0,
            height: 0,
            scaler: None,
            scaler_src_format: None,
            next_pts: 0,
        }
    }

    /// Adds the H.264 video stream to `octx` and opens the encoder. Must be
    /// called before `octx.write_header()`.
    pub fn initialize(
        &mut self,
        octx: &mut format::context::Output,
        width: u32,
        height: u32,
        fps: u32,
        bitrate_bps: u32,
    ) -> Result<(), PipelineError> {
        self.width = width;
        self.height = height;
        self.time_base = Rational::new(1, fps as i32);

        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let codec = codec::encoder::find(codec::Id::H264).ok_or_else(|| PipelineError::Codec {
            stage: Stage::VideoEncoder,
            message: "H.264 encoder not available".to_string(),
        })?;

        let mut ost = octx.add_stream(codec).map_err(|e| PipelineError::Codec {
            stage: Stage::VideoEncoder,
            message: format!("adding video stream: {e}"),
        })?;
        let stream_index = ost.index();

        let mut enc_ctx = codec::Context::new().encoder().video().map_err(|e| PipelineError::Codec {
            stage: Stage::VideoEncoder,
            message: format!("creating video encoder context: {e}"),
        })?;

        enc_ctx.set_width(width);
        enc_ctx.set_height(height);
        enc_ctx.set_format(format::Pixel::YUV420P);
        enc_ctx.set_time_base(self.time_base);
        enc_ctx.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        enc_ctx.set_gop(GOP_SIZE);
        enc_ctx.set_max_b_frames(0);
        enc_ctx.set_bit_rate(bitrate_bps as usize);

        // CBR: buffer 1.5x the target bitrate, matching the original's
        // headroom for short bursts without letting latency grow unbounded.
        let buffer_size = (bitrate_bps as u64 * 3 / 2) as usize;
        enc_ctx.set_rc_buffer_size(buffer_size);
        enc_ctx.set_rc_max_rate(bitrate_bps as usize);
        enc_ctx.set_rc_min_rate(bitrate_bps as usize);

        if global_header {
            enc_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg::Dictionary::new();
        options.set("preset", "superfast");
        options.set("tune", "zerolatency");
        options.set("nal-hrd", "cbr");
        options.set(
            "x264-params",
            &format!(
                "nal-hrd=cbr:force-cfr=1:vbv-maxrate={}:vbv-bufsize={}",
                bitrate_bps / 1000,
                buffer_size / 1000
            ),
        );

        let opened = enc_ctx.open_as_with(codec, options).map_err(|e| PipelineError::Codec {
            stage: Stage::VideoEncoder,
            message: format!("opening H.264 encoder: {e}"),
        })?;
        ost.set_parameters(&opened);

        self.encoder = Some(opened);
        self.stream_index = stream_index;
        self.next_pts = 0;
        Ok(())
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn ensure_scaler(&mut self, src_format: format::Pixel) -> Result<(), PipelineError> {
        if self.scaler_src_format == Some(src_format) {
            return Ok(());
        }
        let scaler = scaling::Context::get(
            src_format,
            self.width,
            self.height,
            format::Pixel::YUV420P,
            self.width,
            self.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::Codec {
            stage: Stage::VideoEncoder,
            message: format!("creating colour-space scaler: {e}"),
        })?;
        self.scaler = Some(scaler);
        self.scaler_src_format = Some(src_format);
        Ok(())
    }

    /// Drains encoded packets into `out_queue`, tagging each with the
    /// encoder's time base so the muxer can rescale before writing.
    fn drain_packets(&mut self, out_queue: &BoundedQueue<CompressedPacket>) {
        let stream_index = self.stream_index;
        let time_base = self.time_base;
        let encoder = match self.encoder.as_mut() {
            Some(e) => e,
            None => return,
        };
        let mut packet = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream_index);
            let compressed = CompressedPacket {
                packet: std::mem::replace(&mut packet, ffmpeg::Packet::empty()),
                kind: StreamKind::Video,
                time_base,
            };
            if out_queue.push_drop_oldest(compressed).is_some() {
                log::warn!("compressed video queue full, dropped oldest packet");
            }
        }
    }

    /// Runs until `run_flag` is cleared: pulls raw frames, applies the sync
    /// policy, colour-converts, encodes, and enqueues for C5.
    pub fn run(
        &mut self,
        run_flag: RunFlag,
        in_queue: Arc<BoundedQueue<RawVideoFrame>>,
        out_queue: Arc<BoundedQueue<CompressedPacket>>,
        sync: Arc<SyncCoordinator>,
        errors: Sender<PipelineError>,
    ) {
        sync.note_video_start();

        'outer: while run_flag.is_running() {
            let Some(raw) = in_queue.pop_timeout(POLL_INTERVAL) else {
                continue;
            };

            loop {
                match sync.evaluate(self.next_pts) {
                    SyncDecision::Proceed => break,
                    SyncDecision::Drop => {
                        log::debug!("video frame dropped by sync policy at pts {}", self.next_pts);
                        continue 'outer;
                    }
                    SyncDecision::Wait(d) => sync.wait_for_audio(d),
                }
                if !run_flag.is_running() {
                    break 'outer;
                }
            }

            let src_format = raw.frame.format();
            if let Err(e) = self.ensure_scaler(src_format) {
                let _ = errors.send(e);
                continue;
            }
            let scaler = self.scaler.as_mut().expect("scaler just ensured");

            let mut yuv = ffmpeg::util::frame::video::Video::new(
                format::Pixel::YUV420P,
                self.width,
                self.height,
            );
            if let Err(e) = scaler.run(&raw.frame, &mut yuv) {
                let _ = errors.send(PipelineError::Codec {
                    stage: Stage::VideoEncoder,
                    message: format!("colour conversion: {e}"),
                });
                continue;
            }
            yuv.set_pts(Some(self.next_pts));
            self.next_pts += 1;

            let encoder = match self.encoder.as_mut() {
                Some(e) => e,
                None => return,
            };
            if let Err(e) = encoder.send_frame(&yuv) {
                let _ = errors.send(PipelineError::Codec {
                    stage: Stage::VideoEncoder,
                    message: format!("send_frame: {e}"),
                });
                continue;
            }
            self.drain_packets(&out_queue);
        }

        self.flush(&out_queue);
    }

    /// Sends EOF and drains any remaining buffered packets before the
    /// stage exits.
    pub fn flush(&mut self, out_queue: &BoundedQueue<CompressedPacket>) {
        if let Some(encoder) = self.encoder.as_mut() {
            let _ = encoder.send_eof();
        }
        self.drain_packets(out_queue);
    }
}

impl Default for VideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}
