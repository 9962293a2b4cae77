//! C1: Screen Capture.
//!
//! Grounded in `original_source/codethread.cpp::initializeSource` /
//! `original_source/Push/videocapturethread.cpp`: open the platform screen
//! device ("gdigrab" on Windows, "x11grab" on Unix), with `framerate`,
//! `video_size`, and `draw_mouse` as demuxer options, then decode frames in a
//! loop and hand each owned frame to the queue feeding C3.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;

use crate::capture::RunFlag;
use crate::error::{PipelineError, Stage};
use crate::queue::BoundedQueue;
use crate::types::RawVideoFrame;

/// Capacity of the video raw queue between C1 and C2 — bounded to 2 frames;
/// screen content is idempotent over short intervals, so freshness beats
/// completeness when the encoder falls behind.
pub const VIDEO_RAW_QUEUE_CAPACITY: usize = 2;

#[cfg(target_os = "windows")]
pub const SCREEN_DEMUXER: &str = "gdigrab";
#[cfg(not(target_os = "windows"))]
pub const SCREEN_DEMUXER: &str = "x11grab";

pub struct ScreenCapture {
    source: String,
    width: u32,
    height: u32,
    fps: u32,
    input: Option<ffmpeg::format::context::Input>,
    video_stream_index: usize,
    decoder: Option<ffmpeg::decoder::Video>,
}

impl ScreenCapture {
    pub fn new() -> Self {
        Self {
            source: String::new(),
            width: 0,
            height: 0,
            fps: 0,
            input: None,
            video_stream_index: usize::MAX,
            decoder: None,
        }
    }

    /// Opens the screen device. On failure no partial resources remain open:
    /// the decoder is only opened after the input context and stream lookup
    /// succeed, and dropping `self` before that point releases nothing extra.
    pub fn initialize(
        &mut self,
        source: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<(), PipelineError> {
        self.source = source.to_string();
        self.width = width;
        self.height = height;
        self.fps = fps;

        let demuxer = ffmpeg::format::find_input_format(SCREEN_DEMUXER).ok_or_else(|| {
            PipelineError::Device {
                stage: Stage::VideoCapture,
                message: format!("no input format registered for {SCREEN_DEMUXER}"),
            }
        })?;

        let mut options = ffmpeg::Dictionary::new();
        options.set("framerate", &fps.to_string());
        options.set("draw_mouse", "1");
        options.set("video_size", &format!("{width}x{height}"));

        let input = ffmpeg::format::input_with_dictionary_and_format(&self.source, demuxer, options)
            .map_err(|e| PipelineError::Device {
                stage: Stage::VideoCapture,
                message: format!("opening {SCREEN_DEMUXER} device {source:?}: {e}"),
            })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::Device {
                stage: Stage::VideoCapture,
                message: "no video stream in capture device".to_string(),
            })?;
        let video_stream_index = stream.index();

        let decoder_ctx = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .map_err(|e| PipelineError::Device {
                stage: Stage::VideoCapture,
                message: format!("building decoder context: {e}"),
            })?;
        let decoder = decoder_ctx.decoder().video().map_err(|e| PipelineError::Device {
            stage: Stage::VideoCapture,
            message: format!("opening screen decoder: {e}"),
        })?;

        // The device's negotiated rate may differ from the request; log and
        // proceed with whatever was actually granted.
        let granted_fps = stream.rate();
        if granted_fps.numerator() > 0 {
            let granted = granted_fps.numerator() as f64 / granted_fps.denominator() as f64;
            if (granted - fps as f64).abs() > 0.5 {
                log::warn!(
                    "screen device granted {granted:.2} fps, nearest to requested {fps}"
                );
            }
        }

        self.input = Some(input);
        self.video_stream_index = video_stream_index;
        self.decoder = Some(decoder);
        Ok(())
    }

    pub fn decoded_format(&self) -> Pixel {
        self.decoder.as_ref().map(|d| d.format()).unwrap_or(Pixel::BGRA)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Runs until `run_flag` is cleared, cloning each decoded frame into the
    /// bounded raw-video queue (drop-oldest on overflow).
    pub fn run(
        &mut self,
        run_flag: RunFlag,
        out_queue: Arc<BoundedQueue<RawVideoFrame>>,
        errors: std::sync::mpsc::Sender<PipelineError>,
    ) {
        let input = match self.input.as_mut() {
            Some(i) => i,
            None => return,
        };
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => return,
        };
        let video_stream_index = self.video_stream_index;

        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while run_flag.is_running() {
            let mut packets = input.packets();
            let Some((stream, packet)) = packets.next() else {
                break;
            };
            if stream.index() != video_stream_index {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            while decoder.receive_frame(&mut decoded).is_ok() {
                if !run_flag.is_running() {
                    break;
                }
                let owned = RawVideoFrame {
                    frame: decoded.clone(),
                    captured_at: Instant::now(),
                };
                if out_queue.push_drop_oldest(owned).is_some() {
                    log::debug!("video raw queue full, dropped oldest frame");
                }
            }
        }
        let _ = errors;
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// How long the mux/encoder stages wait for the next item before
/// re-checking the run flag; keeps shutdown latency bounded.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);
