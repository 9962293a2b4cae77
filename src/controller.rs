//! C6: Pipeline Controller.
//!
//! Owns the init/shutdown sequencing grounded in
//! `original_source/Push/rtspsyncpush.cpp`'s start/stop methods: allocate the
//! output context, register the encoders' streams on it, open the capture
//! devices, write the header, then start every stage thread; on stop, tear
//! down in the reverse dependency order (capture, then encoders, then mux)
//! so every stage has a chance to flush before the one downstream of it
//! exits. The mux thread hands its `Muxer` back out on join so the
//! controller — not the mux thread — writes the trailer once draining is
//! complete.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use ffmpeg_next as ffmpeg;

use crate::capture::audio::AudioCapture;
use crate::capture::video::{ScreenCapture, VIDEO_RAW_QUEUE_CAPACITY};
use crate::capture::RunFlag;
use crate::config::PipelineConfig;
use crate::encode::audio::AudioEncoder;
use crate::encode::video::{VideoEncoder, MUX_VIDEO_QUEUE_CAPACITY};
use crate::error::{FailureCounter, PipelineError};
use crate::events::PipelineEvent;
use crate::mux::Muxer;
use crate::queue::{BoundedQueue, UnboundedQueue};
use crate::sync::SyncCoordinator;
use crate::types::{ControllerState, RawAudioBuffer, RawVideoFrame, Stats};

/// Owns every stage thread for one push session. Not `Clone`: a GUI holds
/// one `Controller` per active session and talks to it through `stop()`,
/// `state()`, and the `PipelineEvent` receiver handed back by `start`.
pub struct Controller {
    capture_flag: RunFlag,
    encode_flag: RunFlag,
    mux_flag: RunFlag,
    capture_handles: Vec<JoinHandle<()>>,
    encode_handles: Vec<JoinHandle<()>>,
    mux_handles: Vec<JoinHandle<Muxer>>,
    watcher_handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<ControllerState>>,
    stats: Arc<Mutex<Stats>>,
}

impl Controller {
    /// Validates `config`, opens the devices and the RTSP output, writes the
    /// header, and starts every stage. On any failure before the header is
    /// written, nothing is left running.
    pub fn start(config: PipelineConfig) -> Result<(Self, mpsc::Receiver<PipelineEvent>), PipelineError> {
        config.validate()?;
        crate::init();

        let state = Arc::new(Mutex::new(ControllerState::Decoding));
        let stats = Arc::new(Mutex::new(Stats::default()));
        let (event_tx, event_rx) = mpsc::channel::<PipelineEvent>();
        let (error_tx, error_rx) = mpsc::channel::<PipelineError>();

        let mut screen = ScreenCapture::new();
        screen.initialize(&config.video_source, config.width, config.height, config.fps)?;

        let mut mic = AudioCapture::new();
        mic.initialize(config.audio_sample_rate, config.audio_channels)?;

        let mut octx = ffmpeg::format::output_as(&config.rtsp_url, "rtsp").map_err(|e| {
            PipelineError::Network(format!("allocating RTSP output context: {e}"))
        })?;

        let mut video_encoder = VideoEncoder::new();
        video_encoder.initialize(
            &mut octx,
            config.width,
            config.height,
            config.fps,
            config.video_bitrate_bps,
        )?;

        let mut audio_encoder = AudioEncoder::new();
        audio_encoder.initialize(&mut octx, config.audio_sample_rate, config.audio_channels)?;

        let mut muxer = Muxer::new(octx);
        muxer.write_header()?;

        let capture_flag = RunFlag::new();
        let encode_flag = RunFlag::new();
        let mux_flag = RunFlag::new();

        let raw_video_queue = Arc::new(BoundedQueue::<RawVideoFrame>::new(VIDEO_RAW_QUEUE_CAPACITY));
        let raw_audio_queue = Arc::new(UnboundedQueue::<RawAudioBuffer>::new());
        let compressed_video_queue =
            Arc::new(BoundedQueue::<crate::types::CompressedPacket>::new(MUX_VIDEO_QUEUE_CAPACITY));
        let compressed_audio_queue = Arc::new(UnboundedQueue::<crate::types::CompressedPacket>::new());
        let sync = Arc::new(SyncCoordinator::new(
            config.audio_sample_rate as i32,
            config.fps as i32,
        ));

        let mut capture_handles = Vec::new();
        let mut encode_handles = Vec::new();
        let mut mux_handles = Vec::new();

        capture_handles.push(
            thread::Builder::new()
                .name("castpush-video-capture".into())
                .spawn({
                    let flag = capture_flag.clone();
                    let queue = raw_video_queue.clone();
                    let errors = error_tx.clone();
                    move || screen.run(flag, queue, errors)
                })
                .expect("spawn video capture thread"),
        );

        capture_handles.push(
            thread::Builder::new()
                .name("castpush-audio-capture".into())
                .spawn({
                    let flag = capture_flag.clone();
                    let queue = raw_audio_queue.clone();
                    move || {
                        mic.run(flag, queue, |first_pts| {
                            log::debug!("first audio capture sample at raw pts {first_pts}");
                        })
                    }
                })
                .expect("spawn audio capture thread"),
        );

        encode_handles.push(
            thread::Builder::new()
                .name("castpush-video-encoder".into())
                .spawn({
                    let flag = encode_flag.clone();
                    let input = raw_video_queue.clone();
                    let output = compressed_video_queue.clone();
                    let sync = sync.clone();
                    let errors = error_tx.clone();
                    move || video_encoder.run(flag, input, output, sync, errors)
                })
                .expect("spawn video encoder thread"),
        );

        encode_handles.push(
            thread::Builder::new()
                .name("castpush-audio-encoder".into())
                .spawn({
                    let flag = encode_flag.clone();
                    let input = raw_audio_queue.clone();
                    let output = compressed_audio_queue.clone();
                    let sync = sync.clone();
                    let errors = error_tx.clone();
                    move || audio_encoder.run(flag, input, output, sync, errors)
                })
                .expect("spawn audio encoder thread"),
        );

        mux_handles.push(
            thread::Builder::new()
                .name("castpush-muxer".into())
                .spawn({
                    let flag = mux_flag.clone();
                    let video_queue = compressed_video_queue.clone();
                    let audio_queue = compressed_audio_queue.clone();
                    let errors = error_tx.clone();
                    move || {
                        muxer.run(flag, video_queue, audio_queue, errors);
                        muxer
                    }
                })
                .expect("spawn muxer thread"),
        );

        drop(error_tx);

        let watcher_handle = {
            let capture_flag = capture_flag.clone();
            let encode_flag = encode_flag.clone();
            let mux_flag = mux_flag.clone();
            let state = state.clone();
            let event_tx = event_tx.clone();
            thread::Builder::new()
                .name("castpush-error-watcher".into())
                .spawn(move || {
                    let mut failures = FailureCounter::new();
                    while let Ok(err) = error_rx.recv() {
                        log::warn!("pipeline stage error: {err}");
                        let _ = event_tx.send(PipelineEvent::Error(err.to_string()));

                        let stage_fatal = err
                            .stage()
                            .map(|stage| failures.record_failure(stage))
                            .unwrap_or(false);
                        if err.immediately_fatal() || stage_fatal {
                            *state.lock().unwrap() = ControllerState::Error;
                            let _ = event_tx.send(PipelineEvent::StateChanged(
                                "running".into(),
                                "error".into(),
                            ));
                            capture_flag.stop();
                            encode_flag.stop();
                            mux_flag.stop();
                            break;
                        }
                    }
                })
                .expect("spawn error watcher thread")
        };

        *state.lock().unwrap() = ControllerState::Playing;
        let _ = event_tx.send(PipelineEvent::StateChanged("decoding".into(), "playing".into()));

        Ok((
            Self {
                capture_flag,
                encode_flag,
                mux_flag,
                capture_handles,
                encode_handles,
                mux_handles,
                watcher_handle: Some(watcher_handle),
                state,
                stats,
            },
            event_rx,
        ))
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock().unwrap()
    }

    /// Stops every stage in dependency order and writes the trailer. Safe to
    /// call from any thread, and safe to call more than once (later calls
    /// join nothing and return immediately).
    pub fn stop(&mut self) {
        self.capture_flag.stop();
        for handle in self.capture_handles.drain(..) {
            let _ = handle.join();
        }

        self.encode_flag.stop();
        for handle in self.encode_handles.drain(..) {
            let _ = handle.join();
        }

        self.mux_flag.stop();
        for handle in self.mux_handles.drain(..) {
            if let Ok(mut muxer) = handle.join() {
                if let Err(e) = muxer.write_trailer() {
                    log::warn!("writing RTSP trailer: {e}");
                }
            }
        }

        if let Some(handle) = self.watcher_handle.take() {
            let _ = handle.join();
        }

        let mut state = self.state.lock().unwrap();
        if *state != ControllerState::Error {
            *state = ControllerState::Ended;
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.watcher_handle.is_some()
            || !self.capture_handles.is_empty()
            || !self.encode_handles.is_empty()
            || !self.mux_handles.is_empty()
        {
            self.stop();
        }
    }
}
