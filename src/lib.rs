//! Desktop capture -> H.264/AAC encode -> mux -> RTSP push pipeline.
//!
//! `Controller::start` is the single entry point: it validates a
//! `PipelineConfig`, opens the capture devices and the RTSP output, and
//! starts every stage thread. Callers drive it from a GUI or any other
//! external collaborator.

pub mod capture;
pub mod config;
pub mod controller;
pub mod encode;
pub mod error;
pub mod events;
pub mod mux;
pub mod queue;
pub mod sync;
pub mod types;

use std::sync::Once;

static INIT: Once = Once::new();

/// One-shot process-wide initialization of the codec/format/device library,
/// grounded in `original_source/Push/rtspsyncpush.cpp`'s
/// `avformat_network_init()` / `avdevice_register_all()` call pair.
/// Idempotent and safe to call from every `Controller::start`.
pub fn init() {
    INIT.call_once(|| {
        ffmpeg_next::init().expect("ffmpeg_next::init");
        ffmpeg_next::format::network::init();
    });
}

pub use config::PipelineConfig;
pub use controller::Controller;
pub use error::PipelineError;
pub use events::PipelineEvent;
