//! C2: Audio Capture.
//!
//! Enumerates input devices and selects the first whose name matches
//! "Stereo Mix" or "立体声混音" (case-insensitive) — the loopback workaround
//! used on Windows without a virtual audio driver. Delivery to C4 is by
//! reference-counted byte buffer over an unbounded queue: audio must never be
//! dropped.

use std::sync::Arc;

use ffmpeg_next as ffmpeg;

use crate::capture::RunFlag;
use crate::error::{PipelineError, Stage};
use crate::queue::UnboundedQueue;
use crate::types::RawAudioBuffer;

#[cfg(target_os = "windows")]
pub const AUDIO_DEMUXER: &str = "dshow";
#[cfg(target_os = "macos")]
pub const AUDIO_DEMUXER: &str = "avfoundation";
#[cfg(all(unix, not(target_os = "macos")))]
pub const AUDIO_DEMUXER: &str = "pulse";

const STEREO_MIX_NAMES: [&str; 2] = ["stereo mix", "立体声混音"];

pub struct AudioCapture {
    sample_rate: u32,
    channels: u16,
    device_name: Option<String>,
    input: Option<ffmpeg::format::context::Input>,
    audio_stream_index: usize,
    decoder: Option<ffmpeg::decoder::Audio>,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            channels: 0,
            device_name: None,
            input: None,
            audio_stream_index: usize::MAX,
            decoder: None,
        }
    }

    /// Names of available input devices the current platform demuxer can
    /// enumerate. On platforms/builds where enumeration isn't wired up this
    /// returns an empty list and `initialize` fails with a Device error.
    fn enumerate_device_names() -> Vec<String> {
        // The codec/format/device library is an external collaborator;
        // enumeration is performed through its device-listing capability
        // (avdevice_list_input_sources under dshow/pulse/avfoundation),
        // abstracted here as a platform hook.
        super::device_list::list_audio_input_devices(AUDIO_DEMUXER)
    }

    pub fn initialize(&mut self, sample_rate: u32, channels: u16) -> Result<(), PipelineError> {
        self.sample_rate = sample_rate;
        self.channels = channels;

        let devices = Self::enumerate_device_names();
        let chosen = devices.into_iter().find(|name| {
            let lower = name.to_lowercase();
            STEREO_MIX_NAMES.iter().any(|needle| lower.contains(needle))
        });

        let device_name = chosen.ok_or_else(|| PipelineError::Device {
            stage: Stage::AudioCapture,
            message: "no Stereo Mix / 立体声混音 loopback input device found".to_string(),
        })?;

        let demuxer = ffmpeg::format::find_input_format(AUDIO_DEMUXER).ok_or_else(|| {
            PipelineError::Device {
                stage: Stage::AudioCapture,
                message: format!("no input format registered for {AUDIO_DEMUXER}"),
            }
        })?;

        let mut options = ffmpeg::Dictionary::new();
        options.set("sample_rate", &sample_rate.to_string());
        options.set("channels", &channels.to_string());

        let input =
            ffmpeg::format::input_with_dictionary_and_format(&device_name, demuxer, options)
                .map_err(|e| PipelineError::Device {
                    stage: Stage::AudioCapture,
                    message: format!("opening audio device {device_name:?}: {e}"),
                })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or_else(|| PipelineError::Device {
                stage: Stage::AudioCapture,
                message: "no audio stream on loopback device".to_string(),
            })?;
        let audio_stream_index = stream.index();

        let decoder_ctx = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .map_err(|e| PipelineError::Device {
                stage: Stage::AudioCapture,
                message: format!("building audio decoder context: {e}"),
            })?;
        let decoder = decoder_ctx.decoder().audio().map_err(|e| PipelineError::Device {
            stage: Stage::AudioCapture,
            message: format!("opening audio decoder: {e}"),
        })?;

        self.device_name = Some(device_name);
        self.input = Some(input);
        self.audio_stream_index = audio_stream_index;
        self.decoder = Some(decoder);
        Ok(())
    }

    pub fn run(
        &mut self,
        run_flag: RunFlag,
        out_queue: Arc<UnboundedQueue<RawAudioBuffer>>,
        first_pts_cb: impl Fn(i64) + Send + 'static,
    ) {
        let input = match self.input.as_mut() {
            Some(i) => i,
            None => return,
        };
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => return,
        };
        let audio_stream_index = self.audio_stream_index;
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let mut reported_first = false;
        let mut samples_seen: i64 = 0;

        let mut decoded = ffmpeg::util::frame::audio::Audio::empty();
        while run_flag.is_running() {
            let mut packets = input.packets();
            let Some((stream, packet)) = packets.next() else {
                break;
            };
            if stream.index() != audio_stream_index {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            while decoder.receive_frame(&mut decoded).is_ok() {
                let bytes = bytes::Bytes::copy_from_slice(decoded.data(0));
                if !reported_first {
                    first_pts_cb(samples_seen);
                    reported_first = true;
                }
                samples_seen += decoded.samples() as i64;
                out_queue.push(RawAudioBuffer {
                    data: bytes,
                    sample_rate,
                    channels,
                });
            }
        }
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}
