//! C3/C4: video and audio encoders.

pub mod audio;
pub mod video;
