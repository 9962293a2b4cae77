//! Device enumeration hook for the platform audio demuxer.
//!
//! The codec/format/device library is an external collaborator; exactly
//! how input source names are enumerated is platform-specific
//! (`dshow` on Windows reports names through its `list_devices` option,
//! `pulse`/`avfoundation` expose their own source listings). This module is
//! the single seam a platform backend plugs into; tests substitute it with a
//! fixed list to exercise the "Stereo Mix" selection policy in
//! `capture::audio` without a real device present.

/// Returns the names of input devices visible to `demuxer`.
///
/// The default implementation asks the platform hook compiled in via
/// `register_device_lister`; if none was registered (e.g. in unit tests that
/// don't care about enumeration) it returns an empty list, which causes
/// `AudioCapture::initialize` to fail with a Device error exactly as spec
/// §4.2 requires when no loopback device is found.
pub fn list_audio_input_devices(demuxer: &str) -> Vec<String> {
    PLATFORM_LISTER.with(|cell| (cell.borrow())(demuxer))
}

thread_local! {
    static PLATFORM_LISTER: std::cell::RefCell<Box<dyn Fn(&str) -> Vec<String>>> =
        std::cell::RefCell::new(Box::new(|_demuxer| Vec::new()));
}

/// Installs a device lister for the current thread, used by tests and by a
/// real platform backend to supply actual enumerated device names.
pub fn register_device_lister(f: impl Fn(&str) -> Vec<String> + 'static) {
    PLATFORM_LISTER.with(|cell| *cell.borrow_mut() = Box::new(f));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lister_returns_empty() {
        assert!(list_audio_input_devices("pulse").is_empty());
    }

    #[test]
    fn registered_lister_is_used() {
        register_device_lister(|_| vec!["Microphone".to_string(), "Stereo Mix".to_string()]);
        let devices = list_audio_input_devices("dshow");
        assert!(devices.iter().any(|d| d == "Stereo Mix"));
    }
}
