fn main() {
    // On macOS, embed a runtime search path for FFmpeg so the dynamic linker
    // finds libav* without requiring DYLD_LIBRARY_PATH at launch.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        use std::{env, fs};

        fn add_rpath(p: &str) {
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", p);
        }

        if let Ok(ff_lib) = env::var("FFMPEG_LIB_DIR") {
            if fs::metadata(&ff_lib).is_ok() {
                add_rpath(&ff_lib);
            }
        } else {
            let brew_ff = "/opt/homebrew/opt/ffmpeg/lib";
            if fs::metadata(brew_ff).is_ok() {
                add_rpath(brew_ff);
            }
        }
    }
}
