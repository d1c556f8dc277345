fn main() {
    // ALSA is linked by alsa-sys; libspeex is located through pkg-config
    pkg_config::Config::new()
        .probe("speex")
        .expect("Failed to find libspeex. Please install libspeex-dev.");
}
