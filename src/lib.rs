//! speex_player_rs - Streaming Ogg/Speex voice playback library
//!
//! Demultiplexes an Ogg container carrying Speex voice packets, validates
//! per-page checksums, decodes voice frames to PCM through libspeex, and
//! streams the audio to an ALSA sink with pause and cooperative cancel
//! support. Strictly forward, single-pass, decode-only.

pub mod alsa_sink;
pub mod config;
pub mod crc;
pub mod header;
pub mod ogg;
pub mod player;
pub mod sink;
pub mod speex;
pub mod voice;

pub use alsa_sink::AlsaSinkFactory;
pub use config::PlayerConfig;
pub use header::{Classified, PacketClassifier, SpeexHeader};
pub use ogg::{FramingError, PageReader};
pub use player::{
    Outcome, PlayerControls, PlayerError, PlayerState, ProgressEvent, ProgressListener,
    SpeexPlayer,
};
pub use sink::{AudioSink, SinkFactory, SinkManager, MAX_VOLUME};
pub use speex::{SpeexDecoder, SpeexDecoderFactory, SpeexMode};
pub use voice::{VoiceDecoder, VoiceDecoderFactory};
