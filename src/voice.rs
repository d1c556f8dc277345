//! Voice decoder capability consumed by the playback loop.

use anyhow::Result;

/// A decoder that turns one encoded voice packet into 16-bit PCM samples.
///
/// Implementations own whatever codec state they need. A return value of 0
/// is not an error; the frame simply produces no audio.
pub trait VoiceDecoder: Send {
    /// Decode one packet into `pcm`, returning the number of samples written.
    fn decode(&mut self, packet: &[u8], pcm: &mut [i16]) -> Result<usize>;
}

/// Creates one decoder per decode session.
pub trait VoiceDecoderFactory: Send {
    fn create(&self) -> Result<Box<dyn VoiceDecoder>>;
}
