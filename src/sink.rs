//! Audio sink capability and its lifecycle management.

use anyhow::Result;

/// Highest volume a sink accepts; [`AudioSink::set_volume`] clamps to it.
pub const MAX_VOLUME: f32 = 1.0;

/// A platform audio output opened for one sample rate.
///
/// Dropping the handle releases the underlying device.
pub trait AudioSink: Send {
    /// Queue interleaved 16-bit samples for playback.
    fn write(&mut self, samples: &[i16]) -> Result<()>;
    /// Start or resume playback. Idempotent while already playing.
    fn play(&mut self) -> Result<()>;
    /// Set the output volume, 0.0 to [`MAX_VOLUME`].
    fn set_volume(&mut self, volume: f32);
    /// Stop playback, letting already queued samples drain.
    fn stop(&mut self);
}

/// Opens sinks on demand once the stream parameters are known.
pub trait SinkFactory: Send {
    fn open(&mut self, sample_rate: u32, channels: u32) -> Result<Box<dyn AudioSink>>;
}

/// Owns the sink handle for one decode session.
///
/// The sink is opened lazily and released eagerly: on pause, and on every
/// loop exit path through `Drop`. `Option::take` makes the release happen at
/// most once per handle.
pub struct SinkManager<'a> {
    factory: &'a mut dyn SinkFactory,
    sink: Option<Box<dyn AudioSink>>,
}

impl<'a> SinkManager<'a> {
    pub fn new(factory: &'a mut dyn SinkFactory) -> Self {
        Self { factory, sink: None }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Open the sink if it is not already open and hand it out.
    pub fn ensure_open(&mut self, sample_rate: u32, channels: u32) -> Result<&mut dyn AudioSink> {
        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => {
                log::info!("opening audio sink: rate={}Hz, ch={}", sample_rate, channels);
                self.factory.open(sample_rate, channels)?
            }
        };
        Ok(self.sink.insert(sink).as_mut())
    }

    /// Stop and drop the sink handle, if any.
    pub fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.stop();
        }
    }
}

impl Drop for SinkManager<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
