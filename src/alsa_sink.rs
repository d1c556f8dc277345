//! ALSA PCM implementation of the audio sink capability.

use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use crate::sink::{AudioSink, SinkFactory, MAX_VOLUME};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for playback", device))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_channels()?, hwp.get_period_size()? as usize)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA playback: device={}, rate={}, channels={}, period_size={}",
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// Opens [`AlsaSink`] handles for the configured device.
pub struct AlsaSinkFactory {
    device: String,
    period_size: usize,
}

impl AlsaSinkFactory {
    /// `period_size` of 0 lets ALSA choose.
    pub fn new(device: impl Into<String>, period_size: usize) -> Self {
        Self {
            device: device.into(),
            period_size,
        }
    }
}

impl SinkFactory for AlsaSinkFactory {
    fn open(&mut self, sample_rate: u32, channels: u32) -> Result<Box<dyn AudioSink>> {
        let period_size_opt = if self.period_size > 0 {
            Some(self.period_size)
        } else {
            None
        };
        let (pcm, params) = open_playback(&self.device, sample_rate, channels, period_size_opt)?;
        Ok(Box::new(AlsaSink {
            pcm,
            channels: params.channels,
            volume: MAX_VOLUME,
            scaled: Vec::new(),
        }))
    }
}

/// One open ALSA playback handle.
///
/// ALSA's PCM interface has no per-handle volume control, so the volume is
/// applied as a software gain on the samples before they are queued.
pub struct AlsaSink {
    pcm: PCM,
    channels: u32,
    volume: f32,
    scaled: Vec<i16>,
}

impl AudioSink for AlsaSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let data: &[i16] = if (self.volume - MAX_VOLUME).abs() < f32::EPSILON {
            samples
        } else {
            self.scaled.clear();
            self.scaled
                .extend(samples.iter().map(|&s| (s as f32 * self.volume) as i16));
            &self.scaled
        };

        let io = self.pcm.io_i16()?;

        // Retry loop to handle short writes and XRUN recovery without
        // losing frames.
        let total_frames = data.len() / self.channels as usize;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * self.channels as usize;
            match io.writei(&data[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM playback")?;

                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames to break dead-loop.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        match self.pcm.state() {
            State::Running => Ok(()),
            State::XRun => {
                self.pcm.prepare()?;
                self.pcm.start()?;
                Ok(())
            }
            _ => {
                self.pcm.start().context("Failed to start playback")?;
                Ok(())
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
    }

    fn stop(&mut self) {
        if let Err(e) = self.pcm.drain() {
            log::warn!("ALSA drain failed: {}", e);
        }
    }
}
