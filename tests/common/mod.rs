//! Shared helpers: synthetic Ogg/Speex streams and in-memory capabilities.

#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use speex_player_rs::{AudioSink, SinkFactory, VoiceDecoder, VoiceDecoderFactory};

pub const CRC_OFFSET: usize = 22;

/// Build one valid Ogg page with a correct checksum.
pub fn build_page(sequence: u32, segments: &[&[u8]]) -> Vec<u8> {
    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0); // version
    page.push(0); // flags
    page.extend_from_slice(&0u64.to_le_bytes()); // granule position
    page.extend_from_slice(&0xfeed_f00du32.to_le_bytes()); // serial
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0, 0, 0, 0]); // checksum, patched below
    page.push(segments.len() as u8);
    for seg in segments {
        page.push(seg.len() as u8);
    }
    for seg in segments {
        page.extend_from_slice(seg);
    }
    let crc = speex_player_rs::crc::checksum(0, &page);
    page[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Build an 80-byte Speex stream header packet.
pub fn speex_header_packet(sample_rate: u32, channels: u32, frame_size: u32) -> Vec<u8> {
    let mut packet = vec![0u8; 80];
    packet[..8].copy_from_slice(b"Speex   ");
    packet[8..17].copy_from_slice(b"speex-1.0");
    packet[28..32].copy_from_slice(&1i32.to_le_bytes());
    packet[32..36].copy_from_slice(&80i32.to_le_bytes());
    packet[36..40].copy_from_slice(&sample_rate.to_le_bytes());
    packet[40] = 0; // narrowband
    packet[44..48].copy_from_slice(&4i32.to_le_bytes());
    packet[48..52].copy_from_slice(&channels.to_le_bytes());
    packet[52..56].copy_from_slice(&(-1i32).to_le_bytes());
    packet[56..60].copy_from_slice(&frame_size.to_le_bytes());
    packet[64..68].copy_from_slice(&1u32.to_le_bytes());
    packet
}

// ======================== Mock sink ========================

#[derive(Default)]
pub struct SinkLog {
    /// (sample_rate, channels) per open call
    pub opens: Vec<(u32, u32)>,
    /// sample count per write call
    pub writes: Vec<usize>,
    pub plays: usize,
    pub stops: usize,
    pub volumes: Vec<f32>,
}

pub type WriteHook = Arc<dyn Fn(usize) + Send + Sync>;

pub struct MockSinkFactory {
    pub log: Arc<Mutex<SinkLog>>,
    pub hook: Option<WriteHook>,
    pub fail_open: bool,
}

impl MockSinkFactory {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (
            Self {
                log: log.clone(),
                hook: None,
                fail_open: false,
            },
            log,
        )
    }

    /// Call `hook` with the 1-based global write index after every write.
    pub fn with_hook(mut self, hook: WriteHook) -> Self {
        self.hook = Some(hook);
        self
    }
}

impl SinkFactory for MockSinkFactory {
    fn open(&mut self, sample_rate: u32, channels: u32) -> Result<Box<dyn AudioSink>> {
        if self.fail_open {
            anyhow::bail!("no output for {}Hz", sample_rate);
        }
        self.log.lock().unwrap().opens.push((sample_rate, channels));
        Ok(Box::new(MockSink {
            log: self.log.clone(),
            hook: self.hook.clone(),
        }))
    }
}

struct MockSink {
    log: Arc<Mutex<SinkLog>>,
    hook: Option<WriteHook>,
}

impl AudioSink for MockSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let index = {
            let mut log = self.log.lock().unwrap();
            log.writes.push(samples.len());
            log.writes.len()
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.log.lock().unwrap().plays += 1;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.lock().unwrap().volumes.push(volume);
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

// ======================== Mock decoder ========================

/// Produces a fixed number of samples per voice packet.
pub struct MockDecoderFactory {
    pub samples_per_packet: usize,
}

impl VoiceDecoderFactory for MockDecoderFactory {
    fn create(&self) -> Result<Box<dyn VoiceDecoder>> {
        Ok(Box::new(MockDecoder {
            samples: self.samples_per_packet,
        }))
    }
}

struct MockDecoder {
    samples: usize,
}

impl VoiceDecoder for MockDecoder {
    fn decode(&mut self, _packet: &[u8], pcm: &mut [i16]) -> Result<usize> {
        let count = self.samples.min(pcm.len());
        pcm[..count].fill(7);
        Ok(count)
    }
}

// ======================== Counting source ========================

/// Wraps a byte source and counts how many bytes were consumed.
pub struct CountingReader<R> {
    inner: R,
    consumed: Arc<AtomicUsize>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicUsize>) {
        let consumed = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                consumed: consumed.clone(),
            },
            consumed,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}
