//! The decode-and-playback loop with pause and cooperative cancel.
//!
//! One dedicated worker thread runs [`SpeexPlayer::decode`]; controlling
//! threads only touch the shared pause/cancel flags through
//! [`PlayerControls`]. Both flags are observed at two checkpoints per page
//! (before the page read and before each segment), so cancellation latency
//! is bounded by one segment's decode-and-write cost.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::header::{Classified, PacketClassifier, DEFAULT_FRAME_SIZE};
use crate::ogg::{FramingError, PageReader, PageSegments};
use crate::sink::{SinkFactory, SinkManager, MAX_VOLUME};
use crate::voice::{VoiceDecoder, VoiceDecoderFactory};

/// Errors that end a decode session.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The platform could not provide an output for the requested rate, or
    /// an open sink failed while being written to.
    #[error("audio sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The voice decoder could not be created.
    #[error("voice decoder init failed: {0}")]
    Decoder(String),
}

/// How a decode session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Clean end of stream.
    Finished,
    /// The cancel flag was observed at a checkpoint.
    Cancelled,
}

/// Externally observable lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Streaming,
    Paused,
    Cancelled,
    Finished,
    Failed,
}

/// Events delivered to progress listeners from the worker thread.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The codec header was parsed and the sink is being initialized.
    HeaderParsed {
        sample_rate: u32,
        channels: u32,
        frame_size: u32,
    },
    /// A page was fully processed and passed its checksum.
    PageDecoded { sequence: u32 },
    /// The stream ended cleanly.
    Finished,
}

pub trait ProgressListener: Send {
    fn on_progress(&mut self, event: &ProgressEvent);
}

/// State shared between the worker and controlling threads.
struct PlayerShared {
    paused: Mutex<bool>,
    unpaused: Condvar,
    cancelled: AtomicBool,
    state: Mutex<PlayerState>,
    last_error: Mutex<Option<String>>,
    listeners: Mutex<Vec<Box<dyn ProgressListener>>>,
}

impl PlayerShared {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            unpaused: Condvar::new(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(PlayerState::Idle),
            last_error: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }

    fn notify(&self, event: &ProgressEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter_mut() {
            listener.on_progress(event);
        }
    }
}

/// Cheap-to-clone handle for pausing, cancelling, and polling a player from
/// other threads.
#[derive(Clone)]
pub struct PlayerControls {
    shared: Arc<PlayerShared>,
}

impl PlayerControls {
    pub fn set_paused(&self, paused: bool) {
        *self.shared.paused.lock().unwrap() = paused;
        if !paused {
            self.shared.unpaused.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock().unwrap()
    }

    /// Request cooperative cancellation. The worker stops at its next
    /// checkpoint; a paused worker is woken up to observe the flag.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        // Notify under the pause lock, or the wakeup could slip into the
        // window between the worker's flag check and its park.
        let _paused = self.shared.paused.lock().unwrap();
        self.shared.unpaused.notify_all();
    }

    pub fn state(&self) -> PlayerState {
        *self.shared.state.lock().unwrap()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }
}

/// Plays an Ogg/Speex byte stream to an audio sink.
///
/// The voice decoder and the audio output are supplied as capabilities; a
/// fresh decoder is created per session, the sink is opened lazily once the
/// stream header reveals the sample rate.
pub struct SpeexPlayer {
    decoder_factory: Box<dyn VoiceDecoderFactory>,
    sink_factory: Box<dyn SinkFactory>,
    shared: Arc<PlayerShared>,
}

enum Checkpoint {
    Continue,
    Cancelled,
}

impl SpeexPlayer {
    pub fn new(
        decoder_factory: Box<dyn VoiceDecoderFactory>,
        sink_factory: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            decoder_factory,
            sink_factory,
            shared: Arc::new(PlayerShared::new()),
        }
    }

    /// Control handle for other threads.
    pub fn controls(&self) -> PlayerControls {
        PlayerControls {
            shared: self.shared.clone(),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.controls().set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.controls().is_paused()
    }

    pub fn cancel(&self) {
        self.controls().cancel();
    }

    pub fn state(&self) -> PlayerState {
        self.controls().state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.controls().last_error()
    }

    pub fn add_progress_listener(&self, listener: Box<dyn ProgressListener>) {
        self.shared.listeners.lock().unwrap().push(listener);
    }

    /// Decode and play `source` to completion, cancellation, or failure.
    ///
    /// This is the worker body; it blocks until the session ends. The sink
    /// is torn down on every exit path. Errors are both returned and
    /// recorded for [`PlayerControls::last_error`] polling.
    pub fn decode<R: Read>(&mut self, source: R) -> Result<Outcome, PlayerError> {
        *self.shared.last_error.lock().unwrap() = None;
        self.shared.set_state(PlayerState::Streaming);

        let result = run_loop(
            &*self.decoder_factory,
            &mut *self.sink_factory,
            &self.shared,
            source,
        );

        match &result {
            Ok(Outcome::Finished) => {
                self.shared.set_state(PlayerState::Finished);
                self.shared.notify(&ProgressEvent::Finished);
            }
            Ok(Outcome::Cancelled) => self.shared.set_state(PlayerState::Cancelled),
            Err(e) => {
                log::error!("decode session failed: {}", e);
                *self.shared.last_error.lock().unwrap() = Some(e.to_string());
                self.shared.set_state(PlayerState::Failed);
            }
        }
        result
    }
}

/// Per-session stream parameters, defaulted until a header is parsed.
struct StreamParams {
    sample_rate: u32,
    channels: u32,
}

fn run_loop<R: Read>(
    decoder_factory: &dyn VoiceDecoderFactory,
    sink_factory: &mut dyn SinkFactory,
    shared: &PlayerShared,
    source: R,
) -> Result<Outcome, PlayerError> {
    let mut decoder = decoder_factory
        .create()
        .map_err(|e| PlayerError::Decoder(e.to_string()))?;
    let mut sinks = SinkManager::new(sink_factory);
    let mut pages = PageReader::new(source);
    let mut classifier = PacketClassifier::new();

    let mut pcm = vec![0i16; DEFAULT_FRAME_SIZE as usize];
    let mut params = StreamParams {
        sample_rate: 0,
        channels: 1,
    };

    loop {
        if let Checkpoint::Cancelled = checkpoint(shared, &mut sinks) {
            return Ok(Outcome::Cancelled);
        }

        let Some(segments) = pages.next_page()? else {
            return Ok(Outcome::Finished);
        };

        match process_page(
            shared,
            &mut sinks,
            &mut classifier,
            &mut *decoder,
            segments,
            &mut pcm,
            &mut params,
        )? {
            Some(sequence) => shared.notify(&ProgressEvent::PageDecoded { sequence }),
            None => return Ok(Outcome::Cancelled),
        }
    }
}

/// Route every segment of one page through the classifier, then verify the
/// page checksum. Returns the page sequence number, or `None` when the
/// cancel flag was observed mid-page (the page is abandoned unverified).
fn process_page<R: Read>(
    shared: &PlayerShared,
    sinks: &mut SinkManager<'_>,
    classifier: &mut PacketClassifier,
    decoder: &mut dyn VoiceDecoder,
    mut segments: PageSegments<'_, R>,
    pcm: &mut Vec<i16>,
    params: &mut StreamParams,
) -> Result<Option<u32>, PlayerError> {
    loop {
        if let Checkpoint::Cancelled = checkpoint(shared, sinks) {
            return Ok(None);
        }
        let Some(packet) = segments.next_segment()? else {
            break;
        };

        match classifier.classify(packet) {
            Classified::Header(header) => {
                log::info!(
                    "speex stream: version=\"{}\", rate={}Hz, mode={}, ch={}, frame_size={}, vbr={}, frames/packet={}",
                    header.version,
                    header.sample_rate,
                    header.mode,
                    header.channels,
                    header.frame_size,
                    header.vbr,
                    header.frames_per_packet,
                );
                params.sample_rate = header.sample_rate;
                params.channels = header.channels.max(1);
                let samples =
                    header.frame_size.max(1) as usize * header.frames_per_packet.max(1) as usize;
                pcm.resize(samples, 0);

                sinks
                    .ensure_open(params.sample_rate, params.channels)
                    .map_err(|e| PlayerError::SinkUnavailable(e.to_string()))?;
                shared.notify(&ProgressEvent::HeaderParsed {
                    sample_rate: header.sample_rate,
                    channels: header.channels,
                    frame_size: header.frame_size,
                });
            }
            Classified::HeaderRejected => {
                log::warn!("first packet is not a Speex header, retrying on the next packet");
            }
            Classified::Comment => {
                log::debug!("skipping comment packet ({} bytes)", packet.len());
            }
            Classified::Voice => match decoder.decode(packet, pcm) {
                Ok(0) => {}
                Ok(count) => {
                    // The sink may have been released by a pause; re-acquire
                    // it lazily with the parameters from the header.
                    let sink = sinks
                        .ensure_open(params.sample_rate, params.channels)
                        .map_err(|e| PlayerError::SinkUnavailable(e.to_string()))?;
                    sink.write(&pcm[..count])
                        .map_err(|e| PlayerError::SinkUnavailable(e.to_string()))?;
                    sink.set_volume(MAX_VOLUME);
                    sink.play()
                        .map_err(|e| PlayerError::SinkUnavailable(e.to_string()))?;
                }
                Err(e) => {
                    // A single undecodable frame is treated like an empty
                    // one: no sink write, keep streaming.
                    log::warn!("dropping undecodable voice frame: {}", e);
                }
            },
        }
    }

    let info = segments.finish()?;
    Ok(Some(info.sequence))
}

/// Observe the cancel and pause flags.
///
/// While paused the sink is released eagerly and the worker blocks on the
/// condvar; it is woken by unpause or cancel.
fn checkpoint(shared: &PlayerShared, sinks: &mut SinkManager<'_>) -> Checkpoint {
    if shared.cancelled.load(Ordering::Relaxed) {
        return Checkpoint::Cancelled;
    }

    let mut paused = shared.paused.lock().unwrap();
    if *paused {
        sinks.release();
        shared.set_state(PlayerState::Paused);
        while *paused {
            if shared.cancelled.load(Ordering::Relaxed) {
                return Checkpoint::Cancelled;
            }
            paused = shared.unpaused.wait(paused).unwrap();
        }
        shared.set_state(PlayerState::Streaming);
    }
    Checkpoint::Continue
}
