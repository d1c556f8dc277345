//! Command-line player: decode an Ogg/Speex file to the ALSA output.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use speex_player_rs::{
    AlsaSinkFactory, PlayerConfig, ProgressEvent, ProgressListener, SpeexDecoderFactory,
    SpeexMode, SpeexPlayer,
};

#[derive(Parser)]
#[command(name = "speex_player_rs", about = "Play an Ogg/Speex voice recording through ALSA")]
struct Cli {
    /// Input file (.spx / .ogg)
    file: PathBuf,

    /// ALSA playback device override
    #[arg(long)]
    device: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

struct LogProgress;

impl ProgressListener for LogProgress {
    fn on_progress(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::HeaderParsed {
                sample_rate,
                channels,
                frame_size,
            } => log::info!(
                "stream parameters: {}Hz, {} channel(s), {} samples/frame",
                sample_rate,
                channels,
                frame_size,
            ),
            ProgressEvent::PageDecoded { sequence } => log::debug!("page {} done", sequence),
            ProgressEvent::Finished => log::info!("end of stream"),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    if let Some(device) = cli.device {
        config.device = device;
    }

    let file = File::open(&cli.file)
        .with_context(|| format!("Failed to open {}", cli.file.display()))?;
    let source = BufReader::new(file);

    let mut player = SpeexPlayer::new(
        Box::new(SpeexDecoderFactory::new(
            SpeexMode::Narrowband,
            config.enhanced_decode,
        )),
        Box::new(AlsaSinkFactory::new(&config.device, config.period_size)),
    );
    player.add_progress_listener(Box::new(LogProgress));

    // Real-time audio runs on a dedicated OS thread
    let worker = thread::Builder::new()
        .name("speex-play".into())
        .spawn(move || player.decode(source))?;

    match worker.join() {
        Ok(Ok(outcome)) => {
            log::info!("playback {:?}", outcome);
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("playback thread panicked"),
    }
}
