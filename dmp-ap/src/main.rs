//! Audio Player (dmp-ap) - Main entry point
//!
//! Command-line front end for the playback pipeline: list devices, play files or a
//! station on a real device, or render a file through the loopback device into a WAV.
//! Player events are printed to stdout as JSON lines.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dmp_ap::audio::loopback::LoopbackBackend;
use dmp_ap::audio::types::{f32_to_i16, f32_to_i24_left_justified, BitDepth};
use dmp_ap::audio::HostKind;
use dmp_ap::audio::SymphoniaDecoderFactory;
use dmp_ap::dsp::{BandCount, EqualizerPreset};
use dmp_ap::stream::HttpConnector;
use dmp_ap::{Player, PlayerConfig, Station, Track};
use dmp_common::{PlayMode, PlayerEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dmp-ap
#[derive(Parser, Debug)]
#[command(name = "dmp-ap")]
#[command(about = "Desktop media player audio pipeline")]
#[command(version = version_string())]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DMP_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, env = "DMP_DEVICE")]
    device: Option<String>,

    /// Use the pro-audio host (JACK/ASIO) instead of the shared mixer
    #[arg(long)]
    pro_audio: bool,

    /// Preferred output bit depth (16 or 24)
    #[arg(long)]
    bit_depth: Option<u16>,

    /// Use the 31-band equalizer layout
    #[arg(long)]
    eq31: bool,

    /// Equalizer preset to enable (flat, rock, pop, jazz, classical, bass_boost, vocal, electronic)
    #[arg(long)]
    preset: Option<EqualizerPreset>,

    /// User volume in dB
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    volume: f32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List output devices of the selected backend
    Devices,
    /// Play files in order, each queued and preloaded while the previous one plays
    Play {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Play an internet radio station until interrupted
    Radio { url: String },
    /// Render a file through the loopback device into a WAV file
    Render {
        path: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn version_string() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("DMP_GIT_HASH"),
        ", ",
        env!("DMP_BUILD_PROFILE"),
        ", built ",
        env!("DMP_BUILD_TIMESTAMP"),
        ")"
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PlayerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dmp_ap={0},dmp_common={0}", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("dmp-ap {}", version_string());

    match &args.command {
        Command::Devices => list_devices(config),
        Command::Play { paths } => play_files(config, &args, paths.clone()).await,
        Command::Radio { url } => play_radio(config, &args, url.clone()).await,
        Command::Render { path, out } => render_file(config, &args, path, out).await,
    }
}

fn apply_overrides(config: &mut PlayerConfig, args: &Args) -> Result<()> {
    if let Some(device) = &args.device {
        config.device = Some(device.clone());
    }
    if args.pro_audio {
        config.backend = HostKind::ProAudio;
    }
    if let Some(bits) = args.bit_depth {
        config.preferred_bit_depth = match BitDepth::from_bits(bits) {
            Some(depth) => depth,
            None => bail!("--bit-depth must be 16 or 24, got {}", bits),
        };
    }
    if args.eq31 {
        config.equalizer_bands = BandCount::ThirtyOne;
    }
    Ok(())
}

fn apply_sound_settings(player: &Player, args: &Args) {
    player.set_volume_db(args.volume);
    if let Some(preset) = args.preset {
        player.apply_preset(preset);
    }
}

fn list_devices(config: PlayerConfig) -> Result<()> {
    let player = Player::from_config(config).context("Failed to initialize player")?;
    for device in player.list_devices().context("Failed to enumerate devices")? {
        println!("{}", device);
    }
    player.shutdown();
    Ok(())
}

fn print_event(event: &PlayerEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Unprintable event: {}", e),
    }
}

async fn play_files(config: PlayerConfig, args: &Args, paths: Vec<PathBuf>) -> Result<()> {
    let player = Player::from_config(config).context("Failed to initialize player")?;
    apply_sound_settings(&player, args);
    let mut events = player.subscribe();

    let mut queue: VecDeque<Track> = paths.into_iter().map(Track::from_file).collect();
    let Some(first) = queue.pop_front() else {
        bail!("No files to play");
    };

    let control = Arc::clone(&player);
    tokio::task::spawn_blocking(move || control.play(first))
        .await
        .context("Playback task panicked")?
        .context("Failed to start playback")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if let PlayerEvent::TrackStarted { path, .. } = &event {
                        if let Some(year) = player.release_year() {
                            info!("{} released {}", path.display(), year);
                        }
                        if let Some(next) = queue.pop_front() {
                            queue_next(&player, next).await;
                        }
                    }
                    if matches!(event, PlayerEvent::AllTracksEnded { .. }) {
                        break;
                    }
                    if matches!(event, PlayerEvent::TrackFailed { .. }) && player.mode() == PlayMode::Stopped {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || player.shutdown())
        .await
        .context("Shutdown task panicked")?;
    Ok(())
}

/// Queue `next` behind the playing track and decode it ahead for a gapless advance
async fn queue_next(player: &Arc<Player>, next: Track) {
    let player = Arc::clone(player);
    let queued = tokio::task::spawn_blocking(move || {
        player.set_next_track(Some(next.clone()));
        if let Err(e) = player.preload_next_track(&next) {
            warn!("Preload of {} failed: {}", next.path.display(), e);
        }
    })
    .await;
    if let Err(e) = queued {
        warn!("Queue task failed: {}", e);
    }
}

async fn play_radio(config: PlayerConfig, args: &Args, url: String) -> Result<()> {
    let player = Player::from_config(config).context("Failed to initialize player")?;
    apply_sound_settings(&player, args);
    let mut events = player.subscribe();

    player
        .play_station(Station::new(url))
        .context("Failed to start station")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, PlayerEvent::RadioFailed { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || player.shutdown())
        .await
        .context("Shutdown task panicked")?;
    Ok(())
}

async fn render_file(config: PlayerConfig, args: &Args, path: &Path, out: &Path) -> Result<()> {
    let track = Track::from_file(path);
    let out = out.to_path_buf();
    let args_volume = args.volume;
    let preset = args.preset;

    tokio::task::spawn_blocking(move || -> Result<()> {
        let backend = LoopbackBackend::new();
        let player = Player::new(
            config,
            Arc::new(backend.clone()),
            Arc::new(SymphoniaDecoderFactory),
            Arc::new(HttpConnector),
        )
        .context("Failed to initialize player")?;
        player.set_volume_db(args_volume);
        if let Some(preset) = preset {
            player.apply_preset(preset);
        }
        let mut events = player.subscribe();

        player
            .play(track.clone())
            .with_context(|| format!("Failed to play {}", track.path.display()))?;
        let format = match backend.active_format() {
            Some(format) => format,
            None => bail!("Loopback device did not open"),
        };

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bit_depth.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&out, spec)
            .with_context(|| format!("Failed to create {}", out.display()))?;

        // Pulls are paced so decoding stays ahead of the loopback device
        let limit = player.duration().unwrap_or(Duration::from_secs(600)) + Duration::from_secs(5);
        let started = Instant::now();
        let mut buffer = Vec::new();
        let mut written = 0u64;
        'render: loop {
            backend.pull_into(backend.active_buffer_frames().unwrap_or(512) as usize, &mut buffer);
            for &sample in &buffer {
                match format.bit_depth {
                    BitDepth::Bits16 => writer.write_sample(f32_to_i16(sample))?,
                    BitDepth::Bits24 => writer.write_sample(f32_to_i24_left_justified(sample) >> 8)?,
                }
            }
            written += buffer.len() as u64;

            while let Ok(event) = events.try_recv() {
                print_event(&event);
                if matches!(
                    event,
                    PlayerEvent::TrackEnded { .. } | PlayerEvent::AllTracksEnded { .. } | PlayerEvent::TrackFailed { .. }
                ) {
                    break 'render;
                }
            }
            if player.elapsed() > limit || started.elapsed() > limit {
                warn!("Render stopped at the time limit");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        writer.finalize().context("Failed to finish WAV file")?;
        let diagnostics = player.diagnostics();
        info!(
            "Rendered {} samples to {} ({} underruns)",
            written,
            out.display(),
            diagnostics.underruns
        );
        player.shutdown();
        Ok(())
    })
    .await
    .context("Render task panicked")?
}
