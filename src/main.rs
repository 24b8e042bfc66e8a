use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use retrorec::annotations::{MaskZone, ToolMode};
use retrorec::sources::{SyntheticAudioSource, SyntheticFrameSource};
use retrorec::writer::FfmpegSink;
use retrorec::{RecorderConfig, RecorderEngine, RecorderState};

#[derive(Parser, Debug)]
#[command(name = "retrorec")]
#[command(about = "Screen recorder with a retroactive privacy-mask window")]
#[command(version)]
#[command(
    long_about = "A desktop screen recorder built around a pre-roll ring buffer: \
the most recent seconds of capture stay in memory before being written out, so \
privacy masks (mosaic, blur) can be applied retroactively to frames that are \
already captured but not yet committed to the output file."
)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "retrorec.toml",
        help = "Path to TOML configuration file"
    )]
    config: String,

    /// Override the output filename
    #[arg(short, long, help = "Output filename (default: Rec_YYYYMMDD_HHMMSS.mp4)")]
    output: Option<String>,

    /// Override the capture frame rate
    #[arg(long, help = "Capture frame rate")]
    fps: Option<u32>,

    /// Record for a fixed number of seconds, then exit
    #[arg(
        short,
        long,
        help = "Non-interactive mode: start immediately, record N seconds, stop"
    )]
    duration: Option<u64>,

    /// Use a 440 Hz test tone instead of silence for the audio track
    #[arg(long, help = "Fill the audio track with a test tone")]
    tone: bool,

    /// Enable debug logging (most verbose)
    #[arg(long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting retrorec v{}", env!("CARGO_PKG_VERSION"));

    let mut config = RecorderConfig::load_from_file(&args.config)?;
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some(output) = &args.output {
        config.output.filename = Some(output.clone());
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let (width, height) = config.video.resolution;
    let frame_source = SyntheticFrameSource::new(width, height, config.video.fps);
    let audio_source = if args.tone {
        SyntheticAudioSource::tone(config.audio.sample_rate, config.audio.channels)
    } else {
        SyntheticAudioSource::silence(config.audio.sample_rate, config.audio.channels)
    };
    let (encoder, muxer) =
        FfmpegSink::new(config.encoder.clone(), config.audio.bitrate_kbps).pair();

    let engine = RecorderEngine::new(config, frame_source, audio_source, encoder, muxer);
    engine.arm().await?;

    let result = match args.duration {
        Some(seconds) => run_fixed_duration(&engine, seconds).await,
        None => run_interactive(&engine).await,
    };

    engine.disarm().await?;
    result
}

/// Non-interactive mode: start immediately, record, stop, exit
async fn run_fixed_duration(engine: &RecorderEngine, seconds: u64) -> Result<()> {
    let path = engine.start().await?;
    info!("Recording {} seconds to {}", seconds, path.display());

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping early");
        }
    }

    let report = engine.stop().await?;
    println!(
        "Saved {} ({} ms, {} video frames, {} audio frames)",
        report.path.display(),
        report.duration_ms,
        report.video_frames,
        report.audio_frames
    );
    Ok(())
}

/// Keys understood by the interactive control loop
#[derive(Debug, Clone, Copy)]
enum ControlKey {
    StartStop,
    TogglePause,
    PenMode,
    MosaicMode,
    AddZone,
    AddStrokes,
    ApplyRetroactive,
    ClearEffects,
    Quit,
}

/// Interactive mode: a raw-mode keyboard loop drives the control surface
async fn run_interactive(engine: &RecorderEngine) -> Result<()> {
    print_controls();

    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let keyboard = spawn_keyboard_reader(key_tx, cancel.clone());

    loop {
        let key = tokio::select! {
            key = key_rx.recv() => match key {
                Some(key) => key,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => ControlKey::Quit,
        };

        match key {
            ControlKey::StartStop => match engine.state() {
                RecorderState::Idle => match engine.start().await {
                    Ok(path) => println!("\rRecording to {}", path.display()),
                    Err(e) => error!("Start failed: {}", e),
                },
                _ => match engine.stop().await {
                    Ok(report) => println!(
                        "\rSaved {} ({} ms, {} frames)",
                        report.path.display(),
                        report.duration_ms,
                        report.video_frames
                    ),
                    Err(e) => error!("Stop failed: {}", e),
                },
            },
            ControlKey::TogglePause => match engine.state() {
                RecorderState::Recording => {
                    engine.pause().await?;
                    println!("\rPaused at {} ms", engine.duration_ms());
                }
                RecorderState::Paused => {
                    engine.resume().await?;
                    println!("\rResumed");
                }
                state => debug!("Pause toggle ignored in {:?}", state),
            },
            ControlKey::PenMode => {
                engine.set_mode(ToolMode::Pen);
                println!("\rPen tool active");
            }
            ControlKey::MosaicMode => {
                engine.set_mode(ToolMode::Mosaic);
                println!("\rMosaic tool active");
            }
            ControlKey::AddZone => {
                // Center of the screen, demo stand-in for a mouse-drawn
                // rectangle
                let zone = center_zone();
                match engine.add_mask_zone(zone) {
                    Ok(()) => println!(
                        "\rMosaic zone added at ({}, {}) {}x{}",
                        zone.x, zone.y, zone.w, zone.h
                    ),
                    Err(e) => error!("Zone rejected: {}", e),
                }
            }
            ControlKey::AddStrokes => {
                // A short diagonal, demo stand-in for a mouse-drawn path
                let result = (0..20).try_for_each(|i| engine.add_stroke(40 + i * 4, 40 + i * 4));
                match result {
                    Ok(()) => println!("\rPen strokes added"),
                    Err(e) => error!("Strokes rejected: {}", e),
                }
            }
            ControlKey::ApplyRetroactive => {
                let frames = engine.apply_retroactive_mosaic().await;
                println!("\rRetroactive mask applied to {} buffered frames", frames);
            }
            ControlKey::ClearEffects => {
                engine.clear_effects();
                println!("\rEffects cleared");
            }
            ControlKey::Quit => {
                if engine.state().is_active() {
                    info!("Stopping active recording before exit");
                    if let Ok(report) = engine.stop().await {
                        println!("\rSaved {}", report.path.display());
                    }
                }
                break;
            }
        }
    }

    cancel.cancel();
    let _ = keyboard.await;
    Ok(())
}

fn center_zone() -> MaskZone {
    MaskZone::mosaic(320, 180, 640, 360)
}

/// Raw-mode keyboard reader on a blocking task
fn spawn_keyboard_reader(
    key_tx: mpsc::UnboundedSender<ControlKey>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = enable_raw_mode() {
            error!("Failed to enable raw mode for keyboard input: {}", e);
            return;
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {
                    if let Ok(Event::Key(key_event)) = event::read() {
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        let key = match key_event.code {
                            KeyCode::Char('r') => Some(ControlKey::StartStop),
                            KeyCode::Char(' ') => Some(ControlKey::TogglePause),
                            KeyCode::Char('p') => Some(ControlKey::PenMode),
                            KeyCode::Char('m') => Some(ControlKey::MosaicMode),
                            KeyCode::Char('z') => Some(ControlKey::AddZone),
                            KeyCode::Char('d') => Some(ControlKey::AddStrokes),
                            KeyCode::Char('x') => Some(ControlKey::ApplyRetroactive),
                            KeyCode::Char('c') => Some(ControlKey::ClearEffects),
                            KeyCode::Char('q') | KeyCode::Esc => Some(ControlKey::Quit),
                            _ => None,
                        };
                        if let Some(key) = key {
                            let is_quit = matches!(key, ControlKey::Quit);
                            if key_tx.send(key).is_err() || is_quit {
                                break;
                            }
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Error polling for keyboard events: {}", e);
                }
            }
        }

        if let Err(e) = disable_raw_mode() {
            error!("Failed to disable raw mode: {}", e);
        }
    })
}

fn print_controls() {
    println!("=== retrorec controls ===");
    println!("  r      start / stop recording");
    println!("  space  pause / resume");
    println!("  p      pen tool");
    println!("  m      mosaic tool");
    println!("  z      add mosaic zone (screen center)");
    println!("  d      add demo pen strokes");
    println!("  x      apply retroactive mask to buffered frames");
    println!("  c      clear effects");
    println!("  q/esc  quit");
    println!("=========================");
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("retrorec={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(args.debug)
            .with_thread_ids(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# retrorec configuration file");
    println!("# Built-in defaults; override in TOML or RETROREC_* env vars");
    println!();

    let default_config = RecorderConfig::default();
    match toml::to_string_pretty(&default_config) {
        Ok(toml_str) => println!("{}", toml_str),
        Err(e) => eprintln!("Failed to render default config: {}", e),
    }
}
