//! story-reader: read folk tales aloud, sentence by sentence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rodio::{OutputStream, OutputStreamBuilder};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use story_reader::api::{start_api, ApiState};
use story_reader::config::{Config, VisualizerConfig};
use story_reader::player::AudioPlayer;
use story_reader::preferences::Preferences;
use story_reader::service::{ReaderHandle, ReaderParts, ReaderService};
use story_reader::speech::espeak::{EspeakSynth, EspeakVoices};
use story_reader::speech::remote::RemoteTts;
use story_reader::story::{Category, StoryLibrary};
use story_reader::track::NarrationTrack;
use story_reader::visualizer::analyser::{AudioGraph, OutputId};
use story_reader::visualizer::{run_frames, TerminalMeter, Visualizer};
use story_reader::voice::discovery::{discover, VoiceDiscovery};
use story_reader::voice::VoiceRegistry;

const METER_COLUMNS: usize = 48;

#[derive(Parser, Debug)]
#[command(name = "story-reader", about = "Folk-tale reader with spoken narration")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stories in the library
    Stories {
        #[arg(long, value_enum)]
        category: Option<Category>,

        /// Only titles containing this text
        #[arg(long, default_value = "")]
        search: String,
    },
    /// List narration voices (presets and on-device)
    Voices,
    /// Read one story aloud
    Read {
        /// Story id
        story: String,

        /// Voice id; saved as the preferred voice
        #[arg(long)]
        voice: Option<String>,

        /// Play the pre-generated narration track instead
        #[arg(long)]
        track: bool,

        /// Read this text file in place of the story's own text
        #[arg(long, value_name = "PATH")]
        content_file: Option<PathBuf>,

        /// Write the story's narration track to this WAV file and exit
        #[arg(long, value_name = "PATH")]
        save_track: Option<PathBuf>,

        /// Draw a spectrum meter on stderr
        #[arg(long)]
        meter: bool,
    },
    /// Run the reader behind the HTTP control API
    Serve,
}

/// Running reader plus the audio stream it plays through.
struct Reader {
    // Dropping the stream silences every player.
    _stream: OutputStream,
    handle: ReaderHandle,
    graph: AudioGraph,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,rodio=info,reqwest=info,hyper_util=info")
    } else {
        EnvFilter::new("info,rodio=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());

    match args.command {
        Command::Stories { category, search } => {
            let library = load_library(&config);
            let shown = library.filter(category, &search);
            for story in &shown {
                println!("{:<16} {:<10} {}", story.id, story.category, story.title);
            }
            info!("{} of {} stories", shown.len(), library.stories().len());
        }
        Command::Voices => {
            let mut registry = VoiceRegistry::default();
            let source = EspeakVoices::new(&config.device);
            registry.refresh(discover(&source, &config.reader.language).await);
            let preferences = Preferences::new(&config.preferences);
            let selected = preferences
                .load_voice()
                .unwrap_or_else(|| config.reader.default_voice.clone());
            for voice in registry.voices() {
                let marker = if voice.id == selected { "*" } else { " " };
                println!("{marker} {:<28} {:<10} {}", voice.id, voice.backend, voice.display_name);
            }
            if let Some(path) = preferences.path() {
                info!("Preferred voice is stored in {}", path.display());
            }
        }
        Command::Read {
            story,
            voice,
            track,
            content_file,
            save_track,
            meter,
        } => {
            let reader = start_reader(&config)?;
            reader.handle.select_story(&story).await?;

            if let Some(path) = save_track {
                reader.handle.save_track(&path).await?;
                println!("Saved narration for {story} to {}", path.display());
                return Ok(());
            }
            if let Some(path) = content_file {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
                reader.handle.set_content(text).await?;
            }

            if meter || config.visualizer.enabled {
                spawn_meter(&reader, &config.visualizer);
            }
            read_story(&reader.handle, &config, &story, voice.as_deref(), track).await?;
        }
        Command::Serve => {
            let reader = start_reader(&config)?;
            if config.visualizer.enabled {
                spawn_meter(&reader, &config.visualizer);
            }
            if config.api.enabled {
                let state = ApiState {
                    reader: reader.handle.clone(),
                };
                start_api(state, config.api.port).await;
            } else {
                warn!("API disabled in config; nothing will drive the reader");
            }
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            reader.handle.stop().await?;
        }
    }

    Ok(())
}

fn load_library(config: &Config) -> StoryLibrary {
    StoryLibrary::load(Path::new(&config.reader.stories_path)).unwrap_or_else(|e| {
        warn!("{e}; starting with an empty library");
        StoryLibrary::default()
    })
}

/// Open audio, wire players, backends and discovery, and spawn the service.
fn start_reader(config: &Config) -> Result<Reader, Box<dyn std::error::Error>> {
    let mut stream = OutputStreamBuilder::open_default_stream()
        .map_err(|e| format!("Failed to open audio output: {e}"))?;
    stream.log_on_drop(false);
    let mixer = stream.mixer().clone();

    let remote_player = Arc::new(AudioPlayer::new(OutputId(1), mixer.clone(), &config.player));
    let device_player = Arc::new(AudioPlayer::new(OutputId(2), mixer.clone(), &config.player));
    let track_player = Arc::new(AudioPlayer::new(OutputId(3), mixer, &config.player));

    let graph = AudioGraph::new(&config.visualizer);
    for player in [&remote_player, &device_player, &track_player] {
        graph.attach(&**player);
    }

    let remote = Arc::new(RemoteTts::new(&config.remote, remote_player)?);
    let device = Arc::new(EspeakSynth::new(&config.device, device_player));
    let track = Arc::new(NarrationTrack::new(track_player));

    let (voices_tx, voices_rx) = mpsc::channel(4);
    let discovery = VoiceDiscovery::new(
        Arc::new(EspeakVoices::new(&config.device)),
        &config.reader.language,
        &config.discovery,
    );
    tokio::spawn(discovery.run(voices_tx));

    let parts = ReaderParts {
        registry: VoiceRegistry::default(),
        library: load_library(config),
        preferences: Preferences::new(&config.preferences),
        remote,
        device,
        track,
    };
    let (service, handle) = ReaderService::new(&config.reader, parts, voices_rx);
    tokio::spawn(service.run());

    Ok(Reader {
        _stream: stream,
        handle,
        graph,
    })
}

/// Drive a terminal meter from whether anything is audible.
fn spawn_meter(reader: &Reader, config: &VisualizerConfig) {
    let (active_tx, active_rx) = watch::channel(false);
    let mut status = reader.handle.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let audible = status.borrow_and_update().is_audible();
            active_tx.send_if_modified(|active| {
                let changed = *active != audible;
                *active = audible;
                changed
            });
        }
    });

    let visualizer = Visualizer::new(reader.graph.analyser(), config);
    let meter = TerminalMeter::stderr(METER_COLUMNS, config.width, config.height);
    let interval = Duration::from_millis(config.frame_interval_ms.max(1));
    tokio::spawn(run_frames(visualizer, active_rx, meter, interval));
}

async fn read_story(
    handle: &ReaderHandle,
    config: &Config,
    story: &str,
    voice: Option<&str>,
    track: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut status = handle.subscribe();

    if let Some(voice) = voice {
        // On-device voices only show up once discovery has run.
        let wanted = voice.to_string();
        let found = tokio::time::timeout(
            config.discovery.poll_window(),
            status.wait_for(|s| s.voices.iter().any(|v| v.id == wanted)),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        if !found {
            warn!("Voice {voice} not found yet");
        }
        handle.set_voice(voice).await?;
    }

    if track {
        handle.play_track().await?;
        tokio::select! {
            _ = status.wait_for(|s| !s.track_playing) => {}
            _ = tokio::signal::ctrl_c() => handle.pause_track().await?,
        }
        return Ok(());
    }

    let total = handle.status().sentence_count;
    if total == 0 {
        return Err(format!("Story {story} has no text").into());
    }

    handle.start().await?;
    status.wait_for(|s| s.is_reading).await?;
    let mut last = None;
    loop {
        let current = status.borrow_and_update().clone();
        if !current.is_reading {
            break;
        }
        if current.current_index != last {
            if let (Some(i), Some(sentence)) = (current.current_index, &current.current_sentence) {
                println!("[{}/{total}] {sentence}", i + 1);
            }
            last = current.current_index;
        }
        tokio::select! {
            changed = status.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await?;
                break;
            }
        }
    }
    Ok(())
}
