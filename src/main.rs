use std::env;
use std::path::Path;
use std::process;
use std::time::Duration;

use sakkyoku::output::{self, OutputDevice};
use sakkyoku::{EngineConfig, EngineUpdate, Song, spawn_engine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "sakkyoku=info";
const CONFIG_ENV: &str = "SAKKYOKU_CONFIG";

fn setup_tracing() {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::builder().parse_lossy(directives))
        .init();
}

fn main() {
    setup_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: sakkyoku <song.ron> [track] [from-beat]");
        eprintln!("       sakkyoku --ports");
        process::exit(1);
    }

    if let Err(e) = run(&args) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::var(CONFIG_ENV) {
        Ok(path) => EngineConfig::load(Path::new(&path))?,
        Err(_) => EngineConfig::default(),
    };

    if args[1] == "--ports" {
        for (i, name) in output::list_output_ports(&config.client_name)?.iter().enumerate() {
            println!("  {i}: {name}");
        }
        return Ok(());
    }

    let song = Song::load(Path::new(&args[1]))?;
    let track_index: usize = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(0);
    let from_beat: f64 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(0.0);

    let tracks = song.to_tracks()?;
    let track = tracks
        .get(track_index)
        .ok_or_else(|| format!("song has no track {track_index}"))?;

    let device = output::connect_output(&config.client_name, config.output_port.as_deref())?;
    info!(port = device.name(), track = track_index, from_beat, "playing");
    let engine = spawn_engine(&config, Some(Box::new(device)));

    engine.start(track, song.tempo, from_beat)?;

    for update in engine.update_rx.iter() {
        match update {
            EngineUpdate::SessionFinished { .. } => break,
            EngineUpdate::PlaybackState { running: false } => break,
            EngineUpdate::PlaybackState { running: true } => {}
            EngineUpdate::DeliveryFailed { message } => warn!("{message}"),
            EngineUpdate::Error { message } => return Err(message.into()),
        }
    }

    // the last note-off is due when the session finishes; give the output
    // thread a moment to send it
    std::thread::sleep(Duration::from_millis(config.tick_interval_ms));
    engine.shutdown();
    Ok(())
}
