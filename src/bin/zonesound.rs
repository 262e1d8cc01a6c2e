//! zonesound CLI
//!
//! Usage:
//!   zonesound --zones zones.geojson --walk walk.json --ticks 40 --out walk.wav
//!   zonesound --zones zones.geojson --store-url https://host/api/geo --samples ./audio
//!
//! With `--ticks 0` the driver runs in real time until Ctrl-C.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use log::{error, info};

use zonesound_core::VERSION;
use zonesound_core::assets::{FsSampleSource, HttpSampleSource, SampleSource};
use zonesound_core::config::{EngineConfig, SoundMode};
use zonesound_core::driver::{Driver, TickOutcome};
use zonesound_core::engine::Engine;
use zonesound_core::error::{DecodeFailure, LocationFetchError, ZoneSoundError};
use zonesound_core::location::{HttpLocationStore, LocationStore, ReplayLocationStore};
use zonesound_core::output::{AudioOutput, NullOutput, WavOutput};
use zonesound_core::zones::Point;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Click,
    Loop,
}

impl From<ModeArg> for SoundMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Click => SoundMode::Click,
            ModeArg::Loop => SoundMode::Loop,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "zonesound",
    version = VERSION,
    about = "Play zones as sound while people walk through them"
)]
struct Args {
    /// GeoJSON FeatureCollection of zone polygons
    #[arg(long)]
    zones: PathBuf,

    /// Engine configuration (JSON, camelCase keys)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Location store endpoint returning a FeatureCollection of paths
    #[arg(long, conflicts_with = "walk")]
    store_url: Option<String>,

    /// Recorded walk (JSON array of {lng, lat, t}) replayed one point per tick
    #[arg(long)]
    walk: Option<PathBuf>,

    /// Directory holding loop samples
    #[arg(long, default_value = ".")]
    samples: PathBuf,

    /// Base URL serving loop samples (overrides --samples)
    #[arg(long)]
    samples_url: Option<String>,

    /// Number of ticks to render; 0 runs in real time until Ctrl-C
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Render into this WAV file instead of discarding audio
    #[arg(long)]
    out: Option<PathBuf>,

    /// Sound mode, overriding the config
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn init_logging(level: &str) -> Result<LoggerHandle, String> {
    let level = normalize_level(level)?;
    Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .format_for_stderr(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))
}

/// Sample source picked from the command line.
enum Samples {
    Dir(FsSampleSource),
    Http(HttpSampleSource),
}

impl SampleSource for Samples {
    fn fetch(&self, sample_id: u32) -> impl Future<Output = Result<Vec<u8>, DecodeFailure>> + Send {
        async move {
            match self {
                Samples::Dir(source) => source.fetch(sample_id).await,
                Samples::Http(source) => source.fetch(sample_id).await,
            }
        }
    }
}

/// Location store picked from the command line.
enum Store {
    Http(HttpLocationStore),
    Replay(ReplayLocationStore),
}

impl LocationStore for Store {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        async move {
            match self {
                Store::Http(store) => store.current_positions().await,
                Store::Replay(store) => store.current_positions().await,
            }
        }
    }
}

fn build(args: &Args) -> Result<(Engine<Samples>, Store), String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }

    let samples = match &args.samples_url {
        Some(url) => Samples::Http(HttpSampleSource::new(url, config.sample_pattern.clone())?),
        None => Samples::Dir(FsSampleSource::new(&args.samples, config.sample_pattern.clone())),
    };

    let store = match (&args.store_url, &args.walk) {
        (Some(url), _) => Store::Http(HttpLocationStore::new(url).map_err(|e| e.to_string())?),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("{}: {e}", path.display()))?;
            Store::Replay(ReplayLocationStore::from_json_str(&text).map_err(|e| e.to_string())?)
        }
        (None, None) => return Err("either --store-url or --walk is required".to_string()),
    };

    let geojson = std::fs::read_to_string(&args.zones)
        .map_err(|e| format!("{}: {e}", args.zones.display()))?;
    let engine = Engine::from_geojson(config, &geojson, samples)
        .map_err(|e: ZoneSoundError| e.to_string())?;
    Ok((engine, store))
}

async fn drive<O: AudioOutput>(engine: Engine<Samples>, store: Store, output: O, ticks: u64) {
    let mut driver = Driver::new(engine, store, output);
    driver.start();

    if ticks > 0 {
        let mut skipped = 0;
        for outcome in driver.run_ticks(ticks).await {
            if let TickOutcome::Skipped(_) = outcome {
                skipped += 1;
            }
        }
        driver.halt();
        info!("event=render_done module=cli ticks={ticks} skipped={skipped}");
    } else {
        let handle = driver.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.halt();
            }
        });
        driver.run().await;
    }

    match serde_json::to_string_pretty(&driver.status()) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("event=status module=cli status=error error={e}"),
    }
    driver.output_mut().close();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _logger = match init_logging(&args.log_level) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (engine, store) = match build(&args) {
        Ok(parts) => parts,
        Err(e) => {
            error!("event=startup module=cli status=error error={e}");
            return ExitCode::FAILURE;
        }
    };
    let sample_rate = engine.config().sample_rate;

    match &args.out {
        Some(path) => match WavOutput::create_file(path, sample_rate) {
            Ok(output) => drive(engine, store, output, args.ticks).await,
            Err(e) => {
                error!("event=startup module=cli status=error path={} error={e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => drive(engine, store, NullOutput::new(sample_rate), args.ticks).await,
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_level_accepts_known_values() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level(" warning ").unwrap(), "warn");
        assert!(normalize_level("loud").is_err());
    }

    #[test]
    fn args_parse_a_walk_render() {
        let args = Args::try_parse_from([
            "zonesound", "--zones", "z.geojson", "--walk", "w.json", "--ticks", "8", "--mode", "click",
        ])
        .unwrap();
        assert_eq!(args.ticks, 8);
        assert!(matches!(args.mode, Some(ModeArg::Click)));
        assert!(args.store_url.is_none());
    }

    #[test]
    fn store_url_and_walk_conflict() {
        let parsed = Args::try_parse_from([
            "zonesound", "--zones", "z", "--walk", "w", "--store-url", "http://x",
        ]);
        assert!(parsed.is_err());
    }
}
