use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{info, warn};

use echoloop::display;
use echoloop::events::{CompletionEvent, CompletionSink, JsonLinesSink};
use echoloop::{Args, Config};

/// Sessions shorter than this are not reported as completed exercises.
const MIN_REPORTED_SECS: f64 = 1.0;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "echoloop", &mut std::io::stdout());
        return Ok(());
    }

    if args.init_config {
        let path = Config::init_default_config()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    init_logging()?;
    info!("Starting Echoloop in {:?} mode", args.mode);

    // Load config: explicit path > XDG default > built-in defaults
    let config_path = args.config.clone().or_else(Config::default_path);
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    config.merge_args(&args);
    config.validate()?;

    let baseline = config.clone();
    let outcome = display::terminal::run(config, args.mode).await?;

    let seconds = outcome.practiced.as_secs_f64();
    if seconds >= MIN_REPORTED_SECS {
        match JsonLinesSink::default_path() {
            Some(path) => {
                let event = CompletionEvent::new(args.mode.exercise_type(), seconds.round());
                if let Err(e) = JsonLinesSink::new(path).record(&event) {
                    warn!("Failed to record completed session: {:#}", e);
                }
            }
            None => warn!("No data directory; session not recorded"),
        }
    }

    if let Some(path) = config_path {
        if let Err(e) = outcome.config.persist_practice_settings(&baseline, &path) {
            warn!("Failed to save practice settings: {:#}", e);
        }
    }

    Ok(())
}

/// Log to a file in the data dir; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("echoloop=info".parse()?);

    let Some(dir) = dirs::data_dir().map(|p| p.join("echoloop")) else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::sink).init();
        return Ok(());
    };
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("echoloop.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
