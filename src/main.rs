//! # Prayer Clock Application Entry Point
//!
//! This binary wires the configuration, location provider and remote service into
//! an [`Engine`] and prints the resulting prayer times and countdown.
//!
//! ## Usage
//! - `prayer-clock`: keep running, reprint whenever the countdown changes; type
//!   `r` + Enter to re-resolve the location and refetch, `q` + Enter or Ctrl-C to quit
//! - `prayer-clock --once`: print one result and exit (non-zero on failure)
//! - `--config <path>`: read settings from `<path>` instead of `prayer-config.toml`

use anyhow::Context;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use prayer_clock_lib::config::Config;
use prayer_clock_lib::engine::{Engine, EngineSettings};
use prayer_clock_lib::location::ConfiguredLocator;
use prayer_clock_lib::remote::AladhanClient;
use prayer_clock_lib::renderer::draw_ascii;
use prayer_clock_lib::EngineState;

struct Args {
    once: bool,
    config_path: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        once: false,
        config_path: None,
    };
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" => args.once = true,
            "--config" => {
                args.config_path = Some(iter.next().context("--config needs a path")?);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = match &args.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args.once))
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let locator = ConfiguredLocator::from_config(&config.location)
        .context("failed to set up location provider")?;
    let remote = if config.remote.enabled {
        Some(AladhanClient::new(&config.remote).context("failed to set up HTTP client")?)
    } else {
        None
    };

    let engine = Engine::spawn(locator, remote, EngineSettings::from(&config));
    let mut updates = engine.subscribe();

    if once {
        let snapshot = updates
            .wait_for(|s| s.state != EngineState::Loading)
            .await?
            .clone();
        draw_ascii(&snapshot);
        engine.shutdown().await;
        if let EngineState::Error { message } = snapshot.state {
            anyhow::bail!(message);
        }
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                changed?;
                let snapshot = updates.borrow_and_update().clone();
                draw_ascii(&snapshot);
            }
            line = stdin.next_line(), if stdin_open => match line?.as_deref().map(str::trim) {
                Some("r") => engine.refresh(),
                Some("q") => break,
                Some(_) => {}
                // No terminal attached; keep running until Ctrl-C
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown().await;
    Ok(())
}
