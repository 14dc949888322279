//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use segbuf_core::source::HttpMediaClient;
use segbuf_core::{CancelFlag, Collaborators, FileId, SegbufConfig, open_session};
use segbuf_sim::{
    HeadlessStream, PlaybackPlan, SCENARIO_NAMES, Scenario, ScheduledSeek, drive, run_simulation,
};
use serde::Serialize;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Play a file from a segment server into a headless decoder
    Play {
        /// Identifier of the media file on the server
        file_id: String,
        /// Server base URL (defaults to SEGBUF_BASE_URL or the built-in default)
        #[arg(long)]
        base_url: Option<String>,
        /// Media seconds played per wall-clock second
        #[arg(long, default_value = "1.0")]
        speed: f64,
        /// Seek performed during playback, as AT:TO in seconds (repeatable)
        #[arg(long = "seek", value_parser = parse_seek)]
        seeks: Vec<ScheduledSeek>,
        /// Simulated decode throughput in bytes per second
        #[arg(long, default_value = "50000000")]
        decode_rate: u64,
        /// Stop after this many wall-clock seconds
        #[arg(long, default_value = "600")]
        max_seconds: u64,
    },
    /// Run a simulated playback scenario and print its report
    Simulate {
        /// Scenario name
        #[arg(short, long, default_value = "steady")]
        scenario: String,
        /// Seed for the simulated network
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Override the scenario's segment failure probability
        #[arg(long)]
        failure_rate: Option<f64>,
        /// Override the scenario's media duration in seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// List the available simulation scenarios
    Scenarios,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Play {
            file_id,
            base_url,
            speed,
            seeks,
            decode_rate,
            max_seconds,
        } => {
            let plan = PlaybackPlan {
                tick: Duration::from_millis(250),
                speed,
                seeks,
                max_wall_time: Duration::from_secs(max_seconds),
            };
            play(file_id, base_url, decode_rate, plan).await
        }
        Commands::Simulate {
            scenario,
            seed,
            failure_rate,
            duration,
        } => simulate(&scenario, seed, failure_rate, duration).await,
        Commands::Scenarios => {
            list_scenarios();
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct PlayReport {
    file_id: String,
    playback: segbuf_sim::PlaybackReport,
    decode: segbuf_core::TrackPair<segbuf_sim::DecodeStats>,
}

/// Play a served file through a full session
///
/// # Errors
/// - `PlaybackError::Configuration` - Invalid base URL or config
/// - `PlaybackError::Manifest` - Manifest could not be loaded
pub async fn play(
    file_id: String,
    base_url: Option<String>,
    decode_rate: u64,
    plan: PlaybackPlan,
) -> anyhow::Result<()> {
    if !(plan.speed.is_finite() && plan.speed > 0.0) {
        bail!("speed must be positive, got {}", plan.speed);
    }

    let mut config = SegbufConfig::from_env();
    if let Some(base_url) = base_url {
        config.network.base_url = base_url;
    }
    println!("Playing {file_id} from {}", config.network.base_url);

    let client = Arc::new(HttpMediaClient::new(&config.network)?);
    let stream = Arc::new(HeadlessStream::new(decode_rate));
    let collaborators = Collaborators {
        loader: client.clone(),
        fetcher: client,
        stream: stream.clone(),
    };

    let handle = open_session(
        config,
        FileId::new(file_id.clone()),
        collaborators,
        CancelFlag::new(),
    )
    .await
    .context("failed to open playback session")?;

    let playback = drive(&handle, &plan).await;
    handle.shutdown().await?;
    let playback = playback?;

    let report = PlayReport {
        file_id,
        playback,
        decode: stream.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run a pre-built scenario with optional overrides
///
/// # Errors
/// - Unknown scenario name
/// - `SimulationError` - Invalid overrides or a failed session
pub async fn simulate(
    name: &str,
    seed: u64,
    failure_rate: Option<f64>,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    let Some(mut scenario) = Scenario::by_name(name, seed) else {
        bail!(
            "unknown scenario {name}, expected one of: {}",
            SCENARIO_NAMES.join(", ")
        );
    };
    if let Some(rate) = failure_rate {
        scenario.simulation.failure_rate = rate;
    }
    if let Some(duration) = duration {
        scenario.simulation.media.duration_secs = duration;
    }

    println!("Running scenario {} with seed {seed}", scenario.name);
    let report = run_simulation(&scenario.simulation, scenario.segbuf).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_scenarios() {
    println!("Available scenarios");
    println!("{:-<40}", "");
    for name in SCENARIO_NAMES {
        println!("  {name}");
    }
}

fn parse_seek(value: &str) -> Result<ScheduledSeek, String> {
    let (at, to) = value
        .split_once(':')
        .ok_or_else(|| format!("expected AT:TO, got {value}"))?;
    let at = at
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid seek time {at}: {e}"))?;
    let to = to
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid seek target {to}: {e}"))?;
    Ok(ScheduledSeek { at, to })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seek_valid() {
        let seek = parse_seek("12.5:40").unwrap();
        assert_eq!(seek, ScheduledSeek { at: 12.5, to: 40.0 });
    }

    #[test]
    fn test_parse_seek_invalid() {
        assert!(parse_seek("12").is_err());
        assert!(parse_seek("a:3").is_err());
        assert!(parse_seek("3:").is_err());
    }

    #[tokio::test]
    async fn test_simulate_unknown_scenario() {
        let result = simulate("nope", 1, None, None).await;
        assert!(result.unwrap_err().to_string().contains("steady"));
    }
}
