//! wrap-cli - terminal client for wrap-api
//!
//! Runs the automated flow (fetch history, analyze, generate previews) and
//! expands selected tracks, printing progress as it arrives.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wrap_common::config::LoggingConfig;
use wrap_common::{TrackResult, PREVIEW_DURATION_SECONDS};

use wrap_cli::{HttpBackend, Pipeline, PipelineState};

#[derive(Parser, Debug)]
#[command(name = "wrap-cli")]
#[command(about = "Terminal client for the wrap music service")]
#[command(version)]
struct Cli {
    /// Base URL of wrap-api
    #[arg(long, env = "WRAP_SERVER", default_value = "http://127.0.0.1:3001")]
    server: String,

    /// Value of the `wrap_session` cookie from a browser login
    #[arg(long, env = "WRAP_SESSION")]
    session: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "WRAP_LOG_LEVEL", default_value_t = LoggingConfig::default().level)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether the session is authenticated
    Status,

    /// Print the URL that starts a browser login
    Login,

    /// Fetch history, analyze it and generate preview tracks
    Run {
        /// Seconds per preview track
        #[arg(long, default_value_t = PREVIEW_DURATION_SECONDS)]
        duration: u32,

        /// Track index to expand to full length after generation (repeatable)
        #[arg(long = "expand")]
        expand: Vec<usize>,
    },
}

/// Filter from RUST_LOG, else `level` for this crate; logs go to stderr
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wrap_cli={}", level)))
}

fn print_track(track: &TrackResult) {
    let title = track.title.as_deref().unwrap_or("(untitled)");
    if track.success {
        println!(
            "  [{}] {} - {} ({}s)",
            track.track_index,
            title,
            track.filename.as_deref().unwrap_or("?"),
            track.duration_seconds.unwrap_or_default()
        );
    } else {
        println!(
            "  [{}] {} - failed: {}",
            track.track_index,
            title,
            track.error.as_deref().unwrap_or("unknown error")
        );
    }
}

async fn run(backend: Arc<HttpBackend>, duration: u32, expand: Vec<usize>) -> Result<()> {
    let pipeline = Pipeline::new(backend.clone());

    let mut states = pipeline.subscribe();
    let display = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match &state {
                PipelineState::Fetching => println!("Fetching your listening history..."),
                PipelineState::Analyzing => println!("Analyzing your music taste..."),
                PipelineState::Generating { current, total } => {
                    println!("Generating track {}/{}...", current, total)
                }
                _ => {}
            }
            if state.is_terminal() {
                break;
            }
        }
    });

    let result = pipeline.run(duration).await;
    let _ = display.await;
    let outcome = result.context("Pipeline failed")?;

    let profile = &outcome.profile;
    println!();
    println!(
        "Estimated age: {} ({}), confidence {:.0}%",
        profile.estimated_age,
        profile.age_range,
        profile.confidence * 100.0
    );
    println!("Music generation: {}", profile.music_generation_directive);
    if !profile.top_genres.is_empty() {
        println!("Top genres: {}", profile.top_genres.join(", "));
    }
    println!();
    println!("Tracks:");
    for track in outcome.job.snapshot().await {
        print_track(&track);
    }

    let mut expansion_failed = false;
    for index in expand {
        println!("Expanding track {}...", index);
        match outcome.job.expand(pipeline.backend(), index).await {
            Ok(track) => print_track(&track),
            Err(e) => {
                expansion_failed = true;
                eprintln!("  expansion of track {} failed: {}", index, e);
            }
        }
    }
    if expansion_failed {
        bail!("One or more expansions failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(log_filter(&cli.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    let backend = Arc::new(
        HttpBackend::new(cli.server.clone(), cli.session.clone())
            .context("Failed to create HTTP client")?,
    );

    match cli.command {
        Command::Status => {
            let authenticated = backend
                .is_authenticated()
                .await
                .with_context(|| format!("Failed to reach {}", cli.server))?;
            println!(
                "{}",
                if authenticated { "authenticated" } else { "not authenticated" }
            );
        }
        Command::Login => {
            println!("Open this URL in a browser to log in:");
            println!("  {}", backend.login_url());
            println!("Then pass the `wrap_session` cookie with --session or WRAP_SESSION.");
        }
        Command::Run { duration, expand } => run(backend, duration, expand).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_defaults_to_configured_default() {
        let cli = Cli::try_parse_from(["wrap-cli", "status"]).unwrap();
        assert_eq!(cli.log_level, LoggingConfig::default().level);
    }

    #[test]
    fn test_log_level_flag_and_run_arguments() {
        let cli = Cli::try_parse_from([
            "wrap-cli",
            "--log-level",
            "debug",
            "run",
            "--duration",
            "30",
            "--expand",
            "1",
            "--expand",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Run { duration, expand } => {
                assert_eq!(duration, 30);
                assert_eq!(expand, vec![1, 4]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
