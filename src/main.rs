//! CLI entry point for subscout.

use std::fs;
use std::io::{self, Read, Write};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use subscout_core::{AppConfig, Candidate, Runtime, SearchQuery};
use tracing::{debug, info};

mod cli;

use cli::{Cli, Command, FetchArgs, SearchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let config = AppConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let runtime = Runtime::open(config)
        .await
        .context("Failed to open the subtitle cache")?;

    let result = run(&runtime, cli.command).await;
    runtime.close().await;
    result
}

async fn run(runtime: &Runtime, command: Command) -> Result<()> {
    match command {
        Command::Search(args) => search(runtime, args).await,
        Command::Fetch(args) => fetch(runtime, args).await,
        Command::Throttled => print_json(&runtime.throttle().list_throttled()),
        Command::ResetThrottle { source } => {
            ensure_known(runtime, &source)?;
            runtime.reset_throttle(&source).await;
            info!(source = %source, "throttle reset");
            Ok(())
        }
        Command::Invalidate { source: Some(source) } => {
            ensure_known(runtime, &source)?;
            runtime.invalidator().invalidate(&source).await;
            Ok(())
        }
        Command::Invalidate { source: None } => {
            runtime.invalidator().invalidate_all().await;
            Ok(())
        }
    }
}

async fn search(runtime: &Runtime, args: SearchArgs) -> Result<()> {
    let mut query = match (args.movie, args.season, args.episode) {
        (true, _, _) => SearchQuery::movie(args.title),
        (false, Some(season), Some(episode)) => SearchQuery::episode(args.title, season, episode),
        _ => bail!("An episode search needs --season and --episode (or pass --movie)"),
    };
    if let Some(year) = args.year {
        query = query.with_year(year);
    }
    if let Some(country) = args.country {
        query = query.with_country(country);
    }
    for title in args.alternate_titles {
        query = query.with_alternate_title(title);
    }
    query = query.with_languages(args.languages);

    let sources = if args.sources.is_empty() {
        runtime.enabled_sources()
    } else {
        args.sources
    };
    debug!(kind = ?query.media_kind, ?sources, "searching");

    let report = runtime.orchestrator().search(&query, &sources).await;
    print_json(&report)
}

async fn fetch(runtime: &Runtime, args: FetchArgs) -> Result<()> {
    let raw = if args.candidate.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read candidate from stdin")?;
        buffer
    } else {
        fs::read_to_string(&args.candidate)
            .with_context(|| format!("Failed to read candidate file '{}'", args.candidate.display()))?
    };
    let candidate: Candidate = serde_json::from_str(&raw).context("Candidate is not valid JSON")?;

    let bytes = runtime
        .downloader()
        .fetch(&candidate.source_id, &candidate)
        .await
        .with_context(|| format!("Failed to fetch subtitle from '{}'", candidate.source_id))?;

    match args.output {
        Some(path) => {
            fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "subtitle saved");
        }
        None => io::stdout()
            .write_all(&bytes)
            .context("Failed to write subtitle to stdout")?,
    }
    Ok(())
}

fn ensure_known(runtime: &Runtime, source_id: &str) -> Result<()> {
    if runtime.registry().get(source_id).is_none() {
        bail!(
            "Unknown source '{source_id}'\n  Suggestion: known sources are: {}",
            runtime.registry().ids().join(", ")
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
