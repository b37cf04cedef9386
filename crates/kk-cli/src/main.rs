//! koko-keywords CLI
//!
//! Match text from the command line, refresh the local dataset cache and
//! inspect KKS snapshot files.

use std::collections::BTreeMap;
use std::fs;
use std::time::{Instant, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kk_core::snapshot::decode_snapshot;
use kk_core::{error_description, Config, Engine, Normalize, RawDatasetPayload, RawKeyword, Snapshot};

#[derive(Parser)]
#[command(name = "kk-cli")]
#[command(about = "koko-keywords matcher and snapshot tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match text against the keyword dataset
    Match {
        /// Text to check
        #[arg(short, long)]
        text: String,

        /// Filter expression, e.g. category=self-harm
        #[arg(short, long, default_value = "")]
        filter: String,

        /// Pin a dataset version
        #[arg(short, long)]
        version: Option<String>,

        /// Match phrases as substrings instead of whole words
        #[arg(long)]
        substring: bool,
    },

    /// Fetch the dataset now and write it to the cache directory
    Refresh {
        /// Pin a dataset version
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Validate a KKS snapshot
    Validate {
        /// Snapshot file to validate
        #[arg(short, long)]
        input: String,
    },

    /// Dump snapshot info
    Info {
        /// Snapshot file to inspect
        #[arg(short, long)]
        input: String,
    },

    /// Print a snapshot as the keyword service's JSON payload
    Dump {
        /// Snapshot file to dump
        #[arg(short, long)]
        input: String,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Match {
            text,
            filter,
            version,
            substring,
        } => cmd_match(&text, &filter, version.as_deref(), substring),
        Commands::Refresh { version } => cmd_refresh(version.as_deref()),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Dump { input } => cmd_dump(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn engine(substring: bool) -> Result<Engine, String> {
    let mut config = Config::from_env().map_err(|e| format!("Configuration error: {e}"))?;
    if substring {
        config = config.with_normalize(Normalize::DEFAULT.difference(Normalize::WHOLE_WORDS));
    }
    Engine::new(config).map_err(|e| e.to_string())
}

fn cmd_match(text: &str, filter: &str, version: Option<&str>, substring: bool) -> Result<(), String> {
    let engine = engine(substring)?;
    let start = Instant::now();
    let result = engine.is_match(text, filter, version);
    let elapsed = start.elapsed();

    let matched = result.map_err(|e| format!("{} ({e})", error_description(e.code())))?;
    println!("{}", if matched { "match" } else { "no match" });
    log::info!("matched in {:.2}ms", elapsed.as_secs_f64() * 1000.0);

    engine.shutdown();
    Ok(())
}

fn cmd_refresh(version: Option<&str>) -> Result<(), String> {
    let engine = engine(false)?;
    let start = Instant::now();
    let snapshot = engine
        .refresh(version)
        .map_err(|e| format!("{} ({e})", error_description(e.code())))?;

    println!("Fetched dataset {}", snapshot.version());
    println!("  Entries:     {}", snapshot.len());
    match engine.cache().store() {
        Some(store) => println!("  Cache dir:   {}", store.root().display()),
        None => println!("  Cache dir:   (none)"),
    }
    if let Some(lib) = engine.config().lib_path() {
        println!("  Library:     {}", lib.display());
    }
    println!("  Time:        {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    engine.shutdown();
    Ok(())
}

fn load(input: &str) -> Result<(Vec<u8>, Snapshot), String> {
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;
    let snapshot = decode_snapshot(&bytes).map_err(|e| format!("Invalid snapshot: {}", e))?;
    Ok((bytes, snapshot))
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let (bytes, snapshot) = load(input)?;

    println!("Snapshot '{}' is valid", input);
    println!("  Dataset:     {}", snapshot.version());
    println!("  Entries:     {}", snapshot.len());
    println!("  Size:        {} bytes", bytes.len());

    Ok(())
}

fn cmd_info(input: &str) -> Result<(), String> {
    let (bytes, snapshot) = load(input)?;

    let fetched_ms = snapshot
        .fetched_at()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    println!("Snapshot: {}", input);
    println!("  Magic:       KKS1");
    println!("  Dataset:     {}", snapshot.version());
    println!("  Fetched at:  {} (unix ms)", fetched_ms);
    println!("  Age:         {}s", snapshot.age().as_secs());
    println!("  Total size:  {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!();

    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    let mut uncategorized = 0usize;
    for entry in snapshot.entries() {
        if entry.categories.is_empty() {
            uncategorized += 1;
        }
        for category in &entry.categories {
            *by_category.entry(category.as_str()).or_default() += 1;
        }
    }

    println!("Entries:       {}", snapshot.len());
    for (category, count) in &by_category {
        println!("  {:<20} {}", category, count);
    }
    if uncategorized > 0 {
        println!("  {:<20} {}", "(none)", uncategorized);
    }

    Ok(())
}

fn cmd_dump(input: &str) -> Result<(), String> {
    let (_, snapshot) = load(input)?;

    let payload = RawDatasetPayload {
        version: snapshot.version().to_string(),
        keywords: snapshot
            .entries()
            .iter()
            .map(|entry| RawKeyword {
                phrase: entry.phrase.clone(),
                categories: entry.categories.iter().cloned().collect(),
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&payload).map_err(|e| format!("Failed to encode JSON: {e}"))?;
    println!("{json}");
    Ok(())
}
