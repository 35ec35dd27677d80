//! CLI entry point for the retrieval core.
//!
//! Provides commands to initialize settings, ingest text, train and inspect
//! the index, and run queries through the full serving path.

use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use docqa_retrieval::{Error, HashingEncoder, RetrievalService, Settings, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;

/// Texts encoded and admitted per ingestion call.
const INGEST_BATCH: usize = 64;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Document retrieval service
#[derive(Parser)]
#[command(
    name = "docqa",
    version = env!("CARGO_PKG_VERSION"),
    about = "Sharded vector retrieval with admission control",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "DOCQA_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .docqa directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display effective settings as TOML
    Config,

    /// Add every non-empty line of a text file to the index
    Ingest {
        /// File with one document per line
        file: PathBuf,
    },

    /// Train partitioned shards
    Optimize,

    /// Query the index and print one JSON record per hit
    Search {
        /// Query text
        text: String,

        /// Number of hits to return
        #[arg(short, default_value_t = 10)]
        k: usize,
    },

    /// Print shard sizes and training state as JSON
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return match Settings::init_config_file(force) {
            Ok(path) => {
                println!("Created configuration file at: {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(6);
        }
    };
    logging::init(&settings.logging);

    match run(cli.command, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            match e.downcast_ref::<Error>() {
                Some(error) => {
                    for suggestion in error.recovery_suggestions() {
                        eprintln!("  - {suggestion}");
                    }
                    ExitCode::from(exit_code(error))
                }
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Configuration(_) => 6,
        Error::Index(_) | Error::Encode(_) => 7,
        Error::RateLimited(_) => 75,
        Error::Stream(_) => 74,
    }
}

async fn run(command: Commands, settings: &Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),

        Commands::Config => {
            let toml_string =
                toml::to_string_pretty(settings).context("failed to render settings")?;
            print!("{toml_string}");
            Ok(())
        }

        Commands::Ingest { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let lines: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect();

            let service = open_service(settings)?;
            let mut added = 0;
            for batch in lines.chunks(INGEST_BATCH) {
                added += service.ingest(batch, None).await?;
            }
            service.save(settings.index_dir())?;

            eprintln!(
                "Ingested {added} documents ({} total)",
                service.stats().total_vectors
            );
            Ok(())
        }

        Commands::Optimize => {
            let service = open_service(settings)?;
            service.optimize()?;
            service.save(settings.index_dir())?;
            println!("{}", serde_json::to_string_pretty(&service.stats())?);
            Ok(())
        }

        Commands::Search { text, k } => {
            let service = open_service(settings)?;
            let mut records = service.query(&text, k).await?;
            while let Some(record) = records.next().await {
                let record = record.map_err(Error::from)?;
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }

        Commands::Stats => {
            let service = open_service(settings)?;
            println!("{}", serde_json::to_string_pretty(&service.stats())?);
            Ok(())
        }
    }
}

fn open_service(settings: &Settings) -> Result<RetrievalService, Error> {
    let dimension = docqa_retrieval::vector::VectorDimension::new(settings.index.dimension)?;
    let encoder = Arc::new(HashingEncoder::new(dimension));
    RetrievalService::from_settings(settings, encoder)
}
