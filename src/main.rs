use clap::{Parser, Subcommand};
use rainfall_ingest::archive::{ExtractLayout, Extractor};
use rainfall_ingest::config::Config;
use rainfall_ingest::db::{self, Repository};
use rainfall_ingest::downloader::Downloader;
use rainfall_ingest::pipeline::Pipeline;
use rainfall_ingest::stations;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "rainfall-ingest", version)]
#[command(about = "Load zipped daily station rainfall files into PostgreSQL", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file (built-in defaults when missing)
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Log file written alongside console output
    #[arg(long, env = "RAINFALL_LOG_FILE", default_value = "rainfall_data_processing.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load every pending station archive into the database
    Ingest {
        /// Leave archives in the pending directory after loading
        #[arg(long)]
        keep_archives: bool,
    },
    /// Unpack station archives without loading them
    Extract {
        /// Write each archive into a subdirectory named after its station
        #[arg(long)]
        per_station: bool,
        /// Directory holding the archives (default: paths.pending_dir)
        #[arg(long)]
        source: Option<PathBuf>,
        /// Destination directory (default: paths.extract_dir)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Download one station archive
    Download {
        /// Direct download URL
        url: String,
        /// Destination directory (default: paths.pending_dir)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Convert the station listing text file into JSON
    Stations {
        /// Station listing (stations.txt)
        input: PathBuf,
        /// Output JSON file
        #[arg(long, default_value = "stations.json")]
        output: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file; reported once logging is up
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing(&cli.log_file)?;

    match dotenv {
        Ok(path) => info!("Loaded .env file from {}", path.display()),
        Err(e) => warn!("No .env file loaded ({}), using process environment", e),
    }

    let config = Config::load_or_default(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    info!("Configuration loaded");

    match cli.command {
        Command::Ingest { keep_archives } => ingest(config, keep_archives).await,
        Command::Extract {
            per_station,
            source,
            dest,
        } => {
            let layout = if per_station {
                ExtractLayout::PerStation
            } else {
                ExtractLayout::Flat
            };
            let source = source.unwrap_or_else(|| config.paths.pending_dir.clone());
            let dest = dest.unwrap_or_else(|| config.paths.extract_dir.clone());

            let summary = Extractor::new(layout).extract_all(&source, &dest)?;
            info!(
                "Extraction complete: {} extracted, {} failed",
                summary.extracted.len(),
                summary.failed.len()
            );
            Ok(())
        }
        Command::Download { url, dest } => {
            let dest = dest.unwrap_or_else(|| config.paths.pending_dir.clone());
            let downloader = Downloader::new(&config.download)?;
            let path = downloader.download(&url, &dest).await?;
            info!("Saved {}", path.display());
            Ok(())
        }
        Command::Stations { input, output } => {
            let list = stations::load_station_list(&input)?;
            let file = std::fs::File::create(&output)?;
            serde_json::to_writer_pretty(file, &list.stations)?;
            info!(
                "Wrote {} stations to {}",
                list.stations.len(),
                output.display()
            );
            Ok(())
        }
    }
}

async fn ingest(mut config: Config, keep_archives: bool) -> anyhow::Result<()> {
    if keep_archives {
        config.pipeline.move_processed = false;
    }

    info!("Database connection parameters: {}", config.database.redacted());

    let pool = db::connect(&config.database).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to connect to database: {}\n\n\
             Host: {}:{}\n\
             Database: {}\n\
             User: {}\n\n\
             Common fixes:\n\
             1. Ensure PostgreSQL is running\n\
             2. Check username/password are correct (POSTGRES_USER, POSTGRES_PASSWORD)\n\
             3. Verify database exists: createdb {}\n\
             4. Check host and port (POSTGRES_HOST, POSTGRES_PORT)",
            e,
            config.database.host,
            config.database.port,
            config.database.name,
            config.database.user,
            config.database.name
        )
    })?;

    let repository = Repository::new(pool.clone()).with_batch_size(config.pipeline.batch_size);

    let result = async {
        repository.run_migrations().await?;
        Pipeline::new(config, repository).run().await
    }
    .await;

    // Closed on every path, including a run aborted by a lost connection.
    pool.close().await;
    info!("Database connection closed");

    match result {
        Ok(summary) => {
            info!(
                "Run finished: {} archives loaded, {} failed",
                summary.loaded(),
                summary.failed()
            );
            Ok(())
        }
        Err(e) => {
            error!("Ingestion run aborted: {}", e);
            Err(e.into())
        }
    }
}

fn init_tracing(log_file: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file.display(), e))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rainfall_ingest=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();

    Ok(())
}
