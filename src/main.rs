use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use audiomark::{
    persist, regenerate, regenerate_all, server, Catalog, Config, Database, Identification,
    NewSong, RegenerationStatus,
};

#[derive(Parser)]
#[command(name = "audiomark", version, about = "Audio fingerprinting and song identification")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the catalog database URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket service
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },

    /// Add a WAV file to the catalog
    Ingest {
        path: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long)]
        artist: Option<String>,
    },

    /// Identify a WAV clip against the catalog
    Identify { path: PathBuf },

    /// Rebuild fingerprints from stored audio
    Regenerate {
        /// Only this song (defaults to the whole catalog)
        #[arg(long)]
        song: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("audiomark={}", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database = Database::init(&config.database_url)
        .await
        .with_context(|| format!("opening catalog at {}", config.database_url))?
        .with_store_batch_size(config.store_batch_size);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let catalog: Arc<dyn Catalog> = Arc::new(database);
            server::serve(catalog, &config).await?;
        }
        Commands::Ingest {
            path,
            title,
            artist,
        } => {
            let audio =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let mut song = NewSong::new(title, audio);
            if let Some(artist) = artist {
                song = song.with_artist(artist);
            }
            let persisted = persist(&database, song).await?;
            info!(song_id = persisted.song_id, "ingested");
            println!("{}", serde_json::to_string_pretty(&persisted)?);
        }
        Commands::Identify { path } => {
            let audio =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            match config.match_engine().identify(&database, audio).await? {
                Identification::InsufficientAudio => {
                    println!("could not fingerprint {}", path.display())
                }
                Identification::NoMatch => println!("no match found"),
                Identification::Match(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?)
                }
            }
        }
        Commands::Regenerate { song: Some(song_id) } => {
            match regenerate(&database, song_id).await? {
                RegenerationStatus::Ok { fingerprints } => {
                    println!("song {}: {} fingerprints", song_id, fingerprints)
                }
                status => anyhow::bail!("song {}: {:?}", song_id, status),
            }
        }
        Commands::Regenerate { song: None } => {
            let summary = regenerate_all(&database).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
