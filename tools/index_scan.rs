mod config;

use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{IndexError, Indexer, IndexingProgress};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROGRESS_STEP: usize = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let locations = config.music_locations(&config_path);
    if locations.is_empty() {
        warn!("No music locations configured in {:?}", config_path);
        return Ok(());
    }
    let cache_path = resolve_path(&config_path, config.cache_path.trim());
    let covers_dir = config.covers_dir(&config_path);
    let indexer = Indexer::open(&cache_path, covers_dir.as_deref(), config.indexer_config())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
            return;
        }
        info!("Cancelling indexing.");
        on_signal.cancel();
    });

    let mut next_report = PROGRESS_STEP;
    let progress = |update: IndexingProgress| match update {
        IndexingProgress::Songs { loaded, explored } if loaded >= next_report => {
            next_report = loaded + PROGRESS_STEP;
            info!("Loaded {} of {} discovered files", loaded, explored);
        }
        IndexingProgress::Indeterminate => info!("Building library"),
        IndexingProgress::Songs { .. } => {}
    };
    let result = match indexer.run(locations, &cancel, progress).await {
        Ok(result) => result,
        Err(IndexError::Cancelled) => {
            warn!("Indexing cancelled; cache left untouched");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let library = &result.library;
    println!(
        "Indexed: {} songs, {} albums, {} artists, {} genres, {} playlists",
        library.songs().len(),
        library.albums().len(),
        library.artists().len(),
        library.genres().len(),
        library.playlists().len()
    );
    println!("{}", serde_json::to_string_pretty(&result.report)?);

    Ok(())
}
