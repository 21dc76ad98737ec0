use cep_geocoder::cache::{GeocodeCache, MemoryGeocodeCache, PgGeocodeCache};
use cep_geocoder::checkpoint::FileCheckpointStore;
use cep_geocoder::config::Config;
use cep_geocoder::db::Database;
use cep_geocoder::orchestrator::BatchOrchestrator;
use cep_geocoder::progress::LoggingObserver;
use cep_geocoder::rate_limiter::RateLimiter;
use cep_geocoder::registry::ProviderRegistry;
use cep_geocoder::resolver::GeocodeResolver;
use cep_geocoder::store::{CustomerRecordStore, PgCustomerStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Batch geocoding entry point.
///
/// Loads configuration, connects to Postgres, resolves every customer that
/// still needs coordinates and prints the run summary. Ctrl-C stops
/// admission of new work; the checkpoint written on the way out is picked
/// up by the next run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cep_geocoder=info,geocode_batch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let registry = ProviderRegistry::from_config(&config.providers)?;
    tracing::info!("Configuration loaded successfully");

    let max_connections = (config.batch.max_concurrency as u32).saturating_mul(2).max(5);
    let db = Database::new(&config.database_url, max_connections).await?;
    tracing::info!("Database connection pool established");

    let store = Arc::new(PgCustomerStore::new(db.pool.clone()));
    match store.get_stats().await {
        Ok(stats) => tracing::info!(
            "Before run: {} customers, {} with coordinates, {} pending, {} completed, {} failed, {} invalid CEP",
            stats.total,
            stats.with_coordinates,
            stats.pending,
            stats.completed,
            stats.failed,
            stats.invalid_cep
        ),
        Err(e) => tracing::warn!("Could not read geocode stats: {}", e),
    }

    let pg_cache = PgGeocodeCache::new(db.pool.clone(), config.cache_ttl);
    let cache: Arc<dyn GeocodeCache> = match pg_cache.ensure_schema().await {
        Ok(()) => {
            tracing::info!("Using Postgres geocode cache");
            Arc::new(pg_cache)
        }
        Err(e) => {
            tracing::warn!("Postgres geocode cache unavailable, using memory cache: {}", e);
            Arc::new(MemoryGeocodeCache::new(config.cache_ttl, 100_000))
        }
    };

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let resolver = Arc::new(GeocodeResolver::new(registry, limiter, cache));
    let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint_path));

    let orchestrator = BatchOrchestrator::new(resolver, store.clone(), checkpoints, config.batch.clone())
        .with_observer(Arc::new(LoggingObserver));

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight records");
            cancel.cancel();
        }
    });

    let progress = orchestrator.run_from_store().await?;
    println!("{}", progress.summary());

    match store.get_stats().await {
        Ok(stats) => tracing::info!(
            "After run: {} customers, {} with coordinates, {} pending",
            stats.total,
            stats.with_coordinates,
            stats.pending
        ),
        Err(e) => tracing::warn!("Could not read geocode stats: {}", e),
    }

    Ok(())
}
