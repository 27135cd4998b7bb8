use lab_progress::{
    AppState, BackendApi, Catalog, Config, DiskCache, EventBus, HttpTransport, LiveView,
    LocalPreferences, Manifest, ProgressStore, Projector, RemotePreferences, ResourceCache,
    RouteTable, SessionManager, TieredPreferences, client::AuthClient, router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const INSTALL_RETRY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env()?;
    fs::create_dir_all(&config.data_dir).await?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path).await?,
        None => Catalog::default(),
    };
    let catalog = Arc::new(catalog);

    let network = Arc::new(HttpTransport::new(config.backend.clone())?);
    let cache = Arc::new(ResourceCache::new(
        network,
        DiskCache::new(config.cache_dir(), config.cache_version.clone()),
        RouteTable::standard(&config.endpoints),
        Manifest::default(),
    ));
    match cache.install().await {
        Ok(()) => cache.activate().await?,
        Err(err) => {
            error!(generation = %cache.generation(), "cache install failed: {err}");
            match cache.resume().await {
                Ok(true) => warn!("serving the cached generation until install succeeds"),
                Ok(false) => warn!("no usable cached generation, forwarding straight to the backend"),
                Err(err) => error!("reading cached generation failed: {err}"),
            }
            tokio::spawn(reinstall(cache.clone()));
        }
    }

    let client = AuthClient::new(cache.clone(), config.endpoints.csrf_token.clone());
    let api = BackendApi::new(client, config.endpoints.clone());
    let store = Arc::new(ProgressStore::new(Arc::new(api.clone()), EventBus::new()));

    let preferences = Arc::new(TieredPreferences::new(
        Arc::new(RemotePreferences::new(api.clone())),
        Arc::new(LocalPreferences::new(config.preferences_path())),
    ));
    let session = Arc::new(SessionManager::new(api, store.clone(), preferences.clone()));
    if let Some(identity) = session.restore().await {
        info!(name = %identity.name, "restored previous session");
    }

    let view = LiveView::default();
    let events = store.events().subscribe();
    tokio::spawn(Projector::new(store.clone(), catalog.clone(), view.clone()).run(events));

    if let Err(err) = store.load_all().await {
        warn!("starting with empty progress: {err}");
    }

    let state = AppState {
        store,
        catalog,
        session,
        preferences,
        cache,
        view,
    };
    let app = router(state);

    let addr = config.listen_addr();
    info!(backend = %config.backend, "listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Retry the precache until the backend is reachable again.
async fn reinstall(cache: Arc<ResourceCache>) {
    loop {
        tokio::time::sleep(INSTALL_RETRY).await;
        match cache.install().await {
            Ok(()) => {
                if let Err(err) = cache.activate().await {
                    error!("cache activation failed: {err}");
                }
                return;
            }
            Err(err) => warn!(generation = %cache.generation(), "cache install retry failed: {err}"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
