use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cs_inspect_backend::cache::ResultCache;
use cs_inspect_backend::config::{Cli, Config};
use cs_inspect_backend::dispatch::InspectDispatcher;
use cs_inspect_backend::game_data::GameData;
use cs_inspect_backend::handlers;
use cs_inspect_backend::queue::InspectQueue;
use cs_inspect_backend::rate_limit::RateLimiter;
use cs_inspect_backend::state::AppState;
use cs_inspect_backend::steam::gc::SessionConnector;
use cs_inspect_backend::steam::vent::VentConnector;
use cs_inspect_backend::steam::BotController;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    // Initialize tracing; RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
    let config = Arc::new(config);

    // Static game metadata
    let game_data = Arc::new(GameData::new(config.game_files_url.clone()));
    if config.enable_game_file_updates {
        if let Err(e) = game_data.refresh().await {
            warn!("initial game data fetch failed, starting with an empty schema: {e:#}");
        }
        Arc::clone(&game_data).spawn_refresh_task(Duration::from_secs(
            config.game_files_update_interval_secs,
        ));
    }

    // Result cache
    let cache = Arc::new(ResultCache::new(
        config.cache.max_entries,
        Duration::from_secs(config.cache.ttl_secs),
    ));
    Arc::clone(&cache).spawn_cleanup_task(Duration::from_secs(config.cache.cleanup_interval_secs));

    // Bot fleet
    let connector: Arc<dyn SessionConnector> = Arc::new(VentConnector::new());
    let controller = Arc::new(BotController::new(connector, Arc::clone(&game_data)));
    let settings = config.bot_settings.to_settings();
    let credentials = match config.credentials(cli.steam_data.as_deref()) {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(1);
        }
    };
    info!(bots = credentials.len(), "starting bot fleet");
    for credential in credentials {
        controller.add_bot(credential, settings.clone());
    }

    // Scheduler
    let dispatcher = Arc::new(InspectDispatcher::new(
        Arc::clone(&controller),
        Arc::clone(&cache),
    ));
    let queue = InspectQueue::new(
        dispatcher,
        config.max_simultaneous_requests,
        config.max_queue_size,
    );
    queue.start(Arc::clone(&controller));

    let rate_limiter = config.rate_limit.enable.then(|| {
        Arc::new(RateLimiter::new(
            Duration::from_millis(config.rate_limit.window_ms),
            config.rate_limit.max,
        ))
    });

    let state = AppState {
        config: Arc::clone(&config),
        controller: Arc::clone(&controller),
        queue: Arc::clone(&queue),
        cache,
        game_data,
        rate_limiter,
    };
    let app = handlers::router(state);

    // Start server
    let addr = format!("{}:{}", config.http.host, config.http.port);
    info!("server starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(queue, controller))
    .await?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM, then reject everything queued and log the
/// fleet off before the server stops accepting connections.
async fn shutdown_signal(
    queue: Arc<InspectQueue>,
    controller: Arc<BotController>,
) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining");
    queue.drain();
    controller.shutdown_all().await;
}
