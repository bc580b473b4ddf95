use std::{process, sync::Arc};

use thiserror::Error;
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use viewcache::{
    cache::{CacheConfig, CacheWarmer, FamilyError, ViewCache, WarmerConfig},
    config::{self, LoadError, Settings},
    http::{self, AppState, FamilyEndpoint, HttpOptions, ViewEndpoint, ViewRoute},
    infra::{error::InfraError, telemetry, upstream::UpstreamClient},
};

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Family(#[from] FamilyError),
    #[error("server error: {0}")]
    Server(String),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig => {
            run_check_config(&settings);
            Ok(())
        }
    }
}

fn run_check_config(settings: &Settings) {
    for view in &settings.views {
        info!(
            target = "viewcache::check_config",
            key = %view.key,
            path = %view.path,
            ttl_secs = view.ttl.as_secs(),
            priority = view.priority,
            critical = view.critical,
            "view"
        );
    }
    for family in &settings.families {
        info!(
            target = "viewcache::check_config",
            family = %family.name,
            path = %family.path,
            ttl_secs = family.ttl.as_secs(),
            warm_ids = family.warm_ids.len(),
            "family"
        );
    }
    info!(
        target = "viewcache::check_config",
        addr = %settings.server.addr,
        views = settings.views.len(),
        families = settings.families.len(),
        max_items = settings.cache.max_items.get(),
        "configuration is valid"
    );
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let upstream = UpstreamClient::new()?;
    let cache = ViewCache::new(CacheConfig::from(&settings.cache));
    let warmer = CacheWarmer::new(Arc::clone(&cache), WarmerConfig::from(&settings.warming));

    let views = register_views(&settings, &upstream, &warmer);
    let families = register_families(&settings, &upstream, &warmer)?;

    if warmer.config().on_startup {
        warmer.spawn_preload();
    }

    let state = AppState::new(warmer, HttpOptions::from(&settings.http));
    let router = http::build_router(state, &views, &families);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "viewcache::serve",
        addr = %settings.server.addr,
        views = views.len(),
        families = families.len(),
        "listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Server(err.to_string()));

    if tokio::time::timeout(settings.server.graceful_shutdown, cache.shutdown())
        .await
        .is_err()
    {
        warn!(
            target = "viewcache::serve",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "background tasks did not stop before the shutdown deadline"
        );
    }
    info!(target = "viewcache::serve", "server stopped");

    served
}

fn register_views(
    settings: &Settings,
    upstream: &UpstreamClient,
    warmer: &Arc<CacheWarmer>,
) -> Vec<ViewEndpoint> {
    settings
        .views
        .iter()
        .map(|view| {
            let fetcher = upstream.json_fetcher(view.upstream_url.clone());
            warmer
                .cache()
                .register(&view.key, Arc::clone(&fetcher), view.ttl, view.priority);
            if view.critical {
                warmer.mark_critical(&view.key);
            }
            ViewEndpoint {
                path: view.path.clone(),
                route: ViewRoute {
                    key: view.key.clone(),
                    fetcher,
                    ttl: view.ttl,
                },
            }
        })
        .collect()
}

fn register_families(
    settings: &Settings,
    upstream: &UpstreamClient,
    warmer: &Arc<CacheWarmer>,
) -> Result<Vec<FamilyEndpoint>, AppError> {
    settings
        .families
        .iter()
        .map(|family| {
            warmer.register_family(
                &family.name,
                family.ttl,
                family.priority,
                upstream.family_factory(family.upstream_url.clone()),
            );
            warmer.set_family_parameters(&family.name, &family.warm_ids)?;
            Ok(FamilyEndpoint {
                name: family.name.clone(),
                path: family.path.clone(),
            })
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "viewcache::serve", "shutdown signal received");
}
