use std::{process, sync::Arc};

use mirador::{
    application::{
        error::AppError, invalidation::InvalidationService, reads::DashboardReadService,
        replay::ReplayService,
    },
    cache::CacheStore,
    config,
    infra::{
        error::InfraError,
        http::{self, AppState},
        objstore::{FsObjectStore, ObjectStore},
        telemetry,
    },
    stream::{BroadcastHub, ConnectionHealthMonitor},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = build_application_state(&settings)?;

    // Heartbeat ticker: keeps streams alive and evicts dead writers.
    let heartbeat_handle = {
        let hub = state.hub.clone();
        let interval = settings.stream.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                hub.heartbeat();
            }
        })
    };

    // Staleness monitor: evicts connections that have gone quiet.
    let monitor_handle = {
        let monitor =
            ConnectionHealthMonitor::new(state.hub.clone(), settings.stream.stale_timeout);
        let interval = settings.stream.monitor_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.sweep();
            }
        })
    };

    // Expiry sweep: drops cache entries past their module TTL.
    let sweep_handle = {
        let store = state.store.clone();
        let interval = settings.cache.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_expired();
            }
        })
    };

    let result = serve_http(&settings, state).await;

    for handle in [heartbeat_handle, monitor_handle, sweep_handle] {
        handle.abort();
        let _ = handle.await;
    }

    result
}

fn build_application_state(settings: &config::Settings) -> Result<AppState, AppError> {
    let objects: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::new(settings.storage.root.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let store = Arc::new(CacheStore::new(settings.cache.policies.clone()));
    let hub = Arc::new(BroadcastHub::new(settings.stream.channel_capacity.get()));

    let reads = Arc::new(DashboardReadService::new(store.clone(), objects.clone()));
    let invalidation = Arc::new(InvalidationService::new(store.clone(), hub.clone()));
    let replay = Arc::new(ReplayService::new(
        objects.clone(),
        settings.replay.aliases.clone(),
        settings.replay.event_modules.clone(),
        settings.replay.pacing,
    ));

    Ok(AppState {
        store,
        objects,
        hub,
        reads,
        invalidation,
        replay,
    })
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "mirador::server",
        addr = %settings.server.addr,
        "Listening"
    );

    http::serve(
        listener,
        router,
        shutdown_signal(),
        settings.server.graceful_shutdown,
    )
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                error!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!(target = "mirador::server", "Shutdown signal received; draining");
}
