//! HTTP surface: router assembly, shared application state, and the serve
//! loop.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::warn;

use crate::application::invalidation::InvalidationService;
use crate::application::reads::DashboardReadService;
use crate::application::replay::ReplayService;
use crate::cache::CacheStore;
use crate::infra::objstore::ObjectStore;
use crate::stream::BroadcastHub;

pub mod dashboard;
pub mod events;
pub mod hooks;
pub mod middleware;
pub mod system;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CacheStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub hub: Arc<BroadcastHub>,
    pub reads: Arc<DashboardReadService>,
    pub invalidation: Arc<InvalidationService>,
    pub replay: Arc<ReplayService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events/{subscriber_id}", get(events::subscribe))
        .route("/hooks/storage", post(hooks::storage_hook))
        .route(
            "/api/data/{module}/{platform}/{subscriber}",
            get(dashboard::module_data),
        )
        .route("/api/system/cache-stats", get(system::cache_stats))
        .route("/healthz", get(system::healthz))
        .layer(axum::middleware::from_fn(middleware::log_responses))
        .layer(axum::middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}

/// Serve the router until `shutdown` resolves, then stop accepting and give
/// in-flight requests up to `grace` to finish. Open event streams never
/// drain on their own, so the grace period bounds shutdown latency; whatever
/// is still open when it elapses gets dropped.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    grace: Duration,
) -> std::io::Result<()> {
    let (close_tx, close_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = close_rx.await;
        })
        .into_future();
    let mut server = std::pin::pin!(server);
    let mut shutdown = std::pin::pin!(shutdown);

    tokio::select! {
        result = &mut server => result,
        _ = &mut shutdown => {
            let _ = close_tx.send(());
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "mirador::server",
                        grace_secs = grace.as_secs(),
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    Ok(())
                }
            }
        }
    }
}
