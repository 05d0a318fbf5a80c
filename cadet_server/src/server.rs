use crate::routes;
use axum::routing::get;
use axum::{Extension, Router};
use cadet_core::{Broker, BrokerConfig, ComponentGraphBuilder, IngestEvent, WorkerCommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Ingest events accepted over HTTP but not yet applied.
const INGEST_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    /// Commands waiting to be picked up by the worker via `/worker/commands`.
    pub worker_commands: Arc<Mutex<mpsc::UnboundedReceiver<WorkerCommand>>>,
    /// Feeds the single ingest loop that applies worker updates in order.
    pub ingest: mpsc::Sender<IngestEvent>,
    /// Shared secret for `/worker/*`; open when unset.
    pub worker_token: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        broker: Arc<Broker>,
        worker_commands: mpsc::UnboundedReceiver<WorkerCommand>,
        ingest: mpsc::Sender<IngestEvent>,
    ) -> Self {
        Self {
            broker,
            worker_commands: Arc::new(Mutex::new(worker_commands)),
            ingest,
            worker_token: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_worker_token(mut self, token: Option<String>) -> Self {
        self.worker_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Build a broker with the default graph builder plus the state wrapping
    /// it. The returned receiver must be handed to `Broker::run_ingest`.
    #[tracing::instrument(level = "debug")]
    pub fn build(cfg: BrokerConfig) -> anyhow::Result<(Self, mpsc::Receiver<IngestEvent>)> {
        let (broker, commands) = Broker::new(cfg, Arc::new(ComponentGraphBuilder))?;
        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
        Ok((Self::new(Arc::new(broker), commands, ingest_tx), ingest_rx))
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let max_hook_bytes = state.broker.config().max_hook_bytes;
    let state = Arc::new(state);

    Router::new()
        .merge(routes::router(max_hook_bytes))
        .route("/health", get(routes::health::get_health))
        .layer(Extension(state))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn serve(
    addr: SocketAddr,
    cfg: BrokerConfig,
    worker_token: Option<String>,
) -> anyhow::Result<()> {
    let (state, ingest_rx) = AppState::build(cfg)?;
    let state = state.with_worker_token(worker_token);
    if state.worker_token.is_none() {
        tracing::warn!("no worker token set; /worker endpoints are open");
    }
    let cancel = CancellationToken::new();

    let broker = state.broker.clone();
    let background = broker.spawn_background(cancel.clone());
    let ingest = tokio::spawn(async move { broker.run_ingest(ingest_rx).await });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for task in background {
        let _ = task.await;
    }
    // The router (and with it the last ingest sender) is gone, so the loop drains and exits.
    let _ = ingest.await;
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                return cancel.cancelled().await;
            }
            tracing::info!("shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
}
