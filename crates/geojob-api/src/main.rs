//! GeoJob REST API server.

use geojob_api::server::{self, AppState};
use geojob_ops::{
    Classifier, FsArtifactStore, OpenAiClassifier, OperationRegistry, ThresholdClassifier,
};
use geojob_publisher::BroadcastPublisher;
use geojob_runner::{JobRunner, RunnerConfig, TimeoutSweeper};
use geojob_store::{InMemoryJobStore, JobChangeSink, JobStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "sqlite")]
fn open_store(sink: Arc<dyn JobChangeSink>) -> Result<Arc<dyn JobStore>, BoxError> {
    if let Ok(path) = std::env::var("GEOJOB_DB_PATH") {
        tracing::info!(path = %path, "using sqlite job store");
        let store = geojob_store::SqliteJobStore::new(&path)?.with_sink(sink);
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(InMemoryJobStore::with_sink(sink)))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(sink: Arc<dyn JobChangeSink>) -> Result<Arc<dyn JobStore>, BoxError> {
    if std::env::var("GEOJOB_DB_PATH").is_ok() {
        tracing::warn!("GEOJOB_DB_PATH ignored: built without the sqlite feature");
    }
    Ok(Arc::new(InMemoryJobStore::with_sink(sink)))
}

fn classifier() -> Arc<dyn Classifier> {
    if std::env::var("INFERENCE_API_URL").is_ok() {
        match OpenAiClassifier::from_env() {
            Ok(remote) => {
                tracing::info!(model = remote.name(), "classification uses remote inference");
                return Arc::new(remote);
            }
            Err(e) => tracing::warn!(error = %e, "remote inference unavailable; using thresholds"),
        }
    }
    Arc::new(ThresholdClassifier::land_cover())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let publisher = Arc::new(BroadcastPublisher::default());
    let store = open_store(publisher.clone())?;
    publisher.attach_store(&store);

    let artifacts = Arc::new(FsArtifactStore::from_env());
    let artifact_dir = artifacts.root().to_path_buf();
    let registry = OperationRegistry::standard(artifacts, classifier());

    let config = RunnerConfig::from_env();
    let runner = Arc::new(JobRunner::start(Arc::clone(&store), registry, config.clone()));
    runner.recover().await?;

    let shutdown = CancellationToken::new();
    let sweeper = TimeoutSweeper::new(Arc::clone(&store), config.job_timeout, config.sweep_interval)
        .spawn(shutdown.clone());

    let state = Arc::new(AppState {
        store,
        scheduler: runner.clone(),
        publisher,
    });
    let app = server::router(state).nest_service("/artifacts", ServeDir::new(artifact_dir));
    let addr: SocketAddr = std::env::var("GEOJOB_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8002".to_string())
        .parse()?;
    tracing::info!("GeoJob API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    shutdown.cancel();
    runner.shutdown().await;
    sweeper.await?;
    Ok(())
}
