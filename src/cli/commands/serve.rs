use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::config::{load_config_from_path, PublisherConfig, PublisherKind, RouterConfig};
use crate::native::build_router;
use crate::queue::{HttpPublisher, LogPublisher, Publisher};
use crate::repository::{MemoryRepository, RoutingRepository};
use crate::service::RouterService;

pub fn build_publisher(config: &PublisherConfig) -> Result<Arc<dyn Publisher>> {
    match config.kind {
        PublisherKind::Log => Ok(Arc::new(LogPublisher)),
        PublisherKind::Http => {
            let base_url = config
                .base_url
                .clone()
                .context("publisher.base_url is required for the http publisher")?;
            let publisher = HttpPublisher::new(base_url, config.timeout())?
                .with_reconnect_after(config.reconnect_after());
            Ok(Arc::new(publisher))
        }
    }
}

pub async fn execute_serve(args: ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => RouterConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    config.validate()?;
    let addr = config.listen_addr()?;

    let repository: Arc<dyn RoutingRepository> = match &args.seed {
        Some(path) => Arc::new(MemoryRepository::from_path(path)?),
        None => {
            warn!("no seed file given, starting with an empty routing repository");
            Arc::new(MemoryRepository::new())
        }
    };
    let publisher = build_publisher(&config.publisher)?;

    let service = Arc::new(
        RouterService::start(&config, repository, publisher)
            .await
            .context("Failed to load the routing cache")?,
    );
    let app = build_router(service.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "listening");

    let cancel = service.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = cancel.cancelled() => {}
            }
        })
        .await
        .context("HTTP server failed")?;

    service.shutdown().await;
    info!("router stopped");
    Ok(())
}
