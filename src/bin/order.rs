use anyhow::Result;
use log::info;
use std::sync::Arc;
use toy_store::config::{OrderConfig, ORDER_HOST};
use toy_store::order_service::{self, OrderService};
use toy_store::store::PersistentStore;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = OrderConfig::from_env()?;
    info!(
        "starting order replica {} (use_raft={}, use_delay={})",
        config.server_id, config.use_raft, config.use_delay
    );

    let store = Arc::new(PersistentStore::open(&config.server_id).await?);
    let port = config.port();
    let service = OrderService::new(config, store).await?;
    service.start_background_tasks();

    let app = order_service::router(service);
    let bind_addr = format!("{ORDER_HOST}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("order replica listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
