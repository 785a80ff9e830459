use anyhow::Result;
use log::info;
use toy_store::config::FrontendConfig;
use toy_store::frontend::{self, FrontendService};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = FrontendConfig::from_env();
    info!(
        "starting frontend (use_raft={}, use_cache={})",
        config.use_raft, config.use_cache
    );

    let service = FrontendService::new(config);
    let app = frontend::router(service);

    let bind_addr = format!("{}:{}", toy_store::config::FRONTEND_HOST, toy_store::config::FRONTEND_PORT);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("frontend listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
