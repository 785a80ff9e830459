use anyhow::Result;
use log::info;
use toy_store::catalog::{self, CatalogService};
use toy_store::config::{CATALOG_HOST, CATALOG_PORT, FRONTEND_PORT};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let service = CatalogService::new(FRONTEND_PORT);
    tokio::spawn(service.clone().run_restock_task());

    let app = catalog::router(service);
    let bind_addr = format!("{CATALOG_HOST}:{CATALOG_PORT}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("catalog listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
