//! The catalog service: the authoritative product table, stock decrement on
//! order, cache-restock interface, and a background restock task.
//!
//! Grounded on `examples/original_source/src/catalog/app/views.py` and
//! `src/catalog/app/utils.py`. The original splits the product table across
//! an on-disk `Product` row guarded by `products_lock` and an in-memory
//! mirror guarded by a separate `catalogs_lock`, acquired in different
//! orders in different code paths — spec.md §9 flags this as a latent
//! deadlock. This implementation consolidates to one table behind one
//! `RwPreferReader`, removing the two-lock hazard rather than trying to fix
//! its acquisition order.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FRONTEND_HOST;
use crate::domain::{ApiResponse, BuyRequest, Product, RestockRequest};
use crate::error::AppError;
use crate::rwlock::RwPreferReader;

/// The fixed set of products the catalog knows about, seeded lazily the
/// first time each is restocked — grounded on the original's `catalogs`
/// dict in `src/catalog/app/utils.py`.
const KNOWN_PRODUCTS: &[(&str, f64, u64)] = &[
    ("Tux", 6.9, 100),
    ("Uno", 5.0, 100),
    ("Clue", 15.0, 100),
    ("Lego", 23.3, 100),
    ("Chess", 17.5, 100),
    ("Barbie", 10.0, 100),
    ("Bubbles", 2.75, 100),
    ("Frisbee", 8.8, 100),
    ("Twister", 13.3, 100),
    ("Elephant", 20.0, 100),
];

const RESTOCK_QUANTITY: u64 = 100;
const RESTOCK_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct CatalogService {
    products: RwPreferReader<HashMap<String, Product>>,
    http_client: reqwest::Client,
    frontend_port: u16,
}

impl CatalogService {
    pub fn new(frontend_port: u16) -> Arc<Self> {
        let mut products = HashMap::new();
        for (name, price, quantity) in KNOWN_PRODUCTS {
            products.insert(
                name.to_string(),
                Product {
                    name: name.to_string(),
                    price: *price,
                    quantity: *quantity,
                },
            );
        }
        Arc::new(Self {
            products: RwPreferReader::new(products),
            http_client: reqwest::Client::new(),
            frontend_port,
        })
    }

    pub fn get_product(&self, name: &str) -> Result<Product, AppError> {
        self.products
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("product {name}")))
    }

    /// Decrement stock for a buy, transactionally against the authoritative
    /// record. Returns the updated product on success.
    pub async fn decrement_stock(&self, name: &str, quantity: u64) -> Result<Product, AppError> {
        let updated = {
            let mut products = self.products.write();
            let product = products
                .get_mut(name)
                .ok_or_else(|| AppError::NotFound(format!("product {name}")))?;
            if quantity > product.quantity {
                return Err(AppError::BadRequest("No sufficient stock".to_string()));
            }
            product.quantity -= quantity;
            product.clone()
        };

        self.invalidate_frontend_cache(name).await;
        Ok(updated)
    }

    fn restock_if_empty(&self, name: &str) -> bool {
        let mut products = self.products.write();
        match products.get_mut(name) {
            Some(product) if product.quantity == 0 => {
                product.quantity = RESTOCK_QUANTITY;
                true
            }
            _ => false,
        }
    }

    async fn invalidate_frontend_cache(&self, name: &str) {
        let url = format!("http://{FRONTEND_HOST}:{}/cache/{name}/", self.frontend_port);
        if let Err(e) = self.http_client.delete(&url).send().await {
            log::debug!("cache invalidation call to frontend failed: {e}");
        }
    }

    /// Periodically restock any product that has hit zero. The original's
    /// scheduler (a Celery task) is out of scope; this loop exercises the
    /// same interface a real scheduler would drive.
    pub async fn run_restock_task(self: Arc<Self>) {
        loop {
            tokio::time::sleep(RESTOCK_CHECK_INTERVAL).await;
            for (name, _, _) in KNOWN_PRODUCTS {
                if self.restock_if_empty(name) {
                    log::info!("restocked {name} to {RESTOCK_QUANTITY}");
                    self.invalidate_frontend_cache(name).await;
                }
            }
        }
    }
}

async fn get_product(
    State(service): State<Arc<CatalogService>>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let product = service.get_product(&name)?;
    Ok(Json(ApiResponse::new(product)))
}

async fn post_order(
    State(service): State<Arc<CatalogService>>,
    Json(body): Json<BuyRequest>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let product = service.decrement_stock(&body.name, body.quantity).await?;
    Ok(Json(ApiResponse::new(product)))
}

async fn post_cache_restock(
    State(service): State<Arc<CatalogService>>,
    Json(body): Json<RestockRequest>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let mut products = service.products.write();
    let product = products
        .get_mut(&body.product_name)
        .ok_or_else(|| AppError::NotFound(format!("product {}", body.product_name)))?;
    product.quantity = body.quantity;
    Ok(Json(ApiResponse::new(product.clone())))
}

pub fn router(service: Arc<CatalogService>) -> Router {
    Router::new()
        .route("/products/{name}/", get(get_product))
        .route("/orders/", post(post_order))
        .route("/cache/restock/", post(post_cache_restock))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decrement_stock_rejects_insufficient_quantity() {
        let service = CatalogService::new(8000);
        let err = service.decrement_stock("Tux", 1_000).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(service.get_product("Tux").unwrap().quantity, 100);
    }

    #[tokio::test]
    async fn decrement_stock_succeeds_within_quantity() {
        let service = CatalogService::new(8000);
        let product = service.decrement_stock("Tux", 2).await.unwrap();
        assert_eq!(product.quantity, 98);
    }

    #[test]
    fn unknown_product_is_not_found() {
        let service = CatalogService::new(8000);
        assert!(matches!(
            service.get_product("Nope"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn restock_only_refills_when_empty() {
        let service = CatalogService::new(8000);
        assert!(!service.restock_if_empty("Tux"));
        {
            let mut products = service.products.write();
            products.get_mut("Tux").unwrap().quantity = 0;
        }
        assert!(service.restock_if_empty("Tux"));
        assert_eq!(service.get_product("Tux").unwrap().quantity, 100);
    }
}
