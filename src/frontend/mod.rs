//! The frontend: the public-facing router. Fronts the catalog with an LRU
//! cache and fronts the order replicas with leader discovery, since neither
//! callers of this service nor (in Raft mode) the frontend itself know which
//! replica is currently the leader.
//!
//! Grounded on `examples/original_source/src/frontend/app/views.py`:
//! `process_get_product_request` (cache check-then-fetch-then-fill),
//! `find_order_leader` (classical-mode descending-id poll with a 3-attempt,
//! 3s backoff), and `random_choice_raft_server` (Raft-mode leader guessing,
//! since the frontend has no visibility into the real Raft leader).

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rand::seq::IteratorRandom;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::Cache;
use crate::config::{
    order_server_ports, FrontendConfig, CATALOG_HOST, CATALOG_PORT, LEADER_DISCOVERY_BACKOFF,
    LEADER_DISCOVERY_RETRY_ATTEMPTS, ORDER_HOST,
};
use crate::domain::{ApiResponse, BuyRequest, Order};
use crate::error::AppError;

pub struct FrontendService {
    config: FrontendConfig,
    cache: Cache,
    http_client: reqwest::Client,
    /// The order replica this frontend currently believes is the leader.
    /// In Raft mode this is a guess (the frontend can't see the real
    /// leader) refreshed on every failed proxy call; in classical mode it's
    /// learned via `find_order_leader`.
    leader_id: AsyncMutex<Option<String>>,
}

impl FrontendService {
    pub fn new(config: FrontendConfig) -> Arc<Self> {
        let leader_id = if config.use_raft {
            order_server_ports().into_keys().choose(&mut rand::thread_rng())
        } else {
            None
        };
        Arc::new(Self {
            config,
            cache: Cache::new(),
            http_client: reqwest::Client::new(),
            leader_id: AsyncMutex::new(leader_id),
        })
    }

    async fn get_product(&self, product_name: &str) -> Result<Value, AppError> {
        if self.config.use_cache {
            if let Some(cached) = self.cache.get(product_name) {
                return Ok(cached);
            }
        }

        let url = format!("http://{CATALOG_HOST}:{CATALOG_PORT}/products/{product_name}/");
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::NotFound(format!("product {product_name}")));
        }
        let body: Value = response.json().await?;
        if self.config.use_cache {
            self.cache.insert(product_name.to_string(), body.clone());
        }
        Ok(body)
    }

    fn invalidate_cache(&self, product_name: &str) {
        if self.config.use_cache {
            self.cache.invalidate(product_name);
        }
    }

    async fn current_leader_endpoint(&self) -> Option<String> {
        let leader_id = self.leader_id.lock().await.clone()?;
        order_server_ports()
            .get(&leader_id)
            .map(|port| format!("http://{ORDER_HOST}:{port}"))
    }

    /// Classical-mode leader discovery: poll replicas in descending id order
    /// (3, 2, 1) for liveness, declare the first reachable one the leader,
    /// and inform the others. Retries up to
    /// [`LEADER_DISCOVERY_RETRY_ATTEMPTS`] full sweeps with a backoff
    /// between them.
    async fn discover_classical_leader(&self) -> Option<String> {
        let ports = order_server_ports();
        let mut ids: Vec<&String> = ports.keys().collect();
        ids.sort_by(|a, b| b.cmp(a));

        for attempt in 0..LEADER_DISCOVERY_RETRY_ATTEMPTS {
            for id in &ids {
                let port = ports[*id];
                let url = format!("http://{ORDER_HOST}:{port}/orders/0/");
                if self.http_client.get(&url).send().await.is_ok() {
                    *self.leader_id.lock().await = Some((*id).clone());
                    self.announce_leader_to_replicas((*id).clone(), &ports).await;
                    return Some((*id).clone());
                }
            }
            if attempt + 1 < LEADER_DISCOVERY_RETRY_ATTEMPTS {
                tokio::time::sleep(LEADER_DISCOVERY_BACKOFF).await;
            }
        }
        None
    }

    async fn announce_leader_to_replicas(
        &self,
        leader_id: String,
        ports: &std::collections::HashMap<String, u16>,
    ) {
        #[derive(serde::Serialize)]
        struct LeaderAnnouncement {
            leader_id: String,
        }
        for (id, port) in ports {
            if *id == leader_id {
                continue;
            }
            let url = format!("http://{ORDER_HOST}:{port}/replicas/leaders/");
            let _ = self
                .http_client
                .post(url)
                .json(&LeaderAnnouncement {
                    leader_id: leader_id.clone(),
                })
                .send()
                .await;
        }
    }

    /// Re-pick a leader guess after a failed proxy call: in Raft mode, a
    /// fresh random guess; in classical mode, a full rediscovery sweep.
    async fn reelect_leader(&self) -> Option<String> {
        if self.config.use_raft {
            let new_guess = order_server_ports()
                .into_keys()
                .choose(&mut rand::thread_rng());
            *self.leader_id.lock().await = new_guess.clone();
            new_guess
        } else {
            self.discover_classical_leader().await
        }
    }

    async fn proxy_get_order(&self, order_number: u64) -> Result<Order, AppError> {
        for attempt in 0..=LEADER_DISCOVERY_RETRY_ATTEMPTS {
            let Some(endpoint) = self.current_leader_endpoint().await else {
                self.reelect_leader().await;
                continue;
            };
            let url = format!("{endpoint}/orders/{order_number}/");
            match self.http_client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let envelope: ApiResponse<Order> = response.json().await?;
                    return Ok(envelope.data);
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(AppError::NotFound(format!("order {order_number}")));
                }
                _ if attempt < LEADER_DISCOVERY_RETRY_ATTEMPTS => {
                    self.reelect_leader().await;
                }
                _ => break,
            }
        }
        Err(AppError::Internal("order leader unreachable".to_string()))
    }

    async fn proxy_post_order(&self, body: BuyRequest) -> Result<Order, AppError> {
        for attempt in 0..=LEADER_DISCOVERY_RETRY_ATTEMPTS {
            let Some(endpoint) = self.current_leader_endpoint().await else {
                self.reelect_leader().await;
                continue;
            };
            let url = format!("{endpoint}/orders/");
            let response = self.http_client.post(&url).json(&body).send().await;
            match response {
                Ok(response) if response.status().is_success() => {
                    let envelope: ApiResponse<Order> = response.json().await?;
                    return Ok(envelope.data);
                }
                Ok(response) if response.status() == reqwest::StatusCode::BAD_REQUEST => {
                    return Err(AppError::BadRequest("No sufficient stock".to_string()));
                }
                Ok(response) if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                    // The replica we hit knows who the real leader is: follow
                    // the hint directly instead of guessing again.
                    if let Some(hint) = response
                        .headers()
                        .get("Leader-Endpoint")
                        .and_then(|v| v.to_str().ok())
                    {
                        if let Some(id) = leader_id_for_endpoint(hint) {
                            *self.leader_id.lock().await = Some(id);
                            continue;
                        }
                    }
                    self.reelect_leader().await;
                }
                _ if attempt < LEADER_DISCOVERY_RETRY_ATTEMPTS => {
                    self.reelect_leader().await;
                }
                _ => break,
            }
        }
        Err(AppError::Internal("order leader unreachable".to_string()))
    }

    async fn leader_snapshot(&self) -> Option<(String, u16)> {
        let id = self.leader_id.lock().await.clone()?;
        let port = *order_server_ports().get(&id)?;
        Some((id, port))
    }
}

fn leader_id_for_endpoint(endpoint: &str) -> Option<String> {
    let port: u16 = endpoint.rsplit(':').next()?.trim_end_matches('/').parse().ok()?;
    order_server_ports()
        .into_iter()
        .find(|(_, p)| *p == port)
        .map(|(id, _)| id)
}

use serde_json::Value;

async fn get_product(
    State(service): State<Arc<FrontendService>>,
    Path(product_name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let body = service.get_product(&product_name).await?;
    Ok(Json(serde_json::json!({ "data": body })))
}

async fn get_order(
    State(service): State<Arc<FrontendService>>,
    Path(order_number): Path<u64>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = service.proxy_get_order(order_number).await?;
    Ok(Json(ApiResponse::new(order)))
}

async fn post_order(
    State(service): State<Arc<FrontendService>>,
    Json(body): Json<BuyRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = service.proxy_post_order(body).await?;
    Ok(Json(ApiResponse::new(order)))
}

async fn delete_cache(
    State(service): State<Arc<FrontendService>>,
    Path(product_name): Path<String>,
) -> Json<ApiResponse<Value>> {
    service.invalidate_cache(&product_name);
    Json(ApiResponse::new(
        serde_json::json!({ "message": "Cache invalidated successfully" }),
    ))
}

async fn get_leader(
    State(service): State<Arc<FrontendService>>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let (id, port) = service
        .leader_snapshot()
        .await
        .ok_or_else(|| AppError::NotFound("leader".to_string()))?;
    Ok(Json(ApiResponse::new(
        serde_json::json!({ "leader_ID": id, "leader_port": port }),
    )))
}

pub fn router(service: Arc<FrontendService>) -> Router {
    Router::new()
        .route("/products/{name}/", get(get_product))
        .route("/orders/{order_number}/", get(get_order))
        .route("/orders/", post(post_order))
        .route("/cache/{name}/", delete(delete_cache))
        .route("/leader/", get(get_leader))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_id_for_endpoint_resolves_known_port() {
        let id = leader_id_for_endpoint("http://127.0.0.1:8004").unwrap();
        assert_eq!(id, "1");
    }

    #[test]
    fn leader_id_for_endpoint_rejects_unknown_port() {
        assert!(leader_id_for_endpoint("http://127.0.0.1:9999").is_none());
    }

    #[tokio::test]
    async fn new_frontend_in_classical_mode_has_no_leader_guess() {
        let service = FrontendService::new(FrontendConfig {
            use_raft: false,
            use_cache: true,
        });
        assert!(service.leader_id.lock().await.is_none());
    }

    #[tokio::test]
    async fn new_frontend_in_raft_mode_guesses_a_leader() {
        let service = FrontendService::new(FrontendConfig {
            use_raft: true,
            use_cache: true,
        });
        assert!(service.leader_id.lock().await.is_some());
    }
}
