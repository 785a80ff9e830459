//! Shared data model: products, orders, the Raft log entry shape, and the
//! `{"data": ...}` / `{"error": ...}` envelope every HTTP surface uses.

use serde::{Deserialize, Serialize};

/// Catalog-owned product record. `quantity` is never negative; decrements are
/// transactional against the authoritative row held by the catalog service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub name: String,
    pub price: f64,
    pub quantity: u64,
}

/// Order-service-owned order record. `order_number` is assigned at commit
/// time by the Raft leader and is dense and increasing in commit order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_number: u64,
    pub product_name: String,
    pub quantity: u64,
}

/// A single Raft log entry. `payload` carries the order-creation command's
/// arguments so apply can create the matching `Order` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: String,
    pub payload: OrderPayload,
}

/// The arguments of an order-creation command, as carried by a log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderPayload {
    pub product_name: String,
    pub quantity: u64,
}

/// `(current_term, voted_for)`, persisted before responding to any vote or
/// append_entries that would advance it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RaftPersistentState {
    pub current_term: u64,
    pub voted_for: Option<String>,
}

/// Success envelope: `{"data": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

/// Body of `POST /orders/` (frontend, catalog, order): `{name, quantity}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyRequest {
    pub name: String,
    pub quantity: u64,
}

/// Body of catalog's `POST /cache/restock/`: `{product_name, quantity}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockRequest {
    pub product_name: String,
    pub quantity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let resp = ApiResponse::new(Order {
            order_number: 1,
            product_name: "Tux".into(),
            quantity: 2,
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"order_number\":1"));
    }
}
