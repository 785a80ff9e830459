//! A three-tier toy online store: a frontend router with a product cache, a
//! catalog service, and a Raft-replicated order service. See SPEC_FULL.md
//! for the full design; this crate is organized as one library shared by
//! the `frontend`, `catalog`, `order`, and `client` binaries.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod frontend;
pub mod order_service;
pub mod raft;
pub mod rwlock;
pub mod store;
