//! Environment-driven configuration, read once at process startup instead of
//! scattered `env::var` calls (spec.md §6).

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Order replica id -> HTTP port, per spec.md §6 (ids 3, 2, 1 -> 8002, 8003,
/// 8004).
pub fn order_server_ports() -> HashMap<String, u16> {
    HashMap::from([
        ("3".to_string(), 8002),
        ("2".to_string(), 8003),
        ("1".to_string(), 8004),
    ])
}

pub const FRONTEND_PORT: u16 = 8000;
pub const CATALOG_PORT: u16 = 8001;
pub const FRONTEND_HOST: &str = "127.0.0.1";
pub const CATALOG_HOST: &str = "127.0.0.1";
pub const ORDER_HOST: &str = "127.0.0.1";

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1500);
pub const ELECTION_TIMEOUT_BASE: Duration = Duration::from_millis(5000);
pub const ELECTION_TIMEOUT_JITTER_MS: u64 = 250;
pub const ELECTION_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_millis(3000);
pub const CACHE_CAPACITY: usize = 5;
pub const LEADER_DISCOVERY_RETRY_ATTEMPTS: u32 = 3;
pub const LEADER_DISCOVERY_BACKOFF: Duration = Duration::from_secs(3);

/// `USE_DELAY` test hook: pause this long before a leader's replication
/// fan-out goes out to peers, giving partition tests a window to sever
/// network paths mid-round (spec.md §6).
pub const REPLICATION_FAN_OUT_TEST_DELAY: Duration = Duration::from_secs(5);

/// Order-service-wide settings read from the environment.
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// `ORDER_SERVER_ID`, one of {1, 2, 3}.
    pub server_id: String,
    /// `USE_RAFT`: Raft mode vs. classical leader-informs-followers mode.
    pub use_raft: bool,
    /// `USE_DELAY`: test hook, inserts a 5s pause before replication fan-out.
    pub use_delay: bool,
}

impl OrderConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let server_id = env::var("ORDER_SERVER_ID")
            .map_err(|_| anyhow::anyhow!("ORDER_SERVER_ID must be set to one of 1, 2, 3"))?;
        if !order_server_ports().contains_key(&server_id) {
            anyhow::bail!("ORDER_SERVER_ID must be one of 1, 2, 3, got {server_id}");
        }
        Ok(Self {
            server_id,
            use_raft: env_flag("USE_RAFT"),
            use_delay: env_flag("USE_DELAY"),
        })
    }

    pub fn port(&self) -> u16 {
        order_server_ports()[&self.server_id]
    }

    pub fn peer_ids(&self) -> Vec<String> {
        order_server_ports()
            .keys()
            .filter(|id| **id != self.server_id)
            .cloned()
            .collect()
    }
}

/// Frontend-wide settings read from the environment.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub use_raft: bool,
    pub use_cache: bool,
}

impl FrontendConfig {
    pub fn from_env() -> Self {
        Self {
            use_raft: env_flag("USE_RAFT"),
            use_cache: env_flag("USE_CACHE"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_excludes_self() {
        let cfg = OrderConfig {
            server_id: "3".to_string(),
            use_raft: true,
            use_delay: false,
        };
        let mut peers = cfg.peer_ids();
        peers.sort();
        assert_eq!(peers, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn port_matches_server_id() {
        let cfg = OrderConfig {
            server_id: "1".to_string(),
            use_raft: false,
            use_delay: false,
        };
        assert_eq!(cfg.port(), 8004);
    }
}
