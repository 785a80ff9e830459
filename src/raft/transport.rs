//! Peer transport for Raft RPCs, abstracted behind a trait so the algorithm
//! in `node.rs` doesn't know whether it's talking HTTP to a real peer or
//! calling straight into another in-process `RaftNode` during a test.
//!
//! The teacher's `send_raft_message` dials a TCP socket and exchanges
//! length-prefixed JSON directly inside the election/replication code; here
//! that call is generalized into `RaftTransport` the way
//! `simon-fu-async-raft`'s `RaftNetwork` trait separates algorithm from wire,
//! kept as a plain trait object rather than a generic type parameter to
//! match the teacher's concrete-struct style.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::types::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

/// Hard per-RPC timeout, shorter than the heartbeat interval so a slow peer
/// never blocks a whole broadcast round (spec.md §5).
const RPC_TIMEOUT: Duration = Duration::from_millis(1000);

#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(
        &self,
        peer_id: &str,
        args: RequestVoteArgs,
    ) -> anyhow::Result<RequestVoteReply>;

    async fn append_entries(
        &self,
        peer_id: &str,
        args: AppendEntriesArgs,
    ) -> anyhow::Result<AppendEntriesReply>;
}

/// Production transport: peer ids map to HTTP endpoints, RPCs are plain
/// `POST /vote/` / `POST /append_entries/` calls.
pub struct HttpRaftTransport {
    client: reqwest::Client,
    peer_endpoints: HashMap<String, String>,
}

impl HttpRaftTransport {
    pub fn new(peer_endpoints: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            peer_endpoints,
        }
    }

    fn endpoint(&self, peer_id: &str) -> anyhow::Result<&str> {
        self.peer_endpoints
            .get(peer_id)
            .map(|s| s.as_str())
            .ok_or_else(|| anyhow::anyhow!("unknown peer id {peer_id}"))
    }
}

#[async_trait]
impl RaftTransport for HttpRaftTransport {
    async fn request_vote(
        &self,
        peer_id: &str,
        args: RequestVoteArgs,
    ) -> anyhow::Result<RequestVoteReply> {
        let endpoint = self.endpoint(peer_id)?;
        let reply = self
            .client
            .post(format!("{endpoint}/vote/"))
            .json(&args)
            .send()
            .await?
            .json::<RequestVoteReply>()
            .await?;
        Ok(reply)
    }

    async fn append_entries(
        &self,
        peer_id: &str,
        args: AppendEntriesArgs,
    ) -> anyhow::Result<AppendEntriesReply> {
        let endpoint = self.endpoint(peer_id)?;
        let reply = self
            .client
            .post(format!("{endpoint}/append_entries/"))
            .json(&args)
            .send()
            .await?
            .json::<AppendEntriesReply>()
            .await?;
        Ok(reply)
    }
}
