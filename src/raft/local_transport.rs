//! An in-process transport that dispatches Raft RPCs directly to other
//! `RaftNode`s' handler methods, bypassing sockets entirely. Used by the
//! integration tests that exercise a multi-node cluster in one process
//! (election safety, log matching, follower catch-up) — the Rust analogue
//! of `simon-fu-async-raft`'s `RaftRouter` test fixture, adapted to this
//! crate's concrete (non-generic) `RaftNode`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::node::RaftNode;
use super::transport::RaftTransport;
use super::types::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

#[derive(Default)]
pub struct LocalRaftTransport {
    nodes: Mutex<HashMap<String, Arc<RaftNode>>>,
}

impl LocalRaftTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node so other nodes' RPCs can reach it. Must be called
    /// for every node in the cluster before any RPCs fire.
    pub fn register(&self, server_id: String, node: Arc<RaftNode>) {
        self.nodes.lock().unwrap().insert(server_id, node);
    }

    fn node(&self, peer_id: &str) -> anyhow::Result<Arc<RaftNode>> {
        self.nodes
            .lock()
            .unwrap()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown peer id {peer_id}"))
    }
}

#[async_trait]
impl RaftTransport for LocalRaftTransport {
    async fn request_vote(
        &self,
        peer_id: &str,
        args: RequestVoteArgs,
    ) -> anyhow::Result<RequestVoteReply> {
        let node = self.node(peer_id)?;
        Ok(node.request_vote(args).await)
    }

    async fn append_entries(
        &self,
        peer_id: &str,
        args: AppendEntriesArgs,
    ) -> anyhow::Result<AppendEntriesReply> {
        let node = self.node(peer_id)?;
        Ok(node.append_entries(args).await)
    }
}
