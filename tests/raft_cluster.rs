//! In-process three-node Raft cluster tests, wired together with
//! `LocalRaftTransport` instead of sockets — the same shape as the teacher's
//! `tests/replication.rs` (a real multi-node cluster spun up inside one
//! `#[tokio::test(flavor = "multi_thread")]`), but driving `RaftNode`'s
//! handler methods directly instead of a TCP listener.

use std::sync::Arc;
use std::time::Duration;
use toy_store::domain::OrderPayload;
use toy_store::raft::{LocalRaftTransport, RaftConfig, RaftNode};
use toy_store::store::PersistentStore;

const SERVER_IDS: [&str; 3] = ["a", "b", "c"];

async fn build_cluster(prefix: &str) -> (Arc<LocalRaftTransport>, Vec<Arc<RaftNode>>) {
    let transport = LocalRaftTransport::new();
    let mut nodes = Vec::new();

    for id in SERVER_IDS {
        let server_id = format!("{prefix}-{id}");
        let peers: Vec<String> = SERVER_IDS
            .iter()
            .filter(|peer| **peer != id)
            .map(|peer| format!("{prefix}-{peer}"))
            .collect();

        let path = std::path::PathBuf::from(format!("order_state_{server_id}.bin"));
        let _ = tokio::fs::remove_file(&path).await;

        let store = Arc::new(PersistentStore::open(&server_id).await.unwrap());
        let config = RaftConfig::new(server_id.clone(), peers, false);
        let node = RaftNode::new(config, transport.clone(), store).await;
        transport.register(server_id, Arc::clone(&node));
        nodes.push(node);
    }

    (transport, nodes)
}

async fn cleanup(prefix: &str) {
    for id in SERVER_IDS {
        let server_id = format!("{prefix}-{id}");
        let _ = tokio::fs::remove_file(format!("order_state_{server_id}.bin")).await;
        let _ = tokio::fs::remove_file(format!("order_state_{server_id}.tmp")).await;
    }
}

async fn current_leaders(nodes: &[Arc<RaftNode>]) -> Vec<usize> {
    let mut leaders = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.is_leader().await {
            leaders.push(i);
        }
    }
    leaders
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_leader_is_elected() {
    let prefix = "election-safety";
    let (_transport, nodes) = build_cluster(prefix).await;
    for node in &nodes {
        node.start();
    }

    // Election timeout base is 5s plus jitter; give the cluster enough
    // ticks to settle on a leader.
    tokio::time::sleep(Duration::from_secs(7)).await;

    let leaders = current_leaders(&nodes).await;
    assert_eq!(leaders.len(), 1, "expected exactly one leader, got {leaders:?}");

    let terms: Vec<u64> = {
        let mut terms = Vec::new();
        for node in &nodes {
            terms.push(node.get_state().await.0);
        }
        terms
    };
    assert!(terms.iter().all(|t| *t == terms[0]), "all replicas should agree on the current term");

    cleanup(prefix).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn committed_entries_replicate_to_every_follower() {
    let prefix = "log-replication";
    let (_transport, nodes) = build_cluster(prefix).await;
    for node in &nodes {
        node.start();
    }
    tokio::time::sleep(Duration::from_secs(7)).await;

    let leader_idx = current_leaders(&nodes)
        .await
        .into_iter()
        .next()
        .expect("a leader must exist before submitting");

    let (committed, order) = nodes[leader_idx]
        .submit(
            "Buy 2 Tux".to_string(),
            OrderPayload {
                product_name: "Tux".to_string(),
                quantity: 2,
            },
        )
        .await
        .unwrap();
    assert!(committed, "entry should commit once replicated to a majority");
    let order = order.expect("committed submit must return the assigned order");
    assert_eq!(order.order_number, 1);
    assert_eq!(order.quantity, 2);

    // Give one more heartbeat round for the commit index to propagate to
    // followers that only saw the entry, not yet the later commit.
    tokio::time::sleep(Duration::from_secs(2)).await;

    for node in &nodes {
        let state = node.state.lock().await;
        assert_eq!(state.log.len(), 1, "every replica should hold the replicated entry");
        assert_eq!(state.commit_index, 1, "every replica should have advanced its commit index");
    }

    cleanup(prefix).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_the_leader_accepts_submissions() {
    let prefix = "leader-only-writes";
    let (_transport, nodes) = build_cluster(prefix).await;
    for node in &nodes {
        node.start();
    }
    tokio::time::sleep(Duration::from_secs(7)).await;

    let leaders = current_leaders(&nodes).await;
    let leader_idx = leaders[0];

    for (i, node) in nodes.iter().enumerate() {
        if i == leader_idx {
            continue;
        }
        let result = node
            .submit(
                "Buy 1 Tux".to_string(),
                OrderPayload {
                    product_name: "Tux".to_string(),
                    quantity: 1,
                },
            )
            .await;
        assert!(result.is_err(), "a non-leader replica must reject submit");
    }

    cleanup(prefix).await;
}
