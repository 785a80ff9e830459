//! The Raft consensus core: election, heartbeat, log replication, commit
//! advancement and apply. Grounded almost line-for-line on the teacher's
//! `src/raft.rs` (`RaftState`'s fields, `run_election_timer`,
//! `run_heartbeat_sender`, `send_append_entries`, `handle_raft_message`,
//! `become_leader`), generalized so applying a committed entry creates an
//! order row (via `PersistentStore`) instead of being a no-op, and so peer
//! RPCs go through a pluggable `RaftTransport` instead of a hardcoded TCP
//! call.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::{
    ELECTION_TIMEOUT_BASE, ELECTION_TIMEOUT_CHECK_INTERVAL, ELECTION_TIMEOUT_JITTER_MS,
    HEARTBEAT_INTERVAL, REPLICATION_FAN_OUT_TEST_DELAY,
};
use crate::domain::{LogEntry, Order, OrderPayload};
use crate::store::PersistentStore;

use super::transport::RaftTransport;
use super::types::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply, ServerRole};

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub server_id: String,
    /// Ids of the other replicas in the fixed peer set (excludes self).
    pub peers: Vec<String>,
    pub heartbeat_interval: Duration,
    pub election_timeout_base: Duration,
    pub election_timeout_jitter_ms: u64,
    pub election_timeout_check_interval: Duration,
    /// `USE_DELAY`: pause this long before each replication round's per-peer
    /// dispatch, for partition tests. `None` means no pause.
    pub replication_delay: Option<Duration>,
}

impl RaftConfig {
    pub fn new(server_id: String, peers: Vec<String>, use_delay: bool) -> Self {
        Self {
            server_id,
            peers,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            election_timeout_base: ELECTION_TIMEOUT_BASE,
            election_timeout_jitter_ms: ELECTION_TIMEOUT_JITTER_MS,
            election_timeout_check_interval: ELECTION_TIMEOUT_CHECK_INTERVAL,
            replication_delay: use_delay.then_some(REPLICATION_FAN_OUT_TEST_DELAY),
        }
    }
}

pub struct RaftState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub role: ServerRole,
    pub leader_id: Option<String>,
    pub last_heartbeat: Instant,
    pub votes_received: HashSet<String>,

    /// `log[i]` has `index == i + 1`; an empty log means "no entries yet".
    pub log: Vec<LogEntry>,
    pub commit_index: u64,
    pub last_applied: u64,

    pub next_index: HashMap<String, u64>,
    pub match_index: HashMap<String, u64>,
}

impl RaftState {
    fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: ServerRole::Follower,
            leader_id: None,
            last_heartbeat: Instant::now(),
            votes_received: HashSet::new(),
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        }
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Term of the entry at 1-based `index`, or 0 if out of range (index 0
    /// is the implicit "before the log" sentinel).
    fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.log
            .get((index - 1) as usize)
            .map(|e| e.term)
            .unwrap_or(0)
    }
}

pub struct RaftNode {
    pub config: RaftConfig,
    pub state: Mutex<RaftState>,
    transport: Arc<dyn RaftTransport>,
    store: Arc<PersistentStore>,
}

impl RaftNode {
    pub async fn new(config: RaftConfig, transport: Arc<dyn RaftTransport>, store: Arc<PersistentStore>) -> Arc<Self> {
        let mut state = RaftState::new();
        let persisted = store.raft_state().await;
        state.current_term = persisted.current_term;
        state.voted_for = persisted.voted_for;
        state.log = store.log().await;
        state.commit_index = state.last_log_index();
        state.last_applied = state.commit_index;

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            transport,
            store,
        })
    }

    pub async fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock().await;
        (state.current_term, state.role == ServerRole::Leader)
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == ServerRole::Leader
    }

    pub async fn leader_id(&self) -> Option<String> {
        self.state.lock().await.leader_id.clone()
    }

    /// Spawn the election ticker and heartbeat loop as long-lived background
    /// tasks.
    pub fn start(self: &Arc<Self>) {
        let election = Arc::clone(self);
        tokio::spawn(async move { election.run_election_timer().await });

        let heartbeat = Arc::clone(self);
        tokio::spawn(async move { heartbeat.run_heartbeat_sender().await });
    }

    async fn run_election_timer(self: Arc<Self>) {
        loop {
            sleep(self.config.election_timeout_check_interval).await;
            let timeout = self.random_election_timeout();

            let should_start_election = {
                let state = self.state.lock().await;
                state.role != ServerRole::Leader && state.last_heartbeat.elapsed() >= timeout
            };

            if should_start_election {
                self.start_election().await;
            }
        }
    }

    fn random_election_timeout(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.config.election_timeout_jitter_ms);
        self.config.election_timeout_base + Duration::from_millis(jitter)
    }

    async fn start_election(self: &Arc<Self>) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().await;
            state.role = ServerRole::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.config.server_id.clone());
            state.votes_received.clear();
            state.votes_received.insert(self.config.server_id.clone());
            state.last_heartbeat = Instant::now();
            (state.current_term, state.last_log_index(), state.last_log_term())
        };
        self.persist_term().await;
        log::info!("[{}] starting election for term {term}", self.config.server_id);

        let majority = self.majority();
        let mut votes_granted = 1usize;

        let args = RequestVoteArgs {
            term,
            candidate_id: self.config.server_id.clone(),
            last_log_index,
            last_log_term,
        };

        let mut tasks = Vec::new();
        for peer in &self.config.peers {
            let transport = Arc::clone(&self.transport);
            let peer = peer.clone();
            let args = args.clone();
            tasks.push(tokio::spawn(async move {
                (peer.clone(), transport.request_vote(&peer, args).await)
            }));
        }

        for task in tasks {
            let (peer, result) = match task.await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let reply = match result {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("[{}] request_vote to {peer} failed: {e}", self.config.server_id);
                    continue;
                }
            };

            if reply.term > term {
                self.step_down(reply.term).await;
                return;
            }

            let still_candidate = {
                let state = self.state.lock().await;
                state.role == ServerRole::Candidate && state.current_term == term
            };
            if !still_candidate {
                return;
            }

            if reply.vote_granted {
                votes_granted += 1;
                if votes_granted >= majority {
                    self.become_leader().await;
                    return;
                }
            }
        }

        let mut state = self.state.lock().await;
        if state.role == ServerRole::Candidate && state.current_term == term {
            state.role = ServerRole::Follower;
        }
    }

    fn majority(&self) -> usize {
        (self.config.peers.len() + 1) / 2 + 1
    }

    async fn become_leader(self: &Arc<Self>) {
        let (term, commit_index) = {
            let mut state = self.state.lock().await;
            state.role = ServerRole::Leader;
            state.leader_id = Some(self.config.server_id.clone());
            let last_index = state.last_log_index();
            for peer in &self.config.peers {
                state.next_index.insert(peer.clone(), last_index + 1);
                state.match_index.insert(peer.clone(), 0);
            }
            state.match_index.insert(self.config.server_id.clone(), last_index);
            log::info!("[{}] became leader for term {}", self.config.server_id, state.current_term);
            (state.current_term, state.commit_index)
        };
        self.broadcast_append_entries(term, commit_index).await;
    }

    async fn step_down(&self, new_term: u64) {
        let mut state = self.state.lock().await;
        if new_term > state.current_term {
            state.current_term = new_term;
            state.voted_for = None;
        }
        state.role = ServerRole::Follower;
        drop(state);
        self.persist_term().await;
    }

    async fn run_heartbeat_sender(self: Arc<Self>) {
        loop {
            sleep(self.config.heartbeat_interval).await;
            let (is_leader, term, commit_index) = {
                let state = self.state.lock().await;
                (state.role == ServerRole::Leader, state.current_term, state.commit_index)
            };
            if is_leader {
                self.broadcast_append_entries(term, commit_index).await;
            }
        }
    }

    /// Leader-side replication: send `AppendEntries` (possibly empty, i.e. a
    /// heartbeat) to every peer in parallel and process the replies.
    async fn broadcast_append_entries(self: &Arc<Self>, term: u64, leader_commit: u64) {
        if let Some(delay) = self.config.replication_delay {
            sleep(delay).await;
        }

        let mut tasks = Vec::new();
        for peer in self.config.peers.clone() {
            let (prev_log_index, prev_log_term, entries) = {
                let state = self.state.lock().await;
                let last_index = state.last_log_index();
                let next_index = *state.next_index.get(&peer).unwrap_or(&(last_index + 1));
                let prev_index = next_index.saturating_sub(1);
                let prev_term = state.term_at(prev_index);
                let entries = if next_index <= last_index {
                    state.log[(next_index - 1) as usize..].to_vec()
                } else {
                    Vec::new()
                };
                (prev_index, prev_term, entries)
            };

            let args = AppendEntriesArgs {
                term,
                leader_id: self.config.server_id.clone(),
                prev_log_index,
                prev_log_term,
                entries: entries.clone(),
                leader_commit,
            };
            let sent_len = entries.len() as u64;
            let transport = Arc::clone(&self.transport);
            let peer_id = peer.clone();
            tasks.push(tokio::spawn(async move {
                let result = transport.append_entries(&peer_id, args).await;
                (peer_id, prev_log_index, sent_len, result)
            }));
        }

        for task in tasks {
            let (peer, prev_log_index, sent_len, result) = match task.await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let reply = match result {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("[{}] append_entries to {peer} failed: {e}", self.config.server_id);
                    continue;
                }
            };
            self.handle_append_entries_reply(term, peer, prev_log_index, sent_len, reply).await;
        }
    }

    async fn handle_append_entries_reply(
        &self,
        sent_term: u64,
        peer: String,
        prev_log_index: u64,
        sent_len: u64,
        reply: AppendEntriesReply,
    ) {
        if reply.term > sent_term {
            self.step_down(reply.term).await;
            return;
        }

        let mut state = self.state.lock().await;
        if state.role != ServerRole::Leader || state.current_term != sent_term {
            return;
        }

        if reply.success {
            let new_match = std::cmp::max(prev_log_index + sent_len, reply.last_log_index);
            let cur_match = state.match_index.get(&peer).copied().unwrap_or(0);
            if new_match > cur_match {
                state.match_index.insert(peer.clone(), new_match);
            }
            let desired_next = new_match.saturating_add(1);
            let cur_next = state.next_index.get(&peer).copied().unwrap_or(1);
            if desired_next > cur_next {
                state.next_index.insert(peer, desired_next);
            }
            self.advance_commit_index(&mut state).await;
        } else {
            let suggested = reply.last_log_index.saturating_add(1).max(1);
            let cur_next = state.next_index.get(&peer).copied().unwrap_or(1);
            if suggested < cur_next {
                state.next_index.insert(peer, suggested);
            }
        }
    }

    /// Advance `commit_index` to the highest index replicated on a majority,
    /// restricted to the current term (Raft only commits current-term
    /// entries directly; earlier terms ride along transitively).
    async fn advance_commit_index(&self, state: &mut RaftState) {
        let majority = self.majority();
        let last_index = state.last_log_index();
        let mut new_commit = state.commit_index;

        for n in (state.commit_index + 1)..=last_index {
            if state.term_at(n) != state.current_term {
                continue;
            }
            let count = 1 + self
                .config
                .peers
                .iter()
                .filter(|p| state.match_index.get(*p).copied().unwrap_or(0) >= n)
                .count();
            if count >= majority {
                new_commit = n;
            }
        }

        if new_commit > state.commit_index {
            state.commit_index = new_commit;
            self.apply_committed(state).await;
        }
    }

    /// Apply every entry in `(last_applied, commit_index]`: create its order
    /// row and persist order+log atomically.
    async fn apply_committed(&self, state: &mut RaftState) {
        while state.last_applied < state.commit_index {
            let next = state.last_applied + 1;
            let entry = state.log[(next - 1) as usize].clone();
            let order = Order {
                order_number: entry.index,
                product_name: entry.payload.product_name.clone(),
                quantity: entry.payload.quantity,
            };
            let raft = crate::domain::RaftPersistentState {
                current_term: state.current_term,
                voted_for: state.voted_for.clone(),
            };
            self.store.apply(raft, state.log.clone(), order).await;
            state.last_applied = next;
        }
    }

    async fn persist_term(&self) {
        let state = self.state.lock().await;
        let raft = crate::domain::RaftPersistentState {
            current_term: state.current_term,
            voted_for: state.voted_for.clone(),
        };
        drop(state);
        self.store.persist_term(raft).await;
    }

    /// `RequestVote` RPC endpoint.
    pub async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock().await;

        if args.term < state.current_term {
            return RequestVoteReply {
                term: state.current_term,
                vote_granted: false,
            };
        }
        if args.term > state.current_term {
            state.current_term = args.term;
            state.voted_for = None;
            state.role = ServerRole::Follower;
        }

        let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(&args.candidate_id);
        let log_up_to_date = args.last_log_term > state.last_log_term()
            || (args.last_log_term == state.last_log_term() && args.last_log_index >= state.last_log_index());

        let vote_granted = can_vote && log_up_to_date;
        if vote_granted {
            state.voted_for = Some(args.candidate_id.clone());
            state.last_heartbeat = Instant::now();
        }
        let term = state.current_term;
        drop(state);
        self.persist_term().await;

        log::info!(
            "[{}] vote request from {} for term {}: granted={vote_granted}",
            self.config.server_id,
            args.candidate_id,
            args.term
        );
        RequestVoteReply { term, vote_granted }
    }

    /// `AppendEntries` RPC endpoint (also serves as heartbeat when `entries`
    /// is empty).
    pub async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock().await;

        if args.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                last_log_index: state.last_log_index(),
            };
        }
        if args.term > state.current_term {
            state.current_term = args.term;
            state.voted_for = None;
        }
        state.role = ServerRole::Follower;
        state.leader_id = Some(args.leader_id.clone());
        state.last_heartbeat = Instant::now();

        let prev_ok = args.prev_log_index == 0
            || (args.prev_log_index <= state.last_log_index()
                && state.term_at(args.prev_log_index) == args.prev_log_term);

        if !prev_ok {
            let term = state.current_term;
            let last_log_index = state.last_log_index();
            drop(state);
            self.persist_term().await;
            return AppendEntriesReply {
                term,
                success: false,
                last_log_index,
            };
        }

        if !args.entries.is_empty() {
            let mut insert_at = args.prev_log_index as usize;
            for entry in args.entries {
                if insert_at < state.log.len() {
                    if state.log[insert_at].term != entry.term {
                        state.log.truncate(insert_at);
                        state.log.push(entry);
                    }
                } else {
                    state.log.push(entry);
                }
                insert_at += 1;
            }
        }

        if args.leader_commit > state.commit_index {
            state.commit_index = std::cmp::min(args.leader_commit, state.last_log_index());
            self.apply_committed(&mut state).await;
        }

        let term = state.current_term;
        let last_log_index = state.last_log_index();
        let log = state.log.clone();
        let raft = crate::domain::RaftPersistentState {
            current_term: state.current_term,
            voted_for: state.voted_for.clone(),
        };
        drop(state);
        self.store.persist_log(raft, log).await;

        AppendEntriesReply {
            term,
            success: true,
            last_log_index,
        }
    }

    /// Leader-only: append a new order-creation command, replicate it, and
    /// block until it is either committed or superseded. Returns
    /// `(committed, assigned_order)`.
    pub async fn submit(&self, command: String, payload: OrderPayload) -> anyhow::Result<(bool, Option<Order>)> {
        let (term, index) = {
            let mut state = self.state.lock().await;
            if state.role != ServerRole::Leader {
                anyhow::bail!("not the leader");
            }
            let index = state.last_log_index() + 1;
            let entry = LogEntry {
                index,
                term: state.current_term,
                command,
                payload,
            };
            state.log.push(entry);
            let last = state.last_log_index();
            state.match_index.insert(self.config.server_id.clone(), last);
            for peer in &self.config.peers {
                state.next_index.entry(peer.clone()).or_insert(last + 1);
            }
            (state.current_term, index)
        };
        self.persist_term().await;

        let commit_index = { self.state.lock().await.commit_index };
        self.broadcast_append_entries(term, commit_index).await;

        let mut state = self.state.lock().await;
        if state.role != ServerRole::Leader || state.current_term != term {
            // Stepped down before we know whether the entry committed.
            // Drop the tentative entry if it's still ours and uncommitted;
            // a log belonging to whatever leader wins next will otherwise
            // overwrite it anyway (Leader Completeness).
            if state.commit_index < index
                && state.log.len() as u64 == index
                && state.term_at(index) == term
            {
                state.log.pop();
            }
            return Ok((false, None));
        }
        if state.commit_index >= index && state.term_at(index) == term {
            let order = self.store.order(index).await;
            Ok((true, order))
        } else {
            Ok((false, None))
        }
    }
}
