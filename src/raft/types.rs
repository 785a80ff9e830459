//! Raft wire types. Field casing follows spec.md §6's wire contract exactly
//! (`RequestVote`/`RequestVoteReply` use PascalCase fields, `AppendEntries`
//! request uses PascalCase but its reply uses lowercase `term`/`success`) —
//! this is an HTTP JSON surface now, not the teacher's internal TCP enum, so
//! the wire shape is dictated by the spec rather than by Rust convention.

use serde::{Deserialize, Serialize};

use crate::domain::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    #[serde(rename = "Term")]
    pub term: u64,
    #[serde(rename = "CandidateId")]
    pub candidate_id: String,
    #[serde(rename = "LastLogIndex")]
    pub last_log_index: u64,
    #[serde(rename = "LastLogTerm")]
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    #[serde(rename = "Term")]
    pub term: u64,
    #[serde(rename = "VoteGranted")]
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    #[serde(rename = "Term")]
    pub term: u64,
    #[serde(rename = "LeaderId")]
    pub leader_id: String,
    #[serde(rename = "PrevLogIndex")]
    pub prev_log_index: u64,
    #[serde(rename = "PrevLogTerm")]
    pub prev_log_term: u64,
    #[serde(rename = "Entries")]
    pub entries: Vec<LogEntry>,
    #[serde(rename = "LeaderCommit")]
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// Follower's last log index after applying this RPC; used by the
    /// leader as a conflict hint to fast-forward/rewind `next_index`.
    pub last_log_index: u64,
}
