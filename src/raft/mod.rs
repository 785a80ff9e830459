//! Raft consensus: wire types, the transport abstraction, and the core
//! state machine.

pub mod local_transport;
pub mod node;
pub mod transport;
pub mod types;

pub use local_transport::LocalRaftTransport;
pub use node::{RaftConfig, RaftNode};
pub use transport::{HttpRaftTransport, RaftTransport};
pub use types::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply, ServerRole};
