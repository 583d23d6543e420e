//! Core data types shared across the Raft core.
//!
//! Node identity, terms, log entries, and the fixed set of application
//! commands the external auction/bidding state machine understands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable identifier for a cluster member.
///
/// Cluster membership is fixed at startup; ids are compared for equality
/// and hashed, never parsed or interpreted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Monotonically non-decreasing logical epoch of leadership.
pub type Term = u64;

/// Zero-based position in the log.
pub type LogIndex = u64;

/// Current role of a node in the Raft state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        };
        write!(f, "{s}")
    }
}

/// A single replicated log entry.
///
/// The client callback is deliberately absent here: it is a leader-local
/// concern tracked in the sidecar map (`client::PendingClients`), never
/// serialized onto the wire or the log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: Command,
}

/// Tagged union over the command kinds the auction/bidding state machine
/// recognizes. Marked `non_exhaustive` so new kinds can be added without a
/// breaking change to callers outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Command {
    NewUser {
        username: String,
        password: String,
    },
    NewAuction {
        user: String,
        start_date: u64,
        obj_name: String,
        obj_desc: String,
        start_price: u64,
    },
    NewBid {
        user: String,
        auction_id: u64,
        value: u64,
    },
    CloseAuction {
        auction_id: u64,
        closing_date: u64,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NewUser { username, .. } => write!(f, "NEW_USER({username})"),
            Command::NewAuction { obj_name, .. } => write!(f, "NEW_AUCTION({obj_name})"),
            Command::NewBid {
                auction_id, value, ..
            } => write!(f, "NEW_BID(auction={auction_id}, value={value})"),
            Command::CloseAuction { auction_id, .. } => write!(f, "CLOSE_AUCTION({auction_id})"),
        }
    }
}
