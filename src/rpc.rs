//! RPC Codec: the three Raft message families, wrapped in a tagged
//! envelope carrying sender identity and term.
//!
//! Grounded on `consensus/log_manager.rs`'s `bincode::serialize`/
//! `deserialize` usage. Encoding is bincode specifically, but nothing
//! in the rest of the core depends on that choice — any self-describing
//! format providing the same fields would do.

use crate::error::{Error, Result};
use crate::types::{LogEntry, LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every RPC exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: NodeId,
    pub term: Term,
    pub is_response: bool,
    pub payload: RpcPayload,
}

/// The three RPC families plus a reserved, unimplemented Snapshot family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcPayload {
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    RequestVoteRequest(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    /// Declared but unimplemented: a log compacted far enough behind a
    /// slow follower has no recovery path here other than a full replay
    /// from index zero.
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub prev_log_index: Option<LogIndex>,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Highest index the follower has successfully matched with the
    /// leader.
    pub match_index: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: Option<LogIndex>,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Encode an envelope for transmission.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    bincode::serialize(envelope).map_err(|e| Error::protocol(format!("encoding envelope: {e}")))
}

/// Decode bytes received from a peer into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    bincode::deserialize(bytes).map_err(|e| Error::protocol(format!("decoding envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;

    fn sample_entry() -> LogEntry {
        LogEntry {
            term: 3,
            command: Command::NewBid {
                user: "bob".into(),
                auction_id: 1,
                value: 500,
            },
        }
    }

    #[test]
    fn append_entries_request_round_trips() {
        let envelope = Envelope {
            sender_id: NodeId::from("leader"),
            term: 3,
            is_response: false,
            payload: RpcPayload::AppendEntriesRequest(AppendEntriesRequest {
                term: 3,
                prev_log_index: Some(4),
                prev_log_term: 2,
                entries: vec![sample_entry()],
                leader_commit: Some(4),
            }),
        };
        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        let round_tripped = encode(&decoded).unwrap();
        assert_eq!(bytes, round_tripped);
    }

    #[test]
    fn empty_entries_heartbeat_round_trips() {
        let envelope = Envelope {
            sender_id: NodeId::from("leader"),
            term: 3,
            is_response: false,
            payload: RpcPayload::AppendEntriesRequest(AppendEntriesRequest {
                term: 3,
                prev_log_index: None,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: None,
            }),
        };
        let bytes = encode(&envelope).unwrap();
        assert_eq!(encode(&decode(&bytes).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn request_vote_round_trips() {
        let envelope = Envelope {
            sender_id: NodeId::from("candidate"),
            term: 9,
            is_response: true,
            payload: RpcPayload::RequestVoteResponse(RequestVoteResponse {
                term: 9,
                vote_granted: true,
            }),
        };
        let bytes = encode(&envelope).unwrap();
        assert_eq!(encode(&decode(&bytes).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn malformed_bytes_are_a_protocol_error() {
        let err = decode(&[0xff, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
