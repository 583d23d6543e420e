//! Client command contract: the request/response shape a submitted
//! command gets, and the leader-local sidecar that resolves a pending
//! client once its log entry is applied, deposed, or truncated.
//!
//! The core only defines this contract; wiring an HTTP/websocket listener
//! on top of [`RaftHandle::submit`](crate::node::RaftHandle::submit) is
//! left to whatever embeds this crate.

use crate::types::{LogIndex, NodeId};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// What a client sees back, eventually: the executor's result once
/// committed-and-applied, or one of the three client-visible error kinds.
#[derive(Debug, Clone)]
pub struct ClientCommandResponse {
    pub outcome: Result<ExecutionResult, ClientError>,
}

/// The executor's result for a successfully applied command. `Ok` wraps
/// the executor's own result value; `Err` is an application-level failure
/// that is still considered "applied" — it is not rolled back.
pub type ExecutionResult = Result<String, String>;

/// The only error kinds visible to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// This node is not the leader; `leader_hint` names the node the
    /// client should retry against, if known.
    NotLeader { leader_hint: Option<NodeId> },
    /// The entry was accepted by the leader but that leader lost
    /// leadership before the entry committed.
    Deposed,
    /// No outcome was observed before the caller's deadline.
    Timeout,
}

/// Per-leader sidecar mapping a pending client's log index to the channel
/// that will deliver its eventual response. Never replicated: followers
/// have no entries in this map for entries they receive from the leader.
#[derive(Default)]
pub struct PendingClients {
    waiters: HashMap<LogIndex, oneshot::Sender<ClientCommandResponse>>,
}

impl PendingClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the entry that will land at `index`.
    pub fn register(&mut self, index: LogIndex, sender: oneshot::Sender<ClientCommandResponse>) {
        self.waiters.insert(index, sender);
    }

    /// Resolve the waiter for `index` with `result`, if one is registered.
    pub fn resolve(&mut self, index: LogIndex, result: ExecutionResult) {
        if let Some(sender) = self.waiters.remove(&index) {
            let _ = sender.send(ClientCommandResponse { outcome: Ok(result) });
        }
    }

    /// Resolve every still-pending waiter with `DEPOSED`, used when this
    /// node steps down from leader or truncates entries a client was
    /// waiting on.
    pub fn depose_all(&mut self) {
        for (_, sender) in self.waiters.drain() {
            let _ = sender.send(ClientCommandResponse {
                outcome: Err(ClientError::Deposed),
            });
        }
    }

    /// Resolve every waiter at or past `from_index` with `DEPOSED`,
    /// used when a follower-turned-leader's own entries beyond that
    /// index get truncated away (can only happen to a non-leader, but
    /// kept generic for symmetry with [`Self::depose_all`]).
    pub fn depose_from(&mut self, from_index: LogIndex) {
        let stale: Vec<LogIndex> = self
            .waiters
            .keys()
            .copied()
            .filter(|&i| i >= from_index)
            .collect();
        for index in stale {
            if let Some(sender) = self.waiters.remove(&index) {
                let _ = sender.send(ClientCommandResponse {
                    outcome: Err(ClientError::Deposed),
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
