//! Configuration for a Raft node.
//!
//! Timeout fields have sane defaults (lifted from the original Raft
//! paper's typical ranges); identity, ports, and peers do not, since
//! there is no safe default cluster membership.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration supplied when constructing a [`crate::node::RaftNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identifier.
    pub id: NodeId,

    /// TCP port for peer RPCs.
    pub protocol_port: u16,

    /// TCP port for client command submission.
    pub client_port: u16,

    /// Randomized follower election-trigger window.
    #[serde(with = "duration_ms")]
    pub min_leader_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub max_leader_timeout: Duration,

    /// Randomized election-retry window (candidate only).
    #[serde(with = "duration_ms")]
    pub min_election_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub max_election_timeout: Duration,

    /// Floor on election frequency; elections started inside this delay of
    /// the previous one are ignored.
    #[serde(with = "duration_ms")]
    pub min_election_delay: Duration,

    /// Per-peer heartbeat interval. Must be strictly less than
    /// `min_leader_timeout`, checked in [`NodeConfig::validate`].
    #[serde(with = "duration_ms")]
    pub heartbeat_timeout: Duration,

    /// Fixed cluster membership: peer address to [`NodeId`].
    pub peers: HashMap<String, NodeId>,

    /// Opaque configuration handed to the command executor untouched.
    #[serde(default)]
    pub executor_config: HashMap<String, String>,

    /// Directory for the durable log file and hard-state file.
    pub data_dir: std::path::PathBuf,

    /// Seed for the election-timeout RNG, so property tests are
    /// reproducible. `None` seeds from OS entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl NodeConfig {
    /// Validate the cross-field invariant every cluster config must
    /// satisfy: heartbeats must fire more often than a follower's
    /// leader-timeout can expire, or every leader would spuriously lose
    /// followers.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_timeout >= self.min_leader_timeout {
            return Err(format!(
                "heartbeat_timeout ({:?}) must be < min_leader_timeout ({:?})",
                self.heartbeat_timeout, self.min_leader_timeout
            ));
        }
        if self.min_leader_timeout > self.max_leader_timeout {
            return Err("min_leader_timeout must be <= max_leader_timeout".into());
        }
        if self.min_election_timeout > self.max_election_timeout {
            return Err("min_election_timeout must be <= max_election_timeout".into());
        }
        Ok(())
    }

    /// Timeout configuration with defaults matching the ranges Ongaro &
    /// Ousterhout (2014) report as working well in practice, for tests
    /// and examples that don't care about exact timing.
    pub fn with_defaults(
        id: impl Into<NodeId>,
        peers: HashMap<String, NodeId>,
        data_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol_port: 7000,
            client_port: 8000,
            min_leader_timeout: Duration::from_millis(150),
            max_leader_timeout: Duration::from_millis(300),
            min_election_timeout: Duration::from_millis(150),
            max_election_timeout: Duration::from_millis(300),
            min_election_delay: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(50),
            peers,
            executor_config: HashMap::new(),
            data_dir: data_dir.into(),
            rng_seed: None,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
