//! Shared cluster-building helpers for the multi-node integration tests.
//! Not a published module — `tests/*.rs` each pull it in via `mod common;`.

use raft_core::client::{ClientCommandResponse, ClientError};
use raft_core::config::NodeConfig;
use raft_core::executor::AuctionStore;
use raft_core::log_store::LogStore;
use raft_core::node::{self, RaftHandle};
use raft_core::persistence::PersistentState;
use raft_core::transport::ChannelTransport;
use raft_core::types::{Command, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Build a [`NodeConfig`] for `id` in a cluster made up of `all_ids`
/// (including `id` itself). `leader_timeout`/`election_timeout` are
/// `(min, max)` windows; pass equal bounds to pin an exact duration the
/// way the literal end-to-end scenarios specify fixed per-node timeouts.
pub fn node_config(
    id: &str,
    all_ids: &[&str],
    leader_timeout: (Duration, Duration),
    election_timeout: (Duration, Duration),
    heartbeat_timeout: Duration,
) -> NodeConfig {
    let mut peers = HashMap::new();
    for peer_id in all_ids {
        peers.insert(format!("addr-{peer_id}"), NodeId::from(*peer_id));
    }
    let mut config = NodeConfig::with_defaults(id, peers, format!("/tmp/raft-test-{id}"));
    config.min_leader_timeout = leader_timeout.0;
    config.max_leader_timeout = leader_timeout.1;
    config.min_election_timeout = election_timeout.0;
    config.max_election_timeout = election_timeout.1;
    config.heartbeat_timeout = heartbeat_timeout;
    config.min_election_delay = Duration::ZERO;
    config
}

/// Spawn one node per config, wired together over an in-process
/// [`ChannelTransport`] mesh, each with its own in-memory log and hard
/// state and a fresh [`AuctionStore`].
pub fn spawn_cluster(configs: Vec<NodeConfig>) -> (HashMap<NodeId, RaftHandle>, Vec<JoinHandle<()>>) {
    let (handles, joins, _stores) = spawn_cluster_with_stores(configs);
    (handles, joins)
}

/// Same as [`spawn_cluster`], but also returns each node's own
/// [`AuctionStore`] handle so a test can inspect what was actually
/// applied to that node's state machine (not just the client-visible
/// outcome of a single submission).
pub fn spawn_cluster_with_stores(
    configs: Vec<NodeConfig>,
) -> (HashMap<NodeId, RaftHandle>, Vec<JoinHandle<()>>, HashMap<NodeId, Arc<AuctionStore>>) {
    let ids: Vec<NodeId> = configs.iter().map(|c| c.id.clone()).collect();
    let mut mesh = ChannelTransport::mesh(&ids);

    let mut handles = HashMap::new();
    let mut joins = Vec::new();
    let mut stores = HashMap::new();
    for config in configs {
        let id = config.id.clone();
        let transport = mesh.remove(&id).expect("transport for every configured id");
        let store = Arc::new(AuctionStore::new());
        let (handle, join) = node::spawn(
            config,
            LogStore::in_memory(),
            PersistentState::in_memory(),
            transport,
            store.clone(),
        );
        handles.insert(id.clone(), handle);
        joins.push(join);
        stores.insert(id, store);
    }
    (handles, joins, stores)
}

/// Submit `command` to `handle`, retrying on `NotLeader` until some
/// attempt succeeds or fails with anything else. Under paused Tokio time
/// this advances as fast as the cluster's own timers allow.
pub async fn submit_retrying(
    handle: &RaftHandle,
    command: Command,
    max_attempts: usize,
    retry_delay: Duration,
) -> ClientCommandResponse {
    for attempt in 0..max_attempts {
        let response = handle
            .submit(command.clone())
            .await
            .expect("node event loop is still running");
        match &response.outcome {
            Ok(_) => return response,
            Err(ClientError::NotLeader { .. }) if attempt + 1 < max_attempts => {
                tokio::time::sleep(retry_delay).await;
            }
            _ => return response,
        }
    }
    panic!("no leader accepted the command within {max_attempts} attempts");
}
