//! Log replication, multi-command convergence, and leader failover.

mod common;

use raft_core::types::{Command, NodeId};
use std::time::Duration;

fn new_user(name: &str) -> Command {
    Command::NewUser {
        username: name.into(),
        password: "pw".into(),
    }
}

fn timeouts() -> ((Duration, Duration), (Duration, Duration), Duration) {
    (
        (Duration::from_millis(100), Duration::from_millis(100)),
        (Duration::from_millis(100), Duration::from_millis(250)),
        Duration::from_millis(15),
    )
}

async fn elect_leader(handles: &std::collections::HashMap<NodeId, raft_core::RaftHandle>) -> NodeId {
    for (id, handle) in handles {
        let response = common::submit_retrying(handle, new_user("probe"), 20, Duration::from_millis(20)).await;
        if matches!(response.outcome, Ok(Ok(_))) {
            return id.clone();
        }
    }
    panic!("no node in the cluster ever accepted the probe command");
}

#[tokio::test(start_paused = true)]
async fn a_single_command_replicates_and_applies_on_the_leader() {
    let ids = ["a", "b", "c"];
    let (lt, et, ht) = timeouts();
    let configs: Vec<_> = ids.iter().map(|id| common::node_config(id, &ids, lt, et, ht)).collect();
    let (handles, _joins, stores) = common::spawn_cluster_with_stores(configs);

    let leader_id = elect_leader(&handles).await;
    let leader = &handles[&leader_id];

    let response = common::submit_retrying(leader, new_user("alice"), 20, Duration::from_millis(20)).await;
    assert!(matches!(response.outcome, Ok(Ok(_))));
    assert!(stores[&leader_id].user("alice").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn multiple_commands_converge_to_identical_state_on_every_node() {
    let ids = ["a", "b", "c"];
    let (lt, et, ht) = timeouts();
    let configs: Vec<_> = ids.iter().map(|id| common::node_config(id, &ids, lt, et, ht)).collect();
    let (handles, _joins, stores) = common::spawn_cluster_with_stores(configs);

    let leader_id = elect_leader(&handles).await;
    let leader = &handles[&leader_id];

    for name in ["alice", "bob", "carol"] {
        let response = common::submit_retrying(leader, new_user(name), 20, Duration::from_millis(20)).await;
        assert!(matches!(response.outcome, Ok(Ok(_))), "{name} should have committed");
    }

    let response = common::submit_retrying(
        leader,
        Command::NewAuction {
            user: "alice".into(),
            start_date: 1,
            obj_name: "vase".into(),
            obj_desc: "ming".into(),
            start_price: 100,
        },
        20,
        Duration::from_millis(20),
    )
    .await;
    assert!(matches!(response.outcome, Ok(Ok(_))));

    // Give the followers' applied index time to catch up to the
    // leader's last AppendEntries heartbeat before inspecting them.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for id in ids {
        let node = NodeId::from(id);
        let store = &stores[&node];
        assert_eq!(store.user_count().await, 3, "node {id} should have all three users");
        assert!(store.auction(1).await.is_some(), "node {id} should have the auction");
    }
}

#[tokio::test(start_paused = true)]
async fn cluster_survives_leader_failure_and_elects_a_new_one() {
    let ids = ["a", "b", "c"];
    let (lt, et, ht) = timeouts();
    let configs: Vec<_> = ids.iter().map(|id| common::node_config(id, &ids, lt, et, ht)).collect();
    let (handles, _joins, stores) = common::spawn_cluster_with_stores(configs);

    let first_leader = elect_leader(&handles).await;
    handles[&first_leader].stop();

    let mut new_leader = None;
    for (id, handle) in &handles {
        if *id == first_leader {
            continue;
        }
        let response = common::submit_retrying(handle, new_user("dave"), 30, Duration::from_millis(20)).await;
        if matches!(response.outcome, Ok(Ok(_))) {
            new_leader = Some(id.clone());
            break;
        }
    }

    let new_leader = new_leader.expect("a surviving node must win a new election");
    assert_ne!(new_leader, first_leader);
    assert!(stores[&new_leader].user("dave").await.is_some());
}
