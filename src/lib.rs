//! # raft-consensus
//!
//! A Raft consensus core managing a replicated auction/bidding state
//! machine: leader election, log replication, and the client command
//! contract, with the application state machine, client transport, and
//! snapshotting left as external collaborators.
//!
//! ## Components
//!
//! - [`timers`] — one-shot leader/election/heartbeat timers with
//!   generation-tagged fires so a race with cancellation is detected.
//! - [`log_store`] — durable, append-only (with rewritable suffix) log.
//! - [`transport`] — point-to-point peer delivery, in-process or TCP.
//! - [`rpc`] — the three RPC families plus a reserved Snapshot family.
//! - [`executor`] — the auction/bidding state machine commands are
//!   applied against.
//! - [`node`] — the Follower/Candidate/Leader protocol itself.
//! - [`persistence`] — durable `currentTerm`/`votedFor`.
//! - [`client`] — the client command request/response contract.
//!
//! ## Example
//!
//! ```no_run
//! use raft_core::config::NodeConfig;
//! use raft_core::executor::AuctionStore;
//! use raft_core::log_store::LogStore;
//! use raft_core::node;
//! use raft_core::persistence::PersistentState;
//! use raft_core::transport::ChannelTransport;
//! use raft_core::types::{Command, NodeId};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> raft_core::error::Result<()> {
//! let nodes = vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")];
//! let mesh = ChannelTransport::mesh(&nodes);
//!
//! let mut peers = HashMap::new();
//! peers.insert("a".to_string(), NodeId::from("a"));
//! peers.insert("b".to_string(), NodeId::from("b"));
//! peers.insert("c".to_string(), NodeId::from("c"));
//!
//! let config = NodeConfig::with_defaults("a", peers, "/tmp/raft-a");
//! let (handle, _join) = node::spawn(
//!     config,
//!     LogStore::in_memory(),
//!     PersistentState::in_memory(),
//!     mesh[&NodeId::from("a")].clone(),
//!     Arc::new(AuctionStore::new()),
//! );
//!
//! let _response = handle.submit(Command::NewUser {
//!     username: "alice".into(),
//!     password: "hunter2".into(),
//! });
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod log_store;
pub mod node;
pub mod persistence;
pub mod rpc;
pub mod timers;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use node::RaftHandle;
