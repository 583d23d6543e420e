//! Command Executor: applies a committed log entry to the external
//! application state machine. The only component permitted to touch
//! application state.
//!
//! Grounded on `consensus/state_machine.rs`'s `StateMachine::apply`
//! match-on-variant dispatch and its `RwLock`-guarded table plus
//! `query`/`keys`/`size` read surface, generalized from a single opaque
//! `HashMap<String, Vec<u8>>` into typed per-entity tables since the
//! command set here is fixed, not generic bytes.

use crate::client::ExecutionResult;
use crate::types::Command;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Applies committed commands to application state. Execution must be
/// deterministic: given the same committed prefix, every replica's
/// executor must produce the same result for each entry.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn apply(&self, command: &Command) -> ExecutionResult;
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Auction {
    pub id: u64,
    pub owner: String,
    pub start_date: u64,
    pub obj_name: String,
    pub obj_desc: String,
    pub start_price: u64,
    pub closing_date: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    pub auction_id: u64,
    pub bidder: String,
    pub value: u64,
}

/// The default, in-process auction/bidding state machine the core's tests
/// and examples run against. An external deployment can supply any other
/// [`CommandExecutor`] implementation in its place.
#[derive(Default)]
pub struct AuctionStore {
    users: RwLock<HashMap<String, User>>,
    auctions: RwLock<HashMap<u64, Auction>>,
    bids: RwLock<Vec<Bid>>,
    next_auction_id: RwLock<u64>,
}

impl AuctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user(&self, username: &str) -> Option<User> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn auction(&self, id: u64) -> Option<Auction> {
        self.auctions.read().await.get(&id).cloned()
    }

    pub async fn bids_for(&self, auction_id: u64) -> Vec<Bid> {
        self.bids
            .read()
            .await
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .cloned()
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl CommandExecutor for AuctionStore {
    async fn apply(&self, command: &Command) -> ExecutionResult {
        match command {
            Command::NewUser { username, password } => {
                let mut users = self.users.write().await;
                if users.contains_key(username) {
                    return Err(format!("user {username} already exists"));
                }
                users.insert(
                    username.clone(),
                    User {
                        username: username.clone(),
                        password: password.clone(),
                    },
                );
                debug!(username, "applied NEW_USER");
                Ok(format!("user {username} created"))
            }
            Command::NewAuction {
                user,
                start_date,
                obj_name,
                obj_desc,
                start_price,
            } => {
                if !self.users.read().await.contains_key(user) {
                    return Err(format!("unknown user {user}"));
                }
                let mut next_id = self.next_auction_id.write().await;
                let id = *next_id;
                *next_id += 1;
                self.auctions.write().await.insert(
                    id,
                    Auction {
                        id,
                        owner: user.clone(),
                        start_date: *start_date,
                        obj_name: obj_name.clone(),
                        obj_desc: obj_desc.clone(),
                        start_price: *start_price,
                        closing_date: None,
                    },
                );
                debug!(id, obj_name, "applied NEW_AUCTION");
                Ok(id.to_string())
            }
            Command::NewBid {
                user,
                auction_id,
                value,
            } => {
                if !self.users.read().await.contains_key(user) {
                    return Err(format!("unknown user {user}"));
                }
                let auctions = self.auctions.read().await;
                let auction = auctions
                    .get(auction_id)
                    .ok_or_else(|| format!("unknown auction {auction_id}"))?;
                if auction.closing_date.is_some() {
                    return Err(format!("auction {auction_id} is closed"));
                }
                if *value <= auction.start_price {
                    return Err(format!(
                        "bid {value} does not exceed start price {}",
                        auction.start_price
                    ));
                }
                drop(auctions);
                self.bids.write().await.push(Bid {
                    auction_id: *auction_id,
                    bidder: user.clone(),
                    value: *value,
                });
                debug!(auction_id, value, "applied NEW_BID");
                Ok(format!("bid {value} accepted on auction {auction_id}"))
            }
            Command::CloseAuction {
                auction_id,
                closing_date,
            } => {
                let mut auctions = self.auctions.write().await;
                let auction = auctions
                    .get_mut(auction_id)
                    .ok_or_else(|| format!("unknown auction {auction_id}"))?;
                if auction.closing_date.is_some() {
                    return Err(format!("auction {auction_id} already closed"));
                }
                auction.closing_date = Some(*closing_date);
                debug!(auction_id, "applied CLOSE_AUCTION");
                Ok(format!("auction {auction_id} closed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_user_then_auction_then_bid_then_close() {
        let store = AuctionStore::new();
        store
            .apply(&Command::NewUser {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();

        let id: u64 = store
            .apply(&Command::NewAuction {
                user: "alice".into(),
                start_date: 1000,
                obj_name: "vase".into(),
                obj_desc: "a vase".into(),
                start_price: 50,
            })
            .await
            .unwrap()
            .parse()
            .unwrap();

        store
            .apply(&Command::NewUser {
                username: "bob".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();

        store
            .apply(&Command::NewBid {
                user: "bob".into(),
                auction_id: id,
                value: 75,
            })
            .await
            .unwrap();

        store
            .apply(&Command::CloseAuction {
                auction_id: id,
                closing_date: 2000,
            })
            .await
            .unwrap();

        let auction = store.auction(id).await.unwrap();
        assert_eq!(auction.closing_date, Some(2000));
        assert_eq!(store.bids_for(id).await.len(), 1);
    }

    #[tokio::test]
    async fn bid_below_start_price_is_rejected_but_deterministic() {
        let store = AuctionStore::new();
        store
            .apply(&Command::NewUser {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        let id: u64 = store
            .apply(&Command::NewAuction {
                user: "alice".into(),
                start_date: 0,
                obj_name: "lamp".into(),
                obj_desc: "a lamp".into(),
                start_price: 100,
            })
            .await
            .unwrap()
            .parse()
            .unwrap();

        let result = store
            .apply(&Command::NewBid {
                user: "alice".into(),
                auction_id: id,
                value: 10,
            })
            .await;
        assert!(result.is_err());
        assert!(store.bids_for(id).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_user_is_rejected() {
        let store = AuctionStore::new();
        store
            .apply(&Command::NewUser {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        let result = store
            .apply(&Command::NewUser {
                username: "alice".into(),
                password: "other".into(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.user_count().await, 1);
    }
}
