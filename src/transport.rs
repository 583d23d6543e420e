//! Peer Transport: best-effort, point-to-point delivery of RPC envelopes
//! to each known peer.
//!
//! Grounded on `networking/tcp_transport.rs`'s connection map keyed by
//! `NodeId` and its `mpsc`-fed outbound path, stripped of the RDMA/DPDK/
//! connection-pooling machinery aimed at a high-throughput network stack
//! this core has no use for — a point-to-point best-effort send is all
//! Raft RPC delivery needs. Two implementations share the
//! [`PeerTransport`] trait: [`ChannelTransport`] wires nodes running in the
//! same process (used throughout the integration tests) and
//! [`TcpTransport`] wires nodes running as separate processes.

use crate::error::{Error, Result};
use crate::rpc::{self, Envelope};
use crate::types::NodeId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Fire-and-forget delivery of envelopes to peers. Implementations must
/// not block the caller: sends land on an outbound queue and the
/// handler returns immediately.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Best-effort send to `peer`. Errors are for local bookkeeping only
    /// (e.g. an unknown peer id) — network loss is invisible here and
    /// surfaces to the Raft Node only as a heartbeat timeout.
    async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope addressed to this node, blocking until
    /// one arrives.
    async fn recv(&self) -> Option<Envelope>;
}

/// In-process transport backed by `tokio::mpsc` channels. Used to wire a
/// simulated multi-node cluster inside a single test binary without any
/// sockets.
pub struct ChannelTransport {
    local: NodeId,
    peers: HashMap<NodeId, mpsc::UnboundedSender<Envelope>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl ChannelTransport {
    /// Build a fully-connected mesh of channel transports, one per id in
    /// `node_ids`.
    pub fn mesh(node_ids: &[NodeId]) -> HashMap<NodeId, Arc<ChannelTransport>> {
        let mut senders = HashMap::new();
        let mut inboxes = HashMap::new();
        for id in node_ids {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(id.clone(), tx);
            inboxes.insert(id.clone(), rx);
        }

        node_ids
            .iter()
            .map(|id| {
                let peers = senders
                    .iter()
                    .filter(|(peer, _)| *peer != id)
                    .map(|(peer, tx)| (peer.clone(), tx.clone()))
                    .collect();
                let inbox = inboxes.remove(id).expect("inbox created above");
                (
                    id.clone(),
                    Arc::new(ChannelTransport {
                        local: id.clone(),
                        peers,
                        inbox: Mutex::new(inbox),
                    }),
                )
            })
            .collect()
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()> {
        let sender = self
            .peers
            .get(peer)
            .ok_or_else(|| Error::transport(peer.to_string(), "unknown peer"))?;
        sender
            .send(envelope)
            .map_err(|_| Error::transport(peer.to_string(), "peer channel closed"))
    }

    async fn recv(&self) -> Option<Envelope> {
        self.inbox.lock().await.recv().await
    }
}

/// Real-socket transport for nodes running as separate processes.
/// Connections are established lazily on first send and kept open;
/// a dropped connection is simply re-dialed on the next send, leaving
/// loss detection to the Raft node's own heartbeat timers.
pub struct TcpTransport {
    local: NodeId,
    addresses: HashMap<NodeId, String>,
    connections: RwLock<HashMap<NodeId, TcpStream>>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl TcpTransport {
    /// Bind `listen_addr` for incoming peer connections and return a
    /// transport that can also dial out to `addresses`.
    pub async fn bind(
        local: NodeId,
        listen_addr: &str,
        addresses: HashMap<NodeId, String>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::transport(listen_addr, format!("bind failed: {e}")))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            local,
            addresses,
            connections: RwLock::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        });

        let accept_tx = transport.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let tx = accept_tx.clone();
                        tokio::spawn(Self::read_loop(stream, tx));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });

        Ok(transport)
    }

    async fn read_loop(mut stream: TcpStream, tx: mpsc::UnboundedSender<Envelope>) {
        loop {
            let mut len_buf = [0u8; 4];
            if stream.read_exact(&mut len_buf).await.is_err() {
                debug!("peer connection closed");
                return;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            if stream.read_exact(&mut data).await.is_err() {
                return;
            }
            match rpc::decode(&data) {
                Ok(envelope) => {
                    if tx.send(envelope).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed envelope"),
            }
        }
    }

    async fn dial(&self, peer: &NodeId) -> Result<TcpStream> {
        let addr = self
            .addresses
            .get(peer)
            .ok_or_else(|| Error::transport(peer.to_string(), "unknown peer address"))?;
        TcpStream::connect(addr)
            .await
            .map_err(|e| Error::transport(peer.to_string(), format!("connect failed: {e}")))
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()> {
        let bytes = rpc::encode(&envelope)?;
        let len = (bytes.len() as u32).to_le_bytes();

        // Try the cached connection first; on any failure, redial once.
        {
            let mut conns = self.connections.write().await;
            if let Some(stream) = conns.get_mut(peer) {
                if stream.write_all(&len).await.is_ok() && stream.write_all(&bytes).await.is_ok() {
                    return Ok(());
                }
                conns.remove(peer);
            }
        }

        let mut stream = self.dial(peer).await?;
        stream
            .write_all(&len)
            .await
            .map_err(|e| Error::transport(peer.to_string(), format!("write failed: {e}")))?;
        stream
            .write_all(&bytes)
            .await
            .map_err(|e| Error::transport(peer.to_string(), format!("write failed: {e}")))?;
        self.connections
            .write()
            .await
            .insert(peer.clone(), stream);
        debug!(peer = %peer, local = %self.local, "sent envelope");
        Ok(())
    }

    async fn recv(&self) -> Option<Envelope> {
        self.inbound_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Envelope, RpcPayload, RequestVoteRequest};

    fn vote_request(from: &str, term: u64) -> Envelope {
        Envelope {
            sender_id: NodeId::from(from),
            term,
            is_response: false,
            payload: RpcPayload::RequestVoteRequest(RequestVoteRequest {
                term,
                candidate_id: NodeId::from(from),
                last_log_index: None,
                last_log_term: 0,
            }),
        }
    }

    #[tokio::test]
    async fn channel_mesh_delivers_between_two_nodes() {
        let nodes = vec![NodeId::from("a"), NodeId::from("b")];
        let mesh = ChannelTransport::mesh(&nodes);

        mesh[&NodeId::from("a")]
            .send(&NodeId::from("b"), vote_request("a", 1))
            .await
            .unwrap();

        let received = mesh[&NodeId::from("b")].recv().await.unwrap();
        assert_eq!(received.sender_id, NodeId::from("a"));
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors_without_panicking() {
        let nodes = vec![NodeId::from("a"), NodeId::from("b")];
        let mesh = ChannelTransport::mesh(&nodes);
        let result = mesh[&NodeId::from("a")]
            .send(&NodeId::from("ghost"), vote_request("a", 1))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tcp_transport_round_trips_an_envelope() {
        let b = TcpTransport::bind(NodeId::from("b"), "127.0.0.1:29417", HashMap::new())
            .await
            .unwrap();
        let mut addrs_a = HashMap::new();
        addrs_a.insert(NodeId::from("b"), "127.0.0.1:29417".to_string());
        let a = TcpTransport::bind(NodeId::from("a"), "127.0.0.1:29418", addrs_a)
            .await
            .unwrap();

        a.send(&NodeId::from("b"), vote_request("a", 7))
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), b.recv())
            .await
            .expect("recv should not time out")
            .expect("channel should not close");
        assert_eq!(received.sender_id, NodeId::from("a"));
        assert_eq!(received.term, 7);
    }
}
