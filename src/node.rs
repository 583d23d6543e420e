//! Raft Node: the Follower/Candidate/Leader protocol, realized as a
//! single-event-loop actor.
//!
//! Grounded on `consensus/raft.rs`'s `RaftConsensus`/`RaftRole` shape, but
//! where that spreads its state across `Arc<RwLock<T>>` fields mutated
//! from several spawned tasks, this node owns `RaftState` exclusively
//! inside one task that drains an [`Event`] channel — RPC arrivals,
//! client submissions, and timer fires are all turned into `Event`s by
//! other tasks and never touch state directly. That makes "at most one
//! handler observes intermediate state" a
//! property of ownership rather than a lock discipline.

use crate::client::{ClientCommandResponse, ClientError, ExecutionResult, PendingClients};
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::log_store::LogStore;
use crate::persistence::PersistentState;
use crate::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, Envelope, RequestVoteRequest,
    RequestVoteResponse, RpcPayload,
};
use crate::timers::{TimerFire, TimerId, Timers};
use crate::transport::PeerTransport;
use crate::types::{Command, LogEntry, LogIndex, NodeId, Role, Term};
use crate::config::NodeConfig;

use std::cmp;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything that can change Raft state, funneled through one channel so
/// the owning task is the only place `RaftState` is ever mutated.
enum Event {
    Rpc(Envelope),
    Submit(Command, oneshot::Sender<ClientCommandResponse>),
    Timer(TimerFire),
    Stop,
}

/// A cheap, cloneable handle to a running node. The only way callers
/// outside the node's own task interact with it.
#[derive(Clone)]
pub struct RaftHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl RaftHandle {
    /// Submit a command for replication. Resolves once the entry is
    /// applied, or with one of the three client-visible error kinds.
    pub fn submit(&self, command: Command) -> oneshot::Receiver<ClientCommandResponse> {
        let (tx, rx) = oneshot::channel();
        if self.events.send(Event::Submit(command, tx)).is_err() {
            // Node task is gone; the receiver is dropped with it, which
            // surfaces as a RecvError to the caller — good enough, since
            // there is nothing left to answer DEPOSED or TIMEOUT with.
        }
        rx
    }

    /// Deliver an RPC envelope arriving from a peer.
    pub fn deliver(&self, envelope: Envelope) {
        let _ = self.events.send(Event::Rpc(envelope));
    }

    /// Stop the node's event loop. Outstanding client submissions are
    /// resolved with DEPOSED before the task exits.
    pub fn stop(&self) {
        let _ = self.events.send(Event::Stop);
    }
}

/// Spawn a node's event loop and return a handle to it plus the task's
/// join handle.
pub fn spawn(
    config: NodeConfig,
    log: LogStore,
    hard_state: PersistentState,
    transport: Arc<dyn PeerTransport>,
    executor: Arc<dyn CommandExecutor>,
) -> (RaftHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

    let forward_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(fire) = timer_rx.recv().await {
            if forward_tx.send(Event::Timer(fire)).is_err() {
                break;
            }
        }
    });

    let recv_tx = events_tx.clone();
    let recv_transport = Arc::clone(&transport);
    tokio::spawn(async move {
        while let Some(envelope) = recv_transport.recv().await {
            if recv_tx.send(Event::Rpc(envelope)).is_err() {
                break;
            }
        }
    });

    let timers = Timers::new(timer_tx, config.rng_seed);
    let peer_ids: Vec<NodeId> = config
        .peers
        .values()
        .filter(|id| **id != config.id)
        .cloned()
        .collect();
    let cluster_size = peer_ids.len() + 1;

    let mut state = RaftState {
        id: config.id.clone(),
        role: Role::Follower,
        peers: peer_ids,
        cluster_size,
        hard_state,
        log,
        commit_index: None,
        last_applied: None,
        current_leader: None,
        votes_granted_from: HashSet::new(),
        next_index: HashMap::new(),
        match_index: HashMap::new(),
        pending: PendingClients::new(),
        timers,
        transport,
        executor,
        config,
        last_election_started: None,
    };

    let join = tokio::spawn(async move {
        state.arm_initial_leader_timeout();
        let mut events_rx = events_rx;
        while let Some(event) = events_rx.recv().await {
            match event {
                Event::Stop => break,
                other => match state.handle_event(other).await {
                    Ok(()) => {}
                    Err(Error::Persistence { message }) => {
                        // Hard state or the log could not be made durable:
                        // every invariant from here on assumes durability
                        // that no longer holds, so abort rather than keep
                        // voting or replicating on state that could
                        // silently revert on restart.
                        let fatal = Error::fatal(message);
                        error!(node = %state.id, error = %fatal, "aborting after unrecoverable persistence failure");
                        break;
                    }
                    Err(e) => {
                        warn!(node = %state.id, error = %e, "event handling failed");
                    }
                },
            }
        }
        state.pending.depose_all();
        debug!(node = %state.id, "event loop stopped");
    });

    (RaftHandle { events: events_tx }, join)
}

/// Offset a log-index sentinel (`None` meaning -1) by `offset`, per the
/// "`lastIndex = prevLogIndex + entries.length`, computed up front"
/// resolution recorded for the apply-loop's ordering.
fn offset_index(base: Option<LogIndex>, offset: LogIndex) -> Option<LogIndex> {
    let base = base.map(|b| b as i128).unwrap_or(-1);
    let result = base + offset as i128;
    if result < 0 {
        None
    } else {
        Some(result as LogIndex)
    }
}

/// True if a candidate's log is at least as up to date as the local log.
/// Mandatory, not optional, for election safety: a vote granted to a
/// candidate whose log is behind can elect a leader missing entries a
/// majority already committed.
fn candidate_log_up_to_date(
    candidate_term: Term,
    candidate_index: Option<LogIndex>,
    local_term: Term,
    local_index: Option<LogIndex>,
) -> bool {
    match candidate_term.cmp(&local_term) {
        cmp::Ordering::Greater => true,
        cmp::Ordering::Less => false,
        cmp::Ordering::Equal => candidate_index >= local_index,
    }
}

struct RaftState {
    id: NodeId,
    role: Role,
    peers: Vec<NodeId>,
    cluster_size: usize,
    hard_state: PersistentState,
    log: LogStore,
    commit_index: Option<LogIndex>,
    last_applied: Option<LogIndex>,
    current_leader: Option<NodeId>,
    /// Peers (and, for the candidate itself, no entry — see
    /// `has_majority`) whose vote has been counted this election.
    /// A `HashSet` rather than a bare counter so a duplicated
    /// `voteGranted=true` from the same peer — the transport is
    /// best-effort and may redeliver — is a no-op instead of a double
    /// count.
    votes_granted_from: HashSet<NodeId>,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, Option<LogIndex>>,
    pending: PendingClients,
    timers: Timers,
    transport: Arc<dyn PeerTransport>,
    executor: Arc<dyn CommandExecutor>,
    config: NodeConfig,
    last_election_started: Option<Instant>,
}

impl RaftState {
    fn current_term(&self) -> Term {
        self.hard_state.current_term()
    }

    fn arm_initial_leader_timeout(&mut self) {
        let d = self
            .timers
            .random_duration(self.config.min_leader_timeout, self.config.max_leader_timeout);
        self.timers.reset(TimerId::LeaderTimeout, d);
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Rpc(envelope) => self.handle_envelope(envelope).await,
            Event::Submit(command, sender) => self.handle_client_command(command, sender).await,
            Event::Timer(fire) => self.handle_timer(fire).await,
            Event::Stop => Ok(()),
        }
    }

    async fn handle_timer(&mut self, fire: TimerFire) -> Result<()> {
        if !self.timers.is_current(&fire) {
            debug!(node = %self.id, "dropping stale timer fire");
            return Ok(());
        }
        match fire.id {
            TimerId::LeaderTimeout => {
                if self.role != Role::Leader {
                    self.start_election().await?;
                }
            }
            TimerId::ElectionTimeout => {
                if self.role == Role::Candidate {
                    self.start_election().await?;
                }
            }
            TimerId::Heartbeat(ref peer) => match self.role {
                Role::Leader => {
                    self.send_append_entries_to(peer).await?;
                    self.timers
                        .reset(TimerId::Heartbeat(peer.clone()), self.config.heartbeat_timeout);
                }
                Role::Candidate => {
                    self.resend_vote_request(peer).await?;
                    self.timers
                        .reset(TimerId::Heartbeat(peer.clone()), self.config.heartbeat_timeout);
                }
                Role::Follower => {}
            },
        }
        Ok(())
    }

    /// Step down on any higher term observed, then role-specific dispatch.
    async fn handle_envelope(&mut self, envelope: Envelope) -> Result<()> {
        let sender = envelope.sender_id.clone();

        if envelope.term > self.current_term() {
            self.step_down(envelope.term).await?;
        } else if self.role == Role::Candidate
            && matches!(envelope.payload, RpcPayload::AppendEntriesRequest(_))
            && envelope.term == self.current_term()
        {
            // A concurrent candidate won this term; step down and let the
            // request be processed as a follower.
            self.become_follower_same_term();
        }

        if envelope.term < self.current_term() {
            match envelope.payload {
                RpcPayload::AppendEntriesRequest(_) => {
                    self.send_append_response(&sender, false, self.commit_index).await;
                }
                RpcPayload::RequestVoteRequest(_) => {
                    self.send_vote_response(&sender, false).await;
                }
                _ => {}
            }
            return Ok(());
        }

        match envelope.payload {
            RpcPayload::AppendEntriesRequest(req) => {
                self.handle_append_entries_request(sender, req).await
            }
            RpcPayload::AppendEntriesResponse(resp) => {
                self.handle_append_entries_response(sender, resp).await
            }
            RpcPayload::RequestVoteRequest(req) => {
                self.handle_request_vote_request(sender, req).await
            }
            RpcPayload::RequestVoteResponse(resp) => {
                self.handle_request_vote_response(sender, resp).await
            }
            RpcPayload::Snapshot => {
                warn!(node = %self.id, from = %sender, "snapshot RPC received but unimplemented");
                Err(Error::protocol("snapshot RPCs are not implemented"))
            }
        }
    }

    fn become_follower_same_term(&mut self) {
        self.role = Role::Follower;
        self.current_leader = None;
        self.timers.cancel(&TimerId::ElectionTimeout);
        self.timers.cancel_all_heartbeats(&self.peers);
    }

    /// Step down to FOLLOWER on observing a higher term.
    async fn step_down(&mut self, new_term: Term) -> Result<()> {
        self.hard_state.set_term(new_term).await?;
        let was_leader = self.role == Role::Leader;
        self.role = Role::Follower;
        self.current_leader = None;
        self.votes_granted_from.clear();
        self.timers.cancel(&TimerId::ElectionTimeout);
        self.timers.cancel_all_heartbeats(&self.peers);
        if was_leader {
            self.pending.depose_all();
        }
        let d = self
            .timers
            .random_duration(self.config.min_leader_timeout, self.config.max_leader_timeout);
        self.timers.reset(TimerId::LeaderTimeout, d);
        info!(node = %self.id, term = new_term, "stepped down to follower");
        Ok(())
    }

    async fn start_election(&mut self) -> Result<()> {
        if let Some(started) = self.last_election_started {
            if started.elapsed() < self.config.min_election_delay {
                debug!(node = %self.id, "election suppressed by min_election_delay");
                let d = self
                    .timers
                    .random_duration(self.config.min_leader_timeout, self.config.max_leader_timeout);
                self.timers.reset(TimerId::LeaderTimeout, d);
                return Ok(());
            }
        }
        self.last_election_started = Some(Instant::now());

        let new_term = self.current_term() + 1;
        self.hard_state.set_term(new_term).await?;
        self.hard_state.record_vote(self.id.clone()).await?;
        self.role = Role::Candidate;
        self.votes_granted_from.clear();
        self.current_leader = None;
        self.timers.cancel(&TimerId::LeaderTimeout);

        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();
        info!(node = %self.id, term = new_term, "starting election");

        for peer in self.peers.clone() {
            let envelope = Envelope {
                sender_id: self.id.clone(),
                term: new_term,
                is_response: false,
                payload: RpcPayload::RequestVoteRequest(RequestVoteRequest {
                    term: new_term,
                    candidate_id: self.id.clone(),
                    last_log_index,
                    last_log_term,
                }),
            };
            if let Err(e) = self.transport.send(&peer, envelope).await {
                warn!(node = %self.id, peer = %peer, error = %e, "vote request send failed");
            }
            self.timers
                .reset(TimerId::Heartbeat(peer.clone()), self.config.heartbeat_timeout);
        }

        let d = self
            .timers
            .random_duration(self.config.min_election_timeout, self.config.max_election_timeout);
        self.timers.reset(TimerId::ElectionTimeout, d);

        if self.has_majority() {
            self.become_leader().await?;
        }
        Ok(())
    }

    /// True once the candidate itself plus every peer in
    /// `votes_granted_from` forms a strict majority of the cluster.
    fn has_majority(&self) -> bool {
        (self.votes_granted_from.len() + 1) > self.cluster_size / 2
    }

    async fn become_leader(&mut self) -> Result<()> {
        self.role = Role::Leader;
        self.current_leader = Some(self.id.clone());
        self.timers.cancel(&TimerId::ElectionTimeout);

        let next = self.log.last_index().map_or(0, |i| i + 1);
        for peer in self.peers.clone() {
            self.next_index.insert(peer.clone(), next);
            self.match_index.insert(peer.clone(), None);
        }

        info!(node = %self.id, term = self.current_term(), "became leader");

        for peer in self.peers.clone() {
            self.send_append_entries_to(&peer).await?;
            self.timers
                .reset(TimerId::Heartbeat(peer.clone()), self.config.heartbeat_timeout);
        }
        self.advance_commit_index().await?;
        Ok(())
    }

    async fn resend_vote_request(&mut self, peer: &NodeId) -> Result<()> {
        let envelope = Envelope {
            sender_id: self.id.clone(),
            term: self.current_term(),
            is_response: false,
            payload: RpcPayload::RequestVoteRequest(RequestVoteRequest {
                term: self.current_term(),
                candidate_id: self.id.clone(),
                last_log_index: self.log.last_index(),
                last_log_term: self.log.last_term(),
            }),
        };
        if let Err(e) = self.transport.send(peer, envelope).await {
            warn!(node = %self.id, peer = %peer, error = %e, "vote re-request send failed");
        }
        Ok(())
    }

    async fn handle_request_vote_request(
        &mut self,
        sender: NodeId,
        req: RequestVoteRequest,
    ) -> Result<()> {
        let up_to_date = candidate_log_up_to_date(
            req.last_log_term,
            req.last_log_index,
            self.log.last_term(),
            self.log.last_index(),
        );
        let can_vote = match self.hard_state.voted_for() {
            None => true,
            Some(voted) => *voted == sender,
        };
        let grant = can_vote && up_to_date;

        if grant {
            self.hard_state.record_vote(sender.clone()).await?;
            let d = self
                .timers
                .random_duration(self.config.min_leader_timeout, self.config.max_leader_timeout);
            self.timers.reset(TimerId::LeaderTimeout, d);
            debug!(node = %self.id, candidate = %sender, "granted vote");
        }

        self.send_vote_response(&sender, grant).await;
        Ok(())
    }

    async fn handle_request_vote_response(
        &mut self,
        sender: NodeId,
        resp: RequestVoteResponse,
    ) -> Result<()> {
        if self.role != Role::Candidate || !resp.vote_granted {
            return Ok(());
        }
        self.timers.cancel(&TimerId::Heartbeat(sender.clone()));
        self.votes_granted_from.insert(sender);
        if self.has_majority() {
            self.become_leader().await?;
        }
        Ok(())
    }

    async fn handle_append_entries_request(
        &mut self,
        sender: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<()> {
        // Reached only once envelope.term >= currentTerm (handle_envelope
        // steps down and raises currentTerm first), so this is always a
        // legitimate current-term leader. Recognize it and reset the
        // leader-timeout before the prev-log check, not only once the
        // request succeeds: a freshly-deposed candidate's first heartbeat
        // from the new leader commonly fails that check (its own log is
        // behind or diverges), and a follower left with no leader-timeout
        // armed could never start an election if that leader then died.
        self.current_leader = Some(sender.clone());
        let d = self
            .timers
            .random_duration(self.config.min_leader_timeout, self.config.max_leader_timeout);
        self.timers.reset(TimerId::LeaderTimeout, d);

        let prev_ok = match req.prev_log_index {
            None => true,
            Some(idx) => self.log.term_at(idx) == Some(req.prev_log_term),
        };
        if !prev_ok {
            self.send_append_response(&sender, false, self.commit_index).await;
            return Ok(());
        }

        let entries_len = req.entries.len() as LogIndex;
        let mut index = req.prev_log_index.map_or(0, |i| i + 1);
        for entry in req.entries {
            match self.log.term_at(index) {
                Some(existing_term) if existing_term == entry.term => {
                    // Already present with a matching term: duplicate
                    // retry from the leader, nothing to do.
                }
                Some(_) => {
                    self.log.truncate_from(index).await?;
                    self.pending.depose_from(index);
                    self.log.append(entry).await?;
                }
                None => {
                    self.log.append(entry).await?;
                }
            }
            index += 1;
        }

        let last_new_index = offset_index(req.prev_log_index, entries_len);

        if req.leader_commit > self.commit_index {
            let candidate = cmp::min(req.leader_commit, last_new_index);
            if candidate > self.commit_index {
                self.commit_index = candidate;
                self.apply_committed().await?;
            }
        }

        self.send_append_response(&sender, true, last_new_index).await;
        Ok(())
    }

    async fn handle_append_entries_response(
        &mut self,
        sender: NodeId,
        resp: AppendEntriesResponse,
    ) -> Result<()> {
        if self.role != Role::Leader {
            return Ok(());
        }
        if resp.success {
            self.match_index.insert(sender.clone(), resp.match_index);
            let next = resp.match_index.map_or(0, |i| i + 1);
            self.next_index.insert(sender.clone(), next);

            let has_more = self.log.last_index().map_or(false, |last| last >= next);
            if has_more {
                self.send_append_entries_to(&sender).await?;
                self.timers
                    .reset(TimerId::Heartbeat(sender.clone()), self.config.heartbeat_timeout);
            }
            self.advance_commit_index().await?;
        } else {
            let next = self.next_index.get(&sender).copied().unwrap_or(0);
            self.next_index.insert(sender.clone(), next.saturating_sub(1));
            self.send_append_entries_to(&sender).await?;
        }
        Ok(())
    }

    async fn send_append_entries_to(&mut self, peer: &NodeId) -> Result<()> {
        let next = *self.next_index.get(peer).unwrap_or(&0);
        let prev_log_index = if next == 0 { None } else { Some(next - 1) };
        let prev_log_term = prev_log_index.map_or(0, |i| self.log.term_at(i).unwrap_or(0));
        let entries = self.log.slice(next).to_vec();

        let envelope = Envelope {
            sender_id: self.id.clone(),
            term: self.current_term(),
            is_response: false,
            payload: RpcPayload::AppendEntriesRequest(AppendEntriesRequest {
                term: self.current_term(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            }),
        };
        if let Err(e) = self.transport.send(peer, envelope).await {
            warn!(node = %self.id, peer = %peer, error = %e, "append entries send failed");
        }
        Ok(())
    }

    /// Find the largest `N` a majority of peers (including self) have
    /// matched, with `log[N].term == currentTerm`. A leader may only ever
    /// commit an entry from its own term directly; earlier-term entries
    /// commit as a side effect once a later entry does.
    async fn advance_commit_index(&mut self) -> Result<()> {
        let mut indices: Vec<LogIndex> = self.match_index.values().filter_map(|v| *v).collect();
        if let Some(last) = self.log.last_index() {
            indices.push(last);
        }
        indices.sort_unstable_by(|a, b| b.cmp(a));

        let majority_offset = self.cluster_size / 2;
        let Some(&candidate) = indices.get(majority_offset) else {
            return Ok(());
        };

        let already_committed = self.commit_index.map_or(false, |c| candidate <= c);
        if !already_committed && self.log.term_at(candidate) == Some(self.current_term()) {
            self.commit_index = Some(candidate);
            self.apply_committed().await?;
        }
        Ok(())
    }

    /// Apply every committed-but-unapplied entry in strict ascending order,
    /// resolving any leader-local client waiter as it goes.
    async fn apply_committed(&mut self) -> Result<()> {
        let target = match self.commit_index {
            Some(c) => c,
            None => return Ok(()),
        };
        let mut next = self.last_applied.map_or(0, |a| a + 1);
        while next <= target {
            let command = match self.log.get(next) {
                Some(entry) => entry.command.clone(),
                None => break,
            };
            let result: ExecutionResult = self.executor.apply(&command).await;
            self.pending.resolve(next, result);
            self.last_applied = Some(next);
            debug!(node = %self.id, index = next, "applied entry");
            next += 1;
        }
        Ok(())
    }

    async fn handle_client_command(
        &mut self,
        command: Command,
        sender: oneshot::Sender<ClientCommandResponse>,
    ) -> Result<()> {
        if self.role != Role::Leader {
            let _ = sender.send(ClientCommandResponse {
                outcome: Err(ClientError::NotLeader {
                    leader_hint: self.current_leader.clone(),
                }),
            });
            return Ok(());
        }

        let entry = LogEntry {
            term: self.current_term(),
            command,
        };
        let index = self.log.append(entry).await?;
        self.pending.register(index, sender);

        for peer in self.peers.clone() {
            let caught_up = self.match_index.get(&peer).copied().flatten() == self.commit_index;
            if caught_up {
                self.send_append_entries_to(&peer).await?;
                self.timers
                    .reset(TimerId::Heartbeat(peer.clone()), self.config.heartbeat_timeout);
            }
        }
        self.advance_commit_index().await?;
        Ok(())
    }

    async fn send_append_response(&mut self, to: &NodeId, success: bool, match_index: Option<LogIndex>) {
        let envelope = Envelope {
            sender_id: self.id.clone(),
            term: self.current_term(),
            is_response: true,
            payload: RpcPayload::AppendEntriesResponse(AppendEntriesResponse {
                term: self.current_term(),
                success,
                match_index,
            }),
        };
        if let Err(e) = self.transport.send(to, envelope).await {
            warn!(node = %self.id, peer = %to, error = %e, "append response send failed");
        }
    }

    async fn send_vote_response(&mut self, to: &NodeId, vote_granted: bool) {
        let envelope = Envelope {
            sender_id: self.id.clone(),
            term: self.current_term(),
            is_response: true,
            payload: RpcPayload::RequestVoteResponse(RequestVoteResponse {
                term: self.current_term(),
                vote_granted,
            }),
        };
        if let Err(e) = self.transport.send(to, envelope).await {
            warn!(node = %self.id, peer = %to, error = %e, "vote response send failed");
        }
    }
}
