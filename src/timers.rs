//! Clock & Timers: one-shot deadlines the Raft Node arms, resets, and
//! cancels.
//!
//! Grounded on `consensus/raft.rs`'s `start_election_timer` (a
//! `tokio::select!` over `time::sleep_until` racing a shutdown `Notify`),
//! generalized into a reusable scheduler for all three logical timers
//! (leader-timeout, election-timeout, per-peer heartbeat-timeout) instead
//! of one-off background tasks per concern.
//!
//! Timers are one-shot: each fire is tagged with the generation it was
//! armed under, so a fire racing a concurrent cancel/reset is detected and
//! dropped by the handler instead of acted on.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::NodeId;

/// Identity of a single logical timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Follower/candidate: fires a new election.
    LeaderTimeout,
    /// Candidate only: fires a new election at a higher term.
    ElectionTimeout,
    /// Candidate/leader, one per peer: fires a resend to that peer.
    Heartbeat(NodeId),
}

/// Delivered when an armed timer fires without being superseded.
#[derive(Debug, Clone)]
pub struct TimerFire {
    pub id: TimerId,
    generation: u64,
}

/// Per-node timer scheduler. Cheap to clone (an `Arc` handle internally).
#[derive(Clone)]
pub struct Timers {
    inner: Arc<TimersInner>,
}

struct TimersInner {
    events: mpsc::UnboundedSender<TimerFire>,
    generations: std::sync::Mutex<HashMap<TimerId, Arc<AtomicU64>>>,
    handles: std::sync::Mutex<HashMap<TimerId, JoinHandle<()>>>,
    rng: std::sync::Mutex<StdRng>,
}

impl Timers {
    /// Create a scheduler delivering fires onto `events`. `seed` makes
    /// jitter reproducible for property tests; `None` seeds from entropy.
    pub fn new(events: mpsc::UnboundedSender<TimerFire>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(TimersInner {
                events,
                generations: std::sync::Mutex::new(HashMap::new()),
                handles: std::sync::Mutex::new(HashMap::new()),
                rng: std::sync::Mutex::new(rng),
            }),
        }
    }

    /// Draw a jittered duration uniformly from `[min, max]`.
    pub fn random_duration(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let span = (max - min).as_millis() as u64;
        let offset = self.inner.rng.lock().unwrap().gen_range(0..=span);
        min + Duration::from_millis(offset)
    }

    /// Arm `id` to fire after `duration`, cancelling any prior arming of
    /// the same timer first.
    pub fn reset(&self, id: TimerId, duration: Duration) {
        self.cancel(&id);
        self.arm(id, duration);
    }

    /// Arm `id` to fire after `duration`. If `id` is already armed, the
    /// prior arming's fire will be recognized as stale and dropped.
    pub fn arm(&self, id: TimerId, duration: Duration) {
        let generation = {
            let mut gens = self.inner.generations.lock().unwrap();
            let counter = gens
                .entry(id.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)));
            Arc::clone(counter).fetch_add(1, Ordering::SeqCst) + 1
        };

        let events = self.inner.events.clone();
        let fire_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = events.send(TimerFire {
                id: fire_id,
                generation,
            });
        });

        let mut handles = self.inner.handles.lock().unwrap();
        if let Some(prev) = handles.insert(id, handle) {
            prev.abort();
        }
    }

    /// Cancel `id` if armed. A no-op if it was never armed or already
    /// fired.
    pub fn cancel(&self, id: &TimerId) {
        if let Some(handle) = self.inner.handles.lock().unwrap().remove(id) {
            handle.abort();
        }
        // Bump the generation so an in-flight fire that already escaped
        // the task (raced the abort) is still recognized as stale.
        if let Some(counter) = self.inner.generations.lock().unwrap().get(id) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Cancel every heartbeat timer, used on role transitions that leave
    /// the leader/candidate role.
    pub fn cancel_all_heartbeats(&self, peers: &[NodeId]) {
        for peer in peers {
            self.cancel(&TimerId::Heartbeat(peer.clone()));
        }
    }

    /// True if `fire` corresponds to the timer's current generation, i.e.
    /// it was not superseded by a later arm/cancel between firing and
    /// delivery.
    pub fn is_current(&self, fire: &TimerFire) -> bool {
        match self.inner.generations.lock().unwrap().get(&fire.id) {
            Some(counter) => counter.load(Ordering::SeqCst) == fire.generation,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stale_fire_is_not_current_after_reset() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx, Some(1));

        timers.arm(TimerId::LeaderTimeout, Duration::from_millis(100));
        // Reset before the first arming fires: bumps the generation.
        timers.reset(TimerId::LeaderTimeout, Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(60)).await;
        let fire = rx.recv().await.unwrap();
        assert!(timers.is_current(&fire));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "the aborted first arming must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx, Some(2));

        timers.arm(TimerId::ElectionTimeout, Duration::from_millis(50));
        timers.cancel(&TimerId::ElectionTimeout);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn random_duration_stays_within_bounds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx, Some(42));
        let min = Duration::from_millis(150);
        let max = Duration::from_millis(300);
        for _ in 0..200 {
            let d = timers.random_duration(min, max);
            assert!(d >= min && d <= max);
        }
    }
}
