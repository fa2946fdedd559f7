//! Ephemeral dispatch-state store: per-order auction progress plus the
//! assigned flag and broadcast queues. Advisory only — the order store
//! remains authoritative for assignment; this store exists so the agent
//! feed and engine polling loop don't have to hit the relational store on
//! every tick. Modeled as a trait so a Redis-backed implementation can
//! later replace the in-process one without touching callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{CandidateAgentType, DispatchBroadcast, DispatchState};

#[async_trait]
pub trait DispatchStateStore: Send + Sync {
    async fn get_state(&self, order_id: i64) -> Option<DispatchState>;
    async fn set_state(&self, state: DispatchState);
    async fn is_assigned(&self, order_id: i64) -> bool;
    async fn mark_assigned(&self, order_id: i64);
    async fn push_broadcast(&self, msg: DispatchBroadcast);

    /// Snapshot of everything currently broadcast for `candidate`, newest
    /// last. Non-destructive: the agent feed reads this on every poll.
    async fn broadcasts_for(&self, candidate: CandidateAgentType) -> Vec<DispatchBroadcast>;
}

#[derive(Default)]
struct Inner {
    states: HashMap<i64, DispatchState>,
    assigned: HashMap<i64, bool>,
    student_queue: VecDeque<DispatchBroadcast>,
    all_queue: VecDeque<DispatchBroadcast>,
}

const BROADCAST_QUEUE_CAP: usize = 4096;

#[derive(Clone, Default)]
pub struct InMemoryDispatchStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryDispatchStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchStateStore for InMemoryDispatchStateStore {
    async fn get_state(&self, order_id: i64) -> Option<DispatchState> {
        self.inner.read().await.states.get(&order_id).cloned()
    }

    async fn set_state(&self, state: DispatchState) {
        let mut guard = self.inner.write().await;
        guard.states.insert(state.order_id, state);
    }

    async fn is_assigned(&self, order_id: i64) -> bool {
        self.inner
            .read()
            .await
            .assigned
            .get(&order_id)
            .copied()
            .unwrap_or(false)
    }

    async fn mark_assigned(&self, order_id: i64) {
        let mut guard = self.inner.write().await;
        guard.assigned.insert(order_id, true);
    }

    async fn push_broadcast(&self, msg: DispatchBroadcast) {
        let mut guard = self.inner.write().await;
        let queue = match msg.candidate_agent_type {
            CandidateAgentType::Student => &mut guard.student_queue,
            CandidateAgentType::All => &mut guard.all_queue,
        };
        if queue.len() >= BROADCAST_QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(msg);
    }

    async fn broadcasts_for(&self, candidate: CandidateAgentType) -> Vec<DispatchBroadcast> {
        let guard = self.inner.read().await;
        match candidate {
            CandidateAgentType::Student => guard.student_queue.iter().cloned().collect(),
            CandidateAgentType::All => guard.all_queue.iter().cloned().collect(),
        }
    }
}
