//! Dispatch Engine: one cooperative task per order driving the two-phase
//! timed auction. Grounded on the same "per-key worker, spawned on demand,
//! never duplicated" shape used elsewhere for per-pair execution — here the
//! key is the order id and there is no downstream work queue, just the
//! state machine itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, instrument};

use crate::bids::BidService;
use crate::config::AppConfig;
use crate::dispatch_state::DispatchStateStore;
use crate::error::{DispatchError, DispatchResult};
use crate::logger::{self, TraceId};
use crate::model::{
    BidStatus, CandidateAgentType, DispatchBroadcast, DispatchPhase, DispatchState,
    DispatchStatus,
};
use crate::store::OrderStore;
use crate::time::{now_ms, now_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStartOutcome {
    Started,
    AlreadyRunning,
}

pub struct DispatchEngine {
    store: OrderStore,
    bids: Arc<BidService>,
    dispatch_state: Arc<dyn DispatchStateStore>,
    config: AppConfig,
    tasks: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl DispatchEngine {
    pub fn new(
        store: OrderStore,
        bids: Arc<BidService>,
        dispatch_state: Arc<dyn DispatchStateStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            bids,
            dispatch_state,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self, order_id: i64) -> DispatchResult<DispatchStartOutcome> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("order not found"))?;
        if !order.is_assignable() {
            return Err(DispatchError::conflict("order already assigned"));
        }

        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.get(&order_id) {
            if !handle.is_finished() {
                return Ok(DispatchStartOutcome::AlreadyRunning);
            }
        }

        let store = self.store.clone();
        let bids = self.bids.clone();
        let dispatch_state = self.dispatch_state.clone();
        let config = self.config.clone();
        let tasks_handle = self.tasks.clone();
        let restaurant_id = order.restaurant_id;
        let delivery_address = order.delivery_address.clone();

        // One trace id per dispatch session, carried on the task's root span
        // so every log line emitted while this order is being auctioned off
        // can be correlated, from broadcast through award or escalation.
        let trace_id = TraceId::for_order(order_id);
        let span = logger::root_span("dispatch_loop", &trace_id);

        let handle = tokio::spawn(
            async move {
                run_dispatch_loop(
                    order_id,
                    restaurant_id,
                    delivery_address,
                    store,
                    bids,
                    dispatch_state,
                    config,
                )
                .await;
                tasks_handle.lock().remove(&order_id);
            }
            .instrument(span),
        );

        tasks.insert(order_id, handle);
        Ok(DispatchStartOutcome::Started)
    }

    #[instrument(skip(self))]
    pub async fn status(&self, order_id: i64) -> Option<DispatchState> {
        self.dispatch_state.get_state(order_id).await
    }
}

async fn set_state(
    store: &Arc<dyn DispatchStateStore>,
    order_id: i64,
    restaurant_id: i64,
    delivery_address: &str,
    status: DispatchStatus,
    phase: DispatchPhase,
    phase1_wait_seconds: u64,
    phase2_wait_seconds: u64,
    note: &str,
) {
    store
        .set_state(DispatchState {
            order_id,
            status,
            phase,
            restaurant_id,
            delivery_address: delivery_address.to_string(),
            phase1_wait_seconds,
            phase2_wait_seconds,
            note: note.to_string(),
            updated_at: now_utc(),
        })
        .await;
}

/// Deterministic pseudo-random pick in `[min, max]`, seeded by the order id
/// and the current millisecond tick so repeated starts of the same order
/// still vary.
fn pick_wait_secs(min: u64, max: u64, order_id: i64) -> u64 {
    if max <= min {
        return min;
    }
    let seed = (order_id as u64)
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(now_ms());
    min + seed % (max - min + 1)
}

/// Outcome of the student-only bidding window.
enum Phase1Outcome {
    /// Another path (e.g. a manually accepted bid) already assigned the order.
    AssignedElsewhere,
    /// A student bid was auto-awarded before the window needed to escalate.
    Awarded,
    /// No award happened in time; proceed to the all-agents phase with the
    /// phase-1 wait duration carried along for the dispatch-state record.
    Escalate(u64),
}

async fn run_phase1(
    order_id: i64,
    restaurant_id: i64,
    delivery_address: &str,
    store: &OrderStore,
    bids: &BidService,
    dispatch_state: &Arc<dyn DispatchStateStore>,
    config: &AppConfig,
) -> Phase1Outcome {
    set_state(
        dispatch_state,
        order_id,
        restaurant_id,
        delivery_address,
        DispatchStatus::Starting,
        DispatchPhase::StudentPool,
        config.phase1_wait_min_secs,
        config.phase2_wait_secs,
        "",
    )
    .await;

    dispatch_state
        .push_broadcast(DispatchBroadcast {
            order_id,
            restaurant_id,
            delivery_address: delivery_address.to_string(),
            candidate_agent_type: CandidateAgentType::Student,
        })
        .await;

    let phase1_wait = pick_wait_secs(config.phase1_wait_min_secs, config.phase1_wait_max_secs, order_id);

    set_state(
        dispatch_state,
        order_id,
        restaurant_id,
        delivery_address,
        DispatchStatus::WaitingForBids,
        DispatchPhase::StudentPool,
        phase1_wait,
        config.phase2_wait_secs,
        "",
    )
    .await;

    let poll = Duration::from_secs(config.poll_interval_secs);
    let mut elapsed = 0u64;

    loop {
        if elapsed >= phase1_wait {
            break;
        }
        tokio::time::sleep(poll).await;
        elapsed += config.poll_interval_secs;

        if dispatch_state.is_assigned(order_id).await {
            return Phase1Outcome::AssignedElsewhere;
        }
    }

    let has_bid = !store
        .bids_for_order(order_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|b| matches!(b.bid_status, BidStatus::Placed))
        .collect::<Vec<_>>()
        .is_empty();

    if has_bid && try_auto_award(bids, dispatch_state, order_id, restaurant_id, delivery_address).await {
        return Phase1Outcome::Awarded;
    }

    Phase1Outcome::Escalate(phase1_wait)
}

async fn run_phase2(
    order_id: i64,
    restaurant_id: i64,
    delivery_address: &str,
    store: &OrderStore,
    bids: &BidService,
    dispatch_state: &Arc<dyn DispatchStateStore>,
    config: &AppConfig,
    phase1_wait: u64,
) {
    set_state(
        dispatch_state,
        order_id,
        restaurant_id,
        delivery_address,
        DispatchStatus::Escalating,
        DispatchPhase::AllAgents,
        phase1_wait,
        config.phase2_wait_secs,
        "escalated to all agents",
    )
    .await;

    dispatch_state
        .push_broadcast(DispatchBroadcast {
            order_id,
            restaurant_id,
            delivery_address: delivery_address.to_string(),
            candidate_agent_type: CandidateAgentType::All,
        })
        .await;

    set_state(
        dispatch_state,
        order_id,
        restaurant_id,
        delivery_address,
        DispatchStatus::WaitingForBids,
        DispatchPhase::AllAgents,
        phase1_wait,
        config.phase2_wait_secs,
        "",
    )
    .await;

    let poll = Duration::from_secs(config.poll_interval_secs);
    let rolling_close = Duration::from_secs(config.rolling_bid_close_secs);
    let mut last_marker: (usize, i64) = (0, 0);
    let mut rolling_deadline: Option<tokio::time::Instant> = None;
    let mut phase2_elapsed = 0u64;

    loop {
        tokio::time::sleep(poll).await;
        phase2_elapsed += config.poll_interval_secs;

        if dispatch_state.is_assigned(order_id).await {
            return;
        }

        let placed: Vec<_> = store
            .bids_for_order(order_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|b| matches!(b.bid_status, BidStatus::Placed))
            .collect();

        let marker = (placed.len(), placed.iter().map(|b| b.bid_id).max().unwrap_or(0));

        if marker != (0, 0) {
            if marker != last_marker || rolling_deadline.is_none() {
                last_marker = marker;
                rolling_deadline = Some(tokio::time::Instant::now() + rolling_close);
                set_state(
                    dispatch_state,
                    order_id,
                    restaurant_id,
                    delivery_address,
                    DispatchStatus::WaitingForBids,
                    DispatchPhase::AllAgents,
                    phase1_wait,
                    config.phase2_wait_secs,
                    "bids received; rolling 60s close window reset",
                )
                .await;
            }

            if let Some(deadline) = rolling_deadline {
                if tokio::time::Instant::now() >= deadline {
                    if try_auto_award(bids, dispatch_state, order_id, restaurant_id, delivery_address).await {
                        return;
                    }
                    // Race: bids vanished between the marker read and award. Reopen the window.
                    rolling_deadline = None;
                }
            }
        } else if phase2_elapsed >= config.phase2_wait_secs {
            set_state(
                dispatch_state,
                order_id,
                restaurant_id,
                delivery_address,
                DispatchStatus::NeedsFeeIncrease,
                DispatchPhase::AllAgents,
                phase1_wait,
                config.phase2_wait_secs,
                "no bids received; needs fee increase",
            )
            .await;
            return;
        }
    }
}

async fn run_dispatch_loop(
    order_id: i64,
    restaurant_id: i64,
    delivery_address: String,
    store: OrderStore,
    bids: Arc<BidService>,
    dispatch_state: Arc<dyn DispatchStateStore>,
    config: AppConfig,
) {
    logger::annotate_span(order_id, None);

    let guard = TerminalStateGuard::new(dispatch_state.clone(), order_id, restaurant_id, delivery_address.clone());

    let phase1_outcome = run_phase1(
        order_id,
        restaurant_id,
        &delivery_address,
        &store,
        &bids,
        &dispatch_state,
        &config,
    )
    .instrument(logger::child_span("phase1_student_pool"))
    .await;

    let phase1_wait = match phase1_outcome {
        Phase1Outcome::AssignedElsewhere | Phase1Outcome::Awarded => {
            guard.disarm();
            return;
        }
        Phase1Outcome::Escalate(phase1_wait) => phase1_wait,
    };

    run_phase2(
        order_id,
        restaurant_id,
        &delivery_address,
        &store,
        &bids,
        &dispatch_state,
        &config,
        phase1_wait,
    )
    .instrument(logger::child_span("phase2_all_agents"))
    .await;

    guard.disarm();
}

async fn try_auto_award(
    bids: &BidService,
    dispatch_state: &Arc<dyn DispatchStateStore>,
    order_id: i64,
    restaurant_id: i64,
    delivery_address: &str,
) -> bool {
    match bids.auto_award(order_id).await {
        Ok(_) => {
            dispatch_state.mark_assigned(order_id).await;
            set_state(
                dispatch_state,
                order_id,
                restaurant_id,
                delivery_address,
                DispatchStatus::Assigned,
                DispatchPhase::Completed,
                0,
                0,
                "",
            )
            .await;
            true
        }
        Err(e) => {
            tracing::warn!(order_id, error = %e, "auto_award failed");
            false
        }
    }
}

/// Ensures a crashed or cancelled dispatch task still leaves a terminal
/// `(failed, error)` state behind, unless a success/escalation path already
/// recorded its own terminal state and disarmed the guard.
struct TerminalStateGuard {
    dispatch_state: Arc<dyn DispatchStateStore>,
    order_id: i64,
    restaurant_id: i64,
    delivery_address: String,
    armed: bool,
}

impl TerminalStateGuard {
    fn new(
        dispatch_state: Arc<dyn DispatchStateStore>,
        order_id: i64,
        restaurant_id: i64,
        delivery_address: String,
    ) -> Self {
        Self {
            dispatch_state,
            order_id,
            restaurant_id,
            delivery_address,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminalStateGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let dispatch_state = self.dispatch_state.clone();
        let order_id = self.order_id;
        let restaurant_id = self.restaurant_id;
        let delivery_address = self.delivery_address.clone();
        tokio::spawn(async move {
            set_state(
                &dispatch_state,
                order_id,
                restaurant_id,
                &delivery_address,
                DispatchStatus::Failed,
                DispatchPhase::Error,
                0,
                0,
                "dispatch task ended without reaching a terminal state",
            )
            .await;
        });
    }
}
