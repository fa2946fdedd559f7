//! Agent Feed: read-only projection of orders currently open for bidding,
//! filtered and sorted for a specific agent.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::dispatch_state::DispatchStateStore;
use crate::error::{DispatchError, DispatchResult};
use crate::fare::bid_window;
use crate::model::{
    AgentType, BidStatus, DeliveryBid, DispatchPhase, DispatchStatus, Order, bid_rank_key,
};
use crate::store::OrderStore;
use crate::time::now_utc;

#[derive(Debug, Clone)]
pub struct LeadingBid {
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentFeedItem {
    pub order_id: i64,
    pub order_created_at: DateTime<Utc>,
    pub base_fare: f64,
    pub min_allowed_fare: f64,
    pub max_allowed_fare: f64,
    pub dispatch_status: DispatchStatus,
    pub student_only: bool,
    pub bidding_time_left_seconds: u64,
    pub leading_bid: Option<LeadingBid>,
    pub total_placed_bids: usize,
}

pub struct AgentFeed {
    store: OrderStore,
    dispatch_state: std::sync::Arc<dyn DispatchStateStore>,
}

fn is_visible(phase: DispatchPhase, agent_type: AgentType) -> bool {
    match phase {
        DispatchPhase::StudentPool => agent_type == AgentType::Student,
        DispatchPhase::AllAgents => true,
        DispatchPhase::Completed | DispatchPhase::Error | DispatchPhase::None => false,
    }
}

fn is_waiting(status: DispatchStatus) -> bool {
    matches!(
        status,
        DispatchStatus::Starting
            | DispatchStatus::Broadcasted
            | DispatchStatus::WaitingForBids
            | DispatchStatus::Escalating
    )
}

fn leading_bid_snapshot(bids: &[DeliveryBid]) -> Option<LeadingBid> {
    bids.iter()
        .filter(|b| matches!(b.bid_status, BidStatus::Placed))
        .min_by_key(|b| bid_rank_key(b))
        .map(|b| LeadingBid {
            amount: b.bid_amount,
            created_at: b.created_at,
        })
}

impl AgentFeed {
    pub fn new(store: OrderStore, dispatch_state: std::sync::Arc<dyn DispatchStateStore>) -> Self {
        Self { store, dispatch_state }
    }

    #[instrument(skip(self))]
    pub async fn available_for_agent(&self, agent_id: &str) -> DispatchResult<Vec<AgentFeedItem>> {
        let agent = self
            .store
            .agent(agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("agent not found"))?;
        if !agent.is_active {
            return Err(DispatchError::forbidden("agent is not active"));
        }

        let open = self.store.open_orders().await?;
        let mut items = Vec::new();

        for order in open {
            let Some(state) = self.dispatch_state.get_state(order.order_id).await else {
                continue;
            };
            if !is_waiting(state.status) {
                continue;
            }
            if !is_visible(state.phase, agent.agent_type) {
                continue;
            }

            let (min_allowed_fare, max_allowed_fare) = bid_window(order.base_fare);
            let bids = self.store.bids_for_order(order.order_id).await?;
            let placed = bids.iter().filter(|b| matches!(b.bid_status, BidStatus::Placed)).count();

            let wait_seconds = match state.phase {
                DispatchPhase::StudentPool => state.phase1_wait_seconds,
                _ => state.phase2_wait_seconds,
            };
            let bidding_time_left_seconds = if matches!(state.status, DispatchStatus::WaitingForBids) {
                let elapsed = (now_utc() - state.updated_at).num_seconds().max(0) as u64;
                wait_seconds.saturating_sub(elapsed)
            } else {
                0
            };

            items.push(AgentFeedItem {
                order_id: order.order_id,
                order_created_at: order.created_at,
                base_fare: order.base_fare,
                min_allowed_fare,
                max_allowed_fare,
                dispatch_status: state.status,
                student_only: matches!(state.phase, DispatchPhase::StudentPool),
                bidding_time_left_seconds,
                leading_bid: leading_bid_snapshot(&bids),
                total_placed_bids: placed,
            });
        }

        items.sort_by(|a, b| {
            let rank_a = if a.student_only { 0 } else { 1 };
            let rank_b = if b.student_only { 0 } else { 1 };
            rank_a
                .cmp(&rank_b)
                .then(b.order_created_at.cmp(&a.order_created_at))
                .then(b.order_id.cmp(&a.order_id))
        });

        Ok(items)
    }

    /// Orders this agent has won and not yet delivered or cancelled.
    #[instrument(skip(self))]
    pub async fn active_orders_for_agent(&self, agent_id: &str) -> DispatchResult<Vec<Order>> {
        let agent = self
            .store
            .agent(agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("agent not found"))?;

        let accepted_order_ids: std::collections::HashSet<i64> = self
            .store
            .bids_for_agent(&agent.agent_id)
            .await?
            .into_iter()
            .filter(|b| matches!(b.bid_status, BidStatus::Accepted))
            .map(|b| b.order_id)
            .collect();

        let mut orders = Vec::new();
        for order_id in accepted_order_ids {
            if let Some(order) = self.store.order(order_id).await? {
                if !matches!(
                    order.order_status,
                    crate::model::OrderStatus::Delivered | crate::model::OrderStatus::Cancelled
                ) {
                    orders.push(order);
                }
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}
