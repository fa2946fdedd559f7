//! Bid Service: accept, validate, list and award delivery bids.

use tracing::instrument;

use crate::error::{BidWindowViolation, DispatchError, DispatchResult};
use crate::fare::bid_window;
use crate::model::{BidStatus, DeliveryBid, PoolPhase, bid_rank_key, round2};
use crate::store::OrderStore;
use crate::time::now_utc;

pub struct BidService {
    store: OrderStore,
}

impl BidService {
    pub fn new(store: OrderStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn place_bid(
        &self,
        order_id: i64,
        agent_id: &str,
        amount: f64,
        phase: PoolPhase,
    ) -> DispatchResult<DeliveryBid> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("order not found"))?;

        if !order.is_assignable() {
            return Err(DispatchError::conflict("order already assigned"));
        }

        let agent = self
            .store
            .agent(agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("agent not found"))?;

        if !agent.can_bid_in(phase) {
            return Err(DispatchError::forbidden(
                "agent is not eligible to bid in this phase",
            ));
        }

        let (min_allowed_fare, max_allowed_fare) = bid_window(order.base_fare);
        let amount = round2(amount);

        if amount < min_allowed_fare || amount > max_allowed_fare {
            return Err(DispatchError::BidWindow(BidWindowViolation {
                min_allowed_fare,
                max_allowed_fare,
                submitted_bid_amount: amount,
            }));
        }

        let bid = DeliveryBid {
            bid_id: 0,
            order_id,
            agent_id: agent_id.to_string(),
            bid_amount: amount,
            min_allowed_fare,
            max_allowed_fare,
            pool_phase: phase,
            bid_status: BidStatus::Placed,
            created_at: now_utc(),
        };

        self.store.place_bid(&bid).await
    }

    #[instrument(skip(self))]
    pub async fn list_by_order(&self, order_id: i64) -> DispatchResult<Vec<DeliveryBid>> {
        self.store.bids_for_order(order_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_by_agent(&self, agent_id: &str) -> DispatchResult<Vec<DeliveryBid>> {
        self.store.bids_for_agent(agent_id).await
    }

    /// Accepts a specific bid, atomically claiming the order for its agent
    /// and rejecting every other still-placed bid on that order.
    #[instrument(skip(self))]
    pub async fn accept(&self, bid_id: i64) -> DispatchResult<DeliveryBid> {
        let bid = self
            .store
            .bid(bid_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("bid not found"))?;

        if matches!(bid.bid_status, BidStatus::Accepted) {
            return Ok(bid);
        }
        if !matches!(bid.bid_status, BidStatus::Placed) {
            return Err(DispatchError::conflict("bid is no longer placed"));
        }

        let order = self
            .store
            .order(bid.order_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("order not found"))?;

        if let Some(existing) = &order.assigned_partner_id {
            if existing != &bid.agent_id {
                return Err(DispatchError::conflict("order already assigned to another agent"));
            }
        }

        let agent = self
            .store
            .agent(&bid.agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("agent not found"))?;
        if !agent.is_active {
            return Err(DispatchError::forbidden("agent is not active"));
        }

        self.store
            .award_bid(bid.order_id, bid.bid_id, &bid.agent_id, bid.bid_amount)
            .await?;

        Ok(DeliveryBid {
            bid_status: BidStatus::Accepted,
            ..bid
        })
    }

    /// Selects the winner among all `placed` bids for an order by the
    /// deterministic tie-break key, then accepts it.
    #[instrument(skip(self))]
    pub async fn auto_award(&self, order_id: i64) -> DispatchResult<DeliveryBid> {
        let candidates: Vec<DeliveryBid> = self
            .store
            .bids_for_order(order_id)
            .await?
            .into_iter()
            .filter(|b| matches!(b.bid_status, BidStatus::Placed))
            .collect();

        let winner = candidates
            .into_iter()
            .min_by_key(|b| bid_rank_key(b))
            .ok_or_else(|| DispatchError::not_found("no placed bids for order"))?;

        self.accept(winner.bid_id).await
    }
}
