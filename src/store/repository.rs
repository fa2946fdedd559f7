use async_trait::async_trait;

use crate::error::DispatchResult;
use crate::model::{DeliveryAgent, DeliveryBid, Order};

/// Durable persistence seam for orders, agents and bids. Order/agent CRUD
/// beyond what the dispatch core needs (creation, profile edits) lives in an
/// outer service and is out of scope here; this trait only exposes the reads
/// and atomic transitions the dispatch core itself drives.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, order_id: i64) -> DispatchResult<Option<Order>>;
    async fn get_agent(&self, agent_id: &str) -> DispatchResult<Option<DeliveryAgent>>;
    async fn get_bid(&self, bid_id: i64) -> DispatchResult<Option<DeliveryBid>>;
    async fn list_bids_by_order(&self, order_id: i64) -> DispatchResult<Vec<DeliveryBid>>;
    async fn list_bids_by_agent(&self, agent_id: &str) -> DispatchResult<Vec<DeliveryBid>>;

    /// Orders that are not yet assigned and not in a terminal state. The
    /// caller (agent feed, dispatch engine) filters further by dispatch
    /// state and phase visibility.
    async fn list_open_orders(&self) -> DispatchResult<Vec<Order>>;

    /// Inserts a new `placed` bid, assigning its id, returning the stored row.
    async fn insert_bid(&self, bid: &DeliveryBid) -> DispatchResult<DeliveryBid>;

    /// Atomically claims the order for `agent_id` at `amount`, accepts
    /// `bid_id`, and rejects every other still-`placed` bid for the order.
    /// Returns `Conflict` if the order was already claimed by someone else
    /// or the bid is no longer `placed`.
    async fn award_bid(
        &self,
        order_id: i64,
        bid_id: i64,
        agent_id: &str,
        amount: f64,
    ) -> DispatchResult<()>;

    /// Marks the order delivered and, if not already paid, credits the
    /// agent exactly once. Idempotent: calling again after a successful
    /// fulfillment is a no-op that returns the existing order.
    async fn fulfill_delivery(
        &self,
        order_id: i64,
        agent_id: &str,
        proof_ref: &str,
        proof_filename: &str,
    ) -> DispatchResult<Order>;
}
