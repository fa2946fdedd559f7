pub mod repository;
pub mod repository_sqlx;

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::error::DispatchResult;
use crate::logger::warn_if_slow;
use crate::model::{DeliveryAgent, DeliveryBid, Order};
use crate::store::repository::OrderRepository;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(200);

/// Thin instrumented façade over `OrderRepository`. Every store access in
/// this crate goes through here rather than the trait directly so query
/// timing and tracing stay consistent regardless of which operation calls it.
#[derive(Clone)]
pub struct OrderStore {
    repo: Arc<dyn OrderRepository>,
}

impl OrderStore {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self))]
    pub async fn order(&self, order_id: i64) -> DispatchResult<Option<Order>> {
        warn_if_slow("order_store.order", SLOW_QUERY_THRESHOLD, self.repo.get_order(order_id)).await
    }

    #[instrument(skip(self))]
    pub async fn agent(&self, agent_id: &str) -> DispatchResult<Option<DeliveryAgent>> {
        warn_if_slow(
            "order_store.agent",
            SLOW_QUERY_THRESHOLD,
            self.repo.get_agent(agent_id),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn bid(&self, bid_id: i64) -> DispatchResult<Option<DeliveryBid>> {
        warn_if_slow("order_store.bid", SLOW_QUERY_THRESHOLD, self.repo.get_bid(bid_id)).await
    }

    #[instrument(skip(self))]
    pub async fn bids_for_order(&self, order_id: i64) -> DispatchResult<Vec<DeliveryBid>> {
        warn_if_slow(
            "order_store.bids_for_order",
            SLOW_QUERY_THRESHOLD,
            self.repo.list_bids_by_order(order_id),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn bids_for_agent(&self, agent_id: &str) -> DispatchResult<Vec<DeliveryBid>> {
        warn_if_slow(
            "order_store.bids_for_agent",
            SLOW_QUERY_THRESHOLD,
            self.repo.list_bids_by_agent(agent_id),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn open_orders(&self) -> DispatchResult<Vec<Order>> {
        warn_if_slow(
            "order_store.open_orders",
            SLOW_QUERY_THRESHOLD,
            self.repo.list_open_orders(),
        )
        .await
    }

    #[instrument(skip(self, bid))]
    pub async fn place_bid(&self, bid: &DeliveryBid) -> DispatchResult<DeliveryBid> {
        warn_if_slow("order_store.place_bid", SLOW_QUERY_THRESHOLD, self.repo.insert_bid(bid)).await
    }

    #[instrument(skip(self))]
    pub async fn award_bid(
        &self,
        order_id: i64,
        bid_id: i64,
        agent_id: &str,
        amount: f64,
    ) -> DispatchResult<()> {
        warn_if_slow(
            "order_store.award_bid",
            SLOW_QUERY_THRESHOLD,
            self.repo.award_bid(order_id, bid_id, agent_id, amount),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn fulfill_delivery(
        &self,
        order_id: i64,
        agent_id: &str,
        proof_ref: &str,
        proof_filename: &str,
    ) -> DispatchResult<Order> {
        warn_if_slow(
            "order_store.fulfill_delivery",
            SLOW_QUERY_THRESHOLD,
            self.repo
                .fulfill_delivery(order_id, agent_id, proof_ref, proof_filename),
        )
        .await
    }
}
