//! Fulfillment Ledger: the atomic delivered-and-paid transition.

use tracing::instrument;

use crate::error::{DispatchError, DispatchResult};
use crate::model::Order;
use crate::store::OrderStore;

pub struct FulfillmentLedger {
    store: OrderStore,
}

impl FulfillmentLedger {
    pub fn new(store: OrderStore) -> Self {
        Self { store }
    }

    /// Marks `order_id` delivered by `agent_id` and credits the agent's
    /// payout exactly once. Safe to call again after success: the repeat
    /// call observes the already-paid order and makes no further changes.
    #[instrument(skip(self, proof_ref, proof_filename))]
    pub async fn fulfill_delivery(
        &self,
        agent_id: &str,
        order_id: i64,
        proof_ref: &str,
        proof_filename: &str,
    ) -> DispatchResult<Order> {
        let agent = self
            .store
            .agent(agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("agent not found"))?;
        if !agent.is_active {
            return Err(DispatchError::forbidden("agent is not active"));
        }

        self.store
            .fulfill_delivery(order_id, agent_id, proof_ref, proof_filename)
            .await
    }
}
