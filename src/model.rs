//! Domain types shared by the fare calculator, order store, bid service,
//! dispatch engine, agent feed, and fulfillment ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Student,
    ThirdParty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bike,
    Scooter,
    Car,
    Walk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundCheckStatus {
    Pending,
    Cleared,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    OnTheWay,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    StudentPool,
    AllAgents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Placed,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub user_id: i64,
    pub restaurant_id: i64,
    pub assigned_partner_id: Option<String>,
    pub delivery_address: String,
    pub base_fare: f64,
    pub delivery_fee: f64,
    pub commission_amount: f64,
    pub order_status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_proof_ref: Option<String>,
    pub delivery_proof_filename: Option<String>,
    pub agent_payout_amount: f64,
    pub agent_payout_status: PayoutStatus,
}

impl Order {
    pub fn is_assignable(&self) -> bool {
        self.assigned_partner_id.is_none()
            && !matches!(
                self.order_status,
                OrderStatus::Delivered | OrderStatus::Cancelled
            )
    }
}

/// Fields beyond the distilled spec's minimal agent record: supplemented
/// from the original agent model (live location, payout base, identity and
/// vetting status), kept even though this crate never mutates most of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAgent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub is_active: bool,
    pub is_verified: bool,
    pub vehicle_type: VehicleType,
    pub rating: f64,
    pub total_deliveries: i64,
    pub total_earnings: f64,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub base_payout_per_delivery: f64,
    pub bonus_multiplier: f64,
    pub kerberos_id: Option<String>,
    pub background_check_status: BackgroundCheckStatus,
}

impl DeliveryAgent {
    pub fn can_bid_in(&self, phase: PoolPhase) -> bool {
        if !self.is_active {
            return false;
        }
        match phase {
            PoolPhase::StudentPool => self.agent_type == AgentType::Student,
            PoolPhase::AllAgents => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryBid {
    pub bid_id: i64,
    pub order_id: i64,
    pub agent_id: String,
    pub bid_amount: f64,
    pub min_allowed_fare: f64,
    pub max_allowed_fare: f64,
    pub pool_phase: PoolPhase,
    pub bid_status: BidStatus,
    pub created_at: DateTime<Utc>,
}

/// Deterministic tie-break key: lowest rounded amount, then earliest
/// placement, then lowest bid id. Used by both manual ranking and
/// `auto_award`.
pub fn bid_rank_key(bid: &DeliveryBid) -> (i64, DateTime<Utc>, i64) {
    (round2_cents(bid.bid_amount), bid.created_at, bid.bid_id)
}

/// Cents-scaled integer so the tie-break key sorts exactly like
/// `round(amount, 2)` without floating point comparison pitfalls.
fn round2_cents(amount: f64) -> i64 {
    (round2(amount) * 100.0).round() as i64
}

/// Round-half-to-even to 2 decimal places, matching every money-producing
/// path in the fare calculator and bid service.
pub fn round2(v: f64) -> f64 {
    let scaled = v * 100.0;
    let rounded = if (scaled.fract().abs() - 0.5).abs() < 1e-9 {
        let floor = scaled.floor();
        if (floor as i64) % 2 == 0 { floor } else { floor + 1.0 }
    } else {
        scaled.round()
    };
    rounded / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Starting,
    Broadcasted,
    WaitingForBids,
    Escalating,
    Assigned,
    NeedsFeeIncrease,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    StudentPool,
    AllAgents,
    Completed,
    Error,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchState {
    pub order_id: i64,
    pub status: DispatchStatus,
    pub phase: DispatchPhase,
    pub restaurant_id: i64,
    pub delivery_address: String,
    pub phase1_wait_seconds: u64,
    pub phase2_wait_seconds: u64,
    pub note: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateAgentType {
    Student,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchBroadcast {
    pub order_id: i64,
    pub restaurant_id: i64,
    pub delivery_address: String,
    pub candidate_agent_type: CandidateAgentType,
}
