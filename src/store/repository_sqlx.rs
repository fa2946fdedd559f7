use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};

use crate::error::{DispatchError, DispatchResult};
use crate::model::{
    AgentType, BackgroundCheckStatus, BidStatus, DeliveryAgent, DeliveryBid, Order, OrderStatus,
    PayoutStatus, PoolPhase, VehicleType,
};
use crate::store::repository::OrderRepository;

/// sqlx-backed implementation of `OrderRepository`. Uses the `Any` driver so
/// the same queries run against SQLite (tests, small deployments) and
/// Postgres; row mapping is done by hand since `Any` rows don't support the
/// compile-time `query!` macros.
pub struct SqlxOrderRepository {
    pool: AnyPool,
}

impl SqlxOrderRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl OrderRepository for SqlxOrderRepository {
    async fn get_order(&self, order_id: i64) -> DispatchResult<Option<Order>> {
        let row = sqlx::query(SELECT_ORDER)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    async fn get_agent(&self, agent_id: &str) -> DispatchResult<Option<DeliveryAgent>> {
        let row = sqlx::query(SELECT_AGENT)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_agent(&r)).transpose()
    }

    async fn get_bid(&self, bid_id: i64) -> DispatchResult<Option<DeliveryBid>> {
        let row = sqlx::query(SELECT_BID)
            .bind(bid_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_bid(&r)).transpose()
    }

    async fn list_bids_by_order(&self, order_id: i64) -> DispatchResult<Vec<DeliveryBid>> {
        let rows = sqlx::query(&format!(
            "{SELECT_BID_BASE} WHERE order_id = ? ORDER BY created_at DESC, bid_id DESC;"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_bid).collect()
    }

    async fn list_bids_by_agent(&self, agent_id: &str) -> DispatchResult<Vec<DeliveryBid>> {
        let rows = sqlx::query(&format!(
            "{SELECT_BID_BASE} WHERE agent_id = ? ORDER BY created_at DESC, bid_id DESC;"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_bid).collect()
    }

    async fn list_open_orders(&self) -> DispatchResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ORDER_BASE} WHERE assigned_partner_id IS NULL AND order_status NOT IN ('delivered', 'cancelled', 'assigned');"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn insert_bid(&self, bid: &DeliveryBid) -> DispatchResult<DeliveryBid> {
        let mut tx = self.pool.begin().await?;

        let next_id: i64 = sqlx::query("SELECT COALESCE(MAX(bid_id), 0) + 1 FROM delivery_bids;")
            .fetch_one(&mut *tx)
            .await?
            .get(0);

        sqlx::query(
            r#"
INSERT INTO delivery_bids(
  bid_id, order_id, agent_id, bid_amount, min_allowed_fare, max_allowed_fare,
  pool_phase, bid_status, created_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(next_id)
        .bind(bid.order_id)
        .bind(&bid.agent_id)
        .bind(bid.bid_amount)
        .bind(bid.min_allowed_fare)
        .bind(bid.max_allowed_fare)
        .bind(pool_phase_str(bid.pool_phase))
        .bind(bid_status_str(BidStatus::Placed))
        .bind(bid.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DeliveryBid {
            bid_id: next_id,
            bid_status: BidStatus::Placed,
            ..bid.clone()
        })
    }

    async fn award_bid(
        &self,
        order_id: i64,
        bid_id: i64,
        agent_id: &str,
        amount: f64,
    ) -> DispatchResult<()> {
        let mut tx = self.pool.begin().await?;

        // CAS: only succeeds if nobody else has claimed the order yet.
        let order_res = sqlx::query(
            r#"
UPDATE orders
SET assigned_partner_id = ?, delivery_fee = ?, order_status = 'assigned'
WHERE order_id = ? AND assigned_partner_id IS NULL;
"#,
        )
        .bind(agent_id)
        .bind(amount)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        if order_res.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(DispatchError::conflict("order already assigned"));
        }

        let bid_res = sqlx::query(
            r#"
UPDATE delivery_bids SET bid_status = 'accepted'
WHERE bid_id = ? AND bid_status = 'placed';
"#,
        )
        .bind(bid_id)
        .execute(&mut *tx)
        .await?;

        if bid_res.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(DispatchError::conflict("bid no longer placed"));
        }

        sqlx::query(
            r#"
UPDATE delivery_bids SET bid_status = 'rejected'
WHERE order_id = ? AND bid_id <> ? AND bid_status = 'placed';
"#,
        )
        .bind(order_id)
        .bind(bid_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fulfill_delivery(
        &self,
        order_id: i64,
        agent_id: &str,
        proof_ref: &str,
        proof_filename: &str,
    ) -> DispatchResult<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(SELECT_ORDER)
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DispatchError::not_found("order not found"))?;
        let order = row_to_order(&row)?;

        if order.assigned_partner_id.as_deref() != Some(agent_id) {
            tx.rollback().await?;
            return Err(DispatchError::forbidden(
                "order is not assigned to this agent",
            ));
        }

        // Idempotent: already delivered and paid, nothing to redo.
        if matches!(order.order_status, OrderStatus::Delivered)
            && matches!(order.agent_payout_status, PayoutStatus::Paid)
        {
            tx.commit().await?;
            return Ok(order);
        }

        let now = Utc::now().to_rfc3339();
        let already_paid = matches!(order.agent_payout_status, PayoutStatus::Paid);
        let payout = if already_paid {
            order.agent_payout_amount
        } else {
            order.delivery_fee
        };

        sqlx::query(
            r#"
UPDATE orders
SET order_status = 'delivered', delivered_at = ?, delivery_proof_ref = ?,
    delivery_proof_filename = ?, agent_payout_amount = ?, agent_payout_status = 'paid'
WHERE order_id = ?;
"#,
        )
        .bind(&now)
        .bind(proof_ref)
        .bind(proof_filename)
        .bind(payout)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        if !already_paid {
            sqlx::query(
                r#"
UPDATE delivery_agents
SET total_earnings = total_earnings + ?, total_deliveries = total_deliveries + 1
WHERE agent_id = ?;
"#,
            )
            .bind(payout)
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Order {
            order_status: OrderStatus::Delivered,
            delivered_at: Some(DateTime::parse_from_rfc3339(&now).unwrap().with_timezone(&Utc)),
            delivery_proof_ref: Some(proof_ref.to_string()),
            delivery_proof_filename: Some(proof_filename.to_string()),
            agent_payout_amount: payout,
            agent_payout_status: PayoutStatus::Paid,
            ..order
        })
    }
}

/* =========================
Row mapping
========================= */

const SELECT_ORDER_BASE: &str = r#"
SELECT order_id, user_id, restaurant_id, assigned_partner_id, delivery_address,
       base_fare, delivery_fee, commission_amount, order_status, created_at,
       delivered_at, delivery_proof_ref, delivery_proof_filename,
       agent_payout_amount, agent_payout_status
FROM orders"#;

const SELECT_BID_BASE: &str = r#"
SELECT bid_id, order_id, agent_id, bid_amount, min_allowed_fare, max_allowed_fare,
       pool_phase, bid_status, created_at
FROM delivery_bids"#;

const SELECT_ORDER: &str = r#"
SELECT order_id, user_id, restaurant_id, assigned_partner_id, delivery_address,
       base_fare, delivery_fee, commission_amount, order_status, created_at,
       delivered_at, delivery_proof_ref, delivery_proof_filename,
       agent_payout_amount, agent_payout_status
FROM orders WHERE order_id = ?;"#;

const SELECT_AGENT: &str = r#"
SELECT agent_id, agent_type, is_active, is_verified, vehicle_type, rating,
       total_deliveries, total_earnings, current_lat, current_lng,
       base_payout_per_delivery, bonus_multiplier, kerberos_id, background_check_status
FROM delivery_agents WHERE agent_id = ?;"#;

const SELECT_BID: &str = r#"
SELECT bid_id, order_id, agent_id, bid_amount, min_allowed_fare, max_allowed_fare,
       pool_phase, bid_status, created_at
FROM delivery_bids WHERE bid_id = ?;"#;

fn row_to_order(r: &sqlx::any::AnyRow) -> DispatchResult<Order> {
    let status: String = r.get("order_status");
    let payout_status: String = r.get("agent_payout_status");

    Ok(Order {
        order_id: r.get("order_id"),
        user_id: r.get("user_id"),
        restaurant_id: r.get("restaurant_id"),
        assigned_partner_id: r.get("assigned_partner_id"),
        delivery_address: r.get("delivery_address"),
        base_fare: r.get("base_fare"),
        delivery_fee: r.get("delivery_fee"),
        commission_amount: r.get("commission_amount"),
        order_status: parse_order_status(&status)?,
        created_at: parse_ts(r.get("created_at"))?,
        delivered_at: r
            .get::<Option<String>, _>("delivered_at")
            .map(|s| parse_ts(s))
            .transpose()?,
        delivery_proof_ref: r.get("delivery_proof_ref"),
        delivery_proof_filename: r.get("delivery_proof_filename"),
        agent_payout_amount: r.get("agent_payout_amount"),
        agent_payout_status: parse_payout_status(&payout_status)?,
    })
}

fn row_to_agent(r: &sqlx::any::AnyRow) -> DispatchResult<DeliveryAgent> {
    let agent_type: String = r.get("agent_type");
    let vehicle: String = r.get("vehicle_type");
    let bg: String = r.get("background_check_status");

    Ok(DeliveryAgent {
        agent_id: r.get("agent_id"),
        agent_type: parse_agent_type(&agent_type)?,
        is_active: r.get("is_active"),
        is_verified: r.get("is_verified"),
        vehicle_type: parse_vehicle_type(&vehicle)?,
        rating: r.get("rating"),
        total_deliveries: r.get("total_deliveries"),
        total_earnings: r.get("total_earnings"),
        current_lat: r.get("current_lat"),
        current_lng: r.get("current_lng"),
        base_payout_per_delivery: r.get("base_payout_per_delivery"),
        bonus_multiplier: r.get("bonus_multiplier"),
        kerberos_id: r.get("kerberos_id"),
        background_check_status: parse_bg_status(&bg)?,
    })
}

fn row_to_bid(r: &sqlx::any::AnyRow) -> DispatchResult<DeliveryBid> {
    let phase: String = r.get("pool_phase");
    let status: String = r.get("bid_status");

    Ok(DeliveryBid {
        bid_id: r.get("bid_id"),
        order_id: r.get("order_id"),
        agent_id: r.get("agent_id"),
        bid_amount: r.get("bid_amount"),
        min_allowed_fare: r.get("min_allowed_fare"),
        max_allowed_fare: r.get("max_allowed_fare"),
        pool_phase: parse_pool_phase(&phase)?,
        bid_status: parse_bid_status(&status)?,
        created_at: parse_ts(r.get("created_at"))?,
    })
}

fn parse_ts(s: String) -> DispatchResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DispatchError::Internal(anyhow!(e).context("invalid timestamp")))
}

fn parse_order_status(s: &str) -> DispatchResult<OrderStatus> {
    Ok(match s {
        "pending" => OrderStatus::Pending,
        "assigned" => OrderStatus::Assigned,
        "on_the_way" => OrderStatus::OnTheWay,
        "delivered" => OrderStatus::Delivered,
        "cancelled" => OrderStatus::Cancelled,
        other => return Err(DispatchError::Internal(anyhow!("unknown order_status: {other}"))),
    })
}

fn parse_payout_status(s: &str) -> DispatchResult<PayoutStatus> {
    Ok(match s {
        "pending" => PayoutStatus::Pending,
        "paid" => PayoutStatus::Paid,
        other => return Err(DispatchError::Internal(anyhow!("unknown payout_status: {other}"))),
    })
}

fn parse_agent_type(s: &str) -> DispatchResult<AgentType> {
    Ok(match s {
        "student" => AgentType::Student,
        "third_party" => AgentType::ThirdParty,
        other => return Err(DispatchError::Internal(anyhow!("unknown agent_type: {other}"))),
    })
}

fn parse_vehicle_type(s: &str) -> DispatchResult<VehicleType> {
    Ok(match s {
        "bike" => VehicleType::Bike,
        "scooter" => VehicleType::Scooter,
        "car" => VehicleType::Car,
        "walk" => VehicleType::Walk,
        other => return Err(DispatchError::Internal(anyhow!("unknown vehicle_type: {other}"))),
    })
}

fn parse_bg_status(s: &str) -> DispatchResult<BackgroundCheckStatus> {
    Ok(match s {
        "pending" => BackgroundCheckStatus::Pending,
        "cleared" => BackgroundCheckStatus::Cleared,
        "rejected" => BackgroundCheckStatus::Rejected,
        other => {
            return Err(DispatchError::Internal(anyhow!(
                "unknown background_check_status: {other}"
            )));
        }
    })
}

fn parse_pool_phase(s: &str) -> DispatchResult<PoolPhase> {
    Ok(match s {
        "student_pool" => PoolPhase::StudentPool,
        "all_agents" => PoolPhase::AllAgents,
        other => return Err(DispatchError::Internal(anyhow!("unknown pool_phase: {other}"))),
    })
}

fn parse_bid_status(s: &str) -> DispatchResult<BidStatus> {
    Ok(match s {
        "placed" => BidStatus::Placed,
        "accepted" => BidStatus::Accepted,
        "rejected" => BidStatus::Rejected,
        "expired" => BidStatus::Expired,
        "withdrawn" => BidStatus::Withdrawn,
        other => return Err(DispatchError::Internal(anyhow!("unknown bid_status: {other}"))),
    })
}

fn pool_phase_str(p: PoolPhase) -> &'static str {
    match p {
        PoolPhase::StudentPool => "student_pool",
        PoolPhase::AllAgents => "all_agents",
    }
}

fn bid_status_str(s: BidStatus) -> &'static str {
    match s {
        BidStatus::Placed => "placed",
        BidStatus::Accepted => "accepted",
        BidStatus::Rejected => "rejected",
        BidStatus::Expired => "expired",
        BidStatus::Withdrawn => "withdrawn",
    }
}
