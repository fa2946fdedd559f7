use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS delivery_agents (
  agent_id TEXT PRIMARY KEY,
  agent_type TEXT NOT NULL,
  is_active BOOLEAN NOT NULL,
  is_verified BOOLEAN NOT NULL,
  vehicle_type TEXT NOT NULL,
  rating DOUBLE PRECISION NOT NULL,
  total_deliveries BIGINT NOT NULL,
  total_earnings DOUBLE PRECISION NOT NULL,
  current_lat DOUBLE PRECISION,
  current_lng DOUBLE PRECISION,
  base_payout_per_delivery DOUBLE PRECISION NOT NULL,
  bonus_multiplier DOUBLE PRECISION NOT NULL,
  kerberos_id TEXT,
  background_check_status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  order_id BIGINT PRIMARY KEY,
  user_id BIGINT NOT NULL,
  restaurant_id BIGINT NOT NULL,
  assigned_partner_id TEXT,
  delivery_address TEXT NOT NULL,
  base_fare DOUBLE PRECISION NOT NULL,
  delivery_fee DOUBLE PRECISION NOT NULL,
  commission_amount DOUBLE PRECISION NOT NULL,
  order_status TEXT NOT NULL,
  created_at TEXT NOT NULL,
  delivered_at TEXT,
  delivery_proof_ref TEXT,
  delivery_proof_filename TEXT,
  agent_payout_amount DOUBLE PRECISION NOT NULL,
  agent_payout_status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS delivery_bids (
  bid_id BIGINT PRIMARY KEY,
  order_id BIGINT NOT NULL,
  agent_id TEXT NOT NULL,
  bid_amount DOUBLE PRECISION NOT NULL,
  min_allowed_fare DOUBLE PRECISION NOT NULL,
  max_allowed_fare DOUBLE PRECISION NOT NULL,
  pool_phase TEXT NOT NULL,
  bid_status TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bids_order ON delivery_bids(order_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bids_agent ON delivery_bids(agent_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_orders_assigned ON orders(assigned_partner_id);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
