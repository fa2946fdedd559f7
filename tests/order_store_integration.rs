use chrono::Utc;
use dispatch_core::bids::BidService;
use dispatch_core::fulfillment::FulfillmentLedger;
use dispatch_core::model::{BidStatus, PayoutStatus, PoolPhase};
use dispatch_core::store::repository_sqlx::SqlxOrderRepository;
use dispatch_core::store::OrderStore;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

/// Isolated in-memory SQLite pool per test; unique db name prevents
/// cross-test interference when the suite runs in parallel.
async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    dispatch_core::db::schema::migrate(&pool).await.expect("migrate schema");
    pool
}

async fn seed_order(pool: &AnyPool, order_id: i64, base_fare: f64) {
    sqlx::query(
        r#"
INSERT INTO orders(order_id, user_id, restaurant_id, assigned_partner_id, delivery_address,
  base_fare, delivery_fee, commission_amount, order_status, created_at, delivered_at,
  delivery_proof_ref, delivery_proof_filename, agent_payout_amount, agent_payout_status)
VALUES (?, 1, 1, NULL, 'addr', ?, 0.0, 0.0, 'pending', ?, NULL, NULL, NULL, 0.0, 'pending');
"#,
    )
    .bind(order_id)
    .bind(base_fare)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("seed order");
}

async fn seed_agent(pool: &AnyPool, agent_id: &str, agent_type: &str, active: bool) {
    sqlx::query(
        r#"
INSERT INTO delivery_agents(agent_id, agent_type, is_active, is_verified, vehicle_type, rating,
  total_deliveries, total_earnings, current_lat, current_lng, base_payout_per_delivery,
  bonus_multiplier, kerberos_id, background_check_status)
VALUES (?, ?, ?, 1, 'bike', 4.8, 0, 0.0, NULL, NULL, 3.0, 1.0, NULL, 'cleared');
"#,
    )
    .bind(agent_id)
    .bind(agent_type)
    .bind(active)
    .execute(pool)
    .await
    .expect("seed agent");
}

fn service(pool: AnyPool) -> BidService {
    let repo = Arc::new(SqlxOrderRepository::new(pool));
    BidService::new(OrderStore::new(repo))
}

fn store_for(pool: AnyPool) -> OrderStore {
    OrderStore::new(Arc::new(SqlxOrderRepository::new(pool)))
}

#[tokio::test]
async fn place_bid_persists_and_lists_newest_first() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 10.0).await;
    seed_agent(&pool, "s1", "student", true).await;
    let svc = service(pool);

    svc.place_bid(1, "s1", 11.0, PoolPhase::StudentPool).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = svc.place_bid(1, "s1", 12.0, PoolPhase::StudentPool).await.unwrap();

    let bids = svc.list_by_order(1).await.unwrap();
    assert_eq!(bids.len(), 2);
    assert_eq!(bids[0].bid_id, second.bid_id);
}

#[tokio::test]
async fn award_bid_is_atomic_and_rejects_competitors() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 10.0).await;
    seed_agent(&pool, "a1", "student", true).await;
    seed_agent(&pool, "a2", "student", true).await;
    let svc = service(pool);

    let b1 = svc.place_bid(1, "a1", 11.0, PoolPhase::StudentPool).await.unwrap();
    let b2 = svc.place_bid(1, "a2", 12.0, PoolPhase::StudentPool).await.unwrap();

    svc.accept(b1.bid_id).await.unwrap();

    let bids = svc.list_by_order(1).await.unwrap();
    let accepted = bids.iter().find(|b| b.bid_id == b1.bid_id).unwrap();
    let rejected = bids.iter().find(|b| b.bid_id == b2.bid_id).unwrap();
    assert!(matches!(accepted.bid_status, BidStatus::Accepted));
    assert!(matches!(rejected.bid_status, BidStatus::Rejected));
}

#[tokio::test]
async fn double_award_race_only_one_wins() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 10.0).await;
    seed_agent(&pool, "a1", "student", true).await;
    seed_agent(&pool, "a2", "student", true).await;
    let svc = Arc::new(service(pool));

    let b1 = svc.place_bid(1, "a1", 11.0, PoolPhase::StudentPool).await.unwrap();
    let b2 = svc.place_bid(1, "a2", 12.0, PoolPhase::StudentPool).await.unwrap();

    let svc_a = svc.clone();
    let svc_b = svc.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { svc_a.accept(b1.bid_id).await }),
        tokio::spawn(async move { svc_b.accept(b2.bid_id).await }),
    );

    let results = [ra.unwrap(), rb.unwrap()];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1);
}

#[tokio::test]
async fn fulfill_delivery_is_idempotent_and_pays_once() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 10.0).await;
    seed_agent(&pool, "a1", "student", true).await;

    let svc = service(pool.clone());
    let bid = svc.place_bid(1, "a1", 11.0, PoolPhase::StudentPool).await.unwrap();
    svc.accept(bid.bid_id).await.unwrap();

    let ledger = FulfillmentLedger::new(store_for(pool.clone()));
    let first = ledger.fulfill_delivery("a1", 1, "proof.jpg", "proof.jpg").await.unwrap();
    assert!(matches!(first.agent_payout_status, PayoutStatus::Paid));
    assert_eq!(first.agent_payout_amount, 11.0);

    let second = ledger.fulfill_delivery("a1", 1, "proof.jpg", "proof.jpg").await.unwrap();
    assert_eq!(second.agent_payout_amount, 11.0);

    let row: (f64, i64) = sqlx::query_as("SELECT total_earnings, total_deliveries FROM delivery_agents WHERE agent_id = 'a1';")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, 11.0);
    assert_eq!(row.1, 1);
}

#[tokio::test]
async fn bid_window_violation_reports_structured_bounds() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 10.0).await;
    seed_agent(&pool, "a1", "student", true).await;
    let svc = service(pool);

    let err = svc.place_bid(1, "a1", 15.01, PoolPhase::StudentPool).await.unwrap_err();
    match err {
        dispatch_core::error::DispatchError::BidWindow(v) => {
            assert_eq!(v.min_allowed_fare, 10.0);
            assert_eq!(v.max_allowed_fare, 15.0);
            assert_eq!(v.submitted_bid_amount, 15.01);
        }
        other => panic!("expected BidWindow error, got {other:?}"),
    }
}
