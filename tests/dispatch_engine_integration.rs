use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_core::bids::BidService;
use dispatch_core::config::AppConfig;
use dispatch_core::dispatch_state::{DispatchStateStore, InMemoryDispatchStateStore};
use dispatch_core::engine::{DispatchEngine, DispatchStartOutcome};
use dispatch_core::model::{DispatchPhase, DispatchStatus, PoolPhase};
use dispatch_core::store::repository_sqlx::SqlxOrderRepository;
use dispatch_core::store::OrderStore;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let pool = AnyPoolOptions::new().max_connections(5).connect(&conn).await.unwrap();
    dispatch_core::db::schema::migrate(&pool).await.unwrap();
    pool
}

async fn seed_order(pool: &AnyPool, order_id: i64, base_fare: f64) {
    sqlx::query(
        r#"
INSERT INTO orders(order_id, user_id, restaurant_id, assigned_partner_id, delivery_address,
  base_fare, delivery_fee, commission_amount, order_status, created_at, delivered_at,
  delivery_proof_ref, delivery_proof_filename, agent_payout_amount, agent_payout_status)
VALUES (?, 1, 7, NULL, 'addr', ?, 0.0, 0.0, 'pending', ?, NULL, NULL, NULL, 0.0, 'pending');
"#,
    )
    .bind(order_id)
    .bind(base_fare)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_agent(pool: &AnyPool, agent_id: &str, agent_type: &str) {
    sqlx::query(
        r#"
INSERT INTO delivery_agents(agent_id, agent_type, is_active, is_verified, vehicle_type, rating,
  total_deliveries, total_earnings, current_lat, current_lng, base_payout_per_delivery,
  bonus_multiplier, kerberos_id, background_check_status)
VALUES (?, ?, 1, 1, 'bike', 4.8, 0, 0.0, NULL, NULL, 3.0, 1.0, NULL, 'cleared');
"#,
    )
    .bind(agent_id)
    .bind(agent_type)
    .execute(pool)
    .await
    .unwrap();
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        redis_url: String::new(),
        access_token_expire_minutes: 60,
        phase1_wait_min_secs: 2,
        phase1_wait_max_secs: 2,
        phase2_wait_secs: 2,
        poll_interval_secs: 1,
        rolling_bid_close_secs: 2,
    }
}

async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    // give the spawned task a chance to observe the advanced clock
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn student_bid_wins_phase_one() {
    let pool = setup_db().await;
    seed_order(&pool, 1, 8.0).await;
    seed_agent(&pool, "s1", "student").await;

    let store = OrderStore::new(Arc::new(SqlxOrderRepository::new(pool)));
    let bids = Arc::new(BidService::new(store.clone()));
    let dispatch_state: Arc<dyn DispatchStateStore> = Arc::new(InMemoryDispatchStateStore::new());
    let engine = DispatchEngine::new(store.clone(), bids.clone(), dispatch_state.clone(), test_config());

    let outcome = engine.start(1).await.unwrap();
    assert_eq!(outcome, DispatchStartOutcome::Started);

    for _ in 0..5 {
        advance(1).await;
    }

    bids.place_bid(1, "s1", 9.5, PoolPhase::StudentPool).await.unwrap();

    for _ in 0..10 {
        advance(1).await;
        if dispatch_state.is_assigned(1).await {
            break;
        }
    }

    assert!(dispatch_state.is_assigned(1).await);
    let state = engine.status(1).await.unwrap();
    assert_eq!(state.status, DispatchStatus::Assigned);
    assert_eq!(state.phase, DispatchPhase::Completed);

    let order = store.order(1).await.unwrap().unwrap();
    assert_eq!(order.assigned_partner_id.as_deref(), Some("s1"));
    assert_eq!(order.delivery_fee, 9.5);
}

#[tokio::test(start_paused = true)]
async fn no_bids_ever_arrive_needs_fee_increase() {
    let pool = setup_db().await;
    seed_order(&pool, 2, 8.0).await;

    let store = OrderStore::new(Arc::new(SqlxOrderRepository::new(pool)));
    let bids = Arc::new(BidService::new(store.clone()));
    let dispatch_state: Arc<dyn DispatchStateStore> = Arc::new(InMemoryDispatchStateStore::new());
    let engine = DispatchEngine::new(store.clone(), bids.clone(), dispatch_state.clone(), test_config());

    engine.start(2).await.unwrap();

    for _ in 0..12 {
        advance(1).await;
        if let Some(s) = engine.status(2).await {
            if s.status == DispatchStatus::NeedsFeeIncrease {
                break;
            }
        }
    }

    let state = engine.status(2).await.unwrap();
    assert_eq!(state.status, DispatchStatus::NeedsFeeIncrease);
    assert!(!dispatch_state.is_assigned(2).await);
}

fn rolling_close_test_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        redis_url: String::new(),
        access_token_expire_minutes: 60,
        phase1_wait_min_secs: 1,
        phase1_wait_max_secs: 1,
        phase2_wait_secs: 60,
        poll_interval_secs: 1,
        rolling_bid_close_secs: 3,
    }
}

#[tokio::test(start_paused = true)]
async fn rolling_close_resets_on_each_bid_and_awards_the_cheaper_later_bid() {
    let pool = setup_db().await;
    seed_order(&pool, 4, 8.0).await;
    seed_agent(&pool, "p1", "third_party").await;
    seed_agent(&pool, "c1", "third_party").await;

    let store = OrderStore::new(Arc::new(SqlxOrderRepository::new(pool)));
    let bids = Arc::new(BidService::new(store.clone()));
    let dispatch_state: Arc<dyn DispatchStateStore> = Arc::new(InMemoryDispatchStateStore::new());
    let engine = DispatchEngine::new(store.clone(), bids.clone(), dispatch_state.clone(), rolling_close_test_config());

    engine.start(4).await.unwrap();

    // phase 1's 1s student-only window has nobody to bid; it escalates straight to phase 2.
    for _ in 0..2 {
        advance(1).await;
    }
    let state = engine.status(4).await.unwrap();
    assert_eq!(state.phase, DispatchPhase::AllAgents);

    // a pricier bid opens the first 3s rolling close window.
    bids.place_bid(4, "p1", 12.0, PoolPhase::AllAgents).await.unwrap();
    advance(1).await;

    // a cheaper bid arrives inside that window and must push the deadline out again.
    bids.place_bid(4, "c1", 9.0, PoolPhase::AllAgents).await.unwrap();
    for _ in 0..3 {
        advance(1).await;
    }
    // the first bid's unreset 3s deadline would have fired by now; it must not have,
    // since the second bid's arrival reset the window.
    assert!(!dispatch_state.is_assigned(4).await);

    // the reset window now elapses and the cheaper, later bid wins the tie-break.
    advance(1).await;
    assert!(dispatch_state.is_assigned(4).await);

    let final_state = engine.status(4).await.unwrap();
    assert_eq!(final_state.status, DispatchStatus::Assigned);

    let order = store.order(4).await.unwrap().unwrap();
    assert_eq!(order.assigned_partner_id.as_deref(), Some("c1"));
    assert_eq!(order.delivery_fee, 9.0);
}

#[tokio::test]
async fn starting_twice_reports_already_running() {
    let pool = setup_db().await;
    seed_order(&pool, 3, 8.0).await;

    let store = OrderStore::new(Arc::new(SqlxOrderRepository::new(pool)));
    let bids = Arc::new(BidService::new(store.clone()));
    let dispatch_state: Arc<dyn DispatchStateStore> = Arc::new(InMemoryDispatchStateStore::new());
    let engine = DispatchEngine::new(store.clone(), bids.clone(), dispatch_state.clone(), test_config());

    let first = engine.start(3).await.unwrap();
    let second = engine.start(3).await.unwrap();

    assert_eq!(first, DispatchStartOutcome::Started);
    assert_eq!(second, DispatchStartOutcome::AlreadyRunning);
}
