use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{
    agent_feed::AgentFeed,
    bids::BidService,
    config::AppConfig,
    db::Db,
    dispatch_state::{DispatchStateStore, InMemoryDispatchStateStore},
    engine::{DispatchEngine, DispatchStartOutcome},
    fulfillment::FulfillmentLedger,
    logger::init_tracing,
    store::{OrderStore, repository_sqlx::SqlxOrderRepository},
};

struct App {
    store: OrderStore,
    engine: DispatchEngine,
    // Exposed for a future HTTP/API layer (out of scope here); constructed
    // now so main's wiring matches what that layer would be handed.
    _bids: Arc<BidService>,
    _dispatch_state: Arc<dyn DispatchStateStore>,
    _feed: AgentFeed,
    _ledger: FulfillmentLedger,
}

/// Connects the order store, runs migrations, and wires the dispatch-state
/// store, bid service, agent feed, fulfillment ledger and engine on top.
async fn init(cfg: &AppConfig) -> anyhow::Result<App> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxOrderRepository::new((*db.pool).clone()));
    let store = OrderStore::new(repo);

    let dispatch_state: Arc<dyn DispatchStateStore> = Arc::new(InMemoryDispatchStateStore::new());
    let bids = Arc::new(BidService::new(store.clone()));
    let engine = DispatchEngine::new(store.clone(), bids.clone(), dispatch_state.clone(), cfg.clone());
    let feed = AgentFeed::new(store.clone(), dispatch_state.clone());
    let ledger = FulfillmentLedger::new(store.clone());

    Ok(App {
        store,
        engine,
        _bids: bids,
        _dispatch_state: dispatch_state,
        _feed: feed,
        _ledger: ledger,
    })
}

/// Sweeps for assignable orders with no dispatch task running yet and starts
/// one for each. `DispatchEngine::start` is itself idempotent per order (it
/// reports `AlreadyRunning` instead of double-spawning), so this can run on
/// every tick rather than only at startup.
async fn drive_pending_orders(app: Arc<App>, poll_interval: Duration) {
    loop {
        match app.store.open_orders().await {
            Ok(orders) => {
                for order in orders {
                    match app.engine.start(order.order_id).await {
                        Ok(DispatchStartOutcome::Started) => {
                            tracing::info!(order_id = order.order_id, "dispatch started");
                        }
                        Ok(DispatchStartOutcome::AlreadyRunning) => {}
                        Err(e) => {
                            tracing::warn!(order_id = order.order_id, error = %e, "failed to start dispatch");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list open orders for dispatch sweep"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting dispatch core...");

    let cfg = AppConfig::from_env();
    let poll_interval = Duration::from_secs(cfg.poll_interval_secs);
    let app = Arc::new(init(&cfg).await?);

    tracing::info!("Dispatch core started; sweeping for pending orders");

    tokio::select! {
        _ = drive_pending_orders(app, poll_interval) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
