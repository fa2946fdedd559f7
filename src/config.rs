#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Order store connection string. Backed by sqlx's `Any` driver so the
    /// same code path runs against SQLite in dev/tests and Postgres in prod.
    pub database_url: String,

    /// Ephemeral dispatch-state store connection string. The in-process
    /// `DispatchStateStore` implementation ignores this, but it is surfaced
    /// here so a future Redis-backed implementation needs no config change.
    pub redis_url: String,

    /// Passthrough for the outer auth layer; unused by this crate.
    pub access_token_expire_minutes: u64,

    // =========================
    // Dispatch engine timing
    // =========================
    /// Lower bound (seconds) of the randomized phase-1 (student-only) wait.
    pub phase1_wait_min_secs: u64,

    /// Upper bound (seconds) of the randomized phase-1 wait.
    pub phase1_wait_max_secs: u64,

    /// Fixed phase-2 (all-agents) wait before declaring `needs_fee_increase`
    /// when no bid has ever arrived.
    pub phase2_wait_secs: u64,

    /// How often the engine polls the order/bid state while waiting.
    pub poll_interval_secs: u64,

    /// Rolling close window: phase 2 closes this many seconds after the most
    /// recent bid, rather than at a fixed deadline.
    pub rolling_bid_close_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://dispatch_dev.db".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());
        let access_token_expire_minutes = std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            database_url,
            redis_url,
            access_token_expire_minutes,

            // Dispatch defaults: 3-4 minute student window, 3 minute
            // all-agents window, polled every 5s, 60s rolling close.
            phase1_wait_min_secs: 180,
            phase1_wait_max_secs: 240,
            phase2_wait_secs: 180,
            poll_interval_secs: 5,
            rolling_bid_close_secs: 60,
        }
    }
}
