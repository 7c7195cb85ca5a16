use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use crate::{
    accrual::{AccrualAgent, AccrualClient},
    config::AppConfig,
    error::AppResult,
    orders::OrderRepository,
    server::AppState,
};

pub async fn initialize_app_state(config: &AppConfig) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_uri).await?;

    let repository = Arc::new(OrderRepository::new(pool));
    info!("✅ Order repository initialized");

    Ok(AppState { repository })
}

/// Wire the accrual agent to the order repository and the accrual service
pub fn build_agent(config: &AppConfig, repository: Arc<OrderRepository>) -> AppResult<AccrualAgent> {
    let agent_config = config.agent_config();

    let client = AccrualClient::new(
        &agent_config.accrual_base_url,
        agent_config.request_timeout,
        agent_config.default_retry_after_secs,
    )?;
    info!("✅ Accrual client configured for {}", agent_config.accrual_base_url);

    Ok(AccrualAgent::new(agent_config, repository, Arc::new(client)))
}

async fn initialize_database(database_uri: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_uri)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
