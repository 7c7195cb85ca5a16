use accrual_reconciler::{bootstrap, config::{AppConfig, Cli}, server};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{error, info};


// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,accrual_reconciler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    info!("🚀 Starting accrual reconciler");

    // Load configuration
    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;

    let state = bootstrap::initialize_app_state(&config).await?;
    let agent = bootstrap::build_agent(&config, state.repository.clone())?;

    let shutdown = CancellationToken::new();
    let agent_handle = agent.start(shutdown.child_token());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("🛑 Shutdown signal received");
        signal_token.cancel();
    });

    // Create HTTP server
    let app = server::create_app(state);

    // Run the Server
    let served = server::run_server(app, &config.run_address, shutdown.clone()).await;

    // Let the in-flight tick drain and the last batch flush
    shutdown.cancel();
    agent_handle.join().await;

    served?;
    info!("👋 Accrual reconciler stopped");

    Ok(())
}
