// Accrual reconciliation agent
pub mod aggregator;
pub mod client;
pub mod models;
pub mod scheduler;
pub mod traits;
pub mod worker;

pub use aggregator::ResultAggregator;
pub use client::AccrualClient;
pub use scheduler::PollScheduler;
pub use traits::{AccrualLookup, AccrualStore};
pub use worker::WorkerPool;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AgentConfig;

/// Background agent: one scheduler task and one aggregator task joined by
/// the outcome channel
pub struct AccrualAgent {
    config: AgentConfig,
    store: Arc<dyn AccrualStore>,
    lookup: Arc<dyn AccrualLookup>,
}

/// Running agent tasks
pub struct AgentHandle {
    scheduler: JoinHandle<()>,
    aggregator: JoinHandle<()>,
}

impl AccrualAgent {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn AccrualStore>,
        lookup: Arc<dyn AccrualLookup>,
    ) -> Self {
        Self {
            config,
            store,
            lookup,
        }
    }

    /// Spawn the scheduler and aggregator; both stop when `token` is cancelled
    pub fn start(self, token: CancellationToken) -> AgentHandle {
        info!(
            "🚀 Starting accrual agent against {} with {} workers",
            self.config.accrual_base_url, self.config.workers
        );

        let (outcome_tx, outcome_rx) = mpsc::channel(self.config.outcome_capacity.max(1));

        let aggregator = ResultAggregator::new(self.store.clone(), outcome_rx, self.config.flush_interval);
        let pool = WorkerPool::new(self.config.workers, self.lookup, outcome_tx);
        let scheduler = PollScheduler::new(self.store, pool, self.config.poll_interval);

        AgentHandle {
            aggregator: tokio::spawn(aggregator.run(token.clone())),
            scheduler: tokio::spawn(scheduler.run(token)),
        }
    }
}

impl AgentHandle {
    /// Wait for the in-flight tick to drain and the final flush to finish
    pub async fn join(self) {
        if let Err(e) = self.scheduler.await {
            error!("Accrual scheduler task failed: {:?}", e);
        }
        if let Err(e) = self.aggregator.await {
            error!("Accrual aggregator task failed: {:?}", e);
        }
        info!("✓ Accrual agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::models::{AccrualOutcome, AccrualStatus};
    use crate::error::{AccrualError, AppResult};
    use crate::orders::models::{OrderStatus, PendingOrder};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory orders table plus ledger
    #[derive(Default)]
    struct MemoryStore {
        orders: Mutex<HashMap<String, OrderStatus>>,
        ledger: Mutex<Vec<(String, Decimal)>>,
    }

    impl MemoryStore {
        fn with_orders(orders: &[(&str, OrderStatus)]) -> Self {
            let store = Self::default();
            {
                let mut table = store.orders.lock().unwrap();
                for (id, status) in orders {
                    table.insert(id.to_string(), *status);
                }
            }
            store
        }

        fn status(&self, id: &str) -> Option<OrderStatus> {
            self.orders.lock().unwrap().get(id).copied()
        }
    }

    #[async_trait]
    impl AccrualStore for MemoryStore {
        async fn list_unresolved_orders(&self) -> AppResult<Vec<PendingOrder>> {
            let orders = self.orders.lock().unwrap();
            let mut pending: Vec<PendingOrder> = orders
                .iter()
                .filter(|(_, status)| !status.is_terminal())
                .map(|(id, status)| PendingOrder {
                    id: id.clone(),
                    owner_id: 1,
                    status: *status,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .collect();
            pending.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(pending)
        }

        async fn apply_accrual_batch(&self, outcomes: &[AccrualOutcome]) -> AppResult<()> {
            let mut orders = self.orders.lock().unwrap();
            let mut ledger = self.ledger.lock().unwrap();
            for outcome in outcomes {
                match orders.get_mut(&outcome.order_id) {
                    Some(status) if !status.is_terminal() => {
                        *status = outcome.status.order_status();
                        if let Some(amount) = outcome.accrual {
                            ledger.push((outcome.order_id.clone(), amount));
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }

    /// Accrual service that reports a fixed answer per order
    #[derive(Default)]
    struct FakeAccrualService {
        answers: HashMap<String, AccrualOutcome>,
        latency: Duration,
        calls: AtomicUsize,
    }

    impl FakeAccrualService {
        fn new(answers: HashMap<String, AccrualOutcome>) -> Self {
            Self {
                answers,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AccrualLookup for FakeAccrualService {
        async fn lookup(&self, order_id: &str) -> Result<AccrualOutcome, AccrualError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.answers
                .get(order_id)
                .cloned()
                .ok_or_else(|| AccrualError::OrderNotRegistered {
                    order_id: order_id.to_string(),
                })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_reconciles_orders_end_to_end() {
        let store = Arc::new(MemoryStore::with_orders(&[
            ("123", OrderStatus::New),
            ("456", OrderStatus::New),
            ("789", OrderStatus::Processing),
            ("999", OrderStatus::New),
        ]));
        let mut answers = HashMap::new();
        answers.insert(
            "123".to_string(),
            AccrualOutcome::new("123", AccrualStatus::Processed, Some(dec!(500))),
        );
        answers.insert(
            "456".to_string(),
            AccrualOutcome::new("456", AccrualStatus::Invalid, None),
        );
        answers.insert(
            "789".to_string(),
            AccrualOutcome::new("789", AccrualStatus::Registered, None),
        );
        let lookup = Arc::new(FakeAccrualService::new(answers));

        let config = AgentConfig {
            poll_interval: Duration::from_secs(2),
            ..Default::default()
        };
        let agent = AccrualAgent::new(config, store.clone(), lookup);
        let token = CancellationToken::new();
        let handle = agent.start(token.clone());

        tokio::time::sleep(Duration::from_secs(7)).await;
        token.cancel();
        handle.join().await;

        assert_eq!(store.status("123"), Some(OrderStatus::Processed));
        assert_eq!(store.status("456"), Some(OrderStatus::Invalid));
        assert_eq!(store.status("789"), Some(OrderStatus::Processing));
        // 204 from the service leaves the order untouched
        assert_eq!(store.status("999"), Some(OrderStatus::New));
        assert_eq!(
            store.ledger.lock().unwrap().clone(),
            vec![("123".to_string(), dec!(500))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_tick_drains_and_flushes_once() {
        let store = Arc::new(MemoryStore::with_orders(&[("123", OrderStatus::New)]));
        let mut answers = HashMap::new();
        answers.insert(
            "123".to_string(),
            AccrualOutcome::new("123", AccrualStatus::Processed, Some(dec!(500))),
        );
        let lookup = Arc::new(FakeAccrualService {
            latency: Duration::from_secs(3),
            ..FakeAccrualService::new(answers)
        });

        // flushes only happen on shutdown
        let config = AgentConfig {
            poll_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(600),
            ..Default::default()
        };
        let agent = AccrualAgent::new(config, store.clone(), lookup.clone());
        let token = CancellationToken::new();
        let handle = agent.start(token.clone());

        // first tick fires at 1s, its lookup is still running at 1.5s
        tokio::time::sleep(Duration::from_millis(1500)).await;
        token.cancel();
        handle.join().await;

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.status("123"), Some(OrderStatus::Processed));
        assert_eq!(
            store.ledger.lock().unwrap().clone(),
            vec![("123".to_string(), dec!(500))]
        );
    }
}
