// Poll Scheduler - drives the reconciliation cadence
//
// Each tick:
// 1. Load unresolved orders from the store
// 2. Fan their ids out to the worker pool
// 3. Wait for the pool, then pick the next fire time
//
// A rate-limited tick pushes the next fire time out by the provider's
// Retry-After; otherwise ticks keep the configured cadence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::accrual::models::{TickDirective, TickReport};
use crate::accrual::traits::AccrualStore;
use crate::accrual::worker::WorkerPool;

pub struct PollScheduler {
    store: Arc<dyn AccrualStore>,
    pool: WorkerPool,
    base_interval: Duration,
}

impl PollScheduler {
    pub fn new(store: Arc<dyn AccrualStore>, pool: WorkerPool, base_interval: Duration) -> Self {
        Self {
            store,
            pool,
            base_interval,
        }
    }

    /// Tick until cancelled. A tick already running is allowed to finish.
    pub async fn run(self, token: CancellationToken) {
        info!(
            "⏰ Accrual polling started, interval {}s",
            self.base_interval.as_secs_f64()
        );
        let mut next_fire = Instant::now() + self.base_interval;

        loop {
            // an overrun tick leaves next_fire in the past; cancellation wins
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep_until(next_fire) => {}
            }

            let started = Instant::now();
            let report = self.tick().await;
            let directive = report.directive();
            if let Some(delay) = directive.next_interval_override {
                info!("Next accrual poll postponed by {}s", delay.as_secs());
            }
            next_fire = next_fire_at(started, Instant::now(), self.base_interval, directive);
        }

        info!("✓ Accrual polling stopped");
    }

    /// One discover → dispatch → await cycle.
    /// A failed discovery skips the tick; the next one runs as scheduled.
    pub async fn tick(&self) -> TickReport {
        let orders = match self.store.list_unresolved_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!("❌ Failed to load unresolved orders: {}", e);
                return TickReport::default();
            }
        };

        let discovered = orders.len();
        let mut seen = HashSet::with_capacity(discovered);
        let order_ids: Vec<String> = orders
            .into_iter()
            .filter(|order| !order.status.is_terminal())
            .filter(|order| seen.insert(order.id.clone()))
            .map(|order| order.id)
            .collect();

        if order_ids.is_empty() {
            debug!("No unresolved orders to reconcile");
            return TickReport {
                discovered,
                ..Default::default()
            };
        }

        debug!("🔄 Reconciling {} orders", order_ids.len());
        let mut report = self.pool.run_batch(order_ids).await;
        report.discovered = discovered;

        debug!(
            discovered = report.discovered,
            looked_up = report.looked_up,
            delivered = report.delivered,
            not_registered = report.not_registered,
            failed = report.failed,
            "Accrual tick finished"
        );
        report
    }
}

/// Next fire time after a tick.
///
/// Without an override the cadence is anchored at the tick start (an
/// overrun tick fires again immediately). An override counts from the end
/// of the tick and applies to the next tick only.
pub fn next_fire_at(
    started: Instant,
    finished: Instant,
    base: Duration,
    directive: TickDirective,
) -> Instant {
    match directive.next_interval_override {
        Some(delay) => finished + delay,
        None => started + base,
    }
}
