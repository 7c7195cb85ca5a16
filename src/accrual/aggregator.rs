use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::accrual::models::AccrualOutcome;
use crate::accrual::traits::AccrualStore;

/// What happened to an outcome offered to the pending batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    Duplicate,
    Replaced,
}

/// Outcomes waiting for the next flush, at most one per order.
///
/// Iteration follows first-arrival order. An identical outcome for an order
/// already pending is dropped; a different one replaces it in place.
#[derive(Debug, Default)]
pub struct PendingBatch {
    outcomes: Vec<AccrualOutcome>,
    index: HashMap<String, usize>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, outcome: AccrualOutcome) -> Admission {
        match self.index.get(&outcome.order_id) {
            Some(&slot) if self.outcomes[slot] == outcome => Admission::Duplicate,
            Some(&slot) => {
                self.outcomes[slot] = outcome;
                Admission::Replaced
            }
            None => {
                self.index.insert(outcome.order_id.clone(), self.outcomes.len());
                self.outcomes.push(outcome);
                Admission::Added
            }
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn as_slice(&self) -> &[AccrualOutcome] {
        &self.outcomes
    }

    /// Hand over everything pending and start a fresh window
    pub fn take(&mut self) -> Vec<AccrualOutcome> {
        self.index.clear();
        std::mem::take(&mut self.outcomes)
    }
}

/// Single consumer of lookup results; persists them in periodic batches
pub struct ResultAggregator {
    store: Arc<dyn AccrualStore>,
    intake: mpsc::Receiver<AccrualOutcome>,
    flush_interval: Duration,
    pending: PendingBatch,
}

impl ResultAggregator {
    pub fn new(
        store: Arc<dyn AccrualStore>,
        intake: mpsc::Receiver<AccrualOutcome>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            intake,
            flush_interval,
            pending: PendingBatch::new(),
        }
    }

    /// Run until cancelled, then collect what producers still send until
    /// they hang up, flush once more and exit.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = self.intake.recv() => match received {
                    Some(outcome) => self.accept(outcome),
                    None => break,
                },
                _ = ticker.tick() => self.flush().await,
            }
        }

        while let Some(outcome) = self.intake.recv().await {
            self.accept(outcome);
        }
        self.flush().await;
        info!("✓ Accrual result aggregator stopped");
    }

    fn accept(&mut self, outcome: AccrualOutcome) {
        let order_id = outcome.order_id.clone();
        match self.pending.admit(outcome) {
            Admission::Added => {
                debug!(order_id, pending = self.pending.len(), "Outcome queued for flush")
            }
            Admission::Duplicate => debug!(order_id, "Duplicate outcome dropped"),
            Admission::Replaced => debug!(order_id, "Pending outcome superseded"),
        }
    }

    /// Persist the pending batch in one call. A failed batch is dropped:
    /// its orders stay unresolved and are picked up by a later tick.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            debug!("No accrual outcomes to write");
            return;
        }

        let batch = self.pending.take();
        match self.store.apply_accrual_batch(&batch).await {
            Ok(()) => info!("💾 Persisted {} accrual outcomes", batch.len()),
            Err(e) => warn!(
                "Dropping batch of {} accrual outcomes after failed write: {}",
                batch.len(),
                e
            ),
        }
    }
}
