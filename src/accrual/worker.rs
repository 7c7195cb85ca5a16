use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accrual::models::{AccrualOutcome, TickReport};
use crate::accrual::traits::AccrualLookup;
use crate::error::AccrualError;

/// Fixed-size pool of lookup workers sharing one work queue per tick
pub struct WorkerPool {
    workers: usize,
    lookup: Arc<dyn AccrualLookup>,
    outcomes: mpsc::Sender<AccrualOutcome>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        lookup: Arc<dyn AccrualLookup>,
        outcomes: mpsc::Sender<AccrualOutcome>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            lookup,
            outcomes,
        }
    }

    /// Look up every order id once and wait for all workers to finish.
    ///
    /// The queue is sized to the batch and closed after the last id is
    /// enqueued. A rate-limited worker halts the batch: the others finish
    /// the lookup they are in and stop pulling, and the queue is dropped.
    pub async fn run_batch(&self, order_ids: Vec<String>) -> TickReport {
        let mut report = TickReport::default();
        if order_ids.is_empty() {
            return report;
        }

        let (queue_tx, queue_rx) = flume::bounded::<String>(order_ids.len());
        let halt = CancellationToken::new();
        let mut workers = JoinSet::new();

        for worker_id in 0..self.workers {
            workers.spawn(worker_loop(
                worker_id,
                queue_rx.clone(),
                self.lookup.clone(),
                self.outcomes.clone(),
                halt.clone(),
            ));
        }
        drop(queue_rx);

        for order_id in order_ids {
            if queue_tx.send_async(order_id).await.is_err() {
                break;
            }
        }
        drop(queue_tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => error!("Accrual worker task failed: {:?}", e),
            }
        }

        report
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: flume::Receiver<String>,
    lookup: Arc<dyn AccrualLookup>,
    outcomes: mpsc::Sender<AccrualOutcome>,
    halt: CancellationToken,
) -> TickReport {
    let mut report = TickReport::default();

    loop {
        // once halted, no worker takes another id even if the queue is not empty
        let order_id = tokio::select! {
            biased;
            _ = halt.cancelled() => break,
            received = queue.recv_async() => match received {
                Ok(order_id) => order_id,
                Err(_) => break,
            },
        };
        report.looked_up += 1;

        match lookup.lookup(&order_id).await {
            Ok(outcome) => {
                if outcomes.send(outcome).await.is_err() {
                    warn!(worker_id, order_id, "Result aggregator closed, dropping outcome");
                    break;
                }
                report.delivered += 1;
            }
            Err(AccrualError::RateLimited(directive)) => {
                info!(worker_id, order_id, "⏸️ Accrual service asked to back off: {}", directive);
                report.retry = Some(directive);
                halt.cancel();
                break;
            }
            Err(AccrualError::OrderNotRegistered { .. }) => {
                debug!(worker_id, order_id, "Order not registered in accrual service yet");
                report.not_registered += 1;
            }
            Err(e) => {
                warn!(worker_id, order_id, "Accrual lookup failed: {}", e);
                report.failed += 1;
            }
        }
    }

    report
}
