use async_trait::async_trait;

use crate::accrual::models::AccrualOutcome;
use crate::error::{AccrualError, AppResult};
use crate::orders::models::PendingOrder;

/// Persistence the agent needs: discover unresolved orders, write results back
#[async_trait]
pub trait AccrualStore: Send + Sync {
    /// Orders whose status is not INVALID or PROCESSED
    async fn list_unresolved_orders(&self) -> AppResult<Vec<PendingOrder>>;

    /// Apply status updates and ledger entries for a whole batch atomically
    async fn apply_accrual_batch(&self, outcomes: &[AccrualOutcome]) -> AppResult<()>;
}

/// One status lookup against the accrual service
#[async_trait]
pub trait AccrualLookup: Send + Sync {
    async fn lookup(&self, order_id: &str) -> Result<AccrualOutcome, AccrualError>;
}
