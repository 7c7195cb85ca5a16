use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use super::models::*;
use crate::accrual::models::AccrualOutcome;
use crate::accrual::traits::AccrualStore;
use crate::error::AppResult;

/// Orders repository - status of every order and its loyalty ledger
pub struct OrderRepository {
    pub pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ========== ACCRUAL RECONCILIATION ==========

    /// Orders the accrual service has not settled yet
    pub async fn list_unresolved_orders(&self) -> AppResult<Vec<PendingOrder>> {
        let orders = sqlx::query_as::<_, PendingOrder>(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM orders
            WHERE status NOT IN ('INVALID', 'PROCESSED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// Apply a batch of accrual outcomes in one transaction.
    ///
    /// Only unresolved orders are updated, and the ledger row is written
    /// only when its order was, so a late duplicate never credits twice.
    pub async fn apply_accrual_batch(&self, outcomes: &[AccrualOutcome]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut credited = 0usize;

        for outcome in outcomes {
            let status = outcome.status.order_status();

            let updated = sqlx::query(
                r#"
                UPDATE orders
                SET status = $1, updated_at = NOW()
                WHERE id = $2 AND status NOT IN ('INVALID', 'PROCESSED')
                "#,
            )
            .bind(status)
            .bind(&outcome.order_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                debug!(order_id = %outcome.order_id, "Order already settled, skipping outcome");
                continue;
            }

            if let Some(amount) = outcome.accrual {
                sqlx::query(
                    r#"
                    INSERT INTO loyalty (order_id, value)
                    VALUES ($1, $2)
                    "#,
                )
                .bind(&outcome.order_id)
                .bind(amount)
                .execute(&mut *tx)
                .await?;
                credited += 1;
            }
        }

        tx.commit().await?;

        info!(
            "✓ Applied {} accrual outcomes ({} ledger entries)",
            outcomes.len(),
            credited
        );
        Ok(())
    }
}

#[async_trait]
impl AccrualStore for OrderRepository {
    async fn list_unresolved_orders(&self) -> AppResult<Vec<PendingOrder>> {
        OrderRepository::list_unresolved_orders(self).await
    }

    async fn apply_accrual_batch(&self, outcomes: &[AccrualOutcome]) -> AppResult<()> {
        OrderRepository::apply_accrual_batch(self, outcomes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::models::AccrualStatus;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use sqlx::Row;

    async fn repository() -> OrderRepository {
        let uri = std::env::var("DATABASE_URI")
            .unwrap_or_else(|_| "postgresql://localhost/accrual_test".to_string());
        let pool = PgPool::connect(&uri).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        OrderRepository::new(pool)
    }

    async fn seed_order(repo: &OrderRepository, id: &str, status: OrderStatus) {
        sqlx::query("INSERT INTO users (login, pwd_hash) VALUES ($1, 'x') ON CONFLICT (login) DO NOTHING")
            .bind("accrual-test")
            .execute(&repo.pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM loyalty WHERE order_id = $1")
            .bind(id)
            .execute(&repo.pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status)
            SELECT $1, id, $2 FROM users WHERE login = 'accrual-test'
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&repo.pool)
        .await
        .unwrap();
    }

    async fn ledger_total(repo: &OrderRepository, id: &str) -> Decimal {
        let row = sqlx::query("SELECT COALESCE(SUM(value), 0) AS total FROM loyalty WHERE order_id = $1")
            .bind(id)
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        row.get::<Decimal, _>("total")
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_processed_outcome_credits_once() {
        let repo = repository().await;
        seed_order(&repo, "79927398713", OrderStatus::New).await;

        let outcome = AccrualOutcome::new("79927398713", AccrualStatus::Processed, Some(dec!(500)));
        repo.apply_accrual_batch(&[outcome.clone()]).await.unwrap();
        repo.apply_accrual_batch(&[outcome]).await.unwrap();

        assert_eq!(ledger_total(&repo, "79927398713").await, dec!(500));
        let unresolved = repo.list_unresolved_orders().await.unwrap();
        assert!(unresolved.iter().all(|o| o.id != "79927398713"));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_registered_outcome_moves_order_to_processing() {
        let repo = repository().await;
        seed_order(&repo, "4561261212345467", OrderStatus::New).await;

        let outcome = AccrualOutcome::new("4561261212345467", AccrualStatus::Registered, None);
        repo.apply_accrual_batch(&[outcome]).await.unwrap();

        let unresolved = repo.list_unresolved_orders().await.unwrap();
        let order = unresolved
            .iter()
            .find(|o| o.id == "4561261212345467")
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(ledger_total(&repo, "4561261212345467").await, Decimal::ZERO);
    }
}
