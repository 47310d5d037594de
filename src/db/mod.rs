use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;
use uuid::Uuid;

use crate::types::{Chain, SwapStatus};

pub mod models;

pub use models::*;

const SWAP_COLUMNS: &str = "id, direction, address, amount, source_tx, dest_tx, status, \
     mined_phase, fail_reason, fees, created_at, updated_at";

/// Storage operations the reconciler and the swap service depend on
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn list_pending_swaps(&self) -> Result<Vec<Swap>>;
    async fn get_swap(&self, id: Uuid) -> Result<Option<Swap>>;
    async fn insert_swap(&self, swap: &NewSwap) -> Result<Swap>;
    async fn latest_swaps(&self, limit: i64) -> Result<Vec<Swap>>;

    /// Set `source_tx` on a pending swap that has none yet
    async fn attach_source_tx(&self, id: Uuid, tx_hash: &str) -> Result<bool>;

    /// Returns false when the swap was no longer Pending
    async fn update_swap(&self, id: Uuid, update: SwapUpdate) -> Result<bool>;

    async fn is_claimed(&self, chain: Chain, tx_hash: &str) -> Result<bool>;

    /// Insert into the used-transaction ledger; true only for the first caller
    async fn claim(&self, chain: Chain, tx_hash: &str) -> Result<bool>;

    async fn list_pending_refunds(&self) -> Result<Vec<PendingRefund>>;

    /// Returns false when another worker already removed the refund
    async fn delete_refund(&self, id: i64) -> Result<bool>;
    async fn insert_refund(&self, refund: &NewRefund) -> Result<i64>;

    /// Fail a swap and enqueue its compensation in one transaction
    async fn fail_with_refund(&self, id: Uuid, reason: &str, refund: &NewRefund) -> Result<bool>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

fn into_swaps(rows: Vec<SwapRow>) -> Result<Vec<Swap>> {
    rows.into_iter().map(Swap::try_from).collect()
}

/// Insert a new swap in the Pending state
pub async fn insert_swap(pool: &PgPool, swap: &NewSwap) -> Result<Swap> {
    let query = format!(
        "INSERT INTO swaps (id, direction, address, amount) VALUES ($1, $2, $3, $4) \
         RETURNING {}",
        SWAP_COLUMNS
    );
    let row = sqlx::query_as::<_, SwapRow>(&query)
        .bind(Uuid::new_v4())
        .bind(swap.direction.as_str())
        .bind(&swap.address)
        .bind(&swap.amount)
        .fetch_one(pool)
        .await
        .wrap_err("Failed to insert swap")?;

    Swap::try_from(row)
}

pub async fn get_swap(pool: &PgPool, id: Uuid) -> Result<Option<Swap>> {
    let query = format!("SELECT {} FROM swaps WHERE id = $1", SWAP_COLUMNS);
    let row = sqlx::query_as::<_, SwapRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get swap")?;

    row.map(Swap::try_from).transpose()
}

/// All Pending swaps, oldest first
pub async fn list_pending_swaps(pool: &PgPool) -> Result<Vec<Swap>> {
    let query = format!(
        "SELECT {} FROM swaps WHERE status = $1 ORDER BY created_at ASC",
        SWAP_COLUMNS
    );
    let rows = sqlx::query_as::<_, SwapRow>(&query)
        .bind(SwapStatus::Pending.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| {
            error!("SQL error listing pending swaps: {:?}", e);
            e
        })
        .wrap_err("Failed to list pending swaps")?;

    into_swaps(rows)
}

pub async fn latest_swaps(pool: &PgPool, limit: i64) -> Result<Vec<Swap>> {
    let query = format!(
        "SELECT {} FROM swaps ORDER BY created_at DESC LIMIT $1",
        SWAP_COLUMNS
    );
    let rows = sqlx::query_as::<_, SwapRow>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await
        .wrap_err("Failed to list latest swaps")?;

    into_swaps(rows)
}

pub async fn attach_source_tx(pool: &PgPool, id: Uuid, tx_hash: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE swaps SET source_tx = $2, updated_at = NOW()
        WHERE id = $1 AND source_tx IS NULL AND status = 'Pending'
        "#,
    )
    .bind(id)
    .bind(tx_hash.to_lowercase())
    .execute(pool)
    .await
    .wrap_err("Failed to attach source tx")?;

    Ok(result.rows_affected() == 1)
}

/// Apply a state change; terminal swaps are never rewritten
pub async fn update_swap(pool: &PgPool, id: Uuid, update: &SwapUpdate) -> Result<bool> {
    let query = match update {
        SwapUpdate::AwaitingConfirmation => sqlx::query(
            r#"
            UPDATE swaps SET mined_phase = 'awaiting_confirmation', updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(id),
        SwapUpdate::ActionTaken => sqlx::query(
            r#"
            UPDATE swaps SET mined_phase = 'action_taken', updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(id),
        SwapUpdate::Succeeded { dest_tx, fees } => sqlx::query(
            r#"
            UPDATE swaps SET status = 'Success', dest_tx = $2, fees = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(id)
        .bind(dest_tx.to_lowercase())
        .bind(fees),
        SwapUpdate::Failed { reason } => sqlx::query(
            r#"
            UPDATE swaps SET status = 'Fail', fail_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(id)
        .bind(reason),
    };

    let result = query
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to update swap {}", id))?;

    Ok(result.rows_affected() == 1)
}

pub async fn is_claimed(pool: &PgPool, chain: Chain, tx_hash: &str) -> Result<bool> {
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM used_txs WHERE chain = $1 AND tx_hash = $2 LIMIT 1",
    )
    .bind(chain.as_str())
    .bind(tx_hash.to_lowercase())
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to check used tx")?;

    Ok(row.is_some())
}

/// The unique (chain, tx_hash) key makes this the only cross-process lock
pub async fn claim(pool: &PgPool, chain: Chain, tx_hash: &str) -> Result<bool> {
    let row = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO used_txs (chain, tx_hash) VALUES ($1, $2)
        ON CONFLICT (chain, tx_hash) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(chain.as_str())
    .bind(tx_hash.to_lowercase())
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to claim tx")?;

    Ok(row.is_some())
}

pub async fn list_pending_refunds(pool: &PgPool) -> Result<Vec<PendingRefund>> {
    let rows = sqlx::query_as::<_, PendingRefund>(
        "SELECT id, address, amount, swap_id, created_at FROM pending_refunds ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list pending refunds")?;

    Ok(rows)
}

pub async fn delete_refund(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM pending_refunds WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .wrap_err("Failed to delete refund")?;

    Ok(result.rows_affected() == 1)
}

pub async fn insert_refund(pool: &PgPool, refund: &NewRefund) -> Result<i64> {
    let row = sqlx::query_as::<_, (i64,)>(
        "INSERT INTO pending_refunds (address, amount, swap_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&refund.address)
    .bind(&refund.amount)
    .bind(refund.swap_id)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert refund")?;

    Ok(row.0)
}

/// Mark a swap failed and queue its refund atomically
///
/// Nothing is queued when the swap already left Pending.
pub async fn fail_with_refund(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
    refund: &NewRefund,
) -> Result<bool> {
    let mut tx = pool.begin().await.wrap_err("Failed to begin transaction")?;

    let result = sqlx::query(
        r#"
        UPDATE swaps SET status = 'Fail', fail_reason = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'Pending'
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(&mut *tx)
    .await
    .wrap_err_with(|| format!("Failed to fail swap {}", id))?;

    if result.rows_affected() != 1 {
        tx.rollback().await.wrap_err("Failed to roll back")?;
        return Ok(false);
    }

    sqlx::query("INSERT INTO pending_refunds (address, amount, swap_id) VALUES ($1, $2, $3)")
        .bind(&refund.address)
        .bind(&refund.amount)
        .bind(refund.swap_id)
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to insert refund")?;

    tx.commit().await.wrap_err("Failed to commit swap failure")?;
    Ok(true)
}

/// Postgres-backed `SwapStore`
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SwapStore for PgStore {
    async fn list_pending_swaps(&self) -> Result<Vec<Swap>> {
        list_pending_swaps(&self.pool).await
    }

    async fn get_swap(&self, id: Uuid) -> Result<Option<Swap>> {
        get_swap(&self.pool, id).await
    }

    async fn insert_swap(&self, swap: &NewSwap) -> Result<Swap> {
        insert_swap(&self.pool, swap).await
    }

    async fn latest_swaps(&self, limit: i64) -> Result<Vec<Swap>> {
        latest_swaps(&self.pool, limit).await
    }

    async fn attach_source_tx(&self, id: Uuid, tx_hash: &str) -> Result<bool> {
        attach_source_tx(&self.pool, id, tx_hash).await
    }

    async fn update_swap(&self, id: Uuid, update: SwapUpdate) -> Result<bool> {
        update_swap(&self.pool, id, &update).await
    }

    async fn is_claimed(&self, chain: Chain, tx_hash: &str) -> Result<bool> {
        is_claimed(&self.pool, chain, tx_hash).await
    }

    async fn claim(&self, chain: Chain, tx_hash: &str) -> Result<bool> {
        claim(&self.pool, chain, tx_hash).await
    }

    async fn list_pending_refunds(&self) -> Result<Vec<PendingRefund>> {
        list_pending_refunds(&self.pool).await
    }

    async fn delete_refund(&self, id: i64) -> Result<bool> {
        delete_refund(&self.pool, id).await
    }

    async fn insert_refund(&self, refund: &NewRefund) -> Result<i64> {
        insert_refund(&self.pool, refund).await
    }

    async fn fail_with_refund(&self, id: Uuid, reason: &str, refund: &NewRefund) -> Result<bool> {
        fail_with_refund(&self.pool, id, reason, refund).await
    }
}
