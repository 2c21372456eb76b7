//! Strongly-typed access to receipts/summaries/vouchers within
//! serializable transactions, grounded on the connection-pool and
//! query style of the project's receipt storage engine.

use anyhow::{Context, Result};
use num_bigint::BigUint;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};

use crate::types::{AllocationId, AllocationReceipt, AllocationSummary, ReceiptId, Signature, Voucher};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

fn amount_to_text(v: &BigUint) -> String {
    v.to_string()
}

fn text_to_amount(s: &str) -> Result<BigUint> {
    s.parse().with_context(|| format!("invalid decimal amount: {s}"))
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Wrap an already-connected pool, e.g. one seeded by a test harness.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction at `SERIALIZABLE` isolation, per the design's
    /// requirement that every multi-statement write be one serializable
    /// transaction — Postgres's server default is READ COMMITTED, so this
    /// must be requested explicitly on every transaction the store opens.
    async fn begin_serializable(&self) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .context("failed to set serializable isolation")?;
        Ok(tx)
    }

    /// Upsert an `AllocationSummary` (default zeroed fields) for every id, in one transaction.
    pub async fn ensure_summaries(&self, allocations: &[AllocationId]) -> Result<()> {
        let mut tx = self.begin_serializable().await?;
        for allocation in allocations {
            Self::ensure_summary_tx(&mut tx, *allocation).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_summary_tx(
        tx: &mut Transaction<'_, Postgres>,
        allocation: AllocationId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO allocation_summaries (allocation, closed_at, collected_fees, withdrawn_fees)
            VALUES ($1, NULL, '0', '0')
            ON CONFLICT (allocation) DO NOTHING
            "#,
        )
        .bind(allocation.to_string())
        .execute(&mut **tx)
        .await
        .context("failed to upsert allocation summary")?;
        Ok(())
    }

    /// Set `closed_at = now` on the summary, then load all receipts ordered by id ascending.
    pub async fn close_allocation_and_load_receipts(
        &self,
        allocation: AllocationId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<AllocationReceipt>> {
        let mut tx = self.begin_serializable().await?;
        Self::ensure_summary_tx(&mut tx, allocation).await?;

        sqlx::query(
            r#"UPDATE allocation_summaries SET closed_at = $1 WHERE allocation = $2"#,
        )
        .bind(now)
        .bind(allocation.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to set closed_at")?;

        let rows = sqlx::query(
            r#"
            SELECT id, fees, signature FROM allocation_receipts
            WHERE allocation = $1 ORDER BY id ASC
            "#,
        )
        .bind(allocation.to_string())
        .fetch_all(&mut *tx)
        .await
        .context("failed to load receipts for allocation")?;

        tx.commit().await?;

        rows.into_iter().map(|row| row_to_receipt(row, allocation)).collect()
    }

    /// Load all summaries with a non-null `closed_at`, used by recovery.
    pub async fn load_closed_summaries(&self) -> Result<Vec<AllocationSummary>> {
        let rows = sqlx::query(
            r#"SELECT allocation, closed_at, collected_fees, withdrawn_fees
               FROM allocation_summaries WHERE closed_at IS NOT NULL"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load closed summaries")?;
        rows.into_iter().map(row_to_summary).collect()
    }

    /// Load all receipts for the given allocations, ordered by id ascending.
    pub async fn load_receipts_for_allocations(
        &self,
        allocations: &[AllocationId],
    ) -> Result<Vec<AllocationReceipt>> {
        if allocations.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = allocations.iter().map(|a| a.to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, allocation, fees, signature FROM allocation_receipts
            WHERE allocation = ANY($1) ORDER BY id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to load receipts for allocations")?;

        rows.into_iter()
            .map(|row| {
                let allocation: String = row.get("allocation");
                let allocation: AllocationId = allocation.parse()?;
                row_to_receipt(row, allocation)
            })
            .collect()
    }

    /// Delete the given receipts, ensure the voucher's summary, add its fees to
    /// `collected_fees`, and upsert the voucher — all in one transaction.
    /// Returns the allocation's new, post-commit `collected_fees` total.
    pub async fn persist_exchange_result(
        &self,
        receipt_ids: &[ReceiptId],
        voucher: &Voucher,
    ) -> Result<BigUint> {
        let mut tx = self.begin_serializable().await?;

        for id in receipt_ids {
            sqlx::query(r#"DELETE FROM allocation_receipts WHERE id = $1"#)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .context("failed to delete receipt")?;
        }

        Self::ensure_summary_tx(&mut tx, voucher.allocation).await?;

        let collected_fees: String = sqlx::query_scalar(
            r#"UPDATE allocation_summaries
               SET collected_fees = (collected_fees::numeric + $1::numeric)::text
               WHERE allocation = $2
               RETURNING collected_fees"#,
        )
        .bind(amount_to_text(&voucher.amount))
        .bind(voucher.allocation.to_string())
        .fetch_one(&mut *tx)
        .await
        .context("failed to add collected fees")?;

        sqlx::query(
            r#"
            INSERT INTO vouchers (allocation, amount, signature)
            VALUES ($1, $2, $3)
            ON CONFLICT (allocation) DO UPDATE SET amount = EXCLUDED.amount, signature = EXCLUDED.signature
            "#,
        )
        .bind(voucher.allocation.to_string())
        .bind(amount_to_text(&voucher.amount))
        .bind(&voucher.signature)
        .execute(&mut *tx)
        .await
        .context("failed to upsert voucher")?;

        tx.commit().await?;
        text_to_amount(&collected_fees)
    }

    /// Load up to `limit` vouchers ordered by `amount` descending.
    pub async fn load_top_vouchers(&self, limit: i64) -> Result<Vec<Voucher>> {
        let rows = sqlx::query(
            r#"SELECT allocation, amount, signature FROM vouchers
               ORDER BY amount::numeric DESC LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load top vouchers")?;
        rows.into_iter().map(row_to_voucher).collect()
    }

    /// Delete a single stale voucher (already redeemed on-chain).
    pub async fn delete_voucher(&self, allocation: AllocationId) -> Result<()> {
        sqlx::query(r#"DELETE FROM vouchers WHERE allocation = $1"#)
            .bind(allocation.to_string())
            .execute(&self.pool)
            .await
            .context("failed to delete voucher")?;
        Ok(())
    }

    /// After a successful on-chain redemption: add each voucher's amount to
    /// `withdrawn_fees`, then delete the vouchers — all in one transaction.
    pub async fn record_redemption(&self, vouchers: &[Voucher]) -> Result<()> {
        let mut tx = self.begin_serializable().await?;
        for voucher in vouchers {
            Self::ensure_summary_tx(&mut tx, voucher.allocation).await?;
            sqlx::query(
                r#"UPDATE allocation_summaries
                   SET withdrawn_fees = (withdrawn_fees::numeric + $1::numeric)::text
                   WHERE allocation = $2"#,
            )
            .bind(amount_to_text(&voucher.amount))
            .bind(voucher.allocation.to_string())
            .execute(&mut *tx)
            .await
            .context("failed to add withdrawn fees")?;
        }
        for voucher in vouchers {
            sqlx::query(r#"DELETE FROM vouchers WHERE allocation = $1"#)
                .bind(voucher.allocation.to_string())
                .execute(&mut *tx)
                .await
                .context("failed to delete redeemed voucher")?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_receipt(row: sqlx::postgres::PgRow, allocation: AllocationId) -> Result<AllocationReceipt> {
    let id: String = row.get("id");
    let fees: String = row.get("fees");
    let signature: String = row.get("signature");
    Ok(AllocationReceipt {
        id: id.parse()?,
        allocation,
        fees: text_to_amount(&fees)?,
        signature: Signature::from_hex(&signature, 64)?,
    })
}

fn row_to_summary(row: sqlx::postgres::PgRow) -> Result<AllocationSummary> {
    let allocation: String = row.get("allocation");
    let closed_at: Option<chrono::DateTime<chrono::Utc>> = row.get("closed_at");
    let collected_fees: String = row.get("collected_fees");
    let withdrawn_fees: String = row.get("withdrawn_fees");
    Ok(AllocationSummary {
        allocation: allocation.parse()?,
        closed_at,
        collected_fees: text_to_amount(&collected_fees)?,
        withdrawn_fees: text_to_amount(&withdrawn_fees)?,
    })
}

fn row_to_voucher(row: sqlx::postgres::PgRow) -> Result<Voucher> {
    let allocation: String = row.get("allocation");
    let amount: String = row.get("amount");
    let signature: String = row.get("signature");
    Ok(Voucher { allocation: allocation.parse()?, amount: text_to_amount(&amount)?, signature })
}
