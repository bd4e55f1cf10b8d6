use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{ChainRecordStore, MetricSampleStore, StoreError, UpsertCounts};
use crate::config::DatabaseConfig;
use crate::reconcile::{CandidateKeys, Change, ReconcileOutcome, Reconciler};
use crate::types::{ChainDescriptor, ChainRecord, MetricKind, MetricSample};

/// Advisory lock serializing reconcile transactions across processes.
const RECONCILE_LOCK_KEY: i64 = 0x4348_4149_4e53;

pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connection_timeout)
        .connect(url)
        .await?;
    info!("Connected to Postgres (max {} connections)", config.max_connections);
    Ok(pool)
}

fn decode_record(row: &PgRow) -> Result<ChainRecord, StoreError> {
    let key: String = row.try_get("storage_key")?;
    let value: serde_json::Value = row.try_get("record")?;
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        key,
        reason: e.to_string(),
    })
}

pub struct PgChainRepository {
    pool: PgPool,
}

impl PgChainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainRecordStore for PgChainRepository {
    async fn list(&self) -> Result<Vec<ChainRecord>, StoreError> {
        let rows = sqlx::query("SELECT storage_key, record FROM chain_records ORDER BY storage_key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_record).collect()
    }

    async fn get(&self, storage_key: &str) -> Result<Option<ChainRecord>, StoreError> {
        let row = sqlx::query("SELECT storage_key, record FROM chain_records WHERE storage_key = $1")
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn reconcile(&self, incoming: &ChainDescriptor, reconciler: &Reconciler) -> Result<ReconcileOutcome, StoreError> {
        let keys = CandidateKeys::for_descriptor(incoming);
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(RECONCILE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT storage_key, record FROM chain_records
            WHERE storage_key = $1 OR legacy_numeric_id = $2 OR ledger_id = $3 OR platform_id = $4
            "#,
        )
        .bind(&keys.storage_key)
        .bind(&keys.legacy_numeric_id)
        .bind(&keys.ledger_id)
        .bind(&keys.platform_id)
        .fetch_all(&mut *tx)
        .await?;
        let candidates = rows.iter().map(decode_record).collect::<Result<Vec<_>, _>>()?;

        let plan = reconciler.plan(&candidates, incoming, Utc::now())?;
        let record = &plan.record;
        let payload = serde_json::to_value(record)?;

        match (plan.change, &plan.previous_key) {
            (Change::Unchanged, _) => {}
            (_, None) => {
                sqlx::query(
                    r#"
                    INSERT INTO chain_records
                        (storage_key, legacy_numeric_id, ledger_id, platform_id, source_tag, last_synced_at, record)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(record.storage_key())
                .bind(&record.ids.legacy_numeric_id)
                .bind(&record.ids.ledger_id)
                .bind(&record.ids.platform_id)
                .bind(record.provenance.source_tag.as_str())
                .bind(record.provenance.last_synced_at)
                .bind(payload)
                .execute(&mut *tx)
                .await?;
            }
            (_, Some(previous)) => {
                if *previous != record.storage_key() {
                    debug!("Re-keying record {} -> {}", previous, record.storage_key());
                }
                sqlx::query(
                    r#"
                    UPDATE chain_records SET
                        storage_key = $1, legacy_numeric_id = $2, ledger_id = $3, platform_id = $4,
                        source_tag = $5, last_synced_at = $6, record = $7
                    WHERE storage_key = $8
                    "#,
                )
                .bind(record.storage_key())
                .bind(&record.ids.legacy_numeric_id)
                .bind(&record.ids.ledger_id)
                .bind(&record.ids.platform_id)
                .bind(record.provenance.source_tag.as_str())
                .bind(record.provenance.last_synced_at)
                .bind(payload)
                .bind(previous)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(plan.outcome())
    }

    async fn delete(&self, storage_keys: &[String]) -> Result<u64, StoreError> {
        if storage_keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM chain_records WHERE storage_key = ANY($1)")
            .bind(storage_keys.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgSampleRepository {
    pool: PgPool,
}

impl PgSampleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricSampleStore for PgSampleRepository {
    async fn upsert_samples(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        samples: &[(i64, f64)],
    ) -> Result<UpsertCounts, StoreError> {
        let table = metric.table_name();
        let sql = format!(
            r#"
            INSERT INTO {table} (chain_identifier, timestamp, value, last_updated)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (chain_identifier, timestamp) DO UPDATE
                SET value = EXCLUDED.value, last_updated = NOW()
                WHERE {table}.value IS DISTINCT FROM EXCLUDED.value
            RETURNING (xmax = 0) AS inserted
            "#
        );

        let mut counts = UpsertCounts::default();
        let mut tx = self.pool.begin().await?;
        for &(timestamp, value) in samples {
            let row = sqlx::query(&sql)
                .bind(chain_identifier)
                .bind(timestamp)
                .bind(value)
                .fetch_optional(&mut *tx)
                .await?;
            match row {
                None => counts.unchanged += 1,
                Some(row) => {
                    if row.try_get::<bool, _>("inserted")? {
                        counts.inserted += 1;
                    } else {
                        counts.updated += 1;
                    }
                }
            }
        }
        tx.commit().await?;
        Ok(counts)
    }

    async fn range(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let sql = format!(
            r#"
            SELECT chain_identifier, timestamp, value, last_updated FROM {}
            WHERE chain_identifier = $1 AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            "#,
            metric.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(chain_identifier)
            .bind(from.unwrap_or(i64::MIN))
            .bind(to.unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<MetricSample, StoreError> {
                Ok(MetricSample {
                    chain_identifier: row.try_get("chain_identifier")?,
                    timestamp: row.try_get("timestamp")?,
                    value: row.try_get("value")?,
                    last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
                })
            })
            .collect()
    }

    async fn rekey(&self, metric: MetricKind, from: &str, to: &str) -> Result<u64, StoreError> {
        let table = metric.table_name();
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (chain_identifier, timestamp, value, last_updated)
            SELECT $2, timestamp, value, last_updated FROM {table} WHERE chain_identifier = $1
            ON CONFLICT (chain_identifier, timestamp) DO NOTHING
            "#
        ))
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(&format!("DELETE FROM {table} WHERE chain_identifier = $1"))
            .bind(from)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(moved)
    }
}
