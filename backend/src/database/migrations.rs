use sqlx::{PgPool, Row};
use tracing::{error, info};

use super::StoreError;
use crate::types::MetricKind;

pub struct Migration {
    pub name: String,
    pub statements: Vec<String>,
}

/// Schema history, applied in order. Each statement is idempotent.
pub fn schema_migrations() -> Vec<Migration> {
    let mut metric_tables = Vec::new();
    for metric in MetricKind::ALL {
        let table = metric.table_name();
        metric_tables.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                chain_identifier TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_identifier, timestamp)
            )
            "#
        ));
    }

    vec![
        Migration {
            name: "001_chain_records".to_string(),
            statements: vec![
                r#"
                CREATE TABLE IF NOT EXISTS chain_records (
                    storage_key TEXT PRIMARY KEY,
                    legacy_numeric_id TEXT,
                    ledger_id TEXT,
                    platform_id TEXT,
                    source_tag TEXT NOT NULL,
                    last_synced_at TIMESTAMPTZ NOT NULL,
                    record JSONB NOT NULL
                )
                "#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_chain_records_legacy ON chain_records (legacy_numeric_id)".to_string(),
                "CREATE INDEX IF NOT EXISTS idx_chain_records_ledger ON chain_records (ledger_id)".to_string(),
                "CREATE INDEX IF NOT EXISTS idx_chain_records_platform ON chain_records (platform_id)".to_string(),
            ],
        },
        Migration {
            name: "002_metric_series".to_string(),
            statements: metric_tables,
        },
    ]
}

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Starting database migrations");
        self.create_migrations_table().await?;

        for migration in schema_migrations() {
            if self.is_migration_applied(&migration.name).await? {
                info!("Migration {} already applied, skipping", migration.name);
                continue;
            }
            info!("Applying migration: {}", migration.name);
            self.apply_migration(&migration).await?;
        }

        info!("All migrations completed successfully");
        Ok(())
    }

    async fn create_migrations_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_migration_applied(&self, name: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM migrations WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in &migration.statements {
            if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
                error!("Migration {} failed: {}", migration.name, e);
                return Err(e.into());
            }
        }
        sqlx::query("INSERT INTO migrations (name) VALUES ($1)")
            .bind(&migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Successfully applied migration: {}", migration.name);
        Ok(())
    }
}
