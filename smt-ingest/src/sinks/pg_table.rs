use std::marker::PhantomData;

use smt_client::{
    db,
    domain::{IntervalRead, MeterRead},
};
use sqlx::postgres::PgPool;
use tokio::sync::OnceCell;

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Row shape of a reading table.
#[async_trait::async_trait]
pub trait TableRecord: Send + Sync + Sized + 'static {
    async fn ensure_table(pool: &PgPool, table: &str) -> anyhow::Result<()>;

    /// Returns the number of rows written; rows for already stored timestamps are skipped.
    async fn insert(pool: &PgPool, table: &str, batch: &[Envelope<Self>]) -> anyhow::Result<u64>;
}

#[async_trait::async_trait]
impl TableRecord for MeterRead {
    async fn ensure_table(pool: &PgPool, table: &str) -> anyhow::Result<()> {
        db::ensure_meter_table(pool, table).await
    }

    async fn insert(pool: &PgPool, table: &str, batch: &[Envelope<Self>]) -> anyhow::Result<u64> {
        let mut written = 0;
        for env in batch {
            written += db::insert_meter_read(pool, table, &env.payload).await?;
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl TableRecord for IntervalRead {
    async fn ensure_table(pool: &PgPool, table: &str) -> anyhow::Result<()> {
        db::ensure_interval_table(pool, table).await
    }

    async fn insert(pool: &PgPool, table: &str, batch: &[Envelope<Self>]) -> anyhow::Result<u64> {
        let reads: Vec<IntervalRead> = batch.iter().map(|e| e.payload.clone()).collect();
        db::insert_interval_reads(pool, table, &reads).await
    }
}

/// Writes readings into a PostgreSQL table, creating it on first use.
pub struct PgTableSink<T> {
    pool: PgPool,
    table: String,
    name: String,
    ensured: OnceCell<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TableRecord> PgTableSink<T> {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            pool,
            name: format!("postgres:{table}"),
            table,
            ensured: OnceCell::new(),
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Idempotent `CREATE TABLE IF NOT EXISTS`; after one success it is not re-issued.
    pub async fn ensure_table(&self) -> Result<(), PipelineError> {
        self.ensured
            .get_or_try_init(|| async {
                T::ensure_table(&self.pool, &self.table).await.map_err(|e| {
                    PipelineError::Sink(format!("cannot create table {}: {e}", self.table))
                })?;
                tracing::info!(table = %self.table, "table ready");
                Ok::<(), PipelineError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: TableRecord> Sink<T> for PgTableSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, batch: &[Envelope<T>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_table().await?;

        let written = T::insert(&self.pool, &self.table, batch)
            .await
            .map_err(|e| PipelineError::Sink(format!("insert into {} failed: {e}", self.table)))?;

        let skipped = batch.len() as u64 - written.min(batch.len() as u64);
        tracing::info!(table = %self.table, written, skipped, "readings saved to database");
        Ok(())
    }
}
