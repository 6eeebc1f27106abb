use anyhow::{bail, Result};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{IntervalRead, MeterRead, StoredMeterRead};

/// Table names are interpolated into DDL/DML, so only plain identifiers are accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn checked(table: &str) -> Result<&str> {
    if !is_valid_table_name(table) {
        bail!("invalid table name '{table}'");
    }
    Ok(table)
}

/// Create the hourly read table if it does not exist yet.
pub async fn ensure_meter_table(pool: &PgPool, table: &str) -> Result<()> {
    let table = checked(table)?;
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id    BIGSERIAL PRIMARY KEY,
            date  TIMESTAMP NOT NULL,
            value NUMERIC(18, 6) NOT NULL
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Create the 15-minute interval table if it does not exist yet.
pub async fn ensure_interval_table(pool: &PgPool, table: &str) -> Result<()> {
    let table = checked(table)?;
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id             BIGSERIAL PRIMARY KEY,
            interval_start TIMESTAMP NOT NULL,
            value          NUMERIC(18, 6) NOT NULL
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Insert one hourly read unless a row for the same timestamp already exists.
///
/// Returns the number of rows written (0 or 1).
pub async fn insert_meter_read(pool: &PgPool, table: &str, read: &MeterRead) -> Result<u64> {
    let table = checked(table)?;
    let sql = format!(
        r#"
        INSERT INTO {table} (date, value)
        SELECT $1, $2
        WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE date = $1)
        "#
    );

    let res = sqlx::query(&sql)
        .bind(read.naive_date())
        .bind(&read.value)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}

/// Insert a day of interval reads, skipping interval starts already stored.
pub async fn insert_interval_reads(
    pool: &PgPool,
    table: &str,
    reads: &[IntervalRead],
) -> Result<u64> {
    if reads.is_empty() {
        return Ok(0);
    }
    let table = checked(table)?;

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {table} (interval_start, value) SELECT v.interval_start, v.value FROM ("
    ));
    builder.push_values(reads, |mut b, r| {
        b.push_bind(r.naive_start()).push_bind(&r.value);
    });
    builder.push(format!(
        ") AS v(interval_start, value) \
         WHERE NOT EXISTS (SELECT 1 FROM {table} t WHERE t.interval_start = v.interval_start)"
    ));

    let res = builder.build().execute(pool).await?;
    Ok(res.rows_affected())
}

/// Most recently stored hourly read, if any.
pub async fn latest_meter_read(pool: &PgPool, table: &str) -> Result<Option<StoredMeterRead>> {
    let table = checked(table)?;
    let sql = format!("SELECT id, date, value FROM {table} ORDER BY date DESC, id DESC LIMIT 1");

    let row = sqlx::query_as::<_, StoredMeterRead>(&sql)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}
