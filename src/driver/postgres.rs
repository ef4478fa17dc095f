//! PostgreSQL driver over a `deadpool-postgres` pool.
//!
//! Transactions are opened with an explicit `BEGIN` on a pooled client that the transaction
//! keeps until it finishes; a client dropped mid-transaction is rolled back before it returns to
//! the pool.
use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use deadpool_postgres::{Manager, Object, Pool};
use serde_json::Value;
use tokio_postgres::NoTls;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use super::{ColumnType, Cursor, Driver, DriverTx, ExecSummary, ResultSet};
use crate::config::{PoolLimits, TxOptions};
use crate::error::SqlDaoError;
use crate::types::RowValues;

pub struct PostgresDriver {
    pool: Pool,
    max_lifetime: Option<Duration>,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl PostgresDriver {
    /// Build a pool from a connection string such as
    /// `host=localhost user=app dbname=app` or `postgres://app@localhost/app`.
    ///
    /// Connections are opened lazily; the data source pings once after building.
    ///
    /// `max_open` sizes the pool and a client older than `max_lifetime` is closed at checkout
    /// instead of being reused. deadpool keeps every returned client, so `max_idle` is not
    /// applied.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` for an unparsable DSN and
    /// `SqlDaoError::ConnectionError` when the pool cannot be built.
    pub fn open(dsn: &str, limits: PoolLimits) -> Result<Self, SqlDaoError> {
        let config: tokio_postgres::Config = dsn
            .parse()
            .map_err(|e| SqlDaoError::ConfigError(format!("invalid postgres dsn: {e}")))?;
        let manager = Manager::new(config, NoTls);
        let max_size = usize::try_from(limits.max_open).unwrap_or(usize::MAX).max(1);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| SqlDaoError::ConnectionError(format!("postgres pool: {e}")))?;
        tracing::debug!(
            max_size,
            max_lifetime_secs = limits.max_lifetime.as_secs(),
            "postgres pool ready"
        );
        Ok(Self {
            pool,
            max_lifetime: Some(limits.max_lifetime).filter(|d| !d.is_zero()),
        })
    }

    async fn client(&self) -> Result<Object, SqlDaoError> {
        loop {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| SqlDaoError::ConnectionError(format!("postgres checkout: {e}")))?;
            let age = Object::metrics(&client).age();
            if !outlived(age, self.max_lifetime) {
                return Ok(client);
            }
            tracing::debug!(age_secs = age.as_secs(), "closing postgres client past its lifetime");
            // detached from the pool, so the slot is freed and the next get connects afresh
            drop(Object::take(client));
        }
    }
}

fn outlived(age: Duration, max_lifetime: Option<Duration>) -> bool {
    max_lifetime.is_some_and(|limit| age >= limit)
}

/// Binds a [`RowValues`] to whatever type the server inferred for the parameter.
#[derive(Debug)]
struct PgValue<'a>(&'a RowValues);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.0 {
            RowValues::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                #[allow(clippy::cast_precision_loss)]
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                #[allow(clippy::cast_precision_loss)]
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            RowValues::Float(f) => match *ty {
                #[allow(clippy::cast_possible_truncation)]
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            RowValues::Text(s) => s.to_sql(ty, out),
            RowValues::Bool(b) => b.to_sql(ty, out),
            RowValues::Timestamp(dt) => match *ty {
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(dt).to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => jsval.to_sql(ty, out),
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `SqlDaoError::PostgresError` if the column cannot be read; `numeric` columns must be
/// cast to text or float in SQL.
pub fn postgres_extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<RowValues, SqlDaoError> {
    let type_info = row.columns()[idx].type_();
    Ok(match type_info.name() {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Int)
        }
        "float4" => {
            let val: Option<f32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v)))
        }
        "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Float)
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Bool)
        }
        "timestamp" => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Timestamp)
        }
        "timestamptz" => {
            let val: Option<DateTime<Utc>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc()))
        }
        "date" => {
            let val: Option<NaiveDate> = row.try_get(idx)?;
            val.and_then(|d| d.and_hms_opt(0, 0, 0))
                .map_or(RowValues::Null, RowValues::Timestamp)
        }
        "json" | "jsonb" => {
            let val: Option<Value> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::JSON)
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Blob)
        }
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Text)
        }
    })
}

async fn exec_on(
    client: &Object,
    sql: &str,
    args: &[RowValues],
) -> Result<ExecSummary, SqlDaoError> {
    let values: Vec<PgValue<'_>> = args.iter().map(PgValue).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
    let rows_affected = client.execute(sql, &refs).await?;
    Ok(ExecSummary {
        rows_affected: Some(rows_affected),
        last_insert_id: None,
        returned_id: None,
    })
}

async fn query_on(
    client: &Object,
    sql: &str,
    args: &[RowValues],
) -> Result<Box<dyn Cursor>, SqlDaoError> {
    let values: Vec<PgValue<'_>> = args.iter().map(PgValue).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
    let stmt = client.prepare(sql).await?;
    let rows = client.query(&stmt, &refs).await?;

    let columns: Vec<ColumnType> = stmt
        .columns()
        .iter()
        .map(|col| ColumnType::new(col.name(), col.type_().name()))
        .collect();
    let width = columns.len();
    let mut result_set = ResultSet::with_capacity(columns, rows.len());
    for row in &rows {
        let mut row_values = Vec::with_capacity(width);
        for idx in 0..width {
            row_values.push(postgres_extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(Box::new(result_set.into_cursor()))
}

fn begin_sql(options: Option<&TxOptions>) -> String {
    let mut sql = String::from("BEGIN");
    if let Some(options) = options {
        if let Some(level) = options.isolation.as_sql() {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level);
        }
        if options.read_only {
            sql.push_str(" READ ONLY");
        }
    }
    sql
}

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), SqlDaoError> {
        self.client().await?.batch_execute("SELECT 1").await?;
        Ok(())
    }

    async fn begin(&self, options: Option<&TxOptions>) -> Result<Box<dyn DriverTx>, SqlDaoError> {
        let client = self.client().await?;
        client.batch_execute(&begin_sql(options)).await?;
        Ok(Box::new(PgTx {
            client: Some(client),
        }))
    }

    async fn exec(&self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        let client = self.client().await?;
        exec_on(&client, sql, args).await
    }

    async fn query(&self, sql: &str, args: &[RowValues]) -> Result<Box<dyn Cursor>, SqlDaoError> {
        let client = self.client().await?;
        query_on(&client, sql, args).await
    }

    async fn close(&self) -> Result<(), SqlDaoError> {
        self.pool.close();
        Ok(())
    }
}

/// Open PostgreSQL transaction; `client` is `None` once it has been finished.
struct PgTx {
    client: Option<Object>,
}

impl PgTx {
    fn client(&self) -> Result<&Object, SqlDaoError> {
        self.client
            .as_ref()
            .ok_or_else(|| SqlDaoError::InvalidUsage("postgres transaction already finished".into()))
    }

    async fn finish(mut self: Box<Self>, sql: &str) -> Result<(), SqlDaoError> {
        self.client()?.batch_execute(sql).await?;
        self.client.take();
        Ok(())
    }
}

#[async_trait]
impl DriverTx for PgTx {
    async fn exec(&mut self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        exec_on(self.client()?, sql, args).await
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Box<dyn Cursor>, SqlDaoError> {
        query_on(self.client()?, sql, args).await
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!(error = %e, "rollback of dropped postgres transaction failed");
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => {
                tracing::warn!("postgres transaction dropped outside a runtime; discarding its connection");
                drop(Object::take(client));
            }
        }
    }
}
