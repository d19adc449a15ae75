//! MySQL/MariaDB destination writer.
//!
//! Every write goes through one dedicated session so `FOREIGN_KEY_CHECKS`
//! applies to all of it. Rows are written with multi-row `INSERT IGNORE`.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dialect::{self, quote_ident};
use crate::config::ConnectionConfig;
use crate::core::{Batch, RoutineDescriptor, SqlValue, TargetWriter};
use crate::error::{MigrateError, Result};

/// MySQL max placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

fn ssl_opts(mode: &str) -> Option<SslOpts> {
    match mode.to_lowercase().as_str() {
        "disable" => {
            warn!("MySQL target TLS is disabled. Credentials will be transmitted in plaintext.");
            None
        }
        "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => Some(SslOpts::default()),
        other => {
            warn!("Unknown ssl_mode '{}', defaulting to Preferred", other);
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
    }
}

/// MySQL/MariaDB destination writer.
pub struct MysqlTarget {
    pool: Pool,
    session: Mutex<Option<Conn>>,
}

impl MysqlTarget {
    /// Connect to the destination server and open the write session.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts(&config.ssl_mode) {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, 2).ok_or_else(|| {
            MigrateError::Config("invalid destination pool constraints".into())
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool.get_conn().await.map_err(|e| {
            MigrateError::Connectivity(format!("target {}: {}", config.endpoint(), e))
        })?;
        conn.query_drop("SELECT 1").await.map_err(|e| {
            MigrateError::Connectivity(format!("target {}: {}", config.endpoint(), e))
        })?;

        info!("Connected to MySQL target: {}", config.endpoint());

        Ok(Self {
            pool,
            session: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` on the write session.
    async fn with_session<T, F>(&self, context: &str, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(
            &'c mut Conn,
        ) -> futures::future::BoxFuture<'c, std::result::Result<T, mysql_async::Error>>,
    {
        let mut guard = self.session.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| MigrateError::pool("write session is closed", context))?;
        f(conn).await.map_err(|e| MigrateError::pool(e, context))
    }
}

#[async_trait]
impl TargetWriter for MysqlTarget {
    async fn table_columns(&self, database: &str, table: &str) -> Result<Option<Vec<String>>> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR(255))
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;
        let params = (database.to_string(), table.to_string());

        let columns: Vec<String> = self
            .with_session("loading destination columns", |conn| {
                Box::pin(async move { conn.exec(query, params).await })
            })
            .await?;

        Ok(if columns.is_empty() { None } else { Some(columns) })
    }

    async fn set_foreign_key_checks(&self, enabled: bool) -> Result<()> {
        let sql = format!("SET FOREIGN_KEY_CHECKS = {}", if enabled { 1 } else { 0 });
        self.with_session("setting FOREIGN_KEY_CHECKS", |conn| {
            Box::pin(async move { conn.query_drop(sql).await })
        })
        .await
    }

    async fn insert_ignore(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        batch: Batch,
    ) -> Result<u64> {
        let rows = batch.rows;
        let num_cols = columns.len();
        if rows.is_empty() || num_cols == 0 {
            return Ok(0);
        }
        let max_rows_per_stmt = (MYSQL_MAX_PLACEHOLDERS / num_cols).max(1);
        let full_name = format!("{}.{}", database, table);

        let mut inserted = 0u64;
        for chunk in rows.chunks(max_rows_per_stmt) {
            let sql = dialect::build_insert_ignore(database, table, columns, chunk.len());
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_mysql))
                .collect();

            inserted += self
                .with_session("INSERT IGNORE batch", |conn| {
                    Box::pin(async move {
                        conn.exec_drop(sql, params).await?;
                        Ok(conn.affected_rows())
                    })
                })
                .await
                .map_err(|e| MigrateError::copy(&full_name, e.to_string()))?;
        }

        debug!(
            "MySQL: {} of {} rows inserted into {}",
            inserted,
            rows.len(),
            full_name
        );
        Ok(inserted)
    }

    async fn replace_routine(
        &self,
        database: &str,
        routine: &RoutineDescriptor,
        create_statement: &str,
    ) -> Result<()> {
        let use_db = format!("USE {}", quote_ident(database));
        let drop_stmt = format!(
            "DROP {} IF EXISTS {}",
            routine.kind.as_str(),
            quote_ident(&routine.name)
        );
        let create = create_statement.to_string();

        self.with_session("replacing routine", |conn| {
            Box::pin(async move {
                conn.query_drop(use_db).await?;
                conn.query_drop(drop_stmt).await?;
                conn.query_drop(create).await
            })
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_session("testing MySQL target connection", |conn| {
            Box::pin(async move { conn.query_drop("SELECT 1").await })
        })
        .await
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        if let Some(conn) = self.session.lock().await.take() {
            drop(conn);
        }
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("error closing MySQL target pool: {}", e);
        }
    }
}

fn date_value(d: &NaiveDate, t: &NaiveTime) -> mysql_async::Value {
    mysql_async::Value::Date(
        d.year() as u16,
        d.month() as u8,
        d.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
        (t.nanosecond() / 1_000).min(999_999),
    )
}

/// Convert an owned value to a mysql_async parameter.
fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Bool(b) => mysql_async::Value::from(*b),
        SqlValue::I64(i) => mysql_async::Value::from(*i),
        SqlValue::U64(u) => mysql_async::Value::from(*u),
        SqlValue::F32(f) => mysql_async::Value::from(*f),
        SqlValue::F64(f) => mysql_async::Value::from(*f),
        SqlValue::Decimal(d) => mysql_async::Value::from(d.to_string()),
        SqlValue::Text(s) => mysql_async::Value::from(s.as_str()),
        SqlValue::Bytes(b) => mysql_async::Value::from(b.as_slice()),
        SqlValue::Date(d) => date_value(d, &NaiveTime::MIN),
        SqlValue::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            (t.nanosecond() / 1_000).min(999_999),
        ),
        SqlValue::DateTime(dt) => date_value(&dt.date(), &dt.time()),
    }
}
