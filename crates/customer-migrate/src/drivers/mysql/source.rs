//! MySQL/MariaDB source reader.
//!
//! Read-only access through a SQLx pool: catalog introspection, routine
//! definitions, row counts and filtered batch reads.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Row, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dialect::{self, Page};
use super::SYSTEM_DATABASES;
use crate::config::ConnectionConfig;
use crate::core::{
    Batch, Column, ForeignKey, ReadOptions, RoutineDescriptor, RoutineKind, RowFilter,
    SchemaSnapshot, SourceReader, SqlValue, TableDescriptor,
};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Batches buffered between the reader task and the copier.
const READ_CHANNEL_CAPACITY: usize = 16;

fn ssl_mode(mode: &str) -> MySqlSslMode {
    match mode.to_lowercase().as_str() {
        "disable" => {
            warn!("MySQL source TLS is disabled. Credentials will be transmitted in plaintext.");
            MySqlSslMode::Disabled
        }
        "prefer" => MySqlSslMode::Preferred,
        "require" => MySqlSslMode::Required,
        "verify-ca" | "verify_ca" => MySqlSslMode::VerifyCa,
        "verify-full" | "verify_identity" => MySqlSslMode::VerifyIdentity,
        other => {
            warn!("Unknown ssl_mode '{}', defaulting to Preferred", other);
            MySqlSslMode::Preferred
        }
    }
}

/// MySQL/MariaDB source reader.
pub struct MysqlSource {
    pool: MySqlPool,
}

impl MysqlSource {
    /// Connect to the source server. No default database is selected.
    pub async fn connect(config: &ConnectionConfig, max_conns: u32) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4")
            .ssl_mode(ssl_mode(&config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1))
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                MigrateError::Connectivity(format!("source {}: {}", config.endpoint(), e))
            })?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                MigrateError::Connectivity(format!("source {}: {}", config.endpoint(), e))
            })?;

        info!("Connected to MySQL source: {}", config.endpoint());
        Ok(Self { pool })
    }

    async fn load_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        // CAST to CHAR: information_schema may return VARBINARY under some collations
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "listing MySQL tables"))?;

        Ok(rows
            .iter()
            .map(|row| TableDescriptor::new(database, row.get::<String, _>("TABLE_NAME")))
            .collect())
    }

    async fn load_columns(&self, database: &str) -> Result<HashMap<String, Vec<Column>>> {
        let query = r#"
            SELECT
                CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(64)) AS DATA_TYPE,
                CAST(COLUMN_TYPE AS CHAR(255)) AS COLUMN_TYPE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL columns"))?;

        let mut columns: HashMap<String, Vec<Column>> = HashMap::new();
        for row in rows {
            let table: String = row.get("TABLE_NAME");
            let column_type: String = row.get("COLUMN_TYPE");
            let mut col = Column::new(
                row.get::<String, _>("COLUMN_NAME"),
                row.get::<String, _>("DATA_TYPE"),
            );
            col.unsigned = column_type.to_lowercase().contains("unsigned");
            columns.entry(table).or_default().push(col);
        }
        Ok(columns)
    }

    async fn load_primary_keys(&self, database: &str) -> Result<HashMap<String, Vec<String>>> {
        let query = r#"
            SELECT
                CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL primary keys"))?;

        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            keys.entry(row.get("TABLE_NAME"))
                .or_default()
                .push(row.get("COLUMN_NAME"));
        }
        Ok(keys)
    }

    /// Single-column foreign keys into the same database.
    async fn load_foreign_keys(&self, database: &str) -> Result<HashMap<String, Vec<ForeignKey>>> {
        let query = r#"
            SELECT
                CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                CAST(CONSTRAINT_NAME AS CHAR(255)) AS CONSTRAINT_NAME,
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME,
                CAST(REFERENCED_COLUMN_NAME AS CHAR(255)) AS REFERENCED_COLUMN_NAME
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
              AND REFERENCED_TABLE_SCHEMA = TABLE_SCHEMA
            ORDER BY TABLE_NAME, CONSTRAINT_NAME, ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL foreign keys"))?;

        // (table, constraint) -> columns, in catalog order
        let mut constraints: Vec<((String, String), Vec<ForeignKey>)> = Vec::new();
        for row in rows {
            let key = (
                row.get::<String, _>("TABLE_NAME"),
                row.get::<String, _>("CONSTRAINT_NAME"),
            );
            let fk = ForeignKey::declared(
                row.get::<String, _>("COLUMN_NAME"),
                row.get::<String, _>("REFERENCED_TABLE_NAME"),
                row.get::<String, _>("REFERENCED_COLUMN_NAME"),
            );
            match constraints.last_mut() {
                Some((k, cols)) if *k == key => cols.push(fk),
                _ => constraints.push((key, vec![fk])),
            }
        }

        let mut fks: HashMap<String, Vec<ForeignKey>> = HashMap::new();
        for ((table, constraint), mut cols) in constraints {
            if cols.len() != 1 {
                debug!(
                    "{}.{}: ignoring composite foreign key {}",
                    database, table, constraint
                );
                continue;
            }
            fks.entry(table).or_default().extend(cols.pop());
        }
        Ok(fks)
    }

    /// Convert a MySQL row to owned values in column order.
    fn row_to_values(row: &MySqlRow, columns: &[Column]) -> Result<Vec<SqlValue>> {
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| Self::column_value(row, i, col))
            .collect()
    }

    fn column_value(row: &MySqlRow, i: usize, col: &Column) -> Result<SqlValue> {
        let is_null = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(true);
        if is_null {
            return Ok(SqlValue::Null);
        }

        let value = match col.data_type.as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                if col.unsigned {
                    SqlValue::U64(row.try_get::<u64, _>(i)?)
                } else {
                    SqlValue::I64(row.try_get::<i64, _>(i)?)
                }
            }
            "year" => match row.try_get::<u16, _>(i) {
                Ok(v) => SqlValue::I64(v as i64),
                Err(_) => SqlValue::I64(row.try_get::<i64, _>(i)?),
            },
            "float" => SqlValue::F32(row.try_get::<f32, _>(i)?),
            "double" | "real" => SqlValue::F64(row.try_get::<f64, _>(i)?),
            "decimal" | "numeric" => SqlValue::Decimal(row.try_get::<rust_decimal::Decimal, _>(i)?),
            "bool" | "boolean" => SqlValue::Bool(row.try_get::<bool, _>(i)?),
            "bit" => match row.try_get::<bool, _>(i) {
                Ok(b) => SqlValue::Bool(b),
                Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
            },
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob"
            | "geometry" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
            "date" => SqlValue::Date(row.try_get::<chrono::NaiveDate, _>(i)?),
            "time" => SqlValue::Time(row.try_get::<chrono::NaiveTime, _>(i)?),
            "datetime" | "timestamp" => {
                SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(i)?)
            }
            // char, varchar, text, enum, set, json and anything unrecognised
            _ => match row.try_get::<String, _>(i) {
                Ok(s) => SqlValue::Text(s),
                Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
            },
        };
        Ok(value)
    }

    async fn read_table_impl(
        pool: MySqlPool,
        opts: ReadOptions,
        tx: mpsc::Sender<Result<Batch>>,
    ) -> Result<()> {
        let table = &opts.table;
        let batch_size = opts.batch_size.max(1);
        let key_idx = table
            .keyset_column()
            .and_then(|pk| table.columns.iter().position(|c| c.name == pk.name));
        let mut page = Page::first(table);

        loop {
            let query = dialect::build_select(table, &opts.filter, &page, batch_size);
            let rows: Vec<MySqlRow> = sqlx::query(&query)
                .fetch_all(&pool)
                .await
                .map_err(|e| MigrateError::pool(e, "reading MySQL rows"))?;

            let batch_rows = rows
                .iter()
                .map(|row| Self::row_to_values(row, &table.columns))
                .collect::<Result<Vec<_>>>()?;

            let fetched = batch_rows.len();
            let last_key = key_idx.and_then(|idx| {
                batch_rows
                    .last()
                    .and_then(|row| row.get(idx))
                    .and_then(SqlValue::as_i64)
            });

            if last_key.is_none() && fetched > 0 && key_idx.is_some() {
                return Err(MigrateError::copy(
                    table.full_name(),
                    "primary key value out of keyset range",
                ));
            }

            page = match page {
                Page::Keyset { column, .. } => Page::Keyset {
                    column,
                    after: last_key,
                },
                Page::Offset { order_by, offset } => Page::Offset {
                    order_by,
                    offset: offset + fetched as u64,
                },
            };

            let is_last = fetched < batch_size;
            let mut batch = Batch::new(batch_rows);
            batch.last_key = last_key;
            batch.is_last = is_last;

            if tx.send(Ok(batch)).await.is_err() {
                break; // Receiver dropped
            }

            if is_last {
                break;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SourceReader for MysqlSource {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let query = r#"
            SELECT CAST(SCHEMA_NAME AS CHAR(255)) AS SCHEMA_NAME
            FROM INFORMATION_SCHEMA.SCHEMATA
            ORDER BY SCHEMA_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "listing MySQL databases"))?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("SCHEMA_NAME"))
            .filter(|name| {
                !SYSTEM_DATABASES
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(name))
            })
            .collect())
    }

    async fn introspect(&self, database: &str) -> Result<SchemaSnapshot> {
        let mut tables = self.load_tables(database).await?;
        let mut columns = self.load_columns(database).await?;
        let mut primary_keys = self.load_primary_keys(database).await?;
        let mut foreign_keys = self.load_foreign_keys(database).await?;

        for table in &mut tables {
            table.columns = columns.remove(&table.name).unwrap_or_default();
            table.primary_key = primary_keys.remove(&table.name).unwrap_or_default();
            table.foreign_keys = foreign_keys.remove(&table.name).unwrap_or_default();
        }

        info!(
            "Extracted {} tables from MySQL database '{}'",
            tables.len(),
            database
        );
        Ok(SchemaSnapshot::new(database, tables))
    }

    async fn list_routines(&self, database: &str) -> Result<Vec<RoutineDescriptor>> {
        let query = r#"
            SELECT
                CAST(ROUTINE_NAME AS CHAR(255)) AS ROUTINE_NAME,
                CAST(ROUTINE_TYPE AS CHAR(16)) AS ROUTINE_TYPE
            FROM INFORMATION_SCHEMA.ROUTINES
            WHERE ROUTINE_SCHEMA = ?
            ORDER BY ROUTINE_TYPE, ROUTINE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "listing MySQL routines"))?;

        rows.iter()
            .map(|row| {
                let kind: RoutineKind = row.get::<String, _>("ROUTINE_TYPE").parse()?;
                Ok(RoutineDescriptor::new(row.get::<String, _>("ROUTINE_NAME"), kind))
            })
            .collect()
    }

    async fn routine_definition(
        &self,
        database: &str,
        routine: &RoutineDescriptor,
    ) -> Result<String> {
        let query = format!(
            "SHOW CREATE {} {}",
            routine.kind.as_str(),
            dialect::qualify(database, &routine.name)
        );
        let column = match routine.kind {
            RoutineKind::Procedure => "Create Procedure",
            RoutineKind::Function => "Create Function",
        };

        let row: MySqlRow = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "reading MySQL routine definition"))?;

        // NULL when the account lacks privileges on the routine
        let definition = match row.try_get::<Option<String>, _>(column) {
            Ok(v) => v,
            Err(_) => row
                .try_get::<Option<Vec<u8>>, _>(column)?
                .map(|b| String::from_utf8_lossy(&b).into_owned()),
        };
        Ok(definition.unwrap_or_default())
    }

    async fn count_rows(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<i64> {
        if filter.is_empty_selection() {
            return Ok(0);
        }
        let query = dialect::build_count(table, filter);

        let row: MySqlRow = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "getting row count"))?;

        Ok(row.get::<i64, _>("cnt"))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let result = Self::read_table_impl(pool, opts, tx.clone()).await;
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
