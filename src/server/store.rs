//! Persistent storage for licences and live connections.
//!
//! The store exclusively owns the SQLite database file (`Data.db3`); every
//! other component goes through its typed queries. One long-lived pool is
//! held for the life of the process, with foreign keys enabled so deleting
//! a licence cascades into its connections.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, query_scalar, FromRow, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::errors::{LicenceError, LicenceResult};
use crate::events::{EventId, EventReporter};
use crate::licence::Licence;

/// Schema version recorded in the site log.
pub const SCHEMA_VERSION: i64 = 1;

/// Release date of the current schema version.
pub const SCHEMA_RELEASE_DATE: &str = "17/Jun/2024 10:30";

/// Database file name inside the data folder.
pub const DATABASE_FILE_NAME: &str = "Data.db3";

const LICENCE_SCHEMA: &str = "\
    CREATE TABLE licence(\
        id INTEGER PRIMARY KEY, \
        company VARCHAR(32) NOT NULL, \
        product VARCHAR(32) NOT NULL, \
        customer VARCHAR(128) NOT NULL, \
        reference VARCHAR(32) NULL, \
        reseller VARCHAR(128) NULL, \
        seats INTEGER NOT NULL, \
        start_date DATETIME, \
        expiry_date DATETIME, \
        timestamp INTEGER NOT NULL, \
        code VARCHAR(256) NOT NULL, \
        version INTEGER NOT NULL, \
        notes TEXT); \
    CREATE UNIQUE INDEX idx_licence_timestamp ON licence(timestamp); \
    CREATE INDEX idx_licence_product_timestamp ON licence(product COLLATE NOCASE, timestamp DESC); \
    CREATE INDEX idx_licence_expiry_date ON licence(expiry_date); \
    CREATE INDEX idx_licence_start_date ON licence(start_date);";

const CONNECTION_SCHEMA: &str = "\
    CREATE TABLE connection(\
        id INTEGER PRIMARY KEY, \
        ip VARCHAR(64) NOT NULL, \
        host VARCHAR(32) NOT NULL, \
        user VARCHAR(128) NOT NULL, \
        logon_time DATETIME NOT NULL, \
        update_time DATETIME NOT NULL, \
        product VARCHAR(32) NOT NULL, \
        licence_id INTEGER NULL, \
        FOREIGN KEY(licence_id) REFERENCES licence(id) ON DELETE CASCADE); \
    CREATE UNIQUE INDEX idx_connection_product_user_ip \
        ON connection(product COLLATE NOCASE, user, ip); \
    CREATE INDEX idx_connection_product_update_time \
        ON connection(product COLLATE NOCASE, update_time); \
    CREATE INDEX idx_connection_licence_id_update_time \
        ON connection(licence_id, update_time);";

const SITE_LOG_SCHEMA: &str = "\
    CREATE TABLE site_log(\
        id INTEGER PRIMARY KEY, \
        install_date DATETIME NOT NULL, \
        version INTEGER NOT NULL, \
        notes TEXT NOT NULL, \
        release_date DATETIME NOT NULL);";

/// A licence row as stored.
#[derive(Debug, Clone, FromRow)]
pub struct LicenceRow {
    pub id: i64,
    pub company: String,
    pub product: String,
    pub customer: String,
    pub reference: Option<String>,
    pub reseller: Option<String>,
    pub seats: i64,
    pub start_date: Option<String>,
    pub expiry_date: Option<String>,
    pub timestamp: i64,
    pub code: String,
    pub version: i64,
    pub notes: Option<String>,
}

impl From<&LicenceRow> for Licence {
    fn from(row: &LicenceRow) -> Self {
        Licence {
            company: row.company.clone(),
            product: row.product.clone(),
            customer: row.customer.clone(),
            reference: row.reference.clone(),
            reseller: row.reseller.clone(),
            seats: row.seats,
            start_date: row.start_date.clone(),
            expiry_date: row.expiry_date.clone(),
            timestamp: row.timestamp,
            code: row.code.clone(),
            notes: row.notes.clone(),
        }
    }
}

/// A live connection projected for clients.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConnectionRow {
    pub user: String,
    pub host: String,
    pub ip: String,
    pub logon_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

/// Handle to the licence database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    reporter: Arc<dyn EventReporter>,
}

impl Store {
    /// Open (creating if missing) the database file.
    pub async fn open(data_file: &Path, reporter: Arc<dyn EventReporter>) -> LicenceResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(data_file)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("failed to open database '{}': {e}", data_file.display());
                LicenceError::StorageError(format!("failed to open database: {e}"))
            })?;
        Ok(Self { pool, reporter })
    }

    /// Open an in-memory database, mainly for tests.
    pub async fn open_in_memory(reporter: Arc<dyn EventReporter>) -> LicenceResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("failed to open in-memory database: {e}");
                LicenceError::StorageError(format!("failed to open database: {e}"))
            })?;
        Ok(Self { pool, reporter })
    }

    /// Create the schema if it does not exist.
    ///
    /// Each `CREATE` batch swallows "already exists"; on first creation the
    /// site log receives its install row.
    pub async fn create_schema(&self) -> LicenceResult<()> {
        self.create_if_absent("licence", LICENCE_SCHEMA).await?;
        self.create_if_absent("connection", CONNECTION_SCHEMA)
            .await?;
        if self.create_if_absent("site_log", SITE_LOG_SCHEMA).await? {
            let release_date = NaiveDateTime::parse_from_str(SCHEMA_RELEASE_DATE, "%d/%b/%Y %H:%M")
                .map_err(|e| {
                    LicenceError::StorageError(format!("bad schema release date: {e}"))
                })?;
            query(
                "INSERT INTO site_log (install_date, version, notes, release_date) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(Local::now().naive_local())
            .bind(SCHEMA_VERSION)
            .bind(format!("Version {SCHEMA_VERSION} installed"))
            .bind(release_date)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("site_log install row failed: {e}");
                LicenceError::StorageError(format!("database error: {e}"))
            })?;
            self.reporter.report(
                EventId::DatabaseSchemaCreated,
                &format!("schema version {SCHEMA_VERSION}"),
            );
            info!("created database schema");
        }
        Ok(())
    }

    /// Run a DDL batch, returning whether it actually created anything.
    async fn create_if_absent(&self, table: &str, schema: &str) -> LicenceResult<bool> {
        match sqlx::raw_sql(schema).execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("already exists") => {
                debug!("table '{table}' already exists");
                Ok(false)
            }
            Err(e) => {
                error!("schema creation for '{table}' failed: {e}");
                Err(LicenceError::StorageError(format!("database error: {e}")))
            }
        }
    }

    /// All licence rows for a product, newest `TimeStamp` first.
    pub async fn licences_for_product(&self, product: &str) -> LicenceResult<Vec<LicenceRow>> {
        query_as::<_, LicenceRow>(
            "SELECT id, company, product, customer, reference, reseller, seats, \
                    start_date, expiry_date, timestamp, code, version, notes \
             FROM licence \
             WHERE product = ? COLLATE NOCASE \
             ORDER BY timestamp DESC",
        )
        .bind(product.to_lowercase())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("licences_for_product failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })
    }

    /// Live connections for a product: rows newer than `since`.
    pub async fn live_connections(
        &self,
        product: &str,
        since: NaiveDateTime,
    ) -> LicenceResult<Vec<ConnectionRow>> {
        query_as::<_, ConnectionRow>(
            "SELECT user, host, ip, logon_time, update_time \
             FROM connection \
             WHERE product = ? COLLATE NOCASE AND update_time > ?",
        )
        .bind(product.to_lowercase())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("live_connections failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })
    }

    /// Count of live connections for a product, excluding the requester's
    /// own row.
    pub async fn count_live_connections_excluding(
        &self,
        product: &str,
        since: NaiveDateTime,
        user: &str,
        ip: &str,
    ) -> LicenceResult<i64> {
        query_scalar::<_, i64>(
            "SELECT COUNT(*) \
             FROM connection \
             WHERE (product = ? COLLATE NOCASE AND update_time > ?) \
             AND NOT (user = ? AND ip = ?)",
        )
        .bind(product.to_lowercase())
        .bind(since)
        .bind(user)
        .bind(ip)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("count_live_connections_excluding failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })
    }

    /// Count of live connections billed to one licence, excluding the
    /// requester's own row.
    pub async fn count_live_connections_for_licence(
        &self,
        licence_id: i64,
        since: NaiveDateTime,
        user: &str,
        ip: &str,
    ) -> LicenceResult<i64> {
        query_scalar::<_, i64>(
            "SELECT COUNT(*) \
             FROM connection \
             WHERE (licence_id = ? AND update_time > ?) \
             AND NOT (user = ? AND ip = ?)",
        )
        .bind(licence_id)
        .bind(since)
        .bind(user)
        .bind(ip)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("count_live_connections_for_licence failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })
    }

    /// Insert a connection row for the triple unless one already exists.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_connection_if_absent(
        &self,
        product: &str,
        user: &str,
        ip: &str,
        host: &str,
        now: NaiveDateTime,
        licence_id: Option<i64>,
    ) -> LicenceResult<()> {
        query(
            "INSERT OR IGNORE INTO connection \
                 (product, user, ip, host, logon_time, update_time, licence_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(product.to_lowercase())
        .bind(user)
        .bind(ip)
        .bind(host)
        .bind(now)
        .bind(now)
        .bind(licence_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("insert_connection_if_absent failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(())
    }

    /// Re-bind an existing connection row: host, update time and the
    /// licence the seat is billed against.
    pub async fn bind_connection(
        &self,
        product: &str,
        user: &str,
        ip: &str,
        host: &str,
        now: NaiveDateTime,
        licence_id: i64,
    ) -> LicenceResult<()> {
        query(
            "UPDATE connection \
             SET host = ?, update_time = ?, licence_id = ? \
             WHERE product = ? COLLATE NOCASE AND user = ? AND ip = ?",
        )
        .bind(host)
        .bind(now)
        .bind(licence_id)
        .bind(product.to_lowercase())
        .bind(user)
        .bind(ip)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("bind_connection failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(())
    }

    /// Refresh a connection's update time.
    pub async fn touch_connection(
        &self,
        product: &str,
        user: &str,
        ip: &str,
        now: NaiveDateTime,
    ) -> LicenceResult<()> {
        query(
            "UPDATE connection \
             SET update_time = ? \
             WHERE product = ? COLLATE NOCASE AND user = ? AND ip = ?",
        )
        .bind(now)
        .bind(product.to_lowercase())
        .bind(user)
        .bind(ip)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("touch_connection failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(())
    }

    /// Delete a connection row, returning the number of rows removed.
    pub async fn delete_connection(
        &self,
        product: &str,
        user: &str,
        ip: &str,
    ) -> LicenceResult<u64> {
        let result = query(
            "DELETE FROM connection \
             WHERE product = ? COLLATE NOCASE AND user = ? AND ip = ?",
        )
        .bind(product.to_lowercase())
        .bind(user)
        .bind(ip)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("delete_connection failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(result.rows_affected())
    }

    /// Delete every connection row older than `since`.
    pub async fn delete_stale_connections(&self, since: NaiveDateTime) -> LicenceResult<u64> {
        let result = query("DELETE FROM connection WHERE update_time < ?")
            .bind(since)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("delete_stale_connections failed: {e}");
                LicenceError::StorageError(format!("database error: {e}"))
            })?;
        Ok(result.rows_affected())
    }

    /// Distinct product names in the licence table, ascending.
    pub async fn products(&self) -> LicenceResult<Vec<String>> {
        query_scalar::<_, String>(
            "SELECT product FROM licence GROUP BY product ORDER BY product ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("products failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })
    }

    /// Insert a licence unless a row with its `TimeStamp` already exists.
    ///
    /// Returns whether a row was inserted.
    pub async fn insert_licence_if_absent(&self, licence: &Licence) -> LicenceResult<bool> {
        let result = query(
            "INSERT OR IGNORE INTO licence \
                 (company, product, customer, reference, reseller, seats, \
                  start_date, expiry_date, timestamp, code, version, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&licence.company)
        .bind(&licence.product)
        .bind(&licence.customer)
        .bind(&licence.reference)
        .bind(&licence.reseller)
        .bind(licence.seats)
        .bind(&licence.start_date)
        .bind(&licence.expiry_date)
        .bind(licence.timestamp)
        .bind(&licence.code)
        .bind(SCHEMA_VERSION)
        .bind(&licence.notes)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("insert_licence_if_absent failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every licence row whose `TimeStamp` is not in `timestamps`
    /// (all rows when the slice is empty). Cascades into connections.
    pub async fn delete_licences_not_in(&self, timestamps: &[i64]) -> LicenceResult<u64> {
        let mut sql = String::from("DELETE FROM licence");
        if !timestamps.is_empty() {
            sql.push_str(" WHERE timestamp NOT IN (");
            sql.push_str(&vec!["?"; timestamps.len()].join(", "));
            sql.push(')');
        }
        let mut statement = query(&sql);
        for timestamp in timestamps {
            statement = statement.bind(timestamp);
        }
        let result = statement.execute(&self.pool).await.map_err(|e| {
            error!("delete_licences_not_in failed: {e}");
            LicenceError::StorageError(format!("database error: {e}"))
        })?;
        Ok(result.rows_affected())
    }

    /// Refresh the query planner statistics.
    pub async fn analyze(&self) -> LicenceResult<()> {
        query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("ANALYZE failed: {e}");
                LicenceError::StorageError(format!("database error: {e}"))
            })?;
        debug!("analyzed database");
        Ok(())
    }

    /// Compact the database file.
    pub async fn vacuum(&self) -> LicenceResult<()> {
        query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("VACUUM failed: {e}");
                LicenceError::StorageError(format!("database error: {e}"))
            })?;
        debug!("vacuumed database");
        Ok(())
    }
}
