//! Relational storage backend.
//!
//! One row per live job in a single `job` table, reached through the sqlx
//! `Any` driver so the same code serves MySQL, PostgreSQL and SQLite. The
//! engine provides durability and row-level atomicity; this module only adds
//! the duplicate and not-found checks the contract requires.
//!
//! When `Handle` carries a single-column unique key the engine rejects
//! duplicates and inserts are plain. Tables created without one get a
//! conditional insert instead, which can lose a lock conflict under
//! contention and is then re-run.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Executor, Row};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Operation, Result, StorageError};
use crate::job::Job;
use crate::storage::JobStorage;

/// Maximum length of `Handle`, `Id` and `FuncName`, in characters.
pub const MAX_FIELD_LEN: usize = 128;

/// Maximum payload size, in bytes.
pub const MAX_DATA_LEN: usize = 16384;

/// Format of `CreateAt` on the wire between this crate and the database.
/// Sub-second precision is dropped.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Tries of a conditional insert that keeps losing lock conflicts.
const INSERT_ATTEMPTS: u32 = 3;

/// SQL flavour, picked from the database URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// MySQL or MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Detect the dialect of a database URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        match scheme.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Bind placeholder for the `n`th (1-based) parameter.
    fn param(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Placeholder for a `CreateAt` value bound as text.
    fn timestamp_param(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("CAST(${n} AS TIMESTAMP)"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Expression reading `CreateAt` back as text in [`TIMESTAMP_FORMAT`].
    const fn create_at_column(self) -> &'static str {
        match self {
            Self::MySql => "DATE_FORMAT(CreateAt, '%Y-%m-%d %H:%i:%s')",
            Self::Postgres => "to_char(CreateAt, 'YYYY-MM-DD HH24:MI:SS')",
            Self::Sqlite => "CAST(CreateAt AS TEXT)",
        }
    }

    const fn table_options(self) -> &'static str {
        match self {
            Self::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb3",
            Self::Postgres | Self::Sqlite => "",
        }
    }

    /// Statement run on every new pooled connection.
    ///
    /// MySQL converts `TIMESTAMP` values through the session time zone, so
    /// sessions are pinned to UTC.
    const fn session_setup(self) -> Option<&'static str> {
        match self {
            Self::MySql => Some("SET time_zone = '+00:00'"),
            Self::Postgres | Self::Sqlite => None,
        }
    }

    /// Query returning a row when `job.Handle` has a unique index of its own.
    const fn unique_handle_query(self) -> &'static str {
        match self {
            Self::MySql => {
                "SELECT 1 FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = 'job' AND non_unique = 0 \
                 GROUP BY index_name \
                 HAVING COUNT(*) = 1 AND MAX(column_name) = 'Handle'"
            }
            Self::Postgres => {
                "SELECT 1 FROM pg_index i \
                 JOIN pg_class t ON t.oid = i.indrelid \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = i.indkey[0] \
                 WHERE t.relname = 'job' AND pg_table_is_visible(t.oid) \
                 AND i.indisunique AND i.indnatts = 1 AND a.attname = 'handle'"
            }
            Self::Sqlite => {
                "SELECT 1 FROM pragma_index_list('job') AS il, pragma_index_info(il.name) AS ii \
                 WHERE il.\"unique\" = 1 \
                 GROUP BY il.name \
                 HAVING COUNT(*) = 1 AND MAX(ii.name) = 'Handle'"
            }
        }
    }

    /// Whether text columns can hold `c`. MySQL `utf8mb3` stops at the BMP.
    const fn stores_char(self, c: char) -> bool {
        match self {
            Self::MySql => (c as u32) <= 0xFFFF,
            Self::Postgres | Self::Sqlite => true,
        }
    }
}

/// `CREATE TABLE` statement for the `job` table.
///
/// Columns match the broker's schema exactly. `CreateAt` is nullable so jobs
/// without a submission time can be stored, and `Handle` carries a unique
/// constraint so concurrent duplicate inserts fail in the engine.
#[must_use]
pub fn create_table_sql(dialect: Dialect) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS job(\
         Handle VARCHAR(128), \
         Id VARCHAR(128), \
         Priority INT, \
         CreateAt TIMESTAMP NULL, \
         FuncName VARCHAR(128), \
         Data VARCHAR(16384), \
         CONSTRAINT job_handle UNIQUE (Handle)\
         ){}",
        dialect.table_options()
    )
}

fn verify_sql(dialect: Dialect) -> String {
    format!(
        "SELECT {} FROM job WHERE 1 = 0",
        select_columns(dialect)
    )
}

fn select_columns(dialect: Dialect) -> String {
    format!(
        "Handle, Id, Priority, {} AS CreateAt, FuncName, Data",
        dialect.create_at_column()
    )
}

/// SQL text for one dialect and table shape.
#[derive(Debug)]
struct Statements {
    insert: String,
    /// `insert` guards against duplicates itself and binds the handle twice.
    conditional: bool,
    delete: String,
    select: String,
    verify: String,
}

impl Statements {
    fn new(dialect: Dialect, unique_handle: bool) -> Self {
        let p = |n| dialect.param(n);

        let insert = if unique_handle {
            format!(
                "INSERT INTO job (Handle, Id, Priority, CreateAt, FuncName, Data) \
                 VALUES ({}, {}, {}, {}, {}, {})",
                p(1),
                p(2),
                p(3),
                dialect.timestamp_param(4),
                p(5),
                p(6)
            )
        } else {
            format!(
                "INSERT INTO job (Handle, Id, Priority, CreateAt, FuncName, Data) \
                 SELECT {}, {}, {}, {}, {}, {} FROM (SELECT 1) AS one \
                 WHERE NOT EXISTS (SELECT 1 FROM job WHERE Handle = {})",
                p(1),
                p(2),
                p(3),
                dialect.timestamp_param(4),
                p(5),
                p(6),
                p(7)
            )
        };

        Self {
            insert,
            conditional: !unique_handle,
            delete: format!("DELETE FROM job WHERE Handle = {}", p(1)),
            select: format!(
                "SELECT {} FROM job ORDER BY Priority DESC",
                select_columns(dialect)
            ),
            verify: verify_sql(dialect),
        }
    }
}

/// Pool and statements, set up once by `init`.
#[derive(Debug)]
struct Connected {
    pool: AnyPool,
    dialect: Dialect,
    statements: Statements,
}

/// Durable job storage on a relational database.
#[derive(Debug)]
pub struct SqlStorage {
    config: DatabaseConfig,
    conn: OnceCell<Connected>,
}

impl SqlStorage {
    /// Create a backend for the given database. Connects on [`init`](JobStorage::init).
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            conn: OnceCell::new(),
        }
    }

    /// Dialect of the configured URL, if supported.
    #[must_use]
    pub fn dialect(&self) -> Option<Dialect> {
        Dialect::from_url(&self.config.url)
    }

    /// The connection pool, once initialized.
    #[must_use]
    pub fn pool(&self) -> Option<&AnyPool> {
        self.conn.get().map(|c| &c.pool)
    }

    fn connected(&self) -> Result<&Connected> {
        self.conn.get().ok_or(StorageError::NotInitialized)
    }

    /// Open the pool, prepare the table and pick the insert strategy.
    async fn connect(&self) -> Result<Connected> {
        let dialect = self.dialect().ok_or_else(|| StorageError::Init {
            backend: "sql",
            message: format!("unsupported database URL scheme in {:?}", redact(&self.config.url)),
        })?;

        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_seconds));
        if let Some(setup) = dialect.session_setup() {
            options = options.after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(setup).await?;
                    Ok(())
                })
            });
        }

        let pool = options.connect(&self.config.url).await.map_err(|e| {
            error!(error = %e, "Database connection failed");
            StorageError::database(Operation::Init, e)
        })?;

        if self.config.create_table {
            sqlx::query(&create_table_sql(dialect))
                .execute(&pool)
                .await
                .map_err(|e| {
                    error!(error = %e, "CREATE TABLE failed");
                    StorageError::database(Operation::Init, e)
                })?;
        }

        Self::verify(&pool, &verify_sql(dialect)).await?;

        let unique_handle = sqlx::query(dialect.unique_handle_query())
            .fetch_optional(&pool)
            .await
            .map_err(|e| {
                error!(error = %e, "job index lookup failed");
                StorageError::database(Operation::Init, e)
            })?
            .is_some();
        if !unique_handle {
            warn!("job table has no unique key on Handle, falling back to conditional inserts");
        }

        info!(?dialect, unique_handle, "Database connection pool established");

        Ok(Connected {
            pool,
            dialect,
            statements: Statements::new(dialect, unique_handle),
        })
    }

    /// Zero-row select proving the `job` table has the expected columns.
    async fn verify(pool: &AnyPool, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            error!(error = %e, "job table check failed");
            StorageError::database(Operation::Init, e)
        })?;
        Ok(())
    }

    /// Check column bounds and convert the payload to text.
    fn validate(dialect: Dialect, job: &Job) -> Result<Option<String>> {
        for (field, value) in [
            ("handle", &job.handle),
            ("id", &job.id),
            ("func_name", &job.func_name),
        ] {
            let len = value.chars().count();
            if len > MAX_FIELD_LEN {
                return Err(StorageError::FieldTooLong {
                    field,
                    len,
                    max: MAX_FIELD_LEN,
                });
            }
            if !value.chars().all(|c| dialect.stores_char(c)) {
                return Err(StorageError::UnsupportedText {
                    field,
                    handle: job.handle.clone(),
                });
            }
        }

        let Some(data) = &job.data else {
            return Ok(None);
        };
        if data.len() > MAX_DATA_LEN {
            return Err(StorageError::FieldTooLong {
                field: "data",
                len: data.len(),
                max: MAX_DATA_LEN,
            });
        }
        let invalid = || StorageError::InvalidPayload {
            handle: job.handle.clone(),
        };
        let text = String::from_utf8(data.clone()).map_err(|_| invalid())?;
        if !text.chars().all(|c| dialect.stores_char(c)) {
            return Err(invalid());
        }
        Ok(Some(text))
    }

    fn row_to_job(row: &AnyRow) -> Result<Job> {
        let decode = |e: sqlx::Error| StorageError::database(Operation::GetJobs, e);

        let handle: String = row.try_get(0).map_err(decode)?;
        let priority = row
            .try_get::<i64, _>(2)
            .or_else(|_| row.try_get::<i32, _>(2).map(i64::from))
            .map_err(decode)?;
        let priority = i32::try_from(priority).map_err(|_| StorageError::Corrupt {
            handle: handle.clone(),
            reason: format!("priority {priority} out of range"),
        })?;
        let create_at = row
            .try_get::<Option<String>, _>(3)
            .map_err(decode)?
            .map(|s| parse_timestamp(&handle, &s))
            .transpose()?;
        let data = row
            .try_get::<Option<String>, _>(5)
            .map_err(decode)?
            .map(String::into_bytes);

        Ok(Job {
            id: row.try_get(1).map_err(decode)?,
            priority,
            create_at,
            func_name: row.try_get(4).map_err(decode)?,
            data,
            handle,
        })
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(handle: &str, value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StorageError::Corrupt {
            handle: handle.to_string(),
            reason: format!("bad CreateAt {value:?}: {e}"),
        })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Deadlock or serialization failure. The engine rolled the statement back.
fn is_lock_conflict(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| matches!(code.as_ref(), "40001" | "40P01"))
}

/// Strip credentials from a URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl JobStorage for SqlStorage {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn init(&self) -> Result<()> {
        if let Some(conn) = self.conn.get() {
            Self::verify(&conn.pool, &conn.statements.verify).await?;
        } else {
            self.conn.get_or_try_init(|| self.connect()).await?;
        }

        debug!(url = %redact(&self.config.url), "SQL storage ready");
        Ok(())
    }

    async fn add_job(&self, job: &Job) -> Result<()> {
        let conn = self.connected()?;
        let data = Self::validate(conn.dialect, job)?;
        let duplicate = || StorageError::Duplicate {
            handle: job.handle.clone(),
        };
        debug!(handle = %job.handle, priority = job.priority, "INSERT");

        let mut attempt = 1;
        loop {
            let mut query = sqlx::query(&conn.statements.insert)
                .bind(job.handle.clone())
                .bind(job.id.clone())
                .bind(job.priority)
                .bind(job.create_at.as_ref().map(format_timestamp))
                .bind(job.func_name.clone())
                .bind(data.clone());
            if conn.statements.conditional {
                query = query.bind(job.handle.clone());
            }

            match query.execute(&conn.pool).await {
                Ok(result) if result.rows_affected() == 0 => return Err(duplicate()),
                Ok(_) => return Ok(()),
                Err(e) if is_unique_violation(&e) => return Err(duplicate()),
                Err(e) if is_lock_conflict(&e) && attempt < INSERT_ATTEMPTS => {
                    debug!(handle = %job.handle, attempt, error = %e, "INSERT lost a lock conflict, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, handle = %job.handle, "INSERT failed");
                    return Err(StorageError::database(Operation::AddJob, e));
                }
            }
        }
    }

    async fn get_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.connected()?;
        debug!("SELECT jobs");

        let rows: Vec<AnyRow> = sqlx::query(&conn.statements.select)
            .fetch_all(&conn.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "SELECT failed");
                StorageError::database(Operation::GetJobs, e)
            })?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn done_job(&self, job: &Job) -> Result<()> {
        let conn = self.connected()?;
        debug!(handle = %job.handle, "DELETE");

        let result = sqlx::query(&conn.statements.delete)
            .bind(job.handle.clone())
            .execute(&conn.pool)
            .await
            .map_err(|e| {
                error!(error = %e, handle = %job.handle, "DELETE failed");
                StorageError::database(Operation::DoneJob, e)
            })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                handle: job.handle.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(
            Dialect::from_url("mysql://root:@localhost:3306/gogearmand"),
            Some(Dialect::MySql)
        );
        assert_eq!(
            Dialect::from_url("postgresql://localhost/jobs"),
            Some(Dialect::Postgres)
        );
        assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("SQLite://jobs.db"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("mongodb://localhost"), None);
        assert_eq!(Dialect::from_url("no-scheme"), None);
    }

    #[test]
    fn test_postgres_statements_use_numbered_params() {
        let statements = Statements::new(Dialect::Postgres, false);
        assert!(statements.insert.contains("CAST($4 AS TIMESTAMP)"));
        assert!(statements.insert.contains("Handle = $7"));
        assert_eq!(statements.delete, "DELETE FROM job WHERE Handle = $1");
    }

    #[test]
    fn test_mysql_statements() {
        let statements = Statements::new(Dialect::MySql, false);
        assert!(statements.conditional);
        assert_eq!(statements.insert.matches('?').count(), 7);
        assert!(statements.select.ends_with("ORDER BY Priority DESC"));
        assert!(statements.select.contains("DATE_FORMAT(CreateAt"));
    }

    #[test]
    fn test_unique_handle_uses_plain_insert() {
        let statements = Statements::new(Dialect::MySql, true);
        assert!(!statements.conditional);
        assert!(!statements.insert.contains("NOT EXISTS"));
        assert_eq!(statements.insert.matches('?').count(), 6);

        let statements = Statements::new(Dialect::Postgres, true);
        assert!(statements
            .insert
            .ends_with("VALUES ($1, $2, $3, CAST($4 AS TIMESTAMP), $5, $6)"));
    }

    #[test]
    fn test_mysql_sessions_run_in_utc() {
        assert_eq!(
            Dialect::MySql.session_setup(),
            Some("SET time_zone = '+00:00'")
        );
        assert_eq!(Dialect::Postgres.session_setup(), None);
        assert_eq!(Dialect::Sqlite.session_setup(), None);
    }

    #[test]
    fn test_mysql_rejects_characters_outside_bmp() {
        let payload = Job::new("H:emoji", "f").with_data("ok \u{1F600}");
        let err = SqlStorage::validate(Dialect::MySql, &payload).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPayload { .. }));
        assert_eq!(err.class(), crate::ErrorClass::Write);

        let name = Job::new("H:emoji", "resize\u{1F5BC}");
        let err = SqlStorage::validate(Dialect::MySql, &name).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedText {
                field: "func_name",
                ..
            }
        ));

        let bmp = Job::new("H:bmp", "f").with_data("caf\u{e9} \u{4e2d}");
        assert!(SqlStorage::validate(Dialect::MySql, &bmp).is_ok());
        assert!(SqlStorage::validate(Dialect::Sqlite, &payload).is_ok());
        assert!(SqlStorage::validate(Dialect::Postgres, &name).is_ok());
    }

    #[test]
    fn test_timestamps_drop_subseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        let text = format_timestamp(&at);
        assert_eq!(text, "2023-11-14 22:13:20");
        assert_eq!(
            parse_timestamp("H:t", &text).unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
    }

    #[test]
    fn test_create_table_matches_schema() {
        let ddl = create_table_sql(Dialect::MySql);
        for column in [
            "Handle VARCHAR(128)",
            "Id VARCHAR(128)",
            "Priority INT",
            "CreateAt TIMESTAMP",
            "FuncName VARCHAR(128)",
            "Data VARCHAR(16384)",
        ] {
            assert!(ddl.contains(column), "missing {column}");
        }
        assert!(ddl.ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb3"));
        assert!(!create_table_sql(Dialect::Sqlite).contains("ENGINE"));
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let job = Job::new("H:big", "f").with_data(vec![b'x'; MAX_DATA_LEN + 1]);
        let err = SqlStorage::validate(Dialect::Sqlite, &job).unwrap_err();
        assert!(matches!(
            err,
            StorageError::FieldTooLong { field: "data", .. }
        ));

        let job = Job::new("H:fits", "f").with_data(vec![b'x'; MAX_DATA_LEN]);
        assert!(SqlStorage::validate(Dialect::Sqlite, &job).is_ok());
    }

    #[test]
    fn test_validate_rejects_long_handle() {
        let job = Job::new("h".repeat(MAX_FIELD_LEN + 1), "f");
        let err = SqlStorage::validate(Dialect::Sqlite, &job).unwrap_err();
        assert!(matches!(
            err,
            StorageError::FieldTooLong {
                field: "handle",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_keeps_empty_and_absent_payloads_apart() {
        let empty = Job::new("H:e", "f").with_data(Vec::new());
        let absent = Job::new("H:a", "f");
        assert_eq!(SqlStorage::validate(Dialect::Sqlite, &empty).unwrap(), Some(String::new()));
        assert_eq!(SqlStorage::validate(Dialect::Sqlite, &absent).unwrap(), None);
    }

    #[test]
    fn test_validate_rejects_binary_payload() {
        let job = Job::new("H:bin", "f").with_data(vec![0xff, 0xfe]);
        let err = SqlStorage::validate(Dialect::Sqlite, &job).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPayload { .. }));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 13, 5, 9).unwrap();
        let text = format_timestamp(&at);
        assert_eq!(text, "2024-02-29 13:05:09");
        assert_eq!(parse_timestamp("H:t", &text).unwrap(), at);
        assert!(parse_timestamp("H:t", "yesterday").is_err());
    }

    #[test]
    fn test_redact_hides_credentials() {
        assert_eq!(
            redact("mysql://root:hunter2@db:3306/jobs"),
            "mysql://***@db:3306/jobs"
        );
        assert_eq!(redact("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_operations_before_init_fail() {
        let storage = SqlStorage::new(DatabaseConfig::new("sqlite::memory:"));
        let err = storage.get_jobs().await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_scheme() {
        let storage = SqlStorage::new(DatabaseConfig::new("oracle://db/jobs"));
        let err = storage.init().await.unwrap_err();
        assert!(matches!(err, StorageError::Init { backend: "sql", .. }));
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display())
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_created_table_gets_plain_inserts() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = SqlStorage::new(DatabaseConfig {
            create_table: true,
            ..DatabaseConfig::new(sqlite_url(&dir))
        });
        storage.init().await.unwrap();

        let conn = storage.connected().unwrap();
        assert!(!conn.statements.conditional);
        assert_eq!(conn.dialect, Dialect::Sqlite);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_table_without_unique_key_gets_conditional_inserts() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = sqlite_url(&dir);
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE job(Handle VARCHAR(128), Id VARCHAR(128), Priority INT, \
             CreateAt TIMESTAMP NULL, FuncName VARCHAR(128), Data VARCHAR(16384))",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let storage = SqlStorage::new(DatabaseConfig::new(url));
        storage.init().await.unwrap();
        assert!(storage.connected().unwrap().statements.conditional);

        storage.add_job(&Job::new("H:1", "first")).await.unwrap();
        let err = storage.add_job(&Job::new("H:1", "second")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(storage.get_jobs().await.unwrap().len(), 1);
    }
}
