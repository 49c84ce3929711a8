use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection};

use super::KeyValueStorage;
use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageResult,
};
use super::error::{
    InvariantViolationSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
};

pub const DEFAULT_DATABASE_FILE_NAME: &str = "web-storage.sqlite";

/// Durable key/value backend for native hosts.
///
/// Each call opens its own connection, so in-memory databases are not supported.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        pool.close().await;
        tracing::info!("opened sqlite web storage at {}", database_url);
        Ok(Self { database_url })
    }

    /// Opens the database from synchronous code, e.g. before the event loop starts.
    pub fn open_blocking(database_location: &str) -> StorageResult<Self> {
        let database_location = database_location.to_string();
        run_db_call("sqlite-open-blocking", async move {
            Self::open(&database_location).await
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

impl KeyValueStorage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let database_url = self.database_url.clone();
        run_db_call("storage-keys", async move {
            let mut connection = connect_store_connection(&database_url, "storage-keys-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT key FROM web_storage ORDER BY key ASC")
                .fetch_all(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "storage-keys-query",
                })
        })
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        run_db_call("storage-get-item", async move {
            let mut connection =
                connect_store_connection(&database_url, "storage-get-item-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT value FROM web_storage WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "storage-get-item-query",
                })
        })
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        let value = value.to_string();
        run_db_call("storage-set-item", async move {
            let mut connection =
                connect_store_connection(&database_url, "storage-set-item-connect").await?;
            sqlx::query(
                "INSERT INTO web_storage (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "storage-set-item-upsert",
            })?;
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        run_db_call("storage-remove-item", async move {
            let mut connection =
                connect_store_connection(&database_url, "storage-remove-item-connect").await?;
            sqlx::query("DELETE FROM web_storage WHERE key = ?")
                .bind(key)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "storage-remove-item-delete",
                })?;
            Ok(())
        })
    }
}

fn run_db_call<T, F>(stage: &'static str, op: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: Future<Output = StorageResult<T>> + Send + 'static,
{
    // Storage calls are sync, so each one executes on a dedicated worker thread
    // with its own current-thread runtime to avoid nested-runtime blocking panics.
    let worker = std::thread::Builder::new()
        .name(format!("sqlite-store-{stage}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context(SqliteRuntimeInitSnafu {
                    stage: "sqlite-store-runtime-build",
                })?;
            runtime.block_on(op)
        })
        .context(SqliteThreadSpawnSnafu {
            stage: "sqlite-store-spawn-worker",
        })?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => InvariantViolationSnafu {
            stage,
            details: "sqlite storage worker thread panicked".to_string(),
        }
        .fail(),
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
