use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage backend '{backend}' rejected {operation} for key '{key}'"))]
    BackendUnavailable {
        stage: &'static str,
        backend: &'static str,
        operation: &'static str,
        key: String,
    },
    #[snafu(display("storage backend '{backend}' failed on `{stage}`: {details}"))]
    Backend {
        stage: &'static str,
        backend: &'static str,
        details: String,
    },
    #[snafu(display("session payload under '{key}' is not a JSON object"))]
    PayloadDecode {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode session payload for '{key}'"))]
    PayloadEncode {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("session payload has not been initialized for this page"))]
    PayloadNotInitialized { stage: &'static str },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to configure sqlite pragma '{pragma}'"))]
    SqlitePragma {
        stage: &'static str,
        pragma: &'static str,
        source: sqlx::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to spawn sqlite worker thread"))]
    SqliteThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
    #[cfg(feature = "sqlite")]
    #[snafu(display("failed to initialize sqlite worker runtime"))]
    SqliteRuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
