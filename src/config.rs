//! Configuration for kvtxlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LogError, Result};

/// Main configuration for a transaction log instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Which persistence strategy backs the log
    pub backend: BackendConfig,

    // -------------------------------------------------------------------------
    // File Backend Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the log file
    pub sync_policy: SyncPolicy,
}

/// Persistence strategy selection
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Append-only text file
    File { path: PathBuf },

    /// `transactions` table in PostgreSQL
    Postgres(PostgresParams),
}

/// Connection parameters for the relational backend
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresParams {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl PostgresParams {
    /// Default PostgreSQL port
    pub const DEFAULT_PORT: u16 = 5432;

    pub fn new(
        database: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

// Keeps the password out of logs.
impl std::fmt::Debug for PostgresParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresParams")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log file sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N written entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl SyncPolicy {
    /// Whether the writer should fsync after having written `written` lines
    pub fn should_sync(&self, written: u64) -> bool {
        match *self {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNEntries { count } => count > 0 && written % count as u64 == 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::File {
                path: PathBuf::from(Config::DEFAULT_LOG_FILE),
            },
            sync_policy: SyncPolicy::EveryWrite,
        }
    }
}

impl Config {
    /// Log file used when nothing else is configured
    pub const DEFAULT_LOG_FILE: &'static str = "transaction.log";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations that cannot possibly start
    pub fn validate(&self) -> Result<()> {
        match &self.backend {
            BackendConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(LogError::Config("log file path is empty".into()));
                }
            }
            BackendConfig::Postgres(params) => {
                for (name, value) in [
                    ("database", &params.database),
                    ("host", &params.host),
                    ("user", &params.user),
                ] {
                    if value.is_empty() {
                        return Err(LogError::Config(format!("postgres {} is empty", name)));
                    }
                }
            }
        }

        if let SyncPolicy::EveryNEntries { count: 0 } = self.sync_policy {
            return Err(LogError::Config("sync count must be at least 1".into()));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Use the file backend at the given path
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend = BackendConfig::File { path: path.into() };
        self
    }

    /// Use the PostgreSQL backend
    pub fn postgres(mut self, params: PostgresParams) -> Self {
        self.config.backend = BackendConfig::Postgres(params);
        self
    }

    /// Set the file sync policy
    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
