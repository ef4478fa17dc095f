use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SqlDaoError;
use crate::types::Dialect;

pub const DEFAULT_MAX_OPEN_CONNS: u32 = 50;
pub const DEFAULT_MAX_IDLE_CONNS: u32 = 50;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 600;

/// Transaction isolation requested at begin time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Whatever the server uses by default.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, `None` for [`IsolationLevel::Default`].
    #[must_use]
    pub fn as_sql(self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Options applied when a transaction is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOptions {
    #[serde(default)]
    pub isolation: IsolationLevel,
    #[serde(default)]
    pub read_only: bool,
}

impl TxOptions {
    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Pool limits handed to the driver when it opens; not enforced here.
///
/// The bundled pools apply `max_open` and `max_lifetime` (zero means unlimited). Neither bb8 nor
/// deadpool caps idle connections, so `max_idle` is carried for custom drivers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: Duration,
}

/// Connection and dialect configuration of a data source.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let config = DbConfig::from_json_str(
///     r#"{ "dsn": ":memory:", "driver_name": "sqlite", "dialect": "sqlite3", "show_sql": true }"#,
/// )?;
/// assert_eq!(config.dialect, Dialect::Sqlite);
/// assert_eq!(config.max_open_conns, 50);
/// # Ok::<(), SqlDaoError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub dsn: String,
    pub driver_name: String,
    pub dialect: Dialect,
    #[serde(default)]
    pub show_sql: bool,
    #[serde(default = "default_max_open")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle")]
    pub max_idle_conns: u32,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default)]
    pub default_tx_options: Option<TxOptions>,
}

fn default_max_open() -> u32 {
    DEFAULT_MAX_OPEN_CONNS
}

fn default_max_idle() -> u32 {
    DEFAULT_MAX_IDLE_CONNS
}

fn default_max_lifetime() -> u64 {
    DEFAULT_MAX_LIFETIME_SECS
}

impl DbConfig {
    #[must_use]
    pub fn new(driver_name: impl Into<String>, dialect: Dialect, dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            driver_name: driver_name.into(),
            dialect,
            show_sql: false,
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
            default_tx_options: None,
        }
    }

    #[must_use]
    pub fn show_sql(mut self, show_sql: bool) -> Self {
        self.show_sql = show_sql;
        self
    }

    #[must_use]
    pub fn default_tx_options(mut self, options: TxOptions) -> Self {
        self.default_tx_options = Some(options);
        self
    }

    #[must_use]
    pub fn pool_limits(mut self, max_open: u32, max_idle: u32, max_lifetime_secs: u64) -> Self {
        self.max_open_conns = max_open;
        self.max_idle_conns = max_idle;
        self.max_lifetime_secs = max_lifetime_secs;
        self
    }

    /// Parse a JSON document into a config, applying defaults for omitted pool limits.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` on malformed JSON or an unknown dialect name.
    pub fn from_json_str(json: &str) -> Result<Self, SqlDaoError> {
        serde_json::from_str(json)
            .map_err(|e| SqlDaoError::ConfigError(format!("invalid config: {e}")))
    }

    /// Check the fields a built-in driver needs.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` when the driver name or DSN is empty.
    pub fn validate(&self) -> Result<(), SqlDaoError> {
        self.validate_driver_name()?;
        if self.dsn.trim().is_empty() {
            return Err(SqlDaoError::ConfigError("dsn must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn validate_driver_name(&self) -> Result<(), SqlDaoError> {
        if self.driver_name.trim().is_empty() {
            return Err(SqlDaoError::ConfigError(
                "driver_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn limits(&self) -> PoolLimits {
        PoolLimits {
            max_open: self.max_open_conns,
            max_idle: self.max_idle_conns,
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
        }
    }
}
