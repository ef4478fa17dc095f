use std::sync::{Arc, LazyLock, RwLock};

use crate::config::DbConfig;
use crate::context::ExecutionContext;
use crate::convert::ConversionRegistry;
use crate::driver::Driver;
use crate::error::SqlDaoError;
use crate::handle::ConnectionHandle;
use crate::logging::{SqlLogger, TracingSqlLogger};
use crate::types::OperationKind;

/// A configured, pinged driver plus the hooks shared by every handle created from it.
pub struct DataSource {
    config: Arc<DbConfig>,
    driver: Arc<dyn Driver>,
    logger: Arc<dyn SqlLogger>,
    conversions: Arc<ConversionRegistry>,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("driver", &self.driver)
            .field("dialect", &self.config.dialect)
            .field("conversions", &self.conversions)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for a [`DataSource`].
///
/// ```rust,no_run
/// use sql_dao::prelude::*;
///
/// # async fn demo() -> Result<(), SqlDaoError> {
/// let source = DataSource::builder(DbConfig::new("sqlite", Dialect::Sqlite, ":memory:"))
///     .build()
///     .await?;
/// let ctx = source.bind_connection(&ExecutionContext::new());
/// # let _ = ctx;
/// # Ok(())
/// # }
/// ```
pub struct DataSourceBuilder {
    config: DbConfig,
    driver: Option<Arc<dyn Driver>>,
    logger: Arc<dyn SqlLogger>,
    conversions: ConversionRegistry,
}

impl DataSourceBuilder {
    #[must_use]
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            driver: None,
            logger: Arc::new(TracingSqlLogger),
            conversions: ConversionRegistry::new(),
        }
    }

    /// Use an already opened driver instead of opening one from the DSN.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn sql_logger(mut self, logger: Arc<dyn SqlLogger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn conversions(mut self, conversions: ConversionRegistry) -> Self {
        self.conversions = conversions;
        self
    }

    /// Validate, open and ping. The first data source built becomes the default.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` for an invalid config or unknown driver name, and
    /// `SqlDaoError::ConnectionError` when opening or pinging fails.
    pub async fn build(self) -> Result<Arc<DataSource>, SqlDaoError> {
        let driver = match self.driver {
            Some(driver) => {
                self.config.validate_driver_name()?;
                driver
            }
            None => {
                self.config.validate()?;
                open_builtin(&self.config).await?
            }
        };

        driver.ping().await.map_err(|e| {
            SqlDaoError::ConnectionError(format!(
                "ping failed for driver {}: {e}",
                self.config.driver_name
            ))
        })?;

        let source = Arc::new(DataSource {
            config: Arc::new(self.config),
            driver,
            logger: self.logger,
            conversions: Arc::new(self.conversions),
        });
        register_if_first(&source);
        tracing::debug!(
            driver = %source.config.driver_name,
            dialect = %source.config.dialect,
            "data source ready"
        );
        Ok(source)
    }
}

async fn open_builtin(config: &DbConfig) -> Result<Arc<dyn Driver>, SqlDaoError> {
    match config.driver_name.trim().to_ascii_lowercase().as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" | "sqlite3" => Ok(Arc::new(
            crate::driver::sqlite::SqliteDriver::open(&config.dsn, config.limits()).await?,
        )),
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" | "pgx" => Ok(Arc::new(
            crate::driver::postgres::PostgresDriver::open(&config.dsn, config.limits())?,
        )),
        other => Err(SqlDaoError::ConfigError(format!(
            "no built-in driver named '{other}'; supply one with DataSourceBuilder::driver"
        ))),
    }
}

impl DataSource {
    #[must_use]
    pub fn builder(config: DbConfig) -> DataSourceBuilder {
        DataSourceBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// A fresh handle on this data source, with no transaction open.
    #[must_use]
    pub fn new_handle(&self) -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.config),
            Arc::clone(&self.logger),
            Arc::clone(&self.conversions),
        ))
    }

    /// Child of `parent` bound to a new handle on this data source.
    #[must_use]
    pub fn bind_connection(&self, parent: &ExecutionContext) -> ExecutionContext {
        parent.with_handle(self.new_handle())
    }

    /// Close the underlying driver.
    ///
    /// # Errors
    /// Returns driver errors raised while closing.
    pub async fn close(&self) -> Result<(), SqlDaoError> {
        self.driver.close().await
    }
}

/// Chooses the data source for operations that run on a context with no bound handle.
pub trait ReadWriteStrategy: Send + Sync {
    fn select(&self, kind: OperationKind) -> Option<Arc<DataSource>>;
}

/// Routes reads and writes to the default data source.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

impl ReadWriteStrategy for DefaultStrategy {
    fn select(&self, _kind: OperationKind) -> Option<Arc<DataSource>> {
        default_data_source()
    }
}

static DEFAULT_SOURCE: LazyLock<RwLock<Option<Arc<DataSource>>>> =
    LazyLock::new(|| RwLock::new(None));

static STRATEGY: LazyLock<RwLock<Arc<dyn ReadWriteStrategy>>> =
    LazyLock::new(|| RwLock::new(Arc::new(DefaultStrategy)));

fn register_if_first(source: &Arc<DataSource>) {
    let mut slot = match DEFAULT_SOURCE.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if slot.is_none() {
        *slot = Some(Arc::clone(source));
    }
}

/// Replace the default data source.
pub fn set_default_data_source(source: Arc<DataSource>) {
    let mut slot = match DEFAULT_SOURCE.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *slot = Some(source);
}

#[must_use]
pub fn default_data_source() -> Option<Arc<DataSource>> {
    match DEFAULT_SOURCE.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Install the strategy used to pick data sources for unbound contexts.
pub fn set_read_write_strategy(strategy: Arc<dyn ReadWriteStrategy>) {
    let mut slot = match STRATEGY.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *slot = strategy;
}

pub(crate) fn select_data_source(kind: OperationKind) -> Result<Arc<DataSource>, SqlDaoError> {
    let strategy = match STRATEGY.read() {
        Ok(guard) => Arc::clone(&*guard),
        Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
    };
    strategy.select(kind).ok_or_else(|| {
        SqlDaoError::ConfigError(format!(
            "no data source available for {kind:?}; build one or bind a connection"
        ))
    })
}
