use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{DbConfig, TxOptions};
use crate::context::ExecutionContext;
use crate::convert::ConversionRegistry;
use crate::driver::{Cursor, Driver, DriverTx, ExecSummary};
use crate::error::SqlDaoError;
use crate::logging::SqlLogger;
use crate::types::{Dialect, RowValues};

/// One logical connection: the driver, the transaction open on it (if any) and the
/// configuration of the data source it came from.
///
/// Statements run on the open transaction when there is one and on the plain driver
/// otherwise. A handle belongs to one call chain; it is shared through the contexts derived
/// from the one it was bound to.
pub struct ConnectionHandle {
    driver: Option<Arc<dyn Driver>>,
    config: Arc<DbConfig>,
    logger: Arc<dyn SqlLogger>,
    conversions: Arc<ConversionRegistry>,
    pub(crate) tx: Mutex<Option<Box<dyn DriverTx>>>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("driver", &self.driver)
            .field("dialect", &self.config.dialect)
            .field("in_transaction", &self.tx.try_lock().map(|tx| tx.is_some()).ok())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        config: Arc<DbConfig>,
        logger: Arc<dyn SqlLogger>,
        conversions: Arc<ConversionRegistry>,
    ) -> Self {
        Self {
            driver: Some(driver),
            config,
            logger,
            conversions,
            tx: Mutex::new(None),
        }
    }

    /// A handle with no physical connection behind it. Binding one into a context and then
    /// running an operation fails with [`SqlDaoError::InvalidUsage`].
    #[must_use]
    pub fn detached(config: DbConfig) -> Self {
        Self {
            driver: None,
            config: Arc::new(config),
            logger: Arc::new(crate::logging::TracingSqlLogger),
            conversions: Arc::new(ConversionRegistry::new()),
            tx: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.driver.is_some()
    }

    pub(crate) fn conversions(&self) -> &ConversionRegistry {
        &self.conversions
    }

    pub async fn in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    fn driver(&self) -> Result<&Arc<dyn Driver>, SqlDaoError> {
        self.driver.as_ref().ok_or_else(|| {
            SqlDaoError::InvalidUsage("connection handle has no physical connection".into())
        })
    }

    fn trace(&self, sql: &str, args: &[RowValues]) {
        if self.config.show_sql {
            self.logger.log_sql(sql, args);
        }
    }

    /// Open a transaction with the context's options, falling back to the configured default.
    pub(crate) async fn begin(&self, ctx: &ExecutionContext) -> Result<(), SqlDaoError> {
        let driver = self.driver()?;
        let mut slot = self.tx.lock().await;
        if slot.is_some() {
            return Err(SqlDaoError::InvalidUsage(
                "transaction already open on this connection".into(),
            ));
        }
        let options: Option<TxOptions> = ctx
            .tx_options()
            .copied()
            .or(self.config.default_tx_options);
        // BEGIN runs on its own task: once dispatched it finishes even if this caller gives
        // up, and a transaction nobody receives is dropped, which rolls it back.
        let driver = Arc::clone(driver);
        let opening = async move {
            tokio::spawn(async move { driver.begin(options.as_ref()).await })
                .await
                .map_err(|e| SqlDaoError::ExecutionError(format!("begin task failed: {e}")))?
        };
        let tx = ctx.guard(opening).await?;
        *slot = Some(tx);
        tracing::debug!(dialect = %self.config.dialect, ?options, "transaction begun");
        Ok(())
    }

    /// Commit the open transaction.
    pub(crate) async fn commit(&self, ctx: &ExecutionContext) -> Result<(), SqlDaoError> {
        let mut slot = self.tx.lock().await;
        let tx = slot
            .take()
            .ok_or_else(|| SqlDaoError::NoTransaction("commit without an open transaction".into()))?;
        if let Err(e) = ctx.ensure_live() {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback of expired transaction failed");
            }
            return Err(e);
        }
        // Once COMMIT is sent its outcome is awaited regardless of the deadline.
        tx.commit().await.map_err(|e| match e {
            SqlDaoError::CommitError(_) => e,
            other => SqlDaoError::CommitError(other.to_string()),
        })?;
        tracing::debug!(dialect = %self.config.dialect, "transaction committed");
        Ok(())
    }

    /// Roll back the open transaction; a no-op when none is open.
    pub(crate) async fn rollback(&self) -> Result<(), SqlDaoError> {
        let mut slot = self.tx.lock().await;
        let Some(tx) = slot.take() else {
            return Ok(());
        };
        tx.rollback().await.map_err(|e| match e {
            SqlDaoError::RollbackError(_) => e,
            other => SqlDaoError::RollbackError(other.to_string()),
        })?;
        tracing::debug!(dialect = %self.config.dialect, "transaction rolled back");
        Ok(())
    }

    pub(crate) async fn exec(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ExecSummary, SqlDaoError> {
        let driver = self.driver()?;
        self.trace(sql, args);
        let mut slot = self.tx.lock().await;
        match slot.as_mut() {
            Some(tx) => ctx.guard(tx.exec(sql, args)).await,
            None => ctx.guard(driver.exec(sql, args)).await,
        }
    }

    pub(crate) async fn exec_with_output(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        args: &[RowValues],
        out_name: &str,
    ) -> Result<ExecSummary, SqlDaoError> {
        let driver = self.driver()?;
        self.trace(sql, args);
        let mut slot = self.tx.lock().await;
        match slot.as_mut() {
            Some(tx) => ctx.guard(tx.exec_with_output(sql, args, out_name)).await,
            None => ctx.guard(driver.exec_with_output(sql, args, out_name)).await,
        }
    }

    pub(crate) async fn query(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Box<dyn Cursor>, SqlDaoError> {
        let driver = self.driver()?;
        self.trace(sql, args);
        let mut slot = self.tx.lock().await;
        match slot.as_mut() {
            Some(tx) => ctx.guard(tx.query(sql, args)).await,
            None => ctx.guard(driver.query(sql, args)).await,
        }
    }
}
