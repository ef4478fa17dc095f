use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TxOptions;
use crate::error::SqlDaoError;
use crate::handle::ConnectionHandle;

/// Ambient carrier threaded through every public operation.
///
/// A context is immutable: binding a connection or transaction options returns a derived
/// child and leaves the parent untouched. Clones share the bound handle, so every call in a
/// chain that passes the child along works on the same connection and transaction.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let root = ExecutionContext::new();
/// let child = root.with_tx_options(TxOptions::default().read_only(true));
/// assert!(root.tx_options().is_none());
/// assert!(child.tx_options().is_some_and(|o| o.read_only));
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    handle: Option<Arc<ConnectionHandle>>,
    tx_options: Option<TxOptions>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: None,
            tx_options: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context observing `token`; cancelling it aborts in-flight and later statements.
    #[must_use]
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::new()
        }
    }

    /// Child context bound to `handle`.
    #[must_use]
    pub fn with_handle(&self, handle: Arc<ConnectionHandle>) -> Self {
        Self {
            handle: Some(handle),
            ..self.clone()
        }
    }

    /// Child context whose transactions begin with `options`.
    #[must_use]
    pub fn with_tx_options(&self, options: TxOptions) -> Self {
        Self {
            tx_options: Some(options),
            ..self.clone()
        }
    }

    /// Child context whose statements fail with [`SqlDaoError::Timeout`] after `timeout`.
    /// An earlier deadline inherited from the parent is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            ..self.clone()
        }
    }

    /// Child context cancelled together with this one, or on its own via the returned token.
    #[must_use]
    pub fn child_cancellation(&self) -> (Self, CancellationToken) {
        let token = self.cancel.child_token();
        (
            Self {
                cancel: token.clone(),
                ..self.clone()
            },
            token,
        )
    }

    #[must_use]
    pub fn handle(&self) -> Option<&Arc<ConnectionHandle>> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn tx_options(&self) -> Option<&TxOptions> {
        self.tx_options.as_ref()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Cancelled` or `Timeout` when no further I/O may start under this context.
    pub(crate) fn ensure_live(&self) -> Result<(), SqlDaoError> {
        if self.cancel.is_cancelled() {
            return Err(SqlDaoError::Cancelled);
        }
        if self.deadline.is_some_and(|at| at <= Instant::now()) {
            return Err(SqlDaoError::Timeout);
        }
        Ok(())
    }

    /// Drive `io` unless the context is cancelled or past its deadline.
    pub(crate) async fn guard<T, F>(&self, io: F) -> Result<T, SqlDaoError>
    where
        F: Future<Output = Result<T, SqlDaoError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(SqlDaoError::Cancelled);
        }
        let deadline = self.deadline;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SqlDaoError::Cancelled),
            () = sleep_until(deadline) => Err(SqlDaoError::Timeout),
            result = io => result,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
