//! Context-scoped transactions, dialect-aware SQL rewriting and row-to-record mapping over
//! async database drivers.
//!
//! Every operation takes an [`ExecutionContext`]. The first [`run_in_transaction`] in a call
//! chain binds a connection into the context and opens a transaction on it; everything the
//! work closure calls with that context joins the same transaction, and only the opener
//! commits.
//!
//! ```rust,no_run
//! use sql_dao::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Account {
//!     id: i64,
//!     owner: String,
//!     balance: f64,
//! }
//!
//! sql_dao::entity! {
//!     Account => "account" {
//!         columns: { id => "id", owner => "owner", balance => "balance" }
//!     }
//! }
//!
//! # async fn demo() -> Result<(), SqlDaoError> {
//! let source = DataSource::builder(DbConfig::new("sqlite", Dialect::Sqlite, ":memory:"))
//!     .build()
//!     .await?;
//! let ctx = source.bind_connection(&ExecutionContext::new());
//!
//! let id = run_in_transaction(&ctx, |ctx| async move {
//!     let mut account = Account { owner: "ada".into(), balance: 10.0, ..Account::default() };
//!     insert(&ctx, &mut account).await?;
//!     Ok(account.id)
//! })
//! .await?;
//!
//! let found: Option<Account> =
//!     query_row(&ctx, &Statement::new("SELECT * FROM account WHERE id = ?").param(id)).await?;
//! # let _ = found;
//! # Ok(())
//! # }
//! ```
mod config;
mod context;
mod convert;
mod dao;
mod datasource;
mod error;
mod handle;
mod logging;
mod materialize;
mod statement;
mod transaction;
mod types;

pub mod driver;
pub mod entity;
pub mod prelude;
pub mod translation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{
    DEFAULT_MAX_IDLE_CONNS, DEFAULT_MAX_LIFETIME_SECS, DEFAULT_MAX_OPEN_CONNS, DbConfig,
    IsolationLevel, PoolLimits, TxOptions,
};
pub use context::ExecutionContext;
pub use convert::{ConversionRegistry, ConversionRule, CustomConversion, Destination};
pub use dao::{
    count, delete, insert, insert_entity_map, insert_slice, query, query_map, query_row,
    query_row_map, update, update_entity_map, update_not_zero, update_statement,
};
pub use datasource::{
    DataSource, DataSourceBuilder, DefaultStrategy, ReadWriteStrategy, default_data_source,
    set_default_data_source, set_read_write_strategy,
};
pub use entity::{Entity, EntityMap, RowTarget};
pub use error::{BoxError, SqlDaoError};
pub use handle::ConnectionHandle;
pub use logging::{SqlLogger, TracingSqlLogger};
pub use materialize::RowMap;
pub use statement::{DEFAULT_PAGE_SIZE, Page, Statement, StatementPlan};
pub use transaction::run_in_transaction;
pub use types::{Dialect, OperationKind, RowValues};
