// Process-wide default data source and read/write routing. Everything runs in one test because
// the default and the strategy are global.
use sql_dao::prelude::*;
use sql_dao::test_utils::{MockDriver, MockEvent};
use sql_dao::{default_data_source, set_read_write_strategy};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct SplitReads {
    primary: Arc<DataSource>,
    replica: Arc<DataSource>,
}

impl ReadWriteStrategy for SplitReads {
    fn select(&self, kind: OperationKind) -> Option<Arc<DataSource>> {
        match kind {
            OperationKind::Read => Some(Arc::clone(&self.replica)),
            OperationKind::Write => Some(Arc::clone(&self.primary)),
        }
    }
}

fn one_row() -> ResultSet {
    let mut rs = ResultSet::new(vec![ColumnType::new("n", "int4")]);
    rs.add_row_values(vec![RowValues::Int(1)]);
    rs
}

async fn source(driver: &MockDriver) -> Result<Arc<DataSource>, SqlDaoError> {
    DataSource::builder(DbConfig::new("mock", Dialect::Postgres, "mock://default"))
        .driver(Arc::new(driver.clone()))
        .build()
        .await
}

#[test]
fn unbound_contexts_use_the_selected_source() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let ctx = ExecutionContext::new();
        let none = query_row::<i64>(&ctx, &Statement::new("SELECT 1")).await;
        assert!(matches!(
            none.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::ConfigError(_))
        ));

        let primary_driver = MockDriver::new("primary").on_query("SELECT", one_row());
        let primary = source(&primary_driver).await?;
        let replica_driver = MockDriver::new("replica").on_query("SELECT", one_row());
        let replica = source(&replica_driver).await?;
        let default = default_data_source()
            .ok_or_else(|| SqlDaoError::ConfigError("no default registered".into()))?;
        assert!(Arc::ptr_eq(&default, &primary));

        // reads and transactions on an unbound context go to the default
        assert_eq!(query_row::<i64>(&ctx, &Statement::new("SELECT 1")).await?, Some(1));
        let affected = run_in_transaction(&ctx, |ctx| async move {
            assert!(ctx.handle().is_some());
            update_statement(&ctx, &Statement::new("DELETE FROM t WHERE id = ?").param(1)).await
        })
        .await?;
        assert_eq!(affected, 1);
        assert!(ctx.handle().is_none());
        assert_eq!(primary_driver.count(|e| matches!(e, MockEvent::Commit)), 1);

        let write = update_statement(&ctx, &Statement::new("DELETE FROM t")).await;
        assert!(matches!(
            write.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::NoTransaction(_))
        ));

        set_read_write_strategy(Arc::new(SplitReads {
            primary: Arc::clone(&primary),
            replica: Arc::clone(&replica),
        }));
        primary_driver.clear_events();
        assert_eq!(query_row::<i64>(&ctx, &Statement::new("SELECT 1")).await?, Some(1));
        run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &Statement::new("DELETE FROM t")).await
        })
        .await?;
        assert_eq!(replica_driver.count(|e| matches!(e, MockEvent::Query { .. })), 1);
        assert_eq!(replica_driver.count(|e| matches!(e, MockEvent::Begin(_))), 0);
        assert_eq!(primary_driver.count(|e| matches!(e, MockEvent::Query { .. })), 0);
        assert_eq!(primary_driver.count(|e| matches!(e, MockEvent::Commit)), 1);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}
