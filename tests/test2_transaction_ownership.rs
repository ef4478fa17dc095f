use futures_util::FutureExt;
use sql_dao::prelude::*;
use sql_dao::test_utils::{MockDriver, MockEvent};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

async fn bound(driver: &MockDriver) -> Result<ExecutionContext, SqlDaoError> {
    let config = DbConfig::new("mock", Dialect::Postgres, "mock://ownership");
    let source = DataSource::builder(config)
        .driver(Arc::new(driver.clone()))
        .build()
        .await?;
    Ok(source.bind_connection(&ExecutionContext::new()))
}

fn touch(n: i64) -> Statement {
    Statement::new("UPDATE t_counter SET hits = hits + 1 WHERE id = ?").param(n)
}

fn single_column(rows: &[i64]) -> ResultSet {
    let mut rs = ResultSet::new(vec![ColumnType::new("n", "int8")]);
    for n in rows {
        rs.add_row_values(vec![RowValues::Int(*n)]);
    }
    rs
}

fn begins(driver: &MockDriver) -> usize {
    driver.count(|e| matches!(e, MockEvent::Begin(_)))
}

fn commits(driver: &MockDriver) -> usize {
    driver.count(|e| matches!(e, MockEvent::Commit))
}

fn rollbacks(driver: &MockDriver) -> usize {
    driver.count(|e| matches!(e, MockEvent::Rollback))
}

#[test]
fn nested_calls_share_one_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock");
        let ctx = bound(&driver).await?;
        let observer = driver.clone();

        let total = run_in_transaction(&ctx, |ctx| async move {
            let a = update_statement(&ctx, &touch(1)).await?;
            let b = run_in_transaction(&ctx, |ctx| async move {
                update_statement(&ctx, &touch(2)).await
            })
            .await?;
            // the nested participant finished without committing
            assert_eq!(commits(&observer), 0);
            Ok(a + b)
        })
        .await?;

        assert_eq!(total, 2);
        assert_eq!(begins(&driver), 1);
        assert_eq!(commits(&driver), 1);
        assert_eq!(rollbacks(&driver), 0);
        assert_eq!(
            driver.count(|e| matches!(e, MockEvent::Exec { in_tx: true, .. })),
            2
        );
        assert_eq!(driver.events().last(), Some(&MockEvent::Commit));
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn nested_failure_rolls_back_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock");
        let ctx = bound(&driver).await?;

        let result: Result<(), SqlDaoError> = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(1)).await?;
            run_in_transaction(&ctx, |ctx| async move {
                update_statement(&ctx, &touch(2)).await?;
                Err(SqlDaoError::business(std::io::Error::other("limit exceeded")))
            })
            .await
        })
        .await;

        let err = result.err().ok_or_else(|| SqlDaoError::ExecutionError("expected failure".into()))?;
        assert!(matches!(err, SqlDaoError::TransactionAborted { rollback_error: None, .. }));
        assert!(matches!(err.root_cause(), SqlDaoError::Business(_)));
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn swallowed_inner_failure_still_blocks_commit() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock");
        let ctx = bound(&driver).await?;

        let result = run_in_transaction(&ctx, |ctx| async move {
            let inner: Result<i64, SqlDaoError> = run_in_transaction(&ctx, |ctx| async move {
                update_statement(&ctx, &touch(1)).await?;
                Err(SqlDaoError::business(std::io::Error::other("ignored")))
            })
            .await;
            assert!(inner.is_err());

            // the shared transaction is gone, so later writes fail too
            let late = update_statement(&ctx, &touch(2)).await;
            assert!(matches!(
                late.as_ref().map_err(SqlDaoError::root_cause),
                Err(SqlDaoError::NoTransaction(_))
            ));
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(SqlDaoError::NoTransaction(_))));
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn panic_in_work_rolls_back_and_resumes() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock");
        let ctx = bound(&driver).await?;

        let work = |ctx: ExecutionContext| async move {
            update_statement(&ctx, &touch(1)).await?;
            if !ctx.is_cancelled() {
                panic!("work panicked");
            }
            Ok::<(), SqlDaoError>(())
        };
        let outcome = AssertUnwindSafe(run_in_transaction(&ctx, work))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn commit_failure_is_returned() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").fail_commit();
        let ctx = bound(&driver).await?;

        let result = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;

        assert!(matches!(result, Err(SqlDaoError::CommitError(_))));
        assert_eq!(commits(&driver), 1);
        assert_eq!(rollbacks(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn rollback_failure_is_noted_not_substituted() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").fail_exec_matching("t_counter");
        let driver = driver.fail_rollback();
        let ctx = bound(&driver).await?;

        let result = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;

        let err = result.err().ok_or_else(|| SqlDaoError::ExecutionError("expected failure".into()))?;
        assert!(matches!(err.root_cause(), SqlDaoError::ExecutionError(_)));
        assert!(matches!(
            err,
            SqlDaoError::TransactionAborted { rollback_error: Some(_), .. }
        ));
        assert!(err.to_string().contains("rollback also failed"));
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn transaction_options_reach_begin() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").on_query("SELECT 1", single_column(&[1]));
        let ctx = bound(&driver).await?;
        let options = TxOptions::default()
            .with_isolation(IsolationLevel::Serializable)
            .read_only(true);

        run_in_transaction(&ctx.with_tx_options(options), |ctx| async move {
            query_row::<i64>(&ctx, &Statement::new("SELECT 1")).await
        })
        .await?;

        let begin = driver
            .events()
            .into_iter()
            .find(|e| matches!(e, MockEvent::Begin(_)));
        assert_eq!(begin, Some(MockEvent::Begin(Some(options))));
        assert_eq!(
            driver.count(|e| matches!(e, MockEvent::Query { in_tx: true, .. })),
            1
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn reads_outside_a_transaction_use_the_plain_connection() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").on_query("SELECT 1", single_column(&[]));
        let ctx = bound(&driver).await?;

        let value: Option<i64> = query_row(&ctx, &Statement::new("SELECT 1")).await?;
        assert_eq!(value, None);
        assert_eq!(
            driver.count(|e| matches!(e, MockEvent::Query { in_tx: false, .. })),
            1
        );

        let write = update_statement(&ctx, &touch(1)).await;
        assert!(matches!(
            write.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::NoTransaction(_))
        ));
        assert_eq!(begins(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn detached_handle_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let handle = ConnectionHandle::detached(DbConfig::new("mock", Dialect::Mysql, "nowhere"));
        let ctx = ExecutionContext::new().with_handle(Arc::new(handle));

        let result = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;
        assert!(matches!(result, Err(SqlDaoError::InvalidUsage(_))));

        let read = query_row::<i64>(&ctx, &Statement::new("SELECT 1")).await;
        assert!(matches!(
            read.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::InvalidUsage(_))
        ));
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn timeout_aborts_statement_and_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").io_delay(Duration::from_secs(5));
        let ctx = bound(&driver).await?;

        let result = run_in_transaction(&ctx.with_timeout(Duration::from_millis(20)), |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;

        let err = result.err().ok_or_else(|| SqlDaoError::ExecutionError("expected timeout".into()))?;
        assert!(err.is_cancelled());
        assert!(matches!(err.root_cause(), SqlDaoError::Timeout));
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn cancelled_context_never_begins() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock");
        let ctx = bound(&driver).await?;
        let (ctx, token) = ctx.child_cancellation();
        token.cancel();

        let result = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;

        assert!(matches!(result, Err(SqlDaoError::Cancelled)));
        assert_eq!(begins(&driver), 0);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn abandoned_transaction_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").io_delay(Duration::from_secs(5));
        let ctx = bound(&driver).await?;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            run_in_transaction(&ctx, |ctx| async move {
                update_statement(&ctx, &touch(1)).await
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(begins(&driver), 1);
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        let handle = ctx.handle().ok_or_else(|| SqlDaoError::InvalidUsage("unbound".into()))?;
        assert!(!handle.in_transaction().await);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn commit_outlasting_the_deadline_is_reported_as_committed() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").commit_delay(Duration::from_millis(150));
        let ctx = bound(&driver).await?;

        let affected = run_in_transaction(&ctx.with_timeout(Duration::from_millis(40)), |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await?;

        assert_eq!(affected, 1);
        assert_eq!(commits(&driver), 1);
        assert_eq!(rollbacks(&driver), 0);
        assert_eq!(driver.events().last(), Some(&MockEvent::Commit));
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn begin_finishing_after_timeout_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mock").begin_delay(Duration::from_millis(100));
        let ctx = bound(&driver).await?;

        let result = run_in_transaction(&ctx.with_timeout(Duration::from_millis(20)), |ctx| async move {
            update_statement(&ctx, &touch(1)).await
        })
        .await;
        assert!(matches!(result, Err(SqlDaoError::Timeout)));

        // the late transaction opens on its own task and is dropped unused
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(begins(&driver), 1);
        assert_eq!(rollbacks(&driver), 1);
        assert_eq!(commits(&driver), 0);
        assert!(driver.statements().is_empty());

        // the handle is free for the next transaction
        let before = driver.events().len();
        let retry = run_in_transaction(&ctx, |ctx| async move {
            update_statement(&ctx, &touch(2)).await
        })
        .await?;
        assert_eq!(retry, 1);
        assert_eq!(driver.events().len(), before + 3);
        assert_eq!(commits(&driver), 1);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}
