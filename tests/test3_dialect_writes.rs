use sql_dao::prelude::*;
use sql_dao::test_utils::{MockDriver, MockEvent};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Default, Clone, PartialEq)]
struct Account {
    id: i64,
    owner: String,
    balance: f64,
}

sql_dao::entity! {
    Account => "account" {
        sequences: { Oracle => "SEQ_ACCOUNT.NEXTVAL" },
        columns: { id => "id", owner => "owner", balance => "balance" }
    }
}

#[derive(Debug, Default)]
struct AuditLog {
    log_id: i64,
    message: String,
}

sql_dao::entity! {
    AuditLog => "audit_log" {
        pk: "log_id",
        sequences: { Oracle => "" },
        columns: { log_id => "log_id", message => "message" }
    }
}

async fn bound(driver: &MockDriver, dialect: Dialect) -> Result<ExecutionContext, SqlDaoError> {
    let source = DataSource::builder(DbConfig::new("mock", dialect, "mock://writes"))
        .driver(Arc::new(driver.clone()))
        .build()
        .await?;
    Ok(source.bind_connection(&ExecutionContext::new()))
}

fn account(owner: &str, balance: f64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
        ..Account::default()
    }
}

fn returned_id(id: i64) -> ResultSet {
    let mut rs = ResultSet::new(vec![ColumnType::new("id", "int8")]);
    rs.add_row_values(vec![RowValues::Int(id)]);
    rs
}

/// Inserts `entity` in its own transaction and hands it back with whatever key was read back.
async fn insert_one<E: Entity + Clone>(
    ctx: &ExecutionContext,
    entity: &E,
) -> Result<(i64, E), SqlDaoError> {
    let mut entity = entity.clone();
    run_in_transaction(ctx, |ctx| async move {
        let affected = insert(&ctx, &mut entity).await?;
        Ok((affected, entity))
    })
    .await
}

#[test]
fn postgres_insert_returns_key() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("pg").on_query("RETURNING id", returned_id(42));
        let ctx = bound(&driver, Dialect::Postgres).await?;

        let (affected, saved) = insert_one(&ctx, &account("ada", 12.5)).await?;
        assert_eq!(affected, 1);
        assert_eq!(saved.id, 42);

        let queries: Vec<MockEvent> = driver
            .events()
            .into_iter()
            .filter(|e| matches!(e, MockEvent::Query { .. }))
            .collect();
        assert_eq!(
            queries,
            vec![MockEvent::Query {
                sql: "INSERT INTO account (owner, balance) VALUES ($1, $2) RETURNING id".into(),
                params: vec![RowValues::Text("ada".into()), RowValues::Float(12.5)],
                in_tx: true,
            }]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn postgres_null_returned_key_leaves_key_unset() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut null_key = ResultSet::new(vec![ColumnType::new("id", "int8")]);
        null_key.add_row_values(vec![RowValues::Null]);
        let driver = MockDriver::new("pg").on_query("RETURNING id", null_key);
        let ctx = bound(&driver, Dialect::Postgres).await?;

        let (affected, saved) = insert_one(&ctx, &account("bea", 3.0)).await?;
        assert_eq!(affected, 1);
        assert_eq!(saved.id, 0);

        let mut row = EntityMap::new("account").with("owner", "cyd");
        run_in_transaction(&ctx, |ctx| async move {
            insert_entity_map(&ctx, &mut row).await?;
            assert_eq!(row.pk_value(), None);
            Ok(())
        })
        .await?;
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn oracle_sequence_key_comes_back_through_output_bind() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("oracle").returned_id(7);
        let ctx = bound(&driver, Dialect::Oracle).await?;

        let (_, saved) = insert_one(&ctx, &account("bo", 1.0)).await?;
        assert_eq!(saved.id, 7);
        let outputs: Vec<(String, String)> = driver
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::ExecWithOutput { sql, out_name, .. } => Some((sql, out_name)),
                _ => None,
            })
            .collect();
        assert_eq!(
            outputs,
            vec![(
                "INSERT INTO account (id, owner, balance) VALUES (SEQ_ACCOUNT.NEXTVAL, :1, :2) \
                 RETURNING id INTO :sql_dao_returning_id"
                    .to_string(),
                sql_dao::translation::RETURNING_OUT_PARAM.to_string(),
            )]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn oracle_trigger_key_is_left_to_the_server() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("oracle").returned_id(300);
        let ctx = bound(&driver, Dialect::Oracle).await?;

        let log_id = run_in_transaction(&ctx, |ctx| async move {
            let mut log = AuditLog {
                message: "opened".into(),
                ..AuditLog::default()
            };
            insert(&ctx, &mut log).await?;
            Ok(log.log_id)
        })
        .await?;
        assert_eq!(log_id, 300);
        assert_eq!(
            driver.statements(),
            vec![
                "INSERT INTO audit_log (message) VALUES (:1) RETURNING log_id INTO :sql_dao_returning_id"
                    .to_string()
            ]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn mysql_insert_uses_last_insert_id() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mysql").exec_summary(ExecSummary {
            rows_affected: Some(1),
            last_insert_id: Some(5),
            returned_id: None,
        });
        let ctx = bound(&driver, Dialect::Mysql).await?;
        let (affected, saved) = insert_one(&ctx, &account("cy", 0.0)).await?;
        assert_eq!((affected, saved.id), (1, 5));
        assert_eq!(
            driver.statements(),
            vec!["INSERT INTO account (owner, balance) VALUES (?, ?)".to_string()]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn missing_last_insert_id_is_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mssql").exec_summary(ExecSummary {
            rows_affected: None,
            last_insert_id: None,
            returned_id: None,
        });
        let ctx = bound(&driver, Dialect::Mssql).await?;
        let (affected, saved) = insert_one(&ctx, &account("di", 3.0)).await?;
        assert_eq!(affected, -1);
        assert_eq!(saved.id, 0);
        assert_eq!(driver.count(|e| matches!(e, MockEvent::Commit)), 1);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn assigned_key_is_inserted_as_given() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("pg");
        let ctx = bound(&driver, Dialect::Postgres).await?;
        let given = Account {
            id: 9,
            ..account("ed", 2.0)
        };
        let (_, saved) = insert_one(&ctx, &given).await?;
        assert_eq!(saved, given);
        assert_eq!(
            driver.statements(),
            vec!["INSERT INTO account (id, owner, balance) VALUES ($1, $2, $3)".to_string()]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn updates_and_deletes_bind_the_key_last() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("pg");
        let ctx = bound(&driver, Dialect::Postgres).await?;
        let stored = Account {
            id: 4,
            ..account("fay", 0.0)
        };

        run_in_transaction(&ctx, |ctx| async move {
            update(&ctx, &stored).await?;
            update_not_zero(&ctx, &stored).await?;
            delete(&ctx, &stored).await
        })
        .await?;

        let execs: Vec<(String, Vec<RowValues>)> = driver
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Exec { sql, params, .. } => Some((sql, params)),
                _ => None,
            })
            .collect();
        assert_eq!(
            execs,
            vec![
                (
                    "UPDATE account SET owner = $1, balance = $2 WHERE id = $3".to_string(),
                    vec![RowValues::Text("fay".into()), RowValues::Float(0.0), RowValues::Int(4)],
                ),
                (
                    "UPDATE account SET owner = $1 WHERE id = $2".to_string(),
                    vec![RowValues::Text("fay".into()), RowValues::Int(4)],
                ),
                (
                    "DELETE FROM account WHERE id = $1".to_string(),
                    vec![RowValues::Int(4)],
                ),
            ]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn key_less_writes_are_rejected_before_execution() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("pg");
        let ctx = bound(&driver, Dialect::Postgres).await?;

        let result = run_in_transaction(&ctx, |ctx| async move {
            delete(&ctx, &account("gus", 1.0)).await
        })
        .await;
        assert!(matches!(
            result.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::InvalidUsage(_))
        ));

        let result = run_in_transaction(&ctx, |ctx| async move {
            update_not_zero(&ctx, &Account { id: 3, ..Account::default() }).await
        })
        .await;
        assert!(matches!(
            result.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::StatementError(_))
        ));

        assert!(driver.statements().is_empty());
        assert_eq!(driver.count(|e| matches!(e, MockEvent::Rollback)), 2);
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn entity_map_writes_on_sql_server() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("mssql");
        let ctx = bound(&driver, Dialect::Mssql).await?;

        run_in_transaction(&ctx, |ctx| async move {
            let change = EntityMap::new("t_setting")
                .with_pk_column("name")
                .with("name", "theme")
                .with("value", "dark");
            update_entity_map(&ctx, &change).await?;

            let mut added = EntityMap::new("t_setting")
                .with_pk_column("name")
                .with("name", "lang")
                .with("value", "en");
            insert_entity_map(&ctx, &mut added).await
        })
        .await?;

        assert_eq!(
            driver.statements(),
            vec![
                "UPDATE t_setting SET value = @p1 WHERE name = @p2".to_string(),
                "INSERT INTO t_setting (name, value) VALUES (@p1, @p2)".to_string(),
            ]
        );

        let missing = run_in_transaction(&ctx, |ctx| async move {
            update_entity_map(&ctx, &EntityMap::new("t_setting").with("value", "x")).await
        })
        .await;
        assert!(matches!(
            missing.as_ref().map_err(SqlDaoError::root_cause),
            Err(SqlDaoError::InvalidUsage(_))
        ));
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn oracle_batch_insert_uses_insert_all() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = MockDriver::new("oracle").exec_summary(ExecSummary {
            rows_affected: Some(2),
            ..ExecSummary::default()
        });
        let ctx = bound(&driver, Dialect::Oracle).await?;
        let batch = vec![account("h", 1.0), account("i", 2.0)];

        let affected =
            run_in_transaction(&ctx, |ctx| async move { insert_slice(&ctx, &batch).await }).await?;
        assert_eq!(affected, 2);
        assert_eq!(
            driver.statements(),
            vec![
                "INSERT ALL \
                 INTO account (id, owner, balance) VALUES (SEQ_ACCOUNT.NEXTVAL, :1, :2) \
                 INTO account (id, owner, balance) VALUES (SEQ_ACCOUNT.NEXTVAL, :3, :4) \
                 SELECT 1 FROM DUAL"
                    .to_string()
            ]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}

#[test]
fn sql_server_page_query_orders_and_counts() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut total = ResultSet::new(vec![ColumnType::new("", "INT")]);
        total.add_row_values(vec![RowValues::Int(41)]);
        let driver = MockDriver::new("mssql").on_query("COUNT(*)", total);
        let ctx = bound(&driver, Dialect::Mssql).await?;

        let stmt = Statement::new("SELECT id, owner FROM account WHERE balance > ?").param(10);
        let mut page = Page::new(3, 10);
        let rows = query_map(&ctx, &stmt, Some(&mut page)).await?;
        assert!(rows.is_empty());
        assert_eq!(page.total_count, Some(41));
        assert_eq!(
            driver.statements(),
            vec![
                "SELECT id, owner FROM account WHERE balance > @p1 \
                 ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
                    .to_string(),
                "SELECT COUNT(*) FROM account WHERE balance > @p1".to_string(),
            ]
        );
        Ok::<(), SqlDaoError>(())
    })?;
    Ok(())
}
