//! SQL text for entity writes, built with `?` placeholders before dialect rewriting.
use crate::entity::KeyStrategy;
use crate::error::SqlDaoError;
use crate::statement::StatementPlan;
use crate::types::{Dialect, RowValues};

/// Column list and VALUES terms of one inserted row.
#[derive(Debug, Default)]
pub(crate) struct InsertRow {
    pub(crate) columns: Vec<String>,
    pub(crate) terms: Vec<String>,
    pub(crate) params: Vec<RowValues>,
}

impl InsertRow {
    /// Lay out `fields`, treating the `pk` column according to `strategy`.
    pub(crate) fn build<'a>(
        fields: impl IntoIterator<Item = (&'a str, RowValues)>,
        pk: &str,
        strategy: &KeyStrategy,
    ) -> Self {
        let mut row = InsertRow::default();
        for (column, value) in fields {
            if column.eq_ignore_ascii_case(pk) {
                match strategy {
                    KeyStrategy::AutoIncrement | KeyStrategy::Trigger => continue,
                    KeyStrategy::Sequence(expr) => {
                        row.columns.push(column.to_string());
                        row.terms.push(expr.clone());
                        continue;
                    }
                    KeyStrategy::Assigned => {}
                }
            }
            row.columns.push(column.to_string());
            row.terms.push("?".to_string());
            row.params.push(value);
        }
        row
    }

    fn values_clause(&self) -> String {
        format!("({})", self.terms.join(", "))
    }
}

pub(crate) fn insert_sql(table: &str, row: InsertRow) -> Result<StatementPlan, SqlDaoError> {
    if row.columns.is_empty() {
        return Err(SqlDaoError::StatementError(format!(
            "insert into {table} has no columns"
        )));
    }
    Ok(StatementPlan {
        qmark_sql: format!(
            "INSERT INTO {table} ({}) VALUES {}",
            row.columns.join(", "),
            row.values_clause()
        ),
        params: row.params,
    })
}

/// One statement inserting every row. All rows must share the first row's columns.
pub(crate) fn insert_batch_sql(
    dialect: Dialect,
    table: &str,
    rows: Vec<InsertRow>,
) -> Result<StatementPlan, SqlDaoError> {
    let Some(first) = rows.first() else {
        return Err(SqlDaoError::InvalidUsage("batch insert needs at least one row".into()));
    };
    if first.columns.is_empty() {
        return Err(SqlDaoError::StatementError(format!(
            "insert into {table} has no columns"
        )));
    }
    let column_list = first.columns.join(", ");
    let mut params = Vec::with_capacity(rows.len() * first.columns.len());
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        values.push(row.values_clause());
        params.extend(row.params);
    }

    let sql = match dialect {
        Dialect::Oracle => {
            let mut sql = String::from("INSERT ALL");
            for clause in &values {
                sql.push_str(&format!(" INTO {table} ({column_list}) VALUES {clause}"));
            }
            sql.push_str(" SELECT 1 FROM DUAL");
            sql
        }
        _ => format!("INSERT INTO {table} ({column_list}) VALUES {}", values.join(", ")),
    };
    Ok(StatementPlan {
        qmark_sql: sql,
        params,
    })
}

/// `UPDATE table SET ... WHERE pk = ?`, the key value bound last.
pub(crate) fn update_sql<'a>(
    table: &str,
    pk: &str,
    key: RowValues,
    fields: impl IntoIterator<Item = (&'a str, RowValues)>,
) -> Result<StatementPlan, SqlDaoError> {
    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for (column, value) in fields {
        if column.eq_ignore_ascii_case(pk) {
            continue;
        }
        assignments.push(format!("{column} = ?"));
        params.push(value);
    }
    if assignments.is_empty() {
        return Err(SqlDaoError::StatementError(format!(
            "update of {table} has no columns to set"
        )));
    }
    params.push(key);
    Ok(StatementPlan {
        qmark_sql: format!("UPDATE {table} SET {} WHERE {pk} = ?", assignments.join(", ")),
        params,
    })
}

pub(crate) fn delete_sql(table: &str, pk: &str, key: RowValues) -> StatementPlan {
    StatementPlan {
        qmark_sql: format!("DELETE FROM {table} WHERE {pk} = ?"),
        params: vec![key],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(&'static str, RowValues)> {
        vec![
            ("id", RowValues::Int(0)),
            ("name", RowValues::Text("a".into())),
            ("age", RowValues::Int(3)),
        ]
    }

    #[test]
    fn insert_omits_generated_keys_and_inlines_sequences() -> Result<(), SqlDaoError> {
        let plan = insert_sql("t", InsertRow::build(fields(), "id", &KeyStrategy::AutoIncrement))?;
        assert_eq!(plan.qmark_sql, "INSERT INTO t (name, age) VALUES (?, ?)");
        assert_eq!(plan.params.len(), 2);

        let seq = KeyStrategy::Sequence("SEQ_T.NEXTVAL".into());
        let plan = insert_sql("t", InsertRow::build(fields(), "ID", &seq))?;
        assert_eq!(plan.qmark_sql, "INSERT INTO t (id, name, age) VALUES (SEQ_T.NEXTVAL, ?, ?)");
        assert_eq!(plan.params.len(), 2);

        let plan = insert_sql("t", InsertRow::build(fields(), "id", &KeyStrategy::Assigned))?;
        assert_eq!(plan.params.len(), 3);
        Ok(())
    }

    #[test]
    fn batch_insert_per_dialect() -> Result<(), SqlDaoError> {
        let rows = || {
            vec![
                InsertRow::build(fields(), "id", &KeyStrategy::AutoIncrement),
                InsertRow::build(fields(), "id", &KeyStrategy::AutoIncrement),
            ]
        };
        let plan = insert_batch_sql(Dialect::Mysql, "t", rows())?;
        assert_eq!(plan.qmark_sql, "INSERT INTO t (name, age) VALUES (?, ?), (?, ?)");
        assert_eq!(plan.params.len(), 4);

        let plan = insert_batch_sql(Dialect::Oracle, "t", rows())?;
        assert_eq!(
            plan.qmark_sql,
            "INSERT ALL INTO t (name, age) VALUES (?, ?) INTO t (name, age) VALUES (?, ?) SELECT 1 FROM DUAL"
        );
        assert!(insert_batch_sql(Dialect::Mysql, "t", Vec::new()).is_err());
        Ok(())
    }

    #[test]
    fn update_binds_key_last() -> Result<(), SqlDaoError> {
        let plan = update_sql("t", "id", RowValues::Int(9), fields())?;
        assert_eq!(plan.qmark_sql, "UPDATE t SET name = ?, age = ? WHERE id = ?");
        assert_eq!(plan.params.last(), Some(&RowValues::Int(9)));
        assert!(update_sql("t", "id", RowValues::Int(9), vec![("id", RowValues::Int(9))]).is_err());
        Ok(())
    }
}
