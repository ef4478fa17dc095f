use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use super::{Column, Entity};
use crate::error::SqlDaoError;
use crate::types::{Dialect, RowValues};

type CacheMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

static DESCRIPTORS: LazyLock<RwLock<CacheMap>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// How the primary key gets its value on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The caller supplies the key; it is inserted like any other column.
    Assigned,
    /// The database generates the key; the column is left out and read back.
    AutoIncrement,
    /// The key column is filled from this sequence expression, e.g. `SEQ_USER.NEXTVAL`.
    Sequence(String),
    /// A trigger fills the key; handled like [`KeyStrategy::AutoIncrement`].
    Trigger,
}

impl KeyStrategy {
    /// Pick the strategy for a key given the dialect's sequence entry and the current value.
    #[must_use]
    pub fn resolve(sequence: Option<&str>, key: &RowValues) -> Self {
        match sequence {
            Some(expr) if expr.trim().is_empty() => KeyStrategy::Trigger,
            Some(expr) => KeyStrategy::Sequence(expr.trim().to_string()),
            None if matches!(key, RowValues::Int(0) | RowValues::Null) => {
                KeyStrategy::AutoIncrement
            }
            None => KeyStrategy::Assigned,
        }
    }

    /// Whether the generated key must be read back after the insert.
    #[must_use]
    pub fn reads_back(&self) -> bool {
        !matches!(self, KeyStrategy::Assigned)
    }
}

/// Immutable column mapping for one entity type.
pub struct EntityDescriptor<E> {
    table: &'static str,
    pk_column: &'static str,
    pk_index: Option<usize>,
    columns: Vec<Column<E>>,
    by_name: HashMap<String, usize>,
    sequences: HashMap<Dialect, &'static str>,
}

impl<E> std::fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("table", &self.table)
            .field("pk_column", &self.pk_column)
            .field("columns", &self.columns)
            .field("sequences", &self.sequences)
            .finish()
    }
}

impl<E: Entity> EntityDescriptor<E> {
    fn build() -> Result<Self, SqlDaoError> {
        let type_name = std::any::type_name::<E>();
        let table = E::table_name();
        if table.trim().is_empty() {
            return Err(SqlDaoError::InvalidUsage(format!(
                "{type_name} declares an empty table name"
            )));
        }
        let columns = E::columns();
        if columns.is_empty() {
            return Err(SqlDaoError::InvalidUsage(format!(
                "{type_name} declares no mapped columns"
            )));
        }

        let mut by_name = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if by_name.insert(column.name().to_ascii_lowercase(), idx).is_some() {
                return Err(SqlDaoError::InvalidUsage(format!(
                    "{type_name} maps column '{}' more than once",
                    column.name()
                )));
            }
        }

        let pk_column = E::pk_column();
        let pk_index = by_name.get(&pk_column.to_ascii_lowercase()).copied();
        let sequences = E::pk_sequences().iter().copied().collect();

        tracing::debug!(entity = type_name, table, columns = columns.len(), "entity described");
        Ok(Self {
            table,
            pk_column,
            pk_index,
            columns,
            by_name,
            sequences,
        })
    }
}

impl<E> EntityDescriptor<E> {
    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    #[must_use]
    pub fn pk_column(&self) -> &'static str {
        self.pk_column
    }

    /// Position of the key among [`EntityDescriptor::columns`], `None` if the key is unmapped.
    #[must_use]
    pub fn pk_index(&self) -> Option<usize> {
        self.pk_index
    }

    #[must_use]
    pub fn columns(&self) -> &[Column<E>] {
        &self.columns
    }

    /// Index of the column named `name`, compared case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn sequence(&self, dialect: Dialect) -> Option<&'static str> {
        self.sequences.get(&dialect).copied()
    }

    /// The mapped key column.
    ///
    /// # Errors
    /// Returns `SqlDaoError::InvalidUsage` when the key column is not mapped.
    pub fn pk(&self) -> Result<&Column<E>, SqlDaoError> {
        self.pk_index
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| {
                SqlDaoError::InvalidUsage(format!(
                    "table {} has no mapped primary key column '{}'",
                    self.table, self.pk_column
                ))
            })
    }

    /// Key strategy for inserting `entity` under `dialect`.
    ///
    /// # Errors
    /// Returns `SqlDaoError::InvalidUsage` when the key column is not mapped.
    pub fn key_strategy(&self, dialect: Dialect, entity: &E) -> Result<KeyStrategy, SqlDaoError> {
        let key = self.pk()?.get(entity);
        Ok(KeyStrategy::resolve(self.sequence(dialect), &key))
    }
}

/// Descriptor for `E`, built on first use and shared afterwards.
///
/// Concurrent first calls for the same type build the descriptor once; every caller receives
/// the same `Arc`.
///
/// # Errors
/// Returns `SqlDaoError::InvalidUsage` when `E` declares no columns, an empty table name or a
/// column twice. Failed builds are not cached.
pub fn describe<E: Entity>() -> Result<Arc<EntityDescriptor<E>>, SqlDaoError> {
    let key = TypeId::of::<E>();
    let cached = match DESCRIPTORS.read() {
        Ok(guard) => guard.get(&key).cloned(),
        Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
    };
    if let Some(found) = cached {
        return downcast(found);
    }

    let mut cache = match DESCRIPTORS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(found) = cache.get(&key).cloned() {
        return downcast(found);
    }
    let built = Arc::new(EntityDescriptor::<E>::build()?);
    cache.insert(key, Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
    Ok(built)
}

fn downcast<E: Entity>(
    found: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<EntityDescriptor<E>>, SqlDaoError> {
    found.downcast::<EntityDescriptor<E>>().map_err(|_| {
        SqlDaoError::InvalidUsage(format!(
            "descriptor cache holds a foreign entry for {}",
            std::any::type_name::<E>()
        ))
    })
}
