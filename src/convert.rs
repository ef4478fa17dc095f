//! Pluggable substitution of scan destinations for driver-native column types.
//!
//! A rule registered for a native type name (as reported in
//! [`ColumnType::database_type_name`]) can replace the generic [`RowValues`] holder with its
//! own [`Receiver`] before the scan, then turn what that receiver collected into the final
//! value afterwards.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::driver::{ColumnType, Receiver};
use crate::error::SqlDaoError;
use crate::statement::Statement;
use crate::types::RowValues;

/// What a column is being materialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination<'a> {
    /// Rust type name of the target field or scalar.
    pub type_name: &'a str,
    /// Entity field column, `None` for scalar targets.
    pub column: Option<&'a str>,
}

/// Custom conversion for one native column type.
pub trait CustomConversion: Send + Sync {
    /// Receiver to scan this column into instead of the default holder. `Ok(None)` keeps
    /// the default handling.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConversionError` when the column cannot be handled.
    fn prepare_receiver(
        &self,
        column: &ColumnType,
        destination: Option<&Destination<'_>>,
        statement: &Statement,
    ) -> Result<Option<Box<dyn Receiver>>, SqlDaoError>;

    /// Produce the value to store from the receiver returned by
    /// [`CustomConversion::prepare_receiver`].
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConversionError` when conversion fails.
    fn finalize(
        &self,
        column: &ColumnType,
        destination: Option<&Destination<'_>>,
        temporary: Box<dyn Receiver>,
        statement: &Statement,
    ) -> Result<RowValues, SqlDaoError>;
}

/// Rule that applies to a column.
#[derive(Clone)]
pub enum ConversionRule {
    None,
    Custom(Arc<dyn CustomConversion>),
}

impl fmt::Debug for ConversionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionRule::None => f.write_str("None"),
            ConversionRule::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Rules keyed by upper-cased native type name.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    rules: HashMap<String, Arc<dyn CustomConversion>>,
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.rules.keys()).finish()
    }
}

impl ConversionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` for columns whose native type is `native_type` (case-insensitive).
    pub fn register(&mut self, native_type: &str, rule: Arc<dyn CustomConversion>) {
        self.rules.insert(native_type.trim().to_ascii_uppercase(), rule);
    }

    #[must_use]
    pub fn with_rule(mut self, native_type: &str, rule: Arc<dyn CustomConversion>) -> Self {
        self.register(native_type, rule);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn rule_for(&self, column: &ColumnType) -> ConversionRule {
        if self.rules.is_empty() {
            return ConversionRule::None;
        }
        self.rules
            .get(&column.database_type_name.trim().to_ascii_uppercase())
            .map_or(ConversionRule::None, |rule| {
                ConversionRule::Custom(Arc::clone(rule))
            })
    }
}

/// One column's pending conversion: the receiver the scan fills and the rule to finish it.
pub(crate) struct Slot {
    pub(crate) rule: Option<Arc<dyn CustomConversion>>,
}

impl Slot {
    /// Receiver for a column plus the rule that must finalize it, consulting the registry
    /// only when it has rules.
    pub(crate) fn prepare(
        registry: &ConversionRegistry,
        column: &ColumnType,
        destination: Option<&Destination<'_>>,
        statement: &Statement,
    ) -> Result<(Box<dyn Receiver>, Slot), SqlDaoError> {
        if let ConversionRule::Custom(rule) = registry.rule_for(column)
            && let Some(receiver) = rule.prepare_receiver(column, destination, statement)?
        {
            return Ok((receiver, Slot { rule: Some(rule) }));
        }
        Ok((Box::new(RowValues::Null), Slot { rule: None }))
    }

    /// Final value of a scanned column.
    pub(crate) fn finish(
        self,
        receiver: Box<dyn Receiver>,
        column: &ColumnType,
        destination: Option<&Destination<'_>>,
        statement: &Statement,
    ) -> Result<RowValues, SqlDaoError> {
        match self.rule {
            Some(rule) => rule.finalize(column, destination, receiver, statement),
            None => take_value(receiver),
        }
    }
}

/// Value held by a default [`RowValues`] receiver.
pub(crate) fn take_value(mut receiver: Box<dyn Receiver>) -> Result<RowValues, SqlDaoError> {
    receiver
        .as_any_mut()
        .downcast_mut::<RowValues>()
        .map(std::mem::take)
        .ok_or_else(|| SqlDaoError::ConversionError("receiver is not a value holder".into()))
}
