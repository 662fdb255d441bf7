//! Query filters and per-call options.

use crate::transaction::Transaction;
use crate::value::{DbValue, Record};

/// Conjunction of field equality conditions. `Null` compares with IS NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Record,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an equality condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.conditions.insert(field, value);
        self
    }

    /// Compose with `overrides`; conditions on the same field take the
    /// override's value.
    pub fn merged(&self, overrides: &Filter) -> Filter {
        let mut conditions = self.conditions.clone();
        conditions.merge(&overrides.conditions);
        Filter { conditions }
    }

    pub fn get(&self, field: &str) -> Option<&DbValue> {
        self.conditions.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.conditions.iter()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl From<Record> for Filter {
    fn from(conditions: Record) -> Self {
        Self { conditions }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Options for `find_all` / `find_one` / `count`.
///
/// Without an explicit order, results are ordered by primary key.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Filter,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub transaction: Option<Transaction>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Shorthand for adding one equality condition.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.filter = self.filter.eq(field, value);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }
}

/// Options for single-row writes (`create`, `bulk_create`, `update`,
/// `destroy`, `upsert`).
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub transaction: Option<Transaction>,
    /// Store values as given, skipping field setters
    pub raw: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    pub fn with_transaction(mut self, transaction: Option<Transaction>) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

/// Options for filter-driven writes (`bulk_update`, `bulk_destroy`).
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
    pub filter: Filter,
    pub transaction: Option<Transaction>,
    /// Fetch affected rows and fire per-row update/destroy hooks as well
    pub individual_hooks: bool,
}

impl BulkOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    pub fn individual_hooks(mut self) -> Self {
        self.individual_hooks = true;
        self
    }
}
