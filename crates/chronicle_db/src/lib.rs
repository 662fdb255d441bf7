//! Embedded model layer for Chronicle
//!
//! A small ORM over DuckDB: models with typed fields, single and bulk
//! writes, lifecycle hooks, named scopes, associations, and transactions
//! that can be passed explicitly or picked up from an ambient namespace.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronicle_db::{DataType, Database, FieldDefinition, ModelDefinition, Record, WriteOptions};
//!
//! let db = Database::open_in_memory()?;
//! let users = db.define(
//!     ModelDefinition::new("user")
//!         .with_field(FieldDefinition::new("id", DataType::BigInt).primary_key().auto_increment())
//!         .with_field(FieldDefinition::new("name", DataType::Text)),
//! )?;
//! users.sync(false)?;
//!
//! let tx = db.begin()?;
//! users.create(Record::new().with("name", "ada"), WriteOptions::new().transaction(&tx))?;
//! tx.commit()?;
//! ```
//!
//! Everything here is single-threaded (`Rc`-based): a [`Database`] and the
//! models defined on it stay on the thread that opened it.

mod backend;
mod error;
mod extensions;
mod hooks;
mod model;
mod query;
mod schema;
mod transaction;
mod value;

pub use backend::{ConnectionId, Database};
pub use error::{DbError, Result};
pub use hooks::{HookContext, HookError, HookKind, HookResult};
pub use model::{Instance, Model, ScopedModel};
pub use query::{BulkOptions, Filter, FindOptions, Order, WriteOptions};
pub use schema::{
    Accessor, Association, AssociationKind, AssociationOptions, DataType, FieldAttribute,
    FieldDefinition, ModelDefinition, ModelRef, CREATED_AT_FIELD, UPDATED_AT_FIELD,
};
pub use transaction::{AmbientTransactions, Transaction, TransactionContext, TransactionState};
pub use value::{DbRow, DbTimestamp, DbTimestampError, DbValue, FromDbValue, Record};
