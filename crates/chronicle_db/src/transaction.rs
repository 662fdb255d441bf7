//! Transaction handles and ambient transaction context.
//!
//! A [`Transaction`] owns its own DuckDB session (a clone of the database
//! connection), so statements issued through it are isolated from autocommit
//! statements issued through the [`Database`](crate::Database) itself.

use crate::backend::{self, ConnectionId};
use crate::error::{DbError, Result};
use crate::value::{DbRow, DbValue, FromDbValue};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Clonable handle to an open (or finished) transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

struct TransactionInner {
    id: u64,
    connection: ConnectionId,
    session: duckdb::Connection,
    state: Cell<TransactionState>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("connection", &self.inner.connection)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && self.inner.connection == other.inner.connection
    }
}

impl Transaction {
    pub(crate) fn begin(session: duckdb::Connection, id: u64, connection: ConnectionId) -> Result<Self> {
        backend::execute_batch_on(&session, "BEGIN TRANSACTION")?;
        debug!(transaction = id, connection = %connection, "Transaction started");
        Ok(Self {
            inner: Rc::new(TransactionInner {
                id,
                connection,
                session,
                state: Cell::new(TransactionState::Active),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The connection this transaction was opened on.
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// The session statements must run on, if the transaction is still open.
    pub(crate) fn session(&self) -> Result<&duckdb::Connection> {
        if !self.is_active() {
            return Err(DbError::invalid_state(format!(
                "transaction {} is {:?}",
                self.inner.id,
                self.state()
            )));
        }
        Ok(&self.inner.session)
    }

    pub fn commit(&self) -> Result<()> {
        let session = self.session()?;
        backend::execute_batch_on(session, "COMMIT")?;
        self.inner.state.set(TransactionState::Committed);
        debug!(transaction = self.inner.id, "Transaction committed");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let session = self.session()?;
        backend::execute_batch_on(session, "ROLLBACK")?;
        self.inner.state.set(TransactionState::RolledBack);
        debug!(transaction = self.inner.id, "Transaction rolled back");
        Ok(())
    }

    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        backend::execute_on(self.session()?, sql, params)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        backend::execute_batch_on(self.session()?, sql)
    }

    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        backend::query_on(self.session()?, sql, params)
    }

    pub fn query_optional(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    pub fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T> {
        self.query_optional(sql, params)?
            .ok_or_else(|| DbError::not_found("Expected one row, got none"))?
            .get(0)
    }

    /// Bulk insert rows into a table within this transaction.
    ///
    /// Column order must match the row value order.
    pub fn bulk_insert_rows(&self, table: &str, columns: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        backend::bulk_insert_rows_on(self.session()?, table, columns, rows)
    }
}

/// Discovers "the currently active transaction" for a connection without the
/// caller passing it explicitly.
///
/// [`Database::transaction`](crate::Database::transaction) calls `enter`/`exit`
/// around its closure when a context is installed with
/// [`Database::use_namespace`](crate::Database::use_namespace).
pub trait TransactionContext {
    /// The innermost active transaction opened on `connection`, if any.
    fn current(&self, connection: ConnectionId) -> Option<Transaction>;

    fn enter(&self, transaction: &Transaction) {
        let _ = transaction;
    }

    fn exit(&self, transaction: &Transaction) {
        let _ = transaction;
    }
}

/// Stack-based [`TransactionContext`].
///
/// Clones share the same stack, so one value can be installed on several
/// databases and handed to the version layer as its namespace.
#[derive(Clone, Default)]
pub struct AmbientTransactions {
    stack: Rc<RefCell<Vec<Transaction>>>,
}

impl AmbientTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions currently entered.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }
}

impl fmt::Debug for AmbientTransactions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientTransactions")
            .field("depth", &self.depth())
            .finish()
    }
}

impl TransactionContext for AmbientTransactions {
    fn current(&self, connection: ConnectionId) -> Option<Transaction> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .find(|tx| tx.connection_id() == connection && tx.is_active())
            .cloned()
    }

    fn enter(&self, transaction: &Transaction) {
        self.stack.borrow_mut().push(transaction.clone());
    }

    fn exit(&self, transaction: &Transaction) {
        let mut stack = self.stack.borrow_mut();
        if let Some(index) = stack.iter().rposition(|tx| tx == transaction) {
            stack.remove(index);
        }
    }
}
