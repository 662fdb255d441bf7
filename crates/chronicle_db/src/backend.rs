//! Database connection and statement execution.
//!
//! DuckDB synchronous backend.
//! - One autocommit connection per [`Database`]
//! - Each transaction runs on its own cloned session

use crate::error::{DbError, Result};
use crate::schema::ModelDefinition;
use crate::transaction::{Transaction, TransactionContext};
use crate::value::{DbRow, DbTimestamp, DbValue, FromDbValue};
use crate::Model;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug_span, error, info};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unified database connection.
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

struct DatabaseInner {
    id: ConnectionId,
    conn: duckdb::Connection,
    namespace: RefCell<Option<Rc<dyn TransactionContext>>>,
    next_transaction: Cell<u64>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &"DuckDB")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Database {
    /// Open or create a DuckDB database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = duckdb::Connection::open(path)?;
        let db = Self::from_connection(conn);
        info!(path = %path.display(), id = %db.id(), "Opened DuckDB database");
        Ok(db)
    }

    /// Open an in-memory DuckDB database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = duckdb::Connection::open_in_memory()?;
        let db = Self::from_connection(conn);
        info!(id = %db.id(), "Opened in-memory DuckDB database");
        Ok(db)
    }

    fn from_connection(conn: duckdb::Connection) -> Self {
        Self {
            inner: Rc::new(DatabaseInner {
                id: ConnectionId::next(),
                conn,
                namespace: RefCell::new(None),
                next_transaction: Cell::new(1),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Install an ambient transaction context.
    ///
    /// Transactions opened through [`Database::transaction`] are entered into
    /// it, and model operations without an explicit transaction join the
    /// context's current transaction for this connection.
    pub fn use_namespace(&self, namespace: Rc<dyn TransactionContext>) {
        *self.inner.namespace.borrow_mut() = Some(namespace);
    }

    pub fn namespace(&self) -> Option<Rc<dyn TransactionContext>> {
        self.inner.namespace.borrow().clone()
    }

    /// Register a model on this connection. The table is not created until
    /// [`Model::sync`] is called.
    pub fn define(&self, definition: ModelDefinition) -> Result<Model> {
        Model::new(self.clone(), definition)
    }

    pub(crate) fn connection(&self) -> &duckdb::Connection {
        &self.inner.conn
    }

    /// Resolve where a statement runs: the given transaction, the ambient
    /// transaction for this connection, or the autocommit connection.
    pub(crate) fn effective_transaction(&self, explicit: Option<&Transaction>) -> Result<Option<Transaction>> {
        if let Some(tx) = explicit {
            if tx.connection_id() != self.id() {
                return Err(DbError::ForeignTransaction {
                    transaction: tx.id(),
                    owner: tx.connection_id().as_u64(),
                    connection: self.id().as_u64(),
                });
            }
            return Ok(Some(tx.clone()));
        }
        Ok(self.namespace().and_then(|ns| ns.current(self.id())))
    }

    /// Begin a transaction on a dedicated session.
    ///
    /// The caller is responsible for `commit`/`rollback`; prefer
    /// [`Database::transaction`].
    pub fn begin(&self) -> Result<Transaction> {
        let id = self.inner.next_transaction.get();
        self.inner.next_transaction.set(id + 1);
        let session = self.inner.conn.try_clone()?;
        Transaction::begin(session, id, self.id())
    }

    /// Run `op` inside a transaction.
    ///
    /// Commits when `op` returns `Ok`, rolls back when it returns `Err`.
    pub fn transaction<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction) -> std::result::Result<T, E>,
        E: From<DbError> + fmt::Display,
    {
        let tx = self.begin()?;
        let namespace = self.namespace();
        if let Some(ns) = &namespace {
            ns.enter(&tx);
        }

        let result = op(&tx);

        if let Some(ns) = &namespace {
            ns.exit(&tx);
        }

        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => match tx.rollback() {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    error!(transaction = tx.id(), error = %rollback_err, "Rollback failed");
                    Err(E::from(DbError::Transaction(format!(
                        "Transaction failed: {}; rollback failed: {}",
                        err, rollback_err
                    ))))
                }
            },
        }
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        execute_on(self.connection(), sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        execute_batch_on(self.connection(), sql)
    }

    /// Bulk insert rows into a table.
    ///
    /// Column order must match the row value order.
    pub fn bulk_insert_rows(&self, table: &str, columns: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        bulk_insert_rows_on(self.connection(), table, columns, rows)
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        query_on(self.connection(), sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    pub fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow> {
        self.query_optional(sql, params)?
            .ok_or_else(|| DbError::not_found("Expected one row, got none"))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }
}

pub(crate) fn execute_on(conn: &duckdb::Connection, sql: &str, params: &[DbValue]) -> Result<u64> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();
    let rows = stmt.execute(param_refs.as_slice())?;
    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(rows as u64)
}

pub(crate) fn execute_batch_on(conn: &duckdb::Connection, sql: &str) -> Result<()> {
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql)?;
    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(())
}

pub(crate) fn query_on(conn: &duckdb::Connection, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.query",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();

    let mut rows_iter = stmt.query(param_refs.as_slice())?;

    let (column_count, columns) = if let Some(stmt_ref) = rows_iter.as_ref() {
        let count = stmt_ref.column_count();
        let cols: Vec<String> = (0..count)
            .map(|i| {
                stmt_ref
                    .column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect();
        (count, cols)
    } else {
        return Ok(Vec::new());
    };

    let mut result = Vec::new();

    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(duckdb_value_to_db_value(row, i)?);
        }
        result.push(DbRow::new(columns.clone(), values));
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(result)
}

fn to_duckdb_params(params: &[DbValue]) -> Vec<duckdb::types::Value> {
    params
        .iter()
        .map(|p| match p {
            DbValue::Null => duckdb::types::Value::Null,
            DbValue::Integer(v) => duckdb::types::Value::BigInt(*v),
            DbValue::Real(v) => duckdb::types::Value::Double(*v),
            DbValue::Text(v) => duckdb::types::Value::Text(v.clone()),
            DbValue::Blob(v) => duckdb::types::Value::Blob(v.clone()),
            DbValue::Boolean(v) => duckdb::types::Value::Boolean(*v),
            DbValue::Timestamp(v) => {
                duckdb::types::Value::Timestamp(duckdb::types::TimeUnit::Microsecond, v.unix_micros())
            }
        })
        .collect()
}

/// Wide integer columns must fit in i64.
fn integer_column<T>(value: T, index: usize) -> Result<DbValue>
where
    T: Copy + std::fmt::Display,
    i64: TryFrom<T>,
{
    i64::try_from(value).map(DbValue::Integer).map_err(|_| {
        DbError::type_conversion(format!(
            "integer {} at column {} does not fit in i64",
            value, index
        ))
    })
}

fn duckdb_value_to_db_value(row: &duckdb::Row, index: usize) -> Result<DbValue> {
    use duckdb::types::ValueRef;

    let value = match row.get_ref(index)? {
        ValueRef::Null => DbValue::Null,
        ValueRef::Boolean(v) => DbValue::Boolean(v),
        ValueRef::TinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::SmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::Int(v) => DbValue::Integer(v as i64),
        ValueRef::BigInt(v) => DbValue::Integer(v),
        ValueRef::HugeInt(v) => integer_column(v, index)?,
        ValueRef::UTinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::USmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::UInt(v) => DbValue::Integer(v as i64),
        ValueRef::UBigInt(v) => integer_column(v, index)?,
        ValueRef::Float(v) => DbValue::Real(v as f64),
        ValueRef::Double(v) => DbValue::Real(v),
        ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => v.checked_mul(1_000_000),
                duckdb::types::TimeUnit::Millisecond => v.checked_mul(1_000),
                duckdb::types::TimeUnit::Microsecond => Some(v),
                duckdb::types::TimeUnit::Nanosecond => Some(v / 1_000),
            }
            .ok_or_else(|| {
                DbError::type_conversion(format!(
                    "timestamp at column {} out of range: {} {:?}",
                    index, v, unit
                ))
            })?;
            match DbTimestamp::from_unix_micros(micros) {
                Ok(ts) => DbValue::Timestamp(ts),
                Err(_) => DbValue::Integer(micros),
            }
        }
        other => {
            tracing::warn!(
                "DuckDB type {:?} at column {} mapped to debug string",
                std::mem::discriminant(&other),
                index
            );
            DbValue::Text(format!("{:?}", other))
        }
    };
    Ok(value)
}

const DEFAULT_MAX_PARAMS: usize = 999;

pub(crate) fn bulk_insert_rows_on(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<u64> {
    let mut total = 0;
    for_each_insert_chunk(table, columns, rows, false, |sql, params| {
        total += execute_on(conn, sql, params)?;
        Ok(())
    })?;
    Ok(total)
}

/// Multi-row INSERT with `RETURNING *`, chunked under the parameter ceiling.
pub(crate) fn insert_rows_returning_on(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<Vec<DbRow>> {
    let mut returned = Vec::with_capacity(rows.len());
    if columns.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quote_ident_path(table));
        for _ in rows {
            returned.extend(query_on(conn, &sql, &[])?);
        }
        return Ok(returned);
    }
    for_each_insert_chunk(table, columns, rows, true, |sql, params| {
        returned.extend(query_on(conn, sql, params)?);
        Ok(())
    })?;
    Ok(returned)
}

fn for_each_insert_chunk<F>(
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
    returning: bool,
    mut run: F,
) -> Result<()>
where
    F: FnMut(&str, &[DbValue]) -> Result<()>,
{
    if rows.is_empty() {
        return Ok(());
    }
    if columns.is_empty() {
        return Err(DbError::invalid_input(
            "bulk insert requires at least one column",
        ));
    }

    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(DbError::invalid_input(format!(
                "Row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
    }

    let cols_len = columns.len();
    if cols_len > DEFAULT_MAX_PARAMS {
        return Err(DbError::invalid_input(format!(
            "Too many columns ({}) for max params ({})",
            cols_len, DEFAULT_MAX_PARAMS
        )));
    }
    let rows_per_chunk = DEFAULT_MAX_PARAMS / cols_len;

    let quoted_table = quote_ident_path(table);
    let quoted_cols = columns
        .iter()
        .map(|col| quote_ident(col))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; cols_len].join(", ");
    let row_clause = format!("({})", placeholders);
    let suffix = if returning { " RETURNING *" } else { "" };

    for chunk in rows.chunks(rows_per_chunk) {
        let values_clause = std::iter::repeat(row_clause.as_str())
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}{}",
            quoted_table, quoted_cols, values_clause, suffix
        );
        let params: Vec<DbValue> = chunk.iter().flat_map(|row| row.iter().cloned()).collect();
        run(&sql, &params)?;
    }

    Ok(())
}

pub(crate) fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

pub(crate) fn quote_ident_path(path: &str) -> String {
    path.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_insert_rows_inserts_expected_rows() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id BIGINT, name TEXT)").unwrap();

        let rows = vec![
            vec![DbValue::from(1_i64), DbValue::from("alpha")],
            vec![DbValue::from(2_i64), DbValue::from("beta")],
        ];
        let inserted = db.bulk_insert_rows("t", &["id", "name"], &rows).unwrap();

        assert_eq!(inserted, 2);
        let count: i64 = db.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn bulk_insert_rows_rejects_mismatched_row_len() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id BIGINT, name TEXT)").unwrap();

        let rows = vec![
            vec![DbValue::from(1_i64)],
            vec![DbValue::from(2_i64), DbValue::from("beta")],
        ];
        let err = db.bulk_insert_rows("t", &["id", "name"], &rows).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
    }

    #[test]
    fn bulk_insert_rows_empty_is_noop() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();

        let inserted = db.bulk_insert_rows("t", &["id"], &[]).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn bulk_insert_rows_chunks_past_param_ceiling() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (a BIGINT, b BIGINT)").unwrap();

        let rows: Vec<Vec<DbValue>> = (0..1200_i64)
            .map(|i| vec![DbValue::from(i), DbValue::from(i * 2)])
            .collect();
        let inserted = db.bulk_insert_rows("t", &["a", "b"], &rows).unwrap();

        assert_eq!(inserted, 1200);
        let sum: i64 = db.query_scalar("SELECT CAST(SUM(b) AS BIGINT) FROM t", &[]).unwrap();
        assert_eq!(sum, (0..1200_i64).map(|i| i * 2).sum::<i64>());
    }

    #[test]
    fn insert_returning_yields_generated_values() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE SEQUENCE t_id_seq; CREATE TABLE t (id BIGINT PRIMARY KEY DEFAULT nextval('t_id_seq'), name TEXT)",
        )
        .unwrap();

        let rows = vec![vec![DbValue::from("a")], vec![DbValue::from("b")]];
        let returned = insert_rows_returning_on(db.connection(), "t", &["name"], &rows).unwrap();

        assert_eq!(returned.len(), 2);
        let ids: Vec<i64> = returned.iter().map(|r| r.get_by_name("id").unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();

        let result: Result<()> = db.transaction(|tx| {
            tx.execute("INSERT INTO t VALUES (?)", &[DbValue::from(1_i64)])?;
            Err(DbError::invalid_state("boom"))
        });

        assert!(result.is_err());
        let count: i64 = db.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_commits_on_success() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();

        let tx_id: u64 = db
            .transaction(|tx| -> Result<u64> {
                tx.execute("INSERT INTO t VALUES (?)", &[DbValue::from(1_i64)])?;
                Ok(tx.id())
            })
            .unwrap();

        assert_eq!(tx_id, 1);
        let count: i64 = db.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn finished_transaction_rejects_statements() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().unwrap();
        tx.commit().unwrap();

        let err = tx.execute("SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
    }

    #[test]
    fn foreign_transaction_is_rejected() {
        let a = Database::open_in_memory().unwrap();
        let b = Database::open_in_memory().unwrap();
        let tx = a.begin().unwrap();

        let err = b.effective_transaction(Some(&tx)).unwrap_err();
        assert!(matches!(err, DbError::ForeignTransaction { .. }));
        tx.rollback().unwrap();
    }
}
