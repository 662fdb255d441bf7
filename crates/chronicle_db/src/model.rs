//! Models: registered schemas with CRUD, scopes and lifecycle hooks.
//!
//! Every mutation resolves the statement target first (explicit transaction,
//! then the ambient transaction for the connection, then autocommit), runs
//! its SQL there, and only then fires the `after_*` hooks with the same
//! transaction. A failing hook turns into [`DbError::Hook`] and is returned
//! to the caller, who rolls back if a transaction was open.

use crate::backend::{self, quote_ident, quote_ident_path, Database};
use crate::error::{DbError, Result};
use crate::extensions::Extensions;
use crate::hooks::{HookContext, HookKind, HookRegistry, HookResult};
use crate::query::{BulkOptions, Filter, FindOptions, Order, WriteOptions};
use crate::schema::{
    Association, AssociationKind, AssociationOptions, FieldDefinition, ModelDefinition, ModelRef,
    CREATED_AT_FIELD, UPDATED_AT_FIELD,
};
use crate::transaction::Transaction;
use crate::value::{DbRow, DbTimestamp, DbValue, FromDbValue, Record};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, trace};

/// Handle to a model registered on a [`Database`]. Cheap to clone.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

struct ModelInner {
    db: Database,
    definition: ModelDefinition,
    hooks: RefCell<HookRegistry>,
    scopes: RefCell<Vec<(String, Filter)>>,
    associations: RefCell<Vec<Association>>,
    extensions: RefCell<Extensions>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("table", &self.qualified_table())
            .field("database", &self.inner.db)
            .finish()
    }
}

impl Model {
    pub(crate) fn new(db: Database, definition: ModelDefinition) -> Result<Self> {
        if definition.name.is_empty() {
            return Err(DbError::invalid_input("model name must not be empty"));
        }
        let definition = definition.normalized();
        {
            let mut seen = HashSet::new();
            for field in &definition.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(DbError::invalid_input(format!(
                        "duplicate field '{}' on model {}",
                        field.name, definition.name
                    )));
                }
            }
        }

        debug!(
            model = %definition.name,
            table = %definition.qualified_table(),
            fields = definition.fields.len(),
            "Model defined"
        );

        Ok(Self {
            inner: Rc::new(ModelInner {
                db,
                definition,
                hooks: RefCell::new(HookRegistry::default()),
                scopes: RefCell::new(Vec::new()),
                associations: RefCell::new(Vec::new()),
                extensions: RefCell::new(Extensions::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.definition.name
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.inner.definition
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.inner.definition.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.inner.definition.get_field(name)
    }

    /// Table name without schema.
    pub fn table_name(&self) -> &str {
        self.inner.definition.table()
    }

    pub fn schema(&self) -> Option<&str> {
        self.inner.definition.schema.as_deref()
    }

    pub fn qualified_table(&self) -> String {
        self.inner.definition.qualified_table()
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn primary_keys(&self) -> Vec<&FieldDefinition> {
        self.inner.definition.primary_keys()
    }

    /// Whether both handles point at the same registered model.
    pub fn is_same(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            name: self.name().to_string(),
            table: self.qualified_table(),
            primary_key: self
                .primary_keys()
                .first()
                .map(|f| f.column_name().to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Associations
    // ------------------------------------------------------------------

    pub fn associate(&self, kind: AssociationKind, target: &Model, options: AssociationOptions) {
        self.associate_ref(kind, target.model_ref(), options);
    }

    /// Declare an association against a plain target reference.
    pub fn associate_ref(&self, kind: AssociationKind, target: ModelRef, options: AssociationOptions) {
        debug!(model = %self.name(), target = %target.name, kind = %kind, "Association declared");
        self.inner.associations.borrow_mut().push(Association {
            kind,
            target,
            options,
        });
    }

    pub fn belongs_to(&self, target: &Model, options: AssociationOptions) {
        self.associate(AssociationKind::BelongsTo, target, options);
    }

    pub fn has_one(&self, target: &Model, options: AssociationOptions) {
        self.associate(AssociationKind::HasOne, target, options);
    }

    pub fn has_many(&self, target: &Model, options: AssociationOptions) {
        self.associate(AssociationKind::HasMany, target, options);
    }

    pub fn belongs_to_many(&self, target: &Model, options: AssociationOptions) {
        self.associate(AssociationKind::BelongsToMany, target, options);
    }

    pub fn associations(&self) -> Vec<Association> {
        self.inner.associations.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Hooks, scopes, extensions
    // ------------------------------------------------------------------

    /// Register a hook. Hooks of the same kind fire in registration order.
    pub fn add_hook<F>(&self, kind: HookKind, hook: F)
    where
        F: Fn(&HookContext<'_>) -> HookResult + 'static,
    {
        self.inner.hooks.borrow_mut().add(kind, Rc::new(hook));
    }

    pub fn hook_count(&self, kind: HookKind) -> usize {
        self.inner.hooks.borrow().count(kind)
    }

    /// Register (or replace) a named filter.
    pub fn add_scope(&self, name: impl Into<String>, filter: Filter) {
        let name = name.into();
        let mut scopes = self.inner.scopes.borrow_mut();
        match scopes.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = filter,
            None => scopes.push((name, filter)),
        }
    }

    pub fn scope(&self, name: &str) -> Result<ScopedModel> {
        let filter = self
            .inner
            .scopes
            .borrow()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, filter)| filter.clone())
            .ok_or_else(|| DbError::UnknownScope {
                model: self.name().to_string(),
                scope: name.to_string(),
            })?;
        Ok(ScopedModel {
            model: self.clone(),
            name: name.to_string(),
            filter,
        })
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.inner
            .scopes
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Attach a capability to this model. Returns `false` (and keeps the
    /// existing value) if one of the same type is already attached.
    pub fn insert_extension<T: 'static>(&self, value: T) -> bool {
        self.inner.extensions.borrow_mut().insert_if_absent(value)
    }

    pub fn extension<T: 'static>(&self) -> Option<Rc<T>> {
        self.inner.extensions.borrow().get::<T>()
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    pub fn create_table_sql(&self) -> String {
        self.inner
            .definition
            .create_table_sql(&self.inner.associations.borrow())
    }

    /// Create the schema namespace, sequences and table. `force` drops the
    /// table and its sequences first.
    pub fn sync(&self, force: bool) -> Result<()> {
        let definition = &self.inner.definition;
        let db = &self.inner.db;
        let table = quote_ident_path(&definition.qualified_table());

        if let Some(schema) = definition.schema.as_deref().filter(|s| !s.is_empty()) {
            db.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))?;
        }
        if force {
            db.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
            for sequence in definition.sequences() {
                db.execute_batch(&format!("DROP SEQUENCE IF EXISTS {}", quote_ident_path(&sequence)))?;
            }
        }
        for sequence in definition.sequences() {
            db.execute_batch(&format!(
                "CREATE SEQUENCE IF NOT EXISTS {}",
                quote_ident_path(&sequence)
            ))?;
        }
        db.execute_batch(&self.create_table_sql())?;

        info!(model = %self.name(), table = %definition.qualified_table(), force, "Model synced");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert one row. Fires `after_create` then `after_save`.
    pub fn create(&self, values: Record, options: WriteOptions) -> Result<Instance> {
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let record = self.prepare_insert(&values, options.raw, &DbTimestamp::now());

        let row = self
            .run(&tx, |conn| self.insert_records(conn, std::slice::from_ref(&record)))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DbError::not_found(format!("insert into {} returned no row", self.qualified_table()))
            })?;
        let instance = self.instance_from_row(row);

        let instances = std::slice::from_ref(&instance);
        self.fire(&self.instance_context(HookKind::AfterCreate, tx.as_ref(), instances))?;
        self.fire(&self.instance_context(HookKind::AfterSave, tx.as_ref(), instances))?;
        Ok(instance)
    }

    /// Insert many rows in one statement (chunked). Fires `after_bulk_create`
    /// once with every inserted instance.
    pub fn bulk_create(&self, records: Vec<Record>, options: WriteOptions) -> Result<Vec<Instance>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let now = DbTimestamp::now();
        let prepared: Vec<Record> = records
            .iter()
            .map(|values| self.prepare_insert(values, options.raw, &now))
            .collect();

        let instances: Vec<Instance> = self
            .run(&tx, |conn| self.insert_records(conn, &prepared))?
            .into_iter()
            .map(|row| self.instance_from_row(row))
            .collect();

        self.fire(&self.instance_context(HookKind::AfterBulkCreate, tx.as_ref(), &instances))?;
        Ok(instances)
    }

    /// Update one persisted instance by primary key. Fires `after_update`
    /// then `after_save` with the refreshed instance.
    pub fn update(&self, instance: &Instance, changes: Record, options: WriteOptions) -> Result<Instance> {
        let identity = self.identity_filter(instance)?;
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let set = self.prepare_update(&changes, options.raw, &DbTimestamp::now());
        if set.is_empty() {
            return Ok(instance.clone());
        }

        let refreshed = self.run(&tx, |conn| {
            let affected = self.update_rows(conn, &set, &identity)?;
            if affected == 0 {
                return Err(self.missing_row(&identity));
            }
            self.select_rows(conn, &self.moved_identity(&identity, &set), &[], Some(1))
        })?;
        let updated = refreshed
            .into_iter()
            .next()
            .map(|row| self.instance_from_row(row))
            .ok_or_else(|| self.missing_row(&identity))?;

        let instances = std::slice::from_ref(&updated);
        self.fire(&self.instance_context(HookKind::AfterUpdate, tx.as_ref(), instances))?;
        self.fire(&self.instance_context(HookKind::AfterSave, tx.as_ref(), instances))?;
        Ok(updated)
    }

    /// Delete one persisted instance by primary key. Fires `after_destroy`
    /// with the instance's last known state.
    pub fn destroy(&self, instance: &Instance, options: WriteOptions) -> Result<()> {
        let identity = self.identity_filter(instance)?;
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;

        let affected = self.run(&tx, |conn| self.delete_rows(conn, &identity))?;
        if affected == 0 {
            return Err(self.missing_row(&identity));
        }

        self.fire(&self.instance_context(
            HookKind::AfterDestroy,
            tx.as_ref(),
            std::slice::from_ref(instance),
        ))
    }

    /// Update every row matching the filter. Fires `after_bulk_update`; with
    /// `individual_hooks`, also `after_update` once per affected row.
    pub fn bulk_update(&self, changes: Record, options: BulkOptions) -> Result<u64> {
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let set = self.prepare_update(&changes, false, &DbTimestamp::now());
        if set.is_empty() {
            return Ok(0);
        }

        let (affected, updated) = self.run(&tx, |conn| {
            let before = if options.individual_hooks {
                self.select_rows(conn, &options.filter, &[], None)?
            } else {
                Vec::new()
            };
            let affected = self.update_rows(conn, &set, &options.filter)?;

            let mut updated = Vec::with_capacity(before.len());
            for row in before {
                let previous = self.instance_from_row(row);
                if self.primary_keys().is_empty() {
                    let mut values = previous.values;
                    values.merge(&set);
                    updated.push(Instance::new(self.clone(), values));
                    continue;
                }
                let identity = self.moved_identity(&self.identity_filter(&previous)?, &set);
                if let Some(row) = self.select_rows(conn, &identity, &[], Some(1))?.into_iter().next() {
                    updated.push(self.instance_from_row(row));
                }
            }
            Ok((affected, updated))
        })?;

        for instance in &updated {
            self.fire(&self.instance_context(
                HookKind::AfterUpdate,
                tx.as_ref(),
                std::slice::from_ref(instance),
            ))?;
        }
        self.fire(&HookContext {
            kind: HookKind::AfterBulkUpdate,
            model: self,
            instances: &[],
            transaction: tx.as_ref(),
            filter: Some(&options.filter),
            values: Some(&set),
            individual_hooks: options.individual_hooks,
        })?;
        Ok(affected)
    }

    /// Delete every row matching the filter. Fires `after_bulk_destroy`; with
    /// `individual_hooks`, also `after_destroy` once per deleted row.
    pub fn bulk_destroy(&self, options: BulkOptions) -> Result<u64> {
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;

        let (affected, removed) = self.run(&tx, |conn| {
            let removed: Vec<Instance> = if options.individual_hooks {
                self.select_rows(conn, &options.filter, &[], None)?
                    .into_iter()
                    .map(|row| self.instance_from_row(row))
                    .collect()
            } else {
                Vec::new()
            };
            let affected = self.delete_rows(conn, &options.filter)?;
            Ok((affected, removed))
        })?;

        for instance in &removed {
            self.fire(&self.instance_context(
                HookKind::AfterDestroy,
                tx.as_ref(),
                std::slice::from_ref(instance),
            ))?;
        }
        self.fire(&HookContext {
            kind: HookKind::AfterBulkDestroy,
            model: self,
            instances: &[],
            transaction: tx.as_ref(),
            filter: Some(&options.filter),
            values: None,
            individual_hooks: options.individual_hooks,
        })?;
        Ok(affected)
    }

    /// Insert or update by primary key. Fires `after_upsert` with the values
    /// only; no instance is materialized.
    pub fn upsert(&self, values: Record, options: WriteOptions) -> Result<()> {
        let primary_keys = self.primary_keys();
        if primary_keys.is_empty() {
            return Err(DbError::invalid_input(format!(
                "upsert requires a primary key on model {}",
                self.name()
            )));
        }
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let record = self.prepare_insert(&values, options.raw, &DbTimestamp::now());
        if let Some(missing) = primary_keys.iter().find(|f| !record.contains(&f.name)) {
            return Err(DbError::invalid_input(format!(
                "upsert on {} is missing primary key '{}'",
                self.name(),
                missing.name
            )));
        }

        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        let mut updates = Vec::new();
        for (name, value) in record.iter() {
            let column = quote_ident(self.column_for(name)?);
            let is_key = primary_keys.iter().any(|f| f.name == name);
            let is_creation_stamp = name == CREATED_AT_FIELD && self.is_timestamp_field(name);
            if !is_key && !is_creation_stamp {
                updates.push(format!("{} = EXCLUDED.{}", column, column));
            }
            columns.push(column);
            params.push(value.clone());
        }
        let conflict = primary_keys
            .iter()
            .map(|f| quote_ident(f.column_name()))
            .collect::<Vec<_>>()
            .join(", ");
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            quote_ident_path(&self.qualified_table()),
            columns.join(", "),
            vec!["?"; columns.len()].join(", "),
            conflict,
            action
        );

        self.run(&tx, |conn| backend::execute_on(conn, &sql, &params))?;

        self.fire(&HookContext {
            kind: HookKind::AfterUpsert,
            model: self,
            instances: &[],
            transaction: tx.as_ref(),
            filter: None,
            values: Some(&record),
            individual_hooks: false,
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn find_all(&self, options: FindOptions) -> Result<Vec<Instance>> {
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let rows = self.run(&tx, |conn| {
            self.select_rows(conn, &options.filter, &options.order, options.limit)
        })?;
        Ok(rows.into_iter().map(|row| self.instance_from_row(row)).collect())
    }

    pub fn find_one(&self, options: FindOptions) -> Result<Option<Instance>> {
        let options = options.limit(1);
        Ok(self.find_all(options)?.into_iter().next())
    }

    pub fn count(&self, options: FindOptions) -> Result<i64> {
        let tx = self.inner.db.effective_transaction(options.transaction.as_ref())?;
        let mut params = Vec::new();
        let where_sql = self.where_clause(&options.filter, &mut params)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_ident_path(&self.qualified_table()),
            where_sql
        );
        let row = self
            .run(&tx, |conn| backend::query_on(conn, &sql, &params))?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("COUNT returned no row"))?;
        row.get(0)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn run<T>(
        &self,
        tx: &Option<Transaction>,
        op: impl FnOnce(&duckdb::Connection) -> Result<T>,
    ) -> Result<T> {
        match tx {
            Some(tx) => op(tx.session()?),
            None => op(self.inner.db.connection()),
        }
    }

    fn instance_context<'a>(
        &'a self,
        kind: HookKind,
        transaction: Option<&'a Transaction>,
        instances: &'a [Instance],
    ) -> HookContext<'a> {
        HookContext {
            kind,
            model: self,
            instances,
            transaction,
            filter: None,
            values: None,
            individual_hooks: false,
        }
    }

    fn fire(&self, ctx: &HookContext<'_>) -> Result<()> {
        // Snapshot first so hooks may register hooks or query this model.
        let hooks = self.inner.hooks.borrow().for_kind(ctx.kind);
        for hook in hooks {
            hook(ctx).map_err(|source| DbError::Hook {
                hook: ctx.kind,
                source,
            })?;
        }
        Ok(())
    }

    fn column_for(&self, field: &str) -> Result<&str> {
        self.field(field)
            .map(|f| f.column_name())
            .ok_or_else(|| {
                DbError::invalid_input(format!("unknown field '{}' on model {}", field, self.name()))
            })
    }

    fn is_timestamp_field(&self, name: &str) -> bool {
        self.inner.definition.timestamps && (name == CREATED_AT_FIELD || name == UPDATED_AT_FIELD)
    }

    fn prepare_insert(&self, values: &Record, raw: bool, now: &DbTimestamp) -> Record {
        let mut prepared = Record::new();
        for field in self.fields() {
            let value = match values.get(&field.name) {
                Some(value) if raw => Some(value.clone()),
                Some(value) => Some(field.apply_setter(value)),
                None if self.is_timestamp_field(&field.name) => Some(DbValue::Timestamp(now.clone())),
                None => field.default_value.clone(),
            };
            if let Some(value) = value {
                prepared.insert(field.name.clone(), value);
            }
        }
        for unknown in values.fields().filter(|name| self.field(name).is_none()) {
            trace!(model = %self.name(), field = unknown, "Ignoring unknown field");
        }
        prepared
    }

    fn prepare_update(&self, changes: &Record, raw: bool, now: &DbTimestamp) -> Record {
        let mut prepared = Record::new();
        for (name, value) in changes.iter() {
            let Some(field) = self.field(name) else {
                trace!(model = %self.name(), field = name, "Ignoring unknown field");
                continue;
            };
            let value = if raw { value.clone() } else { field.apply_setter(value) };
            prepared.insert(name, value);
        }
        if !prepared.is_empty()
            && self.is_timestamp_field(UPDATED_AT_FIELD)
            && !changes.contains(UPDATED_AT_FIELD)
        {
            prepared.insert(UPDATED_AT_FIELD, now.clone());
        }
        prepared
    }

    fn identity_filter(&self, instance: &Instance) -> Result<Filter> {
        let primary_keys = self.primary_keys();
        if primary_keys.is_empty() {
            return Err(DbError::invalid_input(format!(
                "model {} has no primary key",
                self.name()
            )));
        }
        let mut filter = Filter::new();
        for field in primary_keys {
            let value = instance.get_raw(&field.name).cloned().unwrap_or(DbValue::Null);
            filter = filter.eq(field.name.clone(), value);
        }
        Ok(filter)
    }

    /// Identity after an update that may have changed key fields.
    fn moved_identity(&self, identity: &Filter, set: &Record) -> Filter {
        let mut moved = identity.clone();
        for (name, _) in identity.iter() {
            if let Some(value) = set.get(name) {
                moved = moved.eq(name, value.clone());
            }
        }
        moved
    }

    fn missing_row(&self, identity: &Filter) -> DbError {
        DbError::not_found(format!("{} row matching {:?}", self.name(), identity))
    }

    fn where_clause(&self, filter: &Filter, params: &mut Vec<DbValue>) -> Result<String> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        let mut conditions = Vec::with_capacity(filter.len());
        for (field, value) in filter.iter() {
            let column = quote_ident(self.column_for(field)?);
            if value.is_null() {
                conditions.push(format!("{} IS NULL", column));
            } else {
                conditions.push(format!("{} = ?", column));
                params.push(value.clone());
            }
        }
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    fn order_clause(&self, order: &[Order]) -> Result<String> {
        let keys: Vec<String> = if order.is_empty() {
            self.primary_keys()
                .iter()
                .map(|f| quote_ident(f.column_name()))
                .collect()
        } else {
            order
                .iter()
                .map(|o| {
                    let column = quote_ident(self.column_for(&o.field)?);
                    Ok(if o.descending {
                        format!("{} DESC", column)
                    } else {
                        column
                    })
                })
                .collect::<Result<_>>()?
        };
        if keys.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }

    fn select_rows(
        &self,
        conn: &duckdb::Connection,
        filter: &Filter,
        order: &[Order],
        limit: Option<usize>,
    ) -> Result<Vec<DbRow>> {
        let mut params = Vec::new();
        let where_sql = self.where_clause(filter, &mut params)?;
        let order_sql = self.order_clause(order)?;
        let limit_sql = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let sql = format!(
            "SELECT * FROM {}{}{}{}",
            quote_ident_path(&self.qualified_table()),
            where_sql,
            order_sql,
            limit_sql
        );
        backend::query_on(conn, &sql, &params)
    }

    fn insert_records(&self, conn: &duckdb::Connection, records: &[Record]) -> Result<Vec<DbRow>> {
        let columns: Vec<&FieldDefinition> = self
            .fields()
            .iter()
            .filter(|f| records.iter().any(|r| r.contains(&f.name)))
            .collect();
        let column_names: Vec<&str> = columns.iter().map(|f| f.column_name()).collect();
        let rows: Vec<Vec<DbValue>> = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|f| {
                        record
                            .get(&f.name)
                            .cloned()
                            .or_else(|| f.default_value.clone())
                            .unwrap_or(DbValue::Null)
                    })
                    .collect()
            })
            .collect();
        backend::insert_rows_returning_on(conn, &self.qualified_table(), &column_names, &rows)
    }

    fn update_rows(&self, conn: &duckdb::Connection, set: &Record, filter: &Filter) -> Result<u64> {
        let mut params = Vec::with_capacity(set.len() + filter.len());
        let mut assignments = Vec::with_capacity(set.len());
        for (name, value) in set.iter() {
            assignments.push(format!("{} = ?", quote_ident(self.column_for(name)?)));
            params.push(value.clone());
        }
        let where_sql = self.where_clause(filter, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {}{}",
            quote_ident_path(&self.qualified_table()),
            assignments.join(", "),
            where_sql
        );
        backend::execute_on(conn, &sql, &params)
    }

    fn delete_rows(&self, conn: &duckdb::Connection, filter: &Filter) -> Result<u64> {
        let mut params = Vec::new();
        let where_sql = self.where_clause(filter, &mut params)?;
        let sql = format!(
            "DELETE FROM {}{}",
            quote_ident_path(&self.qualified_table()),
            where_sql
        );
        backend::execute_on(conn, &sql, &params)
    }

    fn instance_from_row(&self, row: DbRow) -> Instance {
        let values = row
            .into_pairs()
            .map(|(column, value)| {
                let name = self
                    .fields()
                    .iter()
                    .find(|f| f.column_name() == column)
                    .map(|f| f.name.clone())
                    .unwrap_or(column);
                (name, value)
            })
            .collect::<Record>();
        Instance::new(self.clone(), values)
    }
}

/// A model narrowed by a registered scope.
#[derive(Debug, Clone)]
pub struct ScopedModel {
    model: Model,
    name: String,
    filter: Filter,
}

impl ScopedModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Caller conditions are composed with the scope's; on the same field
    /// the caller wins.
    pub fn find_all(&self, options: FindOptions) -> Result<Vec<Instance>> {
        self.model.find_all(self.narrow(options))
    }

    pub fn find_one(&self, options: FindOptions) -> Result<Option<Instance>> {
        self.model.find_one(self.narrow(options))
    }

    pub fn count(&self, options: FindOptions) -> Result<i64> {
        self.model.count(self.narrow(options))
    }

    fn narrow(&self, options: FindOptions) -> FindOptions {
        FindOptions {
            filter: self.filter.merged(&options.filter),
            ..options
        }
    }
}

/// A persisted row of a model.
#[derive(Clone)]
pub struct Instance {
    model: Model,
    values: Record,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .finish()
    }
}

impl Instance {
    pub(crate) fn new(model: Model, values: Record) -> Self {
        Self { model, values }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Field value as presented by the field's getter.
    pub fn get(&self, field: &str) -> Option<DbValue> {
        let value = self.values.get(field)?;
        Some(match self.model.field(field) {
            Some(definition) => definition.apply_getter(value),
            None => value.clone(),
        })
    }

    /// Typed read through the field's getter.
    pub fn get_as<T: FromDbValue>(&self, field: &str) -> Result<T> {
        let value = self
            .get(field)
            .ok_or_else(|| DbError::type_conversion(format!("Field '{}' not present", field)))?;
        T::from_db_value(&value)
    }

    /// Stored value, bypassing getters.
    pub fn get_raw(&self, field: &str) -> Option<&DbValue> {
        self.values.get(field)
    }

    /// Stored values, bypassing getters.
    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Primary key values; empty when the model declares no primary key.
    pub fn primary_key(&self) -> Record {
        self.model
            .primary_keys()
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    self.values.get(&f.name).cloned().unwrap_or(DbValue::Null),
                )
            })
            .collect()
    }

    pub fn update(&self, changes: Record, options: WriteOptions) -> Result<Instance> {
        self.model.update(self, changes, options)
    }

    pub fn destroy(&self, options: WriteOptions) -> Result<()> {
        self.model.destroy(self, options)
    }

    /// JSON rendering with getters applied.
    pub fn to_json(&self) -> serde_json::Value {
        let presented: Record = self
            .values
            .fields()
            .filter_map(|name| self.get(name).map(|value| (name.to_string(), value)))
            .collect();
        presented.to_json()
    }
}
