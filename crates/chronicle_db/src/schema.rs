//! Model schema definitions and table DDL.
//!
//! A [`ModelDefinition`] is the introspectable description of a model: its
//! name, table, namespace and typed field map. All CREATE statements are
//! rendered from it here.

use crate::backend::{quote_ident, quote_ident_path};
use crate::value::DbValue;
use std::fmt;
use std::rc::Rc;

/// Name of the creation bookkeeping field added when `timestamps` is on.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Name of the modification bookkeeping field added when `timestamps` is on.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// 64-bit signed integer
    BigInt,
    /// 32-bit signed integer
    Integer,
    /// 64-bit floating point
    Double,
    /// UTF-8 string
    #[default]
    Text,
    Boolean,
    /// Timestamp (UTC, microsecond precision)
    Timestamp,
    /// Binary data
    Blob,
}

impl DataType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Integer => "INTEGER",
            Self::Double => "DOUBLE",
            Self::Text => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Blob => "BLOB",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// Custom getter or setter applied to a field value.
pub type Accessor = Rc<dyn Fn(&DbValue) -> DbValue>;

/// Individually copyable pieces of field metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldAttribute {
    Type,
    Field,
    Get,
    Set,
    PrimaryKey,
    AutoIncrement,
    AllowNull,
    Unique,
    DefaultValue,
}

/// A named, typed field of a model.
#[derive(Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub data_type: DataType,
    /// Storage column name, when it differs from `name`
    pub field: Option<String>,
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub allow_null: bool,
    pub unique: bool,
    pub default_value: Option<DbValue>,
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("field", &self.field)
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .field("allow_null", &self.allow_null)
            .field("unique", &self.unique)
            .field("default_value", &self.default_value)
            .finish()
    }
}

impl FieldDefinition {
    /// A nullable field with no constraints.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            field: None,
            getter: None,
            setter: None,
            primary_key: false,
            auto_increment: false,
            allow_null: true,
            unique: false,
            default_value: None,
        }
    }

    /// A field carrying only its name; every attribute at its default.
    pub fn blank(name: impl Into<String>) -> Self {
        Self::new(name, DataType::default())
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<DbValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Store the field under a different column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.field = Some(column.into());
        self
    }

    pub fn getter(mut self, getter: impl Fn(&DbValue) -> DbValue + 'static) -> Self {
        self.getter = Some(Rc::new(getter));
        self
    }

    pub fn setter(mut self, setter: impl Fn(&DbValue) -> DbValue + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    pub fn column_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }

    /// Copy one attribute from `source` onto this field.
    pub fn copy_attribute(&mut self, source: &FieldDefinition, attribute: FieldAttribute) {
        match attribute {
            FieldAttribute::Type => self.data_type = source.data_type,
            FieldAttribute::Field => self.field = source.field.clone(),
            FieldAttribute::Get => self.getter = source.getter.clone(),
            FieldAttribute::Set => self.setter = source.setter.clone(),
            FieldAttribute::PrimaryKey => self.primary_key = source.primary_key,
            FieldAttribute::AutoIncrement => self.auto_increment = source.auto_increment,
            FieldAttribute::AllowNull => self.allow_null = source.allow_null,
            FieldAttribute::Unique => self.unique = source.unique,
            FieldAttribute::DefaultValue => self.default_value = source.default_value.clone(),
        }
    }

    pub(crate) fn apply_getter(&self, value: &DbValue) -> DbValue {
        match &self.getter {
            Some(getter) => getter(value),
            None => value.clone(),
        }
    }

    pub(crate) fn apply_setter(&self, value: &DbValue) -> DbValue {
        match &self.setter {
            Some(setter) => setter(value),
            None => value.clone(),
        }
    }
}

/// Declarative description of a model.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    /// Table name; defaults to the model name
    pub table_name: Option<String>,
    /// Schema/namespace the table lives in
    pub schema: Option<String>,
    pub fields: Vec<FieldDefinition>,
    /// Maintain `created_at`/`updated_at` automatically
    pub timestamps: bool,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            schema: None,
            fields: Vec::new(),
            timestamps: false,
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Table name without schema.
    pub fn table(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.name)
    }

    /// `schema.table` when a schema is set, else the bare table name.
    pub fn qualified_table(&self) -> String {
        match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => format!("{}.{}", schema, self.table()),
            None => self.table().to_string(),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn primary_keys(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    /// Add the timestamp bookkeeping fields when `timestamps` is on.
    pub(crate) fn normalized(mut self) -> Self {
        if self.timestamps {
            for name in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
                if self.get_field(name).is_none() {
                    self.fields.push(FieldDefinition::new(name, DataType::Timestamp));
                }
            }
        }
        self
    }

    pub(crate) fn sequence_name(&self, field: &FieldDefinition) -> String {
        let name = format!("{}_{}_seq", self.table(), field.column_name());
        match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => format!("{}.{}", schema, name),
            None => name,
        }
    }

    /// Sequences backing auto-increment fields.
    pub(crate) fn sequences(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.auto_increment)
            .map(|f| self.sequence_name(f))
            .collect()
    }

    /// Render the CREATE TABLE statement for this model.
    pub fn create_table_sql(&self, associations: &[Association]) -> String {
        let mut clauses: Vec<String> = self
            .fields
            .iter()
            .map(|field| {
                let mut clause = format!("{} {}", quote_ident(field.column_name()), field.data_type);
                if field.auto_increment {
                    clause.push_str(&format!(
                        " DEFAULT nextval('{}')",
                        self.sequence_name(field).replace('\'', "''")
                    ));
                }
                if !field.allow_null || field.primary_key {
                    clause.push_str(" NOT NULL");
                }
                if field.unique && !field.primary_key {
                    clause.push_str(" UNIQUE");
                }
                clause
            })
            .collect();

        let pk_columns: Vec<String> = self
            .primary_keys()
            .iter()
            .map(|f| quote_ident(f.column_name()))
            .collect();
        if !pk_columns.is_empty() {
            clauses.push(format!("PRIMARY KEY ({})", pk_columns.join(", ")));
        }

        for association in associations {
            if let Some(clause) = self.foreign_key_clause(association) {
                clauses.push(clause);
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident_path(&self.qualified_table()),
            clauses.join(",\n    ")
        )
    }

    fn foreign_key_clause(&self, association: &Association) -> Option<String> {
        if association.kind != AssociationKind::BelongsTo || !association.options.constraints {
            return None;
        }
        let target_pk = association.target.primary_key.as_deref()?;
        let foreign_key = association.foreign_key();
        let column = self.get_field(&foreign_key)?.column_name();
        Some(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(column),
            quote_ident_path(&association.target.table),
            quote_ident(target_pk)
        ))
    }
}

/// Kind of relationship between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::BelongsToMany => "belongs_to_many",
        };
        f.write_str(label)
    }
}

/// Plain reference to an association target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub name: String,
    /// Qualified table name
    pub table: String,
    /// Column of the target's (first) primary key, if any
    pub primary_key: Option<String>,
}

/// Options carried by an association.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationOptions {
    pub foreign_key: Option<String>,
    pub alias: Option<String>,
    /// Enforce referential integrity in the table DDL
    pub constraints: bool,
}

impl Default for AssociationOptions {
    fn default() -> Self {
        Self {
            foreign_key: None,
            alias: None,
            constraints: true,
        }
    }
}

impl AssociationOptions {
    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_constraints(mut self, constraints: bool) -> Self {
        self.constraints = constraints;
        self
    }
}

/// A declared relationship from one model to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub kind: AssociationKind,
    pub target: ModelRef,
    pub options: AssociationOptions,
}

impl Association {
    /// Foreign key field name: explicit, else `<target>_id`.
    pub fn foreign_key(&self) -> String {
        self.options
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.target.name))
    }
}
