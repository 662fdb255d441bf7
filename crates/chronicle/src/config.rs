//! Options for deriving a shadow model
//!
//! Three layers, later wins: built-in defaults, the process-wide
//! [`VersionDefaults`], and per-call [`VersionOptions`]. They are folded into
//! a [`ResolvedOptions`] once, when the shadow model is derived; changing the
//! process defaults afterwards does not touch shadows that already exist.

use crate::error::{Result, VersionError};
use chronicle_db::{Database, Model, TransactionContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::{LazyLock, RwLock};

pub const DEFAULT_PREFIX: &str = "version";

/// Process-wide defaults applied to every subsequent derivation.
///
/// Holds plain data only. The ambient transaction context and the target
/// connection are bound to a database and can only be given per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDefaults {
    /// Leading naming segment
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Trailing naming segment
    #[serde(default)]
    pub suffix: String,

    /// Prefix of the reserved field names; falls back to `prefix`
    #[serde(default)]
    pub attribute_prefix: Option<String>,

    /// Schema the shadow table lives in; falls back to the source's
    #[serde(default)]
    pub schema: Option<String>,

    /// Source fields left out of the shadow
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_true")]
    pub table_underscored: bool,

    #[serde(default = "default_true")]
    pub underscored: bool,

    /// Mirror the source's associations on the shadow
    #[serde(default)]
    pub associations: bool,

    /// Enforce referential constraints on mirrored associations
    #[serde(default)]
    pub association_constraints: bool,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for VersionDefaults {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            suffix: String::new(),
            attribute_prefix: None,
            schema: None,
            exclude: Vec::new(),
            table_underscored: true,
            underscored: true,
            associations: false,
            association_constraints: false,
        }
    }
}

impl VersionDefaults {
    /// Parse defaults from a TOML document. Missing keys take built-in values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VersionError::config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VersionError::config(e.to_string()))
    }
}

static DEFAULTS: LazyLock<RwLock<VersionDefaults>> =
    LazyLock::new(|| RwLock::new(VersionDefaults::default()));

/// Copy of the current process-wide defaults.
pub fn defaults() -> VersionDefaults {
    match DEFAULTS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the process-wide defaults.
pub fn set_defaults(defaults: VersionDefaults) {
    update_defaults(|current| *current = defaults);
}

/// Edit the process-wide defaults in place.
pub fn update_defaults(edit: impl FnOnce(&mut VersionDefaults)) {
    let mut guard = match DEFAULTS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    edit(&mut guard);
}

/// Restore the built-in defaults.
pub fn reset_defaults() {
    set_defaults(VersionDefaults::default());
}

/// Per-call overrides. Every field left `None` falls through to the
/// process-wide defaults.
#[derive(Clone, Default)]
pub struct VersionOptions {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub attribute_prefix: Option<String>,
    pub schema: Option<String>,
    pub exclude: Option<Vec<String>>,
    pub table_underscored: Option<bool>,
    pub underscored: Option<bool>,
    /// Ambient transaction context; defaults to the source database's
    pub namespace: Option<Rc<dyn TransactionContext>>,
    /// Database the shadow is registered on; defaults to the source's
    pub connection: Option<Database>,
    pub associations: Option<bool>,
    pub association_constraints: Option<bool>,
}

impl fmt::Debug for VersionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionOptions")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("attribute_prefix", &self.attribute_prefix)
            .field("schema", &self.schema)
            .field("exclude", &self.exclude)
            .field("table_underscored", &self.table_underscored)
            .field("underscored", &self.underscored)
            .field("namespace", &self.namespace.is_some())
            .field("connection", &self.connection.as_ref().map(|db| db.id()))
            .field("associations", &self.associations)
            .field("association_constraints", &self.association_constraints)
            .finish()
    }
}

impl VersionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn attribute_prefix(mut self, attribute_prefix: impl Into<String>) -> Self {
        self.attribute_prefix = Some(attribute_prefix.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn table_underscored(mut self, table_underscored: bool) -> Self {
        self.table_underscored = Some(table_underscored);
        self
    }

    pub fn underscored(mut self, underscored: bool) -> Self {
        self.underscored = Some(underscored);
        self
    }

    pub fn namespace(mut self, namespace: Rc<dyn TransactionContext>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn connection(mut self, connection: &Database) -> Self {
        self.connection = Some(connection.clone());
        self
    }

    pub fn associations(mut self, associations: bool) -> Self {
        self.associations = Some(associations);
        self
    }

    pub fn association_constraints(mut self, association_constraints: bool) -> Self {
        self.association_constraints = Some(association_constraints);
        self
    }
}

/// Options frozen into a shadow model at derivation time.
#[derive(Clone)]
pub struct ResolvedOptions {
    pub prefix: String,
    pub suffix: String,
    /// Never empty unless `prefix` is
    pub attribute_prefix: String,
    pub schema: Option<String>,
    pub exclude: Vec<String>,
    pub table_underscored: bool,
    pub underscored: bool,
    pub namespace: Option<Rc<dyn TransactionContext>>,
    pub connection: Database,
    pub associations: bool,
    pub association_constraints: bool,
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("attribute_prefix", &self.attribute_prefix)
            .field("schema", &self.schema)
            .field("exclude", &self.exclude)
            .field("table_underscored", &self.table_underscored)
            .field("underscored", &self.underscored)
            .field("namespace", &self.namespace.is_some())
            .field("connection", &self.connection.id())
            .field("associations", &self.associations)
            .field("association_constraints", &self.association_constraints)
            .finish()
    }
}

impl ResolvedOptions {
    /// Fold call options over `defaults` for `source`.
    pub fn resolve(source: &Model, defaults: &VersionDefaults, options: VersionOptions) -> Self {
        let prefix = options.prefix.unwrap_or_else(|| defaults.prefix.clone());
        let attribute_prefix = options
            .attribute_prefix
            .or_else(|| defaults.attribute_prefix.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| prefix.clone());
        let schema = options
            .schema
            .or_else(|| defaults.schema.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| source.schema().map(str::to_string));
        let connection = options
            .connection
            .unwrap_or_else(|| source.database().clone());
        let namespace = options
            .namespace
            .or_else(|| source.database().namespace());

        Self {
            prefix,
            suffix: options.suffix.unwrap_or_else(|| defaults.suffix.clone()),
            attribute_prefix,
            schema,
            exclude: options.exclude.unwrap_or_else(|| defaults.exclude.clone()),
            table_underscored: options
                .table_underscored
                .unwrap_or(defaults.table_underscored),
            underscored: options.underscored.unwrap_or(defaults.underscored),
            namespace,
            connection,
            associations: options.associations.unwrap_or(defaults.associations),
            association_constraints: options
                .association_constraints
                .unwrap_or(defaults.association_constraints),
        }
    }

    /// Whether the shadow is registered on the source's own database.
    pub fn shares_connection(&self, source: &Model) -> bool {
        &self.connection == source.database()
    }
}
