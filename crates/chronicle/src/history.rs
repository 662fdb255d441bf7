//! Queries over recorded versions.

use crate::error::{Result, VersionError};
use crate::interceptor::VersionType;
use crate::naming::ShadowNames;
use chronicle_db::{DbValue, Filter, FindOptions, Instance, Model};
use tracing::debug;

/// History capability attached to a versioned source model.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    shadow: Model,
    /// Source primary keys that exist on the shadow
    primary_keys: Vec<String>,
}

impl VersionHistory {
    pub(crate) fn new(source: &Model, shadow: &Model, names: &ShadowNames) -> Self {
        let primary_keys = source
            .primary_keys()
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| !names.is_reserved(name) && shadow.field(name).is_some())
            .collect();
        Self {
            shadow: shadow.clone(),
            primary_keys,
        }
    }

    pub fn shadow(&self) -> &Model {
        &self.shadow
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Equality on the instance's primary key values; empty when the source
    /// has no primary key on the shadow.
    pub fn identity_filter(&self, instance: &Instance) -> Filter {
        self.primary_keys.iter().fold(Filter::new(), |filter, name| {
            let value = instance.get_raw(name).cloned().unwrap_or(DbValue::Null);
            filter.eq(name.clone(), value)
        })
    }

    /// Every shadow row matching the caller's options.
    pub fn for_model(&self, options: FindOptions) -> Result<Vec<Instance>> {
        Ok(self.shadow.find_all(options)?)
    }

    /// Shadow rows of one instance. The identity filter overrides caller
    /// conditions on the same fields.
    pub fn for_instance(&self, instance: &Instance, options: FindOptions) -> Result<Vec<Instance>> {
        let filter = options.filter.merged(&self.identity_filter(instance));
        Ok(self.shadow.find_all(FindOptions { filter, ..options })?)
    }
}

/// Register the `created` / `updated` / `deleted` scopes on the shadow.
pub(crate) fn add_scopes(shadow: &Model, names: &ShadowNames) {
    for version_type in VersionType::ALL {
        shadow.add_scope(
            version_type.scope_name(),
            Filter::new().eq(names.type_field.clone(), version_type),
        );
    }
}

/// Attach the history capability to `source`. The first shadow derived for
/// a model keeps it.
pub(crate) fn install(source: &Model, history: VersionHistory) {
    let shadow = history.shadow.name().to_string();
    if !source.insert_extension(history) {
        debug!(
            model = %source.name(),
            shadow = %shadow,
            "History query already installed; keeping the first"
        );
    }
}

/// Access to recorded versions.
pub trait Versioned {
    /// Shadow rows, optionally narrowed by `options`. On an instance, only
    /// that instance's rows.
    fn get_versions(&self, options: FindOptions) -> Result<Vec<Instance>>;
}

impl Versioned for Model {
    fn get_versions(&self, options: FindOptions) -> Result<Vec<Instance>> {
        history_of(self)?.for_model(options)
    }
}

impl Versioned for Instance {
    fn get_versions(&self, options: FindOptions) -> Result<Vec<Instance>> {
        history_of(self.model())?.for_instance(self, options)
    }
}

fn history_of(model: &Model) -> Result<std::rc::Rc<VersionHistory>> {
    model
        .extension::<VersionHistory>()
        .ok_or_else(|| VersionError::NotVersioned(model.name().to_string()))
}
