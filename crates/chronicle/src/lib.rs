//! Chronicle: append-only version history for chronicle_db models
//!
//! [`derive_shadow`] registers a shadow model next to a source model and
//! hooks the source's lifecycle so that every create, update and destroy
//! writes one shadow row, in the same transaction as the change itself.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronicle::{derive_shadow, VersionOptions, Versioned};
//! use chronicle_db::{FindOptions, Record, WriteOptions};
//!
//! let shadow = derive_shadow(&users, VersionOptions::new())?;
//! shadow.sync(false)?;
//!
//! let user = users.create(Record::new().with("name", "ada"), WriteOptions::new())?;
//! let history = user.get_versions(FindOptions::new())?;
//! let created = shadow.scope("created")?.find_all(FindOptions::new())?;
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod history;
pub mod interceptor;
pub mod naming;
pub mod projector;

pub use config::{
    defaults, reset_defaults, set_defaults, update_defaults, ResolvedOptions, VersionDefaults,
    VersionOptions, DEFAULT_PREFIX,
};
pub use error::{Result, VersionError};
pub use history::{VersionHistory, Versioned};
pub use interceptor::VersionType;
pub use naming::ShadowNames;

use chronicle_db::{FindOptions, Instance, Model, ScopedModel};
use interceptor::Interceptor;
use tracing::info;

/// Derive and register the shadow model of `source`, attach the capture
/// hooks, the version scopes and the history capability.
///
/// The shadow table is not created here; call [`ShadowModel::sync`].
pub fn derive_shadow(source: &Model, options: VersionOptions) -> Result<ShadowModel> {
    let options = ResolvedOptions::resolve(source, &config::defaults(), options);
    naming::validate(&options)?;

    let names = ShadowNames::resolve(source.definition(), &options);
    let definition = builder::shadow_definition(source, &names, &options);
    let shadow = options.connection.define(definition)?;

    if options.associations {
        builder::clone_associations(source, &shadow, options.association_constraints);
    }

    Interceptor::new(source, &shadow, &names, options.namespace.clone()).attach(source);
    history::add_scopes(&shadow, &names);
    history::install(source, VersionHistory::new(source, &shadow, &names));

    info!(
        model = %source.name(),
        shadow = %shadow.name(),
        table = %shadow.qualified_table(),
        separate_connection = !options.shares_connection(source),
        "Registered version model"
    );

    Ok(ShadowModel {
        model: shadow,
        names,
        options,
    })
}

/// A registered shadow model with the options it was derived with.
#[derive(Debug, Clone)]
pub struct ShadowModel {
    model: Model,
    names: ShadowNames,
    options: ResolvedOptions,
}

impl ShadowModel {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn names(&self) -> &ShadowNames {
        &self.names
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    /// Create the shadow table (`force` drops it first).
    pub fn sync(&self, force: bool) -> Result<()> {
        Ok(self.model.sync(force)?)
    }

    pub fn find_all(&self, options: FindOptions) -> Result<Vec<Instance>> {
        Ok(self.model.find_all(options)?)
    }

    pub fn find_one(&self, options: FindOptions) -> Result<Option<Instance>> {
        Ok(self.model.find_one(options)?)
    }

    pub fn count(&self, options: FindOptions) -> Result<i64> {
        Ok(self.model.count(options)?)
    }

    /// `created`, `updated` or `deleted`.
    pub fn scope(&self, name: &str) -> Result<ScopedModel> {
        Ok(self.model.scope(name)?)
    }

    /// Operation recorded in a shadow row.
    pub fn version_type(&self, version: &Instance) -> Option<VersionType> {
        match version.get_raw(&self.names.type_field) {
            Some(chronicle_db::DbValue::Integer(code)) => VersionType::from_code(*code),
            _ => None,
        }
    }
}
