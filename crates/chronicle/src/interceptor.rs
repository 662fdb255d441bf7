//! Lifecycle hooks that write shadow rows.
//!
//! Each captured hook maps to a [`VersionType`], snapshots the stored values
//! of every affected instance, and bulk-inserts the snapshots into the
//! shadow model in the resolved transaction. Errors are returned from the
//! hook, so the triggering operation fails with them.

use crate::error::{Result, VersionError};
use crate::naming::ShadowNames;
use chronicle_db::{
    Database, DbTimestamp, DbValue, HookContext, HookKind, Instance, Model, Record,
    Transaction, TransactionContext, WriteOptions,
};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Operation recorded in a shadow row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionType {
    Created = 1,
    Updated = 2,
    Deleted = 3,
}

impl VersionType {
    pub const ALL: [VersionType; 3] = [
        VersionType::Created,
        VersionType::Updated,
        VersionType::Deleted,
    ];

    /// Stable integer stored in the type field.
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Name of the shadow scope selecting this type.
    pub fn scope_name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scope_name())
    }
}

impl From<VersionType> for DbValue {
    fn from(value: VersionType) -> Self {
        DbValue::Integer(value.code())
    }
}

/// Hooks that produce shadow rows.
pub const CAPTURED_HOOKS: [HookKind; 4] = [
    HookKind::AfterCreate,
    HookKind::AfterUpdate,
    HookKind::AfterBulkCreate,
    HookKind::AfterDestroy,
];

/// Hooks that deliver no instances; history cannot be captured for them.
pub const UNSUPPORTED_HOOKS: [HookKind; 3] = [
    HookKind::AfterBulkUpdate,
    HookKind::AfterBulkDestroy,
    HookKind::AfterUpsert,
];

pub fn version_type_for(hook: HookKind) -> Result<VersionType> {
    match hook {
        HookKind::AfterCreate | HookKind::AfterBulkCreate => Ok(VersionType::Created),
        HookKind::AfterUpdate => Ok(VersionType::Updated),
        HookKind::AfterDestroy => Ok(VersionType::Deleted),
        other => Err(VersionError::UnmappedHook(other)),
    }
}

/// Pick the transaction a shadow write joins.
///
/// On the source's own connection the ambient transaction wins and the
/// triggering call's transaction is the fallback. On another connection only
/// the ambient lookup applies; a handle from the source connection is never
/// carried across.
pub fn resolve_transaction(
    source_db: &Database,
    shadow_db: &Database,
    namespace: Option<&dyn TransactionContext>,
    supplied: Option<&Transaction>,
) -> Option<Transaction> {
    let ambient = namespace.and_then(|ns| ns.current(shadow_db.id()));
    if source_db == shadow_db {
        ambient.or_else(|| supplied.cloned())
    } else {
        ambient
    }
}

/// Frozen copy of an instance's stored values, limited to `fields`, tagged
/// with the operation and the write time.
pub fn snapshot(
    instance: &Instance,
    fields: &[String],
    names: &ShadowNames,
    version_type: VersionType,
    now: &DbTimestamp,
) -> Record {
    let mut record: Record = fields
        .iter()
        .filter_map(|name| {
            instance
                .get_raw(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect();
    record.insert(names.type_field.clone(), version_type);
    record.insert(names.timestamp_field.clone(), now.clone());
    record
}

pub(crate) struct Interceptor {
    source_db: Database,
    shadow: Model,
    names: ShadowNames,
    /// Source fields present on the shadow
    fields: Vec<String>,
    namespace: Option<Rc<dyn TransactionContext>>,
}

impl Interceptor {
    pub(crate) fn new(
        source: &Model,
        shadow: &Model,
        names: &ShadowNames,
        namespace: Option<Rc<dyn TransactionContext>>,
    ) -> Self {
        let fields = shadow
            .fields()
            .iter()
            .filter(|f| !names.is_reserved(&f.name))
            .map(|f| f.name.clone())
            .collect();
        Self {
            source_db: source.database().clone(),
            shadow: shadow.clone(),
            names: names.clone(),
            fields,
            namespace,
        }
    }

    /// Register the capture hooks and the unsupported-operation warnings on
    /// `source`.
    pub(crate) fn attach(self, source: &Model) {
        let this = Rc::new(self);
        for hook in CAPTURED_HOOKS {
            let interceptor = Rc::clone(&this);
            source.add_hook(hook, move |ctx| {
                interceptor.capture(ctx)?;
                Ok(())
            });
        }

        for hook in UNSUPPORTED_HOOKS {
            let shadow = this.shadow.name().to_string();
            source.add_hook(hook, move |ctx| {
                // Per-row hooks already recorded the rows.
                if !ctx.individual_hooks {
                    warn!(
                        model = %ctx.model.name(),
                        shadow = %shadow,
                        hook = %ctx.kind,
                        "History not captured: operation delivers no instances"
                    );
                }
                Ok(())
            });
        }
    }

    fn capture(&self, ctx: &HookContext<'_>) -> Result<()> {
        let version_type = version_type_for(ctx.kind)?;
        if ctx.instances.is_empty() {
            return Ok(());
        }

        let transaction = resolve_transaction(
            &self.source_db,
            self.shadow.database(),
            self.namespace.as_deref(),
            ctx.transaction,
        );
        let now = DbTimestamp::now();
        let rows: Vec<Record> = ctx
            .instances
            .iter()
            .map(|instance| snapshot(instance, &self.fields, &self.names, version_type, &now))
            .collect();

        let count = rows.len();
        self.shadow.bulk_create(
            rows,
            WriteOptions::new().with_transaction(transaction.clone()).raw(),
        )?;

        debug!(
            model = %ctx.model.name(),
            shadow = %self.shadow.name(),
            version_type = %version_type,
            rows = count,
            transaction = ?transaction.as_ref().map(|tx| tx.id()),
            "Captured versions"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_db::AmbientTransactions;

    #[test]
    fn test_hook_mapping() {
        assert_eq!(version_type_for(HookKind::AfterCreate).unwrap(), VersionType::Created);
        assert_eq!(version_type_for(HookKind::AfterBulkCreate).unwrap(), VersionType::Created);
        assert_eq!(version_type_for(HookKind::AfterUpdate).unwrap(), VersionType::Updated);
        assert_eq!(version_type_for(HookKind::AfterDestroy).unwrap(), VersionType::Deleted);

        let err = version_type_for(HookKind::AfterSave).unwrap_err();
        assert!(matches!(err, VersionError::UnmappedHook(HookKind::AfterSave)));
        for hook in UNSUPPORTED_HOOKS {
            assert!(version_type_for(hook).is_err());
        }
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(VersionType::Created.code(), 1);
        assert_eq!(VersionType::Updated.code(), 2);
        assert_eq!(VersionType::Deleted.code(), 3);
        assert_eq!(VersionType::from_code(2), Some(VersionType::Updated));
        assert_eq!(VersionType::from_code(4), None);
    }

    #[test]
    fn test_same_connection_prefers_ambient_then_supplied() {
        let db = Database::open_in_memory().unwrap();
        let ambient = AmbientTransactions::new();
        let outer = db.begin().unwrap();
        let supplied = db.begin().unwrap();

        assert_eq!(resolve_transaction(&db, &db, None, Some(&supplied)), Some(supplied.clone()));
        assert_eq!(
            resolve_transaction(&db, &db, Some(&ambient), Some(&supplied)),
            Some(supplied.clone())
        );

        ambient.enter(&outer);
        assert_eq!(
            resolve_transaction(&db, &db, Some(&ambient), Some(&supplied)),
            Some(outer.clone())
        );
        ambient.exit(&outer);

        outer.rollback().unwrap();
        supplied.rollback().unwrap();
    }

    #[test]
    fn test_other_connection_only_uses_ambient() {
        let source = Database::open_in_memory().unwrap();
        let archive = Database::open_in_memory().unwrap();
        let ambient = AmbientTransactions::new();
        let supplied = source.begin().unwrap();

        assert_eq!(resolve_transaction(&source, &archive, None, Some(&supplied)), None);
        assert_eq!(
            resolve_transaction(&source, &archive, Some(&ambient), Some(&supplied)),
            None
        );

        let archive_tx = archive.begin().unwrap();
        ambient.enter(&archive_tx);
        assert_eq!(
            resolve_transaction(&source, &archive, Some(&ambient), Some(&supplied)),
            Some(archive_tx.clone())
        );
        ambient.exit(&archive_tx);

        archive_tx.rollback().unwrap();
        supplied.rollback().unwrap();
    }
}
