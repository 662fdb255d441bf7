//! Lifecycle hooks fired after model mutations.

use crate::model::{Instance, Model};
use crate::query::Filter;
use crate::transaction::Transaction;
use crate::value::Record;
use std::fmt;
use std::rc::Rc;

/// Mutation lifecycle events a hook can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    AfterCreate,
    AfterUpdate,
    AfterSave,
    AfterDestroy,
    AfterBulkCreate,
    AfterBulkUpdate,
    AfterBulkDestroy,
    AfterUpsert,
}

impl HookKind {
    pub const ALL: [HookKind; 8] = [
        HookKind::AfterCreate,
        HookKind::AfterUpdate,
        HookKind::AfterSave,
        HookKind::AfterDestroy,
        HookKind::AfterBulkCreate,
        HookKind::AfterBulkUpdate,
        HookKind::AfterBulkDestroy,
        HookKind::AfterUpsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AfterCreate => "after_create",
            Self::AfterUpdate => "after_update",
            Self::AfterSave => "after_save",
            Self::AfterDestroy => "after_destroy",
            Self::AfterBulkCreate => "after_bulk_create",
            Self::AfterBulkUpdate => "after_bulk_update",
            Self::AfterBulkDestroy => "after_bulk_destroy",
            Self::AfterUpsert => "after_upsert",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook sees when it fires.
pub struct HookContext<'a> {
    pub kind: HookKind,
    pub model: &'a Model,
    /// Affected instances; empty for bulk update/destroy and upsert
    pub instances: &'a [Instance],
    /// Transaction the triggering call ran in (explicit or ambient)
    pub transaction: Option<&'a Transaction>,
    /// Filter of a bulk update/destroy
    pub filter: Option<&'a Filter>,
    /// Values of a bulk update or upsert
    pub values: Option<&'a Record>,
    /// Whether per-row hooks were fired for a bulk operation
    pub individual_hooks: bool,
}

pub type HookError = Box<dyn std::error::Error + 'static>;
pub type HookResult = std::result::Result<(), HookError>;

pub(crate) type HookFn = Rc<dyn Fn(&HookContext<'_>) -> HookResult>;

#[derive(Default)]
pub(crate) struct HookRegistry {
    hooks: Vec<(HookKind, HookFn)>,
}

impl HookRegistry {
    pub(crate) fn add(&mut self, kind: HookKind, hook: HookFn) {
        self.hooks.push((kind, hook));
    }

    /// Snapshot of the hooks for `kind`, in registration order.
    pub(crate) fn for_kind(&self, kind: HookKind) -> Vec<HookFn> {
        self.hooks
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, hook)| Rc::clone(hook))
            .collect()
    }

    pub(crate) fn count(&self, kind: HookKind) -> usize {
        self.hooks.iter().filter(|(k, _)| *k == kind).count()
    }
}
