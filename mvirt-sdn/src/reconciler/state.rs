//! Per-item reconciliation bookkeeping.

use std::fmt;
use std::sync::Arc;

use crate::error::ConfiguratorError;

/// Reconciliation status of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Desired, but not dispatched (dependencies not satisfied).
    Pending,
    Creating,
    Created,
    Modifying,
    Deleting,
    Deleted,
    Failed,
}

impl ItemStatus {
    /// True while an operation is in flight.
    pub fn in_transition(self) -> bool {
        matches!(
            self,
            ItemStatus::Creating | ItemStatus::Modifying | ItemStatus::Deleting
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Creating => "creating",
            ItemStatus::Created => "created",
            ItemStatus::Modifying => "modifying",
            ItemStatus::Deleting => "deleting",
            ItemStatus::Deleted => "deleted",
            ItemStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Kind of operation dispatched for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Modify => write!(f, "modify"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// What the scheduler knows about one item.
#[derive(Debug, Clone)]
pub struct ItemRecord<I> {
    /// Item as last realized in the OS; `None` if nothing is (believed) present.
    pub applied: Option<I>,
    pub status: ItemStatus,
    /// Last operation dispatched for the item.
    pub last_op: Option<OpKind>,
    pub last_error: Option<Arc<ConfiguratorError>>,
    pub external: bool,
}

impl<I> ItemRecord<I> {
    pub(crate) fn pending() -> Self {
        Self {
            applied: None,
            status: ItemStatus::Pending,
            last_op: None,
            last_error: None,
            external: false,
        }
    }

    pub(crate) fn external(item: I) -> Self {
        Self {
            applied: Some(item),
            status: ItemStatus::Created,
            last_op: None,
            last_error: None,
            external: true,
        }
    }

    /// A delete failed, or a create was cut short after it started: the item
    /// may still (partially) exist and has to be deleted before it is created.
    pub(crate) fn needs_cleanup(&self) -> bool {
        self.status == ItemStatus::Failed
            && self.applied.is_some()
            && matches!(self.last_op, Some(OpKind::Delete | OpKind::Create))
    }
}
