//! Diffing desired items against bookkept state and ordering the operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::configurator::Registry;
use super::state::{ItemRecord, OpKind};
use crate::depgraph::{ConfigItem, Graph, ItemRef, depends_on, order_applied};

/// One operation the scheduler has to dispatch.
#[derive(Debug, Clone)]
pub(crate) enum Op<I> {
    Create { item: I },
    Modify { old: I, new: I },
    Delete { item: I },
}

impl<I: ConfigItem> Op<I> {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Create { .. } => OpKind::Create,
            Op::Modify { .. } => OpKind::Modify,
            Op::Delete { .. } => OpKind::Delete,
        }
    }

    /// The item the operation produces (create/modify) or removes (delete).
    pub fn item(&self) -> &I {
        match self {
            Op::Create { item } | Op::Delete { item } => item,
            Op::Modify { new, .. } => new,
        }
    }

    pub fn item_ref(&self) -> ItemRef<I::Kind> {
        self.item().item_ref()
    }
}

type Records<I> = HashMap<ItemRef<<I as ConfigItem>::Kind>, ItemRecord<I>>;

/// Compute the operations that move the applied state to `desired`.
///
/// Deletes come first in reverse dependency order, then creates and modifies
/// in dependency order. The order is a preference only; the scheduler still
/// checks readiness of each operation before dispatching it.
pub(crate) fn plan<I: ConfigItem>(
    records: &Records<I>,
    desired: &Graph<I>,
    registry: &Registry<I>,
) -> Vec<Op<I>> {
    let mut deletes: BTreeMap<ItemRef<I::Kind>, I> = BTreeMap::new();
    let mut creates: BTreeSet<ItemRef<I::Kind>> = BTreeSet::new();
    let mut modifies: BTreeMap<ItemRef<I::Kind>, I> = BTreeMap::new();

    for item in desired.iter().filter(|item| !item.external()) {
        let item_ref = item.item_ref();
        let Some(record) = records.get(&item_ref) else {
            creates.insert(item_ref);
            continue;
        };
        let Some(applied) = &record.applied else {
            creates.insert(item_ref);
            continue;
        };

        if record.needs_cleanup() {
            // Possibly half there: finish the delete, then create again.
            deletes.insert(item_ref.clone(), applied.clone());
            creates.insert(item_ref);
        } else if applied != item {
            let recreate = registry
                .lookup(item_ref.kind)
                .map(|configurator| configurator.needs_recreate(applied, item))
                .unwrap_or(true);
            if recreate {
                deletes.insert(item_ref.clone(), applied.clone());
                creates.insert(item_ref);
            } else {
                modifies.insert(item_ref, applied.clone());
            }
        }
    }

    for (item_ref, record) in records {
        if record.external || desired.contains(item_ref) {
            continue;
        }
        if let Some(applied) = &record.applied {
            deletes.insert(item_ref.clone(), applied.clone());
        }
    }

    // Everything built on top of a deleted item has to go first and come back after.
    loop {
        let dependents: Vec<(ItemRef<I::Kind>, I)> = records
            .iter()
            .filter(|(item_ref, record)| !record.external && !deletes.contains_key(*item_ref))
            .filter_map(|(item_ref, record)| {
                let applied = record.applied.as_ref()?;
                deletes
                    .keys()
                    .any(|deleted| depends_on(applied, deleted))
                    .then(|| (item_ref.clone(), applied.clone()))
            })
            .collect();
        if dependents.is_empty() {
            break;
        }
        for (item_ref, applied) in dependents {
            if desired.contains(&item_ref) {
                modifies.remove(&item_ref);
                creates.insert(item_ref.clone());
            }
            deletes.insert(item_ref, applied);
        }
    }

    let mut ops = Vec::with_capacity(deletes.len() + creates.len() + modifies.len());
    for item_ref in order_applied(deletes.values()).into_iter().rev() {
        if let Some(item) = deletes.remove(&item_ref) {
            ops.push(Op::Delete { item });
        }
    }
    for item_ref in desired.topological_order() {
        let Some(item) = desired.get(item_ref) else {
            continue;
        };
        if creates.contains(item_ref) {
            ops.push(Op::Create { item: item.clone() });
        } else if let Some(old) = modifies.remove(item_ref) {
            ops.push(Op::Modify {
                old,
                new: item.clone(),
            });
        }
    }
    ops
}
