//! Reconciliation scheduler.
//!
//! Drives reality toward a desired item graph. Each pass diffs the desired
//! items against the scheduler's own bookkeeping (never live OS state), orders
//! the resulting create/modify/delete operations by dependency and dispatches
//! every operation whose prerequisites are satisfied. Operations that defer via
//! [`OpContext::continue_in_background`] finish on their own task while the
//! pass keeps dispatching unrelated work.
//!
//! The scheduler is the single writer of all reconciliation state. Background
//! tasks only talk back through their [`Completion`].

mod completion;
mod configurator;
mod plan;
mod state;


pub use completion::{Completion, OpContext};
pub(crate) use completion::Finished;
pub use configurator::{Configurator, Registry, RegistryBuilder};
pub use state::{ItemRecord, ItemStatus, OpKind};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::depgraph::{ConfigItem, Graph, ItemRef, depends_on};
use crate::error::{ConfiguratorError, ReconcileError};
use completion::OpId;
use plan::Op;

/// Phase of the current (or last) reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    Diffing,
    Ordering,
    Dispatching,
    Awaiting,
    Converged,
    PartialFailure,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    PartialFailure,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct PassResult<K> {
    pub outcome: Outcome,
    /// Number of configurator operations invoked.
    pub dispatched: usize,
    /// Items in `Failed` state with their last error.
    pub failed: Vec<(ItemRef<K>, Arc<ConfiguratorError>)>,
    /// Desired items left undispatched because a dependency is not ready.
    pub pending: Vec<ItemRef<K>>,
    /// Items that should be deleted but still have live dependents.
    pub blocked_deletes: Vec<ItemRef<K>>,
    pub cancelled: bool,
}

impl<K> PassResult<K> {
    pub fn converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }
}

/// Operations of a running pass that are not finished yet.
struct Pass<I> {
    queue: Vec<Op<I>>,
    in_flight: HashMap<OpId, Op<I>>,
    dispatched: usize,
}

impl<I: ConfigItem> Pass<I> {
    fn pending_ops(&self) -> impl Iterator<Item = &Op<I>> {
        self.queue.iter().chain(self.in_flight.values())
    }

    fn has_pending(&self, item_ref: &ItemRef<I::Kind>, pred: impl Fn(OpKind) -> bool) -> bool {
        self.pending_ops()
            .any(|op| pred(op.kind()) && &op.item_ref() == item_ref)
    }
}

/// Declarative configuration reconciler.
pub struct Reconciler<I: ConfigItem> {
    registry: Arc<Registry<I>>,
    records: HashMap<ItemRef<I::Kind>, ItemRecord<I>>,
    next_op: OpId,
    phase: PassPhase,
}

impl<I: ConfigItem> Reconciler<I> {
    pub fn new(registry: Arc<Registry<I>>) -> Self {
        Self {
            registry,
            records: HashMap::new(),
            next_op: 0,
            phase: PassPhase::Idle,
        }
    }

    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    pub fn status(&self, item_ref: &ItemRef<I::Kind>) -> Option<ItemStatus> {
        self.records.get(item_ref).map(|record| record.status)
    }

    pub fn record(&self, item_ref: &ItemRef<I::Kind>) -> Option<&ItemRecord<I>> {
        self.records.get(item_ref)
    }

    pub fn records(&self) -> impl Iterator<Item = (&ItemRef<I::Kind>, &ItemRecord<I>)> {
        self.records.iter()
    }

    /// Number of items the scheduler currently tracks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Run one pass that cannot be cancelled.
    pub async fn reconcile(
        &mut self,
        desired: Vec<I>,
    ) -> Result<PassResult<I::Kind>, ReconcileError> {
        let (_never, cancel) = watch::channel(false);
        self.reconcile_with_cancel(desired, cancel).await
    }

    /// Run one pass. Setting `cancel` to true stops dispatching; outstanding
    /// deferred operations are then reported as failed.
    pub async fn reconcile_with_cancel(
        &mut self,
        desired: Vec<I>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PassResult<I::Kind>, ReconcileError> {
        self.enter(PassPhase::Diffing);
        let desired = match Graph::new(desired) {
            Ok(graph) => graph,
            Err(e) => {
                error!(error = %e, "Desired graph rejected, nothing dispatched");
                self.enter(PassPhase::PartialFailure);
                return Err(e.into());
            }
        };
        self.adopt(&desired);

        self.enter(PassPhase::Ordering);
        let mut pass = Pass {
            queue: plan::plan(&self.records, &desired, &self.registry),
            in_flight: HashMap::new(),
            dispatched: 0,
        };
        debug!(operations = pass.queue.len(), "Planned operations");
        for op in &pass.queue {
            if let Op::Create { item } = op
                && let Some(record) = self.records.get_mut(&item.item_ref())
                && record.status != ItemStatus::Created
            {
                record.status = ItemStatus::Pending;
            }
        }

        let (completions_tx, mut completions_rx) = mpsc::unbounded_channel();
        let mut cancelled = *cancel.borrow();
        while !cancelled {
            self.enter(PassPhase::Dispatching);
            while let Some(index) = self.next_ready(&pass) {
                let op = pass.queue.remove(index);
                self.dispatch(op, &completions_tx, &desired, &mut pass).await;
                if *cancel.borrow() {
                    cancelled = true;
                    break;
                }
            }
            if cancelled || pass.in_flight.is_empty() {
                break;
            }

            self.enter(PassPhase::Awaiting);
            tokio::select! {
                finished = completions_rx.recv() => {
                    if let Some(finished) = finished {
                        self.finish(finished, &mut pass);
                    }
                }
                _ = wait_cancelled(&mut cancel) => cancelled = true,
            }
        }

        Ok(self.conclude(pass, &desired, cancelled))
    }

    fn enter(&mut self, phase: PassPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Pass phase");
            self.phase = phase;
        }
    }

    /// Sync bookkeeping with the desired graph before planning.
    fn adopt(&mut self, desired: &Graph<I>) {
        for item in desired.iter() {
            let item_ref = item.item_ref();
            if item.external() {
                self.records
                    .insert(item_ref, ItemRecord::external(item.clone()));
            } else {
                let record = self
                    .records
                    .entry(item_ref)
                    .or_insert_with(ItemRecord::pending);
                // Formerly external, now managed: whatever exists is ours.
                record.external = false;
                // A failed modify left the old value in place, which is desired again.
                if record.status == ItemStatus::Failed
                    && record.last_op == Some(OpKind::Modify)
                    && record.applied.as_ref() == Some(item)
                {
                    record.status = ItemStatus::Created;
                    record.last_error = None;
                }
            }
        }
        self.records.retain(|item_ref, record| {
            desired.contains(item_ref) || (!record.external && record.applied.is_some())
        });
    }

    fn next_ready(&self, pass: &Pass<I>) -> Option<usize> {
        pass.queue.iter().position(|op| self.is_ready(op, pass))
    }

    fn is_ready(&self, op: &Op<I>, pass: &Pass<I>) -> bool {
        let item_ref = op.item_ref();
        match op {
            Op::Create { item } | Op::Modify { new: item, .. } => {
                // A recreate deletes the old instance first.
                if pass.has_pending(&item_ref, |kind| kind == OpKind::Delete)
                    || self
                        .records
                        .get(&item_ref)
                        .is_some_and(|record| record.needs_cleanup())
                {
                    return false;
                }
                item.dependencies().iter().all(|dep| {
                    let created = self.records.get(&dep.item).is_some_and(|record| {
                        record.status == ItemStatus::Created && record.applied.is_some()
                    });
                    created && !pass.has_pending(&dep.item, |kind| kind != OpKind::Delete)
                })
            }
            Op::Delete { .. } => !self.records.iter().any(|(other, record)| {
                other != &item_ref
                    && !record.external
                    && record
                        .applied
                        .as_ref()
                        .is_some_and(|applied| depends_on(applied, &item_ref))
            }),
        }
    }

    async fn dispatch(
        &mut self,
        op: Op<I>,
        completions: &mpsc::UnboundedSender<Finished>,
        desired: &Graph<I>,
        pass: &mut Pass<I>,
    ) {
        let item_ref = op.item_ref();
        let configurator = match self.registry.lookup(item_ref.kind) {
            Ok(configurator) => configurator,
            Err(e) => {
                self.fail(&op, e);
                return;
            }
        };

        let id = self.next_op;
        self.next_op += 1;
        pass.dispatched += 1;

        let transition = match op.kind() {
            OpKind::Create => ItemStatus::Creating,
            OpKind::Modify => ItemStatus::Modifying,
            OpKind::Delete => ItemStatus::Deleting,
        };
        let record = self
            .records
            .entry(item_ref.clone())
            .or_insert_with(ItemRecord::pending);
        record.status = transition;
        record.last_op = Some(op.kind());

        info!(item = %item_ref, op = %op.kind(), "Dispatching operation");
        let ctx = OpContext::new(id, item_ref.to_string(), completions.clone());
        let result = match &op {
            Op::Create { item } => configurator.create(&ctx, item).await,
            Op::Modify { old, new } => configurator.modify(&ctx, old, new).await,
            Op::Delete { item } => configurator.delete(&ctx, item).await,
        };

        match result {
            Ok(()) if ctx.is_deferred() => {
                pass.in_flight.insert(id, op);
            }
            Ok(()) => self.succeed(&op),
            Err(ConfiguratorError::NotImplemented) if op.kind() == OpKind::Modify => {
                info!(item = %item_ref, "Modify not implemented, recreating");
                if let Op::Modify { old, new } = op {
                    if let Some(record) = self.records.get_mut(&item_ref) {
                        record.status = ItemStatus::Created;
                    }
                    self.queue_recreate(old, new, desired, pass);
                }
            }
            Err(e) => self.fail(&op, e),
        }
    }

    /// Replace an in-place change with delete + create, including dependents.
    fn queue_recreate(&self, old: I, new: I, desired: &Graph<I>, pass: &mut Pass<I>) {
        let mut deleted = vec![old.item_ref()];
        pass.queue.push(Op::Delete { item: old });
        pass.queue.push(Op::Create { item: new });

        while let Some(target) = deleted.pop() {
            for (item_ref, record) in &self.records {
                let Some(applied) = &record.applied else {
                    continue;
                };
                if record.external
                    || !depends_on(applied, &target)
                    || pass.has_pending(item_ref, |kind| kind == OpKind::Delete)
                {
                    continue;
                }
                pass.queue.retain(|op| &op.item_ref() != item_ref);
                pass.queue.push(Op::Delete {
                    item: applied.clone(),
                });
                if let Some(item) = desired.get(item_ref) {
                    pass.queue.push(Op::Create { item: item.clone() });
                }
                deleted.push(item_ref.clone());
            }
        }
    }

    fn finish(&mut self, finished: Finished, pass: &mut Pass<I>) {
        let Some(op) = pass.in_flight.remove(&finished.op) else {
            warn!(op = finished.op, "Completion for unknown operation ignored");
            return;
        };
        match finished.result {
            Ok(()) => self.succeed(&op),
            Err(e) => self.fail(&op, e),
        }
    }

    fn succeed(&mut self, op: &Op<I>) {
        let item_ref = op.item_ref();
        let record = self
            .records
            .entry(item_ref.clone())
            .or_insert_with(ItemRecord::pending);
        record.last_error = None;
        match op {
            Op::Create { item } | Op::Modify { new: item, .. } => {
                record.applied = Some(item.clone());
                record.status = ItemStatus::Created;
            }
            Op::Delete { .. } => {
                record.applied = None;
                record.status = ItemStatus::Deleted;
            }
        }
        info!(item = %item_ref, op = %op.kind(), status = %record.status, "Operation completed");
    }

    fn fail(&mut self, op: &Op<I>, err: ConfiguratorError) {
        let item_ref = op.item_ref();
        error!(item = %item_ref, op = %op.kind(), error = %err, "Operation failed");
        let record = self
            .records
            .entry(item_ref)
            .or_insert_with(ItemRecord::pending);
        record.status = ItemStatus::Failed;
        record.last_op = Some(op.kind());
        let unfinished = matches!(
            err,
            ConfiguratorError::Cancelled | ConfiguratorError::CompletionDropped
        );
        record.last_error = Some(Arc::new(err));
        match op {
            // A deferred create that never reported back may have left
            // something running; a later pass deletes it first.
            Op::Create { item } if unfinished => record.applied = Some(item.clone()),
            // Create is retried from scratch on the next pass.
            Op::Create { .. } => record.applied = None,
            Op::Modify { old, .. } => record.applied = Some(old.clone()),
            Op::Delete { item } => record.applied = Some(item.clone()),
        }
    }

    fn conclude(
        &mut self,
        pass: Pass<I>,
        desired: &Graph<I>,
        cancelled: bool,
    ) -> PassResult<I::Kind> {
        if cancelled {
            warn!(
                outstanding = pass.in_flight.len(),
                undispatched = pass.queue.len(),
                "Reconciliation pass cancelled"
            );
        }
        for op in pass.in_flight.values() {
            self.fail(op, ConfiguratorError::Cancelled);
        }

        let mut blocked_deletes = Vec::new();
        for op in &pass.queue {
            let item_ref = op.item_ref();
            match op.kind() {
                OpKind::Delete => blocked_deletes.push(item_ref),
                OpKind::Create | OpKind::Modify => {
                    // An undispatched recreate keeps the old, still existing instance.
                    if let Some(record) = self.records.get_mut(&item_ref)
                        && record.status != ItemStatus::Failed
                        && !(op.kind() == OpKind::Create && record.applied.is_some())
                    {
                        record.status = ItemStatus::Pending;
                    }
                }
            }
        }

        self.records.retain(|item_ref, record| {
            record.status != ItemStatus::Deleted || desired.contains(item_ref)
        });

        let mut failed: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.status == ItemStatus::Failed)
            .map(|(item_ref, record)| {
                let err = record
                    .last_error
                    .clone()
                    .unwrap_or_else(|| Arc::new(ConfiguratorError::Cancelled));
                (item_ref.clone(), err)
            })
            .collect();
        failed.sort_by(|a, b| a.0.cmp(&b.0));
        let mut pending: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.status == ItemStatus::Pending)
            .map(|(item_ref, _)| item_ref.clone())
            .collect();
        pending.sort();
        blocked_deletes.sort();
        blocked_deletes.dedup();

        let outcome = if failed.is_empty()
            && pending.is_empty()
            && blocked_deletes.is_empty()
            && !cancelled
        {
            Outcome::Converged
        } else {
            Outcome::PartialFailure
        };
        self.enter(match outcome {
            Outcome::Converged => PassPhase::Converged,
            Outcome::PartialFailure => PassPhase::PartialFailure,
        });

        info!(
            outcome = ?outcome,
            dispatched = pass.dispatched,
            failed = failed.len(),
            pending = pending.len(),
            blocked = blocked_deletes.len(),
            "Reconciliation pass finished"
        );

        PassResult {
            outcome,
            dispatched: pass.dispatched,
            failed,
            pending,
            blocked_deletes,
            cancelled,
        }
    }
}

/// Resolves once `cancel` is true. A dropped sender never cancels.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
