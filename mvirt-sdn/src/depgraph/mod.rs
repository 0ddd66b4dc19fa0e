//! Dependency graph model for configuration items.
//!
//! An item is a typed, named unit of configuration. Items declare which other
//! items must exist before they can be created; the scheduler uses these edges
//! to order creates (dependency first) and deletes (dependent first).

mod graph;

pub use graph::Graph;
pub(crate) use graph::order_applied;

use std::fmt;
use std::hash::Hash;

/// A configuration item managed by the reconciler.
///
/// `PartialEq` must compare the declared configuration only. Labels are for
/// diagnostics and never take part in equality.
pub trait ConfigItem: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Discriminator selecting the configurator for the item.
    type Kind: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Unique within `kind()`.
    fn name(&self) -> String;

    /// Human-readable description.
    fn label(&self) -> String {
        self.name()
    }

    /// External items are pre-provisioned: referenced, never created or deleted.
    fn external(&self) -> bool {
        false
    }

    fn dependencies(&self) -> Vec<Dependency<Self::Kind>>;

    fn item_ref(&self) -> ItemRef<Self::Kind> {
        ItemRef::new(self.kind(), self.name())
    }
}

/// Reference to an item by type and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemRef<K> {
    pub kind: K,
    pub name: String,
}

impl<K> ItemRef<K> {
    pub fn new(kind: K, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl<K: fmt::Display> fmt::Display for ItemRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Dependency of one item on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency<K> {
    pub item: ItemRef<K>,
    pub description: String,
}

impl<K> Dependency<K> {
    pub fn new(kind: K, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            item: ItemRef::new(kind, name),
            description: description.into(),
        }
    }
}

/// Returns true if `item` declares a dependency on `target`.
pub fn depends_on<I: ConfigItem>(item: &I, target: &ItemRef<I::Kind>) -> bool {
    item.dependencies().iter().any(|dep| &dep.item == target)
}
