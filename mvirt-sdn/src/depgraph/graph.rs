//! Validated dependency graph built on petgraph.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::{ConfigItem, ItemRef};
use crate::error::ValidationError;

/// A validated, acyclic set of items keyed by `(kind, name)`.
#[derive(Debug, Clone)]
pub struct Graph<I: ConfigItem> {
    items: HashMap<ItemRef<I::Kind>, I>,
    /// Dependencies before dependents.
    order: Vec<ItemRef<I::Kind>>,
}

impl<I: ConfigItem> Graph<I> {
    /// Build and validate a graph from a list of items.
    ///
    /// Fails on duplicate items, on dependencies that point outside of the
    /// graph (external items are exempt) and on dependency cycles.
    pub fn new(items: Vec<I>) -> Result<Self, ValidationError> {
        let mut by_ref = BTreeMap::new();
        for item in items {
            let item_ref = item.item_ref();
            if by_ref.contains_key(&item_ref) {
                return Err(ValidationError::DuplicateItem(item_ref.to_string()));
            }
            by_ref.insert(item_ref, item);
        }

        for (item_ref, item) in &by_ref {
            if item.external() {
                continue;
            }
            for dep in item.dependencies() {
                if !by_ref.contains_key(&dep.item) {
                    return Err(ValidationError::DanglingDependency {
                        item: item_ref.to_string(),
                        dependency: dep.item.to_string(),
                    });
                }
            }
        }

        let order = topological_order(&by_ref)
            .map_err(|item_ref| ValidationError::Cycle(item_ref.to_string()))?;

        Ok(Self {
            items: by_ref.into_iter().collect(),
            order,
        })
    }

    pub fn get(&self, item_ref: &ItemRef<I::Kind>) -> Option<&I> {
        self.items.get(item_ref)
    }

    pub fn contains(&self, item_ref: &ItemRef<I::Kind>) -> bool {
        self.items.contains_key(item_ref)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item references with every dependency ahead of its dependents.
    pub fn topological_order(&self) -> &[ItemRef<I::Kind>] {
        &self.order
    }

    /// Items in topological order.
    pub fn iter(&self) -> impl Iterator<Item = &I> {
        self.order.iter().filter_map(|item_ref| self.items.get(item_ref))
    }
}

/// Order already-applied items, dependencies first.
///
/// Applied items come from earlier validated graphs, but external items and
/// removed dependencies may leave dangling edges behind; those are ignored.
pub(crate) fn order_applied<'a, I: ConfigItem>(
    items: impl IntoIterator<Item = &'a I>,
) -> Vec<ItemRef<I::Kind>> {
    let by_ref: BTreeMap<_, _> = items
        .into_iter()
        .map(|item| (item.item_ref(), item.clone()))
        .collect();
    topological_order(&by_ref).unwrap_or_else(|_| by_ref.keys().cloned().collect())
}

/// Topologically sort items; on a cycle returns one item on it.
fn topological_order<I: ConfigItem>(
    items: &BTreeMap<ItemRef<I::Kind>, I>,
) -> Result<Vec<ItemRef<I::Kind>>, ItemRef<I::Kind>> {
    let mut graph = DiGraph::<ItemRef<I::Kind>, ()>::new();
    let mut index = HashMap::with_capacity(items.len());
    for item_ref in items.keys() {
        index.insert(item_ref.clone(), graph.add_node(item_ref.clone()));
    }

    // Edge direction: dependency -> dependent.
    for (item_ref, item) in items {
        let to = index[item_ref];
        for dep in item.dependencies() {
            if let Some(&from) = index.get(&dep.item) {
                graph.update_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|nodes| nodes.into_iter().map(|n| graph[n].clone()).collect())
        .map_err(|cycle| graph[cycle.node_id()].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestItem, TestKind};

    fn position(order: &[ItemRef<TestKind>], name: &str) -> usize {
        order
            .iter()
            .position(|r| r.name == name)
            .unwrap_or_else(|| panic!("{name} missing from order"))
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let graph = Graph::new(vec![
            TestItem::new("c", &["b"]),
            TestItem::new("a", &[]),
            TestItem::new("b", &["a"]),
            TestItem::new("d", &["a", "c"]),
        ])
        .unwrap();

        let order = graph.topological_order();
        assert_eq!(order.len(), 4);
        assert!(position(order, "a") < position(order, "b"));
        assert!(position(order, "b") < position(order, "c"));
        assert!(position(order, "c") < position(order, "d"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Graph::new(vec![TestItem::new("a", &["b"]), TestItem::new("b", &["a"])])
            .unwrap_err();
        assert!(matches!(err, ValidationError::Cycle(_)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = Graph::new(vec![TestItem::new("a", &["a"])]).unwrap_err();
        assert!(matches!(err, ValidationError::Cycle(_)));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let err = Graph::new(vec![TestItem::new("a", &["missing"])]).unwrap_err();
        match err {
            ValidationError::DanglingDependency { item, dependency } => {
                assert_eq!(item, "Node/a");
                assert_eq!(dependency, "Node/missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_external_item_may_reference_missing_items() {
        let graph = Graph::new(vec![TestItem::new("a", &["missing"]).external()]).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = Graph::new(vec![TestItem::new("a", &[]), TestItem::new("a", &[])]).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateItem(_)));
    }

    #[test]
    fn test_order_applied_ignores_dangling() {
        let items = [TestItem::new("b", &["a", "gone"]), TestItem::new("a", &[])];
        let order = order_applied(items.iter());
        assert_eq!(position(&order, "a"), 0);
        assert_eq!(position(&order, "b"), 1);
    }
}
