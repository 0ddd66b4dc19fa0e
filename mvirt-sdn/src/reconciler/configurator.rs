//! Configurator trait and the per-type registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::completion::OpContext;
use crate::depgraph::ConfigItem;
use crate::error::{ConfiguratorError, RegistryError};

/// Realizes one item type against the operating system.
///
/// Configurators own no item instances; every call gets the items involved as
/// read-only references. Long-running work goes through
/// [`OpContext::continue_in_background`].
#[async_trait]
pub trait Configurator<I: ConfigItem>: Send + Sync {
    /// Create the item. Must be safe to retry after a partial failure.
    async fn create(&self, ctx: &OpContext, item: &I) -> Result<(), ConfiguratorError>;

    /// Change an existing item in place.
    ///
    /// The default returns `NotImplemented`, which makes the scheduler delete
    /// and re-create the item instead.
    async fn modify(&self, _ctx: &OpContext, _old: &I, _new: &I) -> Result<(), ConfiguratorError> {
        Err(ConfiguratorError::NotImplemented)
    }

    /// Delete the item and every artifact its create produced.
    async fn delete(&self, ctx: &OpContext, item: &I) -> Result<(), ConfiguratorError>;

    /// True if a change from `old` to `new` requires delete + create.
    fn needs_recreate(&self, old: &I, new: &I) -> bool;
}

/// Immutable mapping from item type to configurator.
pub struct Registry<I: ConfigItem> {
    configurators: HashMap<I::Kind, Arc<dyn Configurator<I>>>,
}

impl<I: ConfigItem> Registry<I> {
    pub fn builder() -> RegistryBuilder<I> {
        RegistryBuilder {
            configurators: HashMap::new(),
        }
    }

    pub fn lookup(&self, kind: I::Kind) -> Result<Arc<dyn Configurator<I>>, ConfiguratorError> {
        self.configurators
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConfiguratorError::NotFound(kind.to_string()))
    }

    pub fn len(&self) -> usize {
        self.configurators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurators.is_empty()
    }
}

/// Collects configurators before the registry is frozen.
pub struct RegistryBuilder<I: ConfigItem> {
    configurators: HashMap<I::Kind, Arc<dyn Configurator<I>>>,
}

impl<I: ConfigItem> RegistryBuilder<I> {
    /// Register the configurator for `kind`. One configurator per type.
    pub fn register(
        &mut self,
        kind: I::Kind,
        configurator: Arc<dyn Configurator<I>>,
    ) -> Result<&mut Self, RegistryError> {
        if self.configurators.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind.to_string()));
        }
        self.configurators.insert(kind, configurator);
        Ok(self)
    }

    pub fn build(self) -> Registry<I> {
        Registry {
            configurators: self.configurators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Recorder, TestConfigurator, TestItem, TestKind};

    #[test]
    fn test_register_and_lookup() {
        let recorder = Recorder::default();
        let mut builder = Registry::<TestItem>::builder();
        builder
            .register(TestKind::Node, Arc::new(TestConfigurator::new(recorder)))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(TestKind::Node).is_ok());
        assert!(matches!(
            registry.lookup(TestKind::Unregistered),
            Err(ConfiguratorError::NotFound(kind)) if kind == "Unregistered"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let recorder = Recorder::default();
        let mut builder = Registry::<TestItem>::builder();
        builder
            .register(TestKind::Node, Arc::new(TestConfigurator::new(recorder.clone())))
            .unwrap();
        let err = builder
            .register(TestKind::Node, Arc::new(TestConfigurator::new(recorder)))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AlreadyRegistered(kind) if kind == "Node"));
    }
}
