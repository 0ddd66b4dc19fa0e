//! Named network namespaces (`ip netns`).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ip::ip;
use super::{Item, expect_item};
use crate::error::ConfiguratorError;
use crate::reconciler::{Configurator, OpContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetNamespace {
    pub name: String,
}

pub struct NetNamespaceConfigurator {
    /// Directory holding the namespace bind mounts (`/run/netns`).
    netns_dir: PathBuf,
}

impl NetNamespaceConfigurator {
    pub fn new(netns_dir: impl Into<PathBuf>) -> Self {
        Self {
            netns_dir: netns_dir.into(),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.netns_dir.join(name).exists()
    }
}

#[async_trait]
impl Configurator<Item> for NetNamespaceConfigurator {
    async fn create(&self, _ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let ns = expect_item!(item, NetNamespace);
        if self.exists(&ns.name) {
            info!(netns = %ns.name, "Network namespace already exists");
            return Ok(());
        }
        ip(&["netns", "add", &ns.name]).await?;
        info!(netns = %ns.name, "Network namespace created");
        Ok(())
    }

    async fn delete(&self, _ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let ns = expect_item!(item, NetNamespace);
        if !self.exists(&ns.name) {
            info!(netns = %ns.name, "Network namespace already gone");
            return Ok(());
        }
        ip(&["netns", "del", &ns.name]).await?;
        info!(netns = %ns.name, "Network namespace deleted");
        Ok(())
    }

    fn needs_recreate(&self, _old: &Item, _new: &Item) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_existing_namespace_left_alone() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blue"), "").unwrap();
        let configurator = NetNamespaceConfigurator::new(dir.path());
        let (ctx, _rx) = context();

        let item = Item::NetNamespace(NetNamespace {
            name: "blue".into(),
        });
        configurator.create(&ctx, &item).await.unwrap();
        assert!(dir.path().join("blue").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_namespace() {
        let dir = TempDir::new().unwrap();
        let configurator = NetNamespaceConfigurator::new(dir.path());
        let (ctx, _rx) = context();

        let item = Item::NetNamespace(NetNamespace {
            name: "gone".into(),
        });
        configurator.delete(&ctx, &item).await.unwrap();
    }
}
