//! Linux bridges over physical interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ip::{ip, link_exists};
use super::physif::resolve;
use super::{Item, expect_item};
use crate::error::ConfiguratorError;
use crate::maclookup::{MacAddr, MacLookup};
use crate::reconciler::{Configurator, OpContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    /// Bridge interface name.
    pub name: String,
    /// MACs of the physical interfaces to enslave.
    #[serde(default)]
    pub ports: Vec<MacAddr>,
}

/// Ports to release and ports to enslave when going from `old` to `new`.
fn port_changes(old: &[MacAddr], new: &[MacAddr]) -> (Vec<MacAddr>, Vec<MacAddr>) {
    let removed = old.iter().filter(|mac| !new.contains(mac)).copied().collect();
    let added = new.iter().filter(|mac| !old.contains(mac)).copied().collect();
    (removed, added)
}

pub struct BridgeConfigurator {
    mac_lookup: Arc<dyn MacLookup>,
}

impl BridgeConfigurator {
    pub fn new(mac_lookup: Arc<dyn MacLookup>) -> Self {
        Self { mac_lookup }
    }

    async fn enslave(&self, bridge: &str, mac: &MacAddr) -> Result<(), ConfiguratorError> {
        let port = resolve(self.mac_lookup.as_ref(), mac)?;
        ip(&["link", "set", &port.name, "master", bridge]).await?;
        ip(&["link", "set", &port.name, "up"]).await?;
        info!(bridge = %bridge, port = %port.name, "Port attached");
        Ok(())
    }
}

#[async_trait]
impl Configurator<Item> for BridgeConfigurator {
    async fn create(&self, _ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let bridge = expect_item!(item, Bridge);
        if link_exists(&bridge.name).await? {
            info!(bridge = %bridge.name, "Bridge already exists");
        } else {
            ip(&["link", "add", &bridge.name, "type", "bridge"]).await?;
        }
        for mac in &bridge.ports {
            self.enslave(&bridge.name, mac).await?;
        }
        ip(&["link", "set", &bridge.name, "up"]).await?;
        info!(bridge = %bridge.name, ports = bridge.ports.len(), "Bridge created and up");
        Ok(())
    }

    async fn modify(
        &self,
        _ctx: &OpContext,
        old: &Item,
        new: &Item,
    ) -> Result<(), ConfiguratorError> {
        let old = expect_item!(old, Bridge);
        let new = expect_item!(new, Bridge);
        let (removed, added) = port_changes(&old.ports, &new.ports);

        for mac in &removed {
            // A port that vanished from the host is already detached.
            match self.mac_lookup.interface_by_mac(mac) {
                Some(port) => {
                    ip(&["link", "set", &port.name, "nomaster"]).await?;
                    info!(bridge = %new.name, port = %port.name, "Port released");
                }
                None => warn!(bridge = %new.name, mac = %mac, "Released port not present"),
            }
        }
        for mac in &added {
            self.enslave(&new.name, mac).await?;
        }
        Ok(())
    }

    async fn delete(&self, _ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let bridge = expect_item!(item, Bridge);
        if !link_exists(&bridge.name).await? {
            info!(bridge = %bridge.name, "Bridge already gone");
            return Ok(());
        }
        ip(&["link", "del", &bridge.name]).await?;
        info!(bridge = %bridge.name, "Bridge deleted");
        Ok(())
    }

    fn needs_recreate(&self, _old: &Item, _new: &Item) -> bool {
        false
    }
}
