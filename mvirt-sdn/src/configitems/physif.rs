//! Physical interfaces. Never created by the agent, only verified.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Item, expect_item};
use crate::error::ConfiguratorError;
use crate::maclookup::{MacAddr, MacLookup, NetInterface};
use crate::reconciler::{Configurator, OpContext};

/// Physical network interface, identified by its MAC address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysIf {
    pub mac: MacAddr,
    /// Name the topology uses for the interface.
    #[serde(default)]
    pub logical_label: String,
}

impl PartialEq for PhysIf {
    fn eq(&self, other: &Self) -> bool {
        self.mac == other.mac
    }
}

/// Resolve a MAC to the interface carrying it.
pub(crate) fn resolve(
    lookup: &dyn MacLookup,
    mac: &MacAddr,
) -> Result<NetInterface, ConfiguratorError> {
    lookup.interface_by_mac(mac).ok_or_else(|| {
        let err = ConfiguratorError::InterfaceNotFound(mac.to_string());
        error!(mac = %mac, "{err}");
        err
    })
}

pub struct PhysIfConfigurator {
    mac_lookup: Arc<dyn MacLookup>,
}

impl PhysIfConfigurator {
    pub fn new(mac_lookup: Arc<dyn MacLookup>) -> Self {
        Self { mac_lookup }
    }
}

#[async_trait]
impl Configurator<Item> for PhysIfConfigurator {
    async fn create(&self, _ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let phys_if = expect_item!(item, PhysIf);
        let iface = resolve(self.mac_lookup.as_ref(), &phys_if.mac)?;
        debug!(
            mac = %phys_if.mac,
            ifname = %iface.name,
            label = %phys_if.logical_label,
            "Physical interface present"
        );
        Ok(())
    }

    async fn modify(
        &self,
        _ctx: &OpContext,
        _old: &Item,
        _new: &Item,
    ) -> Result<(), ConfiguratorError> {
        Ok(())
    }

    async fn delete(&self, _ctx: &OpContext, _item: &Item) -> Result<(), ConfiguratorError> {
        Ok(())
    }

    fn needs_recreate(&self, _old: &Item, _new: &Item) -> bool {
        false
    }
}
