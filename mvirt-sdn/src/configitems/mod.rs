//! Network configuration items and their configurators.
//!
//! The item set is closed: [`Item`] is a tagged union and [`ItemType`] its
//! discriminator, which selects the configurator in the registry.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::depgraph::{ConfigItem, Dependency};
use crate::error::RegistryError;
use crate::maclookup::MacLookup;
use crate::reconciler::Registry;

/// Unwrap the expected `Item` variant or return `InvalidItem`.
macro_rules! expect_item {
    ($item:expr, $variant:ident) => {
        match $item {
            $crate::configitems::Item::$variant(inner) => inner,
            other => {
                return Err($crate::error::ConfiguratorError::InvalidItem {
                    expected: $crate::configitems::ItemType::$variant.to_string(),
                    actual: $crate::depgraph::ConfigItem::kind(other).to_string(),
                });
            }
        }
    };
}
pub(crate) use expect_item;

mod bridge;
mod ip;
mod netns;
mod physif;
mod pnac;

pub use bridge::{Bridge, BridgeConfigurator};
pub use netns::{NetNamespace, NetNamespaceConfigurator};
pub use physif::{PhysIf, PhysIfConfigurator};
pub use pnac::{EapMethod, Pnac, PnacConfigurator, PnacSettings};

/// Item type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    PhysIf,
    NetNamespace,
    Bridge,
    Pnac,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemType::PhysIf => "PhysIf",
            ItemType::NetNamespace => "NetNamespace",
            ItemType::Bridge => "Bridge",
            ItemType::Pnac => "PNAC",
        };
        f.write_str(s)
    }
}

/// A desired network configuration item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    PhysIf(PhysIf),
    NetNamespace(NetNamespace),
    Bridge(Bridge),
    Pnac(Pnac),
}

impl ConfigItem for Item {
    type Kind = ItemType;

    fn kind(&self) -> ItemType {
        match self {
            Item::PhysIf(_) => ItemType::PhysIf,
            Item::NetNamespace(_) => ItemType::NetNamespace,
            Item::Bridge(_) => ItemType::Bridge,
            Item::Pnac(_) => ItemType::Pnac,
        }
    }

    fn name(&self) -> String {
        match self {
            Item::PhysIf(phys_if) => phys_if.mac.to_string(),
            Item::NetNamespace(ns) => ns.name.clone(),
            Item::Bridge(bridge) => bridge.name.clone(),
            Item::Pnac(pnac) => pnac.phys_if.mac.to_string(),
        }
    }

    fn label(&self) -> String {
        match self {
            Item::PhysIf(phys_if) if !phys_if.logical_label.is_empty() => {
                phys_if.logical_label.clone()
            }
            Item::Pnac(pnac) => format!("{} (PNAC)", pnac.phys_if.logical_label),
            _ => self.name(),
        }
    }

    fn dependencies(&self) -> Vec<Dependency<ItemType>> {
        match self {
            Item::PhysIf(_) | Item::NetNamespace(_) => Vec::new(),
            Item::Bridge(bridge) => bridge
                .ports
                .iter()
                .map(|mac| {
                    Dependency::new(
                        ItemType::PhysIf,
                        mac.to_string(),
                        "Bridged physical interface must exist",
                    )
                })
                .collect(),
            Item::Pnac(pnac) => vec![Dependency::new(
                ItemType::PhysIf,
                pnac.phys_if.mac.to_string(),
                "Underlying physical network interface must exist",
            )],
        }
    }
}

/// Build the registry with a configurator for every item type.
pub fn registry(
    config: &Config,
    mac_lookup: Arc<dyn MacLookup>,
) -> Result<Registry<Item>, RegistryError> {
    let mut builder = Registry::builder();
    builder
        .register(
            ItemType::PhysIf,
            Arc::new(PhysIfConfigurator::new(Arc::clone(&mac_lookup))),
        )?
        .register(
            ItemType::NetNamespace,
            Arc::new(NetNamespaceConfigurator::new(&config.netns_dir)),
        )?
        .register(
            ItemType::Bridge,
            Arc::new(BridgeConfigurator::new(Arc::clone(&mac_lookup))),
        )?
        .register(
            ItemType::Pnac,
            Arc::new(PnacConfigurator::new(mac_lookup, config.pnac.clone())),
        )?;
    Ok(builder.build())
}
