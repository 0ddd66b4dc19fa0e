//! mvirt-sdn - Declarative network topology agent.
//!
//! Drives the host's network and security configuration toward a declared
//! desired state, one reconciliation pass at a time.
//!
//! ## Architecture
//!
//! - **depgraph**: Typed, named config items and their dependency graph
//! - **reconciler**: Diff, order and dispatch create/modify/delete operations
//! - **configitems**: Physical interfaces, namespaces, bridges and 802.1x (PNAC)
//! - **supervisor**: Pid-file based start/stop of daemons such as hostapd
//! - **maclookup**: MAC address to interface name resolution via sysfs

pub mod config;
pub mod configitems;
pub mod depgraph;
pub mod error;
pub mod maclookup;
pub mod reconciler;
pub mod supervisor;

#[cfg(test)]
mod test_util;

pub use config::{Config, PnacConfig};
pub use reconciler::{PassResult, Reconciler};
