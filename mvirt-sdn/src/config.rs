//! Agent configuration: filesystem roots and daemon settings.

use std::path::PathBuf;
use std::time::Duration;

/// hostapd settings for port authenticators.
#[derive(Debug, Clone)]
pub struct PnacConfig {
    /// Path to the hostapd binary.
    pub binary: PathBuf,
    /// Parent of the per-interface config directories.
    pub conf_root: PathBuf,
    /// Parent of the per-interface runtime directories; also the control
    /// interface directory.
    pub run_root: PathBuf,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Network namespace hostapd runs in (None = agent's own namespace).
    pub netns: Option<String>,
}

impl Default for PnacConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/sbin/hostapd"),
            conf_root: PathBuf::from("/etc/hostapd"),
            run_root: PathBuf::from("/run/hostapd"),
            start_timeout: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(30),
            netns: None,
        }
    }
}

/// Configuration for the configurators.
#[derive(Debug, Clone)]
pub struct Config {
    pub pnac: PnacConfig,
    /// Directory listing network interfaces (`<dir>/<ifname>/address`).
    pub sysfs_net_dir: PathBuf,
    /// Where `ip netns` keeps named namespaces.
    pub netns_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pnac: PnacConfig::default(),
            sysfs_net_dir: PathBuf::from("/sys/class/net"),
            netns_dir: PathBuf::from("/run/netns"),
        }
    }
}
