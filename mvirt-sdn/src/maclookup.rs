//! MAC address to live interface name resolution.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InvalidMac;

/// Ethernet MAC address. Serialized as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = InvalidMac;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(InvalidMac(s.to_string()));
        }

        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(InvalidMac(s.to_string()));
            }
            mac[i] = u8::from_str_radix(part, 16).map_err(|_| InvalidMac(s.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl TryFrom<String> for MacAddr {
    type Error = InvalidMac;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// A live network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub mac: MacAddr,
}

/// Resolves a MAC address to the interface currently carrying it.
pub trait MacLookup: Send + Sync {
    fn interface_by_mac(&self, mac: &MacAddr) -> Option<NetInterface>;
}

/// Looks interfaces up in sysfs (`<root>/<ifname>/address`).
#[derive(Debug, Clone)]
pub struct SysfsMacLookup {
    root: PathBuf,
}

impl SysfsMacLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_mac(&self, name: &str) -> Option<MacAddr> {
        let path = self.root.join(name).join("address");
        let content = fs::read_to_string(&path).ok()?;
        content.trim().parse().ok()
    }
}

impl Default for SysfsMacLookup {
    fn default() -> Self {
        Self::new(Path::new("/sys/class/net"))
    }
}

impl MacLookup for SysfsMacLookup {
    fn interface_by_mac(&self, mac: &MacAddr) -> Option<NetInterface> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Cannot list interfaces");
                return None;
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name != "lo")
            .collect();
        // Stable pick if several interfaces share the MAC (bond slaves, vlans).
        names.sort();

        names.into_iter().find_map(|name| {
            (self.read_mac(&name).as_ref() == Some(mac)).then(|| NetInterface {
                name,
                mac: *mac,
            })
        })
    }
}
