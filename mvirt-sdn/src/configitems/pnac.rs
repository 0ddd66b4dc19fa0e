//! 802.1x port authenticator (PNAC) backed by hostapd.
//!
//! One hostapd instance per physical interface, with the integrated EAP server
//! enabled. Per interface the configurator owns:
//!
//! ```text
//! <conf_root>/<ifname>/{config,userdb,ca.pem,server.pem,server.key}
//! <run_root>/<ifname>/{pid,log}
//! ```

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::physif::{PhysIf, resolve};
use super::{Item, expect_item};
use crate::config::PnacConfig;
use crate::error::ConfiguratorError;
use crate::maclookup::MacLookup;
use crate::reconciler::{Configurator, OpContext};
use crate::supervisor::{PidFileOwner, ProcessSpec, start_process, stop_process};

const SECRET_MODE: u32 = 0o600;
const CONFIG_MODE: u32 = 0o644;

/// EAP method offered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EapMethod {
    Tls,
    TtlsPap,
    TtlsChap,
    TtlsMschapv2,
}

impl EapMethod {
    /// Phase 2 method name for tunneled methods.
    fn inner(self) -> Option<&'static str> {
        match self {
            EapMethod::Tls => None,
            EapMethod::TtlsPap => Some("PAP"),
            EapMethod::TtlsChap => Some("CHAP"),
            EapMethod::TtlsMschapv2 => Some("MSCHAPV2"),
        }
    }
}

/// Authenticator settings, compared as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnacSettings {
    pub eap_method: EapMethod,
    /// Client password for TTLS methods.
    #[serde(default)]
    pub password: String,
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    /// EAPoL version; 0 picks the default.
    #[serde(default)]
    pub eapol_version: u8,
    #[serde(default)]
    pub eap_reauth_period: u32,
    #[serde(default)]
    pub macsec: bool,
}

impl PnacSettings {
    fn eapol_version(&self) -> u8 {
        match self.eapol_version {
            0 if self.macsec => 3,
            0 => 2,
            explicit => explicit,
        }
    }
}

/// Port authenticator for one physical interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pnac {
    pub phys_if: PhysIf,
    #[serde(flatten)]
    pub settings: PnacSettings,
}

impl PartialEq for Pnac {
    fn eq(&self, other: &Self) -> bool {
        self.settings == other.settings && self.phys_if.mac == other.phys_if.mac
    }
}

/// Paths hostapd uses for one interface.
#[derive(Debug, Clone)]
struct HostapdPaths {
    conf_dir: PathBuf,
    run_dir: PathBuf,
    ctrl_dir: PathBuf,
}

impl HostapdPaths {
    fn new(config: &PnacConfig, ifname: &str) -> Self {
        Self {
            conf_dir: config.conf_root.join(ifname),
            run_dir: config.run_root.join(ifname),
            ctrl_dir: config.run_root.clone(),
        }
    }

    fn config(&self) -> PathBuf {
        self.conf_dir.join("config")
    }

    fn userdb(&self) -> PathBuf {
        self.conf_dir.join("userdb")
    }

    fn ca_cert(&self) -> PathBuf {
        self.conf_dir.join("ca.pem")
    }

    fn server_cert(&self) -> PathBuf {
        self.conf_dir.join("server.pem")
    }

    fn server_key(&self) -> PathBuf {
        self.conf_dir.join("server.key")
    }

    fn pid(&self) -> PathBuf {
        self.run_dir.join("pid")
    }

    fn log(&self) -> PathBuf {
        self.run_dir.join("log")
    }
}

/// EAP user database for the integrated EAP server.
fn render_userdb(settings: &PnacSettings) -> String {
    match settings.eap_method.inner() {
        None => "\"client\" TLS\n".to_string(),
        Some(inner) => format!(
            "\"client\" TTLS\n\"client\" TTLS-{inner} \"{}\" [2]\n",
            settings.password
        ),
    }
}

fn render_hostapd_config(settings: &PnacSettings, ifname: &str, paths: &HostapdPaths) -> String {
    let lines = [
        format!("interface={ifname}"),
        "driver=wired".to_string(),
        "logger_stdout=-1".to_string(),
        "logger_stdout_level=1".to_string(),
        format!("ctrl_interface={}", paths.ctrl_dir.display()),
        "ieee8021x=1".to_string(),
        format!("eapol_version={}", settings.eapol_version()),
        format!("eap_reauth_period={}", settings.eap_reauth_period),
        // Deliberately 1 instead of the historical 0: the certificates and
        // userdb are only used by the integrated EAP server.
        "eap_server=1".to_string(),
        format!("eap_user_file={}", paths.userdb().display()),
        format!("ca_cert={}", paths.ca_cert().display()),
        format!("server_cert={}", paths.server_cert().display()),
        format!("private_key={}", paths.server_key().display()),
        format!("macsec_policy={}", u8::from(settings.macsec)),
    ];

    let mut config = String::new();
    for line in lines {
        config.push_str(&line);
        config.push('\n');
    }
    config
}

/// Write a file with the given mode, replacing previous content and mode.
async fn write_file(path: &Path, content: &str, mode: u32) -> Result<(), ConfiguratorError> {
    let context = || format!("failed to write {}", path.display());
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .await
        .map_err(|e| ConfiguratorError::io(context(), e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| ConfiguratorError::io(context(), e))?;
    file.sync_all()
        .await
        .map_err(|e| ConfiguratorError::io(context(), e))?;
    // Left-overs from an earlier attempt keep their old mode otherwise.
    tokio::fs::set_permissions(path, Permissions::from_mode(mode))
        .await
        .map_err(|e| ConfiguratorError::io(context(), e))?;
    Ok(())
}

async fn write_artifacts(
    settings: &PnacSettings,
    ifname: &str,
    paths: &HostapdPaths,
) -> Result<(), ConfiguratorError> {
    tokio::fs::create_dir_all(&paths.conf_dir)
        .await
        .map_err(|e| {
            ConfiguratorError::io(format!("failed to create {}", paths.conf_dir.display()), e)
        })?;

    write_file(&paths.ca_cert(), &settings.ca_cert_pem, SECRET_MODE).await?;
    write_file(&paths.server_cert(), &settings.server_cert_pem, SECRET_MODE).await?;
    write_file(&paths.server_key(), &settings.server_key_pem, SECRET_MODE).await?;
    write_file(&paths.userdb(), &render_userdb(settings), SECRET_MODE).await?;
    write_file(
        &paths.config(),
        &render_hostapd_config(settings, ifname, paths),
        CONFIG_MODE,
    )
    .await?;
    Ok(())
}

async fn remove_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Failed to remove hostapd directory");
            false
        }
    }
}

pub struct PnacConfigurator {
    mac_lookup: Arc<dyn MacLookup>,
    config: PnacConfig,
    /// Serializes background start/stop per interface.
    interfaces: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PnacConfigurator {
    pub fn new(mac_lookup: Arc<dyn MacLookup>, config: PnacConfig) -> Self {
        Self {
            mac_lookup,
            config,
            interfaces: Mutex::default(),
        }
    }

    async fn interface_lock(&self, ifname: &str) -> Arc<Mutex<()>> {
        let mut interfaces = self.interfaces.lock().await;
        Arc::clone(interfaces.entry(ifname.to_string()).or_default())
    }

    fn hostapd(&self, paths: &HostapdPaths) -> ProcessSpec {
        ProcessSpec {
            namespace: self.config.netns.clone(),
            binary: self.config.binary.clone(),
            args: vec![
                "-B".to_string(),
                "-d".to_string(),
                "-t".to_string(),
                "-P".to_string(),
                paths.pid().display().to_string(),
                paths.config().display().to_string(),
            ],
            log_file: paths.log(),
            pid_file: paths.pid(),
            pid_file_owner: PidFileOwner::Process,
            ready_timeout: self.config.start_timeout,
            wait_for_exit: true,
        }
    }
}

#[async_trait]
impl Configurator<Item> for PnacConfigurator {
    async fn create(&self, ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let pnac = expect_item!(item, Pnac);
        let iface = resolve(self.mac_lookup.as_ref(), &pnac.phys_if.mac)?;
        let paths = HostapdPaths::new(&self.config, &iface.name);

        write_artifacts(&pnac.settings, &iface.name, &paths).await?;

        let spec = self.hostapd(&paths);
        let lock = self.interface_lock(&iface.name).await;
        let stop_timeout = self.config.stop_timeout;
        let done = ctx.continue_in_background();
        let ifname = iface.name;
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            let result = async {
                // A daemon from an interrupted earlier attempt would be orphaned
                // once its pid file is replaced.
                stop_process(&paths.pid(), stop_timeout).await?;
                tokio::fs::create_dir_all(&paths.run_dir)
                    .await
                    .map_err(|e| {
                        let context = format!("failed to create {}", paths.run_dir.display());
                        ConfiguratorError::io(context, e)
                    })?;
                let pid = start_process(&spec).await?;
                info!(ifname = %ifname, pid = pid, "hostapd started");
                Ok::<(), ConfiguratorError>(())
            }
            .await;
            if let Err(e) = &result {
                error!(ifname = %ifname, error = %e, "Failed to start hostapd");
            }
            done.done(result);
        });
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, item: &Item) -> Result<(), ConfiguratorError> {
        let pnac = expect_item!(item, Pnac);
        let iface = resolve(self.mac_lookup.as_ref(), &pnac.phys_if.mac)?;
        let paths = HostapdPaths::new(&self.config, &iface.name);
        let timeout = self.config.stop_timeout;
        let lock = self.interface_lock(&iface.name).await;

        let done = ctx.continue_in_background();
        let ifname = iface.name;
        tokio::spawn(async move {
            // Waits for a start still in progress, so its daemon gets stopped.
            let _guard = lock.lock().await;
            if let Err(e) = stop_process(&paths.pid(), timeout).await {
                error!(ifname = %ifname, error = %e, "Failed to stop hostapd");
                done.done(Err(e.into()));
                return;
            }

            let conf_removed = remove_dir(&paths.conf_dir).await;
            let run_removed = remove_dir(&paths.run_dir).await;
            if conf_removed && run_removed {
                info!(ifname = %ifname, "hostapd stopped and cleaned up");
            } else {
                warn!(ifname = %ifname, "hostapd stopped, partial cleanup: artifacts left behind");
            }
            done.done(Ok(()));
        });
        Ok(())
    }

    fn needs_recreate(&self, _old: &Item, _new: &Item) -> bool {
        true
    }
}
