use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mvirt_sdn::configitems::{self, Item};
use mvirt_sdn::maclookup::SysfsMacLookup;
use mvirt_sdn::{Config, PassResult, PnacConfig, Reconciler};

#[derive(Parser)]
#[command(name = "mvirt-sdn")]
#[command(about = "mvirt SDN agent - reconciles the host network with a desired topology")]
struct Args {
    /// Desired state document (JSON list of items)
    #[arg(long)]
    desired: PathBuf,

    /// Seconds between reconciliation passes (0 = run a single pass and exit)
    #[arg(long, default_value_t = 0)]
    interval: u64,

    /// Cancel a pass that runs longer than this many seconds (0 = no limit)
    #[arg(long, default_value_t = 0)]
    pass_timeout: u64,

    /// Parent directory for per-interface hostapd configuration
    #[arg(long, default_value = "/etc/hostapd")]
    conf_root: PathBuf,

    /// Parent directory for per-interface hostapd runtime files
    #[arg(long, default_value = "/run/hostapd")]
    run_root: PathBuf,

    /// Path to the hostapd binary
    #[arg(long, default_value = "/usr/local/sbin/hostapd")]
    hostapd: PathBuf,

    /// Network namespace to run hostapd in
    #[arg(long)]
    netns: Option<String>,

    /// sysfs directory listing network interfaces
    #[arg(long, default_value = "/sys/class/net")]
    sysfs_net: PathBuf,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            pnac: PnacConfig {
                binary: self.hostapd.clone(),
                conf_root: self.conf_root.clone(),
                run_root: self.run_root.clone(),
                netns: self.netns.clone(),
                ..PnacConfig::default()
            },
            sysfs_net_dir: self.sysfs_net.clone(),
            ..Config::default()
        }
    }
}

async fn load_desired(path: &Path) -> anyhow::Result<Vec<Item>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Cancel signal for one pass: fires on shutdown or when the pass times out.
fn pass_cancel(
    shutdown: &watch::Receiver<bool>,
    timeout: Option<Duration>,
) -> (watch::Receiver<bool>, tokio::task::JoinHandle<()>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        let expired = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = expired => warn!(timeout = ?timeout, "Reconciliation pass timed out, cancelling"),
            _ = shutdown.wait_for(|stop| *stop) => {}
        }
        let _ = cancel_tx.send(true);
    });
    (cancel_rx, handle)
}

fn report(result: &PassResult<configitems::ItemType>) {
    for (item, err) in &result.failed {
        warn!(item = %item, error = %err, "Item failed");
    }
    for item in &result.pending {
        warn!(item = %item, "Item pending on unready dependency");
    }
    for item in &result.blocked_deletes {
        warn!(item = %item, "Delete blocked by dependents");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mvirt_sdn=info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.config();

    info!(
        desired = %args.desired.display(),
        interval = args.interval,
        conf_root = %config.pnac.conf_root.display(),
        run_root = %config.pnac.run_root.display(),
        "Starting mvirt-sdn"
    );

    let mac_lookup = Arc::new(SysfsMacLookup::new(&config.sysfs_net_dir));
    let registry = configitems::registry(&config, mac_lookup)?;
    let mut reconciler = Reconciler::new(Arc::new(registry));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(true);
    });

    let single_pass = args.interval == 0;
    let pass_timeout = (args.pass_timeout > 0).then(|| Duration::from_secs(args.pass_timeout));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match load_desired(&args.desired).await {
            Ok(desired) => {
                info!(items = desired.len(), "Starting reconciliation pass");
                let (cancel, timer) = pass_cancel(&shutdown_rx, pass_timeout);
                let result = reconciler.reconcile_with_cancel(desired, cancel).await;
                timer.abort();

                match result {
                    Ok(result) => {
                        report(&result);
                        if single_pass && !result.converged() {
                            bail!(
                                "reconciliation did not converge: {} failed, {} pending, {} blocked",
                                result.failed.len(),
                                result.pending.len(),
                                result.blocked_deletes.len()
                            );
                        }
                    }
                    Err(e) if single_pass => return Err(e.into()),
                    Err(e) => error!(error = %e, "Reconciliation pass rejected"),
                }
            }
            Err(e) if single_pass => return Err(e),
            Err(e) => error!(error = %e, "Failed to load desired state"),
        }

        if single_pass {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!("Shutdown complete");
    Ok(())
}
