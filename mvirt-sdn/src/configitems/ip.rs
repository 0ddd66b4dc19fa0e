//! Thin wrapper around the `ip` command.

use tokio::process::Command;
use tracing::debug;

use crate::error::ConfiguratorError;

/// Run `ip <args>`, failing with its stderr on a non-zero exit.
pub(crate) async fn ip(args: &[&str]) -> Result<(), ConfiguratorError> {
    debug!(args = ?args, "Running ip");
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| ConfiguratorError::io("failed to execute ip", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConfiguratorError::Command(format!(
            "ip {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// True if the link exists.
pub(crate) async fn link_exists(name: &str) -> Result<bool, ConfiguratorError> {
    let output = Command::new("ip")
        .args(["link", "show", name])
        .output()
        .await
        .map_err(|e| ConfiguratorError::io("failed to execute ip", e))?;
    Ok(output.status.success())
}
