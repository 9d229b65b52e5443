mod docker;

pub use docker::DockerCli;

use std::path::Path;
use std::process::Command;

use anyhow::{Result, bail};

/// A successfully provisioned sandbox.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Host-side port forwarded into the sandbox.
    pub external_port: u16,
    /// Engine handle needed to tear the sandbox down later.
    pub container: String,
}

/// Trait for engines that build and run challenge sandboxes
///
/// Implementations are expected to be slow (image builds, process starts)
/// and are always invoked without any state lock held. `deploy` must retry
/// transient host-port collisions internally up to a bounded number of
/// attempts before failing.
pub trait Provisioner: Send + Sync {
    /// Builds the sandbox from `build_dir` and starts it, forwarding a host
    /// port to `internal_port` (or the recipe's declared port).
    fn deploy(
        &self,
        build_dir: &Path,
        instance_id: u64,
        internal_port: Option<u16>,
    ) -> Result<Deployment>;

    /// Stops and removes the sandbox behind `container`.
    fn teardown(&self, container: &str) -> Result<()>;
}

/// Creates the sandbox engine adapter, failing fast when no engine is
/// available on this host.
pub fn create_provisioner() -> Result<Box<dyn Provisioner>> {
    let docker_found = Command::new("docker")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);

    if !docker_found {
        bail!("docker CLI not found in PATH; no sandbox engine available");
    }

    log::info!("Creating DockerCli provisioner");
    Ok(Box::new(DockerCli::new()))
}
