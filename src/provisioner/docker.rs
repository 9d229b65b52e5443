use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use rand::Rng;

use super::{Deployment, Provisioner};

const MIN_HOST_PORT: u16 = 30000;
const MAX_HOST_PORT: u16 = 40000;
const MAX_PORT_TRIES: u32 = 30;
const DEFAULT_INTERNAL_PORT: u16 = 5000;

/// Sandbox engine backed by the docker CLI.
///
/// Builds an image from the challenge directory and runs one container per
/// instance, publishing a random high host port. Containers are named
/// `<image>_<instance_id>` so the handle alone is enough for teardown.
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner for DockerCli {
    fn deploy(
        &self,
        build_dir: &Path,
        instance_id: u64,
        internal_port: Option<u16>,
    ) -> Result<Deployment> {
        let build_dir = build_dir
            .canonicalize()
            .with_context(|| format!("challenge directory {} not found", build_dir.display()))?;
        let dockerfile = build_dir.join("Dockerfile");
        if !dockerfile.is_file() {
            bail!("Dockerfile not found in {}", build_dir.display());
        }

        let image = image_name(&build_dir)?;
        let internal = match internal_port {
            Some(port) => port,
            None => expose_port(&dockerfile)?,
        };

        log::info!("building image {image} from {}", build_dir.display());
        let build = Command::new("docker")
            .args(["build", "-t", &image])
            .arg(&build_dir)
            .output()
            .context("failed to invoke docker build")?;
        if !build.status.success() {
            bail!(
                "docker build failed for {image}: {}",
                String::from_utf8_lossy(&build.stderr).trim()
            );
        }

        let container = format!("{image}_{instance_id}");
        let mut rng = rand::thread_rng();
        let mut last_error = None;

        for _ in 0..MAX_PORT_TRIES {
            let host_port: u16 = rng.gen_range(MIN_HOST_PORT..=MAX_HOST_PORT);
            let run = Command::new("docker")
                .args([
                    "run",
                    "-d",
                    "-p",
                    &format!("{host_port}:{internal}"),
                    "--name",
                    &container,
                    &image,
                ])
                .output()
                .context("failed to invoke docker run")?;

            if run.status.success() {
                // The published port can differ from the requested one when
                // the engine resolves the binding itself.
                let external = bound_host_port(&container, internal).unwrap_or(host_port);
                log::info!("deployed {container} on host port {external}");
                return Ok(Deployment {
                    external_port: external,
                    container,
                });
            }

            let stderr = String::from_utf8_lossy(&run.stderr).trim().to_string();
            if !is_port_collision(&stderr) {
                bail!("docker run failed for {container}: {stderr}");
            }

            // A failed bind can leave a created container holding the name.
            let _ = Command::new("docker").args(["rm", "-f", &container]).output();
            last_error = Some(stderr);
        }

        Err(anyhow!(
            "failed to allocate a host port after {MAX_PORT_TRIES} tries: {}",
            last_error.unwrap_or_default()
        ))
    }

    fn teardown(&self, container: &str) -> Result<()> {
        let output = Command::new("docker")
            .args(["rm", "-f", container])
            .output()
            .context("failed to invoke docker rm")?;
        if !output.status.success() {
            bail!(
                "docker rm -f {container} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        log::info!("removed container {container}");
        Ok(())
    }
}

fn image_name(build_dir: &Path) -> Result<String> {
    let name = build_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_lowercase)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("cannot derive image name from {}", build_dir.display()))?;
    Ok(name)
}

/// Port declared by the build recipe's `EXPOSE` line, or the engine default.
fn expose_port(dockerfile: &Path) -> Result<u16> {
    let content = fs::read_to_string(dockerfile)
        .with_context(|| format!("failed to read {}", dockerfile.display()))?;

    for line in content.lines() {
        let line = line.trim();
        let Some(rest) = line
            .split_once(char::is_whitespace)
            .filter(|(word, _)| word.eq_ignore_ascii_case("EXPOSE"))
            .map(|(_, rest)| rest)
        else {
            continue;
        };
        if let Some(first) = rest.split_whitespace().next() {
            let port = first.split('/').next().unwrap_or(first);
            if let Ok(port) = port.parse::<u16>() {
                return Ok(port);
            }
        }
    }

    Ok(DEFAULT_INTERNAL_PORT)
}

fn is_port_collision(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("port is already allocated")
        || stderr.contains("address already in use")
        || stderr.contains("bind")
}

/// Asks the engine which host port actually got bound.
fn bound_host_port(container: &str, internal: u16) -> Option<u16> {
    let output = Command::new("docker")
        .args(["port", container, &format!("{internal}/tcp")])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter_map(|line| line.rsplit(':').next())
        .find_map(|port| port.trim().parse::<u16>().ok())
}
