pub mod exec;
pub mod output;

pub use output::{demux, SharedBuffer};

use bollard::container::Config;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{self, DevContainerConfig};
use crate::core::{ContainerRuntime, CreateRequest, RunnerError, RunnerResult};

pub const DEFAULT_WORKSPACE: &str = "/workspace";
const LOOPBACK: &str = "127.0.0.1";

/// Keeps the container alive between exec calls.
pub fn idle_command() -> Vec<String> {
    ["sh", "-c", "while sleep 1000; do :; done"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Creates, starts, stops and execs into devcontainers.
#[derive(Clone)]
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn create_container(
        &self,
        image: &str,
        project_path: &Path,
        config: &DevContainerConfig,
    ) -> RunnerResult<String> {
        let request = container_config(image, project_path, config)?;

        let id = self
            .runtime
            .create_container(request)
            .await
            .map_err(RunnerError::ContainerCreate)?;

        info!(container_id = %id, image = %image, "Container created");
        Ok(id)
    }

    pub async fn start_container(&self, container_id: &str) -> RunnerResult<()> {
        self.runtime
            .start_container(container_id)
            .await
            .map_err(RunnerError::ContainerStart)?;

        info!(container_id = %container_id, "Container started");
        Ok(())
    }

    pub async fn stop_container(&self, container_id: &str) -> RunnerResult<()> {
        self.runtime
            .stop_container(container_id)
            .await
            .map_err(|source| RunnerError::ContainerStop {
                container_id: container_id.to_string(),
                source,
            })?;

        info!(container_id = %container_id, "Container stopped");
        Ok(())
    }
}

/// Translates a devcontainer manifest into a create request. Pure; fails on
/// unknown mount types and malformed ports before anything reaches the
/// runtime.
pub fn container_config(
    image: &str,
    project_path: &Path,
    config: &DevContainerConfig,
) -> RunnerResult<CreateRequest> {
    let env: Vec<String> = config
        .container_env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let mut mounts = Vec::new();
    let mut cluster_mounts = Vec::new();
    let working_dir = match (&config.workspace_mount, &config.workspace_folder) {
        (Some(mount), Some(folder)) => {
            push_mount(&mut mounts, &mut cluster_mounts, mount)?;
            folder.clone()
        }
        _ => {
            mounts.push(Mount {
                source: Some(project_path.to_string_lossy().into_owned()),
                target: Some(DEFAULT_WORKSPACE.to_string()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            });
            DEFAULT_WORKSPACE.to_string()
        }
    };

    for mount in &config.mounts {
        push_mount(&mut mounts, &mut cluster_mounts, mount)?;
    }

    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for entry in config.app_port.iter().flat_map(|p| p.0.iter()) {
        let (host, container) = parse_port(entry)?;
        let key = format!("{container}/tcp");
        port_bindings.insert(
            key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(LOOPBACK.to_string()),
                host_port: Some(host.to_string()),
            }]),
        );
        exposed_ports.insert(key, HashMap::new());
    }

    let host_config = HostConfig {
        mounts: Some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        init: config.init,
        privileged: config.privileged,
        cap_add: (!config.cap_add.is_empty()).then(|| config.cap_add.clone()),
        security_opt: (!config.security_opt.is_empty()).then(|| config.security_opt.clone()),
        ..Default::default()
    };

    debug!(image = %image, working_dir = %working_dir, "Prepared container config");

    Ok(CreateRequest {
        config: Config {
            image: Some(image.to_string()),
            env: Some(env),
            user: config.container_user.clone(),
            cmd: Some(idle_command()),
            working_dir: Some(working_dir),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        },
        cluster_mounts,
    })
}

// Cluster mounts carry no typed variant; their index is recorded instead.
fn push_mount(mounts: &mut Vec<Mount>, cluster_mounts: &mut Vec<usize>, mount: &config::Mount) -> RunnerResult<()> {
    let typ = match mount.typ.as_str() {
        "" | "bind" => Some(MountTypeEnum::BIND),
        "volume" => Some(MountTypeEnum::VOLUME),
        "tmpfs" => Some(MountTypeEnum::TMPFS),
        "npipe" | "named-pipe" => Some(MountTypeEnum::NPIPE),
        "cluster" => {
            cluster_mounts.push(mounts.len());
            None
        }
        other => return Err(RunnerError::MountType(other.to_string())),
    };

    mounts.push(Mount {
        source: (!mount.source.is_empty()).then(|| mount.source.clone()),
        target: Some(mount.destination.clone()),
        typ,
        read_only: mount.read_only.then_some(true),
        ..Default::default()
    });
    Ok(())
}

/// `PORT` publishes the same port number, `HOST:CONTAINER` maps across.
fn parse_port(entry: &str) -> RunnerResult<(u16, u16)> {
    let invalid = || RunnerError::InvalidPort(entry.to_string());
    let number = |s: &str| s.trim().parse::<u16>().map_err(|_| invalid());

    match entry.split_once(':') {
        Some((host, container)) => Ok((number(host)?, number(container)?)),
        None => {
            let port = number(entry)?;
            Ok((port, port))
        }
    }
}
