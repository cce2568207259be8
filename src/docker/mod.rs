pub mod engine;
pub mod image;
pub mod registry;

pub use image::{archive_context, image_tag, ImageManager};
pub use registry::{registry_host, NoCredentials, RegistryAuth, StaticCredentials};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bollard::{
    auth::DockerCredentials,
    container::{
        CreateContainerOptions, LogOutput, StartContainerOptions, UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::{BuildImageOptions, CreateImageOptions},
    Docker,
};
use futures_util::{future, StreamExt};
use std::path::PathBuf;
use tracing::debug;

use crate::core::config::DockerSettings;
use crate::core::{ContainerRuntime, CreateRequest, ImageRuntime, OutputFrame, OutputStream};
use crate::monitoring::LogSink;

/// Container and image runtime backed by the local docker daemon.
#[derive(Clone)]
pub struct DockerClient {
    client: Docker,
    /// Daemon socket for requests sent without the typed client.
    socket: PathBuf,
}

impl DockerClient {
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            client,
            socket: engine::default_socket(),
        })
    }

    pub fn from_settings(settings: &DockerSettings) -> Result<Self> {
        match &settings.socket {
            #[cfg(unix)]
            Some(socket) => {
                let client = Docker::connect_with_unix(
                    &socket.to_string_lossy(),
                    settings.timeout_secs,
                    bollard::API_DEFAULT_VERSION,
                )
                .with_context(|| format!("Failed to connect to Docker daemon at {}", socket.display()))?;
                Ok(Self {
                    client,
                    socket: socket.clone(),
                })
            }
            _ => Self::new(),
        }
    }

    // Check Docker availability
    pub async fn is_docker_available(&self) -> bool {
        self.client.ping().await.is_ok()
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Splits an image reference into repository and tag or digest. An empty
/// tag makes the daemon pull every tag, so untagged names get `latest`.
fn split_reference(image: &str) -> (&str, &str) {
    fn split_tag(reference: &str) -> (&str, Option<&str>) {
        match reference.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
            _ => (reference, None),
        }
    }

    match image.split_once('@') {
        Some((named, digest)) => (split_tag(named).0, digest),
        None => {
            let (repository, tag) = split_tag(image);
            (repository, tag.unwrap_or("latest"))
        }
    }
}

fn exit_code_of(exec_id: &str, exit_code: Option<i64>) -> Result<i64> {
    exit_code.ok_or_else(|| anyhow!("exec {exec_id} finished without an exit code"))
}

fn credentials_from_blob(blob: &str) -> Result<DockerCredentials> {
    let auth = registry::RegistryAuth::decode(blob)?;
    Ok(DockerCredentials {
        username: auth.username,
        password: auth.password,
        serveraddress: auth.serveraddress,
        ..Default::default()
    })
}

fn log_line(log: &dyn LogSink, parts: &[Option<&str>]) {
    let line = parts
        .iter()
        .flatten()
        .map(|p| p.trim_end())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !line.is_empty() {
        log.write(format!("{line}\n").as_bytes());
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn create_container(&self, request: CreateRequest) -> Result<String> {
        if !request.cluster_mounts.is_empty() {
            debug!(mounts = request.cluster_mounts.len(), "Creating container with cluster mounts");
            return engine::create_container(&self.socket, &request.to_json()?).await;
        }

        let response = self
            .client
            .create_container(None::<CreateContainerOptions<String>>, request.config)
            .await?;
        for warning in &response.warnings {
            debug!(warning = %warning, "Container created with warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.client.stop_container(container_id, None).await?;
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, options: CreateExecOptions<String>) -> Result<String> {
        let exec = self.client.create_exec(container_id, options).await?;
        Ok(exec.id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<OutputStream> {
        match self.client.start_exec(exec_id, None).await? {
            StartExecResults::Attached { output, .. } => Ok(output
                .filter_map(|item| {
                    future::ready(match item {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            Some(Ok(OutputFrame::Stdout(message.to_vec())))
                        }
                        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(message.to_vec()))),
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(e.into())),
                    })
                })
                .boxed()),
            StartExecResults::Detached => Err(anyhow!("exec {exec_id} started detached, expected attached output")),
        }
    }

    async fn start_exec_detached(&self, exec_id: &str) -> Result<()> {
        let options = StartExecOptions {
            detach: true,
            ..Default::default()
        };
        self.client.start_exec(exec_id, Some(options)).await?;
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self.client.inspect_exec(exec_id).await?;
        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        exit_code_of(exec_id, inspect.exit_code).map(Some)
    }

    async fn copy_to_container(&self, container_id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.client
            .upload_to_container(container_id, Some(options), archive.into())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRuntime for DockerClient {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str, registry_auth: Option<String>, log: &dyn LogSink) -> Result<()> {
        let credentials = registry_auth.as_deref().map(credentials_from_blob).transpose()?;
        let (repository, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, credentials);
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(error) = info.error {
                return Err(anyhow!(error));
            }
            log_line(log, &[info.status.as_deref(), info.progress.as_deref()]);
        }
        Ok(())
    }

    async fn build_image(
        &self,
        options: BuildImageOptions<String>,
        context: Vec<u8>,
        log: &dyn LogSink,
    ) -> Result<()> {
        let mut stream = self.client.build_image(options, None, Some(context.into()));
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(error) = info.error {
                return Err(anyhow!(error));
            }
            log_line(log, &[info.stream.as_deref(), info.status.as_deref()]);
        }
        Ok(())
    }
}
