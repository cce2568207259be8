pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::Settings;
pub use context::{ContextError, RunContext};
pub use error::{ConfigError, RunnerError, RunnerResult};
pub use types::{Container, CreateRequest, ExecResult, Hook, HookTarget, OutputFrame, TIMEOUT_EXIT_CODE};

use anyhow::Result;
use async_trait::async_trait;
use bollard::exec::CreateExecOptions;
use bollard::image::BuildImageOptions;
use futures::stream::BoxStream;
use std::path::Path;

use crate::monitoring::LogSink;

/// Demultiplexed output of an attached exec session.
pub type OutputStream = BoxStream<'static, Result<OutputFrame>>;

/// Container operations the provisioner and exec layer depend on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(&self, request: CreateRequest) -> Result<String>;
    async fn start_container(&self, container_id: &str) -> Result<()>;
    async fn stop_container(&self, container_id: &str) -> Result<()>;
    async fn create_exec(&self, container_id: &str, options: CreateExecOptions<String>) -> Result<String>;
    /// Starts an exec session and returns its combined output.
    async fn attach_exec(&self, exec_id: &str) -> Result<OutputStream>;
    async fn start_exec_detached(&self, exec_id: &str) -> Result<()>;
    /// Exit code of a finished exec session, `None` while it still runs.
    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>>;
    /// Extracts a tar archive into `path` inside the container.
    async fn copy_to_container(&self, container_id: &str, path: &str, archive: Vec<u8>) -> Result<()>;
}

/// Image operations the resolver and runner depend on.
#[async_trait]
pub trait ImageRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool>;
    async fn pull_image(&self, image: &str, registry_auth: Option<String>, log: &dyn LogSink) -> Result<()>;
    async fn build_image(
        &self,
        options: BuildImageOptions<String>,
        context: Vec<u8>,
        log: &dyn LogSink,
    ) -> Result<()>;
}

/// Runs a command on the host. Fails when the process cannot be launched or
/// exits non-zero.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &[String], dir: &Path, stdout: &dyn LogSink, stderr: &dyn LogSink) -> Result<()>;
}

/// Supplies the base64 encoded registry auth blob for an image, if any.
pub trait RegistryCredentials: Send + Sync {
    fn registry_auth(&self, image: &str) -> Result<Option<String>>;
}
