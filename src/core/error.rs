use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::types::Hook;

/// Errors produced while provisioning or driving a devcontainer.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid devcontainer configuration")]
    InvalidConfig,

    #[error("Docker Compose is not supported yet")]
    ComposeUnsupported,

    #[error("Failed to check if image {image} exists: {source}")]
    ImageCheck {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to build image: {0}")]
    ImageBuild(#[source] anyhow::Error),

    #[error("Dockerfile not found")]
    DockerfileNotFound,

    #[error("Failed to create container: {0}")]
    ContainerCreate(#[source] anyhow::Error),

    #[error("Failed to start container: {0}")]
    ContainerStart(#[source] anyhow::Error),

    #[error("Failed to stop container {container_id}: {source}")]
    ContainerStop {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "Failed to run command {name} {} in container {container_id} during {hook}: exit code {exit_code}",
        Argv(.command)
    )]
    HookExit {
        hook: Hook,
        name: String,
        command: Vec<String>,
        container_id: String,
        exit_code: i64,
    },

    #[error(
        "Failed to run command {name} {} on host for container {container_id} during {hook}: {source}",
        Argv(.command)
    )]
    HostHook {
        hook: Hook,
        name: String,
        command: Vec<String>,
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to execute command in container {container_id}: {source}")]
    ExecTransport {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to copy {} into container {container_id}: {source}", .path.display())]
    CopyFile {
        container_id: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unsupported mount type: {0}")]
    MountType(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl RunnerError {
    /// True for errors caused by the caller's context rather than the runtime.
    pub fn is_context_error(&self) -> bool {
        matches!(self, RunnerError::Canceled | RunnerError::DeadlineExceeded)
    }
}

/// Renders an argument vector as `[a b c]`.
pub struct Argv<'a>(pub &'a [String]);

impl fmt::Display for Argv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(" "))
    }
}

/// Errors raised while locating or decoding a devcontainer manifest.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("devcontainer.json not found in {}", .0.display())]
    NotFound(PathBuf),

    #[error("multiple devcontainer.json files found: {}", display_paths(.0))]
    Ambiguous(Vec<PathBuf>),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse devcontainer configuration: {0}")]
    Parse(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type RunnerResult<T> = Result<T, RunnerError>;
