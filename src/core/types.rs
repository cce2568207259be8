use anyhow::{anyhow, Result};
use bollard::container::Config;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Exit code reported for an exec whose deadline elapsed, matching `timeout(1)`.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// A running devcontainer owned by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub project_id: String,
}

impl Container {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
        }
    }
}

/// Captured output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Where a lifecycle hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTarget {
    Host,
    Container,
}

/// The six lifecycle hook slots, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hook {
    Initialize,
    OnCreate,
    UpdateContent,
    PostCreate,
    PostStart,
    PostAttach,
}

impl Hook {
    pub const ORDER: [Hook; 6] = [
        Hook::Initialize,
        Hook::OnCreate,
        Hook::UpdateContent,
        Hook::PostCreate,
        Hook::PostStart,
        Hook::PostAttach,
    ];

    /// Manifest key holding this hook's command.
    pub fn key(&self) -> &'static str {
        match self {
            Hook::Initialize => "initializeCommand",
            Hook::OnCreate => "onCreateCommand",
            Hook::UpdateContent => "updateContentCommand",
            Hook::PostCreate => "postCreateCommand",
            Hook::PostStart => "postStartCommand",
            Hook::PostAttach => "postAttachCommand",
        }
    }

    // postStart and postAttach run on the host to stay compatible with
    // existing workspaces.
    pub fn target(&self) -> HookTarget {
        match self {
            Hook::Initialize | Hook::PostStart | Hook::PostAttach => HookTarget::Host,
            Hook::OnCreate | Hook::UpdateContent | Hook::PostCreate => HookTarget::Container,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One chunk of demultiplexed exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// A container create request. `cluster_mounts` lists the indexes in
/// `host_config.mounts` whose type the typed models have no variant for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRequest {
    pub config: Config<String>,
    pub cluster_mounts: Vec<usize>,
}

impl CreateRequest {
    pub fn new(config: Config<String>) -> Self {
        Self {
            config,
            cluster_mounts: Vec::new(),
        }
    }

    /// Engine JSON body with every cluster mount typed `cluster`.
    pub fn to_json(&self) -> Result<Value> {
        let mut body = serde_json::to_value(&self.config)?;
        for index in &self.cluster_mounts {
            let mount = body
                .pointer_mut(&format!("/HostConfig/Mounts/{index}"))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| anyhow!("no mount at index {index} in create request"))?;
            mount.insert("Type".to_string(), Value::from("cluster"));
        }
        Ok(body)
    }
}
