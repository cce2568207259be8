use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "DEVCONTAINER_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub docker: DockerSettings,
    pub registry: Option<RegistrySettings>,
    pub hooks: HookSettings,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Unix socket of the docker daemon; local defaults when unset.
    pub socket: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookSettings {
    /// Upper bound for each in-container hook.
    pub timeout_secs: Option<u64>,
}

impl HookSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Log levels matching tracing's levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl Settings {
    /// Loads settings from an optional TOML file, then applies
    /// `DEVCONTAINER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML settings")
    }

    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "DOCKER_SOCKET" => self.docker.socket = Some(PathBuf::from(value)),
                "DOCKER_TIMEOUT" => {
                    self.docker.timeout_secs = value
                        .parse()
                        .with_context(|| format!("Invalid {key}: {value}"))?;
                }
                "REGISTRY_USERNAME" => self.registry_mut().username = Some(value),
                "REGISTRY_PASSWORD" => self.registry_mut().password = Some(value),
                "REGISTRY_SERVER" => self.registry_mut().server_address = Some(value),
                "HOOK_TIMEOUT" => {
                    self.hooks.timeout_secs = Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid {key}: {value}"))?,
                    );
                }
                "LOG_LEVEL" => {
                    self.log_level = LogLevel::parse(&value)
                        .with_context(|| format!("Invalid {key}: {value}"))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn registry_mut(&mut self) -> &mut RegistrySettings {
        self.registry.get_or_insert_with(RegistrySettings::default)
    }
}
