use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use serde::{Deserialize, Serialize};

use crate::core::config::RegistrySettings;
use crate::core::RegistryCredentials;

const DEFAULT_REGISTRY: &str = "docker.io";

/// Registry auth payload as the docker API expects it in `X-Registry-Auth`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
}

impl RegistryAuth {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("Failed to encode registry auth")?;
        Ok(URL_SAFE.encode(json))
    }

    pub fn decode(blob: &str) -> Result<Self> {
        let json = URL_SAFE
            .decode(blob)
            .context("Registry auth is not valid base64")?;
        serde_json::from_slice(&json).context("Registry auth is not valid JSON")
    }
}

/// Registry host of an image reference.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => first,
        _ => DEFAULT_REGISTRY,
    }
}

fn normalize_server(server: &str) -> &str {
    let server = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    server.split('/').next().unwrap_or(server)
}

/// No credentials for any image.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl RegistryCredentials for NoCredentials {
    fn registry_auth(&self, _image: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// One fixed set of credentials, scoped to its server address when one is
/// given.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    auth: RegistryAuth,
}

impl StaticCredentials {
    pub fn new(auth: RegistryAuth) -> Self {
        Self { auth }
    }
}

impl From<&RegistrySettings> for StaticCredentials {
    fn from(settings: &RegistrySettings) -> Self {
        Self::new(RegistryAuth {
            username: settings.username.clone(),
            password: settings.password.clone(),
            serveraddress: settings.server_address.clone(),
        })
    }
}

impl RegistryCredentials for StaticCredentials {
    fn registry_auth(&self, image: &str) -> Result<Option<String>> {
        if let Some(server) = &self.auth.serveraddress {
            let host = registry_host(image);
            let server = normalize_server(server);
            let matches = host == server
                || (host == DEFAULT_REGISTRY && server.ends_with(DEFAULT_REGISTRY));
            if !matches {
                return Ok(None);
            }
        }
        self.auth.encode().map(Some)
    }
}
