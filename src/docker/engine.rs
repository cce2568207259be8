//! Engine requests the typed client models cannot express, sent straight to
//! the daemon socket.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Socket the local defaults connect to: `DOCKER_HOST` when it names a unix
/// socket, the standard path otherwise.
pub fn default_socket() -> PathBuf {
    std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|host| host.strip_prefix("unix://").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET))
}

fn engine_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

#[cfg(unix)]
pub async fn create_container(socket: &std::path::Path, payload: &serde_json::Value) -> Result<String> {
    use anyhow::Context;
    use bollard::models::ContainerCreateResponse;
    use hyper::{body, Body, Client, Method, Request};
    use hyperlocal::{UnixClientExt, Uri};

    let request = Request::builder()
        .method(Method::POST)
        .uri(hyper::Uri::from(Uri::new(socket, "/containers/create")))
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(payload)?))
        .context("Failed to build create request")?;

    let response = Client::unix()
        .request(request)
        .await
        .with_context(|| format!("Failed to reach Docker daemon at {}", socket.display()))?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body()).await?;
    if !status.is_success() {
        return Err(anyhow!("Docker responded {status}: {}", engine_message(&bytes)));
    }

    let created: ContainerCreateResponse =
        serde_json::from_slice(&bytes).context("Unexpected create response from Docker")?;
    Ok(created.id)
}

#[cfg(not(unix))]
pub async fn create_container(_socket: &std::path::Path, _payload: &serde_json::Value) -> Result<String> {
    Err(anyhow!("cluster mounts need a unix docker socket"))
}
