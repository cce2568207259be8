use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::devcontainer::DevContainerConfig;
use crate::core::ConfigError;

const DEVCONTAINER_DIR: &str = ".devcontainer";
const DEVCONTAINER_FILE: &str = "devcontainer.json";
const ROOT_DEVCONTAINER_FILE: &str = ".devcontainer.json";

/// A manifest located on disk.
#[derive(Debug, Clone)]
pub struct FoundConfig {
    /// Path relative to the searched root.
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Searches `root` for a devcontainer manifest.
///
/// Candidates, in order: `.devcontainer/devcontainer.json`,
/// `.devcontainer.json`, then exactly one `.devcontainer/*/devcontainer.json`.
pub async fn find_config(root: &Path) -> Result<FoundConfig, ConfigError> {
    let fixed = [
        PathBuf::from(DEVCONTAINER_DIR).join(DEVCONTAINER_FILE),
        PathBuf::from(ROOT_DEVCONTAINER_FILE),
    ];
    for candidate in fixed {
        if let Some(found) = read_if_file(root, &candidate).await? {
            return Ok(found);
        }
    }

    let nested = nested_candidates(root).await?;
    match nested.as_slice() {
        [] => Err(ConfigError::NotFound(root.to_path_buf())),
        [single] => read_if_file(root, single)
            .await?
            .ok_or_else(|| ConfigError::NotFound(root.to_path_buf())),
        _ => Err(ConfigError::Ambiguous(nested)),
    }
}

async fn nested_candidates(root: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let dir = root.join(DEVCONTAINER_DIR);
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ConfigError::Io { path: dir, source }),
    };

    let mut candidates = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => return Err(ConfigError::Io { path: dir, source }),
        };
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let candidate = PathBuf::from(DEVCONTAINER_DIR)
            .join(entry.file_name())
            .join(DEVCONTAINER_FILE);
        if fs::metadata(root.join(&candidate))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            candidates.push(candidate);
        }
    }
    candidates.sort();
    Ok(candidates)
}

async fn read_if_file(root: &Path, relative: &Path) -> Result<Option<FoundConfig>, ConfigError> {
    let path = root.join(relative);
    match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Io { path, source }),
    }
    let contents = fs::read(&path)
        .await
        .map_err(|source| ConfigError::Io { path, source })?;
    Ok(Some(FoundConfig {
        path: relative.to_path_buf(),
        contents,
    }))
}

/// Decodes JSON with comments and trailing commas.
pub fn parse_jsonc<T: DeserializeOwned>(contents: &[u8]) -> Result<T, ConfigError> {
    let text = std::str::from_utf8(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let value: serde_json::Value =
        json5::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn parse_config(contents: &[u8]) -> Result<DevContainerConfig, ConfigError> {
    parse_jsonc(contents)
}

/// Finds and parses the manifest under `root`, recording its directory.
pub async fn load_config(root: &Path) -> Result<DevContainerConfig, ConfigError> {
    let found = find_config(root).await?;
    let mut config = parse_config(&found.contents)?;
    config.config_dir = found
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(config)
}
