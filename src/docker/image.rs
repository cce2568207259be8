use anyhow::{anyhow, Context, Result};
use bollard::image::BuildImageOptions;
use ignore::WalkBuilder;
use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BuildProps, DevContainerConfig};
use crate::core::{ImageRuntime, RegistryCredentials, RunnerError, RunnerResult};
use crate::monitoring::LogSink;

const TAG_SUFFIX_LEN: usize = 6;
const DOCKERIGNORE: &str = ".dockerignore";
/// Context entry holding a Dockerfile cut down to the requested target stage.
const TARGET_DOCKERFILE: &str = ".devcontainer-target.Dockerfile";

/// Resolves a runnable image for a devcontainer: pulls registry images and
/// builds Dockerfiles. Never touches containers.
pub struct ImageManager {
    images: Arc<dyn ImageRuntime>,
    credentials: Arc<dyn RegistryCredentials>,
    log: Arc<dyn LogSink>,
}

impl ImageManager {
    pub fn new(
        images: Arc<dyn ImageRuntime>,
        credentials: Arc<dyn RegistryCredentials>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            images,
            credentials,
            log,
        }
    }

    pub async fn image_exists(&self, image: &str) -> RunnerResult<bool> {
        self.images
            .image_exists(image)
            .await
            .map_err(|source| RunnerError::ImageCheck {
                image: image.to_string(),
                source,
            })
    }

    /// Pulls `config.image` or builds the configured Dockerfile, returning the
    /// image reference to run.
    pub async fn pull_or_build_image(&self, working_dir: &Path, config: &DevContainerConfig) -> RunnerResult<String> {
        if let Some(image) = &config.image {
            self.pull_image(image).await?;
            return Ok(image.clone());
        }

        let build = config.build_props().ok_or(RunnerError::DockerfileNotFound)?;
        self.build_image(working_dir, config, &build).await
    }

    pub async fn pull_image(&self, image: &str) -> RunnerResult<()> {
        let pull_error = |source| RunnerError::ImagePull {
            image: image.to_string(),
            source,
        };
        let auth = self.credentials.registry_auth(image).map_err(pull_error)?;

        info!(image = %image, "Pulling image");
        self.images
            .pull_image(image, auth, self.log.as_ref())
            .await
            .map_err(pull_error)
    }

    /// Builds `build` and returns the generated tag.
    pub async fn build_image(
        &self,
        working_dir: &Path,
        config: &DevContainerConfig,
        build: &BuildProps,
    ) -> RunnerResult<String> {
        let base = working_dir.join(&config.config_dir);
        let dockerfile = build
            .dockerfile
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or(RunnerError::DockerfileNotFound)?;
        let dockerfile_path = normalize(&base.join(dockerfile));
        let context_path = normalize(&base.join(build.context.as_deref().unwrap_or(".")));

        if !dockerfile_path.is_file() {
            return Err(RunnerError::DockerfileNotFound);
        }

        let relative_dockerfile = dockerfile_path.strip_prefix(&context_path).map_err(|_| {
            RunnerError::ImageBuild(anyhow!(
                "Dockerfile {} is outside the build context {}",
                dockerfile_path.display(),
                context_path.display()
            ))
        })?;

        let mut dockerfile = slash_path(relative_dockerfile);
        let mut generated = Vec::new();
        if let Some(target) = build.target.as_deref().filter(|t| !t.is_empty()) {
            let contents = tokio::fs::read_to_string(&dockerfile_path)
                .await
                .with_context(|| format!("Failed to read {}", dockerfile_path.display()))
                .map_err(RunnerError::ImageBuild)?;
            let staged = dockerfile_for_target(&contents, target).map_err(RunnerError::ImageBuild)?;
            debug!(target = %target, "Building up to target stage");
            generated.push((TARGET_DOCKERFILE.to_string(), staged.into_bytes()));
            dockerfile = TARGET_DOCKERFILE.to_string();
        }

        let tag = image_tag(config.name.as_deref());
        let mut options = BuildImageOptions {
            dockerfile,
            t: tag.clone(),
            rm: true,
            buildargs: build
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            cachefrom: build.cache_from.0.clone(),
            ..Default::default()
        };
        apply_build_options(&mut options, &build.options);

        let context = context_path.clone();
        let archive = tokio::task::spawn_blocking(move || archive_context(&context, &generated))
            .await
            .map_err(|e| RunnerError::ImageBuild(e.into()))?
            .map_err(RunnerError::ImageBuild)?;

        info!(tag = %tag, context = %context_path.display(), "Building image");
        debug!(bytes = archive.len(), "Build context archived");
        self.images
            .build_image(options, archive, self.log.as_ref())
            .await
            .map_err(RunnerError::ImageBuild)?;

        Ok(tag)
    }
}

/// `sanitize(name)-xxxxxx:latest`, or `xxxxxx:latest` without a usable name.
pub fn image_tag(name: Option<&str>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TAG_SUFFIX_LEN)
        .map(char::from)
        .collect();

    let tag = match name.map(sanitize_name).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}-{suffix}:latest"),
        None => format!("{suffix}:latest"),
    };
    tag.to_lowercase()
}

fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect();
    replaced
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Cuts a multi-stage Dockerfile after the stage named `target`, so a plain
/// build of the result stops at that stage. Stage names match case-insensitively.
pub fn dockerfile_for_target(dockerfile: &str, target: &str) -> Result<String> {
    let mut out = String::new();
    let mut in_target = false;
    let mut continued = false;

    for line in dockerfile.lines() {
        let trimmed = line.trim();
        let starts_instruction = !continued;
        if !trimmed.starts_with('#') {
            continued = trimmed.ends_with('\\');
        }

        if starts_instruction {
            if let Some(stage) = from_stage(trimmed) {
                if in_target {
                    return Ok(out);
                }
                in_target = stage.map_or(false, |s| s.eq_ignore_ascii_case(target));
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    if in_target {
        Ok(out)
    } else {
        Err(anyhow!("target stage {target:?} not found in Dockerfile"))
    }
}

/// `Some(name)` for a `FROM` line, with `None` inside when the stage is unnamed.
fn from_stage(line: &str) -> Option<Option<&str>> {
    let mut words = line.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("FROM") {
        return None;
    }
    let mut words = words.filter(|w| !w.starts_with("--"));
    let _image = words.next();
    Some(match (words.next(), words.next()) {
        (Some(as_kw), Some(name)) if as_kw.eq_ignore_ascii_case("AS") => Some(name),
        _ => None,
    })
}

/// Maps the docker CLI flags that have a build API counterpart.
fn apply_build_options(options: &mut BuildImageOptions<String>, flags: &[String]) {
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag.as_str(), None),
        };
        let mut value = || inline.clone().or_else(|| iter.next().cloned());
        match name {
            "--network" => options.networkmode = value().unwrap_or_default(),
            "--platform" => options.platform = value().unwrap_or_default(),
            "--pull" => options.pull = true,
            "--no-cache" => options.nocache = true,
            _ => warn!(option = %flag, "Ignoring unsupported build option"),
        }
    }
}

/// Tars the build context, honouring `.dockerignore`, then appends the
/// `generated` files at the context root.
pub fn archive_context(context: &Path, generated: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    if !context.is_dir() {
        return Err(anyhow!("Build context {} is not a directory", context.display()));
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkBuilder::new(context)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .add_custom_ignore_filename(DOCKERIGNORE)
        .build();

    for entry in walker {
        let entry = entry.context("Failed to walk build context")?;
        let path = entry.path();
        let relative = path.strip_prefix(context)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            builder.append_dir(relative, path)?;
        } else {
            builder
                .append_path_with_name(path, relative)
                .with_context(|| format!("Failed to archive {}", path.display()))?;
        }
    }

    for (name, contents) in generated {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_slice())
            .with_context(|| format!("Failed to archive {name}"))?;
    }

    builder.into_inner().context("Failed to finish build context archive")
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
