pub mod host;

pub use host::HostExecutor;

use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DevContainerConfig, ImageSource};
use crate::container::ContainerManager;
use crate::core::{CommandExecutor, Hook, HookTarget, RunContext, RunnerError, RunnerResult};
use crate::docker::ImageManager;
use crate::monitoring::{LogSink, TracingSink};
use crate::track_performance;

/// Drives a devcontainer from manifest to a running, fully initialised
/// container.
pub struct Runner {
    images: ImageManager,
    containers: ContainerManager,
    host: Arc<dyn CommandExecutor>,
    hook_timeout: Option<Duration>,
    log: Arc<dyn LogSink>,
}

impl Runner {
    pub fn new(images: ImageManager, containers: ContainerManager, host: Arc<dyn CommandExecutor>) -> Self {
        Self {
            images,
            containers,
            host,
            hook_timeout: None,
            log: Arc::new(TracingSink::new("hook")),
        }
    }

    /// Bounds every in-container hook. An expired hook reports exit code 124
    /// and fails the run like any other non-zero exit.
    pub fn with_hook_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Sink receiving hook output.
    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn containers(&self) -> &ContainerManager {
        &self.containers
    }

    /// Resolves the image, creates and starts the container, then runs the
    /// lifecycle hooks in order. Returns the container id.
    ///
    /// A failed hook leaves the container running.
    pub async fn run(&self, ctx: &RunContext, project_path: &Path, config: &DevContainerConfig) -> RunnerResult<String> {
        track_performance!("runner.run");

        let image = match config.image_source()? {
            ImageSource::Image(image) => {
                if ctx.guard(self.images.image_exists(&image)).await?? {
                    debug!(image = %image, "Image present locally, skipping pull");
                } else {
                    ctx.guard(self.images.pull_image(&image)).await??;
                }
                image
            }
            ImageSource::Build(build) => {
                ctx.guard(self.images.build_image(project_path, config, &build))
                    .await??
            }
        };

        let container_id = ctx
            .guard(self.containers.create_container(&image, project_path, config))
            .await??;
        ctx.guard(self.containers.start_container(&container_id)).await??;

        for hook in Hook::ORDER {
            self.run_hook(ctx, hook, &container_id, project_path, config).await?;
        }

        info!(container_id = %container_id, image = %image, "Devcontainer ready");
        Ok(container_id)
    }

    async fn run_hook(
        &self,
        ctx: &RunContext,
        hook: Hook,
        container_id: &str,
        project_path: &Path,
        config: &DevContainerConfig,
    ) -> RunnerResult<()> {
        let Some(commands) = config.lifecycle_command(hook) else {
            return Ok(());
        };

        for (name, command) in commands.iter() {
            if command.is_empty() {
                continue;
            }
            info!(hook = %hook, name = %name, container_id = %container_id, "Running lifecycle command");

            match hook.target() {
                HookTarget::Host => {
                    let log = self.log.as_ref();
                    ctx.guard(self.host.run(command, project_path, log, log))
                        .await?
                        .map_err(|source| RunnerError::HostHook {
                            hook,
                            name: name.clone(),
                            command: command.clone(),
                            container_id: container_id.to_string(),
                            source,
                        })?;
                }
                HookTarget::Container => {
                    let hook_ctx = match self.hook_timeout {
                        Some(timeout) => ctx.with_timeout(timeout),
                        None => ctx.clone(),
                    };
                    let result = self.containers.exec(&hook_ctx, container_id, command).await?;
                    self.log.write(result.stdout.as_bytes());
                    self.log.write(result.stderr.as_bytes());

                    if !result.success() {
                        if result.timed_out() {
                            warn!(hook = %hook, name = %name, "Lifecycle command timed out");
                        }
                        return Err(RunnerError::HookExit {
                            hook,
                            name: name.clone(),
                            command: command.clone(),
                            container_id: container_id.to_string(),
                            exit_code: result.exit_code,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn stop(&self, ctx: &RunContext, container_id: &str) -> RunnerResult<()> {
        ctx.guard(self.containers.stop_container(container_id)).await?
    }

    /// Stops every container concurrently. One failure does not prevent the
    /// others from being attempted; all failures are returned.
    pub async fn stop_all(&self, ctx: &RunContext, container_ids: &[String]) -> Vec<(String, RunnerError)> {
        let results = join_all(container_ids.iter().map(|id| async move {
            (id.clone(), self.stop(ctx, id).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    warn!(container_id = %id, error = %err, "Failed to stop container");
                    Some((id, err))
                }
            })
            .collect()
    }
}
