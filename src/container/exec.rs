use anyhow::{anyhow, Context};
use bollard::exec::CreateExecOptions;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::output::{demux, SharedBuffer};
use super::ContainerManager;
use crate::core::{ContextError, ExecResult, RunContext, RunnerError, RunnerResult, TIMEOUT_EXIT_CODE};

const INSPECT_ATTEMPTS: usize = 20;
const INSPECT_INTERVAL: Duration = Duration::from_millis(50);

impl ContainerManager {
    /// Runs `command` in the container and captures its output.
    ///
    /// A canceled context fails with [`RunnerError::Canceled`] and discards
    /// output. An elapsed deadline is not an error: the result carries what
    /// was captured so far and exit code 124.
    pub async fn exec(&self, ctx: &RunContext, container_id: &str, command: &[String]) -> RunnerResult<ExecResult> {
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();
        if let Some(err) = ctx.err() {
            return interrupted(err, &stdout, &stderr);
        }

        let transport = |source: anyhow::Error| RunnerError::ExecTransport {
            container_id: container_id.to_string(),
            source,
        };

        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec_id = match ctx.guard(self.runtime.create_exec(container_id, options)).await {
            Ok(created) => created.map_err(transport)?,
            Err(err) => return interrupted(err, &stdout, &stderr),
        };
        debug!(container_id = %container_id, exec_id = %exec_id, command = ?command, "Exec created");

        let stream = match ctx.guard(self.runtime.attach_exec(&exec_id)).await {
            Ok(attached) => attached.map_err(transport)?,
            Err(err) => return interrupted(err, &stdout, &stderr),
        };

        let mut task = tokio::spawn(demux(stream, stdout.clone(), stderr.clone()));
        let copied = tokio::select! {
            biased;
            err = ctx.done() => {
                task.abort();
                return interrupted(err, &stdout, &stderr);
            }
            joined = &mut task => joined,
        };
        copied
            .context("output task failed")
            .and_then(|result| result)
            .map_err(transport)?;

        for _ in 0..INSPECT_ATTEMPTS {
            let exit_code = match ctx.guard(self.runtime.inspect_exec(&exec_id)).await {
                Ok(inspected) => inspected.map_err(transport)?,
                Err(err) => return interrupted(err, &stdout, &stderr),
            };
            if let Some(exit_code) = exit_code {
                debug!(exec_id = %exec_id, exit_code, "Exec finished");
                return Ok(ExecResult {
                    stdout: stdout.contents(),
                    stderr: stderr.contents(),
                    exit_code,
                });
            }
            if let Err(err) = ctx.guard(tokio::time::sleep(INSPECT_INTERVAL)).await {
                return interrupted(err, &stdout, &stderr);
            }
        }

        Err(transport(anyhow!(
            "exec {exec_id} still running after its output closed"
        )))
    }

    /// Starts `command` in the background and returns the exec id.
    pub async fn exec_detached(&self, ctx: &RunContext, container_id: &str, command: &[String]) -> RunnerResult<String> {
        let transport = |source: anyhow::Error| RunnerError::ExecTransport {
            container_id: container_id.to_string(),
            source,
        };

        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec_id = ctx
            .guard(self.runtime.create_exec(container_id, options))
            .await?
            .map_err(transport)?;
        ctx.guard(self.runtime.start_exec_detached(&exec_id))
            .await?
            .map_err(transport)?;

        debug!(container_id = %container_id, exec_id = %exec_id, "Detached exec started");
        Ok(exec_id)
    }

    /// Copies one host file into `container_dir`, keeping its file name and
    /// permission bits.
    pub async fn copy_file(
        &self,
        ctx: &RunContext,
        container_id: &str,
        host_path: &Path,
        container_dir: &str,
    ) -> RunnerResult<()> {
        let copy_error = |source: anyhow::Error| RunnerError::CopyFile {
            container_id: container_id.to_string(),
            path: host_path.to_path_buf(),
            source,
        };

        let archive = ctx
            .guard(single_file_archive(host_path))
            .await?
            .map_err(copy_error)?;
        ctx.guard(self.runtime.copy_to_container(container_id, container_dir, archive))
            .await?
            .map_err(copy_error)?;

        debug!(container_id = %container_id, path = %host_path.display(), dir = %container_dir, "File copied");
        Ok(())
    }
}

fn interrupted(err: ContextError, stdout: &SharedBuffer, stderr: &SharedBuffer) -> RunnerResult<ExecResult> {
    match err {
        ContextError::Canceled => Err(RunnerError::Canceled),
        ContextError::DeadlineExceeded => {
            warn!("Exec deadline exceeded");
            Ok(ExecResult {
                stdout: stdout.contents(),
                stderr: stderr.contents(),
                exit_code: TIMEOUT_EXIT_CODE,
            })
        }
    }
}

async fn single_file_archive(path: &Path) -> anyhow::Result<Vec<u8>> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let metadata = tokio::fs::metadata(path).await?;

    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(file_mode(&metadata));
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, data.as_slice())?;
    Ok(builder.into_inner()?)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
