use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::core::error::Argv;
use crate::core::CommandExecutor;
use crate::monitoring::LogSink;

/// Runs host lifecycle commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostExecutor;

#[async_trait]
impl CommandExecutor for HostExecutor {
    async fn run(&self, command: &[String], dir: &Path, stdout: &dyn LogSink, stderr: &dyn LogSink) -> Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch {}", Argv(command)))?;
        debug!(command = %Argv(command), dir = %dir.display(), "Host command started");

        let out = child.stdout.take();
        let err = child.stderr.take();
        let (out, err, status) = tokio::join!(pump(out, stdout), pump(err, stderr), child.wait());
        out.context("Failed to read stdout")?;
        err.context("Failed to read stderr")?;
        let status = status.context("Failed to wait for command")?;

        if !status.success() {
            bail!("{} {}", Argv(command), status);
        }
        Ok(())
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, sink: &dyn LogSink) -> std::io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.write(&buf[..n]);
    }
}
