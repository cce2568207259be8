use anyhow::Result;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

use crate::core::{OutputFrame, OutputStream};

/// Byte buffer shared between the demux task and the exec caller, so output
/// captured before a timeout survives the task being aborted.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(chunk);
    }

    pub fn contents(&self) -> String {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Copies every frame into the matching buffer until the stream ends.
pub async fn demux(mut stream: OutputStream, stdout: SharedBuffer, stderr: SharedBuffer) -> Result<()> {
    while let Some(frame) = stream.next().await {
        match frame? {
            OutputFrame::Stdout(chunk) => stdout.append(&chunk),
            OutputFrame::Stderr(chunk) => stderr.append(&chunk),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frames(items: Vec<Result<OutputFrame>>) -> OutputStream {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn splits_interleaved_frames() {
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();
        demux(
            frames(vec![
                Ok(OutputFrame::Stdout(b"hello ".to_vec())),
                Ok(OutputFrame::Stderr(b"oops\n".to_vec())),
                Ok(OutputFrame::Stdout(b"world\n".to_vec())),
            ]),
            stdout.clone(),
            stderr.clone(),
        )
        .await
        .unwrap();

        assert_eq!(stdout.contents(), "hello world\n");
        assert_eq!(stderr.contents(), "oops\n");
    }

    #[tokio::test]
    async fn demux_stops_at_first_error() {
        let stdout = SharedBuffer::new();
        let err = demux(
            frames(vec![
                Ok(OutputFrame::Stdout(b"a".to_vec())),
                Err(anyhow::anyhow!("connection reset")),
                Ok(OutputFrame::Stdout(b"b".to_vec())),
            ]),
            stdout.clone(),
            SharedBuffer::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(stdout.contents(), "a");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let buffer = SharedBuffer::new();
        buffer.append(b"ok \xff");
        assert_eq!(buffer.contents(), "ok \u{fffd}");
    }
}
