//! Line-granular access to the shared output stream.
//!
//! The heartbeat loop and the command loop both write through one
//! `LineWriter`. Each call writes one complete line and flushes it while
//! holding the stream lock, so lines from the two loops interleave but
//! never tear.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use relay_contracts::error::{RelayError, RelayResult};

pub struct LineWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for LineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write `line` (which must already end in `\n`) and flush.
    pub async fn write_line(&self, line: &[u8]) -> RelayResult<()> {
        let mut writer = self.inner.lock().await;
        writer
            .write_all(line)
            .await
            .map_err(|e| RelayError::Transport {
                reason: format!("write failed: {}", e),
            })?;
        writer.flush().await.map_err(|e| RelayError::Transport {
            reason: format!("flush failed: {}", e),
        })
    }

    /// The underlying stream handle, for callers that need to inspect what
    /// was written (tests write into a `Vec<u8>`).
    pub fn shared(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.inner)
    }
}
