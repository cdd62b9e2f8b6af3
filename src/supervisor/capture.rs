//! Output capture for supervised processes.
//!
//! Child pipes are drained continuously by background tasks into shared
//! buffers, so whatever a process wrote before it died (or was killed) is
//! still available afterwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Upper bound on bytes kept per stream
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Shared, append-only capture buffer for one output stream
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Captured>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, chunk: &[u8]) {
        let mut captured = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let remaining = MAX_CAPTURE_BYTES.saturating_sub(captured.bytes.len());
        let keep = chunk.len().min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += chunk.len() - keep;
    }

    /// Lossy UTF-8 copy of everything captured so far
    pub fn snapshot(&self) -> String {
        let captured = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut text = String::from_utf8_lossy(&captured.bytes).into_owned();
        if captured.truncated > 0 {
            text.push_str(&format!("\n[output truncated {} bytes]\n", captured.truncated));
        }
        text
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn a task that copies `reader` into `buffer` until EOF or a read error
pub fn spawn_reader<R>(mut reader: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.append(&chunk[..n]),
                Err(e) => {
                    debug!("output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

/// Wait for reader tasks to hit EOF, bounded by `timeout`.
///
/// Returns true when every reader finished; finished handles are removed, so
/// a later call only waits on the stragglers.
pub async fn drain(readers: &mut Vec<JoinHandle<()>>, timeout: Duration) -> bool {
    let finished = {
        let all = futures::future::join_all(readers.iter_mut());
        tokio::time::timeout(timeout, all).await.is_ok()
    };
    if finished {
        readers.clear();
    } else {
        readers.retain(|handle| !handle.is_finished());
    }
    finished
}

/// Stop any reader still blocked on a pipe held open by an orphaned grandchild
pub fn abort_readers(readers: &mut Vec<JoinHandle<()>>) {
    for handle in readers.drain(..) {
        handle.abort();
    }
}
