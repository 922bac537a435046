//! Log capture for a running function.
//!
//! stdout and stderr are pumped in fixed-size chunks into one channel so the
//! combined log keeps arrival order. Everything runs inside a single future:
//! aborting the task that drives it tears down both readers.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

const CHUNK: usize = 8 * 1024;

/// How much of stderr is kept for error details.
const STDERR_TAIL: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CapturedOutput {
    /// Combined stdout + stderr, capped.
    pub logs: String,
    /// Last few KiB of stderr, uncapped by `logs` truncation.
    pub stderr_tail: String,
    pub truncated: bool,
}

impl CapturedOutput {
    /// Placeholder when the pipes did not close within the grace period.
    pub fn incomplete() -> Self {
        Self {
            logs: "[log capture did not finish]\n".to_string(),
            stderr_tail: String::new(),
            truncated: true,
        }
    }
}

/// Drain both pipes until EOF, keeping at most `max_bytes` of combined log.
pub(crate) async fn capture<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    max_bytes: usize,
) -> std::io::Result<CapturedOutput>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (tx, rx) = mpsc::channel(64);
    let out = pump(stdout, Stream::Stdout, tx.clone());
    let err = pump(stderr, Stream::Stderr, tx);
    let collected = collect(rx, max_bytes);

    let (out, err, captured) = tokio::join!(out, err, collected);
    out?;
    err?;
    Ok(captured)
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: Stream,
    tx: mpsc::Sender<(Stream, Vec<u8>)>,
) -> std::io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send((stream, buf[..n].to_vec())).await.is_err() {
            return Ok(());
        }
    }
}

async fn collect(mut rx: mpsc::Receiver<(Stream, Vec<u8>)>, max_bytes: usize) -> CapturedOutput {
    let mut logs = Vec::new();
    let mut tail = Vec::new();
    let mut truncated = false;

    while let Some((stream, chunk)) = rx.recv().await {
        // keep draining after the cap so the child never blocks on a full pipe
        let room = max_bytes.saturating_sub(logs.len());
        if chunk.len() > room {
            truncated = true;
        }
        logs.extend_from_slice(&chunk[..chunk.len().min(room)]);

        if stream == Stream::Stderr {
            tail.extend_from_slice(&chunk);
            if tail.len() > STDERR_TAIL {
                tail.drain(..tail.len() - STDERR_TAIL);
            }
        }
    }

    let mut logs = String::from_utf8_lossy(&logs).into_owned();
    if truncated {
        logs.push_str(&format!("\n[log truncated at {max_bytes} bytes]\n"));
    }
    CapturedOutput {
        logs,
        stderr_tail: String::from_utf8_lossy(&tail).trim().to_string(),
        truncated,
    }
}
