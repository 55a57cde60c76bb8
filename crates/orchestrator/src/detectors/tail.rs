#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::error::Error;
use crate::tasks::pause;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[async_trait]
pub trait LineSink: Send + Sync {
    /// One complete line, without its terminator.
    async fn line(&self, line: &str);
}

/// Follows a growing file from the end it had when opened.
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
}

impl LogTailer {
    /// Open `path` positioned at its current end, so existing lines are
    /// never delivered.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        let mut file = File::open(&path).await?;
        let offset = file.seek(SeekFrom::End(0)).await?;
        debug!(path = %path.display(), offset, "tailing");
        Ok(Self {
            path,
            reader: BufReader::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deliver lines to `sink` until `cancel` fires, sleeping `poll` whenever
    /// no complete line is available. A trailing fragment without a newline
    /// is held back until the rest of it arrives.
    pub async fn follow(
        mut self,
        sink: &dyn LineSink,
        clock: &dyn Clock,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut pending = Vec::new();
        while !cancel.is_cancelled() {
            let read = self.reader.read_until(b'\n', &mut pending).await?;
            if read > 0 && pending.last() == Some(&b'\n') {
                {
                    let text = String::from_utf8_lossy(&pending);
                    let line = text.trim_end_matches(['\n', '\r']);
                    trace!(path = %self.path.display(), %line, "line");
                    sink.line(line).await;
                }
                pending.clear();
                continue;
            }
            if !pause(clock, cancel, poll).await {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Channel(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl LineSink for Channel {
        async fn line(&self, line: &str) {
            let _ = self.0.send(line.to_owned());
        }
    }

    #[tokio::test]
    async fn delivers_only_new_complete_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "before open").unwrap();
        file.flush().unwrap();

        let tailer = LogTailer::open(file.path()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let clock = Arc::new(ManualClock::new(0.0));

        let task = {
            let cancel = cancel.clone();
            let clock = Arc::clone(&clock);
            tokio::spawn(async move {
                tailer
                    .follow(&Channel(tx), clock.as_ref(), Duration::from_millis(500), &cancel)
                    .await
            })
        };

        write!(file, "first\nsec").unwrap();
        file.flush().unwrap();
        assert_eq!(rx.recv().await.unwrap(), "first");

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        write!(file, "ond\r\n").unwrap();
        file.flush().unwrap();
        assert_eq!(rx.recv().await.unwrap(), "second");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogTailer::open(dir.path().join("absent.log")).await.is_err());
    }
}
