//! Follows a growing server log file.
//!
//! Three stream conditions are detected and handled distinctly:
//!
//! - **append** — the file grew; new bytes are read from the saved offset.
//! - **truncation** — the file shrank below the saved offset. The stream is
//!   treated as reset: partial buffered state is discarded, a synthetic
//!   [`TailEvent::Reset`] is emitted, and reading restarts at offset 0.
//! - **rotation** — the file identity (device, inode) changed under the
//!   same path. Remaining bytes of the old handle are drained and delivered
//!   first, then a [`TailEvent::Reset`] is emitted and the new file is
//!   opened from the start.
//!
//! The tailer suspends on a configurable poll interval while waiting for
//! data; it never spins. A log file that stays unreadable past the reopen
//! deadline surfaces [`BridgeError::StreamIo`] — the dispatcher decides
//! whether that is fatal.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::metrics::BridgeCounters;

/// Tailer tuning knobs, normally derived from [`crate::config::LogConfig`].
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Sleep between polls while the file has no new data.
    pub poll_interval: Duration,
    /// How long the path may stay missing/unreadable before the stream is
    /// declared dead.
    pub reopen_timeout: Duration,
    /// Cap on bytes buffered while waiting for a newline.
    pub max_buffer: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            reopen_timeout: Duration::from_secs(30),
            max_buffer: 64 * 1024,
        }
    }
}

/// One item produced by the tailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete line, newline stripped.
    Line(String),
    /// The underlying stream was truncated or rotated; downstream parsers
    /// must clear any per-stream state.
    Reset,
}

/// Stable identity of an open file, used to detect rotation.
#[cfg(unix)]
type FileId = (u64, u64);
#[cfg(not(unix))]
type FileId = u64;

fn file_id(meta: &std::fs::Metadata) -> FileId {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        (meta.dev(), meta.ino())
    }
    #[cfg(not(unix))]
    {
        // Without inodes, rotation collapses into the truncation case.
        let _ = meta;
        0
    }
}

/// Handle to a continuously-tailed log file.
pub struct LogTailer {
    path: PathBuf,
    config: TailConfig,
    file: Option<File>,
    identity: Option<FileId>,
    offset: u64,
    buf: Vec<u8>,
    /// Deliver a trailing unterminated line (set while flushing a rotated-
    /// away handle).
    flush_partial: bool,
    pending_reset: bool,
    down_since: Option<Instant>,
    counters: Arc<BridgeCounters>,
}

impl std::fmt::Debug for LogTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTailer")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl LogTailer {
    /// Open a tailer on `path`, starting at the end of the current file
    /// content when `from_end` is set (the usual case for a live server
    /// log — history has already been announced once).
    ///
    /// A missing file is not an error here; the reopen deadline starts
    /// ticking instead.
    ///
    /// # Errors
    /// Returns [`BridgeError::StreamIo`] only for non-recoverable open
    /// failures such as permission errors.
    pub async fn open<P: AsRef<Path>>(
        path: P,
        config: TailConfig,
        from_end: bool,
        counters: Arc<BridgeCounters>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tailer = Self {
            path,
            config,
            file: None,
            identity: None,
            offset: 0,
            buf: Vec::new(),
            flush_partial: false,
            pending_reset: false,
            down_since: None,
            counters,
        };

        match tailer.try_open().await {
            Ok(()) => {
                if from_end {
                    if let Some(file) = tailer.file.as_mut() {
                        let len = file.seek(SeekFrom::End(0)).await?;
                        tailer.offset = len;
                    }
                }
                info!(path = %tailer.path.display(), offset = tailer.offset, "Tailing log file");
            }
            Err(e) => {
                warn!(path = %tailer.path.display(), error = %e, "Log file not yet readable, waiting");
                tailer.down_since = Some(Instant::now());
            }
        }
        Ok(tailer)
    }

    /// Produce the next line or stream-reset marker, suspending while the
    /// file has no new data.
    ///
    /// # Errors
    /// Returns [`BridgeError::StreamIo`] once the file has been unreadable
    /// for longer than the configured reopen deadline.
    pub async fn next_event(&mut self) -> Result<TailEvent> {
        loop {
            if let Some(line) = self.pop_line() {
                return Ok(TailEvent::Line(line));
            }

            if self.pending_reset {
                self.pending_reset = false;
                self.flush_partial = false;
                self.buf.clear();
                BridgeCounters::bump(&self.counters.stream_resets);
                return Ok(TailEvent::Reset);
            }

            if self.file.is_none() {
                self.reopen_or_wait().await?;
                continue;
            }

            match self.poll_file().await {
                Ok(read_any) => {
                    if !read_any && !self.pending_reset {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Log read failed, reopening");
                    self.file = None;
                    self.down_since = Some(Instant::now());
                }
            }
        }
    }

    /// Extract the next complete line from the buffer.
    fn pop_line(&mut self) -> Option<String> {
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        if self.flush_partial && !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            return Some(line);
        }
        None
    }

    /// Stat the path, detect truncation/rotation, and read any new bytes.
    /// Returns whether any bytes were read.
    async fn poll_file(&mut self) -> std::io::Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let id = file_id(&meta);
                if self.identity.is_some_and(|current| current != id) {
                    // Rotation: drain what is left of the old handle, then
                    // reset onto the new file.
                    info!(path = %self.path.display(), "Log rotation detected");
                    self.drain_old_handle().await;
                    self.flush_partial = true;
                    self.pending_reset = true;
                    self.file = None;
                    self.identity = None;
                    self.offset = 0;
                    return Ok(true);
                }
                if meta.len() < self.offset {
                    info!(
                        path = %self.path.display(),
                        len = meta.len(),
                        offset = self.offset,
                        "Log truncation detected"
                    );
                    self.buf.clear();
                    self.pending_reset = true;
                    self.file = None;
                    self.identity = None;
                    self.offset = 0;
                    return Ok(true);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Path vanished mid-rotation; flush the old handle and wait
                // for the new file to appear.
                self.drain_old_handle().await;
                self.flush_partial = true;
                self.pending_reset = true;
                self.file = None;
                self.identity = None;
                self.offset = 0;
                self.down_since = Some(Instant::now());
                return Ok(true);
            }
            Err(e) => return Err(e),
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        let mut chunk = [0_u8; 8192];
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        self.offset += n as u64;
        self.buf.extend_from_slice(&chunk[..n]);
        if self.buf.len() > self.config.max_buffer {
            warn!(buffered = self.buf.len(), "Dropping oversized partial line");
            BridgeCounters::bump(&self.counters.parse_anomalies);
            self.buf.clear();
        }
        debug!(bytes = n, "Read log bytes");
        Ok(true)
    }

    /// Read whatever remains of the currently-open (rotated-away) handle.
    async fn drain_old_handle(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let mut rest = Vec::new();
            if let Err(e) = file.read_to_end(&mut rest).await {
                warn!(error = %e, "Could not drain rotated log handle");
            } else {
                self.buf.extend_from_slice(&rest);
            }
        }
    }

    /// Try to (re)open the file, honouring the reopen deadline.
    async fn reopen_or_wait(&mut self) -> Result<()> {
        match self.try_open().await {
            Ok(()) => {
                self.down_since = None;
                Ok(())
            }
            Err(source) => {
                let down_since = *self.down_since.get_or_insert_with(Instant::now);
                if down_since.elapsed() >= self.config.reopen_timeout {
                    return Err(BridgeError::StreamIo {
                        path: self.path.display().to_string(),
                        source,
                    });
                }
                tokio::time::sleep(self.config.poll_interval).await;
                Ok(())
            }
        }
    }

    async fn try_open(&mut self) -> std::io::Result<()> {
        let mut file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        let id = file_id(&meta);
        if self.identity == Some(id) && meta.len() >= self.offset {
            // Same file as before a transient failure: resume, don't replay.
            file.seek(SeekFrom::Start(self.offset)).await?;
        } else {
            self.identity = Some(id);
            self.offset = 0;
        }
        self.file = Some(file);
        Ok(())
    }
}
