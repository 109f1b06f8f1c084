use crate::storage::offset::FileIdentity;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// How long to wait at end of file before looking for new data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// `tail -F` over a single path.
///
/// Lines are returned without their terminator. In follow mode the tail waits
/// for more data at end of file and reopens the path from the start when it
/// has been rotated or truncated; otherwise end of file ends the stream.
pub struct LineTail {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,

    reader: BufReader<File>,
    identity: FileIdentity,
    // End of the last complete line handed out
    offset: u64,
    // Bytes of a line whose terminator has not been written yet
    pending: Vec<u8>,
}

impl LineTail {
    /// Open `path` and position the tail at `start_offset`.
    ///
    /// An offset past the end of the file means the file was truncated since
    /// the offset was taken, so reading starts over from 0.
    pub fn open(path: &Path, start_offset: u64, follow: bool) -> Result<Self, TailError> {
        let (reader, identity, len) = open_file(path).map_err(|source| TailError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tail = Self {
            path: path.to_path_buf(),
            follow,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reader,
            identity,
            offset: 0,
            pending: Vec::new(),
        };

        let start = if start_offset > len {
            warn!(
                path = %path.display(),
                offset = start_offset,
                len = len,
                "Start offset beyond end of file, reading from the beginning"
            );
            0
        } else {
            start_offset
        };
        tail.reader.seek(SeekFrom::Start(start))?;
        tail.offset = start;

        Ok(tail)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Identity of the file currently open.
    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    /// Byte offset just past the last line returned by [`next_line`](Self::next_line).
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Read the next complete line.
    ///
    /// Returns `Ok(None)` at end of file when not following. Cancel safe: the
    /// only await point is the idle wait, and no bytes are consumed across it.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, TailError> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending)?;

            if read > 0 && self.pending.last() == Some(&b'\n') {
                return Ok(Some(self.take_pending()));
            }

            // End of file, possibly in the middle of a line.
            if !self.follow {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_pending()));
            }

            match self.reopen_if_replaced()? {
                Reopen::Rotated(Some(tail_of_old_file)) => return Ok(Some(tail_of_old_file)),
                Reopen::Rotated(None) | Reopen::Truncated => continue,
                Reopen::Unchanged => sleep(self.poll_interval).await,
            }
        }
    }

    fn take_pending(&mut self) -> Vec<u8> {
        let mut line = std::mem::take(&mut self.pending);
        self.offset += line.len() as u64;

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        line
    }

    /// Check whether the path now names a different file or the file shrank
    /// below our read position, and if so start over on the current file.
    fn reopen_if_replaced(&mut self) -> Result<Reopen, TailError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            // Moved away and not yet recreated
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Reopen::Unchanged),
            Err(e) => return Err(e.into()),
        };

        let current = FileIdentity::from_metadata(&metadata);
        if current != self.identity {
            return self.adopt_replacement(open_file(&self.path));
        }

        let read_position = self.offset + self.pending.len() as u64;
        if metadata.len() < read_position {
            info!(
                path = %self.path.display(),
                len = metadata.len(),
                position = read_position,
                "Source file truncated, reading from the beginning"
            );
            self.pending.clear();
            self.reader.seek(SeekFrom::Start(0))?;
            self.offset = 0;
            return Ok(Reopen::Truncated);
        }

        Ok(Reopen::Unchanged)
    }

    /// Switch to the file now at our path. The old file is fully read, so a
    /// trailing unterminated line is handed out with the switch. When the
    /// replacement cannot be opened yet, nothing changes and the next poll
    /// tries again.
    fn adopt_replacement(
        &mut self,
        opened: io::Result<(BufReader<File>, FileIdentity, u64)>,
    ) -> Result<Reopen, TailError> {
        let (reader, identity, _) = match opened {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Rotated file vanished before reopen");
                return Ok(Reopen::Unchanged);
            }
            Err(e) => return Err(e.into()),
        };

        let leftover = (!self.pending.is_empty()).then(|| self.take_pending());
        info!(
            path = %self.path.display(),
            old = %self.identity,
            new = %identity,
            "Source file rotated, following new file"
        );

        self.reader = reader;
        self.identity = identity;
        self.offset = 0;
        Ok(Reopen::Rotated(leftover))
    }
}

enum Reopen {
    Unchanged,
    Truncated,
    Rotated(Option<Vec<u8>>),
}

fn open_file(path: &Path) -> io::Result<(BufReader<File>, FileIdentity, u64)> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    Ok((
        BufReader::new(file),
        FileIdentity::from_metadata(&metadata),
        metadata.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const FAST: Duration = Duration::from_millis(10);

    async fn next(tail: &mut LineTail) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), tail.next_line())
            .await
            .expect("timed out waiting for line")
            .unwrap()
            .map(|line| String::from_utf8(line).unwrap())
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn test_reads_lines_and_tracks_offset() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "first\nsecond\r\n").unwrap();
        temp_file.flush().unwrap();

        let mut tail = LineTail::open(temp_file.path(), 0, false).unwrap();
        assert_eq!(next(&mut tail).await.as_deref(), Some("first"));
        assert_eq!(tail.current_offset(), 6);
        assert_eq!(next(&mut tail).await.as_deref(), Some("second"));
        assert_eq!(tail.current_offset(), 14);
        assert_eq!(next(&mut tail).await, None);
    }

    #[tokio::test]
    async fn test_starts_at_offset() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "first\nsecond\n").unwrap();
        temp_file.flush().unwrap();

        let mut tail = LineTail::open(temp_file.path(), 6, false).unwrap();
        assert_eq!(next(&mut tail).await.as_deref(), Some("second"));
        assert_eq!(next(&mut tail).await, None);
    }

    #[tokio::test]
    async fn test_offset_beyond_end_restarts_at_zero() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "only\n").unwrap();
        temp_file.flush().unwrap();

        let mut tail = LineTail::open(temp_file.path(), 500, false).unwrap();
        assert_eq!(tail.current_offset(), 0);
        assert_eq!(next(&mut tail).await.as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn test_no_follow_emits_unterminated_last_line() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "a\nb").unwrap();
        temp_file.flush().unwrap();

        let mut tail = LineTail::open(temp_file.path(), 0, false).unwrap();
        assert_eq!(next(&mut tail).await.as_deref(), Some("a"));
        assert_eq!(next(&mut tail).await.as_deref(), Some("b"));
        assert_eq!(tail.current_offset(), 3);
        assert_eq!(next(&mut tail).await, None);
    }

    #[tokio::test]
    async fn test_follow_waits_for_appended_lines() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                append(&path, "late line\n");
            })
        };

        assert_eq!(next(&mut tail).await.as_deref(), Some("late line"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_holds_back_partial_line() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        append(&path, "half");

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);

        let early = tokio::time::timeout(Duration::from_millis(60), tail.next_line()).await;
        assert!(early.is_err(), "partial line must not be emitted");
        assert_eq!(tail.current_offset(), 0);

        append(&path, " done\n");
        assert_eq!(next(&mut tail).await.as_deref(), Some("half done"));
        assert_eq!(tail.current_offset(), 10);
    }

    #[tokio::test]
    async fn test_follow_reopens_rotated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "old 1\n").unwrap();

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);
        let old_identity = tail.identity();
        assert_eq!(next(&mut tail).await.as_deref(), Some("old 1"));

        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        std::fs::write(&path, "new 1\n").unwrap();

        assert_eq!(next(&mut tail).await.as_deref(), Some("new 1"));
        assert_ne!(tail.identity(), old_identity);
        assert_eq!(tail.current_offset(), 6);
    }

    #[tokio::test]
    async fn test_rotation_hands_out_unterminated_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "old 1\nold tail").unwrap();

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);
        assert_eq!(next(&mut tail).await.as_deref(), Some("old 1"));

        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        std::fs::write(&path, "new 1\n").unwrap();

        assert_eq!(next(&mut tail).await.as_deref(), Some("old tail"));
        assert_eq!(next(&mut tail).await.as_deref(), Some("new 1"));
    }

    #[tokio::test]
    async fn test_replacement_gone_before_open_keeps_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "half").unwrap();

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);
        let early = tokio::time::timeout(Duration::from_millis(40), tail.next_line()).await;
        assert!(early.is_err());
        let identity = tail.identity();

        // The path changed identity but the new file vanished before open
        let vanished = Err(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(
            tail.adopt_replacement(vanished).unwrap(),
            Reopen::Unchanged
        ));
        assert_eq!(tail.identity(), identity);
        assert_eq!(tail.current_offset(), 0);

        append(&path, " done\n");
        assert_eq!(next(&mut tail).await.as_deref(), Some("half done"));
    }

    #[tokio::test]
    async fn test_follow_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a long first line\n").unwrap();

        let mut tail = LineTail::open(&path, 0, true).unwrap().with_poll_interval(FAST);
        assert_eq!(next(&mut tail).await.as_deref(), Some("a long first line"));

        // copytruncate-style rotation keeps the inode
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        append(&path, "fresh\n");

        assert_eq!(next(&mut tail).await.as_deref(), Some("fresh"));
        assert_eq!(tail.current_offset(), 6);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = LineTail::open(&dir.path().join("missing.log"), 0, true);
        assert!(matches!(result, Err(TailError::Open { .. })));
    }
}
