use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fmt;
use std::fs::{File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix appended to the source path to name its state file.
pub const STATE_FILE_SUFFIX: &str = ".state";

/// Identity of a physical file, used to notice that a path was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    device: u64,
    inode: u64,
}

impl FileIdentity {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        let (device, inode) = dev_ino(metadata);
        Self { device, inode }
    }

    /// Identity of whatever `path` currently points to.
    pub fn of_path(path: &Path) -> io::Result<Self> {
        std::fs::metadata(path).map(|m| Self::from_metadata(&m))
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }
}

#[cfg(unix)]
fn dev_ino(metadata: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn dev_ino(metadata: &Metadata) -> (u64, u64) {
    // No inode outside Unix; the creation time stands in for it.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created() {
        created.hash(&mut hasher);
    }
    (0, hasher.finish())
}

/// How far into one specific file the pipeline has durably processed.
///
/// The state file only carries the inode, so a record resumes a file when the
/// inodes match; the device number is not compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetRecord {
    pub offset: u64,
    pub captured_at: DateTime<Utc>,
    pub inode: u64,
}

impl OffsetRecord {
    /// Record `offset` into the file identified by `identity`, stamped now.
    pub fn capture(identity: FileIdentity, offset: u64) -> Self {
        Self {
            offset,
            captured_at: Utc::now(),
            inode: identity.inode(),
        }
    }

    /// Whether this record describes the file with `identity`.
    pub fn matches(&self, identity: &FileIdentity) -> bool {
        self.inode == identity.inode()
    }

    /// Render as the single state-file line, newline included.
    pub fn to_line(&self) -> String {
        format!(
            "Offset {} Time {} Inode {}\n",
            self.offset,
            self.captured_at.timestamp(),
            self.inode
        )
    }

    /// Parse a state-file line. Anything but the exact layout yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();

        let offset = field(&mut tokens, "Offset")?.parse::<u64>().ok()?;
        let time = field(&mut tokens, "Time")?.parse::<i64>().ok()?;
        let inode = field(&mut tokens, "Inode")?.parse::<u64>().ok()?;

        if tokens.next().is_some() {
            return None;
        }

        Some(Self {
            offset,
            captured_at: DateTime::from_timestamp(time, 0)?,
            inode,
        })
    }
}

fn field<'a>(tokens: &mut impl Iterator<Item = &'a str>, name: &str) -> Option<&'a str> {
    if tokens.next()? != name {
        return None;
    }
    tokens.next()
}

/// State file location for a source file: the source path plus `.state`.
pub fn state_path_for(source: &Path) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(STATE_FILE_SUFFIX);
    PathBuf::from(name)
}

/// Read the persisted record at `path`.
///
/// A missing or unreadable file and a malformed record all mean "no usable
/// state"; none of them is an error for the caller.
pub fn load(path: &Path) -> Option<OffsetRecord> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No state file");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            return None;
        }
    };

    let record = OffsetRecord::parse(&text);
    if record.is_none() {
        warn!(path = %path.display(), content = %text.trim_end(), "Ignoring state file, cannot parse record");
    }
    record
}

/// Persist `record` at `path`, replacing any previous record.
///
/// Best effort: a failed write is logged and otherwise ignored, since it can
/// only cause duplicate delivery after the next restart.
pub fn save(path: &Path, record: &OffsetRecord) {
    match write_atomic(path, record.to_line().as_bytes()) {
        Ok(()) => debug!(path = %path.display(), offset = record.offset, "Checkpoint saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to save checkpoint"),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(data)?;
        // On disk before the rename makes it visible
        file.sync_all()
    });

    written
        .and_then(|()| std::fs::rename(&tmp_path, path))
        .inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp_path);
        })
}
