use crate::storage::offset::FileIdentity;
use std::fmt;

/// A point in a specific physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePosition {
    pub identity: FileIdentity,
    pub offset: u64,
}

/// One line read from the source file, newline stripped, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    bytes: Box<[u8]>,
    /// Position just past this line, including its line terminator.
    position: LinePosition,
}

impl LogLine {
    pub fn new(bytes: Vec<u8>, position: LinePosition) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
            position,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn position(&self) -> LinePosition {
        self.position
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}
