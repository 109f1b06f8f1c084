use crate::codec;
use crate::pipeline::LogLine;

/// Shape of a line's payload, sent as the message content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Bracketed like a JSON object.
    Structured,
    Plain,
}

impl ContentType {
    pub fn classify(raw: &[u8]) -> Self {
        let trimmed = raw.trim_ascii();
        if trimmed.first() == Some(&b'{') && trimmed.last() == Some(&b'}') {
            Self::Structured
        } else {
            Self::Plain
        }
    }

    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Structured => "application/json",
            Self::Plain => "text/plain",
        }
    }
}

/// A decoded line ready for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    content_type: ContentType,
}

impl Message {
    pub fn from_line(line: &LogLine) -> Self {
        let raw = line.as_bytes();
        Self {
            content_type: ContentType::classify(raw),
            body: codec::decode(raw).into_owned(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }
}
