use crate::Content;
use std::fmt;

/// Unit of data exchanged across a bridge.
///
/// The type tag tells the receiver what to expect in the content. A
/// [crate::Registry] decides which tags are known and which
/// [crate::Shape] each of them carries.
#[derive(Clone, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Content,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn into_content(self) -> Content {
        self.content
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.kind, self.content)
    }
}
