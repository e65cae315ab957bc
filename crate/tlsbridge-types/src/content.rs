use std::collections::BTreeMap;
use std::fmt;

/// Payload of an [crate::Envelope].
///
/// The set of variants is closed: anything an application sends
/// across a bridge must be expressed with these, so every value can
/// be serialized.
#[derive(Clone, PartialEq, Debug, Default, serde::Deserialize, serde::Serialize)]
pub enum Content {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Content>),
    Map(BTreeMap<String, Content>),
}

impl Content {
    /// The shape of this value, as checked by [crate::Registry].
    pub fn shape(&self) -> Shape {
        match self {
            Content::Empty => Shape::Empty,
            Content::Bool(_) => Shape::Bool,
            Content::Int(_) => Shape::Int,
            Content::Float(_) => Shape::Float,
            Content::Text(_) => Shape::Text,
            Content::Bytes(_) => Shape::Bytes,
            Content::List(_) => Shape::List,
            Content::Map(_) => Shape::Map,
        }
    }

    /// Return the text, if this is [Content::Text].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<bool> for Content {
    fn from(value: bool) -> Self {
        Content::Bool(value)
    }
}

impl From<i64> for Content {
    fn from(value: i64) -> Self {
        Content::Int(value)
    }
}

impl From<f64> for Content {
    fn from(value: f64) -> Self {
        Content::Float(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::Bytes(value)
    }
}

impl From<Vec<Content>> for Content {
    fn from(value: Vec<Content>) -> Self {
        Content::List(value)
    }
}

impl From<BTreeMap<String, Content>> for Content {
    fn from(value: BTreeMap<String, Content>) -> Self {
        Content::Map(value)
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => f.write_str("()"),
            Content::Bool(b) => write!(f, "{b}"),
            Content::Int(i) => write!(f, "{i}"),
            Content::Float(v) => write!(f, "{v}"),
            Content::Text(s) => f.write_str(s),
            Content::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Content::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Content::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Kind of value a type tag is allowed to carry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Deserialize, serde::Serialize)]
pub enum Shape {
    Empty,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    List,
    Map,

    /// Any [Content] is accepted.
    Any,
}

impl Shape {
    /// Check whether the content fits this shape.
    pub fn admits(&self, content: &Content) -> bool {
        *self == Shape::Any || *self == content.shape()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::Empty => "empty",
            Shape::Bool => "bool",
            Shape::Int => "int",
            Shape::Float => "float",
            Shape::Text => "text",
            Shape::Bytes => "bytes",
            Shape::List => "list",
            Shape::Map => "map",
            Shape::Any => "any",
        })
    }
}
