use crate::{Content, Envelope, Shape};
use std::collections::HashMap;

/// Errors reported by [Registry::check].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unregistered envelope type '{kind}'")]
    Unregistered { kind: String },

    #[error("envelope type '{kind}' expects {expected} content, got {actual}")]
    ShapeMismatch {
        kind: String,
        expected: Shape,
        actual: Shape,
    },
}

/// The envelope types a bridge accepts, with the shape of their content.
///
/// Both ends of a bridge are expected to use compatible registries;
/// envelopes that don't pass [Registry::check] are refused before
/// being sent and dropped, together with their connection, when
/// received.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    kinds: HashMap<String, Shape>,

    /// Shape for types missing from `kinds`, if they're allowed at all.
    fallback: Option<Shape>,
}

impl Registry {
    /// Create an empty registry, which refuses every envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that accepts any type with any content.
    pub fn permissive() -> Self {
        Self {
            kinds: HashMap::new(),
            fallback: Some(Shape::Any),
        }
    }

    /// Accept envelopes of the given type carrying the given shape.
    ///
    /// Registering a type again replaces its shape.
    pub fn register(&mut self, kind: impl Into<String>, shape: Shape) -> &mut Self {
        self.kinds.insert(kind.into(), shape);
        self
    }

    /// Builder-style version of [Registry::register].
    pub fn with(mut self, kind: impl Into<String>, shape: Shape) -> Self {
        self.register(kind, shape);
        self
    }

    /// Shape registered for the given type, if any.
    pub fn shape(&self, kind: &str) -> Option<Shape> {
        self.kinds.get(kind).copied().or(self.fallback)
    }

    /// Check that the envelope's type is known and that its content
    /// has the registered shape.
    pub fn check(&self, envelope: &Envelope) -> Result<(), RegistryError> {
        self.check_content(&envelope.kind, &envelope.content)
    }

    fn check_content(&self, kind: &str, content: &Content) -> Result<(), RegistryError> {
        let expected = self
            .shape(kind)
            .ok_or_else(|| RegistryError::Unregistered {
                kind: kind.to_string(),
            })?;
        if !expected.admits(content) {
            return Err(RegistryError::ShapeMismatch {
                kind: kind.to_string(),
                expected,
                actual: content.shape(),
            });
        }

        Ok(())
    }
}
