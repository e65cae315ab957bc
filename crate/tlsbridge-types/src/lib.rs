mod content;
mod envelope;
mod registry;

pub use content::{Content, Shape};
pub use envelope::Envelope;
pub use registry::{Registry, RegistryError};
