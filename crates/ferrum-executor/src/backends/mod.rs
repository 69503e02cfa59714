//! Built-in backends

pub mod echo;

pub use echo::{EchoBackend, EchoBackendFactory, EchoModelConfig, MODEL_CONFIG_FILE};
