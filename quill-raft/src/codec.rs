//! Encoding of configurations for persistence.

use crate::configuration::Configuration;
use crate::error::CodecError;

/// Converts a [`Configuration`] to and from bytes.
pub trait ConfigurationCodec: Send + Sync {
    fn encode(&self, configuration: &Configuration) -> Result<Vec<u8>, CodecError>;

    /// Decodes and re-validates a configuration.
    fn decode(&self, bytes: &[u8]) -> Result<Configuration, CodecError>;
}

/// The default codec: JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfigurationCodec;

impl ConfigurationCodec for JsonConfigurationCodec {
    fn encode(&self, configuration: &Configuration) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(configuration)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Configuration, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
