//! Encoding id to decoder registry.
//!
//! The process-wide registry is pre-populated with the built-in encodings
//! and is append-only: an id, once registered, is never overridden.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use super::{encoding, DecodeError, Encoding, Value};
use crate::addressing::Properties;
use crate::error::{DataspaceError, Result};

/// Decodes one payload into a [`Value`].
pub type ValueDecoder = Arc<dyn Fn(&[u8]) -> std::result::Result<Value, DecodeError> + Send + Sync>;

/// Global registry instance.
static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();

/// Mapping from encoding id to decoder.
pub struct CodecRegistry {
    decoders: RwLock<HashMap<Encoding, ValueDecoder>>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in decoders.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        {
            let mut decoders = registry.decoders.write();
            decoders.insert(encoding::RAW, Arc::new(raw_decoder) as ValueDecoder);
            decoders.insert(encoding::STRING, Arc::new(string_decoder) as ValueDecoder);
            decoders.insert(encoding::PROPERTIES, Arc::new(properties_decoder) as ValueDecoder);
            decoders.insert(encoding::JSON, Arc::new(string_decoder) as ValueDecoder);
            decoders.insert(encoding::INT, Arc::new(int_decoder) as ValueDecoder);
            decoders.insert(encoding::FLOAT, Arc::new(float_decoder) as ValueDecoder);
        }
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static CodecRegistry {
        REGISTRY.get_or_init(CodecRegistry::with_defaults)
    }

    /// Register a decoder for an unused encoding id.
    pub fn register<F>(&self, id: Encoding, decoder: F) -> Result<()>
    where
        F: Fn(&[u8]) -> std::result::Result<Value, DecodeError> + Send + Sync + 'static,
    {
        let mut decoders = self.decoders.write();
        if decoders.contains_key(&id) {
            return Err(DataspaceError::registration_conflict(id));
        }
        decoders.insert(id, Arc::new(decoder));
        debug!(encoding = id, "Registered value decoder");
        Ok(())
    }

    /// True if a decoder exists for `id`.
    pub fn contains(&self, id: Encoding) -> bool {
        self.decoders.read().contains_key(&id)
    }

    /// Decode a payload with the decoder registered for `id`.
    pub fn decode(&self, id: Encoding, payload: &[u8]) -> std::result::Result<Value, DecodeError> {
        // Clone the decoder out so a slow decoder never holds the lock.
        let decoder = self
            .decoders
            .read()
            .get(&id)
            .cloned()
            .ok_or(DecodeError::UnknownEncoding(id))?;
        decoder(payload)
    }
}

/// Register a decoder in the process-wide registry.
pub fn register_value_decoder<F>(id: Encoding, decoder: F) -> Result<()>
where
    F: Fn(&[u8]) -> std::result::Result<Value, DecodeError> + Send + Sync + 'static,
{
    CodecRegistry::global().register(id, decoder)
}

/// Decode a payload with the process-wide registry.
pub fn decode(id: Encoding, payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    CodecRegistry::global().decode(id, payload)
}

fn utf8(encoding: Encoding, payload: &[u8]) -> std::result::Result<&str, DecodeError> {
    std::str::from_utf8(payload).map_err(|source| DecodeError::InvalidUtf8 { encoding, source })
}

fn raw_decoder(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    Ok(Value::Raw(payload.to_vec()))
}

fn string_decoder(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    Ok(Value::String(utf8(encoding::STRING, payload)?.to_string()))
}

fn properties_decoder(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    Ok(Value::Properties(Properties::parse(utf8(encoding::PROPERTIES, payload)?)))
}

fn int_decoder(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    Ok(Value::Int(utf8(encoding::INT, payload)?.parse()?))
}

fn float_decoder(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    Ok(Value::Float(utf8(encoding::FLOAT, payload)?.parse()?))
}
