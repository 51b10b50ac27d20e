//! On-disk envelope for an alias file and the pluggable metadata decoder
//! registry.
//!
//! Each alias lives in its own `<fqdn>.json` file. The envelope additionally
//! accepts a `host` slot for schema compatibility with directories written
//! by other tooling, but this router never writes one itself: per the
//! router's contract, only aliases are persisted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RouterError;
use crate::router::named_route::PersistedNamedRoute;

#[derive(Debug, Serialize, Deserialize)]
pub struct Intermediate {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namedroute: Option<PersistedNamedRoute>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Intermediate {
    pub fn for_named_route(route: &PersistedNamedRoute) -> Self {
        Self {
            host: None,
            namedroute: Some(PersistedNamedRoute {
                name: route.name.clone(),
                owner: route.owner.clone(),
                created: route.created,
                last_seen: route.last_seen,
            }),
            metadata: None,
        }
    }

    /// Validate that every metadata key has a registered decoder. Unknown
    /// metadata types are refused at load, per the router's contract.
    pub fn validate_metadata(&self, decoders: &DecoderRegistry) -> Result<(), RouterError> {
        if let Some(metadata) = &self.metadata {
            for key in metadata.keys() {
                if !decoders.contains(key) {
                    return Err(RouterError::Decode(serde_json::Error::io(
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("no decoder registered for metadata key '{key}'"),
                        ),
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A decoder validates (and, for a real deployment, deserializes) one named
/// slice of alias side-metadata. The registry only needs to answer "do I
/// know this key" for `Intermediate::validate_metadata`; decoders that want
/// to keep the parsed value around attach it to the endpoint themselves.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &Value) -> Result<(), RouterError>;
}

#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Box<dyn Decoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, decoder: Box<dyn Decoder>) {
        self.decoders.insert(name.into(), decoder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    impl Decoder for AlwaysOk {
        fn decode(&self, _raw: &Value) -> Result<(), RouterError> {
            Ok(())
        }
    }

    #[test]
    fn unknown_metadata_key_is_rejected() {
        let registry = DecoderRegistry::new();
        let mut metadata = HashMap::new();
        metadata.insert("unknown".to_string(), Value::Null);
        let intermediate = Intermediate {
            host: None,
            namedroute: None,
            metadata: Some(metadata),
        };
        assert!(intermediate.validate_metadata(&registry).is_err());
    }

    #[test]
    fn registered_metadata_key_is_accepted() {
        let mut registry = DecoderRegistry::new();
        registry.register("note", Box::new(AlwaysOk));
        let mut metadata = HashMap::new();
        metadata.insert("note".to_string(), Value::String("hi".into()));
        let intermediate = Intermediate {
            host: None,
            namedroute: None,
            metadata: Some(metadata),
        };
        assert!(intermediate.validate_metadata(&registry).is_ok());
    }
}
