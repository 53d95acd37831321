//! Discriminator-keyed message decoding.
//!
//! Every inbound text frame is a JSON object whose string `type` field names
//! one registered schema. A [`MessageRegistry`] maps those discriminators to
//! decoders producing the worker's message enum, so the handler gets an
//! exhaustively matchable value instead of a loose JSON map.
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct Ping {}
//! impl MessageSchema for Ping { const TYPE: &'static str = "ping"; }
//!
//! enum Inbound { Ping(Ping) }
//!
//! let messages = MessageRegistry::new().with(Inbound::Ping);
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::FrameError;
use thiserror::Error;

/// Name of the discriminator field in every typed frame.
pub const DISCRIMINATOR_FIELD: &str = "type";

/// A message schema selectable by discriminator.
pub trait MessageSchema: DeserializeOwned + Send + 'static {
    /// Discriminator value that selects this schema.
    const TYPE: &'static str;
}

/// Two schemas claimed the same discriminator.
#[derive(Debug, Error)]
#[error("discriminator {0:?} is already registered")]
pub struct DuplicateDiscriminator(pub &'static str);

type Decoder<M> = Box<dyn Fn(&Value) -> Result<M, serde_json::Error> + Send + Sync>;

/// Discriminator → decoder table for one worker type.
pub struct MessageRegistry<M> {
    decoders: HashMap<&'static str, Decoder<M>>,
}

impl<M: 'static> MessageRegistry<M> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register schema `T`, wrapping decoded values with `wrap`.
    pub fn register<T: MessageSchema>(
        &mut self,
        wrap: fn(T) -> M,
    ) -> Result<&mut Self, DuplicateDiscriminator> {
        if self.decoders.contains_key(T::TYPE) {
            return Err(DuplicateDiscriminator(T::TYPE));
        }
        let decoder: Decoder<M> = Box::new(move |value| T::deserialize(value).map(wrap));
        let _ = self.decoders.insert(T::TYPE, decoder);
        Ok(self)
    }

    /// Builder form of [`register`](Self::register).
    ///
    /// # Panics
    ///
    /// If `T::TYPE` is already registered. Registries are built once from
    /// static schema lists, so a duplicate is a programming error.
    #[must_use]
    pub fn with<T: MessageSchema>(mut self, wrap: fn(T) -> M) -> Self {
        if let Err(err) = self.register(wrap) {
            panic!("{err}");
        }
        self
    }

    /// Decode one text frame.
    ///
    /// Parse failures, a missing discriminator, an unknown discriminator and
    /// schema validation failures map to the matching [`FrameError`] variant.
    pub fn decode(&self, text: &str) -> Result<M, FrameError> {
        let value: Value = serde_json::from_str(text)?;

        let Some(discriminator) = value.get(DISCRIMINATOR_FIELD).and_then(Value::as_str) else {
            return Err(FrameError::MissingDiscriminator {
                raw: value.to_string(),
            });
        };

        let Some(decoder) = self.decoders.get(discriminator) else {
            return Err(FrameError::Unrecognized {
                discriminator: discriminator.to_owned(),
            });
        };

        decoder(&value).map_err(|err| FrameError::Validation {
            discriminator: discriminator.to_owned(),
            message: err.to_string(),
        })
    }

    /// Whether `discriminator` is registered.
    pub fn contains(&self, discriminator: &str) -> bool {
        self.decoders.contains_key(discriminator)
    }

    /// Registered discriminators (sorted).
    pub fn discriminators(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.decoders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<M: 'static> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&&'static str> = self.decoders.keys().collect();
        names.sort_unstable();
        f.debug_struct("MessageRegistry")
            .field("discriminators", &names)
            .finish()
    }
}
