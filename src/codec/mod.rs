//! Codec registry and content negotiation.
//!
//! # Data Flow
//! ```text
//! Content-Type / Accept header
//!     → content_type_token()   ("application/json; charset=utf-8" → "json")
//!     → Registry::resolve()    (token → Arc<dyn Codec>)
//!     → Codec::marshal / Codec::unmarshal
//! ```
//!
//! # Design Decisions
//! - Tokens are lower-cased; the last registration for a token wins
//! - The process-wide registry (`Registry::global`) is pre-loaded with json
//!   and xml, but every component takes an `Arc<Registry>` so tests can
//!   inject their own
//! - Codecs are object-safe through `erased-serde`; callers never special-case
//!   a format beyond picking the codec instance

pub mod json;
pub mod xml;

use std::io;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::call::Message;
use crate::error::{CodecError, Error};

pub use json::JsonCodec;
pub use xml::XmlCodec;

/// Callback a codec drives with its format-specific deserializer.
pub type Sink<'s> = &'s mut dyn for<'de> FnMut(
    &mut dyn erased_serde::Deserializer<'de>,
) -> Result<(), erased_serde::Error>;

/// A serializer/deserializer pair identified by a content-type token.
pub trait Codec: Send + Sync + 'static {
    /// Lower-case token, e.g. `"json"`.
    fn name(&self) -> &str;

    /// Full media type written on responses, e.g. `"application/json"`.
    fn content_type(&self) -> &str;

    fn marshal(&self, value: &dyn Message) -> Result<Vec<u8>, CodecError>;

    /// Runs `sink` against a deserializer over `data`.
    fn unmarshal(&self, data: &[u8], sink: Sink<'_>) -> Result<(), CodecError>;

    /// Streaming encoder variant.
    fn marshal_to(&self, value: &dyn Message, writer: &mut dyn io::Write) -> Result<(), CodecError> {
        let bytes = self.marshal(value)?;
        writer
            .write_all(&bytes)
            .map_err(|e| CodecError::encode(self.name(), e))
    }

    /// Streaming decoder variant.
    fn unmarshal_from(&self, reader: &mut dyn io::Read, sink: Sink<'_>) -> Result<(), CodecError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| CodecError::decode(self.name(), e))?;
        self.unmarshal(&data, sink)
    }
}

/// Decodes `data` into `T` with `codec`.
pub fn decode<T: DeserializeOwned>(codec: &dyn Codec, data: &[u8]) -> Result<T, CodecError> {
    let mut decoded = None;
    codec.unmarshal(data, &mut |de| {
        decoded = Some(erased_serde::deserialize::<T>(de)?);
        Ok(())
    })?;
    decoded.ok_or_else(|| CodecError::decode(codec.name(), "codec produced no value"))
}

/// Extracts the codec token from a media type: the text between the first
/// `/` and the first `;`, trimmed and lower-cased.
///
/// Returns `None` for malformed or empty values.
pub fn content_type_token(media_type: &str) -> Option<String> {
    let (_, rest) = media_type.split_once('/')?;
    let token = rest.split(';').next().unwrap_or_default().trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_ascii_lowercase())
}

/// Token requested by an `Accept` header. Only the first media range is
/// considered; wildcards count as "no preference".
pub fn accept_token(accept: &str) -> Option<String> {
    let first = accept.split(',').next()?;
    content_type_token(first).filter(|token| token != "*")
}

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::with_defaults()));

/// Token → codec map.
#[derive(Default)]
pub struct Registry {
    codecs: DashMap<String, Arc<dyn Codec>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the json and xml codecs.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.codecs.insert(json::NAME.to_string(), Arc::new(JsonCodec));
        registry.codecs.insert(xml::NAME.to_string(), Arc::new(XmlCodec));
        registry
    }

    /// Process-wide registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Adds `codec`, replacing any codec with the same token.
    pub fn register(&self, codec: Arc<dyn Codec>) -> Result<(), Error> {
        let token = codec.name().trim().to_ascii_lowercase();
        if token.is_empty() {
            return Err(Error::configuration("cannot register a codec with an empty type"));
        }
        if let Some(previous) = self.codecs.insert(token.clone(), codec) {
            tracing::debug!(token = %token, replaced = previous.content_type(), "Codec replaced");
        }
        Ok(())
    }

    pub fn resolve(&self, token: &str) -> Option<Arc<dyn Codec>> {
        self.codecs
            .get(&token.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.codecs.contains_key(&token.to_ascii_lowercase())
    }

    /// Registered tokens, sorted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.codecs.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        tokens
    }

    /// Codec for a request body's `Content-Type`.
    ///
    /// A missing or malformed header selects `default`. A well-formed but
    /// unregistered token is an error unless `fallback` is set.
    pub fn for_content_type(
        &self,
        content_type: Option<&str>,
        default: &str,
        fallback: bool,
    ) -> Result<Arc<dyn Codec>, CodecError> {
        let token = content_type
            .and_then(content_type_token)
            .unwrap_or_else(|| default.to_string());
        match self.resolve(&token) {
            Some(codec) => Ok(codec),
            None if fallback => self.resolve_default(default),
            None => Err(CodecError::Unregistered { token }),
        }
    }

    /// Codec for a response, chosen from the `Accept` header.
    pub fn negotiate(&self, accept: Option<&str>, default: &str) -> Result<Arc<dyn Codec>, CodecError> {
        match accept.and_then(accept_token) {
            Some(token) => self
                .resolve(&token)
                .ok_or(CodecError::NotAcceptable { token }),
            None => self.resolve_default(default),
        }
    }

    fn resolve_default(&self, default: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.resolve(default).ok_or_else(|| CodecError::Unregistered {
            token: default.to_string(),
        })
    }
}
