//! JSON codec.

use crate::call::Message;
use crate::codec::{Codec, Sink};
use crate::error::CodecError;

pub const NAME: &str = "json";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        NAME
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn marshal(&self, value: &dyn Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode(NAME, e))
    }

    fn marshal_to(&self, value: &dyn Message, writer: &mut dyn std::io::Write) -> Result<(), CodecError> {
        serde_json::to_writer(writer, value).map_err(|e| CodecError::encode(NAME, e))
    }

    fn unmarshal(&self, data: &[u8], sink: Sink<'_>) -> Result<(), CodecError> {
        let mut de = serde_json::Deserializer::from_slice(data);
        {
            let mut erased = <dyn erased_serde::Deserializer>::erase(&mut de);
            sink(&mut erased).map_err(|e| CodecError::decode(NAME, e))?;
        }
        // Trailing garbage after the value is a decode error.
        de.end().map_err(|e| CodecError::decode(NAME, e))
    }
}
