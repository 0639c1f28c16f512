//! XML codec backed by `quick-xml`'s serde support.
//!
//! The root element is named after the serialized type.

use crate::call::Message;
use crate::codec::{Codec, Sink};
use crate::error::CodecError;

pub const NAME: &str = "xml";

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl Codec for XmlCodec {
    fn name(&self) -> &str {
        NAME
    }

    fn content_type(&self) -> &str {
        "application/xml"
    }

    fn marshal(&self, value: &dyn Message) -> Result<Vec<u8>, CodecError> {
        quick_xml::se::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| CodecError::encode(NAME, e))
    }

    fn unmarshal(&self, data: &[u8], sink: Sink<'_>) -> Result<(), CodecError> {
        let text = std::str::from_utf8(data).map_err(|e| CodecError::decode(NAME, e))?;
        let mut de = quick_xml::de::Deserializer::from_str(text);
        let mut erased = <dyn erased_serde::Deserializer>::erase(&mut de);
        sink(&mut erased).map_err(|e| CodecError::decode(NAME, e))
    }
}
