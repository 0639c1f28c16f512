//! Request binding for the textual protocol.
//!
//! # Responsibilities
//! - Collect the sources a typed request is populated from
//! - Enforce body and multipart size limits
//! - Select the request codec from `Content-Type`
//!
//! # Design Decisions
//! - Path variables are always available; read-only verbs add the query
//!   string, path winning unless `query_overrides_path` is set
//! - Form and multipart text fields merge with path variables the same way;
//!   multipart files are kept aside on the request
//! - A non-empty codec body is decoded first and path variables fill the
//!   fields it leaves out; an empty body binds from the path variables alone
//! - Key/value sources go through `serde_urlencoded`, so `?id=7` binds to a
//!   numeric field

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, request::Parts, Method};
use bytes::Bytes;
use multer::{Constraints, Multipart, SizeLimit};
use serde::de::value::{MapDeserializer, StringDeserializer};
use serde::de::{self, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::Value;

use crate::call::{FilePart, PathParams};
use crate::codec::{content_type_token, Codec, Registry, Sink};
use crate::config::{BindingConfig, CodecsConfig};
use crate::error::Error;

const FORM_URLENCODED: &str = "x-www-form-urlencoded";
const FORM_DATA: &str = "form-data";

/// Settings the binder consults for every call.
#[derive(Clone)]
pub struct Binder {
    registry: Arc<Registry>,
    codecs: CodecsConfig,
    binding: BindingConfig,
}

/// Where the typed request is decoded from.
pub enum Input {
    /// Key/value pairs (path, query, form fields).
    Pairs(Vec<(String, String)>),
    /// Body bytes decoded by a registered codec, plus the path variables
    /// that fill fields the body leaves out.
    Body {
        codec: Arc<dyn Codec>,
        data: Bytes,
        params: Vec<(String, String)>,
    },
}

/// Binding sources gathered for one call.
pub struct Prepared {
    pub input: Input,
    pub files: Vec<FilePart>,
}

impl Binder {
    pub fn new(registry: Arc<Registry>, codecs: CodecsConfig, binding: BindingConfig) -> Self {
        Self {
            registry,
            codecs,
            binding,
        }
    }

    /// Gathers the binding sources for a request.
    pub async fn prepare(&self, parts: &Parts, body: Body, params: &PathParams) -> Result<Prepared, Error> {
        if is_read_only(&parts.method) {
            let query = parts.uri.query().unwrap_or_default();
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
                .map_err(|e| Error::binding(format!("invalid query string: {e}")))?;
            return Ok(Prepared {
                input: Input::Pairs(merge(params, pairs, self.binding.query_overrides_path)),
                files: Vec::new(),
            });
        }

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        match content_type.and_then(content_type_token).as_deref() {
            Some(FORM_URLENCODED) => {
                let data = self.read_body(body).await?;
                let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&data)
                    .map_err(|e| Error::binding(format!("invalid form body: {e}")))?;
                Ok(Prepared {
                    input: Input::Pairs(merge(params, pairs, false)),
                    files: Vec::new(),
                })
            }
            Some(FORM_DATA) => self.multipart(content_type.unwrap_or_default(), body, params).await,
            _ => {
                let codec = self.registry.for_content_type(
                    content_type,
                    &self.codecs.default,
                    self.codecs.fallback_to_default,
                )?;
                let data = self.read_body(body).await?;
                let input = if data.is_empty() {
                    Input::Pairs(merge(params, Vec::new(), false))
                } else {
                    Input::Body {
                        codec,
                        data,
                        params: merge(params, Vec::new(), false),
                    }
                };
                Ok(Prepared {
                    input,
                    files: Vec::new(),
                })
            }
        }
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, Error> {
        axum::body::to_bytes(body, self.binding.max_body_bytes)
            .await
            .map_err(|e| Error::binding(format!("failed to read request body: {e}")))
    }

    async fn multipart(&self, content_type: &str, body: Body, params: &PathParams) -> Result<Prepared, Error> {
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| Error::binding(format!("invalid multipart content type: {e}")))?;
        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(self.binding.max_multipart_bytes));
        let mut multipart = Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let mut pairs = Vec::new();
        let mut files = Vec::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(ToString::to_string);
                    let data = field.bytes().await.map_err(multipart_error)?;
                    files.push(FilePart {
                        field: name,
                        file_name: Some(file_name),
                        content_type,
                        data,
                    });
                }
                None => pairs.push((name, field.text().await.map_err(multipart_error)?)),
            }
        }

        Ok(Prepared {
            input: Input::Pairs(merge(params, pairs, false)),
            files,
        })
    }
}

impl Input {
    /// Drives `sink` with a deserializer over this input.
    pub fn deserialize(&self, sink: Sink<'_>) -> Result<(), Error> {
        match self {
            Input::Pairs(pairs) => {
                let encoded = serde_urlencoded::to_string(pairs)
                    .map_err(|e| Error::binding(format!("invalid parameters: {e}")))?;
                let de = serde_urlencoded::Deserializer::new(form_urlencoded::parse(encoded.as_bytes()));
                let mut erased = <dyn erased_serde::Deserializer>::erase(de);
                sink(&mut erased).map_err(|e| Error::binding(format!("invalid parameters: {e}")))
            }
            Input::Body { codec, data, params } if params.is_empty() => {
                codec.unmarshal(data, sink).map_err(Error::from)
            }
            Input::Body { codec, data, params } => {
                let mut decoded = None;
                codec.unmarshal(data, &mut |de| {
                    decoded = Some(erased_serde::deserialize::<Value>(de)?);
                    Ok(())
                })?;
                let Some(Value::Object(body)) = decoded else {
                    return codec.unmarshal(data, sink).map_err(Error::from);
                };

                let missing: Vec<(String, Field)> = params
                    .iter()
                    .filter(|(name, _)| !body.contains_key(name))
                    .map(|(name, value)| (name.clone(), Field::Path(value.clone())))
                    .collect();
                let fields = body
                    .into_iter()
                    .map(|(name, value)| (name, Field::Body(value)))
                    .chain(missing);
                let de = MapDeserializer::<_, serde_json::Error>::new(fields);
                let mut erased = <dyn erased_serde::Deserializer>::erase(de);
                sink(&mut erased).map_err(|e| Error::binding(format!("invalid request body: {e}")))
            }
        }
    }
}

/// One field of a body merged with path variables.
///
/// Path text, and string values from codecs without native scalars, parse
/// into whatever primitive the target field asks for.
enum Field {
    Body(Value),
    Path(String),
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for Field {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_primitive {
    ($($method:ident => $visit:ident,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                match self {
                    Field::Path(text) | Field::Body(Value::String(text)) => match text.parse() {
                        Ok(parsed) => visitor.$visit(parsed),
                        Err(_) => Err(de::Error::invalid_value(Unexpected::Str(&text), &visitor)),
                    },
                    Field::Body(value) => de::Deserializer::$method(value, visitor),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Field {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self {
            Field::Body(value) => de::Deserializer::deserialize_any(value, visitor),
            Field::Path(text) => visitor.visit_string(text),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self {
            Field::Body(value) => de::Deserializer::deserialize_option(value, visitor),
            path => visitor.visit_some(path),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self {
            Field::Body(value) => de::Deserializer::deserialize_enum(value, name, variants, visitor),
            Field::Path(text) => {
                let variant: StringDeserializer<serde_json::Error> = text.into_deserializer();
                visitor.visit_enum(variant)
            }
        }
    }

    parse_primitive! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
        deserialize_char => visit_char,
    }

    forward_to_deserialize_any! {
        i128 u128 str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

fn is_read_only(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn multipart_error(err: multer::Error) -> Error {
    Error::binding(format!("invalid multipart body: {err}"))
}

/// Adds path variables to `fields`. On a name clash the path value wins
/// unless `fields_win` is set.
fn merge(params: &PathParams, mut fields: Vec<(String, String)>, fields_win: bool) -> Vec<(String, String)> {
    for (name, value) in params.iter() {
        if fields.iter().any(|(field, _)| field == name) {
            if fields_win {
                continue;
            }
            fields.retain(|(field, _)| field != name);
        }
        fields.push((name.to_string(), value.to_string()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::decode_with;
    use axum::http::Request;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Lookup {
        id: u32,
        verbose: Option<bool>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greet {
        name: String,
    }

    fn binder(query_overrides_path: bool) -> Binder {
        Binder::new(
            Arc::new(Registry::with_defaults()),
            CodecsConfig::default(),
            BindingConfig {
                query_overrides_path,
                ..Default::default()
            },
        )
    }

    fn id_param(value: &str) -> PathParams {
        PathParams::new(vec![("id".into(), value.into())])
    }

    async fn bind<T: serde::de::DeserializeOwned>(
        binder: &Binder,
        request: Request<Body>,
        params: &PathParams,
    ) -> Result<T, Error> {
        let (parts, body) = request.into_parts();
        let prepared = binder.prepare(&parts, body, params).await?;
        decode_with(&mut |sink| prepared.input.deserialize(sink))
    }

    #[tokio::test]
    async fn read_only_verb_keeps_path_value_over_query() {
        let request = Request::get("/items/7?id=9&verbose=true").body(Body::empty()).unwrap();
        let bound: Lookup = bind(&binder(false), request, &id_param("7")).await.unwrap();
        assert_eq!(bound, Lookup { id: 7, verbose: Some(true) });
    }

    #[tokio::test]
    async fn query_can_be_configured_to_override_path() {
        let request = Request::get("/items/7?id=9").body(Body::empty()).unwrap();
        let bound: Lookup = bind(&binder(true), request, &id_param("7")).await.unwrap();
        assert_eq!(bound.id, 9);
    }

    #[tokio::test]
    async fn json_body_is_decoded_with_registered_codec() {
        let request = Request::post("/greet")
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::from(r#"{"name":"Ada"}"#))
            .unwrap();
        let bound: Greet = bind(&binder(false), request, &PathParams::default()).await.unwrap();
        assert_eq!(bound.name, "Ada");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Update {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn json_body_is_merged_with_path() {
        let request = Request::put("/items/7")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"x"}"#))
            .unwrap();
        let bound: Update = bind(&binder(false), request, &id_param("7")).await.unwrap();
        assert_eq!(bound, Update { id: 7, name: "x".into() });
    }

    #[tokio::test]
    async fn json_body_field_wins_over_path() {
        let request = Request::put("/items/7")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":9,"name":"x"}"#))
            .unwrap();
        let bound: Update = bind(&binder(false), request, &id_param("7")).await.unwrap();
        assert_eq!(bound.id, 9);
    }

    #[tokio::test]
    async fn malformed_path_value_with_body_is_a_binding_error() {
        let request = Request::put("/items/abc")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"x"}"#))
            .unwrap();
        let err = bind::<Update>(&binder(false), request, &id_param("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Binding(_)));
    }

    #[tokio::test]
    async fn empty_body_binds_from_path() {
        let request = Request::delete("/greet/Ada").body(Body::empty()).unwrap();
        let params = PathParams::new(vec![("name".into(), "Ada".into())]);
        let bound: Greet = bind(&binder(false), request, &params).await.unwrap();
        assert_eq!(bound.name, "Ada");
    }

    #[tokio::test]
    async fn form_body_merges_with_path() {
        let request = Request::post("/items/3")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("id=5&verbose=false"))
            .unwrap();
        let bound: Lookup = bind(&binder(false), request, &id_param("3")).await.unwrap();
        assert_eq!(bound, Lookup { id: 3, verbose: Some(false) });
    }

    #[tokio::test]
    async fn multipart_splits_fields_and_files() {
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"name\"\r\n\r\n\
            Ada\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"avatar\"; filename=\"ada.png\"\r\n\
            Content-Type: image/png\r\n\r\n\
            PNGDATA\r\n\
            --XYZ--\r\n";
        let request = Request::post("/upload")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();
        let (parts, body) = request.into_parts();
        let prepared = binder(false)
            .prepare(&parts, body, &PathParams::default())
            .await
            .unwrap();

        assert_eq!(prepared.files.len(), 1);
        assert_eq!(prepared.files[0].file_name.as_deref(), Some("ada.png"));
        assert_eq!(prepared.files[0].data, Bytes::from_static(b"PNGDATA"));
        let bound: Greet = decode_with(&mut |sink| prepared.input.deserialize(sink)).unwrap();
        assert_eq!(bound.name, "Ada");
    }

    #[tokio::test]
    async fn multipart_over_limit_is_rejected() {
        let binder = Binder::new(
            Arc::new(Registry::with_defaults()),
            CodecsConfig::default(),
            BindingConfig {
                max_multipart_bytes: 16,
                ..Default::default()
            },
        );
        let body = "--XYZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nAda Lovelace\r\n--XYZ--\r\n";
        let request = Request::post("/upload")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();
        let (parts, body) = request.into_parts();
        let err = binder
            .prepare(&parts, body, &PathParams::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Binding(_)));
    }

    #[tokio::test]
    async fn unregistered_content_type_is_rejected() {
        let request = Request::post("/greet")
            .header("content-type", "application/yaml")
            .body(Body::from("name: Ada"))
            .unwrap();
        let err = bind::<Greet>(&binder(false), request, &PathParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), axum::http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn non_numeric_path_value_is_a_binding_error() {
        let request = Request::get("/items/abc").body(Body::empty()).unwrap();
        let err = bind::<Lookup>(&binder(false), request, &id_param("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Binding(_)));
    }
}
