//! Directory response decoding.
//!
//! The directory answers in the format named in the lookup URL
//! (`…/info.json` or `…/info.xml`). Each format has one [`ResponseDecoder`]
//! producing the same flat payload map, so the attribute mapper never sees
//! the wire format.
//!
//! XML is folded into JSON values the way Rails-style XML endpoints expect:
//! text-only elements become strings, empty elements `null`, repeated
//! siblings arrays, and `type="array"` containers arrays of their children.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Decoded directory payload: field name → value.
pub type Payload = Map<String, Value>;

/// Wire format of directory responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// `application/json`
    #[default]
    Json,
    /// `application/xml`
    Xml,
}

impl ResponseFormat {
    /// File extension used in the lookup URL.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }

    /// Default media type for `Accept`/`Content-Type`.
    #[must_use]
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
        }
    }

    /// Decoder for this format.
    #[must_use]
    pub fn decoder(self, xml_root: &str) -> Box<dyn ResponseDecoder> {
        match self {
            Self::Json => Box::new(JsonDecoder),
            Self::Xml => Box::new(XmlDecoder::new(xml_root)),
        }
    }
}

/// Turns a raw response body into a payload map.
pub trait ResponseDecoder: Send + Sync {
    /// Decode `body`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when the body is malformed or not a map.
    fn decode(&self, body: &[u8]) -> Result<Payload>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON
// ─────────────────────────────────────────────────────────────────────────────

/// JSON object decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl ResponseDecoder for JsonDecoder {
    fn decode(&self, body: &[u8]) -> Result<Payload> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::Decode(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
            Err(e) => Err(Error::Decode(format!("invalid JSON: {e}"))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// XML
// ─────────────────────────────────────────────────────────────────────────────

/// XML decoder returning the children of a named root element.
#[derive(Debug, Clone)]
pub struct XmlDecoder {
    root: String,
}

impl XmlDecoder {
    /// Decoder expecting `<root>` as the document element.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl ResponseDecoder for XmlDecoder {
    fn decode(&self, body: &[u8]) -> Result<Payload> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::Decode(format!("XML body is not UTF-8: {e}")))?;
        let (name, value) = parse_document(text)?;

        if name != self.root {
            return Err(Error::Decode(format!(
                "expected <{}> root element, found <{name}>",
                self.root
            )));
        }

        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Payload::new()),
            Value::String(_) | Value::Array(_) | Value::Bool(_) | Value::Number(_) => Err(
                Error::Decode(format!("<{name}> carries no fields")),
            ),
        }
    }
}

/// Element being assembled while its children stream in.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<(String, Value)>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::Decode(format!("bad attribute in <{name}>: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value);
            let value = unescape(&raw)
                .map_err(|e| Error::Decode(format!("bad escape in <{name}> attribute: {e}")))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn into_value(self) -> (String, Value) {
        if self.attribute("nil") == Some("true") {
            return (self.name, Value::Null);
        }
        if self.attribute("type") == Some("array") {
            let items = self.children.into_iter().map(|(_, v)| v).collect();
            return (self.name, Value::Array(items));
        }

        let text = self.text.trim();
        let attributes: Vec<_> = self
            .attributes
            .into_iter()
            .filter(|(k, _)| k != "type")
            .collect();

        if self.children.is_empty() && attributes.is_empty() {
            let value = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
            return (self.name, value);
        }

        let mut map = Map::new();
        for (k, v) in attributes {
            map.insert(k, Value::String(v));
        }
        if self.children.is_empty() && !text.is_empty() {
            map.insert("__content__".to_string(), Value::String(text.to_string()));
        }

        // Group repeated siblings, keeping first-seen order
        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
        for (k, v) in self.children {
            match grouped.iter_mut().find(|(name, _)| *name == k) {
                Some((_, values)) => values.push(v),
                None => grouped.push((k, vec![v])),
            }
        }
        for (k, mut values) in grouped {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            map.insert(k, value);
        }

        (self.name, Value::Object(map))
    }
}

/// Parse a document into its root element name and value.
fn parse_document(text: &str) -> Result<(String, Value)> {
    // Text arrives split at entity references, so trimming happens once per
    // element in `into_value`.
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::Decode(format!(
                "invalid XML at position {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Element::open(&start)?.into_value();
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => return Ok((name, value)),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::Decode("unbalanced closing tag".to_string()))?;
                let (name, value) = element.into_value();
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => return Ok((name, value)),
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&unescape_lossy(&t)?);
                }
            }
            Event::GeneralRef(r) => {
                if let Some(current) = stack.last_mut() {
                    let reference = format!("&{};", String::from_utf8_lossy(&r));
                    current.text.push_str(&unescape_lossy(reference.as_bytes())?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => {
                return Err(Error::Decode(if stack.is_empty() {
                    "XML document has no root element".to_string()
                } else {
                    "XML document ended before its root element closed".to_string()
                }));
            }
            _ => {}
        }
    }
}

fn unescape_lossy(raw: &[u8]) -> Result<String> {
    let raw: Cow<'_, str> = String::from_utf8_lossy(raw);
    unescape(&raw)
        .map(Cow::into_owned)
        .map_err(|e| Error::Decode(format!("bad XML escape: {e}")))
}
