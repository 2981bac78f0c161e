//! Connection configuration and header normalization.

use std::collections::{BTreeMap, HashMap};

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConnectionError;

/// Options for a single connection. Every field is optional; `None` means
/// the transport default applies.
///
/// The JSON form uses camelCase keys (`writeBufferSize`, `maxFrameSize`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Outbound bytes buffered before a write is flushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_buffer_size: Option<usize>,
    /// Hard cap on the outbound buffer; sends beyond it fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_write_buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    /// Accept frames from the server that are masked incorrectly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_unmasked_frames: Option<bool>,
    /// Extra handshake headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = Some(bytes);
        self
    }

    pub fn with_max_write_buffer_size(mut self, bytes: usize) -> Self {
        self.max_write_buffer_size = Some(bytes);
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    pub fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = Some(accept);
        self
    }

    /// Append a handshake header (can be called multiple times, also for the
    /// same name).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .append(name, value);
        self
    }

    /// Return a copy whose headers are in canonical form. This is what gets
    /// handed to the transport.
    pub fn normalized(&self) -> Result<Self, ConnectionError> {
        let headers = self.headers.as_ref().map(Headers::normalize).transpose()?;
        Ok(Self {
            headers,
            ..self.clone()
        })
    }
}

/// An ordered list of header name/value pairs.
///
/// Names compare case-insensitively. Repeated names stay separate entries;
/// nothing is merged. Serializes as `[["name", "value"], ...]` and also
/// deserializes from a plain `{ "name": "value" }` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Validate every pair and bring it into canonical form: lowercase names,
    /// values without surrounding whitespace. Order and duplicates are kept.
    pub fn normalize(&self) -> Result<Self, ConnectionError> {
        self.0
            .iter()
            .map(|(name, value)| normalize_pair(name, value))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Parse a `Name: value` line.
    pub fn parse_line(line: &str) -> Result<(String, String), ConnectionError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ConnectionError::InvalidHeader {
                name: line.to_owned(),
                reason: "expected `Name: value`".into(),
            })?;
        normalize_pair(name, value)
    }
}

fn normalize_pair(name: &str, value: &str) -> Result<(String, String), ConnectionError> {
    let header = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
        ConnectionError::InvalidHeader {
            name: name.to_owned(),
            reason: e.to_string(),
        }
    })?;
    let value = value.trim();
    HeaderValue::from_str(value).map_err(|e| ConnectionError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })?;
    Ok((header.as_str().to_ascii_lowercase(), value.to_owned()))
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// Entries are sorted by name, `HashMap` has no order of its own.
impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect::<BTreeMap<_, _>>().into()
    }
}

impl From<&HeaderMap> for Headers {
    fn from(map: &HeaderMap) -> Self {
        map.iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Pairs(Vec<(String, String)>),
            Map(BTreeMap<String, String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Pairs(pairs) => Self(pairs),
            Repr::Map(map) => map.into(),
        })
    }
}
