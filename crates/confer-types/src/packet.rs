use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::value::{flatten, Properties, Value};

/// Upper bound on the capacity reserved up front from a declared length.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Owned, readable body of a fetched document.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Raw result of a backend fetch: location, body stream and metadata.
///
/// The body is owned by whoever holds the packet. [`StreamPacket::into_bytes`]
/// consumes the packet, so the underlying stream is released on every exit
/// path, including read errors.
pub struct StreamPacket {
    location: Url,
    body: ByteStream,
    length: u64,
    change_token: Option<String>,
}

impl StreamPacket {
    /// Wrap a backend read stream of `length` declared bytes.
    pub fn new(location: Url, body: impl AsyncRead + Send + 'static, length: u64) -> Self {
        Self {
            location,
            body: Box::pin(body),
            length,
            change_token: None,
        }
    }

    /// Wrap a stream that is already boxed.
    pub fn from_stream(location: Url, body: ByteStream, length: u64) -> Self {
        Self {
            location,
            body,
            length,
            change_token: None,
        }
    }

    /// Wrap an in-memory body.
    pub fn from_bytes(location: Url, data: Bytes) -> Self {
        let length = data.len() as u64;
        Self::new(location, io::Cursor::new(data), length)
    }

    /// Attach the backend's change token. Empty tokens are ignored.
    pub fn with_change_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.change_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Declared content length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn change_token(&self) -> Option<&str> {
        self.change_token.as_deref()
    }

    /// Read the whole body, consuming the packet.
    ///
    /// Fails with `UnexpectedEof` if the stream ends before the declared
    /// length.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::with_capacity(self.length.min(MAX_PREALLOC) as usize);
        self.body.read_to_end(&mut buf).await?;
        if (buf.len() as u64) < self.length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "body of {} truncated: read {} of {} bytes",
                    self.location,
                    buf.len(),
                    self.length
                ),
            ));
        }
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for StreamPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPacket")
            .field("location", &self.location.as_str())
            .field("length", &self.length)
            .field("change_token", &self.change_token)
            .finish_non_exhaustive()
    }
}

/// A configuration document as an ordered property mapping plus metadata.
///
/// Fetched packets carry their resolved location, the raw body and the
/// backend change token. If the body could not be decoded, the mapping stays
/// empty and [`PropertyPacket::decode_failure`] describes why. Packets built
/// by callers for writes usually only carry properties.
///
/// Serializes as its property mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyPacket {
    location: Option<Url>,
    properties: Properties,
    change_token: Option<String>,
    content_length: u64,
    body: Option<Bytes>,
    decode_failure: Option<String>,
}

impl PropertyPacket {
    /// An empty packet not bound to any location.
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet holding `properties`, typically for a write.
    pub fn from_properties(properties: Properties) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    /// An empty packet for a document fetched from `location`.
    pub fn fetched(location: Url, body: Bytes, change_token: Option<String>) -> Self {
        Self {
            location: Some(location),
            content_length: body.len() as u64,
            body: Some(body),
            change_token,
            ..Self::default()
        }
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn change_token(&self) -> Option<&str> {
        self.change_token.as_deref()
    }

    pub fn set_change_token(&mut self, token: Option<String>) {
        self.change_token = token;
    }

    /// Length of the fetched body in bytes, zero for caller-built packets.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The raw body this packet was decoded from, if it was fetched.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Why decoding failed, if it did.
    pub fn decode_failure(&self) -> Option<&str> {
        self.decode_failure.as_deref()
    }

    /// Record a decode failure. The property mapping is cleared so a
    /// partially decoded document never leaks out.
    pub fn mark_decode_failure(&mut self, reason: impl Into<String>) {
        self.properties.clear();
        self.decode_failure = Some(reason.into());
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn into_properties(self) -> Properties {
        self.properties
    }

    /// Merge `properties` in, keeping existing key positions and appending
    /// new keys in their iteration order.
    pub fn merge(&mut self, properties: Properties) {
        for (key, value) in properties {
            self.properties.insert(key, value);
        }
    }

    /// Insert one property, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// The mapping with nested values flattened to dotted keys.
    pub fn flattened(&self) -> Properties {
        flatten(&self.properties)
    }
}

impl Serialize for PropertyPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}
