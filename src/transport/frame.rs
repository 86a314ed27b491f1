//! Value types that cross the transport boundary
//!
//! These are plain data: frames reported by the session on connect and on
//! protocol errors, close notifications from the underlying socket, inbound
//! messages handed to subscription handlers, and outbound publish requests.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Frame and message headers
pub type Headers = HashMap<String, String>;

/// A protocol frame reported by the session (CONNECTED, ERROR, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Builder-style header insertion
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builder-style body replacement
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a single header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header("message") {
            Some(message) => write!(f, "{} ({message})", self.command),
            None => write!(f, "{}", self.command),
        }
    }
}

/// Close notification from the underlying socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            // 1000 is the normal-closure code for WebSocket-style transports
            was_clean: code == 1000,
        }
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

/// Message delivered to a subscription handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub destination: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Message {
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Outbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Binary(Bytes),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Text(text) => text.len(),
            Body::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options for a text publish.
///
/// Headers and the content-length switch are separate named options rather
/// than one argument whose meaning depends on its type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub headers: Headers,
    pub skip_content_length_header: bool,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn skip_content_length_header(mut self, skip: bool) -> Self {
        self.skip_content_length_header = skip;
        self
    }
}

/// Fully-formed publish handed to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub destination: String,
    pub body: Body,
    pub headers: Headers,
    pub skip_content_length_header: bool,
}

impl PublishRequest {
    pub fn text(destination: impl Into<String>, body: impl Into<String>, options: PublishOptions) -> Self {
        Self {
            destination: destination.into(),
            body: Body::Text(body.into()),
            headers: options.headers,
            skip_content_length_header: options.skip_content_length_header,
        }
    }

    /// Binary bodies always carry a content-length header
    pub fn binary(destination: impl Into<String>, body: impl Into<Bytes>, headers: Headers) -> Self {
        Self {
            destination: destination.into(),
            body: Body::Binary(body.into()),
            headers,
            skip_content_length_header: false,
        }
    }
}
