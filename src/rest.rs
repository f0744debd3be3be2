//! The REST-shaped request/response pair carried inside both envelope
//! subprotocols (spec §4.2/§4.3). A single shape here keeps the JSON and
//! binary codecs reducible to "serialize this struct" / "parse into this
//! struct", and gives the host application one type to hand its REST
//! handler regardless of which subprotocol the client negotiated.

use std::collections::HashMap;

/// Content carried by a request or response body, tagged by how the
/// envelope encoded it (spec §4.2's four branches / §4.3's equivalent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// No body at all.
    Empty,
    /// Body is already-valid JSON, embedded as a raw JSON value rather
    /// than a quoted string.
    Json(serde_json::Value),
    /// Body is opaque text, not valid JSON.
    Text(String),
    /// Body is binary data that cannot be represented as text.
    Binary(Vec<u8>),
}

/// An inbound REST-shaped request, decoded from either envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    /// Correlates this request with its eventual response (spec §4.2
    /// "head").
    pub head: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub content: Content,
}

/// An outbound REST-shaped response, re-encoded into whichever envelope
/// the originating request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub head: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub content: Content,
}

impl RestResponse {
    /// Builds a response that merely carries a status and no body, using
    /// the head of the request it answers.
    pub fn status_only(head: impl Into<String>, status: u16) -> Self {
        RestResponse {
            head: head.into(),
            status,
            headers: HashMap::new(),
            content_type: None,
            content: Content::Empty,
        }
    }
}

/// The host application's REST handler: given a decoded request, produce
/// a response. Implementations run on the connection's own thread during
/// `process_one`, so they should not block indefinitely.
pub trait RestHandler: Send + Sync {
    fn handle(&self, request: &RestRequest) -> RestResponse;
}
