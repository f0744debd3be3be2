//! `synopsejson` — a text-frame envelope carrying a REST-shaped tuple as
//! a single JSON array (spec §4.2).

use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::protocol::{ProcessContext, Protocol, RestEnvelope};
use crate::rest::{Content, RestHandler, RestRequest, RestResponse};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const REQUEST_HEAD: &str = "request";
const ANSWER_HEAD: &str = "answer";

/// Prefix distinguishing a base64-wrapped binary body from a plain JSON
/// string in the trailing content slot (spec §4.2's "implementation's
/// magic marker prefix").
const BASE64_MAGIC: &str = "$base64$:";

const CANONICAL_JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone)]
pub struct JsonProtocol {
    handler: Arc<dyn RestHandler>,
}

impl JsonProtocol {
    pub fn new(handler: Arc<dyn RestHandler>) -> Self {
        JsonProtocol { handler }
    }

    /// Encodes a request-shaped tuple as the text frame payload, under
    /// `head = "request"`.
    pub fn encode_request(&self, request: &RestRequest) -> Frame {
        let array = vec![
            Value::String(request.method.clone()),
            Value::String(request.url.clone()),
            headers_to_value(&request.headers),
            content_type_value(&request.content_type),
            encode_content(&request.content_type, &request.content),
        ];
        Frame::new(OpCode::Text, encode_envelope(REQUEST_HEAD, array))
    }

    /// Encodes a response-shaped tuple as the text frame payload, under
    /// `head = "answer"`.
    pub fn encode_answer(&self, response: &RestResponse) -> Frame {
        let array = vec![
            Value::String(response.status.to_string()),
            headers_to_value(&response.headers),
            content_type_value(&response.content_type),
            encode_content(&response.content_type, &response.content),
        ];
        Frame::new(OpCode::Text, encode_envelope(ANSWER_HEAD, array))
    }

    fn decode_request(&self, frame: &Frame) -> Result<RestRequest, Error> {
        let (head, fields) = decode_envelope(frame)?;
        if !head.eq_ignore_ascii_case(REQUEST_HEAD) {
            return Err(Error::HeadMismatch {
                expected: REQUEST_HEAD.to_string(),
                found: head,
            });
        }
        let mut it = fields.into_iter();
        let method = take_string(&mut it)?;
        let url = take_string(&mut it)?;
        let headers = take_headers(&mut it)?;
        let content_type = take_content_type(&mut it)?;
        let content_value = it.next().ok_or(Error::EnvelopeTooShort)?;
        let content = decode_content(&content_type, content_value)?;
        Ok(RestRequest {
            head,
            method,
            url,
            headers,
            content_type,
            content,
        })
    }

    fn decode_answer(&self, frame: &Frame) -> Result<RestResponse, Error> {
        let (head, fields) = decode_envelope(frame)?;
        if !head.eq_ignore_ascii_case(ANSWER_HEAD) {
            return Err(Error::HeadMismatch {
                expected: ANSWER_HEAD.to_string(),
                found: head,
            });
        }
        let mut it = fields.into_iter();
        let status: u16 = take_string(&mut it)?
            .parse()
            .map_err(|_| Error::EnvelopeTooShort)?;
        let headers = take_headers(&mut it)?;
        let content_type = take_content_type(&mut it)?;
        let content_value = it.next().ok_or(Error::EnvelopeTooShort)?;
        let content = decode_content(&content_type, content_value)?;
        Ok(RestResponse {
            head,
            status,
            headers,
            content_type,
            content,
        })
    }

    /// Consumes an `"answer"`-headed frame (e.g. received in reply to an
    /// outbound callback request) into a `RestResponse`.
    pub fn frame_to_response(&self, frame: &Frame) -> Result<RestResponse, Error> {
        self.decode_answer(frame)
    }
}

impl Protocol for JsonProtocol {
    fn name(&self) -> &str {
        "synopsejson"
    }

    fn process_frame(&mut self, _ctx: &ProcessContext, frame: Frame) -> Result<Option<Frame>, Error> {
        if frame.opcode != OpCode::Text {
            return Err(Error::WrongFrameOpcode);
        }
        let request = self.decode_request(&frame)?;
        let response = self.handler.handle(&request);
        Ok(Some(self.encode_answer(&response)))
    }

    fn clone_box(&self) -> Box<dyn Protocol> {
        Box::new(self.clone())
    }

    fn as_rest_envelope(&self) -> Option<&dyn RestEnvelope> {
        Some(self)
    }
}

impl RestEnvelope for JsonProtocol {
    fn encode_request(&self, request: &RestRequest) -> Frame {
        JsonProtocol::encode_request(self, request)
    }

    fn frame_to_response(&self, frame: &Frame) -> Result<RestResponse, Error> {
        JsonProtocol::frame_to_response(self, frame)
    }
}

fn headers_to_value(headers: &HashMap<String, String>) -> Value {
    if headers.is_empty() {
        return Value::String(String::new());
    }
    let mut map = serde_json::Map::new();
    for (k, v) in headers {
        map.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(map)
}

fn content_type_value(content_type: &Option<String>) -> Value {
    Value::String(content_type.clone().unwrap_or_default())
}

/// Implements spec §4.2's four trailing-slot encoding rules.
fn encode_content(content_type: &Option<String>, content: &Content) -> Value {
    match content {
        Content::Empty => Value::String(String::new()),
        Content::Json(value) => {
            if is_json_content_type(content_type) {
                value.clone()
            } else {
                Value::String(value.to_string())
            }
        }
        Content::Text(text) => {
            if is_text_content_type(content_type) {
                Value::String(text.clone())
            } else {
                Value::String(format!("{BASE64_MAGIC}{}", BASE64_STANDARD.encode(text.as_bytes())))
            }
        }
        Content::Binary(bytes) => Value::String(format!("{BASE64_MAGIC}{}", BASE64_STANDARD.encode(bytes))),
    }
}

fn is_json_content_type(content_type: &Option<String>) -> bool {
    match content_type.as_deref() {
        None => true,
        Some(ct) => ct.is_empty() || ct.eq_ignore_ascii_case(CANONICAL_JSON_CONTENT_TYPE),
    }
}

fn is_text_content_type(content_type: &Option<String>) -> bool {
    content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/"))
        .unwrap_or(false)
}

fn decode_content(content_type: &Option<String>, value: Value) -> Result<Content, Error> {
    if let Value::String(s) = &value {
        if s.is_empty() {
            return Ok(Content::Empty);
        }
        if let Some(b64) = s.strip_prefix(BASE64_MAGIC) {
            let bytes = BASE64_STANDARD.decode(b64)?;
            return Ok(Content::Binary(bytes));
        }
        if is_text_content_type(content_type) {
            return Ok(Content::Text(s.clone()));
        }
    }
    if is_json_content_type(content_type) {
        return Ok(Content::Json(value));
    }
    match value {
        Value::String(s) => Ok(Content::Text(s)),
        other => Ok(Content::Json(other)),
    }
}

fn encode_envelope(head: &str, fields: Vec<Value>) -> Vec<u8> {
    let mut object = serde_json::Map::new();
    object.insert(head.to_string(), Value::Array(fields));
    serde_json::to_vec(&Value::Object(object)).expect("envelope values are always serializable")
}

fn decode_envelope(frame: &Frame) -> Result<(String, Vec<Value>), Error> {
    if frame.opcode != OpCode::Text {
        return Err(Error::WrongFrameOpcode);
    }
    if frame.payload.len() < 10 {
        return Err(Error::EnvelopeTooShort);
    }
    let value: Value = serde_json::from_slice(&frame.payload)?;
    let object = value.as_object().ok_or(Error::EnvelopeTooShort)?;
    let (head, fields) = object.iter().next().ok_or(Error::EnvelopeTooShort)?;
    let array = fields.as_array().ok_or(Error::EnvelopeTooShort)?;
    Ok((head.clone(), array.clone()))
}

fn take_string(it: &mut impl Iterator<Item = Value>) -> Result<String, Error> {
    match it.next().ok_or(Error::EnvelopeTooShort)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn take_headers(it: &mut impl Iterator<Item = Value>) -> Result<HashMap<String, String>, Error> {
    match it.next().ok_or(Error::EnvelopeTooShort)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, v.as_str().map(str::to_string).unwrap_or_default()))
            .collect()),
        _ => Ok(HashMap::new()),
    }
}

fn take_content_type(it: &mut impl Iterator<Item = Value>) -> Result<Option<String>, Error> {
    match take_string(it)?.as_str() {
        "" => Ok(None),
        other => Ok(Some(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;
    impl RestHandler for EchoHandler {
        fn handle(&self, request: &RestRequest) -> RestResponse {
            RestResponse {
                head: "answer".into(),
                status: 200,
                headers: HashMap::new(),
                content_type: request.content_type.clone(),
                content: request.content.clone(),
            }
        }
    }

    fn protocol() -> JsonProtocol {
        JsonProtocol::new(Arc::new(EchoHandler))
    }

    fn base_request(content_type: Option<&str>, content: Content) -> RestRequest {
        RestRequest {
            head: "request".into(),
            method: "GET".into(),
            url: "/x".into(),
            headers: HashMap::new(),
            content_type: content_type.map(str::to_string),
            content,
        }
    }

    #[test]
    fn round_trips_raw_json_content() {
        let proto = protocol();
        let req = base_request(
            Some("application/json"),
            Content::Json(serde_json::json!({"a": 1})),
        );
        let frame = proto.encode_request(&req);
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, req.content);
        assert_eq!(decoded.method, "GET");
        assert_eq!(decoded.url, "/x");
    }

    #[test]
    fn round_trips_text_content() {
        let proto = protocol();
        let req = base_request(Some("text/plain"), Content::Text("hello".into()));
        let frame = proto.encode_request(&req);
        let payload = String::from_utf8(frame.payload.clone()).unwrap();
        assert!(payload.contains("\"hello\""));
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, Content::Text("hello".into()));
    }

    #[test]
    fn round_trips_binary_content_via_base64_magic() {
        let proto = protocol();
        let req = base_request(
            Some("application/octet-stream"),
            Content::Binary(vec![0x00, 0x01, 0x02]),
        );
        let frame = proto.encode_request(&req);
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, Content::Binary(vec![0x00, 0x01, 0x02]));
    }

    #[test]
    fn round_trips_empty_content() {
        let proto = protocol();
        let req = base_request(None, Content::Empty);
        let frame = proto.encode_request(&req);
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, Content::Empty);
    }

    #[test]
    fn rejects_wrong_head_on_decode() {
        let proto = protocol();
        let resp = RestResponse::status_only("answer", 200);
        let frame = proto.encode_answer(&resp);
        let err = proto.decode_request(&frame).unwrap_err();
        assert!(matches!(err, Error::HeadMismatch { .. }));
    }

    #[test]
    fn process_frame_dispatches_to_handler() {
        let mut proto = protocol();
        let req = base_request(Some("application/json"), Content::Json(serde_json::json!(1)));
        let frame = proto.encode_request(&req);
        let ctx = ProcessContext {
            connection_id: uuid::Uuid::new_v4(),
        };
        let answer = proto.process_frame(&ctx, frame).unwrap().unwrap();
        let response = proto.frame_to_response(&answer).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content, Content::Json(serde_json::json!(1)));
    }
}
