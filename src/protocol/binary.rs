//! `synopsebinary` — a binary-frame envelope carrying a REST-shaped
//! tuple as `\x01`-delimited fields, with optional compression and
//! optional AES-CFB-256 encryption (spec §4.3).

use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::protocol::{ProcessContext, Protocol, RestEnvelope};
use crate::rest::{Content, RestHandler, RestRequest, RestResponse};
use aes::Aes256;
use cfb_mode::{Decryptor, Encryptor};
use cipher::{AsyncStreamCipher, KeyIvInit};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

const REQUEST_HEAD: &str = "request";
const ANSWER_HEAD: &str = "answer";
const FIELD_SEP: u8 = 0x01;
const AES_BLOCK: usize = 16;

type Aes256CfbEnc = Encryptor<Aes256>;
type Aes256CfbDec = Decryptor<Aes256>;

/// Derived key material for the AES-CFB-256 path, or `None` when
/// encryption is disabled (empty key/iv, or a key under 128 bits).
#[derive(Clone)]
struct CipherKeys {
    key: [u8; 32],
    iv: [u8; 16],
}

impl CipherKeys {
    fn derive(key: &str, iv: &str) -> Option<Self> {
        if key.is_empty() || iv.is_empty() || key.as_bytes().len() < 16 {
            return None;
        }
        let key_digest = Sha256::digest(key.as_bytes());
        let iv_digest = Sha256::digest(iv.as_bytes());
        let mut derived_key = [0u8; 32];
        derived_key.copy_from_slice(&key_digest);
        let mut derived_iv = [0u8; 16];
        derived_iv.copy_from_slice(&iv_digest[..16]);
        Some(CipherKeys {
            key: derived_key,
            iv: derived_iv,
        })
    }

    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = pkcs7_pad(plaintext, AES_BLOCK);
        Aes256CfbEnc::new(&self.key.into(), &self.iv.into()).encrypt(&mut buf);
        buf
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut buf = ciphertext.to_vec();
        Aes256CfbDec::new(&self.key.into(), &self.iv.into()).decrypt(&mut buf);
        pkcs7_unpad(&buf).ok_or_else(|| Error::DecryptionFailed("invalid PKCS7 padding".into()))
    }
}

/// Pads `data` to a multiple of `block` bytes, RFC 5652-style (every
/// padding byte carries the pad length, 1..=block).
fn pkcs7_pad(data: &[u8], block: usize) -> Vec<u8> {
    let pad_len = block - (data.len() % block);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

fn pkcs7_unpad(data: &[u8]) -> Option<Vec<u8>> {
    let pad_len = *data.last()? as usize;
    if pad_len == 0 || pad_len > data.len() || pad_len > AES_BLOCK {
        return None;
    }
    if data[data.len() - pad_len..].iter().any(|&b| b as usize != pad_len) {
        return None;
    }
    Some(data[..data.len() - pad_len].to_vec())
}

fn compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::DecompressionFailed(e.to_string()))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
    Ok(out)
}

#[derive(Clone)]
pub struct BinaryProtocol {
    handler: Arc<dyn RestHandler>,
    compressed: bool,
    cipher: Option<CipherKeys>,
}

impl BinaryProtocol {
    pub fn new(handler: Arc<dyn RestHandler>, compressed: bool) -> Self {
        BinaryProtocol {
            handler,
            compressed,
            cipher: None,
        }
    }

    /// Enables AES-CFB-256 when `key`/`iv` derive usable material; a
    /// silently-ignored call otherwise (spec §4.3 "when either is empty,
    /// encryption is disabled").
    pub fn with_encryption(mut self, key: &str, iv: &str) -> Self {
        self.cipher = CipherKeys::derive(key, iv);
        self
    }

    fn encode(&self, head: &str, fields: Vec<String>, content_type: &Option<String>, content: &Content) -> Frame {
        let mut tmp = Vec::new();
        tmp.extend_from_slice(head.as_bytes());
        tmp.push(FIELD_SEP);
        for field in &fields {
            tmp.extend_from_slice(field.as_bytes());
            tmp.push(FIELD_SEP);
        }
        tmp.extend_from_slice(content_type.as_deref().unwrap_or("").as_bytes());
        tmp.push(FIELD_SEP);
        tmp.extend_from_slice(&content_bytes(content));

        let mut body = tmp;
        if self.compressed {
            body = compress(&body).expect("in-memory zlib compression cannot fail");
        }
        if let Some(cipher) = &self.cipher {
            body = cipher.encrypt(&body);
        }

        let mut payload = Vec::with_capacity(head.len() + 1 + body.len());
        payload.extend_from_slice(head.as_bytes());
        payload.push(FIELD_SEP);
        payload.extend_from_slice(&body);
        Frame::new(OpCode::Binary, payload)
    }

    fn decode(
        &self,
        frame: &Frame,
        expected_head: &str,
        field_count: usize,
    ) -> Result<(Vec<String>, Option<String>, Vec<u8>), Error> {
        if frame.opcode != OpCode::Binary {
            return Err(Error::WrongFrameOpcode);
        }
        let sep = frame
            .payload
            .iter()
            .position(|&b| b == FIELD_SEP)
            .ok_or(Error::EnvelopeTooShort)?;
        let head = String::from_utf8(frame.payload[..sep].to_vec())?;
        let rest = &frame.payload[sep + 1..];
        if rest.len() < 5 || !head.eq_ignore_ascii_case(expected_head) {
            return Err(Error::HeadMismatch {
                expected: expected_head.to_string(),
                found: head,
            });
        }

        let mut body = rest.to_vec();
        if let Some(cipher) = &self.cipher {
            body = cipher.decrypt(&body)?;
        }
        if self.compressed {
            body = decompress(&body)?;
        }
        if body.len() < 4 {
            return Err(Error::DecompressedTooShort);
        }

        // Redundant inner head check (spec §4.3 step 4 / §9 "envelope
        // redundancy"): the outer head let us reject cheaply; this one
        // authenticates the decrypted/decompressed payload.
        let inner_sep = body
            .iter()
            .position(|&b| b == FIELD_SEP)
            .ok_or(Error::EnvelopeTooShort)?;
        let inner_head = String::from_utf8(body[..inner_sep].to_vec())?;
        if !inner_head.eq_ignore_ascii_case(expected_head) {
            return Err(Error::HeadMismatch {
                expected: expected_head.to_string(),
                found: inner_head,
            });
        }

        let remainder = &body[inner_sep + 1..];
        let mut parts = remainder.splitn(field_count + 2, |&b| b == FIELD_SEP);
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let part = parts.next().ok_or(Error::EnvelopeTooShort)?;
            fields.push(String::from_utf8(part.to_vec())?);
        }
        let content_type_and_content = parts.next().ok_or(Error::EnvelopeTooShort)?;

        let ct_sep = content_type_and_content
            .iter()
            .position(|&b| b == FIELD_SEP)
            .ok_or(Error::EnvelopeTooShort)?;
        let content_type_raw = String::from_utf8(content_type_and_content[..ct_sep].to_vec())?;
        let content_type = if content_type_raw.is_empty() {
            None
        } else {
            Some(content_type_raw)
        };
        let content_bytes = content_type_and_content[ct_sep + 1..].to_vec();

        Ok((fields, content_type, content_bytes))
    }

    pub fn encode_request(&self, request: &RestRequest) -> Frame {
        self.encode(
            REQUEST_HEAD,
            vec![
                request.method.clone(),
                request.url.clone(),
                headers_to_field(&request.headers),
            ],
            &request.content_type,
            &request.content,
        )
    }

    pub fn encode_answer(&self, response: &RestResponse) -> Frame {
        self.encode(
            ANSWER_HEAD,
            vec![response.status.to_string(), headers_to_field(&response.headers)],
            &response.content_type,
            &response.content,
        )
    }

    fn decode_request(&self, frame: &Frame) -> Result<RestRequest, Error> {
        let (fields, content_type, content_bytes) = self.decode(frame, REQUEST_HEAD, 3)?;
        Ok(RestRequest {
            head: REQUEST_HEAD.to_string(),
            method: fields[0].clone(),
            url: fields[1].clone(),
            headers: field_to_headers(&fields[2]),
            content: bytes_to_content(&content_type, content_bytes),
            content_type,
        })
    }

    pub fn frame_to_response(&self, frame: &Frame) -> Result<RestResponse, Error> {
        let (fields, content_type, content_bytes) = self.decode(frame, ANSWER_HEAD, 2)?;
        let status: u16 = fields[0].parse().map_err(|_| Error::EnvelopeTooShort)?;
        Ok(RestResponse {
            head: ANSWER_HEAD.to_string(),
            status,
            headers: field_to_headers(&fields[1]),
            content: bytes_to_content(&content_type, content_bytes),
            content_type,
        })
    }
}

/// Carries the REST envelope's `headers` map as a single `\x01`-delimited
/// field, the way the JSON envelope carries it as a nested object (spec
/// §4.2/§4.3's "ordered fields" include `headers`, which the binary layout
/// otherwise has no room for between method/url and content_type).
fn headers_to_field(headers: &HashMap<String, String>) -> String {
    serde_json::to_string(headers).unwrap_or_default()
}

fn field_to_headers(field: &str) -> HashMap<String, String> {
    serde_json::from_str(field).unwrap_or_default()
}

fn content_bytes(content: &Content) -> Vec<u8> {
    match content {
        Content::Empty => Vec::new(),
        Content::Json(value) => value.to_string().into_bytes(),
        Content::Text(text) => text.clone().into_bytes(),
        Content::Binary(bytes) => bytes.clone(),
    }
}

fn bytes_to_content(content_type: &Option<String>, bytes: Vec<u8>) -> Content {
    if bytes.is_empty() {
        return Content::Empty;
    }
    match content_type.as_deref() {
        Some(ct) if ct.eq_ignore_ascii_case("application/json") => {
            serde_json::from_slice(&bytes).map(Content::Json).unwrap_or(Content::Binary(bytes))
        }
        Some(ct) if ct.to_ascii_lowercase().starts_with("text/") => {
            String::from_utf8(bytes).map(Content::Text).unwrap_or_else(|e| Content::Binary(e.into_bytes()))
        }
        _ => match String::from_utf8(bytes.clone()) {
            Ok(text) => Content::Text(text),
            Err(_) => Content::Binary(bytes),
        },
    }
}

impl Protocol for BinaryProtocol {
    fn name(&self) -> &str {
        "synopsebinary"
    }

    fn process_frame(&mut self, _ctx: &ProcessContext, frame: Frame) -> Result<Option<Frame>, Error> {
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

impl RestEnvelope for BinaryProtocol {
    fn encode_request(&self, request: &RestRequest) -> Frame {
        BinaryProtocol::encode_request(self, request)
    }

    fn frame_to_response(&self, frame: &Frame) -> Result<RestResponse, Error> {
        BinaryProtocol::frame_to_response(self, frame)
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

    fn request(content_type: Option<&str>, content: Content) -> RestRequest {
        let mut headers = HashMap::new();
        headers.insert("x-trace-id".to_string(), "abc123".to_string());
        RestRequest {
            head: "request".into(),
            method: "POST".into(),
            url: "/y".into(),
            headers,
            content_type: content_type.map(str::to_string),
            content,
        }
    }

    #[test]
    fn pkcs7_round_trips() {
        for len in [0usize, 1, 15, 16, 17, 31, 32] {
            let data = vec![0x42u8; len];
            let padded = pkcs7_pad(&data, AES_BLOCK);
            assert_eq!(padded.len() % AES_BLOCK, 0);
            assert_eq!(pkcs7_unpad(&padded).unwrap(), data);
        }
    }

    #[test]
    fn round_trip_plain() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), false);
        let req = request(Some("application/json"), Content::Json(serde_json::json!({"ok": true})));
        let frame = proto.encode_request(&req);
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, req.content);
        assert_eq!(decoded.headers, req.headers);
    }

    #[test]
    fn round_trip_compressed_only() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), true);
        let req = request(Some("text/plain"), Content::Text("hello there".into()));
        let frame = proto.encode_request(&req);
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, req.content);
    }

    #[test]
    fn round_trip_compressed_and_encrypted() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), true).with_encryption("supersecretkey!!", "initvector12345");
        let req = request(
            Some("application/json"),
            Content::Json(serde_json::json!({"answer": 42})),
        );
        let frame = proto.encode_request(&req);
        // Ciphertext must not resemble the plaintext envelope it carries.
        let needle = b"application/json";
        assert!(!frame.payload.windows(needle.len()).any(|w| w == needle));
        let decoded = proto.decode_request(&frame).unwrap();
        assert_eq!(decoded.content, req.content);
        assert_eq!(decoded.headers, req.headers);
    }

    #[test]
    fn round_trip_answer_carries_headers() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), false);
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "42".to_string());
        let resp = RestResponse {
            head: "answer".into(),
            status: 200,
            headers,
            content_type: Some("application/json".into()),
            content: Content::Json(serde_json::json!({"ok": true})),
        };
        let frame = proto.encode_answer(&resp);
        let decoded = proto.frame_to_response(&frame).unwrap();
        assert_eq!(decoded.headers, resp.headers);
        assert_eq!(decoded.content, resp.content);
    }

    #[test]
    fn encryption_disabled_when_key_too_short() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), false).with_encryption("short", "alsoshort");
        assert!(proto.cipher.is_none());
    }

    #[test]
    fn rejects_mismatched_head() {
        let proto = BinaryProtocol::new(Arc::new(EchoHandler), false);
        let resp = RestResponse::status_only("answer", 200);
        let frame = proto.encode_answer(&resp);
        let err = proto.decode_request(&frame).unwrap_err();
        assert!(matches!(err, Error::HeadMismatch { .. }));
    }
}
