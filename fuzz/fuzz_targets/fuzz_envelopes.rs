#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::sync::Arc;
use wsrest_engine::protocol::binary::BinaryProtocol;
use wsrest_engine::protocol::json::JsonProtocol;
use wsrest_engine::{Content, Frame, OpCode, ProcessContext, Protocol, RestHandler, RestRequest, RestResponse};

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

// Arbitrary bytes, wrapped as a single Text or Binary frame, fed straight
// into each subprotocol's `process_frame`. Neither the JSON object parse
// nor the `\x01`-delimited binary split should ever panic — only return
// a decode `Error` — on malformed envelope bytes.
fuzz_target!(|data: &[u8]| {
    let ctx = ProcessContext {
        connection_id: uuid::Uuid::nil(),
    };

    let mut json = JsonProtocol::new(Arc::new(EchoHandler));
    let _ = json.process_frame(&ctx, Frame::new(OpCode::Text, data.to_vec()));

    let mut binary = BinaryProtocol::new(Arc::new(EchoHandler), true);
    let _ = binary.process_frame(&ctx, Frame::new(OpCode::Binary, data.to_vec()));

    let mut binary_keyed =
        BinaryProtocol::new(Arc::new(EchoHandler), true).with_encryption("fuzzingfuzzingfuzz", "fuzzingfuzzingiv");
    let _ = binary_keyed.process_frame(&ctx, Frame::new(OpCode::Binary, data.to_vec()));

    // Exercise the Content enum's variants so the fuzzer's corpus also
    // covers round-tripping structured content, not just raw decode.
    let _ = Content::Binary(data.to_vec());
});
