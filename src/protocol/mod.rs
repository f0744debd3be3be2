//! The three pluggable application subprotocols (spec §3/§4.4) dispatched
//! from `Connection::process_one`.

pub mod binary;
pub mod chat;
pub mod json;

use crate::error::Error;
use crate::frame::Frame;
use crate::rest::{RestRequest, RestResponse};
use uuid::Uuid;

/// Per-invocation context handed to `Protocol::process_frame`. Carries
/// only what every variant might need; the REST handler itself is bound
/// into the JSON/Binary protocol instances at construction rather than
/// threaded through here; the host server and connection index are
/// out-of-scope collaborators (spec §1).
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub connection_id: Uuid,
}

/// A callback invoked once per inbound frame on a `Chat`-protocol
/// connection (spec §0.5 supplemented feature; mirrors §3's "fires a
/// user callback on each inbound frame").
pub type OnFrameCallback = std::sync::Arc<dyn Fn(Uuid, &Frame) + Send + Sync>;

/// The capability every subprotocol exposes to the connection state
/// machine (spec §3, §9 "small capability trait").
pub trait Protocol: Send {
    /// The token negotiated in `Sec-WebSocket-Protocol`.
    fn name(&self) -> &str;

    /// Handle one inbound application frame, producing an answer frame
    /// to send back iff one is warranted (spec §4.5 "delegate to
    /// protocol.process_frame; send answer iff returned").
    fn process_frame(&mut self, ctx: &ProcessContext, frame: Frame) -> Result<Option<Frame>, Error>;

    /// Produces a fresh, independently-owned instance for a newly
    /// upgraded connection (spec §3 `clone() -> Protocol`).
    fn clone_box(&self) -> Box<dyn Protocol>;

    /// `Some` iff this protocol also carries the REST request/answer
    /// envelope the callback dispatcher needs (spec §4.6 step 2, "require
    /// fWebSocketProtocol implements the REST envelope"). `Chat` leaves
    /// this at the default `None`; `JsonProtocol`/`BinaryProtocol` override
    /// it to expose themselves.
    fn as_rest_envelope(&self) -> Option<&dyn RestEnvelope> {
        None
    }
}

/// The symmetric pair used on the callback (server→client) path: encode a
/// `RestRequest` as an outbound frame under `head = "request"`, and decode
/// the client's reply frame back into a `RestResponse` (spec §4.4 "For
/// callbacks... the symmetric pair `input_to_frame` / `frame_to_output` is
/// used").
pub trait RestEnvelope {
    fn encode_request(&self, request: &RestRequest) -> Frame;
    fn frame_to_response(&self, frame: &Frame) -> Result<RestResponse, Error>;
}
