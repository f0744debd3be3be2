//! Ties the protocol registry, the connection index, and the callback
//! dispatcher together behind one shared `Server` handle (spec §4.6,
//! §4.8, §5 "the server's connection index").
//!
//! Grounded on the ancestor crate's `server.rs` (`start_server_with_config`
//! spawning one task per accepted connection and handing events back
//! through a channel), reshaped from its event-stream model to this
//! spec's synchronous upgrade-then-register-then-loop model, since the
//! spec's callback dispatcher needs to reach into a *specific* live
//! connection from an arbitrary caller thread rather than just observe a
//! stream of inbound events.

use crate::config::ServerConfig;
use crate::connection::{run_server_loop, Connection, ProcessOutcome};
use crate::error::Error;
use crate::handshake::{validate_upgrade, UpgradeRequest};
use crate::registry::ProtocolRegistry;
use crate::rest::{RestRequest, RestResponse};
use crate::socket::WebSocketIo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The host-visible surface of this engine: a protocol registry, a live
/// connection index, and the operations that drive both (spec §1's
/// "CORE" minus the HTTP server itself, which owns a `Server<IO>`
/// instance as a collaborator).
pub struct Server<IO> {
    config: ServerConfig,
    registry: Mutex<ProtocolRegistry>,
    connections: Mutex<HashMap<Uuid, Arc<Connection<IO>>>>,
}

impl<IO: WebSocketIo + 'static> Server<IO> {
    pub fn new(config: ServerConfig, registry: ProtocolRegistry) -> Arc<Self> {
        Arc::new(Server {
            config,
            registry: Mutex::new(registry),
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently registered; ambient observability
    /// (spec §0.5), not a protocol operation.
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .len()
    }

    pub fn connection(&self, id: Uuid) -> Option<Arc<Connection<IO>>> {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .get(&id)
            .cloned()
    }

    /// Upgrade Handler (spec §4.8): validates the HTTP upgrade request,
    /// negotiates and clones the chosen subprotocol, registers a new
    /// connection under a fresh UUID, and spawns its reader loop thread.
    /// On success returns the raw HTTP response header block the host
    /// server should write back to the socket before handing it fully
    /// over to this engine; on any validation failure the caller is
    /// expected to fall through to ordinary HTTP handling (spec §4.8,
    /// this function never touches `io` until validation has passed).
    pub fn upgrade(self: &Arc<Self>, req: &UpgradeRequest, io: IO) -> Result<String, Error>
    where
        IO: Send + 'static,
    {
        let (response, protocol) = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            let response = validate_upgrade(req, &registry)?;
            let protocol = registry
                .clone_by_name(&response.chosen_protocol)
                .expect("validate_upgrade only returns names the registry actually holds");
            (response, protocol)
        };

        let id = Uuid::new_v4();
        let connection = Arc::new(Connection::new(id, io, protocol));
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .insert(id, connection.clone());
        log::info!(target: "wsrest_engine::server", "connection {id} upgraded to `{}`", response.chosen_protocol);

        let server = self.clone();
        std::thread::spawn(move || {
            run_server_loop(connection.as_ref());
            connection.wait_for_drain();
            server
                .connections
                .lock()
                .expect("connections mutex poisoned")
                .remove(&connection.id());
            log::debug!(target: "wsrest_engine::server", "connection {} unregistered", connection.id());
        });

        Ok(response.to_http_response())
    }

    /// Callback Dispatcher (spec §4.6): from any thread, seize a specific
    /// connection's wire, drain whatever inbound requests are already
    /// pending, inject an outbound request, and wait for the answer.
    /// Never panics on a routine failure; every documented failure mode
    /// comes back as an `Error` whose `as_callback_status()` matches the
    /// HTTP status spec §4.6/§7 call for (404 for unknown/unsupported/
    /// timed-out).
    pub fn callback(&self, connection_id: Uuid, request: &RestRequest) -> Result<RestResponse, Error> {
        let connection = self
            .connections
            .lock()
            .expect("connections mutex poisoned")
            .get(&connection_id)
            .cloned()
            .ok_or(Error::UnknownConnection)?;

        if !connection.supports_rest_envelope() {
            return Err(Error::UnsupportedProtocolForCallback);
        }

        let mut guard = connection
            .try_acquire(self.config.callback_acquire_timeout)
            .ok_or(Error::AcquireTimeout)?;

        // Drain-before-inject (spec §4.6 step 4 / glossary): every
        // already-pending inbound request is answered before this
        // callback's own request ever reaches the wire, so a client
        // never observes its request reordered behind a callback that
        // started later.
        loop {
            match connection.process_one_with_guard(&mut guard) {
                ProcessOutcome::Idle => break,
                ProcessOutcome::Done => continue,
                ProcessOutcome::Error(e) => return Err(e),
                ProcessOutcome::Closed => {
                    connection.terminate();
                    return Err(Error::ConnectionClosedDuringCallback);
                }
            }
        }

        let outbound = connection
            .with_rest_envelope(&guard, |envelope| envelope.encode_request(request))
            .expect("supports_rest_envelope() was already checked above");
        connection.send_raw(&mut guard, &outbound)?;
        log::debug!(target: "wsrest_engine::server", "callback on {connection_id} sent, awaiting answer");

        let answer_frame = connection.recv_raw(&mut guard, self.config.callback_answer_timeout)?;
        let response = connection
            .with_rest_envelope(&guard, |envelope| envelope.frame_to_response(&answer_frame))
            .expect("supports_rest_envelope() was already checked above")?;
        connection.mark_alive();
        drop(guard);

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, OpCode};
    use crate::protocol::chat::ChatProtocol;
    use crate::protocol::json::JsonProtocol;
    use crate::rest::{Content, RestHandler};
    use crate::socket::{MemoryIo, WebSocketIo};
    use std::collections::HashMap as StdHashMap;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    struct EchoHandler;
    impl RestHandler for EchoHandler {
        fn handle(&self, request: &RestRequest) -> RestResponse {
            RestResponse {
                head: "answer".into(),
                status: 200,
                headers: StdHashMap::new(),
                content_type: request.content_type.clone(),
                content: request.content.clone(),
            }
        }
    }

    fn base_upgrade_request() -> UpgradeRequest {
        UpgradeRequest {
            method: "GET".into(),
            connection: Some("Upgrade".into()),
            upgrade: Some("websocket".into()),
            sec_websocket_version: Some("13".into()),
            sec_websocket_protocol: Some("synopsejson".into()),
            sec_websocket_key: Some("dGhlIHNhbXBsZSBub25jZQ==".into()),
        }
    }

    #[test]
    fn callback_to_unknown_connection_is_404_equivalent() {
        let mut registry = ProtocolRegistry::new();
        registry.add(Box::new(ChatProtocol::new("chat"))).unwrap();
        let server: Arc<Server<MemoryIo>> = Server::new(ServerConfig::default(), registry);

        let req = RestRequest {
            head: "request".into(),
            method: "GET".into(),
            url: "/x".into(),
            headers: StdHashMap::new(),
            content_type: None,
            content: Content::Empty,
        };
        let err = server.callback(Uuid::new_v4(), &req).unwrap_err();
        assert_eq!(err.as_callback_status(), 404);
        assert!(matches!(err, Error::UnknownConnection));
    }

    #[test]
    fn callback_on_chat_connection_is_unsupported() {
        let mut registry = ProtocolRegistry::new();
        registry.add(Box::new(ChatProtocol::new("chat"))).unwrap();
        let server: Arc<Server<MemoryIo>> = Server::new(ServerConfig::default(), registry);

        let io = MemoryIo::new(Vec::new());
        let connection = Arc::new(Connection::new(Uuid::new_v4(), io, Box::new(ChatProtocol::new("chat"))));
        let id = connection.id();
        server.connections.lock().unwrap().insert(id, connection);

        let req = RestRequest {
            head: "request".into(),
            method: "GET".into(),
            url: "/x".into(),
            headers: StdHashMap::new(),
            content_type: None,
            content: Content::Empty,
        };
        let err = server.callback(id, &req).unwrap_err();
        assert_eq!(err.as_callback_status(), 404);
        assert!(matches!(err, Error::UnsupportedProtocolForCallback));
    }

    #[test]
    fn upgrade_registers_connection_and_returns_accept_header() {
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(JsonProtocol::new(Arc::new(EchoHandler))))
            .unwrap();
        let server: Arc<Server<MemoryIo>> = Server::new(ServerConfig::default(), registry);

        let io = MemoryIo::new(Vec::new());
        let response = server.upgrade(&base_upgrade_request(), io).unwrap();
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("Sec-WebSocket-Protocol: synopsejson"));

        // Give the spawned reader loop a moment to register, then confirm
        // it shows up in the connection index.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(server.connection_count(), 1);
    }

    /// End-to-end over a real loopback socket: a pending inbound request
    /// must be drained and answered before a concurrently-issued callback
    /// injects its own request, and the callback must observe the
    /// client's reply to *its* request rather than anything else on the
    /// wire (spec §4.6 drain-before-inject, testable property "ordering
    /// under contention").
    #[test]
    fn callback_drains_pending_inbound_before_injecting() {
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(JsonProtocol::new(Arc::new(EchoHandler))))
            .unwrap();
        let server: Arc<Server<crate::socket::TcpIo>> = Server::new(ServerConfig::default(), registry);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let io = crate::socket::TcpIo::new(accepted);
        server.upgrade(&base_upgrade_request(), io).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let id = *server.connections.lock().unwrap().keys().next().unwrap();

        let proto = JsonProtocol::new(Arc::new(EchoHandler));
        let inbound_request = RestRequest {
            head: "request".into(),
            method: "GET".into(),
            url: "/inbound".into(),
            headers: StdHashMap::new(),
            content_type: None,
            content: Content::Empty,
        };
        let inbound_frame = proto.encode_request(&inbound_request);
        write_frame(&client, &inbound_frame);
        std::thread::sleep(Duration::from_millis(50));

        let callback_request = RestRequest {
            head: "request".into(),
            method: "PUSH".into(),
            url: "/callback".into(),
            headers: StdHashMap::new(),
            content_type: None,
            content: Content::Empty,
        };

        let client_for_reply = client.try_clone().unwrap();
        let reply_thread = std::thread::spawn(move || {
            // Read the client's own inbound request's answer first...
            let echoed = read_frame(&client_for_reply);
            assert_eq!(echoed.opcode, OpCode::Text);
            // ...then the callback's injected request, which this
            // "client" answers with a fixed status.
            let callback_req_frame = read_frame(&client_for_reply);
            assert_eq!(callback_req_frame.opcode, OpCode::Text);
            let answer = RestResponse::status_only("answer", 201);
            let proto = JsonProtocol::new(Arc::new(EchoHandler));
            write_frame(&client_for_reply, &proto.encode_answer(&answer));
        });

        let response = server.callback(id, &callback_request).unwrap();
        assert_eq!(response.status, 201);
        reply_thread.join().unwrap();
    }

    fn write_frame(stream: &TcpStream, frame: &Frame) {
        let mut io = crate::socket::TcpIo::new(stream.try_clone().unwrap());
        io.write_buffered(&encode_raw(frame)).unwrap();
        io.flush().unwrap();
    }

    fn read_frame(stream: &TcpStream) -> Frame {
        let mut codec = crate::frame::FrameCodec::new(crate::socket::TcpIo::new(stream.try_clone().unwrap()));
        match codec.get_frame(Duration::from_secs(2)).unwrap() {
            crate::frame::FrameReadOutcome::Frame(f) => f,
            crate::frame::FrameReadOutcome::NoData => panic!("expected a frame"),
        }
    }

    fn encode_raw(frame: &Frame) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(0b1000_0000 | frame.opcode.as_u8());
        let len = frame.payload.len();
        if len <= 125 {
            out.push(len as u8);
        } else if len <= 65535 {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&frame.payload);
        out
    }
}
