//! Minimal echo server: accepts upgrades on the `synopsejson` subprotocol
//! and hands every inbound request straight back as its own answer.
//!
//! Grounded on the ancestor crate's `examples/echo_server.rs` accept loop
//! (`TcpListener::accept` in a loop, one task per connection), reshaped
//! from tokio's `accept_async`/`next()` onto this engine's blocking
//! upgrade-then-spawn model.

use log::*;
use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use wsrest_engine::{
    ProtocolRegistry, RestHandler, RestRequest, RestResponse, Server, ServerConfig, TcpIo, UpgradeRequest,
};

struct EchoHandler;

impl RestHandler for EchoHandler {
    fn handle(&self, request: &RestRequest) -> RestResponse {
        RestResponse {
            head: "answer".into(),
            status: 200,
            headers: request.headers.clone(),
            content_type: request.content_type.clone(),
            content: request.content.clone(),
        }
    }
}

/// Reads and parses just enough of an HTTP/1.1 request to build an
/// `UpgradeRequest`. The host HTTP server normally owns this; here it
/// stands in for that collaborator so the example is runnable on its own.
fn read_upgrade_request(stream: &TcpStream) -> std::io::Result<UpgradeRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let method = request_line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let mut req = UpgradeRequest {
        method,
        ..Default::default()
    };

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" || line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "connection" => req.connection = Some(value),
            "upgrade" => req.upgrade = Some(value),
            "sec-websocket-version" => req.sec_websocket_version = Some(value),
            "sec-websocket-protocol" => req.sec_websocket_protocol = Some(value),
            "sec-websocket-key" => req.sec_websocket_key = Some(value),
            _ => {}
        }
        if line == "\r\n" {
            break;
        }
    }
    Ok(req)
}

fn handle_connection(server: Arc<Server<TcpIo>>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let upgrade_req = match read_upgrade_request(&stream) {
        Ok(req) => req,
        Err(e) => {
            error!("failed to read upgrade request: {e}");
            return;
        }
    };

    let io = TcpIo::new(stream.try_clone().expect("tcp stream clone"));
    match server.upgrade(&upgrade_req, io) {
        Ok(response) => {
            use std::io::Write;
            let mut stream = stream;
            if let Err(e) = stream.write_all(response.as_bytes()) {
                error!("failed to write upgrade response: {e}");
                return;
            }
            info!("peer {:?} upgraded", peer);
        }
        Err(err) => error!("handshake rejected for {:?}: {err}", peer),
    }
}

fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(addr).expect("can't listen");
    info!("listening on: {addr}");

    let mut registry = ProtocolRegistry::new();
    registry
        .add(Box::new(wsrest_engine::protocol::json::JsonProtocol::new(Arc::new(
            EchoHandler,
        ))))
        .expect("registering synopsejson");

    let server = Server::new(ServerConfig::new(9002), registry);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let server = server.clone();
                std::thread::spawn(move || handle_connection(server, stream));
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
}
