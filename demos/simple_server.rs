//! The simplest possible server: accepts upgrades on `synopsebinary` and,
//! on its own idle loop, pushes a callback request to every connected
//! client every few seconds.
//!
//! Grounded on the ancestor crate's `examples/simple_server.rs` main loop
//! (accept in the background, then just sleep in a loop); here the sleep
//! loop is put to work driving the callback dispatcher instead of sitting
//! idle, since this engine's whole point is a server that can talk first.

use log::*;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use wsrest_engine::{
    ProtocolRegistry, RestHandler, RestRequest, RestResponse, Server, ServerConfig, TcpIo, UpgradeRequest,
};

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

fn read_upgrade_request(stream: &TcpStream) -> std::io::Result<UpgradeRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let method = request_line.split_whitespace().next().unwrap_or_default().to_string();
    let mut req = UpgradeRequest {
        method,
        ..Default::default()
    };
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "connection" => req.connection = Some(value),
                "upgrade" => req.upgrade = Some(value),
                "sec-websocket-version" => req.sec_websocket_version = Some(value),
                "sec-websocket-protocol" => req.sec_websocket_protocol = Some(value),
                "sec-websocket-key" => req.sec_websocket_key = Some(value),
                _ => {}
            }
        }
    }
    Ok(req)
}

fn main() {
    env_logger::init();

    let port: u16 = 8080;
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).expect("can't listen");
    info!("server started on address {addr}");

    let mut registry = ProtocolRegistry::new();
    registry
        .add(Box::new(wsrest_engine::protocol::binary::BinaryProtocol::new(
            Arc::new(EchoHandler),
            true,
        )))
        .expect("registering synopsebinary");

    let server = Server::new(ServerConfig::new(port), registry);

    {
        let server = server.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let server = server.clone();
                std::thread::spawn(move || {
                    let Ok(upgrade_req) = read_upgrade_request(&stream) else {
                        return;
                    };
                    let Ok(io) = stream.try_clone().map(TcpIo::new) else {
                        return;
                    };
                    match server.upgrade(&upgrade_req, io) {
                        Ok(response) => {
                            let mut stream = stream;
                            let _ = stream.write_all(response.as_bytes());
                        }
                        Err(err) => error!("handshake rejected: {err}"),
                    }
                });
            }
        });
    }

    // Doing some work here: the connection index (spec §5) is keyed by id
    // and meant for lookup, not enumeration, so a real caller would keep
    // its own id list as connections are accepted and drive `callback()`
    // against those ids directly; this loop just reports liveness.
    loop {
        std::thread::sleep(Duration::from_secs(3));
        info!("{} connection(s) live", server.connection_count());
    }
}
