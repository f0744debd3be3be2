//! A server wired up with a custom configuration: AES-CFB-256 enabled on
//! `synopsebinary`, and a `chat`-protocol connection whose inbound frames
//! are logged through a user callback instead of answered.
//!
//! Grounded on the ancestor crate's `examples/custom_server.rs`
//! (`Server::new(port)` behind a hand-rolled config), generalized to this
//! engine's `ServerConfig` builder and multi-protocol registry.

use log::*;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wsrest_engine::protocol::binary::BinaryProtocol;
use wsrest_engine::protocol::chat::ChatProtocol;
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

    let config = ServerConfig::new(9001)
        .with_encryption("a-shared-secret-key", "a-shared-iv-value")
        .with_compressed(true)
        .with_callback_acquire_timeout(Duration::from_millis(2000))
        .with_callback_answer_timeout(Duration::from_millis(500));

    let mut registry = ProtocolRegistry::new();
    registry
        .add(Box::new(BinaryProtocol::new(Arc::new(EchoHandler), config.compressed).with_encryption(
            &config.encryption_key,
            &config.encryption_iv,
        )))
        .expect("registering synopsebinary");

    let chat_frames_seen: Arc<Mutex<u64>> = Arc::new(Mutex::new(0));
    let counter = chat_frames_seen.clone();
    registry
        .add(Box::new(ChatProtocol::new("chat").with_callback(Arc::new(move |id, frame| {
            let mut count = counter.lock().expect("chat counter poisoned");
            *count += 1;
            debug!("chat frame #{count} from {id}: {} bytes", frame.payload.len());
        }))))
        .expect("registering chat");

    let server: Arc<Server<TcpIo>> = Server::new(config, registry);

    let addr = format!("127.0.0.1:{}", server.config().port);
    let listener = TcpListener::bind(&addr).expect("can't listen");
    info!("listening on: {addr}");

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

    loop {
        std::thread::sleep(Duration::from_secs(5));
        info!(
            "{} connection(s) live, {} chat frame(s) observed",
            server.connection_count(),
            *chat_frames_seen.lock().expect("chat counter poisoned")
        );
    }
}
