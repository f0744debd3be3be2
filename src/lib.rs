//! A bidirectional, thread-per-connection WebSocket engine carrying a
//! REST-shaped request/response protocol over a JSON or binary
//! subprotocol, in both directions, on the same socket.
//!
//! This crate covers the core described in the spec this repository
//! implements: RFC 6455 framing over a blocking byte stream, the two
//! pluggable envelope encodings (`synopsejson`, `synopsebinary`), the
//! per-connection state machine and liveness timer, the acquire/release
//! lock an outbound callback uses to seize the wire, and the protocol
//! registry consulted at handshake time. The surrounding HTTP/1.1
//! server, its socket I/O primitives, and the abstract REST request type
//! are host collaborators outside this crate's scope — see
//! [`socket::WebSocketIo`] and [`rest::RestHandler`] for the seams this
//! crate expects its host to fill in.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod rest;
pub mod server;
pub mod socket;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState, ConnectionStats, ProcessOutcome};
pub use error::Error;
pub use frame::{Frame, OpCode};
pub use handshake::{UpgradeRequest, UpgradeResponse};
pub use protocol::{OnFrameCallback, ProcessContext, Protocol, RestEnvelope};
pub use registry::ProtocolRegistry;
pub use rest::{Content, RestHandler, RestRequest, RestResponse};
pub use server::Server;
pub use socket::{MemoryIo, TcpIo, WebSocketIo};
