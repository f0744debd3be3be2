use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Every fallible outcome in the engine, grouped along the taxonomy the
/// connection loop and callback dispatcher switch on.
#[derive(Error, Debug)]
pub enum Error {
    // ---- Transport -------------------------------------------------
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("socket read timed out")]
    Timeout,

    // ---- Frame codec / protocol violations --------------------------
    #[error("unsupported MASK bit set on inbound frame")]
    MaskedFrameRejected,

    #[error("invalid opcode: `{0:#x}`")]
    InvalidOpcode(u8),

    #[error("control frames must not be fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("frame payload length `{0}` exceeds the 128 MiB cap")]
    PayloadTooLarge(u64),

    #[error("continuation frame with no fragmented message in progress")]
    InvalidContinuationFrame,

    #[error("a fragmented message is already in progress")]
    FragmentedMessageInProgress,

    #[error("continuation frame opcode does not match the first fragment")]
    FragmentOpcodeMismatch,

    #[error("frame payload is not valid UTF-8: {source}")]
    InvalidUtf8 {
        #[from]
        source: FromUtf8Error,
    },

    // ---- Envelope decode failures ------------------------------------
    #[error("envelope frame has the wrong opcode for this subprotocol")]
    WrongFrameOpcode,

    #[error("envelope payload too short to contain a valid head")]
    EnvelopeTooShort,

    #[error("envelope head `{found}` does not match expected `{expected}`")]
    HeadMismatch { expected: String, found: String },

    #[error("malformed JSON envelope: {source}")]
    JsonMalformed {
        #[from]
        source: serde_json::Error,
    },

    #[error("decompressed binary envelope shorter than 4 bytes")]
    DecompressedTooShort,

    #[error("binary envelope decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("binary envelope decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    // ---- Handshake ----------------------------------------------------
    #[error("missing or invalid Connection: Upgrade header")]
    NoConnectionUpgradeHeader,

    #[error("missing or invalid Upgrade: websocket header")]
    NoUpgradeWebsocketHeader,

    #[error("Sec-WebSocket-Version must be >= 13")]
    UnsupportedVersion,

    #[error("Sec-WebSocket-Protocol header missing or empty")]
    NoSubprotocolOffered,

    #[error("Sec-WebSocket-Key missing")]
    NoSecWebSocketKey,

    #[error("Sec-WebSocket-Key does not decode to 16 bytes")]
    InvalidSecWebSocketKey,

    #[error("none of the offered subprotocols are registered")]
    NoMatchingSubprotocol,

    // ---- Connection / callback dispatch -------------------------------
    #[error("timed out acquiring the connection's wire lock")]
    AcquireTimeout,

    #[error("no connection registered under that identity")]
    UnknownConnection,

    #[error("connection's protocol does not implement the REST envelope")]
    UnsupportedProtocolForCallback,

    #[error("connection closed while awaiting a callback answer")]
    ConnectionClosedDuringCallback,

    // ---- Registry -------------------------------------------------------
    #[error("a protocol named `{0}` is already registered")]
    DuplicateProtocolName(String),
}

impl Error {
    /// Mirrors the HTTP status the callback dispatcher reports to its caller
    /// (spec §4.6 / §7): both "unknown connection" and "unsupported
    /// protocol" collapse to 404, same as an acquire timeout.
    pub fn as_callback_status(&self) -> u16 {
        match self {
            Error::UnknownConnection
            | Error::UnsupportedProtocolForCallback
            | Error::AcquireTimeout => 404,
            _ => 500,
        }
    }

    /// True for errors that must tear down the connection (§7
    /// ProtocolViolation / TransportFailure), as opposed to ones the
    /// server loop merely logs and backs off from (§7 DecodeFailure).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::MaskedFrameRejected
                | Error::ControlFrameFragmented
                | Error::ControlFramePayloadTooLarge
                | Error::PayloadTooLarge(_)
                | Error::InvalidContinuationFrame
                | Error::FragmentedMessageInProgress
                | Error::FragmentOpcodeMismatch
                | Error::InvalidOpcode(_)
        )
    }
}
