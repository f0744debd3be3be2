use std::time::Duration;

/// The hard cap on a single frame's reported payload length (128 MiB), per
/// spec §3 invariants. A header claiming more is a fatal protocol
/// violation, rejected before any payload bytes are read.
pub const MAX_FRAME_PAYLOAD: u64 = 1 << 28;

/// How long the reader loop idles between `process_one` iterations that
/// found nothing to do (spec §4.5 server loop).
pub const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Back-off applied after a `process_one` iteration that errored.
pub const ERROR_SLEEP: Duration = Duration::from_millis(10);

/// The reader loop's own acquire budget per iteration (spec §4.5).
pub const READER_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(5);

/// Per-read budget used while waiting for the next frame header.
pub const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// How long the connection may go without an inbound frame before the
/// server loop emits a keepalive ping (spec §4.1 / §4.5).
pub const PING_IDLE_INTERVAL: Duration = Duration::from_millis(5000);

/// Per-server configuration (spec §6 configuration table).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening TCP port. Owned by the host HTTP server; carried here only
    /// so a binary using this engine has one place to read it from.
    pub port: u16,

    /// When non-empty, enables AES-CFB-256 on the binary subprotocol.
    pub encryption_key: String,

    /// When non-empty, used as the IV material alongside `encryption_key`.
    pub encryption_iv: String,

    /// Registers the `synopsejson` subprotocol on the registry built from
    /// this config.
    pub enable_json: bool,

    /// Registers the `synopsebinary` subprotocol on the registry built
    /// from this config.
    pub enable_binary: bool,

    /// Maximum wait for an outbound callback to seize the connection's
    /// wire (spec §4.6 step 3). Default 5000 ms.
    pub callback_acquire_timeout: Duration,

    /// Maximum wait for the client's reply frame to a callback request
    /// (spec §4.6 step 6). Default 1000 ms.
    pub callback_answer_timeout: Duration,

    /// SynLZ-equivalent compression toggle for the binary subprotocol
    /// (spec §4.3, §6). Default true.
    pub compressed: bool,

    /// Frame codec limits, generalizing the ancestor's `WebSocketConfig`.
    pub max_frame_size: usize,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 0,
            encryption_key: String::new(),
            encryption_iv: String::new(),
            enable_json: false,
            enable_binary: true,
            callback_acquire_timeout: Duration::from_millis(5000),
            callback_answer_timeout: Duration::from_millis(1000),
            compressed: true,
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        ServerConfig {
            port,
            ..Default::default()
        }
    }

    pub fn with_encryption(mut self, key: impl Into<String>, iv: impl Into<String>) -> Self {
        self.encryption_key = key.into();
        self.encryption_iv = iv.into();
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.enable_json = enabled;
        self
    }

    pub fn with_binary(mut self, enabled: bool) -> Self {
        self.enable_binary = enabled;
        self
    }

    pub fn with_callback_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.callback_acquire_timeout = timeout;
        self
    }

    pub fn with_callback_answer_timeout(mut self, timeout: Duration) -> Self {
        self.callback_answer_timeout = timeout;
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }
}
