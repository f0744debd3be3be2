//! Per-upgraded-connection state: the selected protocol, the liveness
//! timer, frame/byte counters, and the acquire lock that serializes wire
//! access between the reader loop and outbound callbacks (spec §3
//! "Connection", §4.5, §5).
//!
//! Grounded on the ancestor crate's `connection.rs` (`WSConnection`
//! owning the split socket halves and fragment-reassembly state), but
//! reshaped for the blocking, lock-guarded access pattern this spec's
//! bidirectional dispatch requires: the ancestor never needed a
//! try-acquire primitive because nothing outside its own reader task ever
//! touched the socket.

use crate::config::{ERROR_SLEEP, IDLE_SLEEP, PING_IDLE_INTERVAL, READER_ACQUIRE_TIMEOUT};
use crate::error::Error;
use crate::frame::{Frame, FrameCodec, FrameReadOutcome, OpCode};
use crate::protocol::{ProcessContext, Protocol};
use crate::socket::WebSocketIo;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle states a connection passes through (spec §4.5). `PreUpgrade`
/// and `Upgrading` are owned by the upgrade handler; the server loop only
/// ever observes `Open`, `Closing`, and `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    PreUpgrade,
    Upgrading,
    Open,
    Closing,
    Closed,
}

/// What one `process_one` iteration accomplished, matching the four
/// branches the server loop switches on (spec §4.5).
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Nothing happened: the wire couldn't be acquired in time, or no
    /// frame arrived before the read deadline.
    Idle,
    /// A frame was read and handled (answered, echoed, or ignored).
    Done,
    /// `process_one` raised internally; the error is reported but does
    /// not propagate past this call (spec §4.5 "sets result to Error
    /// without propagating").
    Error(Error),
    /// A `ConnectionClose` frame was received and echoed; the caller
    /// should stop driving this connection.
    Closed,
}

/// Point-in-time counters exposed for observability (spec §0.5
/// supplemented feature, ambient instrumentation rather than a protocol
/// feature).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// The wire plus the protocol instance it feeds, held together behind
/// the single mutex that implements the spec's acquire lock: whoever
/// holds this guard has exclusive read/write rights to the socket (spec
/// §3 invariant, §5 "each connection's wire").
struct ConnectionInner<IO> {
    codec: FrameCodec<IO>,
    protocol: Box<dyn Protocol>,
}

/// An RAII guard produced by [`Connection::try_acquire`]. Dropping it
/// both releases the wire and decrements `try_acquire_count`, so a
/// connection's destructor can observe every outstanding attempt
/// finishing (spec §5, §9 "per-connection destruction race").
pub struct AcquireGuard<'a, IO> {
    inner: MutexGuard<'a, ConnectionInner<IO>>,
    try_acquire_count: &'a AtomicUsize,
}

impl<'a, IO> Drop for AcquireGuard<'a, IO> {
    fn drop(&mut self) {
        self.try_acquire_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How often the acquire spin-loop polls `try_lock` while waiting for the
/// deadline. `std::sync::Mutex` has no timed-lock primitive, so the
/// timeout budgets in spec §4.5/§4.6 (5 ms / 5000 ms / 1000 ms) are
/// implemented as a short poll loop rather than a native blocking wait.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Connection<IO> {
    id: Uuid,
    inner: Mutex<ConnectionInner<IO>>,
    try_acquire_count: AtomicUsize,
    state: Mutex<ConnectionState>,
    last_ping_tick: Mutex<Instant>,
    terminated: AtomicBool,
    /// Cached at construction so the callback dispatcher's "does this
    /// protocol carry the REST envelope" check (spec §4.6 step 2) never
    /// needs to take the wire lock just to inspect the protocol.
    supports_rest_envelope: bool,
    protocol_name: String,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl<IO: WebSocketIo> Connection<IO> {
    pub fn new(id: Uuid, io: IO, protocol: Box<dyn Protocol>) -> Self {
        let supports_rest_envelope = protocol.as_rest_envelope().is_some();
        let protocol_name = protocol.name().to_string();
        Connection {
            id,
            inner: Mutex::new(ConnectionInner {
                codec: FrameCodec::new(io),
                protocol,
            }),
            try_acquire_count: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::Open),
            last_ping_tick: Mutex::new(Instant::now()),
            terminated: AtomicBool::new(false),
            supports_rest_envelope,
            protocol_name,
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    pub fn supports_rest_envelope(&self) -> bool {
        self.supports_rest_envelope
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state mutex poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connection state mutex poisoned") = state;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Requests that the server loop exit at its next iteration (spec §5
    /// "each thread checks a `terminated` flag... when either is set,
    /// loops exit at the next iteration").
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Attempts to seize the wire within `timeout`, spin-polling
    /// `try_lock` at `ACQUIRE_POLL_INTERVAL` granularity. Increments
    /// `try_acquire_count` for the full duration of the attempt,
    /// including a failed one, so a concurrent destructor can tell an
    /// acquirer is still "in flight" even though it never got the lock
    /// (spec §5, §9).
    pub fn try_acquire(&self, timeout: Duration) -> Option<AcquireGuard<'_, IO>> {
        self.try_acquire_count.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(guard) = self.inner.try_lock() {
                return Some(AcquireGuard {
                    inner: guard,
                    try_acquire_count: &self.try_acquire_count,
                });
            }
            if Instant::now() >= deadline {
                self.try_acquire_count.fetch_sub(1, Ordering::SeqCst);
                return None;
            }
            std::thread::sleep(ACQUIRE_POLL_INTERVAL);
        }
    }

    /// Spins until every in-flight `try_acquire` attempt (successful or
    /// not) has concluded. Call this before a connection is dropped, so
    /// the mutex it owns never disappears out from under a caller thread
    /// that is still walking into it (spec §9 "the lock outlives its last
    /// attempted acquisition").
    pub fn wait_for_drain(&self) {
        while self.try_acquire_count.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(ACQUIRE_POLL_INTERVAL);
        }
    }

    fn touch_last_ping(&self) {
        *self
            .last_ping_tick
            .lock()
            .expect("last_ping_tick mutex poisoned") = Instant::now();
    }

    fn ping_due(&self) -> bool {
        let last = *self
            .last_ping_tick
            .lock()
            .expect("last_ping_tick mutex poisoned");
        last.elapsed() > PING_IDLE_INTERVAL
    }

    /// Updates the liveness timer from outside `process_one` — used by
    /// the callback dispatcher after a successful round trip (spec §3
    /// invariant "updated... after every successful callback round
    /// trip").
    pub fn mark_alive(&self) {
        self.touch_last_ping();
    }

    /// Acquires the wire with the reader loop's short budget and runs one
    /// `process_one` iteration (spec §4.5). Returns `Idle` immediately if
    /// the lock isn't free within `READER_ACQUIRE_TIMEOUT`.
    pub fn process_one(&self) -> ProcessOutcome {
        match self.try_acquire(READER_ACQUIRE_TIMEOUT) {
            Some(mut guard) => self.process_one_with_guard(&mut guard),
            None => ProcessOutcome::Idle,
        }
    }

    /// The core of `process_one`, parameterized over an already-held
    /// guard so the callback dispatcher can drain pending inbound frames
    /// without releasing and re-acquiring the lock between each one
    /// (spec §4.6 step 4 "drain").
    pub fn process_one_with_guard(&self, guard: &mut AcquireGuard<'_, IO>) -> ProcessOutcome {
        match self.process_one_inner(guard) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!(target: "wsrest_engine::connection", "connection {} errored: {e}", self.id);
                ProcessOutcome::Error(e)
            }
        }
    }

    fn process_one_inner(&self, guard: &mut AcquireGuard<'_, IO>) -> Result<ProcessOutcome, Error> {
        let read = guard.inner.codec.get_frame(crate::config::FRAME_READ_TIMEOUT)?;
        let frame = match read {
            FrameReadOutcome::NoData => {
                if self.ping_due() {
                    log::trace!(target: "wsrest_engine::connection", "connection {} idle, sending keepalive ping", self.id);
                    self.send_locked(guard, &Frame::ping(Vec::new()))?;
                }
                return Ok(ProcessOutcome::Idle);
            }
            FrameReadOutcome::Frame(frame) => frame,
        };

        self.touch_last_ping();
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);

        match frame.opcode.clone() {
            OpCode::Ping => {
                self.send_locked(guard, &Frame::pong(frame.payload))?;
                Ok(ProcessOutcome::Done)
            }
            OpCode::Text | OpCode::Binary => {
                let ctx = ProcessContext { connection_id: self.id };
                let answer = guard.inner.protocol.process_frame(&ctx, frame)?;
                if let Some(answer) = answer {
                    self.send_locked(guard, &answer)?;
                }
                Ok(ProcessOutcome::Done)
            }
            OpCode::ConnectionClose => {
                self.send_locked(guard, &Frame::close(frame.payload))?;
                self.set_state(ConnectionState::Closing);
                Ok(ProcessOutcome::Closed)
            }
            OpCode::Pong | OpCode::Continuation | OpCode::Reserved(_) => Ok(ProcessOutcome::Done),
        }
    }

    fn send_locked(&self, guard: &mut AcquireGuard<'_, IO>, frame: &Frame) -> Result<(), Error> {
        guard.inner.codec.send_frame(frame)?;
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Reads the next raw frame off an already-acquired wire, bypassing
    /// protocol dispatch entirely — the callback dispatcher's own
    /// receive step (spec §4.6 step 6), which wants the literal answer
    /// frame rather than whatever `process_one` would do with it.
    pub fn recv_raw(&self, guard: &mut AcquireGuard<'_, IO>, timeout: Duration) -> Result<Frame, Error> {
        match guard.inner.codec.get_frame(timeout)? {
            FrameReadOutcome::Frame(frame) => {
                self.frames_in.fetch_add(1, Ordering::Relaxed);
                self.bytes_in
                    .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
                Ok(frame)
            }
            FrameReadOutcome::NoData => Err(Error::Timeout),
        }
    }

    /// Reaches into the held protocol to produce the envelope for an
    /// outbound callback request, without releasing the wire (spec §4.6
    /// step 5).
    pub fn with_rest_envelope<R>(
        &self,
        guard: &AcquireGuard<'_, IO>,
        f: impl FnOnce(&dyn crate::protocol::RestEnvelope) -> R,
    ) -> Option<R> {
        guard.inner.protocol.as_rest_envelope().map(f)
    }

    pub fn send_raw(&self, guard: &mut AcquireGuard<'_, IO>, frame: &Frame) -> Result<(), Error> {
        self.send_locked(guard, frame)
    }
}

/// Drives `process_one` until the connection closes or is terminated
/// (spec §4.5 "Server loop"). Intended to run on the connection's own
/// reader thread; one invocation per upgraded connection.
pub fn run_server_loop<IO: WebSocketIo>(connection: &Connection<IO>) {
    loop {
        if connection.is_terminated() {
            break;
        }
        match connection.process_one() {
            ProcessOutcome::Idle => std::thread::sleep(IDLE_SLEEP),
            ProcessOutcome::Done => std::thread::yield_now(),
            ProcessOutcome::Error(_) => std::thread::sleep(ERROR_SLEEP),
            ProcessOutcome::Closed => {
                connection.terminate();
                break;
            }
        }
    }
    connection.set_state(ConnectionState::Closed);
    log::debug!(target: "wsrest_engine::connection", "connection {} server loop exited", connection.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chat::ChatProtocol;
    use crate::socket::MemoryIo;
    use std::sync::Arc;
    use std::thread;

    fn encode_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(((fin as u8) << 7) | opcode);
        let len = payload.len();
        if len <= 125 {
            out.push(len as u8);
        } else {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    fn connection_with(bytes: Vec<u8>) -> Connection<MemoryIo> {
        let io = MemoryIo::new(bytes);
        Connection::new(Uuid::new_v4(), io, Box::new(ChatProtocol::new("chat")))
    }

    #[test]
    fn idle_when_no_data_available() {
        let conn = connection_with(Vec::new());
        assert!(matches!(conn.process_one(), ProcessOutcome::Idle));
        assert_eq!(conn.stats().frames_in, 0);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let bytes = encode_frame(true, 0x9, b"hi");
        let conn = connection_with(bytes);
        assert!(matches!(conn.process_one(), ProcessOutcome::Done));
        assert_eq!(conn.stats().frames_out, 1);
    }

    #[test]
    fn close_is_echoed_and_state_becomes_closing() {
        let bytes = encode_frame(true, 0x8, b"bye");
        let conn = connection_with(bytes);
        assert!(matches!(conn.process_one(), ProcessOutcome::Closed));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn try_acquire_count_drains_after_concurrent_attempts() {
        let conn = Arc::new(connection_with(Vec::new()));
        let holder = conn.try_acquire(Duration::from_millis(50)).unwrap();

        let conn2 = conn.clone();
        let handle = thread::spawn(move || {
            assert!(conn2.try_acquire(Duration::from_millis(20)).is_none());
        });
        handle.join().unwrap();
        drop(holder);
        conn.wait_for_drain();
    }

    #[test]
    fn supports_rest_envelope_is_false_for_chat() {
        let conn = connection_with(Vec::new());
        assert!(!conn.supports_rest_envelope());
    }
}
