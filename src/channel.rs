//! Channel Module
//!
//! The AT channel engine: one physical link, one command in flight.
//!
//! ## Responsibilities
//! - Run a dedicated read loop that frames and classifies every line
//! - Correlate intermediate and final lines with the single active command
//! - Upload a command's payload when the device prompts for it
//! - Route everything else to the unsolicited event sink
//!
//! ## Concurrency Model: One In Flight
//!
//! - **Callers** (`send*`): serialized by `send_lock` for the whole
//!   request, so a second caller queues until the first completes or times out
//! - **Active slot**: `Mutex<Option<ActiveCommand>>`, installed by the caller,
//!   filled and finalized by the read loop, abandoned by the caller on timeout
//! - **Completion**: a fresh bounded(1) channel per request; the read loop
//!   sends exactly once, while still holding the slot lock
//! - **Reader**: `Mutex<LineReader>`, locked by the read loop once per poll so
//!   raw reads can take over the transport between polls

use std::io::Write;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ChannelConfig;
use crate::error::{AtError, Result};
use crate::events::{EventPublisher, EventSink, UnsolicitedEvent};
use crate::protocol::{
    accepts_intermediate, final_kind, is_prompt, is_two_line_unsolicited, Classification, Command,
    FinalKind, Response, Status,
};
use crate::stats::{ChannelStats, Counters};
use crate::transport::{CancelToken, LineReader, LineWriter, ReadOutcome, ReadPort, TcpPort};

/// Where the channel is in a command's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// No command active
    Idle = 0,

    /// A command is active and intermediate lines are being collected
    Awaiting = 1,

    /// A final line or timeout is being handed back to the caller
    Completing = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Awaiting,
            2 => ChannelState::Completing,
            _ => ChannelState::Idle,
        }
    }
}

/// The command currently owning the channel
struct ActiveCommand {
    id: u64,
    command: Command,

    /// Payload still to upload; taken on the first prompt
    payload: Option<Bytes>,

    response: Response,
    reply: Sender<Response>,
}

/// State shared between callers and the read loop
struct Shared {
    reader: Mutex<LineReader>,
    writer: Mutex<LineWriter>,
    slot: Mutex<Option<ActiveCommand>>,
    state: AtomicU8,

    /// Read loop is alive
    running: AtomicBool,

    /// Stream ended or channel disposed; never cleared
    closed: AtomicBool,

    trace: AtomicBool,
    default_timeout_ms: AtomicU64,
    counters: Arc<Counters>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn trace_line(&self, direction: &'static str, line: &str) {
        if self.trace.load(Ordering::Relaxed) {
            tracing::debug!(direction, line, "AT traffic");
        } else {
            tracing::trace!(direction, line, "AT traffic");
        }
    }

    /// Remove the active command if it is still request `id`
    fn abandon(&self, id: u64) -> Option<ActiveCommand> {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|active| active.id) != Some(id) {
            return None;
        }
        self.set_state(ChannelState::Completing);
        let active = slot.take();
        self.set_state(ChannelState::Idle);
        active
    }

    /// Complete the active command, if any, with a CLOSED response
    fn fail_active(&self) {
        let mut slot = self.slot.lock();
        if let Some(active) = slot.take() {
            self.set_state(ChannelState::Completing);
            tracing::debug!(command = active.command.text(), "Failing command on channel close");
            let _ = active.reply.send(Response::closed(active.response.lines));
            self.set_state(ChannelState::Idle);
        }
    }
}

/// A half-duplex AT command channel
pub struct AtChannel {
    config: ChannelConfig,
    shared: Arc<Shared>,
    events: EventSink,

    /// Serializes callers: at most one command in flight
    send_lock: Mutex<()>,

    cancel: CancelToken,
    read_loop: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl AtChannel {
    /// Build a channel over a transport
    ///
    /// The read loop is not running until [`start`](Self::start).
    pub fn open<R, W>(reader: R, writer: W, config: ChannelConfig) -> Result<Self>
    where
        R: ReadPort,
        W: Write + Send + 'static,
    {
        config.validate()?;

        let counters = Arc::new(Counters::default());
        let events = EventSink::spawn(
            config.event_queue_capacity,
            config.subscriber_capacity,
            Arc::clone(&counters),
        )?;

        let boxed_reader: Box<dyn ReadPort> = Box::new(reader);
        let boxed_writer: Box<dyn Write + Send> = Box::new(writer);

        let shared = Arc::new(Shared {
            reader: Mutex::new(LineReader::new(boxed_reader)),
            writer: Mutex::new(LineWriter::new(boxed_writer)),
            slot: Mutex::new(None),
            state: AtomicU8::new(ChannelState::Idle as u8),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            trace: AtomicBool::new(config.trace),
            default_timeout_ms: AtomicU64::new(config.default_timeout_ms),
            counters,
        });

        Ok(Self {
            config,
            shared,
            events,
            send_lock: Mutex::new(()),
            cancel: CancelToken::new(),
            read_loop: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Connect to a serial-over-TCP bridge and build a channel on it
    pub fn connect_tcp<A: ToSocketAddrs>(addr: A, config: ChannelConfig) -> Result<Self> {
        let (reader, writer) = TcpPort::connect(addr, config.poll_interval())?;
        Self::open(reader, writer, config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the read loop
    pub fn start(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AtError::ChannelClosed);
        }

        let mut handle = self.read_loop.lock();
        if handle.is_some() {
            return Err(AtError::AlreadyStarted);
        }

        if self.config.clear_on_start {
            self.clear()?;
        }

        self.cancel.reset();
        self.shared.running.store(true, Ordering::SeqCst);

        let read_loop = ReadLoop {
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.clone(),
            events: self.events.publisher()?,
        };

        let spawned = thread::Builder::new()
            .name("at-reader".to_string())
            .spawn(move || read_loop.run());

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                tracing::debug!("Channel started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(AtError::Io(e))
            }
        }
    }

    /// Cancel the read loop and wait for it to exit
    ///
    /// A caller still waiting on a command receives a CLOSED response.
    /// The channel may be started again afterwards.
    pub fn stop(&self) {
        self.cancel.cancel();

        if let Some(handle) = self.read_loop.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Read loop panicked");
            }
            tracing::debug!("Channel stopped");
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.fail_active();
    }

    /// Stop the channel for good and release the dispatcher
    pub fn close(mut self) {
        self.teardown();
    }

    /// Best-effort discard of buffered input; returns the bytes dropped
    pub fn clear(&self) -> Result<usize> {
        self.shared.reader.lock().clear()
    }

    /// Whether the read loop is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether the channel was closed (disposed or end of stream)
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send a command and wait for its final response or timeout
    ///
    /// Protocol failures, timeouts and a channel closing mid-command come back
    /// as a [`Response`] status. `Err` means the channel is not usable or the
    /// command could not be written.
    ///
    /// A timeout does not resynchronize the transport: late lines of the
    /// timed-out command may be attributed to the next command.
    pub fn send(&self, command: Command) -> Result<Response> {
        self.ensure_running()?;
        let _turn = self.send_lock.lock();
        self.ensure_running()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = command.timeout();
        let classification = command.classification();
        let text = command.text().to_string();
        let (reply, completion) = channel::bounded(1);

        {
            let mut slot = self.shared.slot.lock();
            *slot = Some(ActiveCommand {
                id,
                payload: command.payload().cloned(),
                command,
                response: Response::pending(),
                reply,
            });
            self.shared.set_state(ChannelState::Awaiting);
        }

        // The read loop may have exited before seeing our slot
        if !self.is_running() {
            self.shared.abandon(id);
            return Ok(Response::closed(Vec::new()));
        }

        Counters::bump(&self.shared.counters.commands_sent);
        self.shared.trace_line("tx", &text);

        if let Err(e) = self.shared.writer.lock().write_command(&text) {
            tracing::warn!(command = %text, "Failed to write command: {}", e);
            self.shared.abandon(id);
            return Err(e);
        }

        let mut response = self.await_completion(id, &text, &completion, timeout);
        if classification.requires_intermediate() {
            response = response.require_intermediate();
        }

        let counters = &self.shared.counters;
        match response.status() {
            Status::Ok => Counters::bump(&counters.commands_succeeded),
            Status::Timeout => Counters::bump(&counters.commands_timed_out),
            Status::Error | Status::Closed => Counters::bump(&counters.commands_failed),
        }

        Ok(response)
    }

    /// Send a command whose result is one line starting with `prefix`
    ///
    /// A success without that line is reported as `Status::Error`.
    pub fn send_expect_single_line(&self, text: &str, prefix: &str) -> Result<Response> {
        let command = Command::new(text, Classification::SingleLine, self.default_timeout())
            .with_prefix(prefix);
        self.send(command)
    }

    /// Send a command whose result is any number of lines
    ///
    /// With a prefix only matching lines are collected; without one every
    /// line before the final response is.
    pub fn send_expect_multi_line(&self, text: &str, prefix: Option<&str>) -> Result<Response> {
        let command = match prefix {
            Some(prefix) => Command::new(text, Classification::MultiLine, self.default_timeout())
                .with_prefix(prefix),
            None => Command::new(text, Classification::MultiLineNoPrefix, self.default_timeout()),
        };
        self.send(command)
    }

    /// Send a command whose result is one line starting with a digit
    pub fn send_expect_numeric(&self, text: &str) -> Result<Response> {
        self.send(Command::new(text, Classification::Numeric, self.default_timeout()))
    }

    /// Send a command, upload `payload` at the prompt, and expect one line
    /// starting with `prefix` (e.g. `AT+CMGS=<len>` / `+CMGS:`)
    pub fn send_with_payload(
        &self,
        text: &str,
        payload: impl Into<Bytes>,
        prefix: &str,
    ) -> Result<Response> {
        let command = Command::new(text, Classification::SingleLine, self.default_timeout())
            .with_prefix(prefix)
            .with_payload(payload);
        self.send(command)
    }

    /// Write bytes with no framing and no response expected
    pub fn send_raw_no_ack(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(AtError::ChannelClosed);
        }
        self.shared.writer.lock().write_raw(bytes)
    }

    // =========================================================================
    // Ad hoc reads
    // =========================================================================

    /// Read exactly `count` bytes, bypassing line framing
    ///
    /// Holds the transport for the whole read, pausing the read loop; used
    /// for data-mode transfers after a `CONNECT`. Fails with `Timeout` after
    /// the default timeout.
    pub fn read_raw_bytes(&self, count: usize) -> Result<Bytes> {
        if self.is_closed() {
            return Err(AtError::ChannelClosed);
        }
        let deadline = deadline_after(self.default_timeout());
        self.shared.reader.lock().read_exact_bytes(count, deadline)
    }

    /// Read one line outside the command machinery
    ///
    /// Holds the transport until a line arrives or `timeout` elapses, so the
    /// read loop does not see that line.
    pub fn read_line(&self, timeout: Duration) -> Result<String> {
        if self.is_closed() {
            return Err(AtError::ChannelClosed);
        }

        let deadline = deadline_after(timeout);
        let cancel = CancelToken::new();
        let mut reader = self.shared.reader.lock();

        loop {
            match reader.poll_line(&cancel)? {
                ReadOutcome::Line(raw) => {
                    let line = decode_line(&raw)?;
                    self.shared.trace_line("rx", &line);
                    return Ok(line);
                }
                ReadOutcome::Pending => {
                    if deadline.map_or(false, |d| Instant::now() >= d) {
                        return Err(AtError::Timeout);
                    }
                }
                ReadOutcome::Eof => return Err(AtError::ChannelClosed),
                ReadOutcome::Cancelled => return Err(AtError::Cancelled),
            }
        }
    }

    // =========================================================================
    // Unsolicited events
    // =========================================================================

    /// Receive unsolicited events on a bounded channel
    pub fn subscribe(&self) -> Receiver<UnsolicitedEvent> {
        self.events.subscribe()
    }

    /// Run `callback` on the dispatcher thread for every unsolicited event
    pub fn on_unsolicited<F>(&self, callback: F)
    where
        F: Fn(&UnsolicitedEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback);
    }

    // =========================================================================
    // Settings and accessors
    // =========================================================================

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.shared.default_timeout_ms.load(Ordering::Relaxed))
    }

    /// Set the default timeout; values beyond `u64::MAX` milliseconds saturate
    pub fn set_default_timeout(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.shared.default_timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Toggle debug-level line tracing
    pub fn set_trace(&self, enabled: bool) {
        self.shared.trace.store(enabled, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_running(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AtError::ChannelClosed);
        }
        if !self.is_running() {
            return Err(AtError::NotStarted);
        }
        Ok(())
    }

    fn await_completion(
        &self,
        id: u64,
        text: &str,
        completion: &Receiver<Response>,
        timeout: Duration,
    ) -> Response {
        match completion.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => match self.shared.abandon(id) {
                Some(active) => {
                    tracing::warn!(command = %text, ?timeout, "Command timed out");
                    Response::timeout(active.response.lines)
                }
                // Finalized between our deadline and the abandon; the reply
                // was sent under the slot lock, so it is already queued
                None => completion
                    .try_recv()
                    .unwrap_or_else(|_| Response::closed(Vec::new())),
            },
            Err(RecvTimeoutError::Disconnected) => Response::closed(Vec::new()),
        }
    }

    fn teardown(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.stop();
        self.events.shutdown();
    }
}

impl Drop for AtChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Deadline `timeout` from now; `None` when it lies beyond what `Instant` can hold
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Decode a framed line as UTF-8 text
fn decode_line(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| AtError::MalformedLine(String::from_utf8_lossy(raw).into_owned()))
}

// =============================================================================
// Read Loop
// =============================================================================

/// State owned by the read loop thread
struct ReadLoop {
    shared: Arc<Shared>,
    cancel: CancelToken,
    events: EventPublisher,
}

impl ReadLoop {
    fn run(self) {
        tracing::debug!("Read loop started");

        while !self.cancel.is_cancelled() {
            let outcome = self.shared.reader.lock().poll_line(&self.cancel);

            match outcome {
                Ok(ReadOutcome::Line(raw)) => self.handle_line(raw),
                Ok(ReadOutcome::Pending) => {}
                Ok(ReadOutcome::Cancelled) => break,
                Ok(ReadOutcome::Eof) => {
                    tracing::info!("Transport closed, read loop exiting");
                    self.shared.closed.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Transport read failed, read loop exiting: {}", e);
                    self.shared.closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.fail_active();
        tracing::debug!("Read loop stopped");
    }

    /// Classify one line and route it
    fn handle_line(&self, raw: Bytes) {
        if is_prompt(&raw) && self.upload_pending_payload() {
            return;
        }

        let line = match decode_line(&raw) {
            Ok(line) => line,
            Err(e) => {
                Counters::bump(&self.shared.counters.malformed_lines);
                tracing::warn!("Skipping line: {}", e);
                return;
            }
        };

        if line.is_empty() {
            return;
        }
        self.shared.trace_line("rx", &line);

        if let Some(kind) = final_kind(&line) {
            self.finalize(kind, line);
            return;
        }

        if is_two_line_unsolicited(&line) {
            self.dispatch_pair(line);
            return;
        }

        let unclaimed = {
            let mut slot = self.shared.slot.lock();
            match slot.as_mut() {
                Some(active)
                    if accepts_intermediate(&active.command, active.response.lines.len(), &line) =>
                {
                    active.response.lines.push(line);
                    None
                }
                _ => Some(line),
            }
        };

        if let Some(line) = unclaimed {
            self.events.publish(UnsolicitedEvent::Line(line));
        }
    }

    /// Write the active command's payload; false if there was none to write
    fn upload_pending_payload(&self) -> bool {
        let payload = match self.shared.slot.lock().as_mut() {
            Some(active) => active.payload.take(),
            None => None,
        };

        let Some(payload) = payload else {
            return false;
        };

        tracing::debug!(bytes = payload.len(), "Prompt received, uploading payload");
        if let Err(e) = self.shared.writer.lock().write_payload_and_terminator(&payload) {
            tracing::error!("Failed to upload payload: {}", e);
        }
        true
    }

    /// Complete the active command with a final line
    fn finalize(&self, kind: FinalKind, line: String) {
        let mut slot = self.shared.slot.lock();
        let Some(mut active) = slot.take() else {
            tracing::debug!(line = %line, "Final response with no active command");
            return;
        };

        self.shared.set_state(ChannelState::Completing);
        active.response.status = match kind {
            FinalKind::Success => Status::Ok,
            FinalKind::Error => Status::Error,
        };
        active.response.final_line = line;

        // Sent under the slot lock so a timing-out caller finds it queued
        if active.reply.send(active.response).is_err() {
            tracing::debug!(command = active.command.text(), "Caller gone before completion");
        }
        self.shared.set_state(ChannelState::Idle);
    }

    /// Read the payload line of a two-line notification and publish both
    fn dispatch_pair(&self, header: String) {
        loop {
            let outcome = self.shared.reader.lock().poll_line(&self.cancel);
            match outcome {
                Ok(ReadOutcome::Line(raw)) => {
                    let payload = match decode_line(&raw) {
                        Ok(payload) => payload,
                        Err(e) => {
                            Counters::bump(&self.shared.counters.malformed_lines);
                            tracing::warn!("Lossy notification payload: {}", e);
                            String::from_utf8_lossy(&raw).into_owned()
                        }
                    };
                    self.shared.trace_line("rx", &payload);
                    self.events.publish(UnsolicitedEvent::Pair { header, payload });
                    return;
                }
                Ok(ReadOutcome::Pending) => {}
                Ok(ReadOutcome::Eof) | Ok(ReadOutcome::Cancelled) | Err(_) => {
                    tracing::debug!(header = %header, "Notification payload line never arrived");
                    self.events.publish(UnsolicitedEvent::Line(header));
                    return;
                }
            }
        }
    }
}
