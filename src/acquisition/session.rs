//! Acquisition sessions.
//!
//! [`start`] validates the request, moves the transport, sink and observer
//! onto a dedicated worker thread and returns a [`SessionHandle`]. The worker
//! runs the handshake, then reads frames until a stop is requested or a fatal
//! error occurs:
//!
//! 1. check the stop flag (the only state shared with the caller);
//! 2. read up to 4 bytes, blocking for at most the read timeout;
//! 3. an empty read is a quiet cycle, nothing is emitted;
//! 4. decode; a bad frame is logged and skipped;
//! 5. timestamp, append to the sink, notify the observer.
//!
//! Transport and sink failures end the session in `Faulted`. In every case
//! the sink is finalized and the transport is handed back through the
//! [`SessionReport`]; closing it is the caller's decision.
//!
//! # Example
//!
//! ```
//! use fluoro_acq::acquisition::{start, AcquisitionConfig, LoopState};
//! use fluoro_acq::data::{MemorySink, NullObserver};
//! use fluoro_acq::protocol::GatingPeriod;
//! use fluoro_acq::transport::{MockRead, MockSerialChannel};
//!
//! let transport = MockSerialChannel::new()
//!     .with_reads([MockRead::ack(), MockRead::frame([1, 2, 5, 5])]);
//! let sink = MemorySink::new();
//! let samples = sink.view();
//!
//! let handle = start(transport, sink, NullObserver, AcquisitionConfig::new(GatingPeriod::Ms250))?;
//! while handle.stats().samples_emitted < 1 {
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! let report = handle.stop()?;
//!
//! assert_eq!(report.state, LoopState::Stopped);
//! assert_eq!(samples.samples()[0].value, 205500.0);
//! # Ok::<(), fluoro_acq::error::AcquisitionError>(())
//! ```

use super::state::{FaultKind, FaultReason, LoopState, SessionStats, SessionStatus, StopFlag};
use crate::data::{Sample, SampleObserver, SampleSink};
use crate::error::{
    AcquisitionError, AcquisitionResult, ConfigError, HandshakeStep, SinkError, TransportError,
};
use crate::protocol::{
    decode_frame, encode_clear, encode_high_voltage_enable, encode_set_gating, GatingPeriod,
    FRAME_LEN,
};
use crate::transport::SerialChannel;
use chrono::{DateTime, Utc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn};

/// Length of the acknowledgment the detector sends after `D\r` and `P<code>\r`.
const ACK_LEN: usize = 2;

/// Validated settings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Detector gating period.
    pub gating_period: GatingPeriod,
    /// Switch the photomultiplier high voltage on before acquiring.
    pub high_voltage: bool,
    /// Upper bound on every blocking read, and therefore on stop latency.
    pub read_timeout: Duration,
    /// Read and throw away one frame right after `C\r`.
    pub discard_after_clear: bool,
}

impl AcquisitionConfig {
    /// Defaults: high voltage off, 1 s read timeout, no discard.
    pub fn new(gating_period: GatingPeriod) -> Self {
        Self {
            gating_period,
            high_voltage: false,
            read_timeout: Duration::from_secs(1),
            discard_after_clear: false,
        }
    }

    /// Enable or disable the high-voltage command.
    pub fn with_high_voltage(mut self, enabled: bool) -> Self {
        self.high_voltage = enabled;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Discard the first frame after the clear command.
    pub fn with_discard_after_clear(mut self, discard: bool) -> Self {
        self.discard_after_clear = discard;
        self
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "read timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// What a finished session hands back.
#[derive(Debug)]
pub struct SessionReport<C> {
    /// The transport, still open unless the device disconnected.
    pub transport: C,
    /// Terminal state (`Stopped` or `Faulted`).
    pub state: LoopState,
    /// Final counters.
    pub stats: SessionStats,
}

impl<C> SessionReport<C> {
    /// Fault reason, if the session faulted.
    pub fn fault(&self) -> Option<&FaultReason> {
        self.state.fault()
    }
}

/// Start acquiring on a dedicated worker thread.
///
/// Returns as soon as the worker is spawned; follow progress with
/// [`SessionHandle::state`] or [`SessionHandle::subscribe`].
///
/// # Errors
/// - [`AcquisitionError::NotConnected`] if the transport is not open.
/// - [`AcquisitionError::Config`] if `config` is invalid.
/// - [`AcquisitionError::WorkerSpawn`] if the OS refuses a new thread.
pub fn start<C, S, O>(
    transport: C,
    sink: S,
    observer: O,
    config: AcquisitionConfig,
) -> AcquisitionResult<SessionHandle<C>>
where
    C: SerialChannel + 'static,
    S: SampleSink + 'static,
    O: SampleObserver + 'static,
{
    if !transport.is_open() {
        return Err(AcquisitionError::NotConnected);
    }
    config.validate()?;

    let stop = StopFlag::new();
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());

    let worker = Worker {
        transport,
        sink,
        observer,
        config,
        stop: stop.clone(),
        status: status_tx,
        stats: SessionStats::default(),
        clock: SampleClock::new(),
    };

    let join = std::thread::Builder::new()
        .name(format!("fluoro-acq-{}", config.gating_period))
        .spawn(move || worker.run())
        .map_err(AcquisitionError::WorkerSpawn)?;

    info!(
        period = %config.gating_period,
        high_voltage = config.high_voltage,
        "Acquisition started"
    );

    Ok(SessionHandle {
        stop,
        status: status_rx,
        worker: Some(join),
    })
}

/// Caller-side handle of a running session.
///
/// Dropping the handle requests a stop but does not wait for it.
pub struct SessionHandle<C> {
    stop: StopFlag,
    status: watch::Receiver<SessionStatus>,
    worker: Option<JoinHandle<SessionReport<C>>>,
}

impl<C> SessionHandle<C> {
    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.status.borrow().state.clone()
    }

    /// Counters so far.
    pub fn stats(&self) -> SessionStats {
        self.status.borrow().stats
    }

    /// State and counters in one snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every state change and every cycle.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Ask the worker to stop without waiting.
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request a stop and wait for the worker.
    ///
    /// Blocks for at most about one read timeout plus the time needed to
    /// finalize the sink.
    pub fn stop(mut self) -> AcquisitionResult<SessionReport<C>> {
        self.stop.request();
        self.join()
    }

    /// Wait for the worker to finish on its own (after a fault, for example).
    pub fn wait(mut self) -> AcquisitionResult<SessionReport<C>> {
        self.join()
    }

    fn join(&mut self) -> AcquisitionResult<SessionReport<C>> {
        let worker = self.worker.take().ok_or(AcquisitionError::WorkerPanicked)?;
        worker.join().map_err(|_| AcquisitionError::WorkerPanicked)
    }
}

impl<C: Send + 'static> SessionHandle<C> {
    /// [`SessionHandle::stop`] without blocking the async runtime.
    pub async fn stop_async(self) -> AcquisitionResult<SessionReport<C>> {
        tokio::task::spawn_blocking(move || self.stop())
            .await
            .map_err(|_| AcquisitionError::WorkerPanicked)?
    }

    /// [`SessionHandle::wait`] without blocking the async runtime.
    pub async fn wait_async(self) -> AcquisitionResult<SessionReport<C>> {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .map_err(|_| AcquisitionError::WorkerPanicked)?
    }
}

impl<C> Drop for SessionHandle<C> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop.request();
        }
    }
}

/// Wall-clock timestamps derived from a monotonic clock.
///
/// Anchored once per session so that timestamps never go backwards when
/// the system clock is adjusted, and are strictly increasing.
struct SampleClock {
    wall: DateTime<Utc>,
    mono: Instant,
    last: Option<DateTime<Utc>>,
}

impl SampleClock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
            last: None,
        }
    }

    fn now(&mut self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.mono.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        let mut stamp = self.wall + elapsed;
        if let Some(last) = self.last {
            if stamp <= last {
                stamp = last + chrono::Duration::nanoseconds(1);
            }
        }
        self.last = Some(stamp);
        stamp
    }
}

/// Handshake step that failed and the transport error behind it.
type HandshakeFailure = (HandshakeStep, TransportError);

enum Fault {
    Transport(TransportError),
    Sink(SinkError),
}

impl Fault {
    fn reason(&self) -> FaultReason {
        match self {
            Fault::Transport(err) => FaultReason::new(FaultKind::TransportError, err),
            Fault::Sink(err) => FaultReason::new(FaultKind::SinkError, err),
        }
    }
}

struct Worker<C, S, O> {
    transport: C,
    sink: S,
    observer: O,
    config: AcquisitionConfig,
    stop: StopFlag,
    status: watch::Sender<SessionStatus>,
    stats: SessionStats,
    clock: SampleClock,
}

impl<C, S, O> Worker<C, S, O>
where
    C: SerialChannel,
    S: SampleSink,
    O: SampleObserver,
{
    fn run(mut self) -> SessionReport<C> {
        let span = info_span!("acquisition", period = %self.config.gating_period);
        let _enter = span.enter();

        self.set_state(LoopState::Handshaking);
        let state = match self.handshake() {
            Err((step, source)) => {
                let err = AcquisitionError::HandshakeFailed { step, source };
                error!(error = %err, "Detector handshake failed");
                self.finalize_after_fault();
                LoopState::Faulted(FaultReason::new(FaultKind::HandshakeFailed, &err))
            }
            Ok(()) => {
                self.set_state(LoopState::Running);
                match self.run_loop() {
                    Ok(()) => {
                        self.set_state(LoopState::Stopping);
                        match self.sink.finalize() {
                            Ok(()) => LoopState::Stopped,
                            Err(err) => {
                                error!(error = %err, "Failed to finalize sample sink");
                                LoopState::Faulted(FaultReason::new(FaultKind::SinkError, &err))
                            }
                        }
                    }
                    Err(fault) => {
                        let reason = fault.reason();
                        error!(reason = %reason, "Acquisition faulted");
                        self.finalize_after_fault();
                        LoopState::Faulted(reason)
                    }
                }
            }
        };

        info!(
            state = %state,
            samples = self.stats.samples_emitted,
            decode_errors = self.stats.decode_errors,
            "Acquisition finished"
        );
        self.set_state(state.clone());

        SessionReport {
            transport: self.transport,
            state,
            stats: self.stats,
        }
    }

    fn handshake(&mut self) -> Result<(), HandshakeFailure> {
        let timeout = self.config.read_timeout;

        self.transport
            .flush_output()
            .map_err(|err| (HandshakeStep::FlushOutput, err))?;

        if self.config.high_voltage {
            self.send(&encode_high_voltage_enable(), HandshakeStep::HighVoltageEnable)?;
            self.expect_ack(timeout, HandshakeStep::HighVoltageAck)?;
        }

        self.send(
            &encode_set_gating(self.config.gating_period),
            HandshakeStep::SetGating,
        )?;
        self.expect_ack(timeout, HandshakeStep::SetGatingAck)?;

        self.send(&encode_clear(), HandshakeStep::Clear)?;

        if self.config.discard_after_clear {
            let discarded = self
                .transport
                .read_exact_or_available(FRAME_LEN, timeout)
                .map_err(|err| (HandshakeStep::DiscardAfterClear, err))?;
            debug!(bytes = ?discarded, "Discarded first frame after clear");
        }

        debug!("Detector handshake complete");
        Ok(())
    }

    fn send(&mut self, command: &[u8], step: HandshakeStep) -> Result<(), HandshakeFailure> {
        debug!(command = ?String::from_utf8_lossy(command), %step, "Sending command");
        self.transport.write(command).map_err(|err| (step, err))
    }

    fn expect_ack(&mut self, timeout: Duration, step: HandshakeStep) -> Result<(), HandshakeFailure> {
        let ack = self
            .transport
            .read_exact_or_available(ACK_LEN, timeout)
            .map_err(|err| (step, err))?;
        if ack.len() < ACK_LEN {
            return Err((
                step,
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("expected {ACK_LEN}-byte acknowledgment, got {} byte(s)", ack.len()),
                )),
            ));
        }
        debug!(ack = ?ack, %step, "Acknowledged");
        Ok(())
    }

    fn run_loop(&mut self) -> Result<(), Fault> {
        let timeout = self.config.read_timeout;

        loop {
            if self.stop.is_requested() {
                debug!("Stop requested");
                return Ok(());
            }

            let payload = self
                .transport
                .read_exact_or_available(FRAME_LEN, timeout)
                .map_err(Fault::Transport)?;

            if payload.is_empty() {
                self.stats.empty_reads += 1;
                self.publish();
                continue;
            }

            let captured = self.clock.now();
            self.stats.frames_read += 1;

            match decode_frame(&payload) {
                Ok(value) => {
                    let sample = Sample::new(value, captured);
                    debug!(value, bytes = ?payload, "Frame decoded");
                    self.sink.append(&sample).map_err(Fault::Sink)?;
                    self.observer.notify(sample);
                    self.stats.samples_emitted += 1;
                }
                Err(err) => {
                    self.stats.decode_errors += 1;
                    warn!(error = %err, bytes = ?payload, "Skipping undecodable frame");
                }
            }
            self.publish();
        }
    }

    fn finalize_after_fault(&mut self) {
        if let Err(err) = self.sink.finalize() {
            warn!(error = %err, "Failed to finalize sample sink after fault");
        }
    }

    fn set_state(&mut self, state: LoopState) {
        debug!(state = %state, "State change");
        let stats = self.stats;
        self.status.send_replace(SessionStatus { state, stats });
    }

    fn publish(&mut self) {
        let stats = self.stats;
        self.status.send_modify(|status| status.stats = stats);
    }
}
