//! Integration tests for the acquisition loop against a scripted serial channel.

use fluoro_acq::acquisition::{self, FaultKind, LoopState, SessionHandle, SessionStatus};
use fluoro_acq::data::{
    sample_channel, MemorySink, NullObserver, RecordingObserver, SampleSink, TextLogSink,
};
use fluoro_acq::protocol::GatingPeriod;
use fluoro_acq::transport::{MockRead, MockSerialChannel, SerialChannel};
use fluoro_acq::AcquisitionConfig;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

fn config() -> AcquisitionConfig {
    AcquisitionConfig::new(GatingPeriod::Ms250).with_read_timeout(READ_TIMEOUT)
}

/// Ack for `P<code>\r` followed by the given frames.
fn detector(frames: &[[u8; 4]]) -> MockSerialChannel {
    MockSerialChannel::new()
        .with_reads(std::iter::once(MockRead::ack()))
        .with_reads(frames.iter().copied().map(MockRead::frame))
}

fn wait_until<C>(handle: &SessionHandle<C>, condition: impl Fn(&SessionStatus) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition(&handle.status()) {
        assert!(
            Instant::now() < deadline,
            "Condition not reached, last status: {:?}",
            handle.status()
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_three_frames_then_silence() {
    let sink = MemorySink::new();
    let stored = sink.view();
    let observer = RecordingObserver::new();

    let handle = acquisition::start(
        detector(&[[1, 2, 5, 5], [0, 0, 0, 0], [1, 2, 34, 12]]),
        sink,
        observer.clone(),
        config(),
    )
    .expect("Failed to start acquisition");

    wait_until(&handle, |s| s.stats.samples_emitted == 3 && s.stats.empty_reads > 2);
    assert_eq!(acquisition::state(&handle), LoopState::Running);

    let report = acquisition::stop(handle).expect("Failed to stop acquisition");
    assert_eq!(report.state, LoopState::Stopped);
    assert_eq!(report.stats.samples_emitted, 3);
    assert_eq!(report.stats.decode_errors, 0);

    let samples = stored.samples();
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![205500.0, 0.0, 234120.0]);
    assert_eq!(observer.samples(), samples);
    assert!(stored.is_finalized());

    for pair in samples.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }
}

#[test]
fn test_silent_detector_emits_nothing() {
    let sink = MemorySink::new();
    let stored = sink.view();
    let observer = RecordingObserver::new();

    let handle = acquisition::start(detector(&[]), sink, observer.clone(), config()).unwrap();
    wait_until(&handle, |s| s.stats.empty_reads >= 5);
    let report = handle.stop().unwrap();

    assert_eq!(report.state, LoopState::Stopped);
    assert_eq!(report.stats.frames_read, 0);
    assert!(stored.samples().is_empty());
    assert!(observer.samples().is_empty());
}

#[test]
fn test_stop_latency_is_bounded_by_read_timeout() {
    // Every empty read blocks for the full timeout
    let transport = detector(&[]).with_empty_read_delay(Duration::from_secs(10));
    let handle = acquisition::start(transport, MemorySink::new(), NullObserver, config()).unwrap();
    wait_until(&handle, |s| s.state == LoopState::Running);

    let started = Instant::now();
    let report = handle.stop().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.state, LoopState::Stopped);
    assert!(
        elapsed < READ_TIMEOUT * 3,
        "Stop took too long: {:?}",
        elapsed
    );
}

#[test]
fn test_no_samples_after_stop() {
    let frames = vec![[1, 2, 5, 5]; 500];
    let transport = detector(&frames).with_read_latency(Duration::from_millis(2));
    let sink = MemorySink::new();
    let stored = sink.view();
    let observer = RecordingObserver::new();

    let handle = acquisition::start(transport, sink, observer.clone(), config()).unwrap();
    wait_until(&handle, |s| s.stats.samples_emitted >= 5);
    let report = handle.stop().unwrap();

    let count_at_stop = stored.samples().len();
    let notified_at_stop = observer.samples().len();
    assert_eq!(count_at_stop as u64, report.stats.samples_emitted);
    assert_eq!(notified_at_stop, count_at_stop);
    assert!(count_at_stop < frames.len());

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stored.samples().len(), count_at_stop);
    assert_eq!(observer.samples().len(), notified_at_stop);
}

#[test]
fn test_read_error_while_running_faults_session() {
    let transport =
        detector(&[[1, 2, 5, 5]]).with_reads([MockRead::Error(ErrorKind::Other)]);
    let sink = MemorySink::new();
    let stored = sink.view();
    let observer = RecordingObserver::new();

    let handle = acquisition::start(transport, sink, observer.clone(), config()).unwrap();
    let report = handle.wait().unwrap();

    let reason = report.fault().expect("Session should have faulted");
    assert_eq!(reason.kind, FaultKind::TransportError);
    assert!(reason.message.contains("mock read failure"), "{}", reason);
    assert_eq!(report.stats.samples_emitted, 1);
    assert_eq!(stored.samples().len(), 1);
    assert_eq!(observer.samples().len(), 1);
    assert!(stored.is_finalized());
}

#[test]
fn test_read_error_on_ack_fails_handshake() {
    let transport = MockSerialChannel::new()
        .with_reads([MockRead::Error(ErrorKind::Other), MockRead::frame([1, 2, 5, 5])]);
    let probe = transport.probe();
    let sink = MemorySink::new();
    let stored = sink.view();

    let handle = acquisition::start(transport, sink, NullObserver, config()).unwrap();
    let report = handle.wait().unwrap();

    let reason = report.fault().expect("Session should have faulted");
    assert_eq!(reason.kind, FaultKind::HandshakeFailed);
    assert!(reason.message.contains("gating period acknowledgment"), "{}", reason);
    // `C\r` is never sent and the frame is never read.
    assert_eq!(probe.writes(), vec![b"P\x19\r".to_vec()]);
    assert!(stored.samples().is_empty());
    assert!(stored.is_finalized());
}

#[test]
fn test_stalled_display_does_not_block_stop() {
    let (observer, stream) = sample_channel(1);
    let observer = observer.with_max_block(Duration::from_millis(20));
    let frames = vec![[1, 2, 5, 5]; 20];
    let sink = MemorySink::new();
    let stored = sink.view();

    let handle = acquisition::start(detector(&frames), sink, observer, config()).unwrap();
    wait_until(&handle, |s| s.stats.samples_emitted == 20);

    let started = Instant::now();
    let report = handle.stop().unwrap();
    assert!(started.elapsed() < READ_TIMEOUT * 3);

    assert_eq!(report.state, LoopState::Stopped);
    assert_eq!(stored.samples().len(), 20);
    assert_eq!(stream.missed(), 19);
}

#[test]
fn test_sink_failure_faults_session() {
    let sink = MemorySink::new().fail_after(2);
    let stored = sink.view();
    let observer = RecordingObserver::new();

    let handle = acquisition::start(
        detector(&[[1, 2, 5, 5], [1, 2, 5, 6], [1, 2, 5, 7], [1, 2, 5, 8]]),
        sink,
        observer.clone(),
        config(),
    )
    .unwrap();
    let report = handle.wait().unwrap();

    let reason = report.fault().expect("Session should have faulted");
    assert_eq!(reason.kind, FaultKind::SinkError);
    assert_eq!(stored.samples().len(), 2);
    assert_eq!(observer.samples().len(), 2);
    assert_eq!(report.stats.samples_emitted, 2);
    assert!(stored.is_finalized());
}

#[test]
fn test_disconnect_faults_session() {
    let transport = detector(&[[1, 2, 5, 5]]).with_reads([MockRead::Disconnect]);
    let probe = transport.probe();
    let sink = MemorySink::new();
    let stored = sink.view();

    let handle = acquisition::start(transport, sink, NullObserver, config()).unwrap();
    let report = handle.wait().unwrap();

    assert_eq!(
        report.fault().map(|reason| reason.kind),
        Some(FaultKind::TransportError)
    );
    assert_eq!(stored.samples().len(), 1);
    assert!(stored.is_finalized());
    assert!(!probe.is_open());
    assert!(!report.transport.is_open());
}

#[test]
fn test_faulted_state_is_observable() {
    let transport = MockSerialChannel::new().with_reads([MockRead::Empty]);
    let handle = acquisition::start(transport, MemorySink::new(), NullObserver, config()).unwrap();

    wait_until(&handle, |s| s.state.is_terminal());
    match handle.state() {
        LoopState::Faulted(reason) => assert_eq!(reason.kind, FaultKind::HandshakeFailed),
        other => panic!("Expected Faulted, got {:?}", other),
    }
    assert!(handle.stop().is_ok());
}

#[test]
fn test_transport_returned_open_after_stop() {
    let transport = detector(&[]);
    let probe = transport.probe();

    let handle = acquisition::start(transport, MemorySink::new(), NullObserver, config()).unwrap();
    wait_until(&handle, |s| s.state == LoopState::Running);
    let mut report = handle.stop().unwrap();

    assert!(report.transport.is_open());
    report.transport.close();
    assert!(!probe.is_open());
}

#[test]
fn test_text_log_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sink = TextLogSink::create_in(dir.path()).unwrap();
    let path = sink.path().map(|p| p.to_path_buf()).unwrap();

    let handle = acquisition::start(
        detector(&[[1, 2, 5, 5], [9, 87, 6, 100]]),
        sink,
        NullObserver,
        config(),
    )
    .unwrap();
    wait_until(&handle, |s| s.stats.samples_emitted == 2);
    handle.stop().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("205500.0, "), "{}", lines[0]);
    assert!(lines[1].starts_with("870610.0, "), "{}", lines[1]);
}

#[test]
fn test_boxed_sink_and_transport() {
    let transport: Box<dyn SerialChannel> = Box::new(detector(&[[1, 2, 5, 5]]));
    let sink: Box<dyn SampleSink> = Box::new(MemorySink::new());

    let handle = acquisition::start(transport, sink, NullObserver, config()).unwrap();
    wait_until(&handle, |s| s.stats.samples_emitted == 1);
    let report = handle.stop().unwrap();
    assert_eq!(report.state, LoopState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_channel_observer_streams_samples() {
    let (observer, mut stream) = sample_channel(8);

    let handle = acquisition::start(
        detector(&[[1, 2, 5, 5], [0, 0, 0, 0]]),
        MemorySink::new(),
        observer,
        config(),
    )
    .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("Timed out waiting for sample")
        .expect("Stream closed early");
    let second = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("Timed out waiting for sample")
        .expect("Stream closed early");

    assert_eq!(first.value, 205500.0);
    assert_eq!(second.value, 0.0);
    assert!(first.timestamp < second.timestamp);

    let report = handle.stop_async().await.unwrap();
    assert_eq!(report.state, LoopState::Stopped);

    // Worker dropped the observer, so the stream ends.
    assert!(stream.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_subscription_reaches_terminal_state() {
    let handle = acquisition::start(
        MockSerialChannel::new().fail_write_at(0),
        MemorySink::new(),
        NullObserver,
        config(),
    )
    .unwrap();
    let mut status = handle.subscribe();

    let terminal = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state.is_terminal()),
    )
    .await
    .expect("Timed out waiting for terminal state")
    .map(|s| s.state.clone());

    // The sender may already be gone once the worker exits.
    if let Ok(state) = terminal {
        assert!(matches!(state, LoopState::Faulted(_)));
    }

    let report = handle.wait_async().await.unwrap();
    assert_eq!(
        report.fault().map(|reason| reason.kind),
        Some(FaultKind::HandshakeFailed)
    );
}
