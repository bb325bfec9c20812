//! Durable sample sinks.
//!
//! A sink receives every sample in arrival order. Failures are fatal to the
//! acquisition session, so implementations should flush per append rather
//! than buffer silently.
use crate::data::sample::{format_legacy_float, Sample};
use crate::error::SinkError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Append-only destination for samples.
pub trait SampleSink: Send {
    /// Persist one sample.
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Flush and close. Called once when the session ends, including after a fault.
    fn finalize(&mut self) -> Result<(), SinkError>;
}

impl<T: SampleSink + ?Sized> SampleSink for Box<T> {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        (**self).append(sample)
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        (**self).finalize()
    }
}

/// File name prefix of session logs.
const LOG_PREFIX: &str = "FluoroAcq_";

/// Build the legacy session file name, e.g. `FluoroAcq_1697450000.123456.csv`.
pub fn session_file_name(started: chrono::DateTime<chrono::Utc>) -> String {
    let unix = started.timestamp_micros() as f64 / 1e6;
    format!("{LOG_PREFIX}{}.csv", format_legacy_float(unix))
}

fn create_session_file(dir: &Path) -> Result<(PathBuf, File), SinkError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let path = dir.join(session_file_name(chrono::Utc::now()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

// =============================================================================
// TextLogSink - legacy "<value>, <unix_timestamp>" lines
// =============================================================================

/// Plain-text sample log, one `"<value>, <unix_timestamp>\n"` line per sample.
///
/// This is the format the detector's original host software wrote, so
/// existing analysis scripts keep working.
pub struct TextLogSink<W: Write + Send> {
    writer: Option<W>,
    path: Option<PathBuf>,
    closed: bool,
}

impl TextLogSink<BufWriter<File>> {
    /// Create a new session log inside `dir` (created if missing).
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let (path, file) = create_session_file(dir.as_ref())?;
        tracing::info!(path = %path.display(), "Sample log created");
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: Some(path),
            closed: false,
        })
    }

    /// Append to an existing file (created if missing).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: Some(path),
            closed: false,
        })
    }
}

impl<W: Write + Send> TextLogSink<W> {
    /// Wrap an arbitrary writer.
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Some(writer),
            path: None,
            closed: false,
        }
    }

    /// Location of the log file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Hand back the underlying writer.
    pub fn into_inner(mut self) -> Option<W> {
        self.writer.take()
    }
}

/// One log line without the newline.
pub fn format_log_line(sample: &Sample) -> String {
    format!(
        "{}, {}",
        format_legacy_float(sample.value),
        format_legacy_float(sample.unix_timestamp())
    )
}

impl<W: Write + Send> SampleSink for TextLogSink<W> {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writeln!(writer, "{}", format_log_line(sample))?;
        writer.flush()?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.closed = true;
        Ok(())
    }
}

// =============================================================================
// CsvSink - headed CSV with RFC 3339 timestamps
// =============================================================================

/// CSV sample log with a header row.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Create a new session CSV inside `dir` (created if missing).
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let (path, file) = create_session_file(dir.as_ref())?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["value", "timestamp", "unix_timestamp"])?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "CSV sample log created");
        Ok(Self {
            writer: Some(writer),
            path,
        })
    }

    /// Location of the CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "storage_csv")]
impl SampleSink for CsvSink {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_record(&[
            format_legacy_float(sample.value),
            sample.timestamp.to_rfc3339(),
            format_legacy_float(sample.unix_timestamp()),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

// =============================================================================
// MemorySink - in-process sink with failure injection
// =============================================================================

#[derive(Debug, Default)]
struct MemoryShared {
    samples: Mutex<Vec<Sample>>,
    finalized: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps samples in memory. Useful for tests and for embedding the
/// acquisition loop in a host that persists samples itself.
#[derive(Debug, Default)]
pub struct MemorySink {
    shared: Arc<MemoryShared>,
    fail_after: Option<usize>,
}

/// Shared view of a [`MemorySink`].
#[derive(Debug, Clone)]
pub struct MemorySinkView {
    shared: Arc<MemoryShared>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` samples, then fail every further append.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// View that stays valid after the sink has been moved into a session.
    pub fn view(&self) -> MemorySinkView {
        MemorySinkView {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MemorySinkView {
    /// Samples appended so far.
    pub fn samples(&self) -> Vec<Sample> {
        lock(&self.shared.samples).clone()
    }

    /// Whether `finalize` has been called.
    pub fn is_finalized(&self) -> bool {
        self.shared.finalized.load(Ordering::SeqCst)
    }
}

impl SampleSink for MemorySink {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        if self.shared.finalized.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let mut samples = lock(&self.shared.samples);
        if self.fail_after.is_some_and(|limit| samples.len() >= limit) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory sink rejected append",
            )));
        }
        samples.push(*sample);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.shared.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }
}
