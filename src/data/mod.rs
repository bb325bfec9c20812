//! Samples and their consumers.
//!
//! - **`sample`**: the `Sample` type handed out per decoded frame.
//! - **`storage`**: durable sinks (`TextLogSink`, `CsvSink`, `MemorySink`).
//! - **`observer`**: live consumers (`ChannelObserver`, `TracingObserver`, ...).

pub mod observer;
pub mod sample;
pub mod storage;

pub use observer::{
    sample_channel, ChannelObserver, NullObserver, RecordingObserver, SampleObserver,
    SampleStream, TracingObserver,
};
pub use sample::Sample;
#[cfg(feature = "storage_csv")]
pub use storage::CsvSink;
pub use storage::{MemorySink, MemorySinkView, SampleSink, TextLogSink};
