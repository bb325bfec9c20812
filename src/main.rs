//! CLI entry point for fluoro_acq
//!
//! Acquire from a detector:
//! ```bash
//! fluoro_acq acquire --port /dev/ttyUSB0 --period 250ms --output data/
//! ```
//!
//! Decode a frame by hand:
//! ```bash
//! fluoro_acq decode 1 2 5 5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fluoro_acq::config::{FluoroConfig, StorageFormat, DEFAULT_CONFIG_PATH};
use fluoro_acq::protocol::frame::assemble_digits;
use fluoro_acq::protocol::{decode_frame, GatingPeriod};
use fluoro_acq::tracing_init::{self, OutputFormat, TracingConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use fluoro_acq::acquisition::{self, SessionReport, SessionStatus};
#[cfg(feature = "instrument_serial")]
use fluoro_acq::data::{
    sample_channel, SampleObserver, SampleSink, SampleStream, TextLogSink, TracingObserver,
};
#[cfg(feature = "instrument_serial")]
use tokio::sync::watch;
#[cfg(feature = "instrument_serial")]
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fluoro_acq")]
#[command(about = "Fluorescence detector acquisition over serial", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire samples until Ctrl+C (or --duration) and log them
    Acquire {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Serial port (overrides config)
        #[arg(long)]
        port: Option<String>,

        /// Gating period: 100ms, 200ms, 250ms, 500ms or 1000ms (overrides config)
        #[arg(long)]
        period: Option<GatingPeriod>,

        /// Switch the detector high voltage on
        #[arg(long)]
        high_voltage: bool,

        /// Output directory for the sample log (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Sample log format: log or csv (overrides config)
        #[arg(long)]
        format: Option<StorageFormat>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Log output format: pretty, compact or json
        #[arg(long, default_value = "pretty")]
        log_format: OutputFormat,
    },

    /// Decode a 4-byte frame given as decimal byte values
    Decode {
        /// Frame bytes, e.g. `1 2 5 5`
        #[arg(required = true, num_args = 1..=4)]
        bytes: Vec<u8>,
    },

    /// List the gating periods the detector accepts
    Periods,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Acquire {
            config,
            port,
            period,
            high_voltage,
            output,
            format,
            duration,
            log_format,
        } => {
            let mut settings = load_config(&config, port)?;
            if let Some(period) = period {
                settings.acquisition.gating_period = period;
            }
            if high_voltage {
                settings.acquisition.high_voltage = true;
            }
            if let Some(output) = output {
                settings.storage.output_dir = output;
            }
            if let Some(format) = format {
                settings.storage.format = format;
            }
            settings.validate()?;

            let tracing_config = TracingConfig::from_config(&settings)
                .map_err(anyhow::Error::msg)?
                .with_format(log_format);
            tracing_init::init(tracing_config).map_err(anyhow::Error::msg)?;

            acquire(settings, duration.map(Duration::from_secs)).await
        }
        Commands::Decode { bytes } => {
            println!("digits:  {}", assemble_digits(&bytes));
            match decode_frame(&bytes) {
                Ok(reading) => println!("reading: {reading}"),
                Err(err) => bail!("{err}"),
            }
            Ok(())
        }
        Commands::Periods => {
            for period in GatingPeriod::ALL {
                println!("{:>6}  code {:>3}", period.to_string(), period.code());
            }
            Ok(())
        }
    }
}

/// Load the config file (if present) plus environment, then apply a port override.
fn load_config(path: &Path, port: Option<String>) -> Result<FluoroConfig> {
    let mut figment = FluoroConfig::figment(path);
    if let Some(port) = port {
        figment = figment.merge(("serial.port", port));
    }
    figment
        .extract()
        .with_context(|| format!("Failed to load configuration from '{}'", path.display()))
}

#[cfg(feature = "instrument_serial")]
fn open_sink(settings: &FluoroConfig) -> Result<Box<dyn SampleSink>> {
    let dir = &settings.storage.output_dir;
    let sink: Box<dyn SampleSink> = match settings.storage.format {
        StorageFormat::Log => Box::new(TextLogSink::create_in(dir)?),
        #[cfg(feature = "storage_csv")]
        StorageFormat::Csv => Box::new(fluoro_acq::data::CsvSink::create_in(dir)?),
        #[cfg(not(feature = "storage_csv"))]
        StorageFormat::Csv => bail!("CSV support not enabled. Rebuild with --features storage_csv"),
    };
    Ok(sink)
}

#[cfg(feature = "instrument_serial")]
async fn acquire(settings: FluoroConfig, duration: Option<Duration>) -> Result<()> {
    use fluoro_acq::transport::{SerialChannel, SerialPortChannel};

    info!(
        port = %settings.serial.port,
        period = %settings.acquisition.gating_period,
        output = %settings.storage.output_dir.display(),
        "Connecting to detector"
    );

    let transport = SerialPortChannel::open(&settings.serial)
        .with_context(|| format!("Failed to open serial port '{}'", settings.serial.port))?;
    let sink = open_sink(&settings)?;
    let (observer, stream) = sample_channel(settings.acquisition.observer_capacity);

    let handle = acquisition::start(transport, sink, observer, settings.acquisition_config())?;
    let display = tokio::spawn(display_samples(stream));
    let mut status = handle.subscribe();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, stopping"),
        _ = sleep_or_forever(duration) => info!("Acquisition duration elapsed, stopping"),
        _ = until_terminal(&mut status) => warn!("Acquisition ended on its own"),
    }

    let mut report = handle.stop_async().await?;
    if let Err(err) = display.await {
        warn!("Display task failed: {err}");
    }
    report.transport.close();
    summarize(&report)
}

#[cfg(not(feature = "instrument_serial"))]
async fn acquire(_settings: FluoroConfig, _duration: Option<Duration>) -> Result<()> {
    bail!("Serial support not enabled. Rebuild with --features instrument_serial")
}

#[cfg(feature = "instrument_serial")]
async fn display_samples(mut stream: SampleStream) {
    let mut display = TracingObserver::default();
    while let Some(sample) = stream.recv().await {
        display.notify(sample);
    }
    if stream.missed() > 0 {
        warn!(missed = stream.missed(), "Live display fell behind; samples are still in the log");
    }
}

#[cfg(feature = "instrument_serial")]
async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(feature = "instrument_serial")]
async fn until_terminal(status: &mut watch::Receiver<SessionStatus>) {
    // A closed channel means the worker is gone, which is terminal too.
    let _ = status.wait_for(|s| s.state.is_terminal()).await;
}

#[cfg(feature = "instrument_serial")]
fn summarize<C>(report: &SessionReport<C>) -> Result<()> {
    let stats = report.stats;
    info!(
        samples = stats.samples_emitted,
        frames = stats.frames_read,
        empty_reads = stats.empty_reads,
        decode_errors = stats.decode_errors,
        "Session {}",
        report.state
    );
    if let Some(reason) = report.fault() {
        error!(%reason, "Acquisition faulted");
        bail!("acquisition faulted: {reason}");
    }
    Ok(())
}
