use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spectrograph::codec::{decode_frame, FrameAccumulator, Packet};
use spectrograph::history::sample_count_for_window;
use spectrograph::reader::open_serial;
use spectrograph::sensor::ReaderEvent;
use spectrograph::{Config, Projection, SensorRange, Spectrograph};
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "spectrograph", version, about = "Accelerometer vibration spectrograph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from a serial port and save the trace on exit
    Record {
        /// Serial port; defaults to the one in the config file
        port: Option<String>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Trace file, or a directory for a timestamped name
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
        /// Sensor range to request (2, 4, 8 or 16 g)
        #[arg(long)]
        range: Option<SensorRange>,
    },
    /// Print every 1000th decoded sample
    Decode {
        port: Option<String>,
    },
    /// Print length and spectrum peak of a saved trace
    Inspect {
        trace: PathBuf,
        /// Window start in seconds; defaults to the last sample window
        #[arg(long)]
        from: Option<f64>,
        /// Window end in seconds
        #[arg(long)]
        to: Option<f64>,
        #[arg(long)]
        projection: Option<Projection>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Using default config: {}", e);
        Config::default()
    });

    match cli.command {
        Commands::Record {
            port,
            duration,
            output,
            range,
        } => record(&config, resolve_port(port, &config)?, duration, output, range),
        Commands::Decode { port } => decode(&config, &resolve_port(port, &config)?),
        Commands::Inspect {
            trace,
            from,
            to,
            projection,
        } => inspect(&config, trace, from, to, projection),
    }
}

fn resolve_port(port: Option<String>, config: &Config) -> Result<String> {
    match port.or_else(|| config.port.clone()) {
        Some(port) => Ok(port),
        None => bail!(
            "No serial port given and none set in {}",
            Config::config_path().display()
        ),
    }
}

fn record(
    config: &Config,
    port: String,
    duration: Option<f64>,
    output: PathBuf,
    range: Option<SensorRange>,
) -> Result<()> {
    let mut session = Spectrograph::new(config);
    session
        .start(&port)
        .with_context(|| format!("Failed to start recording on {}", port))?;
    if let Some(range) = range {
        session.set_range(range);
    }

    let started = Instant::now();
    let limit = duration.map(|seconds| Duration::from_secs_f64(seconds.max(0.0)));
    let mut last_report = Instant::now();

    loop {
        std::thread::sleep(config.refresh_interval());
        let summary = session.tick();
        for event in &summary.events {
            match event {
                ReaderEvent::Connected(port) => log::info!("Recording from {}", port),
                ReaderEvent::Error(message) => log::error!("Reader stopped: {}", message),
                _ => {}
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let spectrum = session.current_spectrum();
            if let Some((freq, magnitude)) = spectrum.peak() {
                log::info!(
                    "{:.1}s recorded, peak {:.1} Hz at {:.4} g",
                    session.get_length(),
                    freq,
                    magnitude
                );
            }
        }

        if limit.is_some_and(|limit| started.elapsed() >= limit) || !session.is_recording() {
            break;
        }
    }

    session.stop().context("Failed to stop reader")?;
    session.tick();

    let stats = session.reader_stats();
    log::info!(
        "Received {} samples, dropped {} frames and {} packets, {} device errors",
        stats.samples,
        stats.dropped_frames,
        stats.dropped_packets,
        stats.device_errors
    );

    if session.history().is_empty() {
        log::warn!("No samples recorded, nothing to save");
        return Ok(());
    }
    let written = session.save(&output).context("Failed to save trace")?;
    println!("{}", written.display());
    Ok(())
}

fn decode(config: &Config, port: &str) -> Result<()> {
    let mut serial = open_serial(port, &config.port_settings())?;
    let mut frames = FrameAccumulator::new();
    let mut buffer = [0u8; 4096];
    let mut count: u64 = 0;

    loop {
        let n = match serial.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e).with_context(|| format!("Read from {} failed", port)),
        };

        frames.extend(&buffer[..n], |frame| match decode_frame(frame) {
            Ok(Some(Packet::Sample(raw))) => {
                if count % 1000 == 0 {
                    let sample = raw.to_g();
                    println!(
                        "{:>10}  x={:+.4}g  y={:+.4}g  z={:+.4}g  ({}g)",
                        count, sample.x, sample.y, sample.z, raw.range
                    );
                }
                count += 1;
            }
            Ok(Some(Packet::Error(message))) => println!("device error: {}", message),
            Ok(_) => {}
            Err(e) => log::debug!("Dropped frame: {}", e),
        });
    }
}

fn inspect(
    config: &Config,
    trace: PathBuf,
    from: Option<f64>,
    to: Option<f64>,
    projection: Option<Projection>,
) -> Result<()> {
    let mut session = Spectrograph::new(config);
    session
        .load(&trace)
        .with_context(|| format!("Failed to load {}", trace.display()))?;

    let params = *session.params();
    let length = session.get_length();
    let to_t = to.unwrap_or(length);
    let from_t = from.unwrap_or(to_t - params.sample_window);
    if sample_count_for_window(to_t - from_t) == 0 {
        bail!("Empty window {:.3}s..{:.3}s", from_t, to_t);
    }

    let projection = projection.unwrap_or(params.projection);
    let spectrum = session.get_fft(from_t, to_t, params.min_freq, params.max_freq, projection);

    println!("{}: {:.3}s", trace.display(), length);
    match spectrum.peak() {
        Some((freq, magnitude)) => println!(
            "peak {:.2} Hz at {:.5} g ({}, {:.3}s..{:.3}s)",
            freq, magnitude, projection, from_t, to_t
        ),
        None => println!("no bins between {} and {} Hz", params.min_freq, params.max_freq),
    }
    Ok(())
}
