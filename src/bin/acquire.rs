//! Connects to the first supported scope, applies a basic configuration and
//! streams captures to the terminal until interrupted.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hantek_dso::{DsoEvent, HantekDso, TriggerMode};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Samplerate to request, in samples per second.
    #[arg(short, long, default_value_t = 1_000_000)]
    samplerate: u32,

    /// Gain to request, in volts per division.
    #[arg(short, long, default_value_t = 1.0)]
    gain: f64,

    /// Number of captures to collect before exiting.
    #[arg(short, long, default_value_t = 10)]
    count: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let (dso, mut events) = match HantekDso::connect().await {
        Ok(connection) => connection,
        Err(error) => {
            error!("connection failed: {error}");
            std::process::exit(1);
        }
    };
    info!("connected to {}", dso.model());

    let samplerate = dso.set_samplerate(cli.samplerate);
    info!("samplerate set to {samplerate} S/s");
    for channel in 0..2 {
        match dso.set_gain(channel, cli.gain) {
            Ok(resolved) => info!("channel {channel} gain {resolved} V/div"),
            Err(error) => error!("channel {channel} gain rejected: {error}"),
        }
    }
    dso.set_trigger_mode(TriggerMode::Auto);
    dso.set_trigger_position(0.5);
    dso.start_sampling();

    let mut collected = 0;
    while collected < cli.count {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            DsoEvent::SamplesAvailable { samplerate } => {
                collected += 1;
                dso.with_captured(|frame| {
                    if let Some(frame) = frame {
                        let counts: Vec<usize> =
                            frame.samples.iter().map(|channel| channel.len()).collect();
                        info!(
                            "capture {collected}: {counts:?} samples at {samplerate} S/s, \
                             trigger at {}",
                            frame.trigger_point
                        );
                    }
                });
            }
            DsoEvent::StatusMessage { message, .. } => info!("scope: {message}"),
            DsoEvent::Disconnected => {
                error!("scope disconnected");
                break;
            }
            other => info!("{other:?}"),
        }
    }

    dso.stop_sampling();
    dso.shutdown().await;
}
