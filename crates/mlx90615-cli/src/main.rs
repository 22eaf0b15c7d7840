//! CLI Entry Point for the MLX90615 driver
//!
//! Provides command-line access to:
//! - Single temperature readings
//! - Emissivity and IIR filter settings
//! - Periodic streaming until Ctrl+C or a record count
//! - Sleep mode
//!
//! # Usage
//!
//! ```bash
//! mlx90615 --bus /dev/i2c-1 read
//! mlx90615 --bus /dev/i2c-1 emissivity --set 0.95
//! mlx90615 --mock stream --channels object --count 10
//! RUST_LOG=daq_driver_mlx90615=debug mlx90615 --mock filter --set 0.5
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use daq_driver_mlx90615::mock::SimulatedMlx90615;
use daq_driver_mlx90615::{
    Channel, ChannelMask, IntPlusMicro, IntPlusNano, Mlx90615, Mlx90615Config, SampleRecord,
};
use embedded_hal::i2c::I2c;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mlx90615")]
#[command(about = "Read and configure an MLX90615 infrared thermometer", long_about = None)]
struct Cli {
    #[command(flatten)]
    target: Target,

    /// Driver configuration file (TOML format)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(multiple = false)]
struct Target {
    /// I2C adapter the sensor is attached to
    #[arg(long)]
    bus: Option<PathBuf>,

    /// Use a simulated sensor instead of hardware
    #[arg(long)]
    mock: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read ambient and object temperatures once
    Read,

    /// Show or change the emissivity (0.0 - 1.0)
    Emissivity {
        /// New emissivity
        #[arg(long)]
        set: Option<IntPlusNano>,
    },

    /// Show or change the IIR filter bandwidth
    Filter {
        /// New bandwidth, one of the available values
        #[arg(long, conflicts_with = "available")]
        set: Option<IntPlusMicro>,

        /// List the accepted bandwidths
        #[arg(long)]
        available: bool,
    },

    /// Stream periodic readings until Ctrl+C
    Stream {
        /// Comma-separated channels to capture
        #[arg(long, default_value = "ambient,object")]
        channels: ChannelMask,

        /// Stop after this many records
        #[arg(long)]
        count: Option<u64>,

        /// Print the 16-byte encoded record instead of temperatures
        #[arg(long)]
        hex: bool,
    },

    /// Put the sensor into sleep mode
    Sleep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Mlx90615Config::load(cli.config.as_deref()).context("Failed to load config")?;

    if cli.target.mock {
        let device = Mlx90615::open(SimulatedMlx90615::with_address(config.address), config)?;
        return run(device, cli.command).await;
    }

    let Some(path) = cli.target.bus else {
        bail!("either --bus or --mock is required");
    };
    open_bus(path, config, cli.command).await
}

#[cfg(feature = "hardware")]
async fn open_bus(path: PathBuf, config: Mlx90615Config, command: Commands) -> Result<()> {
    let device = daq_driver_mlx90615::open_linux(&path, config)?;
    run(device, command).await
}

#[cfg(not(feature = "hardware"))]
async fn open_bus(path: PathBuf, _config: Mlx90615Config, _command: Commands) -> Result<()> {
    bail!(
        "cannot open {}: built without the `hardware` feature",
        path.display()
    )
}

async fn run<I2C>(device: Mlx90615<I2C>, command: Commands) -> Result<()>
where
    I2C: I2c + Send + 'static,
{
    match command {
        Commands::Read => {
            for channel in [Channel::Ambient, Channel::Object] {
                let temperature = device.read_temperature(channel)?;
                println!("{:<8} {}", channel.to_string(), temperature);
            }
            println!("{:<8} {}", "raw IR", device.read_raw_ir()?);
        }
        Commands::Emissivity { set } => {
            if let Some(value) = set {
                device.set_emissivity(value)?;
            }
            println!("{}", device.emissivity()?);
        }
        Commands::Filter { set, available } => {
            if available {
                println!("{}", device.available_filter_bandwidths());
                return Ok(());
            }
            if let Some(value) = set {
                device.set_filter_bandwidth(value)?;
            }
            println!(
                "{} (index {})",
                device.filter_bandwidth()?,
                device.filter_index()?
            );
        }
        Commands::Stream {
            channels,
            count,
            hex,
        } => stream(&device, channels, count, hex).await?,
        Commands::Sleep => device.sleep()?,
    }

    device.close()?;
    Ok(())
}

async fn stream<I2C>(
    device: &Mlx90615<I2C>,
    channels: ChannelMask,
    count: Option<u64>,
    hex: bool,
) -> Result<()>
where
    I2C: I2c + Send + 'static,
{
    let mut rx = device.enable_streaming(channels)?;
    let mut received = 0u64;

    loop {
        tokio::select! {
            record = rx.recv() => {
                let Some(record) = record else {
                    warn!("Stream ended by the device");
                    break;
                };
                print_record(&record, hex);
                received += 1;
                if count.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping stream");
                break;
            }
        }
    }

    device.disable_streaming()?;
    let stats = device.stream_stats();
    info!(
        received,
        dropped = stats.records_dropped,
        "Stream finished"
    );
    Ok(())
}

fn print_record(record: &SampleRecord, hex: bool) {
    if hex {
        let bytes: Vec<String> = record.encode().iter().map(|b| format!("{:02x}", b)).collect();
        println!("{}", bytes.join(" "));
        return;
    }

    let mut line = format!("{:>6} {:>14}", record.sequence, record.timestamp_ns);
    for channel in [Channel::Ambient, Channel::Object] {
        if let Some(temperature) = record.temperature(channel) {
            line.push_str(&format!("  {}={}", channel, temperature));
        }
    }
    println!("{}", line);
}
