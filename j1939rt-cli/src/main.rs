// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use clap::Parser;

use j1939rt_can::VirtualBus;
use j1939rt_runtime::{Config, Configurable, Runtime};
use j1939rt_sim::{BrakeConfig, BrakeSimulator, EngineConfig, EngineSimulator, TransmissionConfig, TransmissionSimulator};

#[derive(Parser)]
#[command(author = "Copyright (C) 2024 Laixer Equipment B.V.")]
#[command(version, propagate_version = true)]
#[command(about = "J1939 Runtime Daemon", long_about = None)]
struct Args {
    /// Virtual CAN network interface.
    #[arg(default_value = "vcan0")]
    interface: String,

    /// Own source address on the bus.
    #[arg(long, default_value = "0xFE")]
    address: String,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Run the engine simulator.
    #[arg(long)]
    engine: bool,

    /// Run the transmission simulator.
    #[arg(long)]
    transmission: bool,

    /// Run the brake simulator.
    #[arg(long)]
    brakes: bool,

    /// Daemonize the service.
    #[arg(long)]
    daemon: bool,

    /// Level of verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logger(daemon: bool, verbose: u8) -> anyhow::Result<()> {
    let mut log_config = simplelog::ConfigBuilder::new();
    if daemon {
        log_config.set_time_level(log::LevelFilter::Off);
        log_config.set_thread_level(log::LevelFilter::Off);
    } else {
        log_config.set_time_offset_to_local().ok();
        log_config.set_time_format_rfc2822();
    }

    log_config.set_target_level(log::LevelFilter::Off);
    log_config.set_location_level(log::LevelFilter::Off);

    let log_level = if daemon {
        log::LevelFilter::Info
    } else {
        match verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    let color_choice = if daemon {
        simplelog::ColorChoice::Never
    } else {
        simplelog::ColorChoice::Auto
    };

    simplelog::TermLogger::init(log_level, log_config.build(), simplelog::TerminalMode::Mixed, color_choice)?;
    Ok(())
}

fn parse_address(raw: &str) -> anyhow::Result<u8> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Ok(u8::from_str_radix(hex, 16)?)
    } else {
        Ok(raw.parse()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logger(args.daemon, args.verbose)?;

    let bin_name = env!("CARGO_BIN_NAME");

    let mut config: Config = match &args.config {
        Some(path) => j1939rt_runtime::config::from_toml(path)?,
        None => Config::default(),
    };

    config.can.interface = args.interface.clone();
    config.simulator.engine |= args.engine;
    config.simulator.transmission |= args.transmission;
    config.simulator.brakes |= args.brakes;
    config.global.bin_name = bin_name.to_string();
    config.global.daemon = args.daemon;

    if args.daemon {
        log::debug!("Running service as daemon");
    }
    log::trace!("{:#?}", config.global());

    let own_address = parse_address(&args.address)?;
    let vbus = VirtualBus::new();
    let simulator = config.simulator.clone();
    let interface = config.can.interface.clone();
    let mut runtime = Runtime::new(config, &vbus, own_address);

    if simulator.engine {
        log::info!("Starting engine simulator on {}", interface);
        runtime.register_module(Box::new(EngineSimulator::new(EngineConfig::default())));
    }
    if simulator.transmission {
        log::info!("Starting transmission simulator on {}", interface);
        runtime.register_module(Box::new(TransmissionSimulator::new(TransmissionConfig::default())));
    }
    if simulator.brakes {
        log::info!("Starting brake simulator on {}", interface);
        runtime.register_module(Box::new(BrakeSimulator::new(BrakeConfig::default())));
    }

    runtime.start().await?;
    log::info!("Runtime started on interface {}", interface);

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    runtime.stop().await?;

    Ok(())
}
