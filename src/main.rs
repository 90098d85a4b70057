//! Command-line front end for the MARLIN fluidics controller.
//!
//! ```bash
//! marlin discover
//! marlin set --reagent SSC --valve waste
//! marlin pump --speed 2000
//! marlin run --cycles 10 --wash
//! marlin clean
//! ```
//!
//! No microscope backend ships with this binary, so `run` drives the
//! fluidics only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use marlin::config::MarlinConfig;
use marlin::protocol::{discovery, ProtocolEngine};
use marlin::recipe::scheduler::{CLEAN_PUMP_SPEED, CLEAN_TIME_PER_LINE};
use marlin::recipe::RecipeScheduler;
use marlin::routing::RoutingTable;
use marlin::state::{PumpSpeed, ValveState};
use marlin::transport::SerialPortOpener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "marlin", version, about = "MARLIN fluidics controller")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = marlin::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Serial port, overriding discovery
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List ports answering the heartbeat
    Discover,
    /// Route a reagent and set the valve
    Set {
        /// Reagent name, e.g. "Probe 3" or "SSC"
        #[arg(long)]
        reagent: String,
        /// Flow target
        #[arg(long, value_enum, default_value_t = Valve::Stage)]
        valve: Valve,
    },
    /// Set the pump duty (0-4095)
    Pump {
        #[arg(long)]
        speed: u16,
    },
    /// Run the FISH protocol
    Run {
        /// Number of hybridization cycles
        #[arg(long, default_value_t = 10)]
        cycles: u32,
        /// Start directly at cycle 1
        #[arg(long)]
        skip_fixation: bool,
        /// Rinse with SSC before each probe
        #[arg(long)]
        wash: bool,
        /// Output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Flush every reagent line
    Clean {
        /// Seconds per line
        #[arg(long, default_value_t = CLEAN_TIME_PER_LINE.as_secs())]
        seconds_per_line: u64,
        /// Pump duty while flushing
        #[arg(long, default_value_t = CLEAN_PUMP_SPEED)]
        speed: u16,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Valve {
    Stage,
    Waste,
}

impl From<Valve> for ValveState {
    fn from(valve: Valve) -> Self {
        match valve {
            Valve::Stage => ValveState::Stage,
            Valve::Waste => ValveState::Waste,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MarlinConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if cli.port.is_some() {
        config.connection.port = cli.port.clone();
    }
    marlin::logging::init(&config.logging);

    let routing = Arc::new(RoutingTable::standard()?);
    let opener = SerialPortOpener;

    if let Command::Discover = cli.command {
        let ports = discovery::candidate_ports(&opener, &config.connection)?;
        for port in ports {
            let found = discovery::probe_port(&opener, &port, &config.connection);
            println!("{}\t{}", port, if found { "MARLIN" } else { "-" });
        }
        return Ok(());
    }

    let mut engine = ProtocolEngine::new(routing, config.connection.clone());
    engine.connect(&opener)?;
    engine.initialize()?;

    match cli.command {
        Command::Discover => {}
        Command::Set { reagent, valve } => {
            engine.set_valve_state(&reagent, valve.into())?;
        }
        Command::Pump { speed } => {
            engine.set_pump_state(PumpSpeed::new(speed)?)?;
        }
        Command::Run {
            cycles,
            skip_fixation,
            wash,
            output,
        } => {
            let mut recipe = config.recipe.clone();
            recipe.skip_fixation |= skip_fixation;
            recipe.include_wash_cycle |= wash;
            if let Some(output) = output {
                recipe.output_dir = output;
            }
            let mut scheduler = RecipeScheduler::new(&mut engine, recipe)?;
            let summary = scheduler.run(&[], cycles)?;
            info!("{:?}", summary);
        }
        Command::Clean {
            seconds_per_line,
            speed,
        } => {
            let mut scheduler = RecipeScheduler::new(&mut engine, config.recipe.clone())?;
            scheduler.clean(Duration::from_secs(seconds_per_line), PumpSpeed::new(speed)?)?;
        }
    }

    Ok(())
}
