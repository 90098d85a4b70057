//! Fixation and hybridization cycle sequencing.

use super::{CancellationToken, SleepWaiter, Waiter};
use crate::config::RecipeConfig;
use crate::error::{AppResult, MarlinError};
use crate::imaging::{Imaging, StagePosition};
use crate::protocol::FluidicsControl;
use crate::routing::{self, CLEAVE, ETOH, IMAGE, PFA, SSC};
use crate::state::{PumpSpeed, ValveState};
use std::time::{Duration, Instant};
use tracing::info;

/// Default line-cleaning flush per reagent.
pub const CLEAN_TIME_PER_LINE: Duration = Duration::from_secs(90);

/// Default line-cleaning pump duty.
pub const CLEAN_PUMP_SPEED: u16 = 2000;

/// Waste flush of the imaging line before the per-reagent pass.
const CLEAN_IMAGE_FLUSH: Duration = Duration::from_secs(5 * 60);

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Hybridization cycles performed.
    pub cycles: u32,
    /// Verified transitions issued.
    pub transitions: u32,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

struct Speeds {
    fast: PumpSpeed,
    medium: PumpSpeed,
    slow: PumpSpeed,
}

/// Sequences a FISH run on a fluidics controller.
///
/// The scheduler borrows the controller and, optionally, the microscope for
/// the length of a run. Holds go through a [`Waiter`], real sleeps unless
/// another waiter is installed.
pub struct RecipeScheduler<'a, F: FluidicsControl> {
    fluidics: &'a mut F,
    imaging: Option<&'a mut dyn Imaging>,
    config: RecipeConfig,
    speeds: Speeds,
    waiter: Box<dyn Waiter + 'a>,
    cancel: CancellationToken,
    transitions: u32,
}

impl<'a, F: FluidicsControl> RecipeScheduler<'a, F> {
    /// Scheduler without a microscope.
    ///
    /// # Errors
    /// `InvalidPumpSpeed` if a configured speed exceeds the pump range.
    pub fn new(fluidics: &'a mut F, config: RecipeConfig) -> AppResult<Self> {
        let speeds = Speeds {
            fast: PumpSpeed::new(config.fast_speed)?,
            medium: PumpSpeed::new(config.medium_speed)?,
            slow: PumpSpeed::new(config.slow_speed)?,
        };
        Ok(Self {
            fluidics,
            imaging: None,
            config,
            speeds,
            waiter: Box::new(SleepWaiter),
            cancel: CancellationToken::new(),
            transitions: 0,
        })
    }

    /// Image after every cycle (and around fixation when snapshots are on).
    pub fn with_imaging(mut self, imaging: &'a mut dyn Imaging) -> Self {
        self.imaging = Some(imaging);
        self
    }

    /// Replace the real-time waiter.
    pub fn with_waiter(mut self, waiter: impl Waiter + 'a) -> Self {
        self.waiter = Box::new(waiter);
        self
    }

    /// Token checked between steps when `cancellable` is configured.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Recipe in use.
    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    /// Full protocol: fixation unless skipped, `num_cycles` hybridization
    /// cycles with imaging, then a safe idle on SSC.
    ///
    /// Every reagent the run will need is checked against the routing table
    /// before the device is touched.
    pub fn run(&mut self, grid: &[StagePosition], num_cycles: u32) -> AppResult<RunSummary> {
        let start = Instant::now();
        self.check_reagents(num_cycles)?;

        let output_dir = self.config.output_dir.clone();
        std::fs::create_dir_all(&output_dir)?;
        info!(
            "Starting run: {} cycle(s), {} field(s), output {}",
            num_cycles,
            grid.len(),
            output_dir.display()
        );

        if !self.config.skip_fixation {
            if let (true, Some(first)) = (self.snapshots_enabled(), grid.first()) {
                self.checkpoint("moving to the first field")?;
                if let Some(imaging) = self.imaging.as_mut() {
                    imaging
                        .move_to(first.x, first.y)
                        .map_err(MarlinError::Imaging)?;
                }
            }
            self.snapshot("initial")?;
            self.init_fixation()?;
            self.snapshot("init_fixation")?;
            self.continue_fixation()?;
            self.snapshot("fixed")?;
        }

        for cycle in 1..=num_cycles {
            self.perform_cycle(cycle, cycle == 1)?;

            let channels = self.config.channels.clone();
            if self.imaging.is_some() {
                self.checkpoint(&format!("imaging cycle {}", cycle))?;
            }
            if let Some(imaging) = self.imaging.as_mut() {
                info!("Imaging cycle {}", cycle);
                imaging
                    .multipoint_acquire(grid, &channels, cycle, &output_dir)
                    .map_err(MarlinError::Imaging)?;
            }
        }

        self.idle_on_ssc()?;

        let summary = RunSummary {
            cycles: num_cycles,
            transitions: self.transitions,
            elapsed: start.elapsed(),
        };
        info!(
            "Run complete: {} cycle(s), {} transition(s) in {:?}",
            summary.cycles, summary.transitions, summary.elapsed
        );
        Ok(summary)
    }

    /// Stop the pump, flush `reagent` to waste at fast speed, then fill the
    /// stage at medium speed.
    pub fn load_reagent(&mut self, reagent: &str) -> AppResult<()> {
        info!("Loading {}", reagent);
        self.pump(PumpSpeed::STOPPED)?;
        self.valve(reagent, ValveState::Waste)?;
        self.pump(self.speeds.fast)?;
        self.hold(self.config.fast_flush, &format!("{} flush", reagent))?;
        self.pump(self.speeds.medium)?;
        self.valve(reagent, ValveState::Stage)?;
        self.hold(self.config.medium_settle, &format!("{} fill", reagent))
    }

    /// First fixative exchange.
    pub fn init_fixation(&mut self) -> AppResult<()> {
        self.load_reagent(PFA)?;
        info!("Initialized");
        Ok(())
    }

    /// Ethanol incubation followed by a second fixative exchange.
    pub fn continue_fixation(&mut self) -> AppResult<()> {
        self.load_reagent(ETOH)?;
        self.pump(self.speeds.slow)?;
        self.hold(self.config.fixation_hold, "fixation")?;
        self.load_reagent(PFA)?;
        info!("Fixed");
        Ok(())
    }

    /// One hybridization round: cleave (unless `no_cleave`), optional SSC
    /// wash, probe `cycle`, imaging buffer, then slow idle.
    pub fn perform_cycle(&mut self, cycle: u32, no_cleave: bool) -> AppResult<()> {
        info!("Cycle {}{}", cycle, if no_cleave { " (no cleave)" } else { "" });

        if !no_cleave {
            self.load_reagent(CLEAVE)?;
            self.hold(self.config.cleave_hold, "cleave")?;
        }

        if self.config.include_wash_cycle {
            self.load_reagent(SSC)?;
            self.pump(self.speeds.slow)?;
            self.hold(self.config.wash_hold, "wash")?;
        }

        let probe = routing::probe(cycle);
        self.load_reagent(&probe)?;
        self.pump(self.speeds.slow)?;
        self.hold(self.config.probe_hold, "hybridization")?;

        self.load_reagent(IMAGE)?;
        self.hold(self.config.image_hold, "imaging buffer")?;
        self.pump(self.speeds.slow)
    }

    /// Flush every line in turn, starting with the imaging line to waste.
    pub fn clean(&mut self, time_per_line: Duration, pump_speed: PumpSpeed) -> AppResult<()> {
        info!("Cleaning all lines ({:?} each)", time_per_line);
        self.pump(PumpSpeed::STOPPED)?;
        self.valve(IMAGE, ValveState::Waste)?;
        self.pump(pump_speed)?;
        self.hold(CLEAN_IMAGE_FLUSH, "image line flush")?;
        self.pump(PumpSpeed::STOPPED)?;
        self.valve(IMAGE, ValveState::Stage)?;

        let reagents: Vec<String> = self.fluidics.routing().names().map(String::from).collect();
        for reagent in &reagents {
            self.pump(PumpSpeed::STOPPED)?;
            self.valve(reagent, ValveState::Stage)?;
            self.pump(pump_speed)?;
            self.hold(time_per_line, &format!("{} clean", reagent))?;
        }

        self.pump(PumpSpeed::STOPPED)
    }

    /// Stop, route SSC to the stage and hold at slow speed.
    fn idle_on_ssc(&mut self) -> AppResult<()> {
        self.pump(PumpSpeed::STOPPED)?;
        self.valve(SSC, ValveState::Stage)?;
        self.pump(self.speeds.slow)
    }

    /// Probe names are generated one at a time, so the check stops at the
    /// first cycle the table cannot route however many cycles were asked for.
    fn check_reagents(&self, num_cycles: u32) -> AppResult<()> {
        let table = self.fluidics.routing();
        let mut fixed = vec![SSC, IMAGE];
        if !self.config.skip_fixation {
            fixed.extend([PFA, ETOH]);
        }
        if num_cycles > 1 {
            fixed.push(CLEAVE);
        }

        let missing = fixed
            .into_iter()
            .map(String::from)
            .chain((1..=num_cycles).map(routing::probe))
            .find(|name| !table.contains(name));

        match missing {
            Some(name) => Err(MarlinError::UnknownReagent(name)),
            None => Ok(()),
        }
    }

    fn snapshots_enabled(&self) -> bool {
        self.config.snapshots && self.imaging.is_some()
    }

    fn snapshot(&mut self, tag: &str) -> AppResult<()> {
        if !self.snapshots_enabled() {
            return Ok(());
        }
        self.checkpoint(&format!("snapshot {}", tag))?;
        let output_dir = self.config.output_dir.clone();
        if let Some(imaging) = self.imaging.as_mut() {
            let image = imaging.snapshot().map_err(MarlinError::Imaging)?;
            imaging
                .persist_snapshot(tag, &image, &output_dir)
                .map_err(MarlinError::Imaging)?;
        }
        Ok(())
    }

    fn checkpoint(&self, next: &str) -> AppResult<()> {
        if self.config.cancellable && self.cancel.is_cancelled() {
            info!("Run cancelled before {}", next);
            return Err(MarlinError::Cancelled(next.to_string()));
        }
        Ok(())
    }

    fn valve(&mut self, reagent: &str, valve: ValveState) -> AppResult<()> {
        self.checkpoint(&format!("routing {} to {}", reagent, valve))?;
        self.fluidics.set_valve_state(reagent, valve)?;
        self.transitions += 1;
        Ok(())
    }

    fn pump(&mut self, speed: PumpSpeed) -> AppResult<()> {
        self.checkpoint(&format!("setting pump to {}", speed))?;
        self.fluidics.set_pump_state(speed)?;
        self.transitions += 1;
        Ok(())
    }

    fn hold(&mut self, duration: Duration, reason: &str) -> AppResult<()> {
        self.checkpoint(reason)?;
        self.waiter.wait(duration, reason);
        Ok(())
    }
}
