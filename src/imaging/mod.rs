//! Microscope collaborator interface.
//!
//! Stage motion, capture and image persistence live outside this crate. The
//! recipe scheduler only calls the [`Imaging`] trait; whatever implements it
//! owns the microscope. Failures come back as `anyhow::Error` and abort the
//! run.

pub mod grid;
pub mod mock;

pub use grid::{serpentine_grid, StagePosition};
pub use mock::{ImagingCall, MockImaging};

use anyhow::Result;
use std::path::Path;

/// Single 16-bit camera frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel values
    pub pixels: Vec<u16>,
}

impl Image {
    /// Blank frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }
}

/// Services the recipe needs from the microscope.
pub trait Imaging {
    /// Capture one frame with the current settings.
    fn snapshot(&mut self) -> Result<Image>;

    /// Store a fixation snapshot under `tag` (e.g. "initial") in `output_dir`.
    fn persist_snapshot(&mut self, tag: &str, image: &Image, output_dir: &Path) -> Result<()>;

    /// Move the XY stage.
    fn move_to(&mut self, x: f64, y: f64) -> Result<()>;

    /// Visit every position and capture every channel, persisting images and
    /// per-field metadata keyed by field index, channel and `cycle`.
    fn multipoint_acquire(
        &mut self,
        grid: &[StagePosition],
        channels: &[String],
        cycle: u32,
        output_dir: &Path,
    ) -> Result<()>;
}
