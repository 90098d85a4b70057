//! Recording microscope for tests and dry runs.

use super::{Image, Imaging, StagePosition};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

/// One call made against [`MockImaging`].
#[derive(Debug, Clone, PartialEq)]
pub enum ImagingCall {
    /// `snapshot()`
    Snapshot,
    /// `persist_snapshot(tag, ..)`
    Persist {
        /// Snapshot tag
        tag: String,
        /// Output directory
        output_dir: PathBuf,
    },
    /// `move_to(x, y)`
    MoveTo(StagePosition),
    /// `multipoint_acquire(..)`
    Acquire {
        /// Number of grid positions
        fields: usize,
        /// Channel presets
        channels: Vec<String>,
        /// Cycle label
        cycle: u32,
    },
}

/// Microscope that records every call and returns blank frames.
#[derive(Debug, Default)]
pub struct MockImaging {
    calls: Vec<ImagingCall>,
    fail_on_cycle: Option<u32>,
}

impl MockImaging {
    /// Recorder with no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the acquisition for `cycle` fail.
    pub fn failing_on_cycle(cycle: u32) -> Self {
        Self {
            calls: Vec::new(),
            fail_on_cycle: Some(cycle),
        }
    }

    /// Calls received so far.
    pub fn calls(&self) -> &[ImagingCall] {
        &self.calls
    }

    /// Tags of persisted snapshots, in order.
    pub fn snapshot_tags(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ImagingCall::Persist { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Cycles acquired, in order.
    pub fn acquired_cycles(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ImagingCall::Acquire { cycle, .. } => Some(*cycle),
                _ => None,
            })
            .collect()
    }
}

impl Imaging for MockImaging {
    fn snapshot(&mut self) -> Result<Image> {
        self.calls.push(ImagingCall::Snapshot);
        Ok(Image::blank(16, 16))
    }

    fn persist_snapshot(&mut self, tag: &str, _image: &Image, output_dir: &Path) -> Result<()> {
        self.calls.push(ImagingCall::Persist {
            tag: tag.to_string(),
            output_dir: output_dir.to_path_buf(),
        });
        Ok(())
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<()> {
        self.calls.push(ImagingCall::MoveTo(StagePosition::new(x, y)));
        Ok(())
    }

    fn multipoint_acquire(
        &mut self,
        grid: &[StagePosition],
        channels: &[String],
        cycle: u32,
        _output_dir: &Path,
    ) -> Result<()> {
        self.calls.push(ImagingCall::Acquire {
            fields: grid.len(),
            channels: channels.to_vec(),
            cycle,
        });
        if self.fail_on_cycle == Some(cycle) {
            return Err(anyhow!("camera timeout during cycle {}", cycle));
        }
        Ok(())
    }
}
