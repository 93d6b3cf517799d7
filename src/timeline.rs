// src/timeline.rs

//! Loop timing arithmetic shared by the engine and visual collaborators.

use crate::looper::SamplePosition;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Capacity of every track buffer, in seconds.
    pub max_loop_seconds: f32,
    /// Relative length difference under which a track is treated as exactly
    /// one master cycle.
    pub loop_ratio_tolerance: f64,
    /// Output latency that visual playheads are shifted by, in samples.
    pub latency_compensation_samples: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            max_loop_seconds: 60.0,
            loop_ratio_tolerance: 0.05,
            latency_compensation_samples: 1024,
        }
    }
}

impl LooperConfig {
    pub fn max_samples(&self, sample_rate: f32) -> usize {
        (sample_rate.max(0.0) * self.max_loop_seconds.max(0.0)) as usize
    }
}

/// Track length relative to the master cycle, snapped to 1.0 inside the
/// tolerance band. Returns 0.0 without a master.
pub fn loop_ratio(track_len: usize, master_len: usize, tolerance: f64) -> f64 {
    if master_len == 0 {
        return 0.0;
    }
    let ratio = track_len as f64 / master_len as f64;
    if (ratio - 1.0).abs() < tolerance {
        1.0
    } else {
        ratio
    }
}

/// Where in the master cycle a track's first sample falls. Always in
/// `0..master_len`; 0 without a master.
pub fn phase_offset(record_start: SamplePosition, master_start: SamplePosition, master_len: usize) -> usize {
    if master_len == 0 {
        return 0;
    }
    let delta = record_start as i128 - master_start as i128;
    delta.rem_euclid(master_len as i128) as usize
}

/// Placement of a track on a circular (one turn = one master cycle) display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPlacement {
    /// Start of the track as a fraction of the master cycle.
    pub start_ratio: f64,
    /// Track length in master cycles.
    pub loop_ratio: f64,
    /// Latency shift as a fraction of the track length.
    pub latency_ratio: f64,
}

impl TrackPlacement {
    pub fn new(
        track_len: usize,
        record_start: SamplePosition,
        master_len: usize,
        master_start: SamplePosition,
        config: &LooperConfig,
    ) -> Option<Self> {
        if track_len == 0 || master_len == 0 {
            return None;
        }
        Some(Self {
            start_ratio: phase_offset(record_start, master_start, master_len) as f64 / master_len as f64,
            loop_ratio: loop_ratio(track_len, master_len, config.loop_ratio_tolerance),
            latency_ratio: config.latency_compensation_samples as f64 / track_len as f64,
        })
    }

    /// Angle, in turns, of a point `progress` (0..1) through the track.
    pub fn angle_ratio(&self, progress: f64) -> f64 {
        self.start_ratio + progress * self.loop_ratio + self.latency_ratio
    }
}
