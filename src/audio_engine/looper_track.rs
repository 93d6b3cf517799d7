// src/audio_engine/looper_track.rs

use crate::looper::{SamplePosition, SharedTrackState, TrackId, TrackState, WAVEFORM_DOWNSAMPLE_SIZE};
use std::fmt;

/// Samples scanned per block when rebuilding a waveform summary.
pub const SUMMARY_SAMPLES_PER_BLOCK: usize = 32_768;

/// One loop layer. The buffer is allocated once, at full capacity, and is
/// only ever indexed afterwards.
pub struct TrackData {
    pub id: TrackId,
    pub shared_state: SharedTrackState,
    pub buffer: Vec<f32>,
    pub is_recording: bool,
    pub is_playing: bool,
    pub write_position: usize,
    pub read_position: usize,
    /// Samples actually captured. Playback math uses this, never `buffer.len()`.
    pub record_length: usize,
    /// Global clock value at the first recorded sample.
    pub record_start_sample: SamplePosition,
    /// Capacity in samples.
    pub length_in_samples: usize,
    pub current_level: f32,
    pub(crate) is_queued: bool,
    /// One past the highest index written since the last clear; everything
    /// from here on is zero.
    pub(crate) high_water: usize,
    /// Next summary point to rebuild, or `None` when the summary is current.
    pub(crate) summary_next: Option<usize>,
}

impl TrackData {
    pub fn new(id: TrackId, max_samples: usize) -> Self {
        Self::with_shared(id, max_samples, SharedTrackState::new())
    }

    pub fn with_shared(id: TrackId, max_samples: usize, shared_state: SharedTrackState) -> Self {
        Self {
            id,
            shared_state,
            buffer: vec![0.0; max_samples],
            is_recording: false,
            is_playing: false,
            write_position: 0,
            read_position: 0,
            record_length: 0,
            record_start_sample: 0,
            length_in_samples: max_samples,
            current_level: 0.0,
            is_queued: false,
            high_water: 0,
            summary_next: None,
        }
    }

    pub fn has_content(&self) -> bool {
        self.record_length > 0
    }

    pub fn is_full(&self) -> bool {
        self.write_position >= self.length_in_samples
    }

    /// The captured portion of the buffer.
    pub fn recorded(&self) -> &[f32] {
        &self.buffer[..self.record_length]
    }

    pub(crate) fn begin_recording(&mut self, start: SamplePosition) {
        self.is_playing = false;
        self.is_queued = false;
        self.is_recording = true;
        self.write_position = 0;
        self.read_position = 0;
        self.record_length = 0;
        self.record_start_sample = start;
    }

    /// Appends input at the write cursor, truncating at capacity. Returns
    /// the number of samples taken.
    pub(crate) fn record(&mut self, input: &[f32]) -> usize {
        let space = self.length_in_samples - self.write_position.min(self.length_in_samples);
        let taken = input.len().min(space);
        if taken == 0 {
            return 0;
        }
        let end = self.write_position + taken;
        self.buffer[self.write_position..end].copy_from_slice(&input[..taken]);
        self.write_position = end;
        self.record_length = end;
        self.high_water = self.high_water.max(end);

        let sum_sq: f32 = input[..taken].iter().map(|s| s * s).sum();
        self.current_level = (sum_sq / taken as f32).sqrt();
        taken
    }

    /// Back to an empty, stopped track. Gain is kept.
    pub(crate) fn reset(&mut self) {
        self.buffer[..self.high_water].fill(0.0);
        self.high_water = 0;
        self.is_recording = false;
        self.is_playing = false;
        self.is_queued = false;
        self.write_position = 0;
        self.read_position = 0;
        self.record_length = 0;
        self.record_start_sample = 0;
        self.current_level = 0.0;
    }

    pub fn state(&self) -> TrackState {
        if self.is_recording {
            TrackState::Recording
        } else if self.is_queued {
            TrackState::Standby
        } else if self.is_playing {
            TrackState::Playing
        } else if self.has_content() {
            TrackState::Stopped
        } else {
            TrackState::Empty
        }
    }

    pub(crate) fn publish(&self) {
        self.shared_state.set(self.state());
        self.shared_state.set_playing(self.is_playing);
        self.shared_state.set_record_length(self.record_length);
        self.shared_state.set_record_start(self.record_start_sample);
        self.shared_state.set_read_position(self.read_position);
        self.shared_state.set_level(self.current_level);
    }

    /// Schedules a rebuild of the peak summary, spread over the next blocks.
    pub(crate) fn mark_summary_dirty(&mut self) {
        self.summary_next = Some(0);
    }

    /// Rebuilds summary points until roughly `sample_budget` samples have
    /// been scanned, always at least one point. Skipped if a reader holds
    /// the lock. Returns `true` once the summary is current.
    pub(crate) fn refresh_waveform_summary(&mut self, sample_budget: usize) -> bool {
        let Some(mut next) = self.summary_next else {
            return true;
        };
        let summary = self.shared_state.get_waveform_summary();
        let Ok(mut points) = summary.try_write() else {
            return false;
        };
        let recorded = &self.buffer[..self.record_length];
        let num_points = points.len().min(WAVEFORM_DOWNSAMPLE_SIZE).max(1);
        let mut scanned = 0;
        while next < points.len() {
            let start = next * recorded.len() / num_points;
            let end = ((next + 1) * recorded.len() / num_points).min(recorded.len());
            points[next] = recorded[start.min(end)..end]
                .iter()
                .fold(0.0_f32, |acc, s| acc.max(s.abs()));
            next += 1;
            scanned += end - start.min(end);
            if scanned >= sample_budget {
                break;
            }
        }
        drop(points);

        if next >= num_points {
            self.summary_next = None;
            true
        } else {
            self.summary_next = Some(next);
            false
        }
    }
}

impl fmt::Debug for TrackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackData")
            .field("id", &self.id)
            .field("is_recording", &self.is_recording)
            .field("is_playing", &self.is_playing)
            .field("record_length", &self.record_length)
            .field("record_start_sample", &self.record_start_sample)
            .field("length_in_samples", &self.length_in_samples)
            .finish_non_exhaustive()
    }
}
