// src/audio_engine/history.rs

use super::looper_track::TrackData;
use crate::looper::{SamplePosition, TrackId};

/// Single-slot undo snapshot. The snapshot store is allocated once at full
/// track capacity so backing up never allocates.
///
/// Copying is lazy: taking a snapshot only records the track's metadata, and
/// old samples are moved into the store just before they are overwritten.
/// Until then, `[saved..previous_high_water)` of the snapshot still lives,
/// untouched, in the track itself.
pub struct TrackHistory {
    track_id: Option<TrackId>,
    previous_buffer: Vec<f32>,
    previous_high_water: usize,
    previous_length: usize,
    previous_record_start: SamplePosition,
    /// Leading samples already copied into `previous_buffer`.
    saved: usize,
}

impl TrackHistory {
    pub fn new(max_samples: usize) -> Self {
        Self {
            track_id: None,
            previous_buffer: vec![0.0; max_samples],
            previous_high_water: 0,
            previous_length: 0,
            previous_record_start: 0,
            saved: 0,
        }
    }

    pub fn track_id(&self) -> Option<TrackId> {
        self.track_id
    }

    pub fn is_tracking(&self, id: TrackId) -> bool {
        self.track_id == Some(id)
    }

    /// Replaces any earlier snapshot. Copies nothing yet.
    pub fn backup(&mut self, track: &TrackData) {
        self.previous_high_water = track.high_water.min(self.previous_buffer.len());
        self.previous_length = track.record_length;
        self.previous_record_start = track.record_start_sample;
        self.saved = 0;
        self.track_id = Some(track.id);
    }

    /// Copies the snapshot's samples below `end` out of the track before
    /// they get overwritten. Must run ahead of every write to the tracked
    /// buffer; writes go front to back, so a prefix is enough.
    pub fn preserve(&mut self, track: &TrackData, end: usize) {
        if !self.is_tracking(track.id) {
            return;
        }
        let end = end.min(self.previous_high_water);
        if end > self.saved {
            self.previous_buffer[self.saved..end].copy_from_slice(&track.buffer[self.saved..end]);
            self.saved = end;
        }
    }

    /// Writes the snapshot back, leaving the whole buffer bit-identical to
    /// when it was taken. Cursors and flags are left to the caller.
    pub fn restore_into(&self, track: &mut TrackData) {
        let restored = self.previous_high_water.min(track.buffer.len());
        let saved = self.saved.min(restored);
        track.buffer[..saved].copy_from_slice(&self.previous_buffer[..saved]);
        if track.high_water > restored {
            track.buffer[restored..track.high_water].fill(0.0);
        }
        track.high_water = restored;
        track.record_length = self.previous_length;
        track.write_position = self.previous_length;
        track.record_start_sample = self.previous_record_start;
    }

    pub fn clear(&mut self) {
        self.track_id = None;
        self.previous_high_water = 0;
        self.previous_length = 0;
        self.previous_record_start = 0;
        self.saved = 0;
    }
}
