// src/looper.rs
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

pub const MAX_TRACKS: usize = 16;
pub const WAVEFORM_DOWNSAMPLE_SIZE: usize = 512;

/// Fixed-point scale used to store `f32` parameters inside `AtomicU32`s.
pub const PARAM_SCALER: f32 = 1_000_000.0;

pub type TrackId = u32;

/// Absolute position on the global transport clock.
pub type SamplePosition = u64;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Empty,
    Standby,
    Recording,
    Playing,
    Stopped,
}

impl From<u8> for TrackState {
    fn from(val: u8) -> Self {
        match val {
            0 => TrackState::Empty,
            1 => TrackState::Standby,
            2 => TrackState::Recording,
            3 => TrackState::Playing,
            4 => TrackState::Stopped,
            _ => TrackState::Empty, // Default fallback
        }
    }
}

/// Per-track state shared between the UI and audio threads.
///
/// The audio thread is the only writer of everything except `gain`, which
/// the control thread may change at any time. `playing` is published apart
/// from `state`: a queued track shows `Standby` but is still mixed.
#[derive(Clone, Debug)]
pub struct SharedTrackState {
    state: Arc<AtomicU8>,
    playing: Arc<AtomicBool>,
    gain: Arc<AtomicU32>,
    level: Arc<AtomicU32>,
    record_length: Arc<AtomicUsize>,
    record_start: Arc<AtomicU64>,
    read_position: Arc<AtomicUsize>,
    waveform_summary: Arc<RwLock<Vec<f32>>>,
}

impl SharedTrackState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TrackState::Empty as u8)),
            playing: Arc::new(AtomicBool::new(false)),
            gain: Arc::new(AtomicU32::new(PARAM_SCALER as u32)),
            level: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
            record_length: Arc::new(AtomicUsize::new(0)),
            record_start: Arc::new(AtomicU64::new(0)),
            read_position: Arc::new(AtomicUsize::new(0)),
            waveform_summary: Arc::new(RwLock::new(vec![0.0; WAVEFORM_DOWNSAMPLE_SIZE])),
        }
    }

    pub fn get(&self) -> TrackState {
        self.state.load(Ordering::Relaxed).into()
    }

    pub fn set(&self, state: TrackState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn get_gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    /// Negative gains are clamped to silence.
    pub fn set_gain(&self, gain: f32) {
        let scaled = (gain.max(0.0) * PARAM_SCALER).min(u32::MAX as f32) as u32;
        self.gain.store(scaled, Ordering::Relaxed);
    }

    /// Last measured RMS level after gain. Can exceed 1.0.
    pub fn get_level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get_record_length(&self) -> usize {
        self.record_length.load(Ordering::Relaxed)
    }

    pub fn set_record_length(&self, length: usize) {
        self.record_length.store(length, Ordering::Relaxed);
    }

    pub fn get_record_start(&self) -> SamplePosition {
        self.record_start.load(Ordering::Relaxed)
    }

    pub fn set_record_start(&self, start: SamplePosition) {
        self.record_start.store(start, Ordering::Relaxed);
    }

    pub fn get_read_position(&self) -> usize {
        self.read_position.load(Ordering::Relaxed)
    }

    pub fn set_read_position(&self, position: usize) {
        self.read_position.store(position, Ordering::Relaxed);
    }

    pub fn get_waveform_summary(&self) -> Arc<RwLock<Vec<f32>>> {
        self.waveform_summary.clone()
    }

    /// True when both handles point at the same track.
    pub fn is_same_track(&self, other: &SharedTrackState) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for SharedTrackState {
    fn default() -> Self {
        Self::new()
    }
}

const NO_MASTER: i64 = -1;

/// Master-loop and clock state shared between the UI and audio threads.
#[derive(Clone, Debug)]
pub struct SharedTransportState {
    master_track_id: Arc<AtomicI64>,
    master_loop_length: Arc<AtomicUsize>,
    master_read_position: Arc<AtomicUsize>,
    master_start_sample: Arc<AtomicU64>,
    current_sample_position: Arc<AtomicU64>,
    sequence_active: Arc<AtomicBool>,
    sequence_track_id: Arc<AtomicI64>,
    sequence_on_last: Arc<AtomicBool>,
}

impl SharedTransportState {
    pub fn new() -> Self {
        Self {
            master_track_id: Arc::new(AtomicI64::new(NO_MASTER)),
            master_loop_length: Arc::new(AtomicUsize::new(0)),
            master_read_position: Arc::new(AtomicUsize::new(0)),
            master_start_sample: Arc::new(AtomicU64::new(0)),
            current_sample_position: Arc::new(AtomicU64::new(0)),
            sequence_active: Arc::new(AtomicBool::new(false)),
            sequence_track_id: Arc::new(AtomicI64::new(NO_MASTER)),
            sequence_on_last: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get_master_track_id(&self) -> Option<TrackId> {
        let id = self.master_track_id.load(Ordering::Relaxed);
        if id < 0 {
            None
        } else {
            Some(id as TrackId)
        }
    }

    pub fn set_master_track_id(&self, id: Option<TrackId>) {
        let raw = id.map(i64::from).unwrap_or(NO_MASTER);
        self.master_track_id.store(raw, Ordering::Relaxed);
    }

    pub fn get_master_loop_length(&self) -> usize {
        self.master_loop_length.load(Ordering::Relaxed)
    }

    pub fn set_master_loop_length(&self, length: usize) {
        self.master_loop_length.store(length, Ordering::Relaxed);
    }

    pub fn get_master_read_position(&self) -> usize {
        self.master_read_position.load(Ordering::Relaxed)
    }

    pub fn set_master_read_position(&self, position: usize) {
        self.master_read_position.store(position, Ordering::Relaxed);
    }

    pub fn get_master_start_sample(&self) -> SamplePosition {
        self.master_start_sample.load(Ordering::Relaxed)
    }

    pub fn set_master_start_sample(&self, start: SamplePosition) {
        self.master_start_sample.store(start, Ordering::Relaxed);
    }

    pub fn get_current_sample_position(&self) -> SamplePosition {
        self.current_sample_position.load(Ordering::Relaxed)
    }

    pub fn set_current_sample_position(&self, position: SamplePosition) {
        self.current_sample_position.store(position, Ordering::Relaxed);
    }

    pub fn is_sequence_active(&self) -> bool {
        self.sequence_active.load(Ordering::Relaxed)
    }

    pub fn get_sequence_track_id(&self) -> Option<TrackId> {
        let id = self.sequence_track_id.load(Ordering::Relaxed);
        if id < 0 {
            None
        } else {
            Some(id as TrackId)
        }
    }

    pub fn is_sequence_on_last(&self) -> bool {
        self.sequence_on_last.load(Ordering::Relaxed)
    }

    pub fn set_sequence(&self, active: bool, current: Option<TrackId>, on_last: bool) {
        self.sequence_active.store(active, Ordering::Relaxed);
        self.sequence_track_id
            .store(current.map(i64::from).unwrap_or(NO_MASTER), Ordering::Relaxed);
        self.sequence_on_last.store(on_last, Ordering::Relaxed);
    }

    /// Master read position over loop length, or 0.0 without a master.
    pub fn get_master_normalized_position(&self) -> f32 {
        let length = self.get_master_loop_length();
        if length == 0 {
            return 0.0;
        }
        let position = self.get_master_read_position().min(length - 1);
        ((position as f64 / length as f64) as f32).min(1.0 - f32::EPSILON)
    }
}

impl Default for SharedTransportState {
    fn default() -> Self {
        Self::new()
    }
}
