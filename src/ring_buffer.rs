// src/ring_buffer.rs

//! Circular input store with a two-stage level gate.
//!
//! The gate has two states. `Idle` waits for a sample above the user
//! threshold (an onset). `Armed` holds until a sample falls below the
//! silence threshold; while armed the signal counts as pre-roll and no new
//! onset can be reported.

/// Level gate shared by the ring buffer (per sample) and the input
/// manager (per block).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GateState {
    #[default]
    Idle,
    Armed,
}

impl GateState {
    /// Advances the gate by one rectified sample. Returns the new state and
    /// whether this sample was an onset.
    ///
    /// The silence test runs before the onset test, so with an inverted pair
    /// (`silence > user`) a level between the two re-fires on every sample
    /// while the gate itself always ends up `Armed`.
    #[inline]
    pub fn next(self, level: f32, silence_threshold: f32, user_threshold: f32) -> (GateState, bool) {
        let state = match self {
            GateState::Armed if level < silence_threshold => GateState::Idle,
            other => other,
        };
        match state {
            GateState::Idle if level > user_threshold => (GateState::Armed, true),
            other => (other, false),
        }
    }
}

#[derive(Debug, Default)]
pub struct RingInputBuffer {
    buffer: Vec<f32>,
    write_pos: usize,
    filled: usize,
    total_written: u64,
    gate: GateState,
    sample_rate: f32,
}

impl RingInputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates room for `buffer_seconds` of audio. Setup only.
    pub fn prepare(&mut self, sample_rate: f32, buffer_seconds: f32) {
        let capacity = (sample_rate.max(1.0) * buffer_seconds.max(0.0)).ceil() as usize;
        self.buffer = vec![0.0; capacity.max(1)];
        self.sample_rate = sample_rate;
        self.write_pos = 0;
        self.filled = 0;
        self.total_written = 0;
        self.gate = GateState::Idle;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Number of samples ever written; the absolute index of the next sample.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Appends samples, overwriting the oldest data once full.
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        if capacity == 0 {
            self.total_written += samples.len() as u64;
            return;
        }

        // Only the newest `capacity` samples can survive.
        let skip = samples.len().saturating_sub(capacity);
        let mut remaining = &samples[skip..];
        self.write_pos = (self.write_pos + skip) % capacity;

        while !remaining.is_empty() {
            let space = capacity - self.write_pos;
            let chunk = remaining.len().min(space);
            self.buffer[self.write_pos..self.write_pos + chunk].copy_from_slice(&remaining[..chunk]);
            self.write_pos = (self.write_pos + chunk) % capacity;
            remaining = &remaining[chunk..];
        }

        self.filled = (self.filled + samples.len()).min(capacity);
        self.total_written += samples.len() as u64;
    }

    /// Runs the gate over a block. Returns the in-block offset of the first
    /// onset, if the block contains one.
    pub fn process_triggers(
        &mut self,
        samples: &[f32],
        silence_threshold: f32,
        user_threshold: f32,
    ) -> Option<usize> {
        let mut onset = None;
        for (i, sample) in samples.iter().enumerate() {
            let (next, fired) = self.gate.next(sample.abs(), silence_threshold, user_threshold);
            self.gate = next;
            if fired && onset.is_none() {
                onset = Some(i);
            }
        }
        onset
    }

    /// True while the signal has stayed above the silence floor since the
    /// last onset.
    pub fn is_in_pre_roll(&self) -> bool {
        self.gate == GateState::Armed
    }

    pub fn gate_state(&self) -> GateState {
        self.gate
    }

    /// Copies the most recent samples into `dest`, oldest first. Returns how
    /// many samples were copied.
    pub fn copy_recent(&self, dest: &mut [f32]) -> usize {
        let capacity = self.buffer.len();
        let count = dest.len().min(self.filled);
        if count == 0 {
            return 0;
        }
        let start = (self.write_pos + capacity - count) % capacity;
        let first = count.min(capacity - start);
        dest[..first].copy_from_slice(&self.buffer[start..start + first]);
        dest[first..count].copy_from_slice(&self.buffer[..count - first]);
        count
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.gate = GateState::Idle;
    }
}
