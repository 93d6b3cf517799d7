// src/input_manager.rs

//! Live-input analysis: level metering, trigger detection and re-arming.

use crate::ring_buffer::{GateState, RingInputBuffer};
use crate::trigger::TriggerEvent;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Seconds of input kept in the ring buffer for pre-roll capture.
pub const INPUT_BUFFER_SECONDS: f32 = 2.0;
/// Upper bound on the length of a calibration pass.
pub const CALIBRATION_SECONDS: f32 = 2.0;
/// Headroom applied to the measured noise floor.
const CALIBRATION_MARGIN: f32 = 1.5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartRecConfig {
    /// Noise floor. Signal under it re-arms the trigger.
    pub silence_threshold: f32,
    /// Onset level that fires the trigger.
    pub user_threshold: f32,
}

impl Default for SmartRecConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.005,
            user_threshold: 0.05,
        }
    }
}

/// Input state shared between the UI and audio threads.
#[derive(Clone, Debug)]
pub struct SharedInputState {
    silence_threshold: Arc<AtomicU32>,
    user_threshold: Arc<AtomicU32>,
    level: Arc<AtomicU32>,
    is_triggered: Arc<AtomicBool>,
    calibration_requested: Arc<AtomicBool>,
    calibration_enabled: Arc<AtomicBool>,
}

impl SharedInputState {
    pub fn new(config: SmartRecConfig) -> Self {
        let shared = Self {
            silence_threshold: Arc::new(AtomicU32::new(0)),
            user_threshold: Arc::new(AtomicU32::new(0)),
            level: Arc::new(AtomicU32::new(0)),
            is_triggered: Arc::new(AtomicBool::new(false)),
            calibration_requested: Arc::new(AtomicBool::new(false)),
            calibration_enabled: Arc::new(AtomicBool::new(true)),
        };
        shared.set_config(config);
        shared
    }

    /// Values are stored verbatim; an inverted pair is not corrected.
    pub fn set_config(&self, config: SmartRecConfig) {
        self.silence_threshold
            .store(to_param(config.silence_threshold), Ordering::Relaxed);
        self.user_threshold
            .store(to_param(config.user_threshold), Ordering::Relaxed);
    }

    pub fn config(&self) -> SmartRecConfig {
        SmartRecConfig {
            silence_threshold: from_param(self.silence_threshold.load(Ordering::Relaxed)),
            user_threshold: from_param(self.user_threshold.load(Ordering::Relaxed)),
        }
    }

    /// Peak level of the last analysed block.
    pub fn current_level(&self) -> f32 {
        from_param(self.level.load(Ordering::Relaxed))
    }

    pub fn is_triggered(&self) -> bool {
        self.is_triggered.load(Ordering::Relaxed)
    }

    pub fn start_calibration(&self) {
        self.calibration_requested.store(true, Ordering::Relaxed);
    }

    pub fn stop_calibration(&self) {
        self.calibration_requested.store(false, Ordering::Relaxed);
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration_requested.load(Ordering::Relaxed)
    }

    pub fn set_calibration_enabled(&self, enabled: bool) {
        self.calibration_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_calibration_enabled(&self) -> bool {
        self.calibration_enabled.load(Ordering::Relaxed)
    }
}

// Thresholds and levels travel as raw `f32` bits so they read back exactly.
#[inline]
fn to_param(value: f32) -> u32 {
    value.to_bits()
}

#[inline]
fn from_param(raw: u32) -> f32 {
    f32::from_bits(raw)
}

#[derive(Debug, Default)]
struct Calibration {
    running: bool,
    samples_seen: usize,
    peak: f32,
}

pub struct InputManager {
    input_buffer: RingInputBuffer,
    shared: SharedInputState,
    trigger_event: Arc<TriggerEvent>,
    state: GateState,
    calibration: Calibration,
    sample_rate: f32,
    block_size: usize,
}

impl InputManager {
    pub fn new(config: SmartRecConfig) -> Self {
        Self {
            input_buffer: RingInputBuffer::new(),
            shared: SharedInputState::new(config),
            trigger_event: Arc::new(TriggerEvent::new()),
            state: GateState::Idle,
            calibration: Calibration::default(),
            sample_rate: 0.0,
            block_size: 0,
        }
    }

    /// Sizes the ring buffer and resets all detection state. Setup only.
    pub fn prepare(&mut self, sample_rate: f32, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.state = GateState::Idle;
        self.shared.is_triggered.store(false, Ordering::Relaxed);
        self.trigger_event.reset();
        self.input_buffer.prepare(sample_rate, INPUT_BUFFER_SECONDS);
        info!(
            "InputManager prepared: sample rate {} Hz, block size {}, ring buffer {} samples",
            sample_rate,
            block_size,
            self.input_buffer.capacity()
        );
    }

    pub fn reset(&mut self) {
        self.trigger_event.reset();
        self.state = GateState::Idle;
        self.shared.is_triggered.store(false, Ordering::Relaxed);
        debug!("InputManager reset");
    }

    /// Handle for the UI thread.
    pub fn shared(&self) -> SharedInputState {
        self.shared.clone()
    }

    /// The event this manager fires; hand it to `LooperAudio::set_trigger_reference`.
    pub fn trigger_event(&self) -> Arc<TriggerEvent> {
        self.trigger_event.clone()
    }

    pub fn set_config(&self, config: SmartRecConfig) {
        self.shared.set_config(config);
    }

    pub fn config(&self) -> SmartRecConfig {
        self.shared.config()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn current_level(&self) -> f32 {
        self.shared.current_level()
    }

    pub fn start_calibration(&self) {
        self.shared.start_calibration();
    }

    pub fn stop_calibration(&self) {
        self.shared.stop_calibration();
    }

    pub fn is_calibrating(&self) -> bool {
        self.shared.is_calibrating()
    }

    pub fn set_calibration_enabled(&self, enabled: bool) {
        self.shared.set_calibration_enabled(enabled);
    }

    /// Copies the most recent buffered input, oldest first.
    pub fn copy_pre_roll(&self, dest: &mut [f32]) -> usize {
        self.input_buffer.copy_recent(dest)
    }

    /// Analyses one block of (mono) input. Called once per audio block.
    pub fn analyze(&mut self, input: &[f32]) {
        if input.is_empty() {
            return;
        }

        let block_start = self.input_buffer.total_written();
        self.input_buffer.write(input);

        let peak = input.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.shared.level.store(to_param(peak), Ordering::Relaxed);

        if self.update_calibration(input.len(), peak) {
            return;
        }

        let config = self.shared.config();
        let onset = self.input_buffer.process_triggers(
            input,
            config.silence_threshold,
            config.user_threshold,
        );

        match (self.state, onset) {
            (GateState::Idle, Some(offset)) => {
                self.state = GateState::Armed;
                self.trigger_event.fire(offset, block_start + offset as u64, 0);
            }
            (GateState::Armed, _) if !self.input_buffer.is_in_pre_roll() => {
                // The pending event, if any, stays for the consumer.
                self.state = GateState::Idle;
            }
            _ => {}
        }
        self.shared
            .is_triggered
            .store(self.state == GateState::Armed, Ordering::Relaxed);
    }

    /// Returns true while a calibration pass owns the input.
    fn update_calibration(&mut self, block_len: usize, peak: f32) -> bool {
        let requested = self.shared.is_calibrating();
        if requested && !self.calibration.running {
            self.calibration = Calibration {
                running: true,
                samples_seen: 0,
                peak: 0.0,
            };
        }
        if !self.calibration.running {
            return false;
        }

        if requested {
            self.calibration.peak = self.calibration.peak.max(peak);
            self.calibration.samples_seen += block_len;
            let limit = (self.sample_rate * CALIBRATION_SECONDS) as usize;
            if self.calibration.samples_seen < limit.max(1) {
                return true;
            }
            self.shared.stop_calibration();
        }

        self.calibration.running = false;
        if self.shared.is_calibration_enabled() && self.calibration.samples_seen > 0 {
            let mut config = self.shared.config();
            config.silence_threshold =
                (self.calibration.peak * CALIBRATION_MARGIN).min(config.user_threshold);
            self.shared.set_config(config);
        }
        true
    }

    /// Root-mean-square amplitude across all channels.
    pub fn compute_energy(channels: &[&[f32]]) -> f32 {
        let mut total = 0.0_f32;
        let mut count = 0_usize;
        for channel in channels {
            total += channel.iter().map(|s| s * s).sum::<f32>();
            count += channel.len();
        }
        if count == 0 {
            return 0.0;
        }
        (total / count as f32).sqrt()
    }
}
