// src/trigger.rs

//! Single-shot trigger hand-off from the input analyser to the looper.
//!
//! One producer (`InputManager::analyze`) and one consumer
//! (`LooperAudio::process_block`). The payload is written before the
//! `fired` flag is published, and only the consumer clears the flag, so a
//! fired trigger survives until the next audio callback reads it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Position payload of a fired trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerInfo {
    /// Offset of the onset inside the analysed block.
    pub sample_in_block: usize,
    /// Absolute index of the onset in the input stream.
    pub abs_index: u64,
    pub channel: usize,
}

#[derive(Debug, Default)]
pub struct TriggerEvent {
    fired: AtomicBool,
    sample_in_block: AtomicUsize,
    abs_index: AtomicU64,
    channel: AtomicUsize,
}

impl TriggerEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a trigger. Returns `false` and leaves the pending payload
    /// untouched if an earlier trigger has not been consumed yet.
    pub fn fire(&self, sample_in_block: usize, abs_index: u64, channel: usize) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return false;
        }
        self.sample_in_block.store(sample_in_block, Ordering::Relaxed);
        self.abs_index.store(abs_index, Ordering::Relaxed);
        self.channel.store(channel, Ordering::Relaxed);
        self.fired.store(true, Ordering::Release);
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Reads the pending trigger without consuming it.
    pub fn peek(&self) -> Option<TriggerInfo> {
        if !self.fired.load(Ordering::Acquire) {
            return None;
        }
        Some(self.load_payload())
    }

    /// Consumer side: reads and clears the pending trigger.
    pub fn take(&self) -> Option<TriggerInfo> {
        if !self.fired.load(Ordering::Acquire) {
            return None;
        }
        let info = self.load_payload();
        self.fired.store(false, Ordering::Release);
        Some(info)
    }

    /// Drops any pending trigger. Only for full resets, never for re-arming.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }

    fn load_payload(&self) -> TriggerInfo {
        TriggerInfo {
            sample_in_block: self.sample_in_block.load(Ordering::Relaxed),
            abs_index: self.abs_index.load(Ordering::Relaxed),
            channel: self.channel.load(Ordering::Relaxed),
        }
    }
}
