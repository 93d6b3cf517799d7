// src/audio_engine/command.rs

use super::looper_track::TrackData;
use crate::looper::{SamplePosition, SharedTrackState, TrackId, MAX_TRACKS};

/// Control-plane requests, consumed at the start of each audio block.
#[derive(Debug)]
pub enum LooperCommand {
    /// Pre-allocated on the control thread.
    AddTrack(Box<TrackData>),
    StartRecording(TrackId),
    StopRecording(TrackId),
    StartPlaying(TrackId),
    StopPlaying(TrackId),
    ClearTrack(TrackId),
    AllClear,
    StopAllTracks,
    StartSequentialRecording(SequentialQueue),
    StopRecordingAndContinue,
    BackupTrack(TrackId),
    UndoLastRecording,
    MasterPositionReset,
}

/// Notifications from the audio thread, drained by the control thread.
#[derive(Debug)]
pub enum LooperEvent {
    TrackAdded {
        id: TrackId,
        shared: SharedTrackState,
    },
    RecordingStarted(TrackId),
    RecordingStopped {
        id: TrackId,
        length: usize,
    },
    MasterEstablished {
        id: TrackId,
        length: usize,
        start: SamplePosition,
    },
    UndoApplied(TrackId),
    SequenceFinished,
    /// A track the engine could not take; freed by whoever drains events.
    Retired(Box<TrackData>),
}

/// Fixed-size ordered list of tracks for sequential recording. `Copy`, so
/// it crosses into the audio thread without allocating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequentialQueue {
    ids: [TrackId; MAX_TRACKS],
    len: usize,
}

impl SequentialQueue {
    /// `None` if more than `MAX_TRACKS` ids are given.
    pub fn from_slice(ids: &[TrackId]) -> Option<Self> {
        if ids.len() > MAX_TRACKS {
            return None;
        }
        let mut queue = Self::default();
        queue.ids[..ids.len()].copy_from_slice(ids);
        queue.len = ids.len();
        Some(queue)
    }

    pub fn as_slice(&self) -> &[TrackId] {
        &self.ids[..self.len]
    }

    pub fn get(&self, index: usize) -> Option<TrackId> {
        self.as_slice().get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.as_slice().contains(&id)
    }
}
