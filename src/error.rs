// src/error.rs
use crate::looper::TrackId;
use thiserror::Error;

/// Failures visible to the control thread. The audio thread never fails;
/// unknown track ids are ignored rather than reported.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LooperError {
    #[error("command queue is full, the audio thread is not keeping up")]
    CommandQueueFull,
    #[error("track {0} already exists")]
    DuplicateTrack(TrackId),
    #[error("track limit of {0} reached")]
    TrackLimitReached(usize),
    #[error("sequential recording accepts at most {0} tracks")]
    SequenceTooLong(usize),
}
