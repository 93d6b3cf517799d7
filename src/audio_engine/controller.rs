// src/audio_engine/controller.rs

use super::command::{LooperCommand, LooperEvent, SequentialQueue};
use super::looper_track::TrackData;
use crate::error::LooperError;
use crate::looper::{SamplePosition, SharedTrackState, SharedTransportState, TrackId, TrackState, MAX_TRACKS};
use crate::timeline::{LooperConfig, TrackPlacement};
use ringbuf::{HeapConsumer, HeapProducer};
use std::collections::BTreeMap;

/// Receives recording lifecycle notifications on the control thread.
pub trait LooperListener {
    fn on_recording_started(&mut self, track_id: TrackId);
    fn on_recording_stopped(&mut self, track_id: TrackId);
    fn on_master_established(&mut self, _track_id: TrackId, _length: usize) {}
    fn on_undo(&mut self, _track_id: TrackId) {}
    fn on_sequence_finished(&mut self) {}
}

/// Control-thread handle to a `LooperAudio`. Mutations are queued as
/// commands; queries read the atomics the engine publishes, so they lag the
/// audio thread by at most one block.
pub struct LooperController {
    command_producer: HeapProducer<LooperCommand>,
    event_consumer: HeapConsumer<LooperEvent>,
    tracks: BTreeMap<TrackId, SharedTrackState>,
    transport: SharedTransportState,
    config: LooperConfig,
    max_samples: usize,
}

impl LooperController {
    pub(crate) fn new(
        command_producer: HeapProducer<LooperCommand>,
        event_consumer: HeapConsumer<LooperEvent>,
        transport: SharedTransportState,
        config: LooperConfig,
        max_samples: usize,
    ) -> Self {
        Self {
            command_producer,
            event_consumer,
            tracks: BTreeMap::new(),
            transport,
            config,
            max_samples,
        }
    }

    fn send(&mut self, command: LooperCommand) -> Result<(), LooperError> {
        self.command_producer.push(command).map_err(|_| {
            log::warn!("Looper command queue is full, dropping command");
            LooperError::CommandQueueFull
        })
    }

    /// Allocates the track here, off the audio thread, and hands it over.
    pub fn add_track(&mut self, id: TrackId) -> Result<(), LooperError> {
        if self.tracks.contains_key(&id) {
            return Err(LooperError::DuplicateTrack(id));
        }
        if self.tracks.len() >= MAX_TRACKS {
            return Err(LooperError::TrackLimitReached(MAX_TRACKS));
        }
        let shared = SharedTrackState::new();
        let track = Box::new(TrackData::with_shared(id, self.max_samples, shared.clone()));
        self.send(LooperCommand::AddTrack(track))?;
        self.tracks.insert(id, shared);
        log::debug!("Added track {} ({} samples)", id, self.max_samples);
        Ok(())
    }

    pub fn start_recording(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::StartRecording(id))
    }

    pub fn stop_recording(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::StopRecording(id))
    }

    pub fn start_playing(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::StartPlaying(id))
    }

    pub fn stop_playing(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::StopPlaying(id))
    }

    pub fn clear_track(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::ClearTrack(id))
    }

    pub fn all_clear(&mut self) -> Result<(), LooperError> {
        self.send(LooperCommand::AllClear)
    }

    pub fn stop_all_tracks(&mut self) -> Result<(), LooperError> {
        self.send(LooperCommand::StopAllTracks)
    }

    pub fn start_sequential_recording(&mut self, ids: &[TrackId]) -> Result<(), LooperError> {
        let queue = SequentialQueue::from_slice(ids).ok_or(LooperError::SequenceTooLong(MAX_TRACKS))?;
        self.send(LooperCommand::StartSequentialRecording(queue))
    }

    pub fn stop_recording_and_continue(&mut self) -> Result<(), LooperError> {
        self.send(LooperCommand::StopRecordingAndContinue)
    }

    pub fn backup_track_before_record(&mut self, id: TrackId) -> Result<(), LooperError> {
        self.send(LooperCommand::BackupTrack(id))
    }

    pub fn undo_last_recording(&mut self) -> Result<(), LooperError> {
        self.send(LooperCommand::UndoLastRecording)
    }

    pub fn master_position_reset(&mut self) -> Result<(), LooperError> {
        self.send(LooperCommand::MasterPositionReset)
    }

    /// Applied immediately through the track's gain atomic.
    pub fn set_track_gain(&self, id: TrackId, gain: f32) {
        if let Some(shared) = self.tracks.get(&id) {
            shared.set_gain(gain);
        }
    }

    // --- Queries ---

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn track_shared_state(&self, id: TrackId) -> Option<&SharedTrackState> {
        self.tracks.get(&id)
    }

    pub fn transport(&self) -> &SharedTransportState {
        &self.transport
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    pub fn track_state(&self, id: TrackId) -> Option<TrackState> {
        self.tracks.get(&id).map(|s| s.get())
    }

    pub fn is_any_recording(&self) -> bool {
        self.tracks.values().any(|s| s.get() == TrackState::Recording)
    }

    pub fn is_any_playing(&self) -> bool {
        self.tracks.values().any(|s| s.is_playing())
    }

    pub fn has_recorded_tracks(&self) -> bool {
        self.tracks.values().any(|s| s.get_record_length() > 0)
    }

    pub fn track_rms(&self, id: TrackId) -> f32 {
        self.tracks.get(&id).map_or(0.0, |s| s.get_level())
    }

    pub fn track_gain(&self, id: TrackId) -> Option<f32> {
        self.tracks.get(&id).map(|s| s.get_gain())
    }

    pub fn track_length(&self, id: TrackId) -> usize {
        self.tracks.get(&id).map_or(0, |s| s.get_record_length())
    }

    pub fn track_record_start(&self, id: TrackId) -> SamplePosition {
        self.tracks.get(&id).map_or(0, |s| s.get_record_start())
    }

    pub fn waveform_summary(&self, id: TrackId) -> Option<Vec<f32>> {
        let summary = self.tracks.get(&id)?.get_waveform_summary();
        let points = summary.read().ok()?;
        Some(points.clone())
    }

    pub fn master_track_id(&self) -> Option<TrackId> {
        self.transport.get_master_track_id()
    }

    pub fn master_loop_length(&self) -> usize {
        self.transport.get_master_loop_length()
    }

    pub fn master_start_sample(&self) -> SamplePosition {
        self.transport.get_master_start_sample()
    }

    pub fn current_sample_position(&self) -> SamplePosition {
        self.transport.get_current_sample_position()
    }

    pub fn master_normalized_position(&self) -> f32 {
        self.transport.get_master_normalized_position()
    }

    pub fn is_recording_active(&self) -> bool {
        self.transport.is_sequence_active() || self.is_any_recording()
    }

    pub fn current_track_id(&self) -> Option<TrackId> {
        self.transport.get_sequence_track_id()
    }

    pub fn is_last_track_recording(&self) -> bool {
        self.transport.is_sequence_on_last()
    }

    /// Where a track sits on a circular master-cycle display.
    pub fn track_placement(&self, id: TrackId) -> Option<TrackPlacement> {
        let shared = self.tracks.get(&id)?;
        TrackPlacement::new(
            shared.get_record_length(),
            shared.get_record_start(),
            self.master_loop_length(),
            self.master_start_sample(),
            &self.config,
        )
    }

    /// Drains engine events, logging them and forwarding to `listener`.
    /// Returns how many were handled.
    pub fn dispatch_events(&mut self, listener: &mut dyn LooperListener) -> usize {
        let mut handled = 0;
        while let Some(event) = self.event_consumer.pop() {
            handled += 1;
            match event {
                LooperEvent::TrackAdded { id, shared } => {
                    // The engine's copy wins over anything queued here.
                    self.tracks.insert(id, shared);
                }
                LooperEvent::RecordingStarted(id) => {
                    log::info!("Track {} recording", id);
                    listener.on_recording_started(id);
                }
                LooperEvent::RecordingStopped { id, length } => {
                    log::info!("Track {} stopped recording ({} samples)", id, length);
                    listener.on_recording_stopped(id);
                }
                LooperEvent::MasterEstablished { id, length, start } => {
                    log::info!("Master loop set by track {}: {} samples from sample {}", id, length, start);
                    listener.on_master_established(id, length);
                }
                LooperEvent::UndoApplied(id) => {
                    log::info!("Undid last recording on track {}", id);
                    listener.on_undo(id);
                }
                LooperEvent::SequenceFinished => {
                    log::info!("Sequential recording finished");
                    listener.on_sequence_finished();
                }
                LooperEvent::Retired(track) => {
                    log::warn!("Audio thread rejected track {}, releasing it", track.id);
                    let stale = self
                        .tracks
                        .get(&track.id)
                        .is_some_and(|shared| shared.is_same_track(&track.shared_state));
                    if stale {
                        self.tracks.remove(&track.id);
                    }
                }
            }
        }
        handled
    }
}
