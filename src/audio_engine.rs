// src/audio_engine.rs

pub mod command;
pub mod controller;
mod history;
pub mod looper_track;

use crate::looper::{SamplePosition, SharedTransportState, TrackId, TrackState, MAX_TRACKS};
use crate::timeline::{loop_ratio, phase_offset, LooperConfig};
use crate::trigger::TriggerEvent;
use command::{LooperCommand, LooperEvent, SequentialQueue};
use controller::LooperController;
use history::TrackHistory;
use looper_track::{TrackData, SUMMARY_SAMPLES_PER_BLOCK};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::Arc;

const COMMAND_QUEUE_SIZE: usize = 256;
const EVENT_QUEUE_SIZE: usize = 1024;

/// Length the track loops over: one master cycle when its ratio snaps to 1.0,
/// its own recorded length otherwise.
fn playback_length(track: &TrackData, master_len: usize, tolerance: f64) -> usize {
    if master_len > 0 && loop_ratio(track.record_length, master_len, tolerance) == 1.0 {
        master_len.min(track.length_in_samples)
    } else {
        track.record_length
    }
}

/// The looper core. Owns every track buffer and the global sample clock, and
/// runs entirely on the audio thread once constructed. Nothing reachable from
/// `process_block` allocates, locks or logs.
pub struct LooperAudio {
    command_consumer: HeapConsumer<LooperCommand>,
    event_producer: HeapProducer<LooperEvent>,
    // Sorted by id.
    tracks: Vec<Box<TrackData>>,
    last_history: TrackHistory,
    transport: SharedTransportState,
    trigger_ref: Option<Arc<TriggerEvent>>,
    config: LooperConfig,
    sample_rate: f32,
    samples_per_block: usize,
    max_samples: usize,

    master_track_id: Option<TrackId>,
    master_loop_length: usize,
    master_read_position: usize,
    master_start_sample: SamplePosition,
    /// Absolute index of the first sample of the segment being processed.
    current_sample_position: SamplePosition,

    recording_queue: SequentialQueue,
    current_recording_index: Option<usize>,
    sequence_active: bool,
}

impl LooperAudio {
    /// Builds the engine together with the controller that drives it from
    /// another thread. Track buffers are sized here and never grow.
    pub fn new(sample_rate: f32, config: LooperConfig) -> (Self, LooperController) {
        let max_samples = config.max_samples(sample_rate);
        let (command_producer, command_consumer) = HeapRb::<LooperCommand>::new(COMMAND_QUEUE_SIZE).split();
        let (event_producer, event_consumer) = HeapRb::<LooperEvent>::new(EVENT_QUEUE_SIZE).split();
        let transport = SharedTransportState::new();

        let engine = Self {
            command_consumer,
            event_producer,
            tracks: Vec::with_capacity(MAX_TRACKS),
            last_history: TrackHistory::new(max_samples),
            transport: transport.clone(),
            trigger_ref: None,
            config,
            sample_rate,
            samples_per_block: 0,
            max_samples,
            master_track_id: None,
            master_loop_length: 0,
            master_read_position: 0,
            master_start_sample: 0,
            current_sample_position: 0,
            recording_queue: SequentialQueue::default(),
            current_recording_index: None,
            sequence_active: false,
        };
        let controller = LooperController::new(command_producer, event_consumer, transport, config, max_samples);
        (engine, controller)
    }

    pub fn prepare_to_play(&mut self, samples_per_block: usize, sample_rate: f32) {
        self.samples_per_block = samples_per_block;
        self.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn samples_per_block(&self) -> usize {
        self.samples_per_block
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn set_trigger_reference(&mut self, trigger: Arc<TriggerEvent>) {
        self.trigger_ref = Some(trigger);
    }

    pub fn transport(&self) -> SharedTransportState {
        self.transport.clone()
    }

    fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.binary_search_by_key(&id, |t| t.id).ok()
    }

    fn emit(&mut self, event: LooperEvent) {
        // A full queue means nobody is draining; the event is dropped.
        let _ = self.event_producer.push(event);
    }

    // --- Track management ---

    /// Creates a track at full capacity. Allocates, so call it during setup
    /// or go through the controller instead. Duplicates are ignored.
    pub fn add_track(&mut self, id: TrackId) {
        if self.track_index(id).is_some() {
            return;
        }
        let track = Box::new(TrackData::new(id, self.max_samples));
        self.insert_track(track);
    }

    fn insert_track(&mut self, track: Box<TrackData>) {
        let id = track.id;
        match self.tracks.binary_search_by_key(&id, |t| t.id) {
            Ok(_) => self.emit(LooperEvent::Retired(track)),
            Err(_) if self.tracks.len() >= MAX_TRACKS => self.emit(LooperEvent::Retired(track)),
            Err(pos) => {
                track.publish();
                let shared = track.shared_state.clone();
                self.tracks.insert(pos, track);
                self.emit(LooperEvent::TrackAdded { id, shared });
            }
        }
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().map(|t| t.id)
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackData> {
        self.track_index(id).map(|idx| &*self.tracks[idx])
    }

    // --- Recording ---

    pub fn start_recording(&mut self, id: TrackId) {
        self.start_recording_at(id, self.current_sample_position);
    }

    fn start_recording_at(&mut self, id: TrackId, start: SamplePosition) {
        let Some(idx) = self.track_index(id) else {
            return;
        };
        if self.tracks[idx].is_recording {
            return;
        }
        self.last_history.backup(&self.tracks[idx]);

        let track = &mut self.tracks[idx];
        track.begin_recording(start);
        track.publish();
        self.emit(LooperEvent::RecordingStarted(id));
    }

    /// Ends the take and, if anything was captured, starts phase-aligned
    /// playback. No-op for tracks that are not recording.
    pub fn stop_recording(&mut self, id: TrackId) {
        if let Some(idx) = self.track_index(id) {
            self.finalize_recording(idx, true);
        }
    }

    fn finalize_recording(&mut self, idx: usize, resume_playback: bool) {
        let track = &mut self.tracks[idx];
        if !track.is_recording {
            return;
        }
        track.is_recording = false;
        track.record_length = track.write_position;
        track.current_level = 0.0;
        let id = track.id;
        let length = track.record_length;
        let start = track.record_start_sample;

        if length > 0 && self.master_track_id.is_none() {
            self.master_track_id = Some(id);
            self.master_loop_length = length;
            self.master_start_sample = start;
            // Master position is kept relative to the segment start and
            // advanced past the segment once it has been mixed.
            let since_start = self.current_sample_position as i128 - start as i128;
            self.master_read_position = since_start.rem_euclid(length as i128) as usize;
            self.emit(LooperEvent::MasterEstablished { id, length, start });
        }

        let track = &mut self.tracks[idx];
        track.mark_summary_dirty();
        track.publish();
        self.emit(LooperEvent::RecordingStopped { id, length });

        if resume_playback && length > 0 {
            self.start_playing(id);
        }
    }

    fn record_into_tracks(&mut self, input: &[f32]) {
        if input.is_empty() {
            return;
        }
        for idx in 0..self.tracks.len() {
            if !self.tracks[idx].is_recording {
                continue;
            }
            let end = self.tracks[idx].write_position + input.len();
            self.last_history.preserve(&self.tracks[idx], end);
            self.tracks[idx].record(input);
            if self.tracks[idx].is_full() {
                self.finalize_recording(idx, true);
            }
        }
    }

    // --- Playback ---

    /// Read position that puts the track in phase with the master cycle.
    fn aligned_read_position(&self, track: &TrackData) -> usize {
        let master_len = self.master_loop_length;
        let len = playback_length(track, master_len, self.config.loop_ratio_tolerance);
        if len == 0 || master_len == 0 {
            return 0;
        }
        let offset = phase_offset(track.record_start_sample, self.master_start_sample, master_len);
        let into_cycle = (self.master_read_position % master_len + master_len - offset) % master_len;
        into_cycle % len
    }

    pub fn start_playing(&mut self, id: TrackId) {
        let Some(idx) = self.track_index(id) else {
            return;
        };
        let track = &self.tracks[idx];
        if track.is_recording || !track.has_content() {
            return;
        }
        let read_position = self.aligned_read_position(track);

        let track = &mut self.tracks[idx];
        track.read_position = read_position;
        track.is_playing = true;
        track.publish();
    }

    pub fn stop_playing(&mut self, id: TrackId) {
        let Some(idx) = self.track_index(id) else {
            return;
        };
        let track = &mut self.tracks[idx];
        track.is_playing = false;
        track.current_level = 0.0;
        track.publish();
    }

    fn mix_tracks_to_output(&mut self, output: &mut [f32]) {
        if output.is_empty() {
            return;
        }
        let master_len = self.master_loop_length;
        let tolerance = self.config.loop_ratio_tolerance;

        for track in self.tracks.iter_mut() {
            if !track.is_playing {
                continue;
            }
            let len = playback_length(track, master_len, tolerance);
            if len == 0 {
                continue;
            }
            if track.read_position >= len {
                track.read_position %= len;
            }
            let gain = track.shared_state.get_gain();
            let mut sum_sq = 0.0_f32;

            for out in output.iter_mut() {
                // Past the captured take the track is padded with silence.
                let sample = if track.read_position < track.record_length {
                    track.buffer[track.read_position] * gain
                } else {
                    0.0
                };
                *out += sample;
                sum_sq += sample * sample;
                track.read_position += 1;
                if track.read_position >= len {
                    track.read_position = 0;
                }
            }

            track.current_level = (sum_sq / output.len() as f32).sqrt();
            track.shared_state.set_level(track.current_level);
            track.shared_state.set_read_position(track.read_position);
        }
    }

    // --- Whole-engine operations ---

    /// Empties one track. Master timing is left untouched even when the
    /// cleared track was the master.
    pub fn clear_track(&mut self, id: TrackId) {
        let Some(idx) = self.track_index(id) else {
            return;
        };
        let high_water = self.tracks[idx].high_water;
        self.last_history.preserve(&self.tracks[idx], high_water);
        let track = &mut self.tracks[idx];
        track.reset();
        track.mark_summary_dirty();
        track.publish();
    }

    /// Full reset: every track, master timing, the clock, the sequence and
    /// the undo slot. Any pending trigger is discarded.
    pub fn all_clear(&mut self) {
        for track in self.tracks.iter_mut() {
            track.reset();
            track.mark_summary_dirty();
            track.publish();
        }
        self.master_track_id = None;
        self.master_loop_length = 0;
        self.master_read_position = 0;
        self.master_start_sample = 0;
        self.current_sample_position = 0;
        self.clear_sequence();
        self.last_history.clear();
        if let Some(trigger) = &self.trigger_ref {
            trigger.reset();
        }
        self.publish_transport();
    }

    /// Stops playback everywhere and closes any take without auto-play.
    pub fn stop_all_tracks(&mut self) {
        self.clear_sequence();
        for idx in 0..self.tracks.len() {
            self.finalize_recording(idx, false);
            let track = &mut self.tracks[idx];
            track.is_playing = false;
            track.current_level = 0.0;
            track.publish();
        }
    }

    /// Restarts the master cycle at the current clock.
    pub fn master_position_reset(&mut self) {
        self.master_read_position = 0;
        self.transport.set_master_read_position(0);
    }

    // --- Sequential recording ---

    /// Loads the queue; recording starts on the next trigger or
    /// `stop_recording_and_continue`.
    pub fn start_sequential_recording(&mut self, queue: SequentialQueue) {
        self.clear_sequence();
        self.recording_queue = queue;
        self.sequence_active = !queue.is_empty();
        for track in self.tracks.iter_mut() {
            if queue.contains(track.id) && !track.is_recording {
                track.is_queued = true;
                track.publish();
            }
        }
        self.publish_sequence();
    }

    pub fn stop_recording_and_continue(&mut self) {
        self.advance_sequence(self.current_sample_position);
    }

    /// Closes the current take (if any) and opens the next one at `at`.
    fn advance_sequence(&mut self, at: SamplePosition) {
        if !self.sequence_active {
            return;
        }
        let next_index = match self.current_recording_index {
            None => 0,
            Some(index) => {
                if let Some(idx) = self.recording_queue.get(index).and_then(|id| self.track_index(id)) {
                    self.finalize_recording(idx, true);
                }
                index + 1
            }
        };

        match self.recording_queue.get(next_index) {
            Some(id) => {
                self.current_recording_index = Some(next_index);
                self.start_recording_at(id, at);
            }
            None => {
                self.clear_sequence();
                self.emit(LooperEvent::SequenceFinished);
            }
        }
        self.publish_sequence();
    }

    fn clear_sequence(&mut self) {
        self.recording_queue = SequentialQueue::default();
        self.current_recording_index = None;
        self.sequence_active = false;
        for track in self.tracks.iter_mut() {
            if track.is_queued {
                track.is_queued = false;
                track.publish();
            }
        }
        self.publish_sequence();
    }

    fn publish_sequence(&self) {
        self.transport
            .set_sequence(self.sequence_active, self.current_track_id(), self.is_last_track_recording());
    }

    /// A take is open or a sequential queue is still running.
    pub fn is_recording_active(&self) -> bool {
        self.sequence_active || self.is_any_recording()
    }

    pub fn current_track_id(&self) -> Option<TrackId> {
        self.current_recording_index.and_then(|i| self.recording_queue.get(i))
    }

    pub fn is_last_track_recording(&self) -> bool {
        match self.current_recording_index {
            Some(index) => index + 1 == self.recording_queue.len(),
            None => false,
        }
    }

    // --- Undo ---

    /// Snapshots a track into the single undo slot. Starting a recording
    /// does this implicitly.
    pub fn backup_track_before_record(&mut self, id: TrackId) {
        if let Some(idx) = self.track_index(id) {
            self.last_history.backup(&self.tracks[idx]);
        }
    }

    /// Restores the last snapshot and empties the slot. A second call does
    /// nothing.
    pub fn undo_last_recording(&mut self) {
        let Some(id) = self.last_history.track_id() else {
            return;
        };
        if let Some(idx) = self.track_index(id) {
            let track = &mut self.tracks[idx];
            track.is_recording = false;
            track.is_playing = false;
            track.current_level = 0.0;
            self.last_history.restore_into(track);
            track.mark_summary_dirty();
            track.publish();
            if self.current_track_id() == Some(id) {
                self.clear_sequence();
            }
            self.start_playing(id);
            self.emit(LooperEvent::UndoApplied(id));
        }
        self.last_history.clear();
    }

    // --- Block processing ---

    /// Processes one mono block. Track audio is summed into `output`, which
    /// the caller zeroes. The clock advances by `output.len()`.
    pub fn process_block(&mut self, output: &mut [f32], input: &[f32]) {
        self.handle_commands();

        let num_samples = output.len();
        let input = &input[..input.len().min(num_samples)];

        // Drained every block; a trigger with no active sequence is dropped.
        let trigger = self.trigger_ref.as_ref().and_then(|t| t.take());
        match trigger {
            Some(info) if self.sequence_active => {
                // Split at the onset: the take closes and the next opens on
                // that sample, and the closed take starts playing there.
                let split = info.sample_in_block.min(num_samples);
                let (head_out, tail_out) = output.split_at_mut(split);
                let (head_in, tail_in) = input.split_at(split.min(input.len()));
                self.process_segment(head_out, head_in);
                self.advance_sequence(self.current_sample_position);
                self.process_segment(tail_out, tail_in);
            }
            _ => self.process_segment(output, input),
        }

        for track in self.tracks.iter_mut() {
            if track.is_recording {
                track.shared_state.set_record_length(track.record_length);
                track.shared_state.set_level(track.current_level);
            }
            track.refresh_waveform_summary(SUMMARY_SAMPLES_PER_BLOCK);
        }
        self.publish_transport();
    }

    /// Records and mixes one contiguous stretch of the block, then advances
    /// the master cycle and the clock past it.
    fn process_segment(&mut self, output: &mut [f32], input: &[f32]) {
        if output.is_empty() {
            return;
        }
        self.record_into_tracks(input);
        self.mix_tracks_to_output(output);

        let num_samples = output.len();
        if self.master_loop_length > 0 {
            self.master_read_position = (self.master_read_position + num_samples) % self.master_loop_length;
        }
        self.current_sample_position += num_samples as SamplePosition;
    }

    pub fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                LooperCommand::AddTrack(track) => self.insert_track(track),
                LooperCommand::StartRecording(id) => self.start_recording(id),
                LooperCommand::StopRecording(id) => self.stop_recording(id),
                LooperCommand::StartPlaying(id) => self.start_playing(id),
                LooperCommand::StopPlaying(id) => self.stop_playing(id),
                LooperCommand::ClearTrack(id) => self.clear_track(id),
                LooperCommand::AllClear => self.all_clear(),
                LooperCommand::StopAllTracks => self.stop_all_tracks(),
                LooperCommand::StartSequentialRecording(queue) => self.start_sequential_recording(queue),
                LooperCommand::StopRecordingAndContinue => self.stop_recording_and_continue(),
                LooperCommand::BackupTrack(id) => self.backup_track_before_record(id),
                LooperCommand::UndoLastRecording => self.undo_last_recording(),
                LooperCommand::MasterPositionReset => self.master_position_reset(),
            }
        }
    }

    fn publish_transport(&self) {
        self.transport.set_master_track_id(self.master_track_id);
        self.transport.set_master_loop_length(self.master_loop_length);
        self.transport.set_master_read_position(self.master_read_position);
        self.transport.set_master_start_sample(self.master_start_sample);
        self.transport.set_current_sample_position(self.current_sample_position);
    }

    // --- Queries ---

    pub fn is_any_recording(&self) -> bool {
        self.tracks.iter().any(|t| t.is_recording)
    }

    pub fn is_any_playing(&self) -> bool {
        self.tracks.iter().any(|t| t.is_playing)
    }

    pub fn has_recorded_tracks(&self) -> bool {
        self.tracks.iter().any(|t| t.has_content())
    }

    pub fn track_state(&self, id: TrackId) -> Option<TrackState> {
        self.track(id).map(|t| t.state())
    }

    /// Most recent block level. 0.0 for unknown tracks.
    pub fn track_rms(&self, id: TrackId) -> f32 {
        self.track(id).map_or(0.0, |t| t.current_level)
    }

    pub fn set_track_gain(&mut self, id: TrackId, gain: f32) {
        if let Some(track) = self.track(id) {
            track.shared_state.set_gain(gain);
        }
    }

    pub fn track_gain(&self, id: TrackId) -> Option<f32> {
        self.track(id).map(|t| t.shared_state.get_gain())
    }

    pub fn track_length(&self, id: TrackId) -> usize {
        self.track(id).map_or(0, |t| t.record_length)
    }

    pub fn track_record_start(&self, id: TrackId) -> SamplePosition {
        self.track(id).map_or(0, |t| t.record_start_sample)
    }

    pub fn track_buffer(&self, id: TrackId) -> Option<&[f32]> {
        self.track(id).map(|t| t.recorded())
    }

    pub fn master_track_id(&self) -> Option<TrackId> {
        self.master_track_id
    }

    pub fn master_loop_length(&self) -> usize {
        self.master_loop_length
    }

    pub fn master_read_position(&self) -> usize {
        self.master_read_position
    }

    pub fn master_start_sample(&self) -> SamplePosition {
        self.master_start_sample
    }

    pub fn current_sample_position(&self) -> SamplePosition {
        self.current_sample_position
    }

    /// Fraction of the master cycle played, in [0, 1). 0 without a master.
    pub fn master_normalized_position(&self) -> f32 {
        if self.master_loop_length == 0 {
            return 0.0;
        }
        let position = self.master_read_position as f64 / self.master_loop_length as f64;
        (position as f32).min(1.0 - f32::EPSILON)
    }
}
