// src/tests_looper.rs

use crate::audio_engine::command::SequentialQueue;
use crate::audio_engine::controller::{LooperController, LooperListener};
use crate::audio_engine::LooperAudio;
use crate::error::LooperError;
use crate::looper::{TrackId, TrackState};
use crate::timeline::LooperConfig;
use crate::trigger::TriggerEvent;
use std::sync::Arc;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK: usize = 480;

fn new_engine(max_loop_seconds: f32) -> (LooperAudio, LooperController) {
    let config = LooperConfig {
        max_loop_seconds,
        ..LooperConfig::default()
    };
    let (mut engine, controller) = LooperAudio::new(SAMPLE_RATE, config);
    engine.prepare_to_play(BLOCK, SAMPLE_RATE);
    (engine, controller)
}

/// Runs `blocks` blocks of constant input and returns the last output block.
fn run_blocks(engine: &mut LooperAudio, blocks: usize, value: f32) -> Vec<f32> {
    let input = vec![value; BLOCK];
    let mut output = vec![0.0; BLOCK];
    for _ in 0..blocks {
        output.fill(0.0);
        engine.process_block(&mut output, &input);
    }
    output
}

#[derive(Default)]
struct EventLog {
    started: Vec<TrackId>,
    stopped: Vec<TrackId>,
    masters: Vec<(TrackId, usize)>,
    undone: Vec<TrackId>,
    sequences_finished: usize,
}

impl LooperListener for EventLog {
    fn on_recording_started(&mut self, track_id: TrackId) {
        self.started.push(track_id);
    }

    fn on_recording_stopped(&mut self, track_id: TrackId) {
        self.stopped.push(track_id);
    }

    fn on_master_established(&mut self, track_id: TrackId, length: usize) {
        self.masters.push((track_id, length));
    }

    fn on_undo(&mut self, track_id: TrackId) {
        self.undone.push(track_id);
    }

    fn on_sequence_finished(&mut self) {
        self.sequences_finished += 1;
    }
}

#[test]
fn first_recording_becomes_master() {
    let (mut engine, _controller) = new_engine(3.0);
    engine.add_track(1);

    engine.start_recording(1);
    run_blocks(&mut engine, 100, 0.5);
    engine.stop_recording(1);

    assert_eq!(engine.master_track_id(), Some(1));
    assert_eq!(engine.master_loop_length(), 48_000);
    assert_eq!(engine.master_start_sample(), 0);
    assert_eq!(engine.master_read_position(), 0);
    assert_eq!(engine.track_state(1), Some(TrackState::Playing));
    assert_eq!(engine.track(1).unwrap().read_position, 0);

    run_blocks(&mut engine, 1, 0.0);
    assert_eq!(engine.master_read_position(), BLOCK);
}

#[test]
fn concurrent_track_is_phase_aligned_to_master() {
    let (mut engine, _controller) = new_engine(3.0);
    engine.add_track(1);
    engine.add_track(2);

    engine.start_recording(1);
    run_blocks(&mut engine, 25, 0.5);
    engine.start_recording(2);
    run_blocks(&mut engine, 75, 0.5);
    engine.stop_recording(1);
    assert_eq!(engine.current_sample_position(), 48_000);

    run_blocks(&mut engine, 25, 0.5);
    assert_eq!(engine.master_read_position(), 12_000);
    engine.stop_recording(2);

    let track = engine.track(2).unwrap();
    assert_eq!(track.record_start_sample, 12_000);
    assert_eq!(track.record_length, 48_000);
    assert!(track.is_playing);
    assert_eq!(track.read_position, 0);

    assert_eq!(engine.master_track_id(), Some(1));
    assert_eq!(engine.master_loop_length(), 48_000);
}

#[test]
fn master_is_only_set_once() {
    let (mut engine, _controller) = new_engine(3.0);
    engine.add_track(1);
    engine.add_track(2);

    engine.start_recording(1);
    run_blocks(&mut engine, 10, 0.5);
    engine.stop_recording(1);

    engine.start_recording(2);
    run_blocks(&mut engine, 30, 0.5);
    engine.stop_recording(2);

    assert_eq!(engine.master_track_id(), Some(1));
    assert_eq!(engine.master_loop_length(), 4_800);
    assert_eq!(engine.track_length(2), 14_400);

    // Clearing the master leaves the timing in place.
    engine.clear_track(1);
    assert_eq!(engine.master_track_id(), Some(1));
    assert_eq!(engine.master_loop_length(), 4_800);
    assert_eq!(engine.track_state(1), Some(TrackState::Empty));
}

#[test]
fn normalized_position_stays_below_one() {
    let (mut engine, _controller) = new_engine(3.0);
    assert_eq!(engine.master_normalized_position(), 0.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 100, 0.1);
    engine.stop_recording(1);

    let transport = engine.transport();
    let input = vec![0.0; 333];
    let mut output = vec![0.0; 333];
    for _ in 0..500 {
        output.fill(0.0);
        engine.process_block(&mut output, &input);
        let position = engine.master_normalized_position();
        assert!((0.0..1.0).contains(&position));
        let shared = transport.get_master_normalized_position();
        assert!((0.0..1.0).contains(&shared));
    }
}

#[test]
fn undo_restores_previous_take_once() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);

    engine.start_recording(1);
    run_blocks(&mut engine, 10, 0.5);
    engine.stop_recording(1);
    let original = engine.track(1).unwrap().buffer.clone();

    engine.start_recording(1);
    run_blocks(&mut engine, 20, -0.25);
    engine.stop_recording(1);
    assert_eq!(engine.track_length(1), 9_600);

    engine.undo_last_recording();
    assert_eq!(engine.track(1).unwrap().buffer, original);
    assert_eq!(engine.track_length(1), 4_800);
    assert_eq!(engine.track_record_start(1), 0);
    assert_eq!(engine.track_state(1), Some(TrackState::Playing));

    engine.undo_last_recording();
    assert_eq!(engine.track(1).unwrap().buffer, original);
    assert_eq!(engine.track_length(1), 4_800);
}

#[test]
fn backup_then_undo_is_bit_identical() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 7, 0.3);
    engine.stop_recording(1);
    let before = engine.track(1).unwrap().buffer.clone();

    engine.backup_track_before_record(1);
    engine.undo_last_recording();
    assert_eq!(engine.track(1).unwrap().buffer, before);
    assert_eq!(engine.track_length(1), 7 * BLOCK);
}

#[test]
fn undo_during_recording_aborts_take() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 5, 0.7);
    engine.undo_last_recording();

    assert!(!engine.is_any_recording());
    assert_eq!(engine.track_length(1), 0);
    assert!(engine.track(1).unwrap().buffer.iter().all(|s| *s == 0.0));
    assert_eq!(engine.track_state(1), Some(TrackState::Empty));
}

#[test]
fn stop_recording_is_idempotent() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.add_track(2);
    engine.start_recording(1);
    run_blocks(&mut engine, 4, 0.2);
    engine.stop_recording(1);
    engine.stop_recording(1);
    engine.stop_recording(2);

    assert_eq!(engine.track_length(1), 4 * BLOCK);
    assert_eq!(engine.master_loop_length(), 4 * BLOCK);
    assert_eq!(engine.track_state(2), Some(TrackState::Empty));
}

#[test]
fn recording_stops_at_capacity() {
    let (mut engine, _controller) = new_engine(0.1);
    assert_eq!(engine.max_samples(), 4_800);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 13, 0.4);

    let track = engine.track(1).unwrap();
    assert_eq!(track.record_length, 4_800);
    assert!(!track.is_recording);
    assert!(track.is_playing);
    assert_eq!(engine.master_loop_length(), 4_800);
}

#[test]
fn short_recording_snaps_to_master_cycle() {
    let (mut engine, _controller) = new_engine(2.0);
    engine.add_track(1);
    engine.add_track(2);

    engine.start_recording(1);
    run_blocks(&mut engine, 100, 0.0);
    engine.stop_recording(1);

    engine.start_recording(2);
    run_blocks(&mut engine, 96, 0.5);
    engine.stop_recording(2);
    assert_eq!(engine.track_length(2), 46_080);
    assert_eq!(engine.track(2).unwrap().read_position, 46_080);

    // Padded with silence up to the master length, then wraps.
    for _ in 0..4 {
        let output = run_blocks(&mut engine, 1, 0.0);
        assert!(output.iter().all(|s| *s == 0.0));
    }
    assert_eq!(engine.track(2).unwrap().read_position, 0);
    let output = run_blocks(&mut engine, 1, 0.0);
    assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
}

#[test]
fn gain_scales_playback() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 1, 0.5);
    engine.stop_recording(1);

    engine.set_track_gain(1, 0.5);
    let output = run_blocks(&mut engine, 1, 0.0);
    assert!(output.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    assert!((engine.track_rms(1) - 0.25).abs() < 1e-5);
    assert_eq!(engine.track_gain(1), Some(0.5));
}

#[test]
fn sequential_recording_follows_triggers() {
    let (mut engine, mut controller) = new_engine(2.0);
    let trigger = Arc::new(TriggerEvent::new());
    engine.set_trigger_reference(trigger.clone());
    engine.add_track(1);
    engine.add_track(2);

    engine.start_sequential_recording(SequentialQueue::from_slice(&[1, 2]).unwrap());
    assert!(engine.is_recording_active());
    assert_eq!(engine.track_state(1), Some(TrackState::Standby));
    assert_eq!(engine.track_state(2), Some(TrackState::Standby));

    run_blocks(&mut engine, 1, 0.5);
    assert!(!engine.is_any_recording());

    trigger.fire(100, 580, 0);
    run_blocks(&mut engine, 1, 0.5);
    assert_eq!(engine.current_track_id(), Some(1));
    assert_eq!(engine.track_record_start(1), 580);
    assert_eq!(engine.track_length(1), 380);
    assert!(!engine.is_last_track_recording());

    run_blocks(&mut engine, 99, 0.5);
    trigger.fire(200, 48_680, 0);
    run_blocks(&mut engine, 1, 0.5);

    assert_eq!(engine.track_length(1), 48_100);
    assert_eq!(engine.master_track_id(), Some(1));
    assert_eq!(engine.master_start_sample(), 580);
    assert_eq!(engine.master_read_position(), 280);
    assert_eq!(engine.track(1).unwrap().read_position, 280);
    assert_eq!(engine.current_track_id(), Some(2));
    assert!(engine.is_last_track_recording());
    assert_eq!(engine.track_record_start(2), 48_680);
    assert_eq!(engine.track_length(2), 280);

    trigger.fire(0, 48_960, 0);
    run_blocks(&mut engine, 1, 0.5);
    assert!(!engine.is_recording_active());
    assert_eq!(engine.current_track_id(), None);
    assert_eq!(engine.track_length(2), 280);
    assert_eq!(engine.track_state(2), Some(TrackState::Playing));

    let mut log = EventLog::default();
    controller.dispatch_events(&mut log);
    assert_eq!(log.started, vec![1, 2]);
    assert_eq!(log.stopped, vec![1, 2]);
    assert_eq!(log.masters, vec![(1, 48_100)]);
    assert_eq!(log.sequences_finished, 1);
    assert!(!controller.is_recording_active());
}

#[test]
fn stop_recording_and_continue_advances_queue() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.add_track(2);
    engine.start_sequential_recording(SequentialQueue::from_slice(&[2, 1]).unwrap());

    engine.stop_recording_and_continue();
    assert_eq!(engine.current_track_id(), Some(2));
    run_blocks(&mut engine, 2, 0.5);
    engine.stop_recording_and_continue();
    assert_eq!(engine.current_track_id(), Some(1));
    assert_eq!(engine.master_track_id(), Some(2));
    engine.stop_recording_and_continue();
    assert!(!engine.is_recording_active());
    // Nothing was captured on track 1, so it stays empty.
    assert_eq!(engine.track_state(1), Some(TrackState::Empty));
}

#[test]
fn trigger_without_sequence_is_discarded() {
    let (mut engine, _controller) = new_engine(1.0);
    let trigger = Arc::new(TriggerEvent::new());
    engine.set_trigger_reference(trigger.clone());
    engine.add_track(1);

    trigger.fire(10, 10, 0);
    run_blocks(&mut engine, 1, 0.5);
    assert!(!trigger.is_fired());
    assert!(!engine.is_any_recording());
}

#[test]
fn unknown_track_ids_are_ignored() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(99);
    engine.stop_recording(99);
    engine.start_playing(99);
    engine.stop_playing(99);
    engine.clear_track(99);
    engine.backup_track_before_record(99);
    engine.undo_last_recording();
    engine.set_track_gain(99, 0.2);

    assert!(!engine.is_any_recording());
    assert_eq!(engine.track_rms(99), 0.0);
    assert_eq!(engine.track_gain(99), None);
    assert_eq!(engine.track_buffer(99), None);

    // Empty tracks refuse to play.
    engine.start_playing(1);
    assert!(!engine.is_any_playing());
}

#[test]
fn duplicate_tracks_are_rejected() {
    let (mut engine, mut controller) = new_engine(0.1);
    engine.add_track(1);
    engine.add_track(1);
    assert_eq!(engine.track_ids().count(), 1);

    assert_eq!(controller.add_track(2), Ok(()));
    assert_eq!(controller.add_track(2), Err(LooperError::DuplicateTrack(2)));
}

#[test]
fn retired_track_keeps_engine_state() {
    let (mut engine, mut controller) = new_engine(0.1);
    engine.add_track(1);
    // The controller has not seen the direct add yet.
    assert_eq!(controller.add_track(1), Ok(()));
    run_blocks(&mut engine, 1, 0.0);

    controller.dispatch_events(&mut EventLog::default());
    assert_eq!(controller.track_ids(), vec![1]);
    engine.set_track_gain(1, 0.3);
    let gain = controller.track_gain(1).unwrap();
    assert!((gain - 0.3).abs() < 1e-6);
}

#[test]
fn controller_drives_engine_through_queues() {
    let (mut engine, mut controller) = new_engine(1.0);
    controller.add_track(1).unwrap();
    controller.start_recording(1).unwrap();
    run_blocks(&mut engine, 10, 0.5);
    assert!(controller.is_any_recording());
    assert_eq!(controller.track_length(1), 4_800);

    controller.stop_recording(1).unwrap();
    run_blocks(&mut engine, 1, 0.0);

    let mut log = EventLog::default();
    assert!(controller.dispatch_events(&mut log) >= 4);
    assert_eq!(log.started, vec![1]);
    assert_eq!(log.stopped, vec![1]);
    assert_eq!(log.masters, vec![(1, 4_800)]);

    assert_eq!(controller.master_track_id(), Some(1));
    assert_eq!(controller.master_loop_length(), 4_800);
    assert_eq!(controller.track_state(1), Some(TrackState::Playing));
    assert!(controller.is_any_playing());
    assert!(controller.has_recorded_tracks());
    assert!((controller.master_normalized_position() - 0.1).abs() < 1e-6);

    let placement = controller.track_placement(1).unwrap();
    assert_eq!(placement.start_ratio, 0.0);
    assert_eq!(placement.loop_ratio, 1.0);

    let summary = controller.waveform_summary(1).unwrap();
    assert!(summary.iter().all(|p| (*p - 0.5).abs() < 1e-6));

    controller.undo_last_recording().unwrap();
    run_blocks(&mut engine, 1, 0.0);
    controller.dispatch_events(&mut log);
    assert_eq!(log.undone, vec![1]);
    assert_eq!(controller.track_length(1), 0);
}

#[test]
fn stop_all_closes_takes_without_playback() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.add_track(2);
    engine.start_recording(1);
    run_blocks(&mut engine, 4, 0.5);
    engine.stop_recording(1);
    engine.start_recording(2);
    run_blocks(&mut engine, 2, 0.5);

    engine.stop_all_tracks();
    assert!(!engine.is_any_recording());
    assert!(!engine.is_any_playing());
    assert_eq!(engine.track_length(2), 2 * BLOCK);
    assert_eq!(engine.track_state(2), Some(TrackState::Stopped));
    assert!(engine.has_recorded_tracks());
}

#[test]
fn all_clear_resets_everything() {
    let (mut engine, _controller) = new_engine(1.0);
    let trigger = Arc::new(TriggerEvent::new());
    engine.set_trigger_reference(trigger.clone());
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 4, 0.5);
    engine.stop_recording(1);
    trigger.fire(0, 0, 0);

    engine.all_clear();
    assert_eq!(engine.master_track_id(), None);
    assert_eq!(engine.master_loop_length(), 0);
    assert_eq!(engine.current_sample_position(), 0);
    assert!(!engine.has_recorded_tracks());
    assert!(!trigger.is_fired());
    assert!(engine.track(1).unwrap().buffer.iter().all(|s| *s == 0.0));

    // Undo has nothing to restore after a full clear.
    engine.undo_last_recording();
    assert_eq!(engine.track_length(1), 0);
}

#[test]
fn restarting_playback_realigns_to_master() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 20, 0.5);
    engine.stop_recording(1);

    run_blocks(&mut engine, 7, 0.0);
    engine.stop_playing(1);
    run_blocks(&mut engine, 3, 0.0);
    engine.start_playing(1);
    assert_eq!(engine.track(1).unwrap().read_position, engine.master_read_position());
    assert_eq!(engine.master_read_position(), 10 * BLOCK);

    engine.master_position_reset();
    assert_eq!(engine.master_read_position(), 0);
}

#[test]
fn queued_track_still_reports_playing() {
    let (mut engine, mut controller) = new_engine(1.0);
    controller.add_track(1).unwrap();
    controller.start_recording(1).unwrap();
    run_blocks(&mut engine, 4, 0.5);
    controller.stop_recording(1).unwrap();
    controller.start_sequential_recording(&[1]).unwrap();
    let output = run_blocks(&mut engine, 1, 0.0);

    assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    assert_eq!(controller.track_state(1), Some(TrackState::Standby));
    assert!(engine.is_any_playing());
    assert_eq!(controller.is_any_playing(), engine.is_any_playing());
}

#[test]
fn controller_level_matches_engine_above_unity() {
    let (mut engine, mut controller) = new_engine(1.0);
    controller.add_track(1).unwrap();
    controller.start_recording(1).unwrap();
    run_blocks(&mut engine, 2, 0.8);
    controller.stop_recording(1).unwrap();
    controller.set_track_gain(1, 2.0);
    run_blocks(&mut engine, 1, 0.0);

    assert!((engine.track_rms(1) - 1.6).abs() < 1e-5);
    assert_eq!(controller.track_rms(1), engine.track_rms(1));
}

#[test]
fn closed_take_starts_playing_at_the_trigger_sample() {
    let (mut engine, _controller) = new_engine(1.0);
    let trigger = Arc::new(TriggerEvent::new());
    engine.set_trigger_reference(trigger.clone());
    engine.add_track(1);
    engine.add_track(2);
    engine.start_sequential_recording(SequentialQueue::from_slice(&[1, 2]).unwrap());

    trigger.fire(0, 0, 0);
    run_blocks(&mut engine, 10, 0.5);
    assert_eq!(engine.track_length(1), 10 * BLOCK);

    let split = BLOCK / 2;
    trigger.fire(split, (10 * BLOCK + split) as u64, 0);
    let output = run_blocks(&mut engine, 1, 0.25);

    assert_eq!(engine.track_length(1), 10 * BLOCK + split);
    assert_eq!(engine.master_loop_length(), 10 * BLOCK + split);
    // Silent until the onset, then the take from its first sample.
    assert!(output[..split].iter().all(|s| *s == 0.0));
    assert!(output[split..].iter().all(|s| (*s - 0.5).abs() < 1e-6));
    assert_eq!(engine.master_read_position(), split);
    assert_eq!(engine.track(1).unwrap().read_position, split);
    assert_eq!(engine.track_length(2), split);
}

#[test]
fn undo_after_clear_brings_the_take_back() {
    let (mut engine, _controller) = new_engine(1.0);
    engine.add_track(1);
    engine.start_recording(1);
    run_blocks(&mut engine, 6, 0.4);
    engine.stop_recording(1);
    let before = engine.track(1).unwrap().buffer.clone();

    engine.backup_track_before_record(1);
    engine.clear_track(1);
    assert_eq!(engine.track_length(1), 0);
    engine.undo_last_recording();
    assert_eq!(engine.track(1).unwrap().buffer, before);
    assert_eq!(engine.track_length(1), 6 * BLOCK);
}

#[test]
fn waveform_summary_catches_up_over_blocks() {
    let (mut engine, mut controller) = new_engine(1.0);
    controller.add_track(1).unwrap();
    controller.start_recording(1).unwrap();
    // Fills the track exactly, which closes the take in the last block.
    run_blocks(&mut engine, 100, 0.5);
    assert_eq!(engine.track_length(1), 48_000);

    let summary = controller.waveform_summary(1).unwrap();
    assert!((summary[0] - 0.5).abs() < 1e-6);
    assert_eq!(summary[summary.len() - 1], 0.0);

    run_blocks(&mut engine, 1, 0.0);
    let summary = controller.waveform_summary(1).unwrap();
    assert!(summary.iter().all(|p| (*p - 0.5).abs() < 1e-6));
}
