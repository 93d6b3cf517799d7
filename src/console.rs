// src/console.rs

use crate::audio_device;
use anyhow::{anyhow, bail, Result};
use cpal::HostId;
use smartloop::{LooperController, LooperListener, SharedInputState, TrackId, TrackState};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const HELP: &str = "\
Commands:
  add <id>                 create a track
  rec <id> / stop <id>     start / stop recording a track
  play <id> / mute <id>    start / stop playback
  seq <id>...              record tracks one after another, advanced by input onsets
  next                     close the current sequential take and open the next
  undo                     restore the last overwritten take
  clear <id> / clearall    empty one track / reset everything
  stopall                  stop every track
  gain <id> <value>        set track gain
  threshold <user> [silence]
  calibrate                measure the noise floor for two seconds
  status / devices / help / quit";

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Add(TrackId),
    Record(TrackId),
    Stop(TrackId),
    Play(TrackId),
    Mute(TrackId),
    Sequence(Vec<TrackId>),
    Next,
    Undo,
    Clear(TrackId),
    ClearAll,
    StopAll,
    Gain(TrackId, f32),
    Threshold { user: f32, silence: Option<f32> },
    Calibrate,
    Status,
    Devices,
    Help,
    Quit,
}

fn parse_id(arg: Option<&str>) -> Result<TrackId> {
    let arg = arg.ok_or_else(|| anyhow!("missing track id"))?;
    arg.parse()
        .map_err(|_| anyhow!("'{}' is not a track id", arg))
}

fn parse_level(arg: Option<&str>, what: &str) -> Result<f32> {
    let arg = arg.ok_or_else(|| anyhow!("missing {}", what))?;
    let value: f32 = arg
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number", arg))?;
    if !value.is_finite() || value < 0.0 {
        bail!("{} must be a non-negative number", what);
    }
    Ok(value)
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "add" => ConsoleCommand::Add(parse_id(words.next())?),
        "rec" | "record" => ConsoleCommand::Record(parse_id(words.next())?),
        "stop" => ConsoleCommand::Stop(parse_id(words.next())?),
        "play" => ConsoleCommand::Play(parse_id(words.next())?),
        "mute" => ConsoleCommand::Mute(parse_id(words.next())?),
        "seq" => {
            let ids = words
                .map(|w| parse_id(Some(w)))
                .collect::<Result<Vec<_>>>()?;
            if ids.is_empty() {
                bail!("seq needs at least one track id");
            }
            return Ok(Some(ConsoleCommand::Sequence(ids)));
        }
        "next" => ConsoleCommand::Next,
        "undo" => ConsoleCommand::Undo,
        "clear" => ConsoleCommand::Clear(parse_id(words.next())?),
        "clearall" => ConsoleCommand::ClearAll,
        "stopall" => ConsoleCommand::StopAll,
        "gain" => {
            let id = parse_id(words.next())?;
            ConsoleCommand::Gain(id, parse_level(words.next(), "gain")?)
        }
        "threshold" => {
            let user = parse_level(words.next(), "threshold")?;
            let silence = match words.next() {
                Some(word) => Some(parse_level(Some(word), "silence threshold")?),
                None => None,
            };
            ConsoleCommand::Threshold { user, silence }
        }
        "calibrate" => ConsoleCommand::Calibrate,
        "status" => ConsoleCommand::Status,
        "devices" => ConsoleCommand::Devices,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected argument '{}'", extra);
    }
    Ok(Some(command))
}

/// Prints recording lifecycle changes as they arrive from the audio thread.
struct EventPrinter;

impl LooperListener for EventPrinter {
    fn on_recording_started(&mut self, track_id: TrackId) {
        println!("track {} recording", track_id);
    }

    fn on_recording_stopped(&mut self, track_id: TrackId) {
        println!("track {} stopped recording", track_id);
    }

    fn on_master_established(&mut self, track_id: TrackId, length: usize) {
        println!("track {} set the master loop ({} samples)", track_id, length);
    }

    fn on_undo(&mut self, track_id: TrackId) {
        println!("track {} restored", track_id);
    }

    fn on_sequence_finished(&mut self) {
        println!("sequence finished");
    }
}

pub struct Console {
    controller: LooperController,
    input_state: SharedInputState,
    host_id: HostId,
    sample_rate: f32,
    xrun_count: Arc<AtomicUsize>,
}

impl Console {
    pub fn new(
        controller: LooperController,
        input_state: SharedInputState,
        host_id: HostId,
        sample_rate: f32,
        xrun_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            controller,
            input_state,
            host_id,
            sample_rate,
            xrun_count,
        }
    }

    /// Reads commands from stdin until `quit` or end of input, draining
    /// engine events in between.
    pub fn run(&mut self) -> Result<()> {
        let (line_sender, line_receiver) = mpsc::channel::<String>();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_sender.send(line).is_err() {
                    break;
                }
            }
        });

        println!("{}", HELP);
        loop {
            match line_receiver.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !self.execute(command)? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                },
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            self.controller.dispatch_events(&mut EventPrinter);
        }
        Ok(())
    }

    /// Returns `false` once the console should exit.
    pub fn execute(&mut self, command: ConsoleCommand) -> Result<bool> {
        let result = match command {
            ConsoleCommand::Add(id) => self.controller.add_track(id),
            ConsoleCommand::Record(id) => self.controller.start_recording(id),
            ConsoleCommand::Stop(id) => self.controller.stop_recording(id),
            ConsoleCommand::Play(id) => self.controller.start_playing(id),
            ConsoleCommand::Mute(id) => self.controller.stop_playing(id),
            ConsoleCommand::Sequence(ids) => self.controller.start_sequential_recording(&ids),
            ConsoleCommand::Next => self.controller.stop_recording_and_continue(),
            ConsoleCommand::Undo => self.controller.undo_last_recording(),
            ConsoleCommand::Clear(id) => self.controller.clear_track(id),
            ConsoleCommand::ClearAll => self.controller.all_clear(),
            ConsoleCommand::StopAll => self.controller.stop_all_tracks(),
            ConsoleCommand::Gain(id, gain) => {
                self.controller.set_track_gain(id, gain);
                Ok(())
            }
            ConsoleCommand::Threshold { user, silence } => {
                let mut config = self.input_state.config();
                config.user_threshold = user;
                if let Some(silence) = silence {
                    config.silence_threshold = silence;
                }
                if config.silence_threshold > config.user_threshold {
                    log::warn!("Silence threshold is above the trigger threshold");
                }
                self.input_state.set_config(config);
                log::info!(
                    "Thresholds: trigger {}, silence {}",
                    config.user_threshold,
                    config.silence_threshold
                );
                Ok(())
            }
            ConsoleCommand::Calibrate => {
                self.input_state.start_calibration();
                println!("calibrating, stay quiet for two seconds");
                Ok(())
            }
            ConsoleCommand::Status => {
                print!("{}", self.status());
                Ok(())
            }
            ConsoleCommand::Devices => {
                print!("{}", audio_device::describe_devices(self.host_id)?);
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleCommand::Quit => return Ok(false),
        };
        if let Err(e) = result {
            println!("{}", e);
        }
        Ok(true)
    }

    fn seconds(&self, samples: usize) -> f32 {
        if self.sample_rate > 0.0 {
            samples as f32 / self.sample_rate
        } else {
            0.0
        }
    }

    fn status(&self) -> String {
        let controller = &self.controller;
        let mut text = String::new();
        match controller.master_track_id() {
            Some(id) => text.push_str(&format!(
                "Master: track {}, {:.2} s, at {:.0}%\n",
                id,
                self.seconds(controller.master_loop_length()),
                controller.master_normalized_position() * 100.0
            )),
            None => text.push_str("Master: none\n"),
        }
        for id in controller.track_ids() {
            let state = controller.track_state(id).unwrap_or(TrackState::Empty);
            text.push_str(&format!(
                "Track {}: {:?}, {:.2} s, gain {:.2}, level {:.3}\n",
                id,
                state,
                self.seconds(controller.track_length(id)),
                controller.track_gain(id).unwrap_or(0.0),
                controller.track_rms(id)
            ));
        }
        if controller.is_recording_active() {
            if let Some(id) = controller.current_track_id() {
                let last = if controller.is_last_track_recording() { " (last)" } else { "" };
                text.push_str(&format!("Sequence: recording track {}{}\n", id, last));
            }
        }
        let config = self.input_state.config();
        text.push_str(&format!(
            "Input: level {:.3}, trigger {:.3}, silence {:.4}{}\n",
            self.input_state.current_level(),
            config.user_threshold,
            config.silence_threshold,
            if self.input_state.is_calibrating() { ", calibrating" } else { "" }
        ));
        text.push_str(&format!("Stream errors: {}\n", self.xrun_count.load(Ordering::Relaxed)));
        text
    }
}
