//! Real-time live-looping core: a sample-accurate multi-track looper driven
//! by an input onset detector.

pub mod audio_engine;
pub mod error;
pub mod input_manager;
pub mod looper;
pub mod ring_buffer;
pub mod timeline;
pub mod trigger;

#[cfg(test)]
mod tests_looper;

pub use audio_engine::command::{LooperCommand, LooperEvent, SequentialQueue};
pub use audio_engine::controller::{LooperController, LooperListener};
pub use audio_engine::looper_track::TrackData;
pub use audio_engine::LooperAudio;
pub use error::LooperError;
pub use input_manager::{InputManager, SharedInputState, SmartRecConfig};
pub use looper::{SamplePosition, TrackId, TrackState};
pub use ring_buffer::{GateState, RingInputBuffer};
pub use timeline::{LooperConfig, TrackPlacement};
pub use trigger::{TriggerEvent, TriggerInfo};
