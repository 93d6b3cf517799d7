mod audio_device;
mod audio_io;
mod console;
mod settings;

use crate::audio_io::{LooperProcessor, StreamSetup};
use crate::console::Console;
use ringbuf::HeapRb;
use smartloop::looper::MAX_TRACKS;
use smartloop::{InputManager, LooperAudio, TrackId};
use std::sync::atomic::{AtomicU32, AtomicUsize};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut settings = settings::load_settings();
    let host_id = audio_device::select_host(settings.host_name.as_deref());
    log::info!("Using audio host: {}", host_id.name());

    let setup = StreamSetup::new(
        host_id,
        settings.input_device.clone(),
        settings.output_device.clone(),
        settings.sample_rate,
        settings.buffer_size,
    )?;
    let sample_rate = setup.sample_rate();
    let block_size = setup.block_size();

    let (mut engine, mut controller) = LooperAudio::new(sample_rate as f32, settings.looper);
    engine.prepare_to_play(block_size, sample_rate as f32);

    let mut input_manager = InputManager::new(settings.smart_rec);
    input_manager.prepare(sample_rate as f32, block_size);
    engine.set_trigger_reference(input_manager.trigger_event());
    let input_state = input_manager.shared();

    let num_tracks = settings.num_tracks.min(MAX_TRACKS);
    for id in 1..=num_tracks {
        controller.add_track(id as TrackId)?;
    }

    let input_latency_compensation_ms = Arc::new(AtomicU32::new(
        (settings.input_latency_compensation_ms.max(0.0) * 100.0) as u32,
    ));
    let audio_rb = HeapRb::<f32>::new(sample_rate as usize * 4);
    let (input_producer, input_consumer) = audio_rb.split();
    let processor = LooperProcessor::new(
        engine,
        input_manager,
        input_consumer,
        input_latency_compensation_ms,
        sample_rate,
    );

    let xrun_count = Arc::new(AtomicUsize::new(0));
    let (_input_stream, _output_stream) = setup.run(input_producer, processor, xrun_count.clone())?;

    let mut console = Console::new(controller, input_state.clone(), host_id, sample_rate as f32, xrun_count);
    console.run()?;

    settings.host_name = Some(host_id.name().to_string());
    settings.smart_rec = input_state.config();
    settings::save_settings(&settings);
    log::info!("Audio engine stopped.");
    Ok(())
}
