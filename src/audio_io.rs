// src/audio_io.rs

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, HostId, Sample, SampleFormat, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer};
use smartloop::{InputManager, LooperAudio};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest block handed to the core at once; bigger callbacks are split.
const MAX_BLOCK_SIZE: usize = 4096;

/// Everything the output callback owns: the onset detector, the looper and
/// their scratch buffers, all sized before the stream starts.
pub struct LooperProcessor {
    engine: LooperAudio,
    input_manager: InputManager,
    input_consumer: HeapConsumer<f32>,
    input_latency_compensation_ms: Arc<AtomicU32>,
    sample_rate: u32,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
}

impl LooperProcessor {
    pub fn new(
        engine: LooperAudio,
        input_manager: InputManager,
        input_consumer: HeapConsumer<f32>,
        input_latency_compensation_ms: Arc<AtomicU32>,
        sample_rate: u32,
    ) -> Self {
        Self {
            engine,
            input_manager,
            input_consumer,
            input_latency_compensation_ms,
            sample_rate,
            input_buffer: vec![0.0; MAX_BLOCK_SIZE],
            output_buffer: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let num_frames = data.len() / channels.max(1);

        // --- Smart Latency Manager ---
        // Keep at most the configured safety buffer of input queued.
        let latency_ms = self.input_latency_compensation_ms.load(Ordering::Relaxed) as f32 / 100.0;
        let target_len = (latency_ms / 1000.0 * self.sample_rate as f32).round() as usize;
        let queued = self.input_consumer.len();
        if queued > target_len + num_frames {
            self.input_consumer.skip(queued - target_len - num_frames);
        }

        for frames in data.chunks_mut(MAX_BLOCK_SIZE * channels.max(1)) {
            let n = frames.len() / channels.max(1);
            let input = &mut self.input_buffer[..n];
            let samples_read = self.input_consumer.pop_slice(input);
            input[samples_read..].fill(0.0);

            self.input_manager.analyze(&self.input_buffer[..n]);

            let output = &mut self.output_buffer[..n];
            output.fill(0.0);
            self.engine.process_block(output, &self.input_buffer[..n]);

            for (frame, sample_value) in frames.chunks_mut(channels.max(1)).zip(output.iter()) {
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(*sample_value);
                }
            }
        }
    }
}

/// Resolved devices and stream configs. The sample rate and block size are
/// known before any stream runs, so the core can be sized from them.
pub struct StreamSetup {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    sample_format: SampleFormat,
}

impl StreamSetup {
    pub fn new(
        host_id: HostId,
        input_device_name: Option<String>,
        output_device_name: Option<String>,
        requested_sample_rate: Option<u32>,
        requested_buffer_size: Option<u32>,
    ) -> Result<Self> {
        let host = cpal::host_from_id(host_id)?;
        let input_device = if let Some(name) = &input_device_name {
            host.input_devices()?
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name))?
        } else {
            host.default_input_device()
                .ok_or_else(|| anyhow::anyhow!("No default input device"))?
        };
        let output_device = if let Some(name) = &output_device_name {
            host.output_devices()?
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("No default output device"))?
        };
        log::info!("Using input device: {}", input_device.name()?);
        log::info!("Using output device: {}", output_device.name()?);

        let default_input_config = input_device.default_input_config()?;
        let default_output_config = output_device.default_output_config()?;
        let sample_format = default_output_config.sample_format();

        let mut input_config: StreamConfig = default_input_config.into();
        let mut output_config: StreamConfig = default_output_config.into();
        // Input and output must tick at the same rate for the looper clock.
        let sample_rate = requested_sample_rate.unwrap_or(output_config.sample_rate.0);
        input_config.sample_rate = cpal::SampleRate(sample_rate);
        output_config.sample_rate = cpal::SampleRate(sample_rate);
        if let Some(bs) = requested_buffer_size {
            input_config.buffer_size = BufferSize::Fixed(bs);
            output_config.buffer_size = BufferSize::Fixed(bs);
        }

        Ok(Self {
            input_device,
            output_device,
            input_config,
            output_config,
            sample_format,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn block_size(&self) -> usize {
        match self.output_config.buffer_size {
            BufferSize::Fixed(size) => size as usize,
            BufferSize::Default => 512, // A reasonable assumption if default
        }
    }

    /// Builds and starts both streams. The returned streams must be kept
    /// alive for audio to keep running.
    pub fn run(
        self,
        input_producer: HeapProducer<f32>,
        processor: LooperProcessor,
        xrun_count: Arc<AtomicUsize>,
    ) -> Result<(Stream, Stream)> {
        let (input_stream, output_stream) = match self.sample_format {
            SampleFormat::F32 => self.start::<f32>(input_producer, processor, xrun_count)?,
            SampleFormat::I16 => self.start::<i16>(input_producer, processor, xrun_count)?,
            SampleFormat::U16 => self.start::<u16>(input_producer, processor, xrun_count)?,
            format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
        };

        log::info!(
            "Successfully started streams with Sample Rate: {} Hz, Buffer Size: {} Samples",
            self.sample_rate(),
            self.block_size()
        );
        Ok((input_stream, output_stream))
    }

    fn start<T>(
        &self,
        input_producer: HeapProducer<f32>,
        processor: LooperProcessor,
        xrun_count: Arc<AtomicUsize>,
    ) -> Result<(Stream, Stream)>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
        f32: FromSample<T>,
    {
        let input_stream =
            build_input_stream::<T>(&self.input_device, &self.input_config, input_producer, xrun_count.clone())?;
        let output_stream =
            build_output_stream::<T>(&self.output_device, &self.output_config, processor, xrun_count)?;
        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream))
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProducer<f32>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on input stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let channels = config.channels as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mono_sample =
                    frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / (channels as f32);
                if producer.push(mono_sample).is_err() {
                    // buffer full, drop sample
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: LooperProcessor,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on output stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            processor.render(data, channels);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
