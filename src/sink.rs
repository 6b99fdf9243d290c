use basedrop::Collector;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info};
use ringbuf_basedrop as ringbuf;
use std::sync::mpsc;
use thiserror::Error;

/// A pull-based consumer of rendered audio.
///
/// The sink decides the cadence: `write_block` returns once the block has
/// been accepted, blocking while the consumer is still working through
/// earlier ones. A sink may also hand back a seek request for the generator
/// to apply before the next block.
pub trait AudioSink {
    /// Delivers one block of interleaved 16-bit stereo samples.
    fn write_block(&mut self, block: &[i16]) -> Result<(), SinkError>;

    /// Takes a pending seek request, in seconds.
    fn pending_seek(&mut self) -> Option<f64> {
        None
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("audio output stream closed")]
    Closed,
}

/// An [`AudioSink`] that feeds the default cpal output device.
///
/// The device callback drains a lock-free ring and pings back over a
/// rendezvous channel each time it does, which is what paces `write_block`.
pub struct CpalSink {
    producer: ringbuf::Producer<i16>,
    notify: mpsc::Receiver<()>,
    _stream: cpal::Stream,
    _collector: Collector,
}

impl CpalSink {
    /// Opens the default output device for interleaved stereo at
    /// `sample_rate` and starts the stream.
    pub fn connect_default(sample_rate: u32, block_frames: usize) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let collector = Collector::new();
        // Room for a few blocks of interleaved stereo, so the generator can
        // run ahead of the device without ever allocating.
        let capacity = 4 * 2 * block_frames;
        let (producer, mut consumer) = ringbuf::RingBuffer::new(capacity).split(&collector.handle());
        let (notify_tx, notify_rx) = mpsc::sync_channel(0);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let read = consumer.pop_slice(data);
                data[read..].fill(0);
                notify_tx.try_send(()).ok();
            },
            move |err| {
                error!("audio output stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        info!(
            "audio output: {} Hz stereo, {} frame blocks",
            sample_rate, block_frames
        );

        Ok(Self {
            producer,
            notify: notify_rx,
            _stream: stream,
            _collector: collector,
        })
    }
}

impl AudioSink for CpalSink {
    fn write_block(&mut self, block: &[i16]) -> Result<(), SinkError> {
        while self.producer.remaining() < block.len() {
            self.notify.recv().map_err(|_| SinkError::Closed)?;
        }
        self.producer.push_slice(block);
        Ok(())
    }
}
