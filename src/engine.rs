use crate::bank::SampleBackend;
use crate::convert::{interleave_stereo, mono_to_leftright, pcm16_from_f32};
use crate::decoder::Track;
use crate::note::{Note, Pitch};
use crate::synth::{Synth, SynthOpts};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Playback state shared between the generation thread and a control thread.
///
/// There is a single writer (the generation side); readers only need fresh
/// values, not ordering against other memory, so relaxed loads and stores
/// are sufficient.
pub struct Transport {
    playing: AtomicBool,
    time_bits: AtomicU64,
}

impl Transport {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            time_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// The playback position in seconds.
    pub fn time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Relaxed))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Asks the generation side to stop; it signals end-of-stream before
    /// producing the next block.
    pub fn request_stop(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    fn set_time(&self, time: f64) {
        self.time_bits.store(time.to_bits(), Ordering::Relaxed);
    }

    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }
}

/// Which backend renders the triggered notes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SynthMode {
    /// The built-in oscillator voice pool.
    Oscillator,
    /// An injected sample-based backend.
    SampleBank,
}

#[derive(Copy, Clone)]
pub struct EngineOpts {
    pub sample_rate: u32,
    /// Frames per rendered block.
    pub block_frames: usize,
    /// Linear master gain applied to the mix.
    pub gain: f32,
    pub synth_opts: SynthOpts,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_frames: 4096,
            gain: 1.0,
            synth_opts: SynthOpts::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no tracks are loaded")]
    NoTracks,
}

/// One loaded track with its playback cursors.
///
/// Note-ons are walked in start order and note-offs in end order; both
/// cursors only ever move forward between resets.
struct Sequence {
    notes: Vec<Note>,
    offs: Vec<(f64, Pitch)>,
    next_on: usize,
    next_off: usize,
}

/// Drives decoded tracks through a synthesis backend one sample at a time.
///
/// Rendering allocates nothing: every buffer is sized when the engine is
/// built, and each block either comes back whole or playback is over.
pub struct AudioEngine {
    sample_rate: u32,
    seconds_per_sample: f64,
    gain: f32,
    mode: SynthMode,
    synth: Synth,
    bank: Option<Box<dyn SampleBackend>>,
    sequences: Vec<Sequence>,
    transport: Arc<Transport>,
    mono: Vec<f32>,
    left: Vec<f32>,
    right: Vec<f32>,
    interleaved: Vec<f32>,
    pcm: Vec<i16>,
}

impl AudioEngine {
    pub fn new(opts: EngineOpts) -> Self {
        Self {
            sample_rate: opts.sample_rate,
            seconds_per_sample: 1.0 / opts.sample_rate as f64,
            gain: opts.gain,
            mode: SynthMode::Oscillator,
            synth: Synth::new(opts.synth_opts),
            bank: None,
            sequences: vec![],
            transport: Arc::new(Transport::new()),
            mono: vec![0.0; opts.block_frames],
            left: vec![0.0; opts.block_frames],
            right: vec![0.0; opts.block_frames],
            interleaved: vec![0.0; 2 * opts.block_frames],
            pcm: vec![0; 2 * opts.block_frames],
        }
    }

    /// A handle for polling playback progress and requesting a stop from
    /// another thread.
    pub fn transport(&self) -> Arc<Transport> {
        self.transport.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Replaces the loaded tracks. Notes are sorted by start time here,
    /// since the decoder emits them in note-off order.
    pub fn load(&mut self, tracks: Vec<Track>) {
        self.sequences = tracks
            .into_iter()
            .map(|track| {
                let mut notes = track.notes;
                notes.sort_by(|a, b| a.start.total_cmp(&b.start));
                let mut offs: Vec<(f64, Pitch)> =
                    notes.iter().map(|n| (n.end(), n.pitch)).collect();
                offs.sort_by(|a, b| a.0.total_cmp(&b.0));
                Sequence {
                    notes,
                    offs,
                    next_on: 0,
                    next_off: 0,
                }
            })
            .collect();
        self.transport.set_playing(false);
        self.transport.set_time(0.0);
        info!(
            "loaded {} tracks with {} notes",
            self.sequences.len(),
            self.sequences.iter().map(|s| s.notes.len()).sum::<usize>()
        );
    }

    /// Selects which backend receives the triggered notes.
    pub fn set_mode(&mut self, mode: SynthMode) {
        debug!("synthesis mode: {:?}", mode);
        self.mode = mode;
    }

    /// Installs a sample-based backend for `SynthMode::SampleBank`.
    pub fn set_backend(&mut self, bank: Box<dyn SampleBackend>) {
        self.bank = Some(bank);
    }

    /// The time at which the last note ends.
    pub fn duration(&self) -> f64 {
        self.sequences
            .iter()
            .filter_map(|s| s.offs.last())
            .map(|&(end, _)| end)
            .fold(0.0, f64::max)
    }

    /// Begins playback from the start of the loaded tracks.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.sequences.is_empty() {
            return Err(EngineError::NoTracks);
        }
        self.rewind_cursors();
        self.transport.set_time(0.0);
        self.transport.set_playing(true);
        info!("playback started");
        Ok(())
    }

    /// Stops playback and releases everything that is sounding.
    pub fn stop(&mut self) {
        self.transport.set_playing(false);
        self.synth.all_notes_off();
        if let Some(bank) = self.bank.as_mut() {
            bank.all_notes_off();
        }
    }

    /// Stops playback and rewinds the transport to the beginning.
    pub fn reset(&mut self) {
        self.stop();
        self.transport.set_time(0.0);
        self.rewind_cursors();
    }

    /// Jumps to `time`. Seeking is a hard cut: sounding notes are released
    /// rather than carried across the jump, and notes that began before
    /// `time` will not retrigger.
    pub fn seek(&mut self, time: f64) {
        debug!("seek to {:.3}s", time);
        self.transport.set_time(time);
        self.rewind_cursors();
        self.synth.all_notes_off();
        if let Some(bank) = self.bank.as_mut() {
            bank.all_notes_off();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Renders the next block of interleaved 16-bit stereo samples, or
    /// `None` once playback has stopped (end of stream).
    pub fn render_block(&mut self) -> Option<&[i16]> {
        if !self.transport.is_playing() {
            return None;
        }

        let frames = self.mono.len();
        let mut time = self.transport.time();

        match self.mode {
            SynthMode::Oscillator => {
                for i in 0..frames {
                    self.advance_events(time);
                    self.mono[i] = self.synth.sample(self.sample_rate) * self.gain;
                    time += self.seconds_per_sample;
                    self.transport.set_time(time);
                }
                mono_to_leftright(&self.mono, &mut self.left, &mut self.right);
            }
            SynthMode::SampleBank => {
                for _ in 0..frames {
                    self.advance_events(time);
                    time += self.seconds_per_sample;
                    self.transport.set_time(time);
                }
                if let Some(bank) = self.bank.as_mut() {
                    bank.render_block(frames, &mut self.left, &mut self.right);
                } else {
                    self.left.fill(0.0);
                    self.right.fill(0.0);
                }
                for sample in self.left.iter_mut().chain(self.right.iter_mut()) {
                    *sample *= self.gain;
                }
            }
        }

        interleave_stereo(&self.left, &self.right, &mut self.interleaved);
        pcm16_from_f32(&self.interleaved, &mut self.pcm);
        Some(&self.pcm)
    }

    /// Applies every note-on and note-off whose time falls in the half-open
    /// window `(time - 1/rate, time]`. Events at or before the window are
    /// consumed either way, so a seek target's past never replays.
    fn advance_events(&mut self, time: f64) {
        let window_start = time - self.seconds_per_sample;
        let mode = self.mode;
        let synth = &mut self.synth;
        let mut bank = self.bank.as_mut();

        for sequence in self.sequences.iter_mut() {
            while let Some(note) = sequence.notes.get(sequence.next_on) {
                if note.start > time {
                    break;
                }
                let note = *note;
                sequence.next_on += 1;
                if note.start > window_start {
                    match mode {
                        SynthMode::Oscillator => synth.note_on(note.pitch, note.velocity),
                        SynthMode::SampleBank => {
                            if let Some(bank) = bank.as_mut() {
                                bank.note_on(note.pitch, note.velocity);
                            }
                        }
                    }
                }
            }

            while let Some(&(end, pitch)) = sequence.offs.get(sequence.next_off) {
                if end > time {
                    break;
                }
                sequence.next_off += 1;
                if end > window_start {
                    match mode {
                        SynthMode::Oscillator => synth.note_off(pitch),
                        SynthMode::SampleBank => {
                            if let Some(bank) = bank.as_mut() {
                                bank.note_off(pitch);
                            }
                        }
                    }
                }
            }
        }
    }

    fn rewind_cursors(&mut self) {
        for sequence in self.sequences.iter_mut() {
            sequence.next_on = 0;
            sequence.next_off = 0;
        }
    }
}
