use crate::convert::uninterleave_stereo;
use crate::note::Pitch;
use log::{error, info, trace};
use std::path::Path;
use thiserror::Error;

/// An alternative synthesis backend that plays stored samples instead of
/// oscillator voices. The engine drives it through the same note-on/note-off
/// calls as the voice pool and pulls rendered stereo blocks from it.
pub trait SampleBackend: Send {
    /// Loads a sample bank from `path`, reporting success.
    fn load_bank(&mut self, path: &Path) -> bool;

    fn note_on(&mut self, pitch: Pitch, velocity: u8);

    fn note_off(&mut self, pitch: Pitch);

    fn all_notes_off(&mut self);

    /// Renders `frames` samples into the left and right channel buffers,
    /// overwriting their contents.
    fn render_block(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]);
}

/// How many notes the bank will sound at once; later notes are dropped.
const MAX_ZONES: usize = 32;

/// Per-sample fade applied after a note is released (about 23 ms at 44.1 kHz).
const RELEASE_STEP: f32 = 1.0 / 1024.0;

/// Matches the per-voice scaling of the oscillator pool.
const HEADROOM: f32 = 0.3;

/// A [`SampleBackend`] backed by a single WAV file, replayed at a rate
/// proportional to each note's frequency relative to a root pitch.
pub struct WavBank {
    sample_rate: u32,
    root: Pitch,
    sample: Option<BankSample>,
    zones: Vec<Zone>,
}

struct BankSample {
    left: Vec<f32>,
    right: Vec<f32>,
    rate: u32,
}

#[derive(Clone, Copy)]
struct Zone {
    active: bool,
    released: bool,
    pitch: Pitch,
    gain: f32,
    fade: f32,
    /// Source frames consumed per output frame.
    step: f64,
    /// Fractional read position into the sample.
    position: f64,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            active: false,
            released: false,
            pitch: Pitch(0),
            gain: 0.0,
            fade: 0.0,
            step: 0.0,
            position: 0.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum BankError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported sample format")]
    UnsupportedFormat,
    #[error("unsupported number of channels: {0}")]
    UnsupportedChannels(u16),
}

impl WavBank {
    /// Creates an empty bank rendering at `sample_rate`, with `root` being
    /// the pitch at which the stored sample plays back unchanged.
    pub fn new(sample_rate: u32, root: Pitch) -> Self {
        Self {
            sample_rate,
            root,
            sample: None,
            zones: vec![Zone::default(); MAX_ZONES],
        }
    }

    pub fn active_zones(&self) -> usize {
        self.zones.iter().filter(|z| z.active).count()
    }
}

impl SampleBackend for WavBank {
    fn load_bank(&mut self, path: &Path) -> bool {
        match read_bank_sample(path) {
            Ok(sample) => {
                info!(
                    "loaded sample bank {} ({} frames at {} Hz)",
                    path.display(),
                    sample.left.len(),
                    sample.rate
                );
                self.sample = Some(sample);
                true
            }
            Err(err) => {
                error!("failed to load sample bank {}: {}", path.display(), err);
                false
            }
        }
    }

    fn note_on(&mut self, pitch: Pitch, velocity: u8) {
        let Some(sample) = &self.sample else {
            trace!("no sample bank loaded, dropping {}", pitch);
            return;
        };
        let Some(zone) = self.zones.iter_mut().find(|z| !z.active) else {
            trace!("sample bank saturated, dropping {}", pitch);
            return;
        };
        *zone = Zone {
            active: true,
            released: false,
            pitch,
            gain: (velocity as f32 / 127.0) * HEADROOM,
            fade: 1.0,
            step: (pitch.frequency() / self.root.frequency()) as f64 * sample.rate as f64
                / self.sample_rate as f64,
            position: 0.0,
        };
    }

    fn note_off(&mut self, pitch: Pitch) {
        if let Some(zone) = self
            .zones
            .iter_mut()
            .find(|z| z.active && !z.released && z.pitch == pitch)
        {
            zone.released = true;
        }
    }

    fn all_notes_off(&mut self) {
        for zone in self.zones.iter_mut().filter(|z| z.active) {
            zone.released = true;
        }
    }

    fn render_block(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        left[..frames].fill(0.0);
        right[..frames].fill(0.0);
        let Some(sample) = &self.sample else { return };

        for zone in self.zones.iter_mut().filter(|z| z.active) {
            for i in 0..frames {
                let index = zone.position as usize;
                if index + 1 >= sample.left.len() {
                    // One-shot playback: the sample ran out.
                    zone.active = false;
                    break;
                }
                let frac = (zone.position - index as f64) as f32;
                let l = sample.left[index] + (sample.left[index + 1] - sample.left[index]) * frac;
                let r =
                    sample.right[index] + (sample.right[index + 1] - sample.right[index]) * frac;

                let amplitude = zone.gain * zone.fade;
                left[i] += l * amplitude;
                right[i] += r * amplitude;

                zone.position += zone.step;
                if zone.released {
                    zone.fade -= RELEASE_STEP;
                    if zone.fade <= 0.0 {
                        zone.active = false;
                        break;
                    }
                }
            }
        }
    }
}

/// Reads a WAV file into normalized f32 channel buffers.
fn read_bank_sample(path: &Path) -> Result<BankSample, BankError> {
    let mut wav = hound::WavReader::open(path)?;

    let spec = wav.spec();
    let length = wav.duration() as usize;

    // The maximum sample value, used to normalize into [-1, 1].
    let max_value = match spec.bits_per_sample {
        8 => 0x7f,
        16 => 0x7fff,
        24 => 0x7fffff,
        32 => 0x7fffffff,
        _ => return Err(BankError::UnsupportedFormat),
    };
    let scale = (max_value as f32).recip();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => wav
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 * scale))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Float => wav.samples::<f32>().collect::<Result<_, _>>()?,
    };

    match spec.channels {
        1 => Ok(BankSample {
            left: samples.clone(),
            right: samples,
            rate: spec.sample_rate,
        }),
        2 => {
            let mut left = vec![0.0; length];
            let mut right = vec![0.0; length];
            uninterleave_stereo(&samples, &mut left, &mut right);
            Ok(BankSample {
                left,
                right,
                rate: spec.sample_rate,
            })
        }
        other => Err(BankError::UnsupportedChannels(other)),
    }
}
