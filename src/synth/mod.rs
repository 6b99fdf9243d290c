use self::voice::Voice;
pub use self::voice::VoiceOpts;
use crate::note::Pitch;
use log::trace;

mod envelope;
pub mod oscillators;
mod voice;

pub use envelope::{Envelope, Stage};

/// A polyphonic synthesizer with a fixed pool of oscillator voices.
///
/// All voices are allocated up front; note events only ever reassign them.
pub struct Synth {
    voices: Vec<Voice>,
}

#[derive(Copy, Clone)]
pub struct SynthOpts {
    pub num_voices: usize,
    pub voice_opts: VoiceOpts,
}

impl Default for SynthOpts {
    fn default() -> Self {
        Self {
            num_voices: 32,
            voice_opts: VoiceOpts::default(),
        }
    }
}

impl Synth {
    pub fn new(opts: SynthOpts) -> Self {
        let voice = Voice::new(opts.voice_opts);
        Self {
            voices: std::iter::repeat(voice).take(opts.num_voices).collect(),
        }
    }

    /// Starts a note on the first free voice.
    /// When every voice is busy the note is dropped.
    pub fn note_on(&mut self, pitch: Pitch, velocity: u8) {
        match self.voices.iter_mut().find(|v| !v.is_active()) {
            Some(voice) => voice.trigger(pitch, velocity),
            None => trace!("voice pool saturated, dropping {}", pitch),
        }
    }

    /// Releases the first active voice sounding `pitch`.
    /// Does nothing if no voice matches.
    pub fn note_off(&mut self, pitch: Pitch) {
        if let Some(voice) = self.voices.iter_mut().find(|v| v.pitch() == Some(pitch)) {
            voice.release();
        }
    }

    /// Releases every active voice. Each still runs its release tail.
    pub fn all_notes_off(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.release();
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Sums every voice and hard-clips the mix to [-1, 1].
    pub fn sample(&mut self, sample_rate: u32) -> f32 {
        let mix: f32 = self.voices.iter_mut().map(|v| v.sample(sample_rate)).sum();
        mix.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const RATE: u32 = 44_100;

    fn synth(num_voices: usize) -> Synth {
        Synth::new(SynthOpts {
            num_voices,
            voice_opts: VoiceOpts::default(),
        })
    }

    fn run(synth: &mut Synth, seconds: f32) {
        for _ in 0..(seconds * RATE as f32) as usize {
            synth.sample(RATE);
        }
    }

    #[test]
    fn test_pool_capacity() {
        let mut synth = synth(4);
        for pitch in 60..65 {
            synth.note_on(Pitch(pitch), 100);
        }
        // The fifth note is dropped, not queued and not stolen.
        assert_eq!(synth.active_voices(), 4);
    }

    #[test]
    fn test_note_off_matches_pitch() {
        let mut synth = synth(8);
        synth.note_on(Pitch(60), 100);
        synth.note_on(Pitch(64), 100);
        synth.note_off(Pitch(64));
        // The released voice rings through its tail, then goes idle.
        assert_eq!(synth.active_voices(), 2);
        run(&mut synth, 0.5);
        assert_eq!(synth.active_voices(), 1);

        // The survivor must be the voice playing 60.
        synth.note_off(Pitch(60));
        run(&mut synth, 0.5);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_note_off_without_match_is_ignored() {
        let mut synth = synth(8);
        synth.note_on(Pitch(60), 100);
        synth.note_off(Pitch(72));
        run(&mut synth, 0.5);
        assert_eq!(synth.active_voices(), 1);
    }

    #[test]
    fn test_all_notes_off_releases_everything() {
        let mut synth = synth(8);
        for pitch in [60, 64, 67] {
            synth.note_on(Pitch(pitch), 100);
        }
        synth.all_notes_off();
        assert_eq!(synth.active_voices(), 3);
        run(&mut synth, 0.5);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_mix_is_clamped() {
        let mut synth = synth(32);
        for pitch in 40..72 {
            synth.note_on(Pitch(pitch), 127);
        }
        for _ in 0..RATE {
            let sample = synth.sample(RATE);
            assert!((-1.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn test_overlapping_notes_scenario() {
        // Pitch 60 over [0, 1), pitch 64 over [0.5, 1.5).
        let mut synth = synth(32);
        synth.note_on(Pitch(60), 100);
        run(&mut synth, 0.5);
        synth.note_on(Pitch(64), 100);
        run(&mut synth, 0.25);

        // At t = 0.75 both notes are sounding.
        let sample = synth.sample(RATE);
        let next = synth.sample(RATE);
        assert!(sample.is_finite() && next.is_finite());
        assert!(sample != 0.0 || next != 0.0);

        run(&mut synth, 0.25);
        synth.note_off(Pitch(60));
        run(&mut synth, 0.5);
        synth.note_off(Pitch(64));
        run(&mut synth, 0.5);

        // By t = 2.0 both releases have decayed to exactly zero.
        assert_eq!(synth.sample(RATE), 0.0);
        assert_eq!(synth.active_voices(), 0);
    }
}
