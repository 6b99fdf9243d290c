use super::envelope::Envelope;
use super::oscillators;
use crate::note::Pitch;

/// Scales each voice down so a full pool can sum without routinely
/// exceeding unity before the final clamp.
const HEADROOM: f32 = 0.3;

#[derive(Clone, Copy)]
pub struct Voice {
    wave: fn(f32) -> f32,
    pitch: Pitch,
    velocity: f32,
    frequency: f32,
    phase: f32,
    envelope: Envelope,
    triggered: bool,
}

#[derive(Clone, Copy)]
pub struct VoiceOpts {
    /// The oscillator wave form.
    pub wave: fn(f32) -> f32,
    /// Attack time in seconds.
    pub attack: f32,
    /// Decay time in seconds.
    pub decay: f32,
    /// Sustain level between 0 and 1.
    pub sustain: f32,
    /// Release time in seconds.
    pub release: f32,
}

impl Default for VoiceOpts {
    fn default() -> Self {
        Self {
            wave: oscillators::sine,
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

impl Voice {
    pub fn new(opts: VoiceOpts) -> Self {
        Self {
            wave: opts.wave,
            pitch: Pitch::middle_c(),
            velocity: 0.0,
            frequency: 0.0,
            phase: 0.0,
            envelope: Envelope::new(opts),
            triggered: false,
        }
    }

    /// Starts playing a note, replacing whatever the voice was doing before.
    pub fn trigger(&mut self, pitch: Pitch, velocity: u8) {
        self.pitch = pitch;
        self.velocity = (velocity as f32) / 127.0;
        self.frequency = pitch.frequency();
        self.phase = 0.0;
        self.envelope.reset();
        self.envelope.note_on();
        self.triggered = true;
    }

    /// Releases the note; the voice stays active through the release tail.
    pub fn release(&mut self) {
        self.envelope.note_off();
    }

    pub fn is_active(&self) -> bool {
        self.triggered && self.envelope.is_active()
    }

    /// Gets the pitch the voice is currently sounding, if any.
    pub fn pitch(&self) -> Option<Pitch> {
        self.is_active().then_some(self.pitch)
    }

    /// Produces the next sample and advances the oscillator and envelope.
    pub fn sample(&mut self, sample_rate: u32) -> f32 {
        if !self.is_active() {
            self.triggered = false;
            return 0.0;
        }

        let sample = (self.wave)(self.phase);

        self.phase += self.frequency / sample_rate as f32;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        let amplitude = self.envelope.step((sample_rate as f32).recip());

        sample * amplitude * self.velocity * HEADROOM
    }
}
