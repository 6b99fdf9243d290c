use super::voice::VoiceOpts;

/// Envelope times shorter than this are treated as instantaneous.
const MIN_STAGE_TIME: f32 = 0.001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// A linear ADSR amplitude envelope.
///
/// The envelope is evaluated in terms of the time elapsed since the current
/// stage began; when that time passes the end of a stage, evaluation moves
/// to the next stage by itself, carrying any overflow into the new stage's
/// clock.
#[derive(Clone, Copy)]
pub struct Envelope {
    /// Attack time in seconds.
    attack: f32,
    /// Decay time in seconds.
    decay: f32,
    /// Sustain level between 0 and 1.
    sustain: f32,
    /// Release time in seconds.
    release: f32,
    /// The current envelope stage.
    stage: Stage,
    /// Seconds since the current stage began.
    stage_time: f32,
    /// The most recently evaluated amplitude.
    level: f32,
    /// The amplitude the release stage started at.
    release_start: f32,
}

impl Envelope {
    pub fn new(opts: VoiceOpts) -> Self {
        Self {
            attack: opts.attack.max(MIN_STAGE_TIME),
            decay: opts.decay.max(MIN_STAGE_TIME),
            sustain: opts.sustain.clamp(0.0, 1.0),
            release: opts.release.max(MIN_STAGE_TIME),
            stage: Stage::Idle,
            stage_time: 0.0,
            level: 0.0,
            release_start: 0.0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }

    pub fn set_attack(&mut self, seconds: f32) {
        self.attack = seconds.max(MIN_STAGE_TIME);
    }

    pub fn set_decay(&mut self, seconds: f32) {
        self.decay = seconds.max(MIN_STAGE_TIME);
    }

    pub fn set_sustain(&mut self, level: f32) {
        self.sustain = level.clamp(0.0, 1.0);
    }

    pub fn set_release(&mut self, seconds: f32) {
        self.release = seconds.max(MIN_STAGE_TIME);
    }

    /// Begins the attack stage, no matter what stage came before.
    pub fn note_on(&mut self) {
        self.stage = Stage::Attack;
        self.stage_time = 0.0;
    }

    /// Begins the release stage from the current amplitude.
    /// Does nothing if the envelope is idle or already releasing.
    pub fn note_off(&mut self) {
        match self.stage {
            Stage::Idle | Stage::Release => {}
            Stage::Sustain => {
                self.release_start = self.sustain;
                self.stage = Stage::Release;
                self.stage_time = 0.0;
            }
            _ => {
                self.release_start = self.level;
                self.stage = Stage::Release;
                self.stage_time = 0.0;
            }
        }
    }

    /// Returns the envelope to idle without running the release stage.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.stage_time = 0.0;
        self.level = 0.0;
        self.release_start = 0.0;
    }

    /// Advances the stage clock by `dt` seconds and returns the amplitude.
    pub fn step(&mut self, dt: f32) -> f32 {
        self.amplitude(self.stage_time + dt)
    }

    /// Evaluates the amplitude `elapsed` seconds after the current stage
    /// began. Moves to the next stage once `elapsed` passes the end of the
    /// current one. The returned value is always within [0, 1].
    pub fn amplitude(&mut self, elapsed: f32) -> f32 {
        self.stage_time = elapsed;
        let amplitude = match self.stage {
            Stage::Idle => 0.0,
            Stage::Attack => {
                if elapsed < self.attack {
                    elapsed / self.attack
                } else {
                    self.stage = Stage::Decay;
                    self.stage_time = elapsed - self.attack;
                    1.0
                }
            }
            Stage::Decay => {
                let progress = elapsed / self.decay;
                if progress < 1.0 {
                    1.0 - progress * (1.0 - self.sustain)
                } else {
                    self.stage = Stage::Sustain;
                    self.stage_time = 0.0;
                    self.sustain
                }
            }
            Stage::Sustain => self.sustain,
            Stage::Release => {
                let progress = elapsed / self.release;
                if progress < 1.0 {
                    self.release_start * (1.0 - progress)
                } else {
                    self.stage = Stage::Idle;
                    self.stage_time = 0.0;
                    0.0
                }
            }
        };
        self.level = amplitude.clamp(0.0, 1.0);
        self.level
    }
}
