/// A MIDI key number between 0 and 127.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Pitch(pub u8);

impl From<u8> for Pitch {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::fmt::Debug for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Pitch {
    pub fn middle_c() -> Self {
        Self(60)
    }

    /// The frequency in Hz, with A4 (key 69) tuned to 440 Hz.
    pub fn frequency(&self) -> f32 {
        440.0 * 2.0f32.powf((self.0 as f32 - 69.0) / 12.0)
    }

    pub fn name(&self) -> String {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        let octave = (self.0 / 12) as i8 - 1;
        format!("{}{}", NAMES[(self.0 % 12) as usize], octave)
    }
}

/// A note decoded from a MIDI file, with its timing resolved to seconds.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Note {
    pub pitch: Pitch,
    pub velocity: u8,
    /// Onset in seconds from the start of the file.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl Note {
    /// The time at which the note is released.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frequency() {
        assert_eq!(Pitch(69).frequency(), 440.0);
        assert_eq!(Pitch(69 + 12).frequency(), 880.0);
        assert_eq!(Pitch(69 - 12).frequency(), 220.0);
    }

    #[test]
    fn test_names() {
        assert_eq!(Pitch::middle_c().name(), "C4");
        assert_eq!(Pitch(69).name(), "A4");
        assert_eq!(Pitch(0).name(), "C-1");
        assert_eq!(Pitch(127).name(), "G9");
    }

    #[test]
    fn test_end() {
        let note = Note {
            pitch: Pitch(60),
            velocity: 100,
            start: 1.5,
            duration: 0.25,
        };
        assert_eq!(note.end(), 1.75);
    }
}
