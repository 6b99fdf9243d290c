use crate::note::{Note, Pitch};
use log::{debug, info, trace, warn};
use thiserror::Error;

/// Microseconds per quarter note before any Set Tempo event is seen (120 BPM).
const DEFAULT_TEMPO: u32 = 500_000;

/// One MIDI track, as decoded from an `MTrk` chunk.
///
/// Notes are emitted in the order their note-offs appear, so they are not
/// necessarily sorted by start time; playback must sort them before use.
#[derive(Clone, Debug, Default)]
pub struct Track {
    pub notes: Vec<Note>,
    /// The last tempo seen while decoding, in microseconds per quarter note.
    pub tempo: u32,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("file is too short to be a MIDI file")]
    TooShort,
    #[error("missing MThd header chunk")]
    BadHeaderTag,
    #[error("header chunk length {0} is too small")]
    BadHeaderLength(u32),
    #[error("no tracks could be decoded")]
    NoTracks,
}

/// Decodes a Standard MIDI File into its tracks.
///
/// Unrecognized events are skipped over by their declared sizes, and a track
/// whose event data ends early keeps the notes decoded up to that point.
/// An error is returned only when the file as a whole is unusable.
pub fn decode(data: &[u8]) -> Result<Vec<Track>, DecodeError> {
    if data.len() < 14 {
        return Err(DecodeError::TooShort);
    }

    let mut reader = Reader::new(data);

    // Header chunk: tag, length, format, track count, division.
    if !reader.tag(b"MThd") {
        return Err(DecodeError::BadHeaderTag);
    }
    let header_len = reader.u32().ok_or(DecodeError::TooShort)?;
    if header_len < 6 {
        return Err(DecodeError::BadHeaderLength(header_len));
    }
    let format = reader.u16().ok_or(DecodeError::TooShort)?;
    let track_count = reader.u16().ok_or(DecodeError::TooShort)?;
    let division = reader.u16().ok_or(DecodeError::TooShort)?;
    reader.skip(header_len as usize - 6);
    info!(
        "MIDI format {}, {} tracks, {} ticks per quarter note",
        format, track_count, division
    );

    let mut tracks = vec![];
    while reader.remaining() > 0 {
        match decode_track(&mut reader, division) {
            Some(track) => tracks.push(track),
            None => break,
        }
    }

    if tracks.is_empty() {
        return Err(DecodeError::NoTracks);
    }
    Ok(tracks)
}

/// Decodes one `MTrk` chunk, leaving the reader at the chunk's declared end.
fn decode_track(reader: &mut Reader<'_>, division: u16) -> Option<Track> {
    if reader.remaining() < 8 {
        return None;
    }
    if !reader.tag(b"MTrk") {
        warn!("missing MTrk tag at offset {}", reader.position());
        return None;
    }
    let length = reader.u32()? as usize;
    // Events may not read past the chunk's declared extent, no matter what
    // their own lengths claim.
    let mut body = reader.sub(length);

    let mut track = Track {
        notes: vec![],
        tempo: DEFAULT_TEMPO,
    };
    let mut tempo = DEFAULT_TEMPO;
    let mut tick: u32 = 0;
    let mut running_status: u8 = 0;
    // Notes awaiting their note-off, in the order they were opened.
    let mut open_notes: Vec<(u32, u8)> = vec![];

    while body.remaining() > 0 {
        let Some(delta) = body.vlq() else { break };
        tick = tick.wrapping_add(delta);

        let Some(first) = body.peek() else { break };
        let status = if first < 0x80 {
            // Running status: reuse the previous status byte.
            running_status
        } else {
            body.skip(1);
            running_status = first;
            first
        };

        match status & 0xf0 {
            // Note On; velocity zero doubles as a note-off.
            0x90 => {
                let Some(pitch) = body.u8() else { break };
                let Some(velocity) = body.u8() else { break };
                if velocity > 0 {
                    trace!("note on {} vel {} at tick {}", Pitch(pitch), velocity, tick);
                    open_notes.push((tick, pitch));
                } else {
                    close_note(&mut track, &mut open_notes, pitch, 64, tick, tempo, division);
                }
            }
            // Note Off.
            0x80 => {
                let Some(pitch) = body.u8() else { break };
                let Some(velocity) = body.u8() else { break };
                close_note(&mut track, &mut open_notes, pitch, velocity, tick, tempo, division);
            }
            // Aftertouch, Control Change, Pitch Bend: two data bytes.
            0xa0 | 0xb0 | 0xe0 => body.skip(2),
            // Program Change, Channel Pressure: one data byte.
            0xc0 | 0xd0 => body.skip(1),
            0xf0 => match status {
                // Meta event: type byte plus a length-prefixed payload.
                0xff => {
                    let Some(kind) = body.u8() else { break };
                    let Some(length) = body.vlq() else { break };
                    if kind == 0x51 && length == 3 {
                        let Some(payload) = body.take(3) else { break };
                        tempo = u32::from_be_bytes([0, payload[0], payload[1], payload[2]]);
                        track.tempo = tempo;
                        debug!("tempo change to {} us per quarter note at tick {}", tempo, tick);
                    } else {
                        body.skip(length as usize);
                    }
                }
                // System exclusive: length-prefixed payload.
                0xf0 | 0xf7 => {
                    let Some(length) = body.vlq() else { break };
                    body.skip(length as usize);
                }
                _ => {}
            },
            _ => {}
        }
    }

    debug!("decoded track with {} notes", track.notes.len());
    Some(track)
}

/// Closes the earliest-opened note with a matching pitch, if there is one.
/// Both the start and the duration are converted with the tempo in force
/// right now, so earlier tempo regions are not re-integrated.
fn close_note(
    track: &mut Track,
    open_notes: &mut Vec<(u32, u8)>,
    pitch: u8,
    velocity: u8,
    tick: u32,
    tempo: u32,
    division: u16,
) {
    let Some(index) = open_notes.iter().position(|&(_, open)| open == pitch) else {
        trace!("note off {} with no open note, ignoring", Pitch(pitch));
        return;
    };
    let (start_tick, _) = open_notes.remove(index);
    track.notes.push(Note {
        pitch: Pitch(pitch),
        velocity,
        start: ticks_to_seconds(start_tick, tempo, division),
        duration: ticks_to_seconds(tick.wrapping_sub(start_tick), tempo, division),
    });
}

/// Converts a tick count to seconds under a fixed tempo.
fn ticks_to_seconds(ticks: u32, tempo: u32, division: u16) -> f64 {
    (ticks as f64 * tempo as f64 / division as f64) / 1_000_000.0
}

/// A cursor over a byte buffer with bounds-checked big-endian reads.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + count)?;
        self.pos += count;
        Some(bytes)
    }

    /// Advances up to `count` bytes, stopping at the end of the buffer.
    fn skip(&mut self, count: usize) {
        self.pos = self.pos.saturating_add(count).min(self.data.len());
    }

    /// Splits off a reader over the next `count` bytes, clamped to what is
    /// actually there, and advances past them.
    fn sub(&mut self, count: usize) -> Reader<'a> {
        let end = self.pos.saturating_add(count).min(self.data.len());
        let body = &self.data[self.pos..end];
        self.pos = end;
        Reader::new(body)
    }

    /// Consumes a 4-byte tag if it matches; the cursor does not move on a
    /// mismatch.
    fn tag(&mut self, expected: &[u8; 4]) -> bool {
        if self.data.get(self.pos..self.pos + 4) == Some(expected) {
            self.pos += 4;
            true
        } else {
            false
        }
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a variable-length quantity: big-endian base 128 with a
    /// continuation bit in 0x80.
    fn vlq(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        loop {
            let byte = self.u8()?;
            value = (value << 7) | (byte & 0x7f) as u32;
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DIVISION: u16 = 480;

    fn header(track_count: u16, division: u16) -> Vec<u8> {
        let mut bytes = b"MThd".to_vec();
        bytes.extend(6u32.to_be_bytes());
        bytes.extend(0u16.to_be_bytes());
        bytes.extend(track_count.to_be_bytes());
        bytes.extend(division.to_be_bytes());
        bytes
    }

    fn track_chunk(events: &[u8]) -> Vec<u8> {
        let mut bytes = b"MTrk".to_vec();
        bytes.extend((events.len() as u32).to_be_bytes());
        bytes.extend(events);
        bytes
    }

    fn file(tracks: &[&[u8]]) -> Vec<u8> {
        let mut bytes = header(tracks.len() as u16, DIVISION);
        for events in tracks {
            bytes.extend(track_chunk(events));
        }
        bytes
    }

    fn seconds(ticks: u32, tempo: u32) -> f64 {
        ticks as f64 * tempo as f64 / DIVISION as f64 / 1_000_000.0
    }

    #[test]
    fn test_round_trip_single_note() {
        let events = [
            0x00, 0x90, 60, 100, // note on at tick 0
            0x83, 0x60, 0x80, 60, 64, // note off 480 ticks later
            0x00, 0xff, 0x2f, 0x00, // end of track
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].notes.len(), 1);

        let note = tracks[0].notes[0];
        assert_eq!(note.pitch, Pitch(60));
        assert_eq!(note.velocity, 64);
        assert!((note.start - 0.0).abs() < 1e-6);
        assert!((note.duration - seconds(480, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((note.duration - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_multi_byte_delta_time() {
        let events = [
            0x81, 0x48, 0x90, 60, 100, // note on 200 ticks in
            0x60, 0x80, 60, 0, // note off 96 ticks later
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        let note = tracks[0].notes[0];
        assert!((note.start - seconds(200, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((note.duration - seconds(96, DEFAULT_TEMPO)).abs() < 1e-6);
    }

    #[test]
    fn test_running_status_and_implicit_note_off() {
        let events = [
            0x00, 0x90, 60, 100, // note on with explicit status
            0x60, 60, 0, // running status, velocity 0 closes the note
            0x00, 64, 100, // running status note on
            0x60, 64, 0, // and its implicit note off
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        let notes = &tracks[0].notes;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].pitch, Pitch(60));
        assert_eq!(notes[0].velocity, 64);
        assert_eq!(notes[1].pitch, Pitch(64));
        assert!((notes[1].start - seconds(96, DEFAULT_TEMPO)).abs() < 1e-6);
    }

    #[test]
    fn test_tempo_applies_at_note_off_time() {
        let tempo = 250_000u32;
        let events = [
            0x00, 0x90, 60, 100, // note opens under the default tempo
            0x83, 0x60, 0xff, 0x51, 0x03, 0x03, 0xd0, 0x90, // tempo change at tick 480
            0x83, 0x60, 0x80, 60, 0, // note closes at tick 960
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        let note = tracks[0].notes[0];
        // Both start and duration use the tempo current when the note was
        // emitted, not the tempo in force when it was opened.
        assert!((note.start - seconds(0, tempo)).abs() < 1e-6);
        assert!((note.duration - seconds(960, tempo)).abs() < 1e-6);
        assert_eq!(tracks[0].tempo, tempo);
    }

    #[test]
    fn test_same_pitch_notes_close_in_open_order() {
        let events = [
            0x00, 0x90, 60, 100, // first 60 opens at tick 0
            0x60, 0x90, 60, 100, // second 60 opens at tick 96
            0x60, 0x80, 60, 0, // closes the first at tick 192
            0x60, 0x80, 60, 0, // closes the second at tick 288
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        let notes = &tracks[0].notes;
        assert_eq!(notes.len(), 2);
        assert!((notes[0].start - seconds(0, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((notes[0].duration - seconds(192, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((notes[1].start - seconds(96, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((notes[1].duration - seconds(192, DEFAULT_TEMPO)).abs() < 1e-6);
    }

    #[test]
    fn test_unmatched_note_off_is_ignored() {
        let events = [
            0x00, 0x80, 72, 0, // note off with nothing open
            0x00, 0x90, 60, 100, 0x60, 0x80, 60, 0,
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        assert_eq!(tracks[0].notes.len(), 1);
        assert_eq!(tracks[0].notes[0].pitch, Pitch(60));
    }

    #[test]
    fn test_skipped_events_do_not_disturb_timing() {
        let events = [
            0x00, 0xb0, 7, 100, // control change
            0x00, 0xc0, 5, // program change
            0x00, 0xf0, 0x02, 0x01, 0xf7, // sysex with two payload bytes
            0x00, 0xff, 0x01, 0x04, b't', b'e', b's', b't', // text meta
            0x60, 0x90, 60, 100, // note on at tick 96
            0x60, 0x80, 60, 0,
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        let note = tracks[0].notes[0];
        assert!((note.start - seconds(96, DEFAULT_TEMPO)).abs() < 1e-6);
        assert!((note.duration - seconds(96, DEFAULT_TEMPO)).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_track_keeps_earlier_notes() {
        let events = [
            0x00, 0x90, 60, 100, 0x60, 0x80, 60, 0, // one complete note
            0x00, 0x90, 64, // note on cut off before its velocity
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        assert_eq!(tracks[0].notes.len(), 1);
        assert_eq!(tracks[0].notes[0].pitch, Pitch(60));
    }

    #[test]
    fn test_open_note_without_off_is_dropped() {
        let events = [
            0x00, 0x90, 60, 100, // never closed
            0x00, 0x90, 64, 100, 0x60, 0x80, 64, 0,
        ];
        let tracks = decode(&file(&[&events])).unwrap();
        assert_eq!(tracks[0].notes.len(), 1);
        assert_eq!(tracks[0].notes[0].pitch, Pitch(64));
    }

    #[test]
    fn test_two_tracks() {
        let first = [0x00u8, 0x90, 60, 100, 0x60, 0x80, 60, 0];
        let second = [0x00u8, 0x90, 48, 80, 0x60, 0x80, 48, 0];
        let tracks = decode(&file(&[&first, &second])).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].notes[0].pitch, Pitch(60));
        assert_eq!(tracks[1].notes[0].pitch, Pitch(48));
    }

    #[test]
    fn test_file_too_short() {
        assert!(matches!(decode(&[]), Err(DecodeError::TooShort)));
        assert!(matches!(decode(&[0x4d; 13]), Err(DecodeError::TooShort)));
    }

    #[test]
    fn test_bad_header_tag() {
        let mut bytes = header(1, DIVISION);
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(DecodeError::BadHeaderTag)));
    }

    #[test]
    fn test_bad_header_length() {
        let mut bytes = header(1, DIVISION);
        bytes[7] = 5;
        bytes.extend([0u8; 8]);
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::BadHeaderLength(5))
        ));
    }

    #[test]
    fn test_no_tracks() {
        let mut bytes = header(0, DIVISION);
        bytes.extend([0u8; 2]);
        assert!(matches!(decode(&bytes), Err(DecodeError::NoTracks)));
    }

    #[test]
    fn test_header_with_extra_bytes() {
        let mut bytes = b"MThd".to_vec();
        bytes.extend(8u32.to_be_bytes());
        bytes.extend(0u16.to_be_bytes());
        bytes.extend(1u16.to_be_bytes());
        bytes.extend(DIVISION.to_be_bytes());
        bytes.extend([0xde, 0xad]); // ignored header padding
        bytes.extend(track_chunk(&[0x00, 0x90, 60, 100, 0x60, 0x80, 60, 0]));
        let tracks = decode(&bytes).unwrap();
        assert_eq!(tracks[0].notes.len(), 1);
    }

    #[test]
    fn test_track_stops_at_declared_length() {
        // The chunk declares only the first note; the trailing garbage
        // must be treated as the next (invalid) chunk, not as events.
        let events = [0x00u8, 0x90, 60, 100, 0x60, 0x80, 60, 0];
        let mut bytes = header(1, DIVISION);
        bytes.extend(track_chunk(&events));
        bytes.extend([0x00, 0x90, 64, 100]);
        let tracks = decode(&bytes).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].notes.len(), 1);
    }

    #[test]
    fn test_tick_conversion_is_monotonic() {
        for &tempo in &[60_000u32, DEFAULT_TEMPO, 1_000_000] {
            let mut last = 0.0;
            for tick in 0..2000 {
                let t = ticks_to_seconds(tick, tempo, DIVISION);
                assert!(t >= last);
                last = t;
            }
        }
    }

    #[test]
    fn test_vlq() {
        let mut reader = Reader::new(&[0x00, 0x40, 0x7f, 0x81, 0x00, 0xff, 0x7f, 0x81, 0x80, 0x00]);
        assert_eq!(reader.vlq(), Some(0));
        assert_eq!(reader.vlq(), Some(0x40));
        assert_eq!(reader.vlq(), Some(0x7f));
        assert_eq!(reader.vlq(), Some(0x80));
        assert_eq!(reader.vlq(), Some(0x3fff));
        assert_eq!(reader.vlq(), Some(0x4000));
        assert_eq!(reader.vlq(), None);
    }
}
