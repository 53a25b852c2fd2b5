use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;

/// What a channel plays for the length of one decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note {
    /// Pitch index, 0 (C2) to 83 (B8).
    Tone(u8),
    Rest,
}

impl Note {
    fn from_byte(byte: u8) -> Self {
        if byte == NOTE_REST {
            Note::Rest
        } else {
            Note::Tone(byte)
        }
    }

    /// The pitch index, or `None` for a rest.
    pub fn pitch(self) -> Option<u8> {
        match self {
            Note::Tone(pitch) => Some(pitch),
            Note::Rest => None,
        }
    }

    pub fn is_rest(self) -> bool {
        self == Note::Rest
    }
}

/// A decoded note and how many ticks it lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub note: Note,
    pub duration: u16,
}

impl Event {
    pub fn new(note: Note, duration: u16) -> Self {
        Event { note, duration }
    }
}

/// Cursor state of one channel through its track block.
///
/// All durations are stored minus one, the way they are encoded: a note with
/// `duration_left == 0` is in its last tick.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    note_pos: Option<usize>, // None once the track end has been read
    duration_pos: usize,
    immediate_pause: u8,
    note: Note,
    duration_left: u16,
    duration_total: u16, // MSB set when an immediate pause follows
    duration_repeat: u8,
}

impl Track {
    /// A track that has nothing to play.
    pub const fn ended() -> Self {
        Track {
            note_pos: None,
            duration_pos: 0,
            immediate_pause: 0,
            note: Note::Rest,
            duration_left: 0,
            duration_total: 0,
            duration_repeat: 0,
        }
    }

    /// Load the track block starting at `block` in the song data.
    pub(crate) fn load(data: &[u8], block: usize) -> Self {
        let duration_offset = LittleEndian::read_u16(&data[block + BLOCK_DURATION_OFFSET..]);

        Track {
            note_pos: Some(block + BLOCK_HEADER_LENGTH),
            duration_pos: block + duration_offset as usize,
            immediate_pause: data[block + BLOCK_IMMEDIATE_PAUSE],
            note: Note::Rest,
            duration_left: 0,
            duration_total: 0,
            duration_repeat: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.note_pos.is_none()
    }

    /// The note currently being played.
    pub fn note(&self) -> Note {
        self.note
    }

    /// Ticks left after the current one before the next note is decoded.
    pub fn duration_left(&self) -> u16 {
        self.duration_left
    }

    /// Spend one tick of the current note.
    pub(crate) fn count_down(&mut self) {
        self.duration_left -= 1;
    }

    /// Read the next note from the track data and make it the current note.
    ///
    /// Returns `None` and marks the track exhausted when the end of the note
    /// array is reached. The track must not be exhausted and the current note
    /// must be in its last tick. The song data is trusted: it is only ever
    /// checked once, by `Song::from_slice`.
    pub fn decode_next(&mut self, data: &[u8]) -> Option<Event> {
        debug_assert_eq!(self.duration_left, 0);
        let mut note_pos = self.note_pos?;

        if self.duration_total & IMMEDIATE_PAUSE_MASK != 0 {
            // The previous note is followed by the immediate pause.
            self.duration_total &= !IMMEDIATE_PAUSE_MASK;
            self.note = Note::Rest;
            self.duration_left = u16::from(self.immediate_pause);
            return Some(self.event());
        }

        let mut note = data[note_pos];
        note_pos += 1;
        if note == TRACK_END {
            self.note_pos = None;
            self.note = Note::Rest;
            return None;
        }
        self.note_pos = Some(note_pos);

        if note >= INLINE_PAUSE_OFFSET {
            // Self-contained pause, duration_total is left untouched.
            self.note = Note::Rest;
            self.duration_left = u16::from(note - INLINE_PAUSE_OFFSET);
            return Some(self.event());
        }

        if self.duration_repeat > 0 {
            self.duration_repeat -= 1;
        } else {
            let duration = data[self.duration_pos];
            if duration >= DURATION_TWO_BYTES {
                let low = data[self.duration_pos + 1];
                self.duration_total = u16::from(duration & 0x3f) << 8 | u16::from(low);
                self.duration_pos += 2;
            } else if duration >= DURATION_REPEAT {
                // This note and the following ones reuse the last duration.
                self.duration_repeat = duration - DURATION_REPEAT;
                self.duration_pos += 1;
            } else {
                self.duration_total = u16::from(duration);
                self.duration_pos += 1;
            }
        }
        self.duration_left = self.duration_total;

        if note >= IMMEDIATE_PAUSE_OFFSET {
            note -= IMMEDIATE_PAUSE_OFFSET;
            self.duration_total |= IMMEDIATE_PAUSE_MASK;
        }
        self.note = Note::from_byte(note);

        Some(self.event())
    }

    fn event(&self) -> Event {
        Event::new(self.note, self.duration_left + 1)
    }
}

/// Iterator over every decoded event of one track, without tick timing.
#[derive(Debug, Clone)]
pub struct TrackEvents<'a> {
    data: &'a [u8],
    track: Track,
}

impl<'a> TrackEvents<'a> {
    pub(crate) fn new(data: &'a [u8], track: Track) -> Self {
        TrackEvents { data, track }
    }
}

impl<'a> Iterator for TrackEvents<'a> {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.track.duration_left = 0;
        self.track.decode_next(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tempo, then a single block for channel 0 with the given immediate pause.
    fn song(immediate_pause: u8, notes: &[u8], durations: &[u8]) -> Vec<u8> {
        let duration_offset = BLOCK_HEADER_LENGTH + notes.len();
        let length = duration_offset + durations.len();

        let mut data = vec![0x79, 0x00, length as u8, 0, duration_offset as u8, 0];
        data.push(immediate_pause);
        data.extend_from_slice(notes);
        data.extend_from_slice(durations);
        data.push(SONG_END);
        data
    }

    fn decode_all(data: &[u8]) -> Vec<Event> {
        TrackEvents::new(data, Track::load(data, 1)).collect()
    }

    #[test]
    fn single_and_two_byte_durations() {
        let data = song(0, &[0x18, 0x19, 0xff], &[0x3f, 0xc1, 0xf3]);

        assert_eq!(
            decode_all(&data),
            [
                Event::new(Note::Tone(0x18), 64),
                Event::new(Note::Tone(0x19), 500),
            ]
        );
    }

    #[test]
    fn repeated_duration() {
        let data = song(0, &[0x24, 0x25, 0x26, 0x27, 0x28, 0xff], &[0x07, 0x83]);
        let events = decode_all(&data);

        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|event| event.duration == 8));
        assert_eq!(events[4].note, Note::Tone(0x28));
    }

    #[test]
    fn repeat_marker_uses_duration_before_it() {
        let notes = [0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0xff];
        let data = song(0, &notes, &[0x0f, 0x83, 0x01]);
        let durations: Vec<_> = decode_all(&data).iter().map(|e| e.duration).collect();

        assert_eq!(durations, [16, 16, 16, 16, 16, 2]);
    }

    #[test]
    fn immediate_pause_after_tone_and_rest() {
        let data = song(4, &[0x6d, 0xa9, 0x18, 0xff], &[0x0f, 0x7e, 0x00]);
        let mut track = Track::load(&data, 1);

        assert_eq!(
            track.decode_next(&data),
            Some(Event::new(Note::Tone(0x18), 16))
        );
        let note_pos = track.note_pos;
        track.duration_left = 0;
        assert_eq!(track.decode_next(&data), Some(Event::new(Note::Rest, 5)));
        assert_eq!(track.note_pos, note_pos);

        track.duration_left = 0;
        assert_eq!(track.decode_next(&data), Some(Event::new(Note::Rest, 127)));
        track.duration_left = 0;
        assert_eq!(track.decode_next(&data), Some(Event::new(Note::Rest, 5)));
        track.duration_left = 0;
        assert_eq!(track.decode_next(&data), Some(Event::new(Note::Tone(0x18), 1)));
    }

    #[test]
    fn immediate_pause_keeps_duration_for_repeats() {
        let data = song(0, &[0x6d, 0x6e, 0x18, 0xff], &[0x0f, 0x81]);

        assert_eq!(
            decode_all(&data),
            [
                Event::new(Note::Tone(0x18), 16),
                Event::new(Note::Rest, 1),
                Event::new(Note::Tone(0x19), 16),
                Event::new(Note::Rest, 1),
                Event::new(Note::Tone(0x18), 16),
            ]
        );
    }

    #[test]
    fn inline_pause_consumes_no_duration() {
        let data = song(0, &[0x18, 0xc0, 0xaa, 0x19, 0xff], &[0x03, 0x80]);

        assert_eq!(
            decode_all(&data),
            [
                Event::new(Note::Tone(0x18), 4),
                Event::new(Note::Rest, 23),
                Event::new(Note::Rest, 1),
                Event::new(Note::Tone(0x19), 4),
            ]
        );
    }

    #[test]
    fn explicit_rest() {
        let data = song(0, &[0x54, 0xff], &[0xc0, 0x83]);

        assert_eq!(decode_all(&data), [Event::new(Note::Rest, 132)]);
    }

    #[test]
    fn end_of_track() {
        let data = song(0, &[0xff], &[]);
        let mut track = Track::load(&data, 1);

        assert!(!track.is_exhausted());
        assert_eq!(track.decode_next(&data), None);
        assert!(track.is_exhausted());
        assert_eq!(track.decode_next(&data), None);
    }
}
