use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::consts::*;
use crate::track::{Track, TrackEvents};

/// Possible errors.
///
/// These are only ever produced while loading or encoding song data. Playback
/// itself cannot fail.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error {
    #[cfg_attr(feature = "std", error("Song data is empty"))]
    Empty,

    #[cfg_attr(feature = "std", error("Track block header at offset {offset} is truncated"))]
    Truncated { offset: usize },

    #[cfg_attr(feature = "std", error("Track block for channel {channel} is out of order"))]
    ChannelOrder { channel: u8 },

    #[cfg_attr(feature = "std", error("Invalid track length for channel {channel}"))]
    TrackLength { channel: u8 },

    #[cfg_attr(feature = "std", error("Invalid duration offset for channel {channel}"))]
    DurationOffset { channel: u8 },

    #[cfg_attr(feature = "std", error("Missing end of track for channel {channel}"))]
    MissingTrackEnd { channel: u8 },

    #[cfg_attr(feature = "std", error("Duration data overrun for channel {channel}"))]
    DurationOverrun { channel: u8 },

    #[cfg_attr(feature = "std", error("Channel {channel} is not available on this target"))]
    ChannelOutOfRange { channel: u8 },

    #[cfg_attr(feature = "std", error("Note {note} cannot be played on channel {channel}"))]
    NoteOutOfRange { channel: u8, note: u8 },

    #[cfg_attr(feature = "std", error("Output level table must have {expected} entries"))]
    LevelTableLength { expected: usize },

    #[cfg_attr(feature = "std", error("Output level {index} is lower than with one channel less"))]
    LevelTableOrder { index: usize },

    #[cfg_attr(feature = "std", error("Note duration of {ticks} ticks cannot be encoded"))]
    DurationTooLong { ticks: u16 },

    #[cfg_attr(feature = "std", error("Track for channel {channel} is too long to be encoded"))]
    TrackTooLong { channel: u8 },

    #[cfg_attr(feature = "std", error("Sample rate must not be zero"))]
    SampleRate,
}

/// A `Song` is the tempo byte followed by one block per used channel.
///
/// The data is read-only for the whole playback and is usually baked into
/// flash at build time.
#[derive(Debug, Clone, Copy)]
pub struct Song<'a> {
    data: &'a [u8],
}

impl<'a> Song<'a> {
    /// Create a new `Song` from a byte slice, checking every track block.
    ///
    /// ```rust
    /// # use bzmusic::Song;
    /// let song = Song::from_slice(&[0x79, 0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff, 0xff])?;
    /// assert_eq!(song.tempo(), 0x79);
    /// # Ok::<(), bzmusic::Error>(())
    /// ```
    pub fn from_slice(data: &'a [u8]) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut previous = None;
        let mut pos = TEMPO_LENGTH;
        let mut blocks = 0;
        while let Some(&channel) = data.get(pos) {
            if channel == SONG_END {
                break;
            }
            if previous.map_or(false, |previous| channel <= previous) {
                return Err(Error::ChannelOrder { channel });
            }

            let header = data
                .get(pos..pos + BLOCK_HEADER_LENGTH)
                .ok_or(Error::Truncated { offset: pos })?;
            let length = LittleEndian::read_u16(&header[BLOCK_LENGTH..]) as usize;
            let duration_offset = LittleEndian::read_u16(&header[BLOCK_DURATION_OFFSET..]) as usize;

            let block = data
                .get(pos..pos + length)
                .filter(|block| block.len() > BLOCK_HEADER_LENGTH)
                .ok_or(Error::TrackLength { channel })?;
            if duration_offset <= BLOCK_HEADER_LENGTH || duration_offset > length {
                return Err(Error::DurationOffset { channel });
            }
            check_track(channel, block, duration_offset)?;

            previous = Some(channel);
            pos += length;
            blocks += 1;
        }

        debug!("Loaded song: tempo {}, {} track blocks", data[0], blocks);

        Ok(Song { data })
    }

    /// Create a `Song` without checking it.
    ///
    /// Meant for data baked at build time that was checked offline. Malformed
    /// data makes playback decode garbage or panic.
    pub const fn new_unchecked(data: &'a [u8]) -> Self {
        Song { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Tick length in 256 µs slices, minus one.
    pub fn tempo(&self) -> u8 {
        self.data[0]
    }

    /// Nominal length of one tick, in microseconds.
    pub fn tick_duration_us(&self) -> u32 {
        TICK_SLICE_US * (u32::from(self.tempo()) + 1)
    }

    /// Beats per minute, at 16 ticks per beat.
    pub fn bpm(&self) -> f32 {
        60_000_000.0 / (self.tick_duration_us() * TICKS_PER_BEAT) as f32
    }

    /// Channel indices that have a track block, in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = u8> + 'a {
        self.blocks().map(|(channel, _)| channel)
    }

    /// Every event of one channel's track. Empty if the channel is unused.
    pub fn events(&self, channel: u8) -> TrackEvents<'a> {
        let track = self
            .block(channel)
            .map_or_else(Track::ended, |pos| Track::load(self.data, pos));

        TrackEvents::new(self.data, track)
    }

    /// Length of the longest track, in ticks.
    pub fn duration_ticks(&self) -> u32 {
        self.channels()
            .map(|channel| {
                self.events(channel)
                    .map(|event| u32::from(event.duration))
                    .sum()
            })
            .max()
            .unwrap_or(0)
    }

    /// Offset of the track block for `channel`.
    pub(crate) fn block(&self, channel: u8) -> Option<usize> {
        self.blocks()
            .find(|&(c, _)| c == channel)
            .map(|(_, pos)| pos)
    }

    /// Walk the block headers, yielding channel index and block offset.
    pub(crate) fn blocks(&self) -> Blocks<'a> {
        Blocks {
            data: self.data,
            pos: TEMPO_LENGTH,
        }
    }
}

pub(crate) struct Blocks<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = (u8, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.pos;
        let channel = *self.data.get(pos + BLOCK_CHANNEL)?;
        if channel == SONG_END {
            return None;
        }
        let length = self.data.get(pos + BLOCK_LENGTH..pos + BLOCK_DURATION_OFFSET)?;
        let length = LittleEndian::read_u16(length) as usize;
        if length == 0 {
            return None;
        }
        self.pos += length;

        Some((channel, pos))
    }
}

/// Walk a track's byte-code with checked reads, making sure the note array is
/// terminated and the duration array holds an entry for every note needing one.
fn check_track(channel: u8, block: &[u8], duration_offset: usize) -> Result<(), Error> {
    let notes = &block[BLOCK_HEADER_LENGTH..duration_offset];
    let durations = &block[duration_offset..];

    let mut pos = 0;
    let mut repeat = 0;
    for &note in notes {
        if note == TRACK_END {
            return Ok(());
        }
        if note >= INLINE_PAUSE_OFFSET {
            continue;
        }
        if repeat > 0 {
            repeat -= 1;
            continue;
        }

        let duration = *durations.get(pos).ok_or(Error::DurationOverrun { channel })?;
        if duration >= DURATION_TWO_BYTES {
            if pos + 1 >= durations.len() {
                return Err(Error::DurationOverrun { channel });
            }
            pos += 2;
        } else if duration >= DURATION_REPEAT {
            repeat = duration - DURATION_REPEAT;
            pos += 1;
        } else {
            pos += 1;
        }
    }

    Err(Error::MissingTrackEnd { channel })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{Event, Note};

    const EMPTY_TRACK: [u8; 9] = [0x79, 0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff, 0xff];

    #[rustfmt::skip]
    const TWO_TRACKS: [u8; 47] = [
        0x79,
        // channel 1, empty
        0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff,
        // channel 2, immediate pause of 5 ticks
        0x02, 0x26, 0x00, 0x18, 0x00, 0x04,
        0x18, 0x19, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b,
        0x6d, 0x6e, 0x54, 0xa9, 0xc0, 0x18, 0x18, 0xff,
        0x3f, 0xc1, 0xf3, 0x07, 0x83, 0x82, 0x0f, 0x80, 0xc0, 0x83,
        0x7e, 0xff, 0xff, 0x00,
        0xff,
    ];

    #[test]
    fn empty_track() {
        let song = Song::from_slice(&EMPTY_TRACK).unwrap();

        assert_eq!(song.tempo(), 0x79);
        assert_eq!(song.channels().collect::<Vec<_>>(), [1]);
        assert_eq!(song.events(1).count(), 0);
        assert_eq!(song.events(0).count(), 0);
        assert_eq!(song.duration_ticks(), 0);
    }

    #[test]
    fn tempo() {
        let song = Song::from_slice(&EMPTY_TRACK).unwrap();

        assert_eq!(song.tick_duration_us(), 31_232);
        assert!((song.bpm() - 120.07).abs() < 0.01);
    }

    #[test]
    fn decode_full_track() {
        let song = Song::from_slice(&TWO_TRACKS).unwrap();
        let events: Vec<_> = song.events(2).collect();

        let tone = |pitch, duration| Event::new(Note::Tone(pitch), duration);
        let rest = |duration| Event::new(Note::Rest, duration);
        assert_eq!(
            events,
            [
                tone(0x18, 64),
                tone(0x19, 500),
                tone(0x24, 8),
                tone(0x25, 8),
                tone(0x26, 8),
                tone(0x27, 8),
                tone(0x28, 8),
                tone(0x29, 8),
                tone(0x2a, 8),
                tone(0x2b, 8),
                tone(0x18, 16),
                rest(5),
                tone(0x19, 16),
                rest(5),
                rest(132),
                rest(127),
                rest(5),
                rest(23),
                tone(0x18, 16384),
                tone(0x18, 1),
            ]
        );
        assert_eq!(song.duration_ticks(), events.iter().map(|e| u32::from(e.duration)).sum::<u32>());
    }

    #[test]
    fn missing_song_end_is_accepted() {
        let song = Song::from_slice(&EMPTY_TRACK[..8]).unwrap();

        assert_eq!(song.channels().count(), 1);
    }

    #[test]
    fn empty() {
        assert_eq!(Song::from_slice(&[]).unwrap_err(), Error::Empty);
        assert_eq!(Song::from_slice(&[0x10]).unwrap().channels().count(), 0);
    }

    #[test]
    fn channel_order() {
        let mut data = TWO_TRACKS;
        data[8] = 0x01;

        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::ChannelOrder { channel: 1 }
        );
    }

    #[test]
    fn truncated_header() {
        assert_eq!(
            Song::from_slice(&EMPTY_TRACK[..4]).unwrap_err(),
            Error::Truncated { offset: 1 }
        );
    }

    #[test]
    fn track_length() {
        let mut data = EMPTY_TRACK;
        data[2] = 0x40;
        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::TrackLength { channel: 1 }
        );

        data[2] = 0x06;
        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::TrackLength { channel: 1 }
        );
    }

    #[test]
    fn duration_offset() {
        let mut data = EMPTY_TRACK;
        data[4] = 0x08;

        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::DurationOffset { channel: 1 }
        );
    }

    #[test]
    fn missing_track_end() {
        let mut data = EMPTY_TRACK;
        data[7] = 0xc0;

        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::MissingTrackEnd { channel: 1 }
        );
    }

    #[test]
    fn duration_overrun() {
        // Block ends before the duration of its last note
        let mut data = TWO_TRACKS;
        data[9] = 0x25;

        assert_eq!(
            Song::from_slice(&data).unwrap_err(),
            Error::DurationOverrun { channel: 2 }
        );
    }
}
