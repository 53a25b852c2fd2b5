//! Build song byte-code from note lists.
//!
//! ```rust
//! # use bzmusic::{Note, Song, SongBuilder, TrackBuilder};
//! let data = SongBuilder::with_bpm(120.0)
//!     .track(
//!         TrackBuilder::new(0)
//!             .note(Note::Tone(24), 16)
//!             .note(Note::Rest, 4)
//!             .note(Note::Tone(28), 16),
//!     )
//!     .encode()?;
//!
//! let song = Song::from_slice(&data)?;
//! assert_eq!(song.tempo(), 0x79);
//! assert_eq!(song.duration_ticks(), 36);
//! # Ok::<(), bzmusic::Error>(())
//! ```

use std::collections::HashMap;

use log::debug;

use crate::consts::*;
use crate::song::Error;
use crate::track::{Event, Note};

/// Song byte-code builder.
#[derive(Debug, Clone, Default)]
pub struct SongBuilder {
    tempo: u8,
    tracks: Vec<TrackBuilder>,
}

impl SongBuilder {
    /// `tempo` is the tick length in 256 µs slices, minus one.
    pub fn new(tempo: u8) -> Self {
        SongBuilder {
            tempo,
            tracks: Vec::new(),
        }
    }

    /// Pick the tempo closest to `bpm` beats per minute, at 16 ticks per beat.
    pub fn with_bpm(bpm: f64) -> Self {
        let slices = 60_000_000.0 / (bpm * f64::from(TICKS_PER_BEAT * TICK_SLICE_US));
        let tempo = (libm::round(slices) - 1.0).max(0.0).min(f64::from(u8::MAX));

        Self::new(tempo as u8)
    }

    pub fn track(mut self, track: TrackBuilder) -> Self {
        self.tracks.push(track);
        self
    }

    /// Encode the song. Tracks are written in channel order.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut tracks: Vec<_> = self.tracks.iter().collect();
        tracks.sort_by_key(|track| track.channel);
        if let Some(pair) = tracks.windows(2).find(|pair| pair[0].channel == pair[1].channel) {
            return Err(Error::ChannelOrder {
                channel: pair[1].channel,
            });
        }

        let mut data = vec![self.tempo];
        for track in tracks {
            data.extend(track.encode()?);
        }
        data.push(SONG_END);

        debug!("Encoded song: {} bytes", data.len());

        Ok(data)
    }
}

/// Track block builder for one channel.
///
/// Consecutive rests are merged. Rests longer than the longest duration are
/// fine, but tones are not.
#[derive(Debug, Clone)]
pub struct TrackBuilder {
    channel: u8,
    events: Vec<Event>,
    immediate_pause: Option<u16>,
}

impl TrackBuilder {
    pub fn new(channel: u8) -> Self {
        TrackBuilder {
            channel,
            events: Vec::new(),
            immediate_pause: None,
        }
    }

    /// Append a note lasting `ticks`. Zero tick notes are dropped.
    pub fn note(mut self, note: Note, mut ticks: u16) -> Self {
        if let Some(last) = self.events.last_mut() {
            if last.note.is_rest() && note.is_rest() {
                let merged = ticks.min(u16::MAX - last.duration);
                last.duration += merged;
                ticks -= merged;
            }
        }

        // A merged rest overflowing one event carries on in the next
        if ticks > 0 {
            self.events.push(Event::new(note, ticks));
        }
        self
    }

    /// Append every event of an iterator.
    pub fn events<I: IntoIterator<Item = Event>>(self, events: I) -> Self {
        events
            .into_iter()
            .fold(self, |track, event| track.note(event.note, event.duration))
    }

    /// Set the rest length, 1 to 256 ticks, that can be folded into the tone
    /// before it.
    ///
    /// By default this is the most common length of rests following a tone.
    pub fn immediate_pause(mut self, ticks: u16) -> Self {
        self.immediate_pause = Some(ticks.max(1).min(256));
        self
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Encode the track block, header included.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let channel = self.channel;
        if channel == SONG_END {
            return Err(Error::ChannelOutOfRange { channel });
        }

        let immediate_pause = self
            .immediate_pause
            .unwrap_or_else(|| self.common_pause());

        let mut notes = Vec::new();
        let mut durations = Durations::default();

        let mut events = self.events.iter().peekable();
        while let Some(event) = events.next() {
            let pitch = match event.note {
                Note::Tone(pitch) if usize::from(pitch) >= PLAYABLE_NOTES => {
                    return Err(Error::NoteOutOfRange {
                        channel,
                        note: pitch,
                    });
                }
                Note::Tone(pitch) => pitch,
                Note::Rest => {
                    encode_rest(event.duration, &mut notes, &mut durations);
                    continue;
                }
            };

            if event.duration > MAX_DURATION {
                return Err(Error::DurationTooLong {
                    ticks: event.duration,
                });
            }
            durations.push(event.duration - 1);

            let folded = events
                .next_if(|next| next.note.is_rest() && next.duration == immediate_pause)
                .is_some();
            notes.push(if folded {
                pitch + IMMEDIATE_PAUSE_OFFSET
            } else {
                pitch
            });
        }
        notes.push(TRACK_END);
        let durations = durations.finish();

        let duration_offset = BLOCK_HEADER_LENGTH + notes.len();
        let length = duration_offset + durations.len();
        if length > usize::from(u16::MAX) {
            return Err(Error::TrackTooLong { channel });
        }

        let mut block = Vec::with_capacity(length);
        block.push(channel);
        block.extend_from_slice(&(length as u16).to_le_bytes());
        block.extend_from_slice(&(duration_offset as u16).to_le_bytes());
        block.push((immediate_pause - 1) as u8);
        block.extend(notes);
        block.extend(durations);

        debug!(
            "Encoded track for channel {}: {} events, {} bytes",
            channel,
            self.events.len(),
            length
        );

        Ok(block)
    }

    /// Most common length of a rest directly following a tone, shortest first.
    fn common_pause(&self) -> u16 {
        let mut counts = HashMap::new();
        for pair in self.events.windows(2) {
            if !pair[0].note.is_rest() && pair[1].note.is_rest() && pair[1].duration <= 256 {
                *counts.entry(pair[1].duration).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .max_by_key(|&(ticks, count)| (count, std::cmp::Reverse(ticks)))
            .map_or(1, |(ticks, _)| ticks)
    }
}

/// Short rests are inlined in the note array, longer ones take explicit rest
/// notes of at most the longest duration each.
fn encode_rest(mut ticks: u16, notes: &mut Vec<u8>, durations: &mut Durations) {
    while ticks > MAX_INLINE_PAUSE {
        let part = ticks.min(MAX_DURATION);
        notes.push(NOTE_REST);
        durations.push(part - 1);
        ticks -= part;
    }
    if ticks > 0 {
        notes.push(INLINE_PAUSE_OFFSET + (ticks - 1) as u8);
    }
}

/// Duration array writer, folding runs of the same duration into repeat
/// markers.
#[derive(Debug, Default)]
struct Durations {
    data: Vec<u8>,
    // The decoder starts with a zero duration.
    last: u16,
    run: usize,
}

impl Durations {
    /// Add the duration, minus one, of the next note needing one.
    fn push(&mut self, value: u16) {
        if value == self.last {
            self.run += 1;
            if self.run > MAX_REPEAT {
                self.flush();
            }
            return;
        }

        self.flush();
        if value < MAX_SHORT_DURATION {
            self.data.push(value as u8);
        } else {
            self.data.push(DURATION_TWO_BYTES | (value >> 8) as u8);
            self.data.push(value as u8);
        }
        self.last = value;
    }

    fn flush(&mut self) {
        if self.run > 0 {
            self.data.push(DURATION_REPEAT + (self.run - 1) as u8);
            self.run = 0;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.data
    }
}
