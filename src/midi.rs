//! Convert standard MIDI files to songs.
//!
//! Notes are sampled once per tick, at 16 ticks per beat of the average
//! tempo, and every MIDI note sounding during a tick is given a channel of the
//! target. How notes are spread over channels is up to a [`Strategy`].
//!
//! ```rust,no_run
//! # use bzmusic::{midi::Converter, targets::ATMEGA3208, Song};
//! let smf = std::fs::read("song.mid")?;
//! let data = Converter::new(&ATMEGA3208).convert(&smf)?.encode()?;
//! let song = Song::from_slice(&data)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::convert::TryFrom;

use log::{debug, info, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;

use crate::consts::{MAX_DURATION, PLAYABLE_NOTES, TICKS_PER_BEAT, TICK_SLICE_US};
use crate::encoder::{SongBuilder, TrackBuilder};
use crate::oscillator::ChannelConfig;
use crate::song::Error as SongError;
use crate::targets::Target;
use crate::track::Note;

/// MIDI note number of pitch 0, C2.
const PITCH_ZERO_KEY: i16 = 36;

/// Microseconds per beat until the first tempo change.
const DEFAULT_TEMPO: u32 = 500_000;

/// Strategies tried by [`Strategy::Auto`], [`Strategy::Smallest`] and
/// [`Strategy::FewestChannels`], in order.
const SIMPLE_STRATEGIES: [Strategy; 4] = [
    Strategy::Closest,
    Strategy::ClosestAverage,
    Strategy::FirstFitNarrowest,
    Strategy::FirstFit,
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid MIDI file")]
    Parse(#[from] midly::Error),

    #[error("Only MIDI files timed in ticks per beat are supported")]
    Timing,

    #[error("{notes} notes are played at once, but only {channels} channels are available")]
    TooManyNotes { notes: usize, channels: usize },

    #[error("MIDI note {key} at {seconds:.2} s cannot be played on any channel")]
    NoteOutOfRange { key: u8, seconds: f64 },

    #[error("Notes cannot be assigned to channels with the {0:?} strategy")]
    Unassignable(Strategy),

    #[error("Song error")]
    Song(#[from] SongError),
}

/// How notes are given a channel.
///
/// A channel only ever plays notes of one MIDI track, unless tracks are
/// merged with [`Converter::merge_tracks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The channel playing, or last playing, the closest note.
    Closest,
    /// The channel whose notes are on average closest.
    ClosestAverage,
    /// The first free channel.
    FirstFit,
    /// The first free channel, channels with a narrower range first.
    FirstFitNarrowest,
    /// The first of the other strategies that succeeds.
    Auto,
    /// The strategy giving the smallest song.
    Smallest,
    /// The strategy using the fewest channels, then giving the smallest song.
    FewestChannels,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        let strategy = match name {
            "closest" => Strategy::Closest,
            "closest-average" => Strategy::ClosestAverage,
            "first-fit" => Strategy::FirstFit,
            "first-fit-narrowest" => Strategy::FirstFitNarrowest,
            "auto" => Strategy::Auto,
            "smallest" => Strategy::Smallest,
            "fewest-channels" => Strategy::FewestChannels,
            _ => return None,
        };

        Some(strategy)
    }

    /// Pick one of the `legal` channels for `pitch`.
    fn choose(self, assignment: &Assignment<'_>, legal: &mut [usize], pitch: u8) -> usize {
        let first = legal[0];
        let started = !assignment.runs[first].is_empty();

        match self {
            Strategy::Closest if started => {
                let mut best: Option<(usize, u32, usize)> = None;
                for &channel in legal.iter() {
                    let distance = assignment
                        .last_pitch(channel)
                        .map_or(u32::MAX, |last| u32::from(last.abs_diff(pitch)));
                    let runs = assignment.runs[channel].len();

                    match best {
                        Some((_, best_distance, best_runs))
                            if best_distance < distance
                                || (best_distance == distance && best_runs >= runs) => {}
                        _ => best = Some((channel, distance, runs)),
                    }
                }

                best.map_or(first, |(channel, ..)| channel)
            }
            Strategy::ClosestAverage if started => {
                let mut best = (first, f64::INFINITY);
                for &channel in legal.iter() {
                    let distance = assignment
                        .average_pitch(channel)
                        .map_or(f64::INFINITY, |average| (average - f64::from(pitch)).abs());
                    if distance < best.1 {
                        best = (channel, distance);
                    }
                }

                best.0
            }
            Strategy::FirstFitNarrowest => {
                let channels = assignment.channels;
                legal.sort_by_key(|&channel| channels[channel].playable().len());
                legal[0]
            }
            _ => first,
        }
    }
}

/// MIDI file to song converter for one target.
#[derive(Debug, Clone)]
pub struct Converter {
    channels: Vec<ChannelConfig>,
    strategy: Strategy,
    bpm: Option<f64>,
    octave: i8,
    merge_tracks: bool,
}

impl Converter {
    pub fn new<const N: usize>(target: &Target<N>) -> Self {
        Converter {
            channels: target.channels.to_vec(),
            strategy: Strategy::Auto,
            bpm: None,
            octave: 0,
            merge_tracks: false,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Play the song at `bpm` instead of the file's average tempo.
    pub fn bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    /// Transpose every note by whole octaves.
    pub fn octave(mut self, octave: i8) -> Self {
        self.octave = octave;
        self
    }

    /// Let notes of different MIDI tracks share a channel.
    pub fn merge_tracks(mut self, merge_tracks: bool) -> Self {
        self.merge_tracks = merge_tracks;
        self
    }

    /// Convert a standard MIDI file.
    ///
    /// The returned builder holds one track per channel that plays anything.
    pub fn convert(&self, data: &[u8]) -> Result<SongBuilder, Error> {
        let smf = Smf::parse(data)?;
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(ticks) if ticks.as_int() > 0 => ticks.as_int(),
            _ => return Err(Error::Timing),
        };

        let midi = MidiEvents::read(&smf);
        let tempo = average_tempo(&midi.tempos, midi.duration);
        if midi.tempos.len() > 1 {
            warn!("Variable tempo, using the average of {:.1} BPM", 60_000_000.0 / tempo);
        }

        let frames = frame_times(&midi.tempos, tempo, ticks_per_beat, midi.duration);
        let transpose = i16::from(self.octave) * 12;
        let notes = frame_notes(&midi.notes, &frames, smf.tracks.len(), transpose);
        info!(
            "Read {} MIDI tracks, {} note events, {} ticks",
            smf.tracks.len(),
            midi.notes.len(),
            frames.len() - 1
        );

        let notes = self.check_notes(notes, tempo, transpose)?;
        let tracks = self.assign_channels(&notes)?;

        let bpm = self.bpm.unwrap_or(60_000_000.0 / tempo);
        let slowest = 60_000_000.0 / f64::from(TICKS_PER_BEAT * TICK_SLICE_US * 256);
        if bpm < slowest {
            warn!("{:.1} BPM is too slow, using {:.1} BPM", bpm, slowest);
        }

        Ok(tracks
            .into_iter()
            .fold(SongBuilder::with_bpm(bpm), SongBuilder::track))
    }

    /// Check that notes fit on the target, and narrow them to pitches.
    fn check_notes(
        &self,
        notes: Vec<Vec<Vec<i16>>>,
        tempo: f64,
        transpose: i16,
    ) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        let frames = notes.first().map_or(0, Vec::len);
        let most = (0..frames)
            .map(|frame| notes.iter().map(|track| track[frame].len()).sum::<usize>())
            .max()
            .unwrap_or(0);
        if most > self.channels.len() {
            return Err(Error::TooManyNotes {
                notes: most,
                channels: self.channels.len(),
            });
        }

        notes
            .into_iter()
            .map(|track| {
                track
                    .into_iter()
                    .enumerate()
                    .map(|(frame, pitches)| {
                        pitches
                            .into_iter()
                            .map(|pitch| {
                                self.playable_pitch(pitch).ok_or_else(|| {
                                    Error::NoteOutOfRange {
                                        key: (pitch + PITCH_ZERO_KEY - transpose) as u8,
                                        seconds: frame as f64 * tempo
                                            / f64::from(TICKS_PER_BEAT)
                                            / 1_000_000.0,
                                    }
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }

    fn playable_pitch(&self, pitch: i16) -> Option<u8> {
        let pitch = u8::try_from(pitch).ok()?;
        let playable = usize::from(pitch) < PLAYABLE_NOTES
            && self
                .channels
                .iter()
                .any(|config| config.playable().contains(&pitch));

        Some(pitch).filter(|_| playable)
    }

    fn assign_channels(&self, notes: &[Vec<Vec<u8>>]) -> Result<Vec<TrackBuilder>, Error> {
        let strategies = match self.strategy {
            Strategy::Auto | Strategy::Smallest | Strategy::FewestChannels => {
                &SIMPLE_STRATEGIES[..]
            }
            ref strategy => std::slice::from_ref(strategy),
        };

        let mut best: Option<(Vec<TrackBuilder>, (usize, usize))> = None;
        for &strategy in strategies {
            let tracks = match assign(strategy, &self.channels, notes, self.merge_tracks) {
                Some(tracks) => tracks,
                None => {
                    debug!("{:?} strategy failed", strategy);
                    continue;
                }
            };

            if !matches!(self.strategy, Strategy::Smallest | Strategy::FewestChannels) {
                info!("Assigned {} channels with the {:?} strategy", tracks.len(), strategy);
                return Ok(tracks);
            }

            let size = tracks
                .iter()
                .map(|track| track.encode().map(|block| block.len()))
                .sum::<Result<usize, _>>()?;
            debug!(
                "{:?} strategy: {} channels, {} bytes",
                strategy,
                tracks.len(),
                size
            );

            let rank = match self.strategy {
                Strategy::FewestChannels => (tracks.len(), size),
                _ => (size, tracks.len()),
            };
            if best.as_ref().map_or(true, |(_, best)| rank < *best) {
                best = Some((tracks, rank));
            }
        }

        best.map(|(tracks, _)| tracks)
            .ok_or(Error::Unassignable(self.strategy))
    }
}

/// Note events of every MIDI track, in time order.
#[derive(Debug)]
struct MidiEvents {
    notes: Vec<NoteEvent>,
    /// Microseconds per beat from each MIDI tick on.
    tempos: BTreeMap<u32, u32>,
    /// Time of the last event.
    duration: u32,
}

#[derive(Debug, Clone, Copy)]
struct NoteEvent {
    time: u32,
    track: usize,
    key: u8,
    on: bool,
}

impl MidiEvents {
    fn read(smf: &Smf<'_>) -> Self {
        let mut notes = Vec::new();
        let mut tempos = BTreeMap::new();
        tempos.insert(0, DEFAULT_TEMPO);
        let mut duration = 0;

        for (track, events) in smf.tracks.iter().enumerate() {
            let mut time = 0_u32;
            for event in events {
                time = time.saturating_add(event.delta.as_int());
                duration = duration.max(time);

                match event.kind {
                    TrackEventKind::Midi { message, .. } => {
                        let (key, on) = match message {
                            MidiMessage::NoteOn { key, vel } => (key, vel.as_int() > 0),
                            MidiMessage::NoteOff { key, .. } => (key, false),
                            _ => continue,
                        };
                        notes.push(NoteEvent {
                            time,
                            track,
                            key: key.as_int(),
                            on,
                        });
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) if tempo.as_int() > 0 => {
                        tempos.insert(time, tempo.as_int());
                    }
                    _ => {}
                }
            }
        }

        // Stable, so events at the same time keep their track and file order
        notes.sort_by_key(|event| event.time);

        MidiEvents {
            notes,
            tempos,
            duration,
        }
    }
}

/// Tempo in microseconds per beat, averaged over the song by duration.
fn average_tempo(tempos: &BTreeMap<u32, u32>, duration: u32) -> f64 {
    if duration == 0 {
        return f64::from(tempo_at(tempos, 0));
    }

    let mut total = 0.0;
    let mut last = (0, DEFAULT_TEMPO);
    for (&time, &tempo) in tempos.range(..duration) {
        total += f64::from(last.1) * f64::from(time - last.0);
        last = (time, tempo);
    }
    total += f64::from(last.1) * f64::from(duration - last.0);

    total / f64::from(duration)
}

fn tempo_at(tempos: &BTreeMap<u32, u32>, time: u32) -> u32 {
    tempos
        .range(..=time)
        .next_back()
        .map_or(DEFAULT_TEMPO, |(_, &tempo)| tempo)
}

/// MIDI time at the start of every song tick, then at the end of the last.
///
/// A song tick is a sixteenth of a beat at the `average` tempo, so ticks span
/// more MIDI time where the file is faster than average.
fn frame_times(
    tempos: &BTreeMap<u32, u32>,
    average: f64,
    ticks_per_beat: u16,
    duration: u32,
) -> Vec<u32> {
    let step = f64::from(ticks_per_beat) / f64::from(TICKS_PER_BEAT);

    let mut frames = Vec::new();
    let mut time = 0.0;
    while time < f64::from(duration) {
        frames.push(libm::round(time) as u32);
        time += average / f64::from(tempo_at(tempos, time as u32)) * step;
    }
    frames.push(libm::round(time) as u32);

    frames
}

/// Pitches sounding during every frame, per MIDI track.
///
/// Pitches may be out of range. A note starting and ending within one frame
/// lasts the whole frame. A note started again while sounding ends instead.
fn frame_notes(
    events: &[NoteEvent],
    frames: &[u32],
    tracks: usize,
    transpose: i16,
) -> Vec<Vec<Vec<i16>>> {
    let mut notes = vec![Vec::new(); tracks];
    let mut sounding: Vec<Vec<u8>> = vec![Vec::new(); tracks];
    let mut events = events.iter().peekable();

    for bounds in frames.windows(2) {
        let mut started = Vec::new();
        let mut released = Vec::new();

        while let Some(event) = events.next_if(|event| event.time < bounds[1]) {
            let keys = &mut sounding[event.track];
            match keys.iter().position(|&key| key == event.key) {
                None if event.on => {
                    keys.push(event.key);
                    started.push((event.track, event.key));
                }
                None => {}
                Some(_) if started.contains(&(event.track, event.key)) => {
                    released.push((event.track, event.key));
                }
                Some(index) => {
                    keys.remove(index);
                }
            }
        }

        for (track, keys) in sounding.iter().enumerate() {
            notes[track].push(
                keys.iter()
                    .map(|&key| i16::from(key) - PITCH_ZERO_KEY + transpose)
                    .collect(),
            );
        }
        for (track, key) in released {
            sounding[track].retain(|&sounding| sounding != key);
        }
    }

    notes
}

/// Channels being filled in, one frame at a time.
#[derive(Debug)]
struct Assignment<'c> {
    channels: &'c [ChannelConfig],
    /// Notes of each channel with their length in frames.
    runs: Vec<Vec<(Note, u16)>>,
    /// MIDI track each channel plays.
    owners: Vec<Option<usize>>,
    /// Sum and count of the pitches each channel played.
    pitches: Vec<(u32, u32)>,
}

impl<'c> Assignment<'c> {
    fn new(channels: &'c [ChannelConfig]) -> Self {
        Assignment {
            channels,
            runs: vec![Vec::new(); channels.len()],
            owners: vec![None; channels.len()],
            pitches: vec![(0, 0); channels.len()],
        }
    }

    fn push(&mut self, channel: usize, note: Note) {
        let runs = &mut self.runs[channel];
        match runs.last_mut() {
            Some((last, frames)) if *last == note && *frames < MAX_DURATION => *frames += 1,
            _ => runs.push((note, 1)),
        }

        if let Note::Tone(pitch) = note {
            let (sum, count) = &mut self.pitches[channel];
            *sum += u32::from(pitch);
            *count += 1;
        }
    }

    /// Pitch playing, or played before the current rest.
    fn last_pitch(&self, channel: usize) -> Option<u8> {
        let runs = &self.runs[channel];
        match runs.last() {
            Some((Note::Rest, _)) if runs.len() > 1 => runs[runs.len() - 2].0.pitch(),
            Some((note, _)) => note.pitch(),
            None => None,
        }
    }

    fn average_pitch(&self, channel: usize) -> Option<f64> {
        let (sum, count) = self.pitches[channel];
        if count == 0 {
            return None;
        }

        Some(f64::from(sum) / f64::from(count))
    }

    /// Tracks of every channel playing something, trailing rests removed.
    fn into_tracks(self) -> Vec<TrackBuilder> {
        self.runs
            .into_iter()
            .enumerate()
            .filter_map(|(channel, mut runs)| {
                while runs.last().map_or(false, |(note, _)| note.is_rest()) {
                    runs.pop();
                }
                if runs.is_empty() {
                    return None;
                }

                Some(
                    runs.into_iter()
                        .fold(TrackBuilder::new(channel as u8), |track, (note, frames)| {
                            track.note(note, frames)
                        }),
                )
            })
            .collect()
    }
}

/// Give every note of every frame a free channel able to play it.
fn assign(
    strategy: Strategy,
    channels: &[ChannelConfig],
    notes: &[Vec<Vec<u8>>],
    merge_tracks: bool,
) -> Option<Vec<TrackBuilder>> {
    let frames = notes.first().map_or(0, Vec::len);
    let mut assignment = Assignment::new(channels);

    for frame in 0..frames {
        let mut free: Vec<usize> = (0..channels.len()).collect();

        for (track, track_notes) in notes.iter().enumerate() {
            for &pitch in &track_notes[frame] {
                let mut legal: Vec<usize> = free
                    .iter()
                    .copied()
                    .filter(|&channel| {
                        channels[channel].playable().contains(&pitch)
                            && (merge_tracks
                                || assignment.owners[channel].map_or(true, |owner| owner == track))
                    })
                    .collect();
                if legal.is_empty() {
                    return None;
                }

                let channel = strategy.choose(&assignment, &mut legal, pitch);
                free.retain(|&free| free != channel);
                assignment.owners[channel].get_or_insert(track);
                assignment.push(channel, Note::Tone(pitch));
            }
        }

        for channel in free {
            assignment.push(channel, Note::Rest);
        }
    }

    Some(assignment.into_tracks())
}
