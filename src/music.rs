use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::consts::*;
use crate::song::Song;
use crate::track::{Note, Track};

/// Whatever turns decoded notes into sound.
pub trait ToneBackend {
    /// Called once before the first playback pass.
    fn setup(&mut self) {}

    /// Silence every channel. Called at the start of each playback pass.
    fn reset(&mut self);

    /// The note played on `channel` changed.
    ///
    /// The channel must be audibly updated when this returns. It is called
    /// with interrupts enabled.
    fn on_note_changed(&mut self, channel: usize, note: Note);

    /// The track of `channel` ended.
    ///
    /// A backend sharing one output between channels turns all of them off
    /// here. The default only silences `channel`.
    fn on_track_end(&mut self, channel: usize) {
        self.on_note_changed(channel, Note::Rest);
    }
}

impl<B: ToneBackend + ?Sized> ToneBackend for &mut B {
    fn setup(&mut self) {
        (**self).setup()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn on_note_changed(&mut self, channel: usize, note: Note) {
        (**self).on_note_changed(channel, note)
    }

    fn on_track_end(&mut self, channel: usize) {
        (**self).on_track_end(channel)
    }
}

/// Waits between scheduler ticks.
pub trait Pacer {
    fn wait_tick(&mut self, tempo: u8);
}

/// Paces ticks by busy-waiting `tempo + TEMPO_ADJUST` slices of 256 µs.
///
/// The adjustment makes up for the time spent decoding notes.
#[derive(Debug)]
pub struct BusyWait<D> {
    delay: D,
}

impl<D: DelayNs> BusyWait<D> {
    pub fn new(delay: D) -> Self {
        BusyWait { delay }
    }

    pub fn into_inner(self) -> D {
        self.delay
    }
}

impl<D: DelayNs> Pacer for BusyWait<D> {
    fn wait_tick(&mut self, tempo: u8) {
        let slices = (i16::from(tempo) + TEMPO_ADJUST).max(0);
        for _ in 0..slices {
            self.delay.delay_us(TICK_SLICE_US);
        }
    }
}

/// Playback state for `N` channels: one `Track` per channel.
///
/// Creating a new state restarts the song from the beginning, which is all
/// that looping takes.
#[derive(Debug, Clone)]
pub struct MusicState<'a, const N: usize> {
    data: &'a [u8],
    tempo: u8,
    tracks: [Track; N],
}

impl<'a, const N: usize> MusicState<'a, N> {
    /// Load the tracks of `song`. Blocks for channels `N` and above are
    /// never played.
    pub fn new(song: &Song<'a>) -> Self {
        let data = song.as_bytes();
        let mut blocks = song.blocks().peekable();
        let tracks = core::array::from_fn(|channel| match blocks.peek() {
            Some(&(c, pos)) if usize::from(c) == channel => {
                blocks.next();
                Track::load(data, pos)
            }
            _ => Track::ended(),
        });

        MusicState {
            data,
            tempo: song.tempo(),
            tracks,
        }
    }

    pub fn tempo(&self) -> u8 {
        self.tempo
    }

    pub fn tracks(&self) -> &[Track; N] {
        &self.tracks
    }

    /// Whether any track has not been exhausted yet.
    pub fn is_playing(&self) -> bool {
        self.tracks.iter().any(|track| !track.is_exhausted())
    }

    /// Advance every channel by one tick.
    ///
    /// Channels whose note has expired decode their next note and report it
    /// to the backend. A channel reaching the end of its track is reported
    /// with `on_track_end`.
    ///
    /// Returns `false` once every track was already exhausted at the start of
    /// the tick.
    pub fn tick<B: ToneBackend + ?Sized>(&mut self, backend: &mut B) -> bool {
        let mut playing = false;

        for (channel, track) in self.tracks.iter_mut().enumerate() {
            if track.is_exhausted() {
                continue;
            }
            playing = true;

            if track.duration_left() > 0 {
                track.count_down();
                continue;
            }

            match track.decode_next(self.data) {
                Some(event) => {
                    trace!("channel {}: {:?}", channel, event);
                    backend.on_note_changed(channel, event.note);
                }
                None => {
                    debug!("channel {}: end of track", channel);
                    backend.on_track_end(channel);
                }
            }
        }

        playing
    }
}

/// Play `song` on `N` channels until every track is exhausted, then start over
/// when `looping`.
///
/// ```no_run
/// # use bzmusic::{play, BusyWait, Song, ToneBackend, Note};
/// # struct Backend;
/// # impl ToneBackend for Backend {
/// #     fn reset(&mut self) {}
/// #     fn on_note_changed(&mut self, _: usize, _: Note) {}
/// # }
/// # fn run(song: &Song, delay: impl embedded_hal::delay::DelayNs) {
/// let mut pacer = BusyWait::new(delay);
/// play::<_, _, 3>(song, &mut Backend, &mut pacer, true);
/// # }
/// ```
pub fn play<B, P, const N: usize>(song: &Song<'_>, backend: &mut B, pacer: &mut P, looping: bool)
where
    B: ToneBackend + ?Sized,
    P: Pacer + ?Sized,
{
    backend.setup();

    loop {
        let mut state = MusicState::<N>::new(song);
        backend.reset();
        debug!("Playback started");

        while state.tick(backend) {
            pacer.wait_tick(state.tempo());
        }

        debug!("Playback finished");
        if !looping {
            break;
        }
    }
}
