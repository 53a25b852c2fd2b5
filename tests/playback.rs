//! Whole pipeline tests: encode a song, load it, and play it through the
//! oscillators and mixer the way firmware does, with statics shared with the
//! (simulated) timer interrupts.

use bzmusic::targets::{ATMEGA328P, ATMEGA3208};
use bzmusic::{
    check_levels, play, ChannelTimer, DutyRegister, Error, Event, MultiplexBackend, Note,
    Oscillator, OutputMixer, Pacer, Song, SongBuilder, TrackBuilder,
};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

struct Timer {
    period: AtomicU16,
    running: AtomicBool,
}

impl Timer {
    const fn new() -> Self {
        Timer {
            period: AtomicU16::new(0),
            running: AtomicBool::new(false),
        }
    }
}

impl ChannelTimer for Timer {
    fn set_period(&self, count: u16) {
        self.period.store(count, Ordering::Relaxed);
    }

    fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

struct Compare(AtomicU8);

impl DutyRegister for Compare {
    fn write(&self, duty: u8) {
        self.0.store(duty, Ordering::Relaxed);
    }
}

static OSCILLATORS: [Oscillator<Timer>; 3] = [
    ATMEGA3208.oscillator(0, Timer::new()),
    ATMEGA3208.oscillator(1, Timer::new()),
    ATMEGA3208.oscillator(2, Timer::new()),
];
static MIXER: OutputMixer<Compare, 3> = ATMEGA3208.mixer(Compare(AtomicU8::new(0)));

/// Fires one interrupt per running timer on every tick and records the duty
/// cycle after them.
#[derive(Default)]
struct Interrupts {
    duty: Vec<u8>,
}

impl Pacer for Interrupts {
    fn wait_tick(&mut self, _tempo: u8) {
        for (channel, oscillator) in OSCILLATORS.iter().enumerate() {
            if oscillator.timer().running.load(Ordering::Relaxed) {
                MIXER.on_interrupt(channel);
            }
        }
        self.duty.push(MIXER.register().0.load(Ordering::Relaxed));
    }
}

fn chord() -> Vec<u8> {
    SongBuilder::with_bpm(120.0)
        .track(TrackBuilder::new(0).note(Note::Tone(24), 4))
        .track(
            TrackBuilder::new(1)
                .note(Note::Tone(28), 2)
                .note(Note::Rest, 2),
        )
        .track(TrackBuilder::new(2).note(Note::Tone(31), 6))
        .encode()
        .unwrap()
}

#[test]
fn play_chord_on_atmega3208() {
    let data = chord();
    let song = Song::from_slice(&data).unwrap();
    check_levels::<3>(ATMEGA3208.levels).unwrap();
    ATMEGA3208.check(&song).unwrap();

    let mut backend = MultiplexBackend::new(&OSCILLATORS, &MIXER);
    let mut pacer = Interrupts::default();
    play::<_, _, 3>(&song, &mut backend, &mut pacer, false);

    // One tick past the longest track
    assert_eq!(song.duration_ticks(), 6);
    assert_eq!(pacer.duty, [12, 0, 8, 0, 4, 0, 0]);

    assert!(OSCILLATORS
        .iter()
        .all(|oscillator| !oscillator.timer().running.load(Ordering::Relaxed)));
    assert_eq!(MIXER.channel_bits(), 0);
    assert_eq!(OSCILLATORS[2].timer().period.load(Ordering::Relaxed), 6377);
}

#[test]
fn encoded_events_survive_loading() {
    let data = chord();
    let song = Song::from_slice(&data).unwrap();

    assert_eq!(song.tempo(), 0x79);
    assert_eq!(song.channels().collect::<Vec<_>>(), [0, 1, 2]);
    assert_eq!(
        song.events(1).collect::<Vec<_>>(),
        [Event::new(Note::Tone(28), 2), Event::new(Note::Rest, 2)]
    );
    assert_eq!(
        song.events(2).collect::<Vec<_>>(),
        [Event::new(Note::Tone(31), 6)]
    );
}

#[test]
fn song_must_fit_the_target() {
    let data = chord();
    let song = Song::from_slice(&data).unwrap();

    assert_eq!(
        ATMEGA328P.check(&song),
        Err(Error::ChannelOutOfRange { channel: 2 })
    );

    let data = SongBuilder::new(0)
        .track(TrackBuilder::new(0).note(Note::Tone(72), 1))
        .encode()
        .unwrap();
    let song = Song::from_slice(&data).unwrap();
    assert_eq!(ATMEGA3208.check(&song), Ok(()));
    assert_eq!(
        ATMEGA328P.check(&song),
        Err(Error::NoteOutOfRange {
            channel: 0,
            note: 72
        })
    );
}
