use core::sync::atomic::{AtomicU8, Ordering};

use log::trace;

use crate::consts::VOLUME_BITS;
use crate::music::ToneBackend;
use crate::oscillator::{ChannelTimer, Oscillator};
use crate::song::Error;
use crate::track::Note;

/// The PWM compare register driving the buzzer.
pub trait DutyRegister {
    fn write(&self, duty: u8);
}

/// Mixes the square waves of `N` channels into one PWM duty cycle.
///
/// The output level holds one bit per channel, set while that channel is in the
/// high half of its wave, and the volume selector in the two bits above them.
/// As a whole it indexes the level table, whose duty cycle grows with the
/// number of channel bits set. The buzzer filters the PWM into something close
/// to the sum of the channels.
///
/// All methods take `&self` so the mixer can be a `static` shared with the
/// timer interrupt handlers:
///
/// ```no_run
/// # use bzmusic::{targets::ATMEGA3208, DutyRegister, OutputMixer};
/// # struct Compare;
/// # impl DutyRegister for Compare { fn write(&self, _: u8) {} }
/// static MIXER: OutputMixer<Compare, 3> = ATMEGA3208.mixer(Compare);
///
/// // In the interrupt handler of channel 1's timer
/// MIXER.on_interrupt(1);
/// ```
#[derive(Debug)]
pub struct OutputMixer<R, const N: usize> {
    level: AtomicU8,
    levels: &'static [u8],
    volume: u8,
    register: R,
}

impl<R, const N: usize> OutputMixer<R, N> {
    /// `levels` must have `4 << N` entries, see `check_levels`. Only the two
    /// low bits of `volume` are used.
    pub const fn new(register: R, levels: &'static [u8], volume: u8) -> Self {
        let volume = volume & 0x03;

        OutputMixer {
            level: AtomicU8::new(volume << N),
            levels,
            volume,
            register,
        }
    }

    /// Current table index.
    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }

    /// Channels currently in the high half of their wave.
    pub fn channel_bits(&self) -> u8 {
        self.level() & !(u8::MAX << N)
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn register(&self) -> &R {
        &self.register
    }
}

impl<R: DutyRegister, const N: usize> OutputMixer<R, N> {
    /// Turn every channel off.
    pub fn reset(&self) {
        critical_section::with(|_| self.store(self.volume << N));
    }

    /// Turn one channel off, leaving the others as they are.
    pub fn silence(&self, channel: usize) {
        critical_section::with(|_| self.store(self.level() & !(1 << channel)));
    }

    /// Flip `channel`'s half of its wave and update the duty cycle.
    ///
    /// Called from the channel's timer interrupt. Handlers of different
    /// channels only ever flip their own bit, the critical section keeps the
    /// read, table lookup and register write of one call together.
    #[inline]
    pub fn on_interrupt(&self, channel: usize) {
        critical_section::with(|_| self.store(self.level() ^ (1 << channel)));
    }

    fn store(&self, level: u8) {
        self.register.write(self.levels[usize::from(level)]);
        self.level.store(level, Ordering::Relaxed);
    }
}

/// Check that a level table fits `N` channels and never lowers the duty cycle
/// when one more channel is on.
pub fn check_levels<const N: usize>(levels: &[u8]) -> Result<(), Error> {
    let expected = 1 << (N + VOLUME_BITS);
    if levels.len() != expected {
        return Err(Error::LevelTableLength { expected });
    }

    let lower = (0..expected).find(|&index| {
        (0..N)
            .filter(|bit| index & (1 << bit) != 0)
            .any(|bit| levels[index] < levels[index & !(1 << bit)])
    });

    match lower {
        Some(index) => Err(Error::LevelTableOrder { index }),
        None => Ok(()),
    }
}

/// Plays `N` channels on one buzzer: each channel owns an `Oscillator`, and all
/// of them share one `OutputMixer`.
///
/// This only borrows the oscillators and mixer, which usually live in statics
/// next to the interrupt handlers.
#[derive(Debug)]
pub struct MultiplexBackend<'a, T, R, const N: usize> {
    oscillators: &'a [Oscillator<T>; N],
    mixer: &'a OutputMixer<R, N>,
}

impl<'a, T, R, const N: usize> MultiplexBackend<'a, T, R, N> {
    pub fn new(oscillators: &'a [Oscillator<T>; N], mixer: &'a OutputMixer<R, N>) -> Self {
        MultiplexBackend { oscillators, mixer }
    }
}

impl<'a, T, R, const N: usize> ToneBackend for MultiplexBackend<'a, T, R, N>
where
    T: ChannelTimer,
    R: DutyRegister,
{
    fn reset(&mut self) {
        for oscillator in self.oscillators {
            oscillator.stop();
        }
        self.mixer.reset();
        trace!("All {} channels silenced", N);
    }

    fn on_note_changed(&mut self, channel: usize, note: Note) {
        if !self.oscillators[channel].play(note) {
            self.mixer.silence(channel);
        }
    }

    fn on_track_end(&mut self, channel: usize) {
        self.oscillators[channel].stop();
        self.mixer.reset();
    }
}
