use core::ops::Range;

use crate::track::Note;

/// A hardware timer dedicated to one channel.
///
/// The timer fires an interrupt every `count + 1` timer clock cycles while
/// running. Its handler is expected to call `OutputMixer::on_interrupt` for
/// the channel.
pub trait ChannelTimer {
    fn set_period(&self, count: u16);
    fn start(&self);
    fn stop(&self);
}

/// How one channel's timer turns pitches into periods.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Timer clock after the prescaler, in Hz.
    pub timer_clock: u32,
    /// Timer counts for half a period of each playable note.
    pub notes: &'static [u16],
    /// Added to a pitch to get its index in `notes`.
    pub note_offset: i16,
}

impl ChannelConfig {
    pub const fn new(timer_clock: u32, notes: &'static [u16], note_offset: i16) -> Self {
        ChannelConfig {
            timer_clock,
            notes,
            note_offset,
        }
    }

    /// Timer count for `pitch`, if this channel can play it.
    pub fn timer_count(&self, pitch: u8) -> Option<u16> {
        let index = i16::from(pitch) + self.note_offset;
        if index < 0 {
            return None;
        }

        self.notes.get(index as usize).copied()
    }

    /// Pitches this channel can play.
    pub fn playable(&self) -> Range<u8> {
        let lowest = (-self.note_offset).max(0);
        let highest = self.notes.len() as i16 - self.note_offset;

        lowest as u8..highest as u8
    }
}

/// Square wave generator for one channel.
///
/// Each timer interrupt flips the channel's half of the wave, so the timer
/// runs at twice the note frequency.
#[derive(Debug)]
pub struct Oscillator<T> {
    timer: T,
    config: ChannelConfig,
}

impl<T> Oscillator<T> {
    pub const fn new(timer: T, config: ChannelConfig) -> Self {
        Oscillator { timer, config }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl<T: ChannelTimer> Oscillator<T> {
    /// Reprogram the timer for `note`.
    ///
    /// Returns `false` when the channel is now silent, either for a rest or
    /// for a pitch outside this channel's table.
    pub fn play(&self, note: Note) -> bool {
        match note.pitch().and_then(|pitch| self.config.timer_count(pitch)) {
            Some(count) => {
                // The timer interrupt must not see a new period with a stale
                // enable state, or the reverse.
                critical_section::with(|_| {
                    self.timer.set_period(count);
                    self.timer.start();
                });
                true
            }
            None => {
                self.timer.stop();
                false
            }
        }
    }

    pub fn stop(&self) {
        self.timer.stop();
    }
}
