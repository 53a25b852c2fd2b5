//! Pitch math used to build and check the timer tables in `targets`.
//!
//! Everything here runs offline or in tests, so it freely uses `f64`: some
//! timer counts are within a thousandth of a rounding boundary.

use arrayvec::ArrayVec;

use crate::consts::PLAYABLE_NOTES;
use crate::oscillator::ChannelConfig;

/// A4, 440 Hz, is note 33 counting from C2.
const REF_PITCH: u8 = 33;
const REF_FREQUENCY: f64 = 440.0;

/// Get a `note` frequency on the exponential scale defined by reference
/// frequency `ref_freq` and reference pitch `ref_pitch`, using the interval
/// `semitone`.
fn get_frequency(ref_freq: f64, semitone: f64, note: u8, ref_pitch: u8) -> f64 {
    ref_freq * libm::pow(semitone, f64::from(note) - f64::from(ref_pitch))
}

/// Frequency of a pitch index on the 12-TET scale, in Hz.
pub fn note_frequency(note: u8) -> f64 {
    let semitone = libm::pow(2.0, 1.0 / 12.0);
    get_frequency(REF_FREQUENCY, semitone, note, REF_PITCH)
}

/// Count for a timer running at `timer_clock` Hz that toggles the output at
/// twice the frequency of `note`.
///
/// `None` when the count does not fit the 16-bit timer.
pub fn timer_count(timer_clock: u32, note: u8) -> Option<u16> {
    let half_periods = f64::from(timer_clock) / note_frequency(note) / 2.0;
    let count = libm::round(half_periods) - 1.0;

    if count < 0.0 || count > f64::from(u16::MAX) {
        None
    } else {
        Some(count as u16)
    }
}

/// Frequency actually played with a timer count, in Hz.
pub fn actual_frequency(timer_clock: u32, count: u16) -> f64 {
    f64::from(timer_clock) / (2.0 * (f64::from(count) + 1.0))
}

/// How far `frequency` is from the true pitch of `note`, in cents.
pub fn error_cents(note: u8, frequency: f64) -> f64 {
    1200.0 * libm::log2(frequency / note_frequency(note))
}

/// Largest pitch error over every note a channel can play, in cents.
pub fn max_error_cents(config: &ChannelConfig) -> f64 {
    config
        .playable()
        .filter_map(|note| {
            let count = config.timer_count(note)?;
            let frequency = actual_frequency(config.timer_clock, count);
            Some(libm::fabs(error_cents(note, frequency)))
        })
        .fold(0.0, f64::max)
}

/// Timer counts for up to `CAP` consecutive notes starting at `lowest`.
///
/// Stops early at the last playable note or at the first note whose count
/// does not fit the timer.
pub fn timer_table<const CAP: usize>(timer_clock: u32, lowest: u8) -> ArrayVec<u16, CAP> {
    (lowest..PLAYABLE_NOTES as u8)
        .map_while(|note| timer_count(timer_clock, note))
        .take(CAP)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{ATMEGA328P, ATMEGA3208};

    #[test]
    fn reference_pitches() {
        assert!((note_frequency(33) - 440.0).abs() < 1e-9);
        assert!((note_frequency(45) - 880.0).abs() < 1e-9);
        assert!((note_frequency(0) - 65.406).abs() < 0.001);
    }

    #[test]
    fn counts() {
        assert_eq!(timer_count(5_000_000, 0), Some(38222));
        assert_eq!(timer_count(62_500, 11), Some(252));
        assert_eq!(timer_count(62_500, 0), Some(477));
        assert_eq!(timer_count(16_000_000, 0), None);
        assert_eq!(timer_count(1_000, 83), None);
    }

    #[test]
    fn error_of_exact_count() {
        let frequency = actual_frequency(4_400, 4);

        assert!((frequency - 440.0).abs() < 1e-9);
        assert!(error_cents(33, frequency).abs() < 1e-9);
        assert!((error_cents(33, 880.0) - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn target_tables_regenerate() {
        let tcb = timer_table::<73>(5_000_000, 0);
        for channel in &ATMEGA3208.channels {
            assert_eq!(&tcb[..], channel.notes);
        }

        let [timer0, timer1] = ATMEGA328P.channels;
        assert_eq!(&timer_table::<51>(62_500, 11)[..], timer0.notes);
        assert_eq!(&timer_table::<73>(2_000_000, 0)[..], timer1.notes);
    }

    #[test]
    fn target_pitch_error() {
        assert!(max_error_cents(&ATMEGA3208.channels[0]) < 2.0);
        assert!(max_error_cents(&ATMEGA328P.channels[1]) < 2.0);

        let timer0 = max_error_cents(&ATMEGA328P.channels[0]);
        assert!(timer0 > 20.0 && timer0 < 30.0);
    }

    #[test]
    fn table_stops_at_timer_limit() {
        // C2 needs a count above 65535 at 10 MHz
        assert!(timer_table::<8>(10_000_000, 0).is_empty());
        assert_eq!(timer_table::<4>(5_000_000, 82).len(), 2);
    }
}
