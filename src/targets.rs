//! Configuration data for the supported microcontrollers.
//!
//! Timer counts come from `round(timer_clock / frequency / 2) - 1`, see
//! [`pitch::timer_count`](crate::pitch::timer_count).

use crate::consts::DEFAULT_VOLUME;
use crate::mixer::OutputMixer;
use crate::oscillator::{ChannelConfig, Oscillator};
use crate::song::{Error, Song};

/// Everything needed to play `N` channels on one microcontroller.
#[derive(Debug, Clone, Copy)]
pub struct Target<const N: usize> {
    pub channels: [ChannelConfig; N],
    /// Duty cycle for each output level, see `OutputMixer`.
    pub levels: &'static [u8],
    /// PWM timer top value, the duty cycle of a level is `level / pwm_top`.
    pub pwm_top: u8,
    /// Volume selector, 0-3.
    pub volume: u8,
}

impl<const N: usize> Target<N> {
    pub const fn mixer<R>(&self, register: R) -> OutputMixer<R, N> {
        OutputMixer::new(register, self.levels, self.volume)
    }

    pub const fn oscillator<T>(&self, channel: usize, timer: T) -> Oscillator<T> {
        Oscillator::new(timer, self.channels[channel])
    }

    /// Check that every channel used by `song` exists on this target and that
    /// every note of it is playable on its channel.
    pub fn check(&self, song: &Song<'_>) -> Result<(), Error> {
        for channel in song.channels() {
            let config = self
                .channels
                .get(usize::from(channel))
                .ok_or(Error::ChannelOutOfRange { channel })?;

            let unplayable = song
                .events(channel)
                .filter_map(|event| event.note.pitch())
                .find(|&pitch| config.timer_count(pitch).is_none());
            if let Some(note) = unplayable {
                return Err(Error::NoteOutOfRange { channel, note });
            }
        }

        Ok(())
    }
}

/// Three channels on ATmega3208 at 10 MHz.
///
/// TCB0 to TCB2 run at 5 MHz, one per channel, and the split TCA0 high timer
/// outputs the PWM with a period of 24 counts.
pub const ATMEGA3208: Target<3> = Target {
    channels: [ChannelConfig::new(5_000_000, &TCB_NOTES, 0); 3],
    levels: &TCA_LEVELS,
    pwm_top: 24,
    volume: DEFAULT_VOLUME,
};

/// Two channels on ATmega328P at 16 MHz.
///
/// Timer 0 runs at 62.5 kHz and can only play B2 to C#7, timer 1 runs at
/// 2 MHz. Timer 2 outputs the PWM at 62.5 kHz.
pub const ATMEGA328P: Target<2> = Target {
    channels: [
        ChannelConfig::new(62_500, &TIMER0_NOTES, -11),
        ChannelConfig::new(2_000_000, &TIMER1_NOTES, 0),
    ],
    levels: &TIMER2_LEVELS,
    pwm_top: 255,
    volume: DEFAULT_VOLUME,
};

#[rustfmt::skip]
const TCA_LEVELS: [u8; 32] = [
    0, 1, 1, 2, 1, 2, 2, 3,
    0, 2, 2, 4, 2, 4, 4, 6,
    0, 4, 4, 8, 4, 8, 8, 12,
    0, 8, 8, 16, 8, 16, 16, 24,
];

// C2 to C8, under 0.1 semitone of error.
#[rustfmt::skip]
const TCB_NOTES: [u16; 73] = [
    38222, 36076, 34051, 32140, 30336, 28634, 27026, 25510, 24078, 22726, 21451, 20247,
    19110, 18038, 17025, 16070, 15168, 14316, 13513, 12754, 12038, 11363, 10725, 10123,
    9555, 9018, 8512, 8034, 7583, 7158, 6756, 6377, 6019, 5681, 5362, 5061,
    4777, 4509, 4256, 4017, 3791, 3578, 3377, 3188, 3009, 2840, 2680, 2530,
    2388, 2254, 2127, 2008, 1895, 1789, 1688, 1593, 1504, 1419, 1340, 1264,
    1193, 1126, 1063, 1003, 947, 894, 844, 796, 751, 709, 669, 632,
    596,
];

#[rustfmt::skip]
const TIMER2_LEVELS: [u8; 16] = [
    0, 15, 15, 31,
    0, 31, 31, 63,
    0, 63, 63, 127,
    0, 127, 127, 255,
];

// B2 to C#7, up to 0.3 semitone of error.
#[rustfmt::skip]
const TIMER0_NOTES: [u16; 51] = [
    252, 238, 224, 212, 200, 189, 178, 168, 158, 149,
    141, 133, 126, 118, 112, 105, 99, 94, 88, 83,
    79, 74, 70, 66, 62, 59, 55, 52, 49, 46,
    44, 41, 39, 37, 35, 33, 31, 29, 27, 26,
    24, 23, 21, 20, 19, 18, 17, 16, 15, 14,
    13,
];

// C2 to C8, under 0.01 semitone of error.
#[rustfmt::skip]
const TIMER1_NOTES: [u16; 73] = [
    15288, 14430, 13620, 12855, 12134, 11453, 10810, 10203, 9630, 9090,
    8580, 8098, 7644, 7214, 6809, 6427, 6066, 5726, 5404, 5101,
    4815, 4544, 4289, 4049, 3821, 3607, 3404, 3213, 3033, 2862,
    2702, 2550, 2407, 2272, 2144, 2024, 1910, 1803, 1702, 1606,
    1516, 1431, 1350, 1275, 1203, 1135, 1072, 1011, 955, 901,
    850, 803, 757, 715, 675, 637, 601, 567, 535, 505,
    477, 450, 425, 401, 378, 357, 337, 318, 300, 283,
    267, 252, 238,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playable_ranges() {
        assert_eq!(ATMEGA3208.channels[2].playable(), 0..73);
        assert_eq!(ATMEGA328P.channels[0].playable(), 11..62);
        assert_eq!(ATMEGA328P.channels[0].timer_count(11), Some(252));
        assert_eq!(ATMEGA328P.channels[1].playable(), 0..73);
    }

    #[test]
    fn check_song() {
        // Channel 1: C2 then B2 for one tick each
        let data = [
            0x00, 0x01, 0x0b, 0x00, 0x09, 0x00, 0x00, 0x00, 0x0b, 0xff, 0x00, 0x80, 0xff,
        ];
        let song = Song::from_slice(&data).unwrap();

        assert_eq!(ATMEGA3208.check(&song), Ok(()));
        assert_eq!(ATMEGA328P.check(&song), Ok(()));

        let mut data = data;
        data[1] = 0x00;
        let song = Song::from_slice(&data).unwrap();
        assert_eq!(ATMEGA3208.check(&song), Ok(()));
        assert_eq!(
            ATMEGA328P.check(&song),
            Err(Error::NoteOutOfRange {
                channel: 0,
                note: 0
            })
        );

        data[1] = 0x03;
        let song = Song::from_slice(&data).unwrap();
        assert_eq!(
            ATMEGA3208.check(&song),
            Err(Error::ChannelOutOfRange { channel: 3 })
        );
    }
}
