use core::cell::Cell;

use log::debug;

use crate::mixer::{DutyRegister, MultiplexBackend, OutputMixer};
use crate::music::{MusicState, ToneBackend};
use crate::oscillator::{ChannelTimer, Oscillator};
use crate::song::{Error, Song};
use crate::targets::Target;

#[derive(Debug, Default)]
struct SimTimer {
    period: Cell<u16>,
    running: Cell<bool>,
}

impl ChannelTimer for SimTimer {
    fn set_period(&self, count: u16) {
        self.period.set(count);
    }

    fn start(&self) {
        self.running.set(true);
    }

    fn stop(&self) {
        self.running.set(false);
    }
}

#[derive(Debug, Default)]
struct SimRegister(Cell<u8>);

impl DutyRegister for SimRegister {
    fn write(&self, duty: u8) {
        self.0.set(duty);
    }
}

/// Renders a song to unsigned 8-bit mono PCM, the way it sounds on a target.
///
/// The scheduler, oscillators and mixer are the ones used on the device, run
/// against simulated timers. Each sample is the PWM duty cycle at that time,
/// as the buzzer and its driver filter the PWM carrier out.
///
/// ```rust
/// # use bzmusic::{targets::ATMEGA3208, Renderer, Song};
/// let song = Song::from_slice(&[0x79, 0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff, 0xff])?;
/// let samples: Vec<u8> = Renderer::new(&song, &ATMEGA3208, 8000)?.collect();
/// assert_eq!(samples.len(), 250);
/// # Ok::<(), bzmusic::Error>(())
/// ```
#[derive(Debug)]
pub struct Renderer<'a, const N: usize> {
    state: MusicState<'a, N>,
    oscillators: [Oscillator<SimTimer>; N],
    mixer: OutputMixer<SimRegister, N>,
    pwm_top: u16,
    sample_rate: u32,

    // Both in microseconds times the sample rate
    tick_length: u64,
    tick_phase: u64,

    // Timer clock cycles times the sample rate, per channel
    elapsed: [u64; N],
    done: bool,
}

impl<'a, const N: usize> Renderer<'a, N> {
    /// Fails with [`Error::SampleRate`] when `sample_rate` is zero.
    pub fn new(song: &Song<'a>, target: &Target<N>, sample_rate: u32) -> Result<Self, Error> {
        if sample_rate == 0 {
            return Err(Error::SampleRate);
        }

        let oscillators = core::array::from_fn(|channel| {
            target.oscillator(channel, SimTimer::default())
        });
        let mixer = target.mixer(SimRegister::default());
        MultiplexBackend::new(&oscillators, &mixer).reset();

        let tick_length = u64::from(song.tick_duration_us()) * u64::from(sample_rate);
        debug!(
            "Rendering {} ticks at {} Hz",
            song.duration_ticks(),
            sample_rate
        );

        Ok(Renderer {
            state: MusicState::new(song),
            oscillators,
            mixer,
            pwm_top: u16::from(target.pwm_top.max(1)),
            sample_rate,
            tick_length,
            tick_phase: tick_length,
            elapsed: [0; N],
            done: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fire the timer interrupts due during one sample period.
    fn run_timers(&mut self) {
        let sample_rate = u64::from(self.sample_rate);

        for (channel, oscillator) in self.oscillators.iter().enumerate() {
            let timer = oscillator.timer();
            let elapsed = &mut self.elapsed[channel];
            if !timer.running.get() {
                *elapsed = 0;
                continue;
            }

            let period = (u64::from(timer.period.get()) + 1) * sample_rate;
            *elapsed += u64::from(oscillator.config().timer_clock);
            while *elapsed >= period {
                *elapsed -= period;
                self.mixer.on_interrupt(channel);
            }
        }
    }
}

impl<'a, const N: usize> Iterator for Renderer<'a, N> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.tick_phase >= self.tick_length {
            self.tick_phase -= self.tick_length;

            let mut backend = MultiplexBackend::new(&self.oscillators, &self.mixer);
            if !self.state.tick(&mut backend) {
                self.done = true;
                return None;
            }
        }
        self.tick_phase += 1_000_000;

        self.run_timers();
        let duty = u16::from(self.mixer.register().0.get());

        Some((duty * 255 / self.pwm_top) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{SongBuilder, TrackBuilder};
    use crate::targets::{ATMEGA328P, ATMEGA3208};
    use crate::track::Note;

    fn rising_edges(samples: &[u8]) -> usize {
        samples
            .windows(2)
            .filter(|pair| pair[0] == 0 && pair[1] > 0)
            .count()
    }

    #[test]
    fn empty_song_is_one_silent_tick() {
        let data = [0x79, 0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff, 0xff];
        let song = Song::from_slice(&data).unwrap();
        let samples: Vec<_> = Renderer::new(&song, &ATMEGA3208, 8000).unwrap().collect();

        assert_eq!(samples.len(), 250);
        assert!(samples.iter().all(|&sample| sample == 0));
    }

    #[test]
    fn a4_square_wave() {
        let data = SongBuilder::new(0x79)
            .track(TrackBuilder::new(0).note(Note::Tone(33), 16))
            .encode()
            .unwrap();
        let song = Song::from_slice(&data).unwrap();
        let samples: Vec<_> = Renderer::new(&song, &ATMEGA3208, 44_100).unwrap().collect();

        // 17 ticks, the last one silent
        assert_eq!(samples.len(), (17 * 31_232 * 44_100 + 999_999) / 1_000_000);
        let tick = 31_232 * 44_100 / 1_000_000;
        assert!(samples[samples.len() - tick..].iter().all(|&s| s == 0));

        // 440 Hz for half a second
        let edges = rising_edges(&samples);
        assert!((218..=221).contains(&edges), "{} rising edges", edges);

        // One channel on at volume 2
        assert_eq!(samples.iter().max(), Some(&42));
    }

    #[test]
    fn chords_raise_the_duty_cycle() {
        let data = SongBuilder::new(0x10)
            .track(TrackBuilder::new(0).note(Note::Tone(24), 32))
            .track(TrackBuilder::new(1).note(Note::Tone(31), 32))
            .encode()
            .unwrap();
        let song = Song::from_slice(&data).unwrap();
        let samples: Vec<_> = Renderer::new(&song, &ATMEGA328P, 44_100).unwrap().collect();

        let mut levels = samples;
        levels.sort_unstable();
        levels.dedup();
        assert_eq!(levels, [0, 63, 127]);
    }

    #[test]
    fn zero_sample_rate() {
        let data = [0x79, 0x01, 0x07, 0x00, 0x07, 0x00, 0x00, 0xff, 0xff];
        let song = Song::from_slice(&data).unwrap();

        assert_eq!(
            Renderer::new(&song, &ATMEGA3208, 0).map(|renderer| renderer.count()),
            Err(Error::SampleRate)
        );
    }

    #[test]
    fn same_song_same_samples() {
        let data = SongBuilder::new(0x20)
            .track(
                TrackBuilder::new(2)
                    .note(Note::Tone(40), 5)
                    .note(Note::Rest, 3)
                    .note(Note::Tone(20), 7),
            )
            .encode()
            .unwrap();
        let song = Song::from_slice(&data).unwrap();

        let first: Vec<_> = Renderer::new(&song, &ATMEGA3208, 22_050).unwrap().collect();
        let second: Vec<_> = Renderer::new(&song, &ATMEGA3208, 22_050).unwrap().collect();
        assert_eq!(first, second);
    }
}
