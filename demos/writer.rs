#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![forbid(unsafe_code)]

use bzmusic::targets::{ATMEGA328P, ATMEGA3208};
use bzmusic::{check_levels, Error as SongError, Renderer, Song, Target};
use colored::Colorize;
use error_iter::ErrorIter as _;
use riff_wave::{WaveWriter, WriteError};
use std::{fs::File, io::BufWriter, process::ExitCode};
use thiserror::Error;

const SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing song-file argument\nUsage: writer <song-file> <wav-file> [atmega3208|atmega328p]")]
    MissingSongFilename,

    #[error("Missing wav-file argument\nUsage: writer <song-file> <wav-file> [atmega3208|atmega328p]")]
    MissingWavFilename,

    #[error("Unknown target `{0}`")]
    UnknownTarget(String),

    #[error("Song error")]
    Song(#[from] SongError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Wave writer error")]
    Writer(#[from] WriteError),
}

fn main() -> ExitCode {
    match writer() {
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);

            for cause in e.sources().skip(1) {
                eprintln!("{} {}", "caused by:".bright_red(), cause);
            }

            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}

fn writer() -> Result<(), Error> {
    let mut args = std::env::args().skip(1);
    let song_filename = args.next().ok_or(Error::MissingSongFilename)?;
    let wav_filename = args.next().ok_or(Error::MissingWavFilename)?;
    let target = args.next().unwrap_or_else(|| "atmega3208".to_string());

    // Read and check the song file
    let data = std::fs::read(song_filename)?;
    let song = Song::from_slice(&data)?;

    match target.as_str() {
        "atmega3208" => render(&song, &ATMEGA3208, &wav_filename),
        "atmega328p" => render(&song, &ATMEGA328P, &wav_filename),
        _ => Err(Error::UnknownTarget(target)),
    }
}

fn render<const N: usize>(song: &Song, target: &Target<N>, wav_filename: &str) -> Result<(), Error> {
    check_levels::<N>(target.levels)?;
    target.check(song)?;

    // Write the wav file
    let file = File::create(wav_filename)?;
    let writer = BufWriter::new(file);
    let mut wave_writer = WaveWriter::new(1, SAMPLE_RATE, 8, writer)?;

    for sample in Renderer::new(song, target, SAMPLE_RATE)? {
        wave_writer.write_sample_u8(sample)?;
    }

    println!(
        "{} {} ticks, {:.1} BPM",
        "rendered".green(),
        song.duration_ticks(),
        song.bpm()
    );

    Ok(())
}
