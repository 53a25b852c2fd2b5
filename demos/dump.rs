#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![forbid(unsafe_code)]

use bzmusic::{Error as SongError, Note, Song};
use colored::Colorize;
use error_iter::ErrorIter as _;
use std::process::ExitCode;
use thiserror::Error;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing song-file argument\nUsage: dump <song-file>")]
    MissingSongFilename,

    #[error("Song error")]
    Song(#[from] SongError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    match dump() {
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

fn dump() -> Result<(), Error> {
    let song_filename = std::env::args()
        .nth(1)
        .ok_or(Error::MissingSongFilename)?;

    let data = std::fs::read(song_filename)?;
    let song = Song::from_slice(&data)?;

    println!(
        "{} {} ({:.1} BPM), {} ticks",
        "tempo".bold(),
        song.tempo(),
        song.bpm(),
        song.duration_ticks()
    );

    for channel in song.channels() {
        println!("{} {}", "channel".bold(), channel);

        let mut tick = 0_u32;
        for event in song.events(channel) {
            let note = match event.note {
                Note::Tone(pitch) => {
                    let name = NOTE_NAMES[usize::from(pitch % 12)];
                    format!("{}{}", name, pitch / 12 + 2)
                }
                Note::Rest => "-".dimmed().to_string(),
            };
            println!("  {:>6}  {:<4} {}", tick, note, event.duration);
            tick += u32::from(event.duration);
        }
    }

    Ok(())
}
