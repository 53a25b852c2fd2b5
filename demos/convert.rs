#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![forbid(unsafe_code)]

use bzmusic::midi::{Converter, Error as MidiError, Strategy};
use bzmusic::targets::{ATMEGA328P, ATMEGA3208};
use bzmusic::{Error as SongError, Song};
use colored::Colorize;
use error_iter::ErrorIter as _;
use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing midi-file argument\nUsage: convert <midi-file> <song-file> [atmega3208|atmega328p] [strategy]")]
    MissingMidiFilename,

    #[error("Missing song-file argument\nUsage: convert <midi-file> <song-file> [atmega3208|atmega328p] [strategy]")]
    MissingSongFilename,

    #[error("Unknown target `{0}`")]
    UnknownTarget(String),

    #[error("Unknown strategy `{0}`")]
    UnknownStrategy(String),

    #[error("MIDI conversion error")]
    Midi(#[from] MidiError),

    #[error("Song error")]
    Song(#[from] SongError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    match convert() {
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

fn convert() -> Result<(), Error> {
    let mut args = std::env::args().skip(1);
    let midi_filename = args.next().ok_or(Error::MissingMidiFilename)?;
    let song_filename = args.next().ok_or(Error::MissingSongFilename)?;
    let target = args.next().unwrap_or_else(|| "atmega3208".to_string());
    let strategy = match args.next() {
        Some(name) => Strategy::from_name(&name).ok_or(Error::UnknownStrategy(name))?,
        None => Strategy::Auto,
    };

    let converter = match target.as_str() {
        "atmega3208" => Converter::new(&ATMEGA3208),
        "atmega328p" => Converter::new(&ATMEGA328P),
        _ => return Err(Error::UnknownTarget(target)),
    };

    let smf = std::fs::read(midi_filename)?;
    let data = converter.strategy(strategy).convert(&smf)?.encode()?;
    let song = Song::from_slice(&data)?;

    // A `.h` song file gets a C array named after the file
    let path = Path::new(&song_filename);
    if path.extension().map_or(false, |extension| extension == "h") {
        let name = path
            .file_stem()
            .map_or_else(|| "song".into(), |stem| stem.to_string_lossy());
        std::fs::write(path, c_header(&data, &name))?;
    } else {
        std::fs::write(path, &data)?;
    }

    println!(
        "{} {} channels, {} ticks, {:.1} BPM, {} bytes",
        "converted".green(),
        song.channels().count(),
        song.duration_ticks(),
        song.bpm(),
        data.len()
    );

    Ok(())
}

fn c_header(data: &[u8], name: &str) -> String {
    let mut header = format!("#include \"music.h\"\n\nstatic _FLASH uint8_t {name}[] = {{\n");
    for line in data.chunks(12) {
        header.push_str("    ");
        for byte in line {
            let _ = write!(header, "0x{byte:02x}, ");
        }
        header.truncate(header.len() - 1);
        header.push('\n');
    }
    header.push_str("};\n");

    header
}
