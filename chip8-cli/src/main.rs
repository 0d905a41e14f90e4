//! Entrypoint for CLI
mod config;
mod error;
mod headless;

use std::{env, fs, time::Duration};

use chip8::{constants::*, prelude::*, Clock, IMPL_VERSION};
use log::{error, info, warn};

use self::{
    config::RunConf,
    error::AppError,
    headless::{FrameCapture, LogAudio, ScriptedKeypad},
};

static USAGE: &str = r#"
usage: chip8 CMD FILE [CONFIG]

commands:
    run     Run the target ROM file headless, then print the screen
    dump    Print the program loaded in memory as hexadecimal instructions

options:
    CONFIG  YAML file with clock_frequency, frames, seed and scripted keys

examples:
    chip8 run maze.rom
    chip8 run breakout.rom breakout.yaml
    chip8 dump breakout.rom
"#;

fn run_bytecode(filepath: impl AsRef<str>, config: Option<String>) -> Result<(), AppError> {
    info!("running bytecode interpreter");

    let conf = match config {
        Some(path) => RunConf::from_file(path)?,
        None => RunConf::default(),
    };
    let bytecode = fs::read(filepath.as_ref())?;

    let mut vm = Chip8Vm::new(conf.vm.clone());
    vm.load_bytecode(bytecode.as_slice())?;

    let frame_time = Duration::from_nanos(CLOCK_CYCLE_TIME);
    let mut cpu_clock = Clock::new(conf.clock_frequency().into());
    let mut keypad = ScriptedKeypad::new(conf.keys.clone());
    let mut audio = LogAudio::default();
    let mut display = FrameCapture::default();

    for frame in 0..conf.frames {
        keypad.advance(frame);

        for _ in 0..cpu_clock.advance(frame_time) {
            match vm.step(&keypad) {
                // Yield to the frame loop so the keypad can change.
                Ok(Flow::KeyWait) => break,
                Ok(_) => {}
                Err(fault) => {
                    println!("{}", vm.dump_display()?);
                    return Err(fault.into());
                }
            }
        }

        vm.advance_timers(frame_time, &mut audio);

        if vm.take_draw_flag() {
            display.present(vm.display_buffer());
        }
    }

    if vm.is_waiting_for_key() {
        warn!("stopped while waiting for a key press");
    }
    if audio.is_playing() {
        audio.stop();
    }

    info!(
        "ran {} frames, presented {}, {} pixels lit",
        conf.frames,
        display.presented(),
        display.lit()
    );
    println!("{}", vm.dump_display()?);

    Ok(())
}

fn dump_bytecode(filepath: impl AsRef<str>) -> Result<(), AppError> {
    let bytecode = fs::read(filepath.as_ref())?;

    let mut vm = Chip8Vm::new(Chip8Conf::default());
    vm.load_bytecode(bytecode.as_slice())?;

    // Instructions are always 2 bytes.
    if bytecode.len() % 2 != 0 {
        warn!("program has an odd number of bytes");
    }

    print!("{}", vm.dump_ram(bytecode.len() + bytecode.len() % 2)?);

    Ok(())
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let result = match parse_args() {
        Some(Cmd::Run { filepath, config }) => run_bytecode(filepath, config),
        Some(Cmd::Dump { filepath }) => dump_bytecode(filepath),
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn parse_args() -> Option<Cmd> {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(cmd) => {
            // don't format me T.T
            match cmd.as_str() {
                "run" => Some(Cmd::Run {
                    filepath: consume_arg(&mut args)?,
                    config: args.next(),
                }),
                "dump" => Some(Cmd::Dump {
                    filepath: consume_arg(&mut args)?,
                }),
                _ => None,
            }
        }
        None => None,
    }
}

/// Consumes the next argument, which is required.
fn consume_arg(args: &mut impl Iterator<Item = String>) -> Option<String> {
    args.next()
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

enum Cmd {
    /// Run file
    Run {
        filepath: String,
        config: Option<String>,
    },
    /// Hex dump
    Dump { filepath: String },
}
