mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod devices;
mod error;
mod vm;

pub use self::{
    bytecode::Instr,
    clock::Clock,
    constants::{Address, Chip8DisplayBuffer},
    devices::{AudioSink, DisplaySink, InvalidKeyCode, KeyCode, KeyState, Keypad},
    error::{Chip8Error, Chip8Result, Fault},
    vm::{Flow, Hz, Tone},
};

pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::{
        cpu::Chip8Cpu,
        devices::{AudioSink, DisplaySink, KeyCode, KeyState, Keypad},
        error::{Chip8Error, Chip8Result, Fault},
        vm::{Chip8Conf, Chip8Vm, Flow, Tone},
    };
}
