//! Result and errors.
use std::fmt::{self, Display, Formatter};

use crate::constants::Address;

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Attempt to load a bytecode program that can't fit in memory.
    LargeProgram { size: usize },
    /// VM fault during the interpreter loop.
    Fault(Fault),
    Fmt(fmt::Error),
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeProgram { size } => write!(
                f,
                "program too large for VM memory: {} bytes, at most {} allowed",
                size,
                crate::constants::MAX_PROGRAM_SIZE
            ),
            Self::Fault(fault) => write!(f, "runtime error: {}", fault),
            Self::Fmt(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Chip8Error {}

impl From<Fault> for Chip8Error {
    fn from(fault: Fault) -> Self {
        Chip8Error::Fault(fault)
    }
}

impl From<fmt::Error> for Chip8Error {
    fn from(err: fmt::Error) -> Self {
        Chip8Error::Fmt(err)
    }
}

/// Fatal condition raised by a single instruction.
///
/// The machine state is left exactly as it was before the
/// faulting instruction was fetched, so the caller can inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Instruction does not decode to any known opcode.
    UnknownOpcode { pc: Address, opcode: u16 },
    /// `CALL` with all stack slots in use.
    StackOverflow { pc: Address },
    /// `RET` with an empty stack.
    StackUnderflow { pc: Address },
    /// Memory access past the end of RAM.
    MemoryOutOfBounds { pc: Address, address: usize },
    /// Sprite pixel drawn outside of the screen.
    DisplayOutOfBounds { pc: Address, x: usize, y: usize },
}

impl Fault {
    /// Program counter of the faulting instruction.
    pub fn pc(&self) -> Address {
        match *self {
            Self::UnknownOpcode { pc, .. }
            | Self::StackOverflow { pc }
            | Self::StackUnderflow { pc }
            | Self::MemoryOutOfBounds { pc, .. }
            | Self::DisplayOutOfBounds { pc, .. } => pc,
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { pc, opcode } => {
                write!(f, "{pc:04X}: unknown opcode {opcode:04X}")
            }
            Self::StackOverflow { pc } => write!(f, "{pc:04X}: call stack overflow"),
            Self::StackUnderflow { pc } => write!(f, "{pc:04X}: call stack underflow"),
            Self::MemoryOutOfBounds { pc, address } => {
                write!(f, "{pc:04X}: memory access out of bounds at {address:#X}")
            }
            Self::DisplayOutOfBounds { pc, x, y } => {
                write!(f, "{pc:04X}: sprite pixel ({x}, {y}) outside of display")
            }
        }
    }
}

impl std::error::Error for Fault {}
