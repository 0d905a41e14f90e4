//! Helpers for extracting operands from instructions.
use std::fmt;

use crate::constants::Address;

/// A single 16-bit instruction, as fetched big-endian from memory.
///
/// ```text
/// 0xF000  op   opcode family
/// 0x0F00  x    register index
/// 0x00F0  y    register index
/// 0x000F  n    4-bit constant
/// 0x00FF  nn   8-bit constant
/// 0x0FFF  nnn  12-bit address
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr(pub u16);

impl Instr {
    /// Combine two bytes of bytecode, high byte first.
    #[inline(always)]
    pub fn from_bytes([a, b]: [u8; 2]) -> Self {
        Self(((a as u16) << 8) | b as u16)
    }

    /// Opcode family in the upper nibble.
    #[inline(always)]
    pub fn op(self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// Operand X
    #[inline(always)]
    pub fn x(self) -> usize {
        ((self.0 >> 8) & 0xF) as usize
    }

    /// Operand Y
    #[inline(always)]
    pub fn y(self) -> usize {
        ((self.0 >> 4) & 0xF) as usize
    }

    /// Operand N
    #[inline(always)]
    pub fn n(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Operand NN
    #[inline(always)]
    pub fn nn(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Operand NNN
    #[inline(always)]
    pub fn nnn(self) -> Address {
        self.0 & 0xFFF
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}
