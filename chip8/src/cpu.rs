//! CPU and memory state.
use crate::{
    bytecode::Instr,
    constants::*,
    devices::KeyState,
    error::{Chip8Error, Chip8Result},
};

/// Core state for a chip8 interpreter.
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the bytecode.
    pub(crate) pc: Address,
    /// Stack pointer, indexing the next free slot in the stack.
    pub(crate) sp: u8,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Pointer register (I) used for temporarily storing an address.
    ///
    /// Not masked to 12 bits. Accessing memory past the end of RAM through it is a fault.
    pub(crate) address: Address,
    /// (DT) Delay timer that counts down to 0.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0. When it has a non-zero value, a beep is played.
    pub(crate) sound_timer: u8,
    /// Keyboard input state, snapshotted at the start of every step.
    pub(crate) keys: KeyState,
    /// Indicates that the machine is waiting for a keypress.
    pub(crate) key_wait: bool,
    /// Latch set when the display buffer changed, cleared by the consumer.
    pub(crate) draw_flag: bool,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: [Address; STACK_SIZE],
    /// Screen buffer that is drawn too.
    pub(crate) display: Box<Chip8DisplayBuffer>,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        let mut cpu = Self {
            pc: 0,
            sp: 0,
            registers: [0; REGISTER_COUNT],
            address: 0,
            delay_timer: 0,
            sound_timer: 0,
            keys: KeyState::default(),
            key_wait: false,
            draw_flag: false,

            ram: Box::new([0; MEM_SIZE]),
            stack: [0; STACK_SIZE],
            display: Box::new([false; DISPLAY_BUFFER_SIZE]),
        };
        cpu.reset();
        cpu
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    /// Return the machine to its power-on state.
    ///
    /// All memory is erased and the builtin font is written to the start of RAM.
    /// The draw flag is raised so the blank screen gets presented.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.stack.fill(0);
        self.display.fill(false);
        self.registers.fill(0);

        let font_start = FONTSET_START as usize;
        self.ram[font_start..font_start + FONTSET_DATA_LENGTH].copy_from_slice(&FONTSET);

        self.pc = MEM_START as Address;
        self.sp = 0;
        self.address = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.keys = KeyState::default();
        self.key_wait = false;
        self.draw_flag = true;
    }

    /// Copy the program into memory at `MEM_START`.
    ///
    /// Nothing is written when the program doesn't fit.
    pub fn load(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        if bytecode.len() > MAX_PROGRAM_SIZE {
            return Err(Chip8Error::LargeProgram {
                size: bytecode.len(),
            });
        }

        self.ram[MEM_START..MEM_START + bytecode.len()].copy_from_slice(bytecode);

        Ok(())
    }

    pub fn clear_display(&mut self) {
        self.display.fill(false);
        self.draw_flag = true;
    }

    /// Extract the instruction at the current program counter.
    ///
    /// Returns `None` when the instruction would straddle the end of memory.
    #[inline(always)]
    pub(crate) fn instr(&self) -> Option<Instr> {
        let pc = self.pc as usize;
        match self.ram.get(pc..pc + 2) {
            Some(&[a, b]) => Some(Instr::from_bytes([a, b])),
            _ => None,
        }
    }

    /// Count down the delay timer.
    #[inline]
    pub(crate) fn tick_delay(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
    }

    /// Count down the sound timer.
    #[inline]
    pub(crate) fn tick_sound(&mut self) {
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }
}

/// Read access
impl Chip8Cpu {
    #[inline]
    pub fn pc(&self) -> Address {
        self.pc
    }

    #[inline]
    pub fn sp(&self) -> u8 {
        self.sp
    }

    /// Index register I.
    #[inline]
    pub fn i(&self) -> Address {
        self.address
    }

    /// General purpose register Vx.
    #[inline]
    pub fn v(&self, x: usize) -> u8 {
        self.registers[x & 0xF]
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    pub fn memory(&self) -> &[u8; MEM_SIZE] {
        &self.ram
    }

    /// Return addresses currently on the stack, bottom first.
    pub fn stack(&self) -> &[Address] {
        &self.stack[..self.sp as usize]
    }

    #[inline]
    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    #[inline]
    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    #[inline]
    pub fn keys(&self) -> KeyState {
        self.keys
    }

    pub fn display(&self) -> &Chip8DisplayBuffer {
        &self.display
    }

    #[inline]
    pub fn draw_flag(&self) -> bool {
        self.draw_flag
    }
}
