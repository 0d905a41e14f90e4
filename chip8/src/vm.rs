//! Virtual machine.
use std::{
    fmt::{self, Write},
    ops::Range,
    time::Duration,
};

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    bytecode::Instr,
    clock::Clock,
    constants::*,
    cpu::Chip8Cpu,
    devices::{AudioSink, KeyCode, KeyState, Keypad},
    error::{Chip8Result, Fault},
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    timer: Clock,
    rng: StdRng,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        let rng = match conf.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Chip8Vm {
            cpu: Chip8Cpu::new(),
            timer: Clock::timers(),
            rng,
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    /// Read access to the machine state.
    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    /// Clear internal state in preparation for a fresh startup.
    pub fn reset(&mut self) {
        debug!("reset");
        self.cpu.reset();
        self.timer.reset();
    }

    /// Reset the machine and copy the program into memory.
    ///
    /// When the program is too large the machine is left in its reset state.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        // Start with clean memory to avoid leaking previous program.
        self.reset();

        self.cpu.load(bytecode)?;
        debug!("loaded program of {} bytes", bytecode.len());

        Ok(())
    }

    pub fn display_buffer(&self) -> &Chip8DisplayBuffer {
        &self.cpu.display
    }

    /// Returns whether the display changed since the last call, and clears the flag.
    pub fn take_draw_flag(&mut self) -> bool {
        std::mem::replace(&mut self.cpu.draw_flag, false)
    }

    /// The buzzer should be sounding while the sound timer counts down.
    pub fn is_sound_active(&self) -> bool {
        self.cpu.sound_timer > 0
    }

    /// Execution is stalled on `Fx0A` until a key is pressed.
    pub fn is_waiting_for_key(&self) -> bool {
        self.cpu.key_wait
    }
}

/// Outcome of a single interpreter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is useful for the caller to avoid being
    /// blocked on infinite or long running loops.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    /// - Bnnn (`JP V0, addr`)
    Jump,
    /// Display buffer was modified.
    Draw,
    /// Sound timer was loaded.
    Sound,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    /// The program counter does not advance.
    KeyWait,
}

/// Buzzer signal produced by a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Sound timer is idle.
    Silent,
    /// Sound timer is still counting, the tone should be playing.
    Play,
    /// Sound timer has just reached zero.
    Stop,
}

/// VM Configuration Parameters.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Chip8Conf {
    /// Instruction rate the host intends to step the VM at.
    pub clock_frequency: Option<Hz>,
    /// Seed for the random number generator behind `Cxnn`.
    pub seed: Option<u64>,
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Timers
impl Chip8Vm {
    /// Count down the delay and sound timers by one 60 Hz cycle.
    pub fn tick(&mut self) -> Tone {
        self.cpu.tick_delay();

        if self.cpu.sound_timer > 0 {
            self.cpu.tick_sound();
            if self.cpu.sound_timer == 0 {
                Tone::Stop
            } else {
                Tone::Play
            }
        } else {
            Tone::Silent
        }
    }

    /// Account for elapsed host time, running as many timer ticks as are due.
    ///
    /// Tone changes are forwarded to the audio device. Returns the number of ticks.
    pub fn advance_timers(&mut self, dt: Duration, audio: &mut impl AudioSink) -> u32 {
        let ticks = self.timer.advance(dt);

        for _ in 0..ticks {
            match self.tick() {
                Tone::Play => audio.play(),
                Tone::Stop => audio.stop(),
                Tone::Silent => {}
            }
        }

        ticks
    }
}

/// Interpreter
impl Chip8Vm {
    /// Step the VM until it stalls on input, or the step count runs out.
    pub fn run_steps(&mut self, step_count: usize, keypad: &impl Keypad) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;

        for _ in 0..step_count {
            flow = self.step(keypad)?;
            if flow == Flow::KeyWait {
                break;
            }
        }

        Ok(flow)
    }

    /// Fetch, decode and execute a single instruction.
    ///
    /// The keypad is sampled once, before the instruction is fetched.
    /// On a fault the machine state is left untouched.
    pub fn step(&mut self, keypad: &impl Keypad) -> Result<Flow, Fault> {
        self.cpu.keys = KeyState::snapshot(keypad);

        let pc = self.cpu.pc;
        let instr = self.cpu.instr().ok_or(Fault::MemoryOutOfBounds {
            pc,
            address: (pc as usize).max(MEM_SIZE),
        })?;

        self.cpu.pc += 2;

        let result = self.exec(pc, instr);

        if let Err(fault) = result {
            warn!("{fault}");
            self.cpu.pc = pc;
        }

        result
    }

    fn exec(&mut self, pc: Address, instr: Instr) -> Result<Flow, Fault> {
        // Each instruction is two bytes, with the opcode identity in the first 4-bit nibble.
        let vx = instr.x();
        let vy = instr.y();
        let nn = instr.nn();
        let nnn = instr.nnn();

        let mut control_flow = Flow::Ok;

        match instr.op() {
            // Miscellaneous instructions identified by nn
            0x0 | 0xE | 0xF => control_flow = self.exec_misc(pc, instr)?,
            // 1NNN (JP addr)
            //
            // Jump to address.
            0x1 => {
                op_trace(pc, instr, "JP");

                self.cpu.pc = nnn;
                control_flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN.
            0x2 => {
                op_trace(pc, instr, "CALL");

                let sp = self.cpu.sp as usize;
                if sp >= STACK_SIZE {
                    return Err(Fault::StackOverflow { pc });
                }

                // Return to the instruction after the call.
                self.cpu.stack[sp] = self.cpu.pc;
                self.cpu.sp += 1;
                self.cpu.pc = nnn;
                control_flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            0x3 => {
                op_trace(pc, instr, "SE");

                if self.cpu.registers[vx] == nn {
                    self.cpu.pc += 2;
                }
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            0x4 => {
                op_trace(pc, instr, "SNE");

                if self.cpu.registers[vx] != nn {
                    self.cpu.pc += 2;
                }
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals value VY.
            0x5 => {
                op_trace(pc, instr, "SE");

                if self.cpu.registers[vx] == self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            0x6 => {
                op_trace(pc, instr, "LD");

                self.cpu.registers[vx] = nn;
            }
            // 7xnn (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            0x7 => {
                op_trace(pc, instr, "ADD");

                self.cpu.registers[vx] = self.cpu.registers[vx].wrapping_add(nn);
            }
            // Arithmetic instructions indentified by n
            0x8 => self.exec_math(pc, instr)?,
            // 9xy0 (SNE Vx, Vy)
            //
            // Skip next instruction if Vx != Vy.
            0x9 => {
                if instr.n() != 0 {
                    return Err(unknown(pc, instr));
                }
                op_trace(pc, instr, "SNE");

                if self.cpu.registers[vx] != self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // Annn (LD I, addr)
            //
            // Set address register I to value NNN.
            0xA => {
                op_trace(pc, instr, "LD I");

                self.cpu.address = nnn;
            }
            // Bnnn (JP V0, addr)
            //
            // Jump to address NNN offset by register V0.
            0xB => {
                op_trace(pc, instr, "JP V0");

                self.cpu.pc = nnn + self.cpu.registers[0] as Address;
                control_flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Generate random number.
            // Set register VX to the result of bitwise AND between a random number and NN.
            0xC => {
                op_trace(pc, instr, "RND");

                self.cpu.registers[vx] = nn & self.rng.gen::<u8>();
            }
            // Dxyn (DRW Vx, Vy, nibble)
            0xD => {
                op_trace(pc, instr, "DRW");

                self.exec_draw(pc, instr)?;
                control_flow = Flow::Draw;
            }
            _ => unreachable!("opcode is a 4-bit nibble"),
        }

        Ok(control_flow)
    }

    /// Execute an arithmetic instruction
    #[inline]
    fn exec_math(&mut self, pc: Address, instr: Instr) -> Result<(), Fault> {
        debug_assert_eq!(instr.op(), 0x8);

        let (vx, vy) = (instr.x(), instr.y());
        let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);

        // The flag is written after the result, so it wins when Vx is VF.
        let (result, flag) = match instr.n() {
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            0x0 => {
                op_trace(pc, instr, "LD");
                (y, None)
            }
            // 8XY1 (OR Vx, Vy)
            0x1 => {
                op_trace(pc, instr, "OR");
                (x | y, None)
            }
            // 8XY2 (AND Vx, Vy)
            0x2 => {
                op_trace(pc, instr, "AND");
                (x & y, None)
            }
            // 8XY3 (XOR Vx, Vy)
            0x3 => {
                op_trace(pc, instr, "XOR");
                (x ^ y, None)
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // ADDs VX to VY, and stores the result in VX.
            // Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            0x4 => {
                op_trace(pc, instr, "ADD");
                let (result, carry) = x.overflowing_add(y);
                (result, Some(carry as u8))
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            // Equal operands don't borrow and set VF to 1, unlike interpreters
            // that compare with a strict greater-than.
            0x5 => {
                op_trace(pc, instr, "SUB");
                let (result, borrow) = x.overflowing_sub(y);
                (result, Some(!borrow as u8))
            }
            // 8XY6 (SHR Vx)
            //
            // The least-significant bit of Vx is shifted out into VF.
            // VY is unused.
            0x6 => {
                op_trace(pc, instr, "SHR");
                (x >> 1, Some(x & 1))
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            // Same as 8XY5, equal operands set VF to 1.
            0x7 => {
                op_trace(pc, instr, "SUBN");
                let (result, borrow) = y.overflowing_sub(x);
                (result, Some(!borrow as u8))
            }
            // 8XYE (SHL Vx)
            //
            // The most-significant bit of Vx is shifted out into VF.
            // VY is unused.
            0xE => {
                op_trace(pc, instr, "SHL");
                (x << 1, Some(x >> 7))
            }
            _ => return Err(unknown(pc, instr)),
        };

        self.cpu.registers[vx] = result;
        if let Some(flag) = flag {
            self.cpu.registers[FLAG_REGISTER] = flag;
        }

        Ok(())
    }

    /// Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
    /// Sprite is encoded as 8 pixels wide, N pixels high, stored in bits located in
    /// memory pointed to by address register I.
    ///
    /// Sprites are not wrapped around the screen edges. A set sprite pixel that lands
    /// outside the display is a fault, and nothing is drawn.
    ///
    /// If the drawing operation erases existing pixels in the display buffer, register VF is set to
    /// 1, and set to 0 if no display bits are unset. This is used for collision detection.
    fn exec_draw(&mut self, pc: Address, instr: Instr) -> Result<(), Fault> {
        let x = self.cpu.registers[instr.x()] as usize;
        let y = self.cpu.registers[instr.y()] as usize;

        let rows = self.mem_range(pc, self.cpu.address as usize, instr.n() as usize)?;
        let mut sprite = [0u8; 0xF];
        let sprite = &mut sprite[..rows.len()];
        sprite.copy_from_slice(&self.cpu.ram[rows]);

        // Validate the whole sprite before touching the display.
        for (r, row) in sprite.iter().enumerate() {
            for c in 0..SPRITE_WIDTH {
                let (px, py) = (x + c, y + r);
                if (row >> (7 - c)) & 1 == 1 && (px >= DISPLAY_WIDTH || py >= DISPLAY_HEIGHT) {
                    return Err(Fault::DisplayOutOfBounds { pc, x: px, y: py });
                }
            }
        }

        let mut is_erased = false;

        for (r, row) in sprite.iter().enumerate() {
            // Each row is 8 bits representing the 8 pixels of the sprite.
            for c in 0..SPRITE_WIDTH {
                if (row >> (7 - c)) & 1 == 0 {
                    continue;
                }

                let d = (x + c) + (y + r) * DISPLAY_WIDTH;
                let old_px = self.cpu.display[d];

                // XOR erases a pixel when both the old and new values are both 1.
                is_erased |= old_px;

                self.cpu.display[d] = !old_px;
            }
        }

        // If a pixel was erased, then a collision occurred.
        self.cpu.registers[FLAG_REGISTER] = is_erased as u8;
        self.cpu.draw_flag = true;

        Ok(())
    }

    /// Execute a miscellaneous instruction
    #[inline]
    fn exec_misc(&mut self, pc: Address, instr: Instr) -> Result<Flow, Fault> {
        let op = instr.op();
        let vx = instr.x();

        let mut control_flow = Flow::Ok;

        match (op, instr.nn()) {
            // ----------------------------------------------------------------
            // 00E0 (CLS)
            //
            // Clear display
            (0x0, 0xE0) if vx == 0 => {
                op_trace(pc, instr, "CLS");

                self.cpu.clear_display();
                control_flow = Flow::Draw;
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // Subtract 1 from the stack pointer.
            // Set the program counter to the value at the top of the stack.
            (0x0, 0xEE) if vx == 0 => {
                op_trace(pc, instr, "RET");

                let sp = self
                    .cpu
                    .sp
                    .checked_sub(1)
                    .ok_or(Fault::StackUnderflow { pc })?;

                self.cpu.sp = sp;
                self.cpu.pc = self.cpu.stack[sp as usize];
                control_flow = Flow::Jump;
            }
            // ----------------------------------------------------------------
            // Ex9E (SKP Vx)
            //
            // Skip the next instruction if the key in Vx is pressed.
            (0xE, 0x9E) => {
                op_trace(pc, instr, "SKP");

                if self.key_pressed(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // ExA1 (SKNP Vx)
            //
            // Skip the next instruction if the key in Vx is not pressed.
            (0xE, 0xA1) => {
                op_trace(pc, instr, "SKNP");

                if !self.key_pressed(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // ----------------------------------------------------------------
            // Fx07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            (0xF, 0x07) => {
                op_trace(pc, instr, "LD DT");

                self.cpu.registers[vx] = self.cpu.delay_timer;
            }
            // Fx0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            // All execution stops until a key is pressed, then the value of that key is stored in Vx.
            (0xF, 0x0A) => {
                op_trace(pc, instr, "LD K");

                if let Some(k) = self.cpu.keys.first_key() {
                    self.cpu.registers[vx] = k.as_u8();
                    self.cpu.key_wait = false;
                } else {
                    // rewind the program counter to stall the machine
                    self.cpu.pc = pc;
                    self.cpu.key_wait = true;
                    control_flow = Flow::KeyWait;
                }
            }
            // Fx15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            (0xF, 0x15) => {
                op_trace(pc, instr, "LD DT");

                self.cpu.delay_timer = self.cpu.registers[vx];
            }
            // Fx18 (LD ST, Vx)
            //
            // Set sound timer = Vx.
            (0xF, 0x18) => {
                op_trace(pc, instr, "LD ST");

                self.cpu.sound_timer = self.cpu.registers[vx];
                control_flow = Flow::Sound;
            }
            // Fx1E (ADD I, Vx)
            //
            // Add Vx to I. VF is not affected.
            (0xF, 0x1E) => {
                op_trace(pc, instr, "ADD I");

                let x = self.cpu.registers[vx] as Address;
                self.cpu.address = self.cpu.address.wrapping_add(x);
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            (0xF, 0x29) => {
                op_trace(pc, instr, "LD F");

                let x = self.cpu.registers[vx] as Address;
                self.cpu.address = FONTSET_START + x * FONTSET_HEIGHT as Address;
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            (0xF, 0x33) => {
                op_trace(pc, instr, "LD B");

                let addr = self.mem_range(pc, self.cpu.address as usize, 3)?.start;
                let x = self.cpu.registers[vx];
                self.cpu.ram[addr]     = x / 100 % 10;
                self.cpu.ram[addr + 1] = x / 10  % 10;
                self.cpu.ram[addr + 2] = x       % 10;
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            // I is left pointing past the last written byte.
            (0xF, 0x55) => {
                op_trace(pc, instr, "LD [I]");

                let range = self.mem_range(pc, self.cpu.address as usize, vx + 1)?;
                self.cpu.ram[range].copy_from_slice(&self.cpu.registers[0..=vx]);
                self.cpu.address = self.cpu.address.wrapping_add(vx as Address + 1);
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            // I is left pointing past the last read byte.
            (0xF, 0x65) => {
                op_trace(pc, instr, "LD [I]");

                let range = self.mem_range(pc, self.cpu.address as usize, vx + 1)?;
                self.cpu.registers[0..=vx].copy_from_slice(&self.cpu.ram[range]);
                self.cpu.address = self.cpu.address.wrapping_add(vx as Address + 1);
            }
            // ----------------------------------------------------------------
            // Includes 0NNN (SYS addr), which calls native code on the original hardware.
            _ => return Err(unknown(pc, instr)),
        }

        Ok(control_flow)
    }

    /// Bounds check a memory access of `len` bytes at `start`.
    #[inline]
    fn mem_range(&self, pc: Address, start: usize, len: usize) -> Result<Range<usize>, Fault> {
        let end = start + len;
        if end > MEM_SIZE {
            Err(Fault::MemoryOutOfBounds {
                pc,
                address: start.max(MEM_SIZE),
            })
        } else {
            Ok(start..end)
        }
    }

    /// Key values outside of the keypad range are never pressed.
    #[inline]
    fn key_pressed(&self, key_id: u8) -> bool {
        KeyCode::try_from(key_id)
            .map(|key| self.cpu.keys.get(key))
            .unwrap_or(false)
    }
}

#[inline]
fn unknown(pc: Address, instr: Instr) -> Fault {
    Fault::UnknownOpcode {
        pc,
        opcode: instr.0,
    }
}

/// Troubleshooting
impl Chip8Vm {
    /// Returns the contents of the memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let iter = self
            .cpu
            .ram
            .chunks_exact(2)
            .enumerate()
            .skip(MEM_START / 2)
            .take(count / 2);
        let mut buf = String::new();

        for (i, op) in iter {
            writeln!(buf, "{:04X}: {:02X}{:02X}", i * 2, op[0], op[1])?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for row in self.cpu.display.chunks_exact(DISPLAY_WIDTH) {
            for px in row {
                buf.write_char(if *px { '#' } else { '.' })?;
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }
}

#[cfg(feature = "op_trace")]
#[inline]
fn op_trace(pc: Address, instr: Instr, name: &str) {
    log::trace!(
        "{:04X}: {} {:6} x={:X} y={:X} nnn={:03X}",
        pc,
        instr,
        name,
        instr.x(),
        instr.y(),
        instr.nnn()
    );
}

#[cfg(not(feature = "op_trace"))]
#[inline]
fn op_trace(_: Address, _: Instr, _: &str) {}
