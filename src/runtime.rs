//! The CHIP-8 machine itself: memory, registers, timers, framebuffer, and
//! the fetch-decode-execute step.
//!
//! The emulator owns no platform resources. A host calls [`Emulator::step`]
//! from its own loop, writes [`Emulator::key`] between steps, and reads the
//! framebuffer and sound timer to drive display and audio. While the
//! wait-for-key latch is engaged, `step` only ticks timers until a key
//! arrives.

use std::error::Error;
use std::fmt;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::decode::DecodedIns;
use crate::isa::{
    Ins, FLAG_REG, FONT_HEIGHT, FONT_SPRITES, INS_LEN, KEY_NONE, PROG_START, RAM_SIZE, REG_COUNT,
    SCREEN_HEIGHT, SCREEN_WIDTH, STACK_SIZE, TIMER_FREQ,
};

/// Largest ROM that fits between the program base and the end of RAM.
pub const ROM_MAX: usize = RAM_SIZE - PROG_START as usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RuntimeError {
    RomTooBig { size: usize },
    IllegalInstruction { word: u16, pc: u16 },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomTooBig { size } => {
                write!(f, "ROM size of {size} bytes exceeds the {ROM_MAX} byte maximum")
            }
            Self::IllegalInstruction { word, pc } => {
                write!(f, "illegal instruction {word:#06X} at address {pc:#05X}")
            }
        }
    }
}

impl Error for RuntimeError {}

/// Complete machine state. Fields a frontend reads for display are public;
/// `key` is the one field a frontend writes, between steps.
#[derive(Debug)]
pub struct Emulator {
    pub pc: u16,
    pub index: u16,
    pub sp: u8,
    /// Currently held key in `0..=15`, or [`KEY_NONE`].
    pub key: u8,
    pub regs: [u8; REG_COUNT],

    /// One bit per pixel, bit `x` of row `y`.
    screen: [u64; SCREEN_HEIGHT],
    stack: [u16; STACK_SIZE],
    ram: [u8; RAM_SIZE],
    wait_for_key: bool,
    key_reg: u8,
    // Timers count down smoothly and convert to u8 on read, keeping 60 Hz
    // behaviour at any host tick rate.
    dtimer: f64,
    stimer: f64,
    rng: StdRng,
    last_time: Instant,
}

impl Emulator {
    pub fn new(rom: &[u8]) -> Result<Self, RuntimeError> {
        Self::with_rng(rom, StdRng::from_entropy())
    }

    /// Deterministic `RND` sequence, for tests.
    pub fn with_seed(rom: &[u8], seed: u64) -> Result<Self, RuntimeError> {
        Self::with_rng(rom, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rom: &[u8], rng: StdRng) -> Result<Self, RuntimeError> {
        if rom.len() > ROM_MAX {
            return Err(RuntimeError::RomTooBig { size: rom.len() });
        }

        let mut ram = [0; RAM_SIZE];
        // Font sprites live at the bottom of RAM, program after 0x200.
        for (i, sprite) in FONT_SPRITES.iter().enumerate() {
            ram[i * FONT_HEIGHT..][..FONT_HEIGHT].copy_from_slice(sprite);
        }
        ram[PROG_START as usize..][..rom.len()].copy_from_slice(rom);

        Ok(Emulator {
            pc: PROG_START,
            index: 0,
            sp: 0,
            key: KEY_NONE,
            regs: [0; REG_COUNT],
            screen: [0; SCREEN_HEIGHT],
            stack: [0; STACK_SIZE],
            ram,
            wait_for_key: false,
            key_reg: 0,
            dtimer: 0.0,
            stimer: 0.0,
            rng,
            last_time: Instant::now(),
        })
    }

    /// Resets the wall-clock baseline so timers do not decay across a pause.
    pub fn reset_clock(&mut self) {
        self.last_time = Instant::now();
    }

    pub fn delay_timer(&self) -> u8 {
        self.dtimer.round() as u8
    }

    pub fn sound_timer(&self) -> u8 {
        self.stimer.round() as u8
    }

    /// Big-endian word at `addr`; both byte reads wrap around RAM.
    pub fn fetch_word(&self, addr: u16) -> u16 {
        let at = addr as usize;
        u16::from(self.ram[at % RAM_SIZE]) << 8 | u16::from(self.ram[(at + 1) % RAM_SIZE])
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.screen[y % SCREEN_HEIGHT] >> (x % SCREEN_WIDTH) & 1 != 0
    }

    /// Framebuffer rows, one `u64` of pixel bits per row.
    pub fn screen_rows(&self) -> &[u64; SCREEN_HEIGHT] {
        &self.screen
    }

    /// Run one instruction, or commit a latched key press, or (while waiting
    /// on a key that has not arrived) only tick timers.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f64();
        self.last_time = now;
        self.update_timers(dt);

        if self.wait_for_key {
            // Commit the key and finish the latched instruction; the next
            // step resumes normal fetching.
            if self.key != KEY_NONE {
                self.pc = self.pc.wrapping_add(INS_LEN);
                self.regs[self.key_reg as usize] = self.key;
                self.wait_for_key = false;
            }
            return Ok(());
        }

        let word = self.fetch_word(self.pc);
        let ins = DecodedIns::new(word);
        let vx = ins.vx as usize;
        let vy = ins.vy as usize;

        use Ins::*;
        match ins.ins {
            Cls => self.screen = [0; SCREEN_HEIGHT],

            Ret => {
                self.sp = self.sp.wrapping_sub(1);
                self.pc = self.stack[self.sp as usize % STACK_SIZE];
            }

            // Machine-code call on real hardware; ignored here.
            SysA => {}

            JpA => self.pc = ins.addr,

            CallA => {
                self.stack[self.sp as usize % STACK_SIZE] = self.pc.wrapping_add(INS_LEN);
                self.sp = self.sp.wrapping_add(1);
                self.pc = ins.addr;
            }

            SeVB => {
                if self.regs[vx] == ins.byte {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            SneVB => {
                if self.regs[vx] != ins.byte {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            SeVV => {
                if self.regs[vx] == self.regs[vy] {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            LdVB => self.regs[vx] = ins.byte,

            // The carry flag is not changed for this instruction.
            AddVB => self.regs[vx] = self.regs[vx].wrapping_add(ins.byte),

            LdVV => self.regs[vx] = self.regs[vy],
            OrVV => self.regs[vx] |= self.regs[vy],
            AndVV => self.regs[vx] &= self.regs[vy],
            XorVV => self.regs[vx] ^= self.regs[vy],

            // VF is written before the result so that a result aimed at VF
            // itself wins.
            AddVV => {
                let (sum, carry) = self.regs[vx].overflowing_add(self.regs[vy]);
                self.regs[FLAG_REG] = u8::from(carry);
                self.regs[vx] = sum;
            }

            SubVV => {
                let (a, b) = (self.regs[vx], self.regs[vy]);
                self.regs[FLAG_REG] = u8::from(a >= b);
                self.regs[vx] = a.wrapping_sub(b);
            }

            ShrV => {
                self.regs[FLAG_REG] = self.regs[vx] & 1;
                self.regs[vx] >>= 1;
            }

            SubnVV => {
                let (a, b) = (self.regs[vx], self.regs[vy]);
                self.regs[FLAG_REG] = u8::from(b >= a);
                self.regs[vx] = b.wrapping_sub(a);
            }

            ShlV => {
                self.regs[FLAG_REG] = self.regs[vx] >> 7 & 1;
                self.regs[vx] <<= 1;
            }

            SneVV => {
                if self.regs[vx] != self.regs[vy] {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            LdIA => self.index = ins.addr,

            JpV0A => self.pc = u16::from(self.regs[0]) + ins.addr,

            RndVB => {
                let r: u8 = self.rng.gen();
                self.regs[vx] = r & ins.byte;
            }

            DrwVVN => self.draw_sprite(self.regs[vx], self.regs[vy], ins.nibble),

            SkpV => {
                if self.key != KEY_NONE && self.regs[vx] == self.key {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            SknpV => {
                if self.key == KEY_NONE || self.regs[vx] != self.key {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            LdVDt => self.regs[vx] = self.delay_timer(),

            LdVK => {
                self.key_reg = ins.vx;
                self.wait_for_key = true;
            }

            LdDtV => self.dtimer = f64::from(self.regs[vx]),
            LdStV => self.stimer = f64::from(self.regs[vx]),

            AddIV => self.index = self.index.wrapping_add(u16::from(self.regs[vx])),

            LdFV => self.index = u16::from(self.regs[vx]) * FONT_HEIGHT as u16,

            LdBV => {
                let val = self.regs[vx];
                let at = self.index as usize;
                self.ram[at % RAM_SIZE] = val / 100;
                self.ram[(at + 1) % RAM_SIZE] = val % 100 / 10;
                self.ram[(at + 2) % RAM_SIZE] = val % 10;
            }

            // Neither register-file transfer modifies the index register.
            LdImV => {
                for i in 0..=vx {
                    self.ram[(self.index as usize + i) % RAM_SIZE] = self.regs[i];
                }
            }

            LdVIm => {
                for i in 0..=vx {
                    self.regs[i] = self.ram[(self.index as usize + i) % RAM_SIZE];
                }
            }

            Illegal => {
                return Err(RuntimeError::IllegalInstruction {
                    word,
                    pc: self.pc,
                })
            }
        }

        match ins.ins {
            // Branch instructions set PC themselves, and the key-wait latch
            // advances PC only once its key arrives.
            Ret | JpA | CallA | JpV0A | LdVK => {}
            _ => self.pc = self.pc.wrapping_add(INS_LEN),
        }

        Ok(())
    }

    /// XOR an `height`-row sprite from `RAM[I]` onto the screen at `(x, y)`,
    /// wrapping both axes, and set VF to whether any lit pixel went dark.
    fn draw_sprite(&mut self, x: u8, y: u8, height: u8) {
        let mut collision = false;
        for i in 0..height as usize {
            let row_bits = self.ram[(self.index as usize + i) % RAM_SIZE];
            let yf = (y as usize + i) % SCREEN_HEIGHT;

            // MSB to LSB runs left to right.
            for j in 0..8 {
                let xf = (x as usize + j) % SCREEN_WIDTH;
                let sprite_px = row_bits >> (7 - j) & 1 != 0;
                let old_px = self.screen[yf] >> xf & 1 != 0;
                let new_px = old_px ^ sprite_px;

                if old_px && !new_px {
                    collision = true;
                }
                if new_px {
                    self.screen[yf] |= 1 << xf;
                } else {
                    self.screen[yf] &= !(1 << xf);
                }
            }
        }

        self.regs[FLAG_REG] = u8::from(collision);
    }

    fn update_timers(&mut self, dt: f64) {
        self.dtimer = (self.dtimer - dt * TIMER_FREQ).max(0.0);
        self.stimer = (self.stimer - dt * TIMER_FREQ).max(0.0);
    }
}
