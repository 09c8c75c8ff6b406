//! WDC 65C816 CPU core implementation
//!
//! This module provides a reusable, generic 65C816 CPU implementation that can be used
//! by any system (SNES, Apple IIGS, etc.) by implementing the `Memory65c816` trait.
//!
//! The 65C816 is a 16-bit extension of the 6502 with:
//! - 16-bit accumulator and index registers (switchable to 8-bit)
//! - 24-bit address space (16MB)
//! - An emulation mode that behaves like a 6502 (stack pinned to page 1,
//!   8-bit registers)
//! - Additional addressing modes and new instructions for 16-bit operations
//!
//! Cycle charges are per-opcode approximations with branch-taken and
//! page-cross adjustments; systems that need a precise timebase drive the
//! CPU from a master clock rather than from these counts.

use crate::logging::{log, LogCategory, LogLevel};

/// Memory interface trait for the 65C816 CPU
///
/// Systems using the 65C816 must implement this trait to provide memory
/// access. Devices with read side effects (prefetch buffers, read cursors)
/// keep `read` at `&self` through interior mutability.
pub trait Memory65c816 {
    /// Read a byte from memory at the given 24-bit address
    fn read(&self, addr: u32) -> u8;

    /// Write a byte to memory at the given 24-bit address
    fn write(&mut self, addr: u32, val: u8);
}

// Status register flags
pub const FLAG_NEGATIVE: u8 = 0b1000_0000;
pub const FLAG_OVERFLOW: u8 = 0b0100_0000;
pub const FLAG_MEMORY: u8 = 0b0010_0000; // m flag: 0=16-bit A, 1=8-bit A
pub const FLAG_INDEX: u8 = 0b0001_0000; // x flag: 0=16-bit X/Y, 1=8-bit X/Y
pub const FLAG_DECIMAL: u8 = 0b0000_1000;
pub const FLAG_IRQ_DISABLE: u8 = 0b0000_0100;
pub const FLAG_ZERO: u8 = 0b0000_0010;
pub const FLAG_CARRY: u8 = 0b0000_0001;
/// The B bit occupies the x-flag position in emulation-mode interrupt pushes.
pub const FLAG_BREAK: u8 = 0b0001_0000;

// Interrupt vectors (bank 0, little-endian words)
const VECTOR_COP: u32 = 0xFFE4;
const VECTOR_BRK: u32 = 0xFFE6;
const VECTOR_COP_EMU: u32 = 0xFFF4;
const VECTOR_RESET: u32 = 0xFFFC;
const VECTOR_BRK_EMU: u32 = 0xFFFE;

/// WDC 65C816 CPU state and execution engine
///
/// This is a generic, reusable 65C816 CPU implementation that works with any
/// system through the `Memory65c816` trait.
#[derive(Debug)]
pub struct Cpu65c816<M: Memory65c816> {
    /// Accumulator register (C: 16-bit; B is the high byte in 8-bit mode)
    pub c: u16,
    /// X index register (16-bit)
    pub x: u16,
    /// Y index register (16-bit)
    pub y: u16,
    /// Stack pointer (16-bit; high byte pinned to $01 in emulation mode)
    pub s: u16,
    /// Direct page register (16-bit)
    pub d: u16,
    /// Data bank register (8-bit)
    pub dbr: u8,
    /// Program bank register (8-bit)
    pub pbr: u8,
    /// Program counter (16-bit, combined with PBR for 24-bit address)
    pub pc: u16,
    /// Status register (NVmxDIZC)
    pub status: u8,
    /// Emulation mode flag (true = 6502 emulation mode, false = native mode)
    pub emulation: bool,
    /// Total cycles executed
    pub cycles: u64,
    /// Memory interface
    pub memory: M,
}

impl<M: Memory65c816> Cpu65c816<M> {
    /// Create a new 65C816 CPU with the given memory interface
    pub fn new(memory: M) -> Self {
        Self {
            c: 0,
            x: 0,
            y: 0,
            s: 0x01FF,
            d: 0,
            dbr: 0,
            pbr: 0,
            pc: 0,
            status: 0x34, // m=1, x=1, I=1 (start in 8-bit mode)
            emulation: true,
            cycles: 0,
            memory,
        }
    }

    /// Reset the CPU to initial state (preserves memory)
    pub fn reset(&mut self) {
        self.c = 0;
        self.x = 0;
        self.y = 0;
        self.s = 0x01FF;
        self.d = 0;
        self.dbr = 0;
        self.pbr = 0;
        self.status = 0x34;
        self.emulation = true;
        self.cycles = 0;

        // Load reset vector from $00FFFC-$00FFFD
        self.pc = self.read_word(VECTOR_RESET);
    }

    /// Execute a single instruction and return cycles consumed
    pub fn step(&mut self) -> u32 {
        let start_cycles = self.cycles;
        let opcode = self.fetch_byte();

        match opcode {
            // BRK - Force Break
            0x00 => {
                let return_pc = self.pc.wrapping_add(1); // skip signature byte
                if !self.emulation {
                    self.push_byte(self.pbr);
                }
                self.push_word(return_pc);
                self.push_byte(self.status | FLAG_BREAK);
                self.status |= FLAG_IRQ_DISABLE;
                self.pbr = 0;
                self.pc = self.read_word(if self.emulation {
                    VECTOR_BRK_EMU
                } else {
                    VECTOR_BRK
                });
                self.cycles += if self.emulation { 7 } else { 8 };
            }

            // COP - Coprocessor Enable
            0x02 => {
                let return_pc = self.pc.wrapping_add(1); // skip signature byte
                if !self.emulation {
                    self.push_byte(self.pbr);
                }
                self.push_word(return_pc);
                self.push_byte(self.status);
                self.status |= FLAG_IRQ_DISABLE;
                self.pbr = 0;
                self.pc = self.read_word(if self.emulation {
                    VECTOR_COP_EMU
                } else {
                    VECTOR_COP
                });
                self.cycles += if self.emulation { 7 } else { 8 };
            }

            // ORA - OR with Accumulator
            0x09 => {
                let v = self.fetch_operand_a();
                self.ora(v);
                self.charge_a(2);
            }
            0x05 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(3);
            }
            0x15 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(4);
            }
            0x0D => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(4);
            }
            0x1D => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(4);
            }
            0x19 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(4);
            }
            0x0F => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(5);
            }
            0x1F => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(5);
            }
            0x01 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(6);
            }
            0x11 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(5);
            }
            0x12 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(5);
            }
            0x07 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(6);
            }
            0x17 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(6);
            }
            0x03 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(4);
            }
            0x13 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.ora(v);
                self.charge_a(7);
            }

            // AND - AND with Accumulator
            0x29 => {
                let v = self.fetch_operand_a();
                self.and(v);
                self.charge_a(2);
            }
            0x25 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(3);
            }
            0x35 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(4);
            }
            0x2D => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(4);
            }
            0x3D => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(4);
            }
            0x39 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(4);
            }
            0x2F => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(5);
            }
            0x3F => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(5);
            }
            0x21 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(6);
            }
            0x31 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(5);
            }
            0x32 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(5);
            }
            0x27 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(6);
            }
            0x37 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(6);
            }
            0x23 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(4);
            }
            0x33 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.and(v);
                self.charge_a(7);
            }

            // EOR - Exclusive OR with Accumulator
            0x49 => {
                let v = self.fetch_operand_a();
                self.eor(v);
                self.charge_a(2);
            }
            0x45 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(3);
            }
            0x55 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(4);
            }
            0x4D => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(4);
            }
            0x5D => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(4);
            }
            0x59 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(4);
            }
            0x4F => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(5);
            }
            0x5F => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(5);
            }
            0x41 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(6);
            }
            0x51 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(5);
            }
            0x52 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(5);
            }
            0x47 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(6);
            }
            0x57 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(6);
            }
            0x43 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(4);
            }
            0x53 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.eor(v);
                self.charge_a(7);
            }

            // ADC - Add with Carry
            0x69 => {
                let v = self.fetch_operand_a();
                self.adc(v);
                self.charge_a(2);
            }
            0x65 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(3);
            }
            0x75 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(4);
            }
            0x6D => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(4);
            }
            0x7D => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(4);
            }
            0x79 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(4);
            }
            0x6F => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(5);
            }
            0x7F => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(5);
            }
            0x61 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(6);
            }
            0x71 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(5);
            }
            0x72 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(5);
            }
            0x67 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(6);
            }
            0x77 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(6);
            }
            0x63 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(4);
            }
            0x73 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.adc(v);
                self.charge_a(7);
            }

            // SBC - Subtract with Carry
            0xE9 => {
                let v = self.fetch_operand_a();
                self.sbc(v);
                self.charge_a(2);
            }
            0xE5 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(3);
            }
            0xF5 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(4);
            }
            0xED => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(4);
            }
            0xFD => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(4);
            }
            0xF9 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(4);
            }
            0xEF => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(5);
            }
            0xFF => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(5);
            }
            0xE1 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(6);
            }
            0xF1 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(5);
            }
            0xF2 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(5);
            }
            0xE7 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(6);
            }
            0xF7 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(6);
            }
            0xE3 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(4);
            }
            0xF3 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.sbc(v);
                self.charge_a(7);
            }

            // CMP - Compare with Accumulator
            0xC9 => {
                let v = self.fetch_operand_a();
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(2);
            }
            0xC5 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(3);
            }
            0xD5 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(4);
            }
            0xCD => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(4);
            }
            0xDD => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(4);
            }
            0xD9 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(4);
            }
            0xCF => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(5);
            }
            0xDF => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(5);
            }
            0xC1 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(6);
            }
            0xD1 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(5);
            }
            0xD2 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(5);
            }
            0xC7 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(6);
            }
            0xD7 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(6);
            }
            0xC3 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(4);
            }
            0xD3 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                let a = self.get_a();
                self.compare(a, v, self.is_8bit_a());
                self.charge_a(7);
            }

            // CPX / CPY - Compare index registers
            0xE0 => {
                let v = self.fetch_operand_xy();
                let x = self.get_x();
                self.compare(x, v, self.is_8bit_xy());
                self.charge_xy(2);
            }
            0xE4 => {
                let addr = self.addr_dp();
                let v = self.operand_xy(addr);
                let x = self.get_x();
                self.compare(x, v, self.is_8bit_xy());
                self.charge_xy(3);
            }
            0xEC => {
                let addr = self.addr_abs();
                let v = self.operand_xy(addr);
                let x = self.get_x();
                self.compare(x, v, self.is_8bit_xy());
                self.charge_xy(4);
            }
            0xC0 => {
                let v = self.fetch_operand_xy();
                let y = self.get_y();
                self.compare(y, v, self.is_8bit_xy());
                self.charge_xy(2);
            }
            0xC4 => {
                let addr = self.addr_dp();
                let v = self.operand_xy(addr);
                let y = self.get_y();
                self.compare(y, v, self.is_8bit_xy());
                self.charge_xy(3);
            }
            0xCC => {
                let addr = self.addr_abs();
                let v = self.operand_xy(addr);
                let y = self.get_y();
                self.compare(y, v, self.is_8bit_xy());
                self.charge_xy(4);
            }

            // BIT - Bit Test
            0x89 => {
                // Immediate variant only touches Z
                let v = self.fetch_operand_a();
                self.bit_immediate(v);
                self.charge_a(2);
            }
            0x24 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.bit_memory(v);
                self.charge_a(3);
            }
            0x34 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.bit_memory(v);
                self.charge_a(4);
            }
            0x2C => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.bit_memory(v);
                self.charge_a(4);
            }
            0x3C => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.bit_memory(v);
                self.charge_a(4);
            }

            // LDA - Load Accumulator
            0xA9 => {
                let v = self.fetch_operand_a();
                self.lda(v);
                self.charge_a(2);
            }
            0xA5 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(3);
            }
            0xB5 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(4);
            }
            0xAD => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(4);
            }
            0xBD => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(4);
            }
            0xB9 => {
                let addr = self.addr_abs_y();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(4);
            }
            0xAF => {
                let addr = self.addr_abs_long();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(5);
            }
            0xBF => {
                let addr = self.addr_abs_long_x();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(5);
            }
            0xA1 => {
                let addr = self.addr_dp_x_ind();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(6);
            }
            0xB1 => {
                let addr = self.addr_dp_ind_y();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(5);
            }
            0xB2 => {
                let addr = self.addr_dp_ind();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(5);
            }
            0xA7 => {
                let addr = self.addr_dp_ind_long();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(6);
            }
            0xB7 => {
                let addr = self.addr_dp_ind_long_y();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(6);
            }
            0xA3 => {
                let addr = self.addr_sr();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(4);
            }
            0xB3 => {
                let addr = self.addr_sr_y();
                let v = self.operand_a(addr);
                self.lda(v);
                self.charge_a(7);
            }

            // LDX - Load X
            0xA2 => {
                let v = self.fetch_operand_xy();
                self.ldx(v);
                self.charge_xy(2);
            }
            0xA6 => {
                let addr = self.addr_dp();
                let v = self.operand_xy(addr);
                self.ldx(v);
                self.charge_xy(3);
            }
            0xB6 => {
                let addr = self.addr_dp_y();
                let v = self.operand_xy(addr);
                self.ldx(v);
                self.charge_xy(4);
            }
            0xAE => {
                let addr = self.addr_abs();
                let v = self.operand_xy(addr);
                self.ldx(v);
                self.charge_xy(4);
            }
            0xBE => {
                let addr = self.addr_abs_y();
                let v = self.operand_xy(addr);
                self.ldx(v);
                self.charge_xy(4);
            }

            // LDY - Load Y
            0xA0 => {
                let v = self.fetch_operand_xy();
                self.ldy(v);
                self.charge_xy(2);
            }
            0xA4 => {
                let addr = self.addr_dp();
                let v = self.operand_xy(addr);
                self.ldy(v);
                self.charge_xy(3);
            }
            0xB4 => {
                let addr = self.addr_dp_x();
                let v = self.operand_xy(addr);
                self.ldy(v);
                self.charge_xy(4);
            }
            0xAC => {
                let addr = self.addr_abs();
                let v = self.operand_xy(addr);
                self.ldy(v);
                self.charge_xy(4);
            }
            0xBC => {
                let addr = self.addr_abs_x();
                let v = self.operand_xy(addr);
                self.ldy(v);
                self.charge_xy(4);
            }

            // STA - Store Accumulator
            0x85 => {
                let addr = self.addr_dp();
                self.sta(addr);
                self.charge_a(3);
            }
            0x95 => {
                let addr = self.addr_dp_x();
                self.sta(addr);
                self.charge_a(4);
            }
            0x8D => {
                let addr = self.addr_abs();
                self.sta(addr);
                self.charge_a(4);
            }
            0x9D => {
                let addr = self.addr_abs_x();
                self.sta(addr);
                self.charge_a(5);
            }
            0x99 => {
                let addr = self.addr_abs_y();
                self.sta(addr);
                self.charge_a(5);
            }
            0x8F => {
                let addr = self.addr_abs_long();
                self.sta(addr);
                self.charge_a(5);
            }
            0x9F => {
                let addr = self.addr_abs_long_x();
                self.sta(addr);
                self.charge_a(5);
            }
            0x81 => {
                let addr = self.addr_dp_x_ind();
                self.sta(addr);
                self.charge_a(6);
            }
            0x91 => {
                let addr = self.addr_dp_ind_y();
                self.sta(addr);
                self.charge_a(6);
            }
            0x92 => {
                let addr = self.addr_dp_ind();
                self.sta(addr);
                self.charge_a(5);
            }
            0x87 => {
                let addr = self.addr_dp_ind_long();
                self.sta(addr);
                self.charge_a(6);
            }
            0x97 => {
                let addr = self.addr_dp_ind_long_y();
                self.sta(addr);
                self.charge_a(6);
            }
            0x83 => {
                let addr = self.addr_sr();
                self.sta(addr);
                self.charge_a(4);
            }
            0x93 => {
                let addr = self.addr_sr_y();
                self.sta(addr);
                self.charge_a(7);
            }

            // STX - Store X
            0x86 => {
                let addr = self.addr_dp();
                self.stx(addr);
                self.charge_xy(3);
            }
            0x96 => {
                let addr = self.addr_dp_y();
                self.stx(addr);
                self.charge_xy(4);
            }
            0x8E => {
                let addr = self.addr_abs();
                self.stx(addr);
                self.charge_xy(4);
            }

            // STY - Store Y
            0x84 => {
                let addr = self.addr_dp();
                self.sty(addr);
                self.charge_xy(3);
            }
            0x94 => {
                let addr = self.addr_dp_x();
                self.sty(addr);
                self.charge_xy(4);
            }
            0x8C => {
                let addr = self.addr_abs();
                self.sty(addr);
                self.charge_xy(4);
            }

            // STZ - Store Zero
            0x64 => {
                let addr = self.addr_dp();
                self.stz(addr);
                self.charge_a(3);
            }
            0x74 => {
                let addr = self.addr_dp_x();
                self.stz(addr);
                self.charge_a(4);
            }
            0x9C => {
                let addr = self.addr_abs();
                self.stz(addr);
                self.charge_a(4);
            }
            0x9E => {
                let addr = self.addr_abs_x();
                self.stz(addr);
                self.charge_a(5);
            }

            // INC / DEC
            0x1A => {
                let v = self.get_a();
                let r = self.inc_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0xE6 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.inc_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0xF6 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.inc_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0xEE => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.inc_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0xFE => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.inc_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }
            0x3A => {
                let v = self.get_a();
                let r = self.dec_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0xC6 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.dec_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0xD6 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.dec_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0xCE => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.dec_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0xDE => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.dec_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }
            0xE8 => {
                let v = self.get_x().wrapping_add(1);
                self.set_x(v);
                self.set_nz_xy(self.get_x());
                self.cycles += 2;
            }
            0xC8 => {
                let v = self.get_y().wrapping_add(1);
                self.set_y(v);
                self.set_nz_xy(self.get_y());
                self.cycles += 2;
            }
            0xCA => {
                let v = self.get_x().wrapping_sub(1);
                self.set_x(v);
                self.set_nz_xy(self.get_x());
                self.cycles += 2;
            }
            0x88 => {
                let v = self.get_y().wrapping_sub(1);
                self.set_y(v);
                self.set_nz_xy(self.get_y());
                self.cycles += 2;
            }

            // ASL - Arithmetic Shift Left
            0x0A => {
                let v = self.get_a();
                let r = self.asl_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0x06 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.asl_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0x16 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.asl_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x0E => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.asl_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x1E => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.asl_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }

            // LSR - Logical Shift Right
            0x4A => {
                let v = self.get_a();
                let r = self.lsr_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0x46 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.lsr_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0x56 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.lsr_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x4E => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.lsr_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x5E => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.lsr_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }

            // ROL - Rotate Left
            0x2A => {
                let v = self.get_a();
                let r = self.rol_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0x26 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.rol_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0x36 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.rol_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x2E => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.rol_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x3E => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.rol_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }

            // ROR - Rotate Right
            0x6A => {
                let v = self.get_a();
                let r = self.ror_value(v);
                self.set_a(r);
                self.cycles += 2;
            }
            0x66 => {
                let addr = self.addr_dp();
                let v = self.operand_a(addr);
                let r = self.ror_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(5);
            }
            0x76 => {
                let addr = self.addr_dp_x();
                let v = self.operand_a(addr);
                let r = self.ror_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x6E => {
                let addr = self.addr_abs();
                let v = self.operand_a(addr);
                let r = self.ror_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(6);
            }
            0x7E => {
                let addr = self.addr_abs_x();
                let v = self.operand_a(addr);
                let r = self.ror_value(v);
                self.write_operand_a(addr, r);
                self.charge_a(7);
            }

            // TSB / TRB - Test and Set/Reset Bits
            0x04 => {
                let addr = self.addr_dp();
                self.tsb(addr);
                self.charge_a(5);
            }
            0x0C => {
                let addr = self.addr_abs();
                self.tsb(addr);
                self.charge_a(6);
            }
            0x14 => {
                let addr = self.addr_dp();
                self.trb(addr);
                self.charge_a(5);
            }
            0x1C => {
                let addr = self.addr_abs();
                self.trb(addr);
                self.charge_a(6);
            }

            // Branches
            0x90 => self.branch(self.status & FLAG_CARRY == 0), // BCC
            0xB0 => self.branch(self.status & FLAG_CARRY != 0), // BCS
            0xF0 => self.branch(self.status & FLAG_ZERO != 0),  // BEQ
            0xD0 => self.branch(self.status & FLAG_ZERO == 0),  // BNE
            0x10 => self.branch(self.status & FLAG_NEGATIVE == 0), // BPL
            0x30 => self.branch(self.status & FLAG_NEGATIVE != 0), // BMI
            0x50 => self.branch(self.status & FLAG_OVERFLOW == 0), // BVC
            0x70 => self.branch(self.status & FLAG_OVERFLOW != 0), // BVS
            0x80 => self.branch(true),                          // BRA
            0x82 => {
                // BRL - Branch Long (16-bit relative)
                let offset = self.fetch_word();
                self.pc = self.pc.wrapping_add(offset);
                self.cycles += 4;
            }

            // Jumps and calls
            0x4C => {
                // JMP absolute
                self.pc = self.fetch_word();
                self.cycles += 3;
            }
            0x5C => {
                // JMP absolute long
                let target = self.fetch_long();
                self.pbr = (target >> 16) as u8;
                self.pc = (target & 0xFFFF) as u16;
                self.cycles += 4;
            }
            0x6C => {
                // JMP (absolute) - pointer in bank 0
                let ptr = self.fetch_word() as u32;
                self.pc = self.read_word(ptr);
                self.cycles += 5;
            }
            0x7C => {
                // JMP (absolute,X) - pointer in the program bank
                let base = self.fetch_word().wrapping_add(self.x);
                let ptr = ((self.pbr as u32) << 16) | base as u32;
                self.pc = self.read_word(ptr);
                self.cycles += 6;
            }
            0xDC => {
                // JMP [absolute] - 24-bit pointer in bank 0
                let ptr = self.fetch_word() as u32;
                let target = self.read_long(ptr);
                self.pbr = (target >> 16) as u8;
                self.pc = (target & 0xFFFF) as u16;
                self.cycles += 6;
            }
            0x20 => {
                // JSR absolute
                let target = self.fetch_word();
                let return_pc = self.pc.wrapping_sub(1);
                self.push_word(return_pc);
                self.pc = target;
                self.cycles += 6;
            }
            0xFC => {
                // JSR (absolute,X) - pointer in the program bank
                let base = self.fetch_word().wrapping_add(self.x);
                let return_pc = self.pc.wrapping_sub(1);
                self.push_word(return_pc);
                let ptr = ((self.pbr as u32) << 16) | base as u32;
                self.pc = self.read_word(ptr);
                self.cycles += 8;
            }
            0x22 => {
                // JSL absolute long
                let target = self.fetch_long();
                self.push_byte(self.pbr);
                let return_pc = self.pc.wrapping_sub(1);
                self.push_word(return_pc);
                self.pbr = (target >> 16) as u8;
                self.pc = (target & 0xFFFF) as u16;
                self.cycles += 8;
            }
            0x60 => {
                // RTS
                self.pc = self.pop_word().wrapping_add(1);
                self.cycles += 6;
            }
            0x6B => {
                // RTL
                self.pc = self.pop_word().wrapping_add(1);
                self.pbr = self.pop_byte();
                self.cycles += 6;
            }
            0x40 => {
                // RTI
                self.status = self.pop_byte();
                self.pc = self.pop_word();
                if !self.emulation {
                    self.pbr = self.pop_byte();
                }
                self.apply_mode_constraints();
                self.cycles += if self.emulation { 6 } else { 7 };
            }

            // Stack operations
            0x48 => {
                // PHA
                if self.is_8bit_a() {
                    self.push_byte((self.c & 0xFF) as u8);
                } else {
                    self.push_word(self.c);
                }
                self.charge_a(3);
            }
            0x68 => {
                // PLA
                if self.is_8bit_a() {
                    let v = self.pop_byte();
                    self.c = (self.c & 0xFF00) | v as u16;
                    self.set_zn_8(v);
                } else {
                    let v = self.pop_word();
                    self.c = v;
                    self.set_zn_16(v);
                }
                self.charge_a(4);
            }
            0xDA => {
                // PHX
                if self.is_8bit_xy() {
                    self.push_byte((self.x & 0xFF) as u8);
                } else {
                    self.push_word(self.x);
                }
                self.charge_xy(3);
            }
            0xFA => {
                // PLX
                if self.is_8bit_xy() {
                    let v = self.pop_byte();
                    self.x = v as u16;
                    self.set_zn_8(v);
                } else {
                    let v = self.pop_word();
                    self.x = v;
                    self.set_zn_16(v);
                }
                self.charge_xy(4);
            }
            0x5A => {
                // PHY
                if self.is_8bit_xy() {
                    self.push_byte((self.y & 0xFF) as u8);
                } else {
                    self.push_word(self.y);
                }
                self.charge_xy(3);
            }
            0x7A => {
                // PLY
                if self.is_8bit_xy() {
                    let v = self.pop_byte();
                    self.y = v as u16;
                    self.set_zn_8(v);
                } else {
                    let v = self.pop_word();
                    self.y = v;
                    self.set_zn_16(v);
                }
                self.charge_xy(4);
            }
            0x08 => {
                // PHP
                self.push_byte(self.status);
                self.cycles += 3;
            }
            0x28 => {
                // PLP
                self.status = self.pop_byte();
                self.apply_mode_constraints();
                self.cycles += 4;
            }
            0x8B => {
                // PHB
                self.push_byte(self.dbr);
                self.cycles += 3;
            }
            0xAB => {
                // PLB
                self.dbr = self.pop_byte();
                self.set_zn_8(self.dbr);
                self.cycles += 4;
            }
            0x4B => {
                // PHK
                self.push_byte(self.pbr);
                self.cycles += 3;
            }
            0x0B => {
                // PHD
                self.push_word(self.d);
                self.cycles += 4;
            }
            0x2B => {
                // PLD
                self.d = self.pop_word();
                self.set_zn_16(self.d);
                self.cycles += 5;
            }
            0xD4 => {
                // PEI - push word read from direct page
                let addr = self.addr_dp();
                let v = self.read_word(addr);
                self.push_word(v);
                self.cycles += 6;
            }
            0xF4 => {
                // PEA - push immediate word
                let v = self.fetch_word();
                self.push_word(v);
                self.cycles += 5;
            }
            0x62 => {
                // PER - push PC plus signed 16-bit displacement
                let offset = self.fetch_word();
                let v = self.pc.wrapping_add(offset);
                self.push_word(v);
                self.cycles += 6;
            }

            // Transfers
            0xAA => {
                // TAX
                self.set_x(self.c);
                self.set_nz_xy(self.get_x());
                self.cycles += 2;
            }
            0xA8 => {
                // TAY
                self.set_y(self.c);
                self.set_nz_xy(self.get_y());
                self.cycles += 2;
            }
            0x8A => {
                // TXA
                self.set_a(self.x);
                self.set_nz_a(self.get_a());
                self.cycles += 2;
            }
            0x98 => {
                // TYA
                self.set_a(self.y);
                self.set_nz_a(self.get_a());
                self.cycles += 2;
            }
            0xBA => {
                // TSX
                self.set_x(self.s);
                self.set_nz_xy(self.get_x());
                self.cycles += 2;
            }
            0x9A => {
                // TXS - no flags
                if self.emulation {
                    self.s = 0x0100 | (self.x & 0xFF);
                } else {
                    self.s = self.x;
                }
                self.cycles += 2;
            }
            0x5B => {
                // TCD - full 16 bits regardless of M
                self.d = self.c;
                self.set_zn_16(self.d);
                self.cycles += 2;
            }
            0x7B => {
                // TDC
                self.c = self.d;
                self.set_zn_16(self.c);
                self.cycles += 2;
            }
            0x1B => {
                // TCS - no flags; emulation pins the high byte
                if self.emulation {
                    self.s = 0x0100 | (self.c & 0xFF);
                } else {
                    self.s = self.c;
                }
                self.cycles += 2;
            }
            0x3B => {
                // TSC
                self.c = self.s;
                self.set_zn_16(self.c);
                self.cycles += 2;
            }
            0x9B => {
                // TXY
                self.set_y(self.x);
                self.set_nz_xy(self.get_y());
                self.cycles += 2;
            }
            0xBB => {
                // TYX
                self.set_x(self.y);
                self.set_nz_xy(self.get_x());
                self.cycles += 2;
            }
            0xEB => {
                // XBA - exchange B and A; N/Z always from the new low byte
                let low = (self.c & 0xFF) as u8;
                let high = (self.c >> 8) as u8;
                self.c = ((low as u16) << 8) | high as u16;
                self.set_zn_8(high);
                self.cycles += 3;
            }

            // Flag control
            0x18 => {
                self.status &= !FLAG_CARRY;
                self.cycles += 2;
            }
            0x38 => {
                self.status |= FLAG_CARRY;
                self.cycles += 2;
            }
            0x58 => {
                self.status &= !FLAG_IRQ_DISABLE;
                self.cycles += 2;
            }
            0x78 => {
                self.status |= FLAG_IRQ_DISABLE;
                self.cycles += 2;
            }
            0xD8 => {
                self.status &= !FLAG_DECIMAL;
                self.cycles += 2;
            }
            0xF8 => {
                self.status |= FLAG_DECIMAL;
                self.cycles += 2;
            }
            0xB8 => {
                self.status &= !FLAG_OVERFLOW;
                self.cycles += 2;
            }
            0xC2 => {
                // REP - clear the given status bits (M/X re-forced in emulation)
                let mask = self.fetch_byte();
                self.status &= !mask;
                self.apply_mode_constraints();
                self.cycles += 3;
            }
            0xE2 => {
                // SEP - set the given status bits
                let mask = self.fetch_byte();
                self.status |= mask;
                self.apply_mode_constraints();
                self.cycles += 3;
            }
            0xFB => {
                // XCE - exchange carry and emulation flags
                let old_carry = self.status & FLAG_CARRY != 0;
                if self.emulation {
                    self.status |= FLAG_CARRY;
                } else {
                    self.status &= !FLAG_CARRY;
                }
                self.emulation = old_carry;
                self.apply_mode_constraints();
                self.cycles += 2;
            }

            // Block moves. One byte per execution; PC rewinds so the
            // instruction repeats until A underflows from 0 to $FFFF.
            0x44 => {
                // MVP - Block Move Previous (decrementing)
                let dst_bank = self.fetch_byte();
                let src_bank = self.fetch_byte();
                let src = ((src_bank as u32) << 16) | self.x as u32;
                let dst = ((dst_bank as u32) << 16) | self.y as u32;
                let v = self.read(src);
                self.write(dst, v);
                self.c = self.c.wrapping_sub(1);
                self.x = self.x.wrapping_sub(1);
                self.y = self.y.wrapping_sub(1);
                if self.is_8bit_xy() {
                    self.x &= 0xFF;
                    self.y &= 0xFF;
                }
                self.dbr = dst_bank;
                if self.c != 0xFFFF {
                    self.pc = self.pc.wrapping_sub(3);
                }
                self.cycles += 7;
            }
            0x54 => {
                // MVN - Block Move Next (incrementing)
                let dst_bank = self.fetch_byte();
                let src_bank = self.fetch_byte();
                let src = ((src_bank as u32) << 16) | self.x as u32;
                let dst = ((dst_bank as u32) << 16) | self.y as u32;
                let v = self.read(src);
                self.write(dst, v);
                self.c = self.c.wrapping_sub(1);
                self.x = self.x.wrapping_add(1);
                self.y = self.y.wrapping_add(1);
                if self.is_8bit_xy() {
                    self.x &= 0xFF;
                    self.y &= 0xFF;
                }
                self.dbr = dst_bank;
                if self.c != 0xFFFF {
                    self.pc = self.pc.wrapping_sub(3);
                }
                self.cycles += 7;
            }

            // Misc
            0xEA => {
                // NOP
                self.cycles += 2;
            }
            0x42 => {
                // WDM - reserved; acts as a 2-byte NOP
                self.fetch_byte();
                self.cycles += 2;
            }
            0xCB => {
                // WAI - recognised; consumes cycles without halting
                self.cycles += 3;
            }
            0xDB => {
                // STP - recognised; consumes cycles without halting
                self.cycles += 3;
            }

            #[allow(unreachable_patterns)]
            _ => {
                // Unknown opcode: log with context and continue as a 2-cycle NOP.
                let pc = self.pc.wrapping_sub(1);
                let pbr = self.pbr;
                log(LogCategory::CPU, LogLevel::Warn, || {
                    let base = ((pbr as u32) << 16) | pc as u32;
                    let context: Vec<String> = (0..4u32)
                        .map(|i| format!("{:02X}", self.memory.read(base.wrapping_add(i))))
                        .collect();
                    format!(
                        "unknown opcode {:02X} at {:02X}:{:04X} [{}]",
                        opcode,
                        pbr,
                        pc,
                        context.join(" ")
                    )
                });
                self.cycles += 2;
            }
        }

        (self.cycles - start_cycles) as u32
    }

    // --- Addressing-mode calculators ------------------------------------

    /// Direct page: D + offset, bank 0, 16-bit wrap
    fn addr_dp(&mut self) -> u32 {
        let offset = self.fetch_byte() as u16;
        self.d.wrapping_add(offset) as u32
    }

    /// Direct page indexed with X
    fn addr_dp_x(&mut self) -> u32 {
        let offset = self.fetch_byte() as u16;
        self.d.wrapping_add(offset).wrapping_add(self.x) as u32
    }

    /// Direct page indexed with Y
    fn addr_dp_y(&mut self) -> u32 {
        let offset = self.fetch_byte() as u16;
        self.d.wrapping_add(offset).wrapping_add(self.y) as u32
    }

    /// Absolute: DBR:operand
    fn addr_abs(&mut self) -> u32 {
        ((self.dbr as u32) << 16) | self.fetch_word() as u32
    }

    /// Absolute indexed with X; the 16-bit offset wraps within the bank
    fn addr_abs_x(&mut self) -> u32 {
        let base = self.fetch_word().wrapping_add(self.x);
        ((self.dbr as u32) << 16) | base as u32
    }

    /// Absolute indexed with Y
    fn addr_abs_y(&mut self) -> u32 {
        let base = self.fetch_word().wrapping_add(self.y);
        ((self.dbr as u32) << 16) | base as u32
    }

    /// Absolute long: 24-bit operand
    fn addr_abs_long(&mut self) -> u32 {
        self.fetch_long()
    }

    /// Absolute long indexed with X
    fn addr_abs_long_x(&mut self) -> u32 {
        self.fetch_long().wrapping_add(self.x as u32) & 0xFF_FFFF
    }

    /// (dp): 16-bit pointer at D+offset, data bank
    fn addr_dp_ind(&mut self) -> u32 {
        let ptr = self.addr_dp();
        ((self.dbr as u32) << 16) | self.read_word(ptr) as u32
    }

    /// [dp]: 24-bit pointer at D+offset
    fn addr_dp_ind_long(&mut self) -> u32 {
        let ptr = self.addr_dp();
        self.read_long(ptr)
    }

    /// (dp,X): pointer at D+offset+X, data bank
    fn addr_dp_x_ind(&mut self) -> u32 {
        let ptr = self.addr_dp_x();
        ((self.dbr as u32) << 16) | self.read_word(ptr) as u32
    }

    /// (dp),Y: pointer at D+offset, indexed with Y within the data bank
    fn addr_dp_ind_y(&mut self) -> u32 {
        let ptr = self.addr_dp();
        let base = self.read_word(ptr).wrapping_add(self.y);
        ((self.dbr as u32) << 16) | base as u32
    }

    /// [dp],Y: 24-bit pointer at D+offset plus Y
    fn addr_dp_ind_long_y(&mut self) -> u32 {
        let ptr = self.addr_dp();
        self.read_long(ptr).wrapping_add(self.y as u32) & 0xFF_FFFF
    }

    /// sr,S: S + offset, bank 0
    fn addr_sr(&mut self) -> u32 {
        let offset = self.fetch_byte() as u16;
        self.s.wrapping_add(offset) as u32
    }

    /// (sr,S),Y: pointer at S+offset, indexed with Y within the data bank
    fn addr_sr_y(&mut self) -> u32 {
        let offset = self.fetch_byte() as u16;
        let ptr = self.s.wrapping_add(offset) as u32;
        let base = self.read_word(ptr).wrapping_add(self.y);
        ((self.dbr as u32) << 16) | base as u32
    }

    // --- Operand access --------------------------------------------------

    /// Read an operand at the accumulator width
    fn operand_a(&self, addr: u32) -> u16 {
        if self.is_8bit_a() {
            self.read(addr) as u16
        } else {
            self.read_word(addr)
        }
    }

    /// Read an operand at the index width
    fn operand_xy(&self, addr: u32) -> u16 {
        if self.is_8bit_xy() {
            self.read(addr) as u16
        } else {
            self.read_word(addr)
        }
    }

    /// Fetch an immediate operand at the accumulator width
    fn fetch_operand_a(&mut self) -> u16 {
        if self.is_8bit_a() {
            self.fetch_byte() as u16
        } else {
            self.fetch_word()
        }
    }

    /// Fetch an immediate operand at the index width
    fn fetch_operand_xy(&mut self) -> u16 {
        if self.is_8bit_xy() {
            self.fetch_byte() as u16
        } else {
            self.fetch_word()
        }
    }

    /// Write a result at the accumulator width
    fn write_operand_a(&mut self, addr: u32, val: u16) {
        if self.is_8bit_a() {
            self.write(addr, (val & 0xFF) as u8);
        } else {
            self.write_word(addr, val);
        }
    }

    // --- Operation bodies ------------------------------------------------

    fn ora(&mut self, val: u16) {
        let r = self.get_a() | val;
        self.set_a(r);
        self.set_nz_a(self.get_a());
    }

    fn and(&mut self, val: u16) {
        let r = self.get_a() & val;
        self.set_a(r);
        self.set_nz_a(self.get_a());
    }

    fn eor(&mut self, val: u16) {
        let r = self.get_a() ^ val;
        self.set_a(r);
        self.set_nz_a(self.get_a());
    }

    fn lda(&mut self, val: u16) {
        self.set_a(val);
        self.set_nz_a(self.get_a());
    }

    fn ldx(&mut self, val: u16) {
        self.set_x(val);
        self.set_nz_xy(self.get_x());
    }

    fn ldy(&mut self, val: u16) {
        self.set_y(val);
        self.set_nz_xy(self.get_y());
    }

    fn sta(&mut self, addr: u32) {
        if self.is_8bit_a() {
            self.write(addr, (self.c & 0xFF) as u8);
        } else {
            self.write_word(addr, self.c);
        }
    }

    fn stx(&mut self, addr: u32) {
        if self.is_8bit_xy() {
            self.write(addr, (self.x & 0xFF) as u8);
        } else {
            self.write_word(addr, self.x);
        }
    }

    fn sty(&mut self, addr: u32) {
        if self.is_8bit_xy() {
            self.write(addr, (self.y & 0xFF) as u8);
        } else {
            self.write_word(addr, self.y);
        }
    }

    fn stz(&mut self, addr: u32) {
        if self.is_8bit_a() {
            self.write(addr, 0);
        } else {
            self.write_word(addr, 0);
        }
    }

    /// ADC at the current accumulator width. The decimal flag is accepted
    /// but BCD arithmetic is not performed; addition is always binary.
    fn adc(&mut self, val: u16) {
        if self.is_8bit_a() {
            self.adc_8(val as u8);
        } else {
            self.adc_16(val);
        }
    }

    fn adc_8(&mut self, val: u8) {
        let a = (self.c & 0xFF) as u8;
        let carry = (self.status & FLAG_CARRY) as u16;
        let sum = a as u16 + val as u16 + carry;
        let result = sum as u8;

        self.set_flag(FLAG_CARRY, sum > 0xFF);
        // Overflow: operands agree in sign, result does not
        self.set_flag(FLAG_OVERFLOW, (!(a ^ val) & (a ^ result)) & 0x80 != 0);
        self.c = (self.c & 0xFF00) | result as u16;
        self.set_zn_8(result);
    }

    fn adc_16(&mut self, val: u16) {
        let a = self.c;
        let carry = (self.status & FLAG_CARRY) as u32;
        let sum = a as u32 + val as u32 + carry;
        let result = sum as u16;

        self.set_flag(FLAG_CARRY, sum > 0xFFFF);
        self.set_flag(FLAG_OVERFLOW, (!(a ^ val) & (a ^ result)) & 0x8000 != 0);
        self.c = result;
        self.set_zn_16(result);
    }

    /// SBC: binary subtraction is ADC of the operand's complement
    fn sbc(&mut self, val: u16) {
        if self.is_8bit_a() {
            self.adc_8(!(val as u8));
        } else {
            self.adc_16(!val);
        }
    }

    /// Compare without store: C = reg >= val (unsigned), N/Z from reg - val
    fn compare(&mut self, reg: u16, val: u16, eight_bit: bool) {
        if eight_bit {
            let r = (reg & 0xFF) as u8;
            let v = (val & 0xFF) as u8;
            self.set_flag(FLAG_CARRY, r >= v);
            self.set_zn_8(r.wrapping_sub(v));
        } else {
            self.set_flag(FLAG_CARRY, reg >= val);
            self.set_zn_16(reg.wrapping_sub(val));
        }
    }

    fn bit_memory(&mut self, val: u16) {
        let a = self.get_a();
        if self.is_8bit_a() {
            self.set_flag(FLAG_ZERO, a & val & 0xFF == 0);
            self.set_flag(FLAG_NEGATIVE, val & 0x80 != 0);
            self.set_flag(FLAG_OVERFLOW, val & 0x40 != 0);
        } else {
            self.set_flag(FLAG_ZERO, a & val == 0);
            self.set_flag(FLAG_NEGATIVE, val & 0x8000 != 0);
            self.set_flag(FLAG_OVERFLOW, val & 0x4000 != 0);
        }
    }

    fn bit_immediate(&mut self, val: u16) {
        let a = self.get_a();
        self.set_flag(FLAG_ZERO, a & val == 0);
    }

    fn inc_value(&mut self, val: u16) -> u16 {
        if self.is_8bit_a() {
            let r = (val as u8).wrapping_add(1);
            self.set_zn_8(r);
            r as u16
        } else {
            let r = val.wrapping_add(1);
            self.set_zn_16(r);
            r
        }
    }

    fn dec_value(&mut self, val: u16) -> u16 {
        if self.is_8bit_a() {
            let r = (val as u8).wrapping_sub(1);
            self.set_zn_8(r);
            r as u16
        } else {
            let r = val.wrapping_sub(1);
            self.set_zn_16(r);
            r
        }
    }

    fn asl_value(&mut self, val: u16) -> u16 {
        if self.is_8bit_a() {
            let v = val as u8;
            self.set_flag(FLAG_CARRY, v & 0x80 != 0);
            let r = v << 1;
            self.set_zn_8(r);
            r as u16
        } else {
            self.set_flag(FLAG_CARRY, val & 0x8000 != 0);
            let r = val << 1;
            self.set_zn_16(r);
            r
        }
    }

    fn lsr_value(&mut self, val: u16) -> u16 {
        if self.is_8bit_a() {
            let v = val as u8;
            self.set_flag(FLAG_CARRY, v & 0x01 != 0);
            let r = v >> 1;
            self.set_zn_8(r);
            r as u16
        } else {
            self.set_flag(FLAG_CARRY, val & 0x0001 != 0);
            let r = val >> 1;
            self.set_zn_16(r);
            r
        }
    }

    fn rol_value(&mut self, val: u16) -> u16 {
        let carry_in = (self.status & FLAG_CARRY) as u16;
        if self.is_8bit_a() {
            let v = val as u8;
            self.set_flag(FLAG_CARRY, v & 0x80 != 0);
            let r = (v << 1) | carry_in as u8;
            self.set_zn_8(r);
            r as u16
        } else {
            self.set_flag(FLAG_CARRY, val & 0x8000 != 0);
            let r = (val << 1) | carry_in;
            self.set_zn_16(r);
            r
        }
    }

    fn ror_value(&mut self, val: u16) -> u16 {
        let carry_in = (self.status & FLAG_CARRY) as u16;
        if self.is_8bit_a() {
            let v = val as u8;
            self.set_flag(FLAG_CARRY, v & 0x01 != 0);
            let r = (v >> 1) | ((carry_in as u8) << 7);
            self.set_zn_8(r);
            r as u16
        } else {
            self.set_flag(FLAG_CARRY, val & 0x0001 != 0);
            let r = (val >> 1) | (carry_in << 15);
            self.set_zn_16(r);
            r
        }
    }

    fn tsb(&mut self, addr: u32) {
        if self.is_8bit_a() {
            let v = self.read(addr);
            let a = (self.c & 0xFF) as u8;
            self.set_flag(FLAG_ZERO, v & a == 0);
            self.write(addr, v | a);
        } else {
            let v = self.read_word(addr);
            self.set_flag(FLAG_ZERO, v & self.c == 0);
            self.write_word(addr, v | self.c);
        }
    }

    fn trb(&mut self, addr: u32) {
        if self.is_8bit_a() {
            let v = self.read(addr);
            let a = (self.c & 0xFF) as u8;
            self.set_flag(FLAG_ZERO, v & a == 0);
            self.write(addr, v & !a);
        } else {
            let v = self.read_word(addr);
            self.set_flag(FLAG_ZERO, v & self.c == 0);
            self.write_word(addr, v & !self.c);
        }
    }

    /// Execute a branch instruction. A taken branch costs an extra cycle,
    /// and one more when the target lies in a different page than the
    /// operand byte.
    fn branch(&mut self, condition: bool) {
        let origin = self.pc;
        let offset = self.fetch_byte() as i8;
        if condition {
            let target = self.pc.wrapping_add(offset as u16);
            self.cycles += 3;
            if target & 0xFF00 != origin & 0xFF00 {
                self.cycles += 1;
            }
            self.pc = target;
        } else {
            self.cycles += 2;
        }
    }

    // --- Fetch and memory helpers ----------------------------------------

    /// Fetch a byte from memory at current PC and advance PC (16-bit wrap)
    fn fetch_byte(&mut self) -> u8 {
        let addr = self.get_pc_address();
        let byte = self.memory.read(addr);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    /// Fetch a 16-bit word, little-endian
    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte() as u16;
        let hi = self.fetch_byte() as u16;
        (hi << 8) | lo
    }

    /// Fetch a 24-bit address, little-endian
    fn fetch_long(&mut self) -> u32 {
        let lo = self.fetch_byte() as u32;
        let mid = self.fetch_byte() as u32;
        let hi = self.fetch_byte() as u32;
        (hi << 16) | (mid << 8) | lo
    }

    /// Get the current 24-bit PC address (PBR:PC)
    fn get_pc_address(&self) -> u32 {
        ((self.pbr as u32) << 16) | self.pc as u32
    }

    #[inline]
    fn read(&self, addr: u32) -> u8 {
        self.memory.read(addr)
    }

    #[inline]
    fn write(&mut self, addr: u32, val: u8) {
        self.memory.write(addr, val);
    }

    /// Read a 16-bit word; the high byte comes from addr+1 by plain
    /// arithmetic (no bank-wrap fix-up)
    fn read_word(&self, addr: u32) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Read a 24-bit value, three sequential reads
    fn read_long(&self, addr: u32) -> u32 {
        let lo = self.read(addr) as u32;
        let mid = self.read(addr.wrapping_add(1)) as u32;
        let hi = self.read(addr.wrapping_add(2)) as u32;
        (hi << 16) | (mid << 8) | lo
    }

    fn write_word(&mut self, addr: u32, val: u16) {
        self.write(addr, (val & 0xFF) as u8);
        self.write(addr.wrapping_add(1), (val >> 8) as u8);
    }

    // --- Width and flag helpers -------------------------------------------

    /// Check if accumulator is in 8-bit mode
    pub fn is_8bit_a(&self) -> bool {
        self.emulation || self.status & FLAG_MEMORY != 0
    }

    /// Check if index registers are in 8-bit mode
    pub fn is_8bit_xy(&self) -> bool {
        self.emulation || self.status & FLAG_INDEX != 0
    }

    /// Get accumulator value (8 or 16 bit depending on mode)
    pub fn get_a(&self) -> u16 {
        if self.is_8bit_a() {
            self.c & 0xFF
        } else {
            self.c
        }
    }

    /// Set accumulator value; 8-bit mode preserves B (the high byte)
    pub fn set_a(&mut self, val: u16) {
        if self.is_8bit_a() {
            self.c = (self.c & 0xFF00) | (val & 0xFF);
        } else {
            self.c = val;
        }
    }

    /// Get X register value
    pub fn get_x(&self) -> u16 {
        if self.is_8bit_xy() {
            self.x & 0xFF
        } else {
            self.x
        }
    }

    /// Set X register value; 8-bit mode zeroes the high byte
    pub fn set_x(&mut self, val: u16) {
        if self.is_8bit_xy() {
            self.x = val & 0xFF;
        } else {
            self.x = val;
        }
    }

    /// Get Y register value
    pub fn get_y(&self) -> u16 {
        if self.is_8bit_xy() {
            self.y & 0xFF
        } else {
            self.y
        }
    }

    /// Set Y register value; 8-bit mode zeroes the high byte
    pub fn set_y(&mut self, val: u16) {
        if self.is_8bit_xy() {
            self.y = val & 0xFF;
        } else {
            self.y = val;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        self.status & flag != 0
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    /// Set zero and negative flags for 8-bit value
    fn set_zn_8(&mut self, val: u8) {
        self.set_flag(FLAG_ZERO, val == 0);
        self.set_flag(FLAG_NEGATIVE, val & 0x80 != 0);
    }

    /// Set zero and negative flags for 16-bit value
    fn set_zn_16(&mut self, val: u16) {
        self.set_flag(FLAG_ZERO, val == 0);
        self.set_flag(FLAG_NEGATIVE, val & 0x8000 != 0);
    }

    /// Set N/Z at the accumulator width
    fn set_nz_a(&mut self, val: u16) {
        if self.is_8bit_a() {
            self.set_zn_8(val as u8);
        } else {
            self.set_zn_16(val);
        }
    }

    /// Set N/Z at the index width
    fn set_nz_xy(&mut self, val: u16) {
        if self.is_8bit_xy() {
            self.set_zn_8(val as u8);
        } else {
            self.set_zn_16(val);
        }
    }

    /// Charge cycles for an accumulator-width operation (one more in 16-bit)
    fn charge_a(&mut self, base: u64) {
        self.cycles += base + if self.is_8bit_a() { 0 } else { 1 };
    }

    /// Charge cycles for an index-width operation
    fn charge_xy(&mut self, base: u64) {
        self.cycles += base + if self.is_8bit_xy() { 0 } else { 1 };
    }

    /// Re-apply the emulation-mode invariants after any mutation that can
    /// affect them: M=X=1 and S pinned to page 1 in emulation; X/Y high
    /// bytes cleared whenever the index registers are 8-bit.
    fn apply_mode_constraints(&mut self) {
        if self.emulation {
            self.status |= FLAG_MEMORY | FLAG_INDEX;
            self.s = 0x0100 | (self.s & 0xFF);
        }
        if self.is_8bit_xy() {
            self.x &= 0xFF;
            self.y &= 0xFF;
        }
    }

    // --- Stack ------------------------------------------------------------

    /// Push a byte: write at S, then decrement (page-1 wrap in emulation)
    fn push_byte(&mut self, val: u8) {
        let addr = self.s as u32;
        self.write(addr, val);
        if self.emulation {
            self.s = 0x0100 | (self.s.wrapping_sub(1) & 0xFF);
        } else {
            self.s = self.s.wrapping_sub(1);
        }
    }

    /// Pop a byte: increment first, then read
    fn pop_byte(&mut self) -> u8 {
        if self.emulation {
            self.s = 0x0100 | (self.s.wrapping_add(1) & 0xFF);
        } else {
            self.s = self.s.wrapping_add(1);
        }
        self.read(self.s as u32)
    }

    /// Push a word, high byte first
    fn push_word(&mut self, val: u16) {
        self.push_byte((val >> 8) as u8);
        self.push_byte((val & 0xFF) as u8);
    }

    /// Pop a word, low byte first
    fn pop_word(&mut self) -> u16 {
        let lo = self.pop_byte() as u16;
        let hi = self.pop_byte() as u16;
        (hi << 8) | lo
    }
}

impl<M: Memory65c816> crate::Cpu for Cpu65c816<M> {
    fn reset(&mut self) {
        Cpu65c816::reset(self);
    }

    fn step(&mut self) -> u32 {
        Cpu65c816::step(self)
    }
}

/// Simple array-backed memory for testing
pub struct ArrayMemory {
    data: Vec<u8>,
}

impl ArrayMemory {
    pub fn new() -> Self {
        Self {
            data: vec![0; 16 * 1024 * 1024], // full 24-bit address space
        }
    }

    /// Copy a program image into memory at the given bank-0 offset
    pub fn load_program(&mut self, offset: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.data[(offset as usize + i) & 0xFF_FFFF] = b;
        }
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory65c816 for ArrayMemory {
    fn read(&self, addr: u32) -> u8 {
        self.data[addr as usize & 0xFF_FFFF]
    }

    fn write(&mut self, addr: u32, val: u8) {
        self.data[addr as usize & 0xFF_FFFF] = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_with_program(bytes: &[u8]) -> Cpu65c816<ArrayMemory> {
        let mut mem = ArrayMemory::new();
        mem.load_program(0x8000, bytes);
        mem.write(VECTOR_RESET, 0x00);
        mem.write(VECTOR_RESET + 1, 0x80);
        let mut cpu = Cpu65c816::new(mem);
        cpu.reset();
        cpu
    }

    #[test]
    fn test_cpu_creation() {
        let cpu = Cpu65c816::new(ArrayMemory::new());
        assert_eq!(cpu.c, 0);
        assert_eq!(cpu.x, 0);
        assert_eq!(cpu.y, 0);
        assert_eq!(cpu.s, 0x01FF);
        assert_eq!(cpu.status, 0x34);
        assert!(cpu.emulation);
    }

    #[test]
    fn test_reset_vector_boot() {
        let cpu = cpu_with_program(&[0xEA]);
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.pbr, 0);
        assert_eq!(cpu.s, 0x01FF);
        assert_eq!(cpu.status, 0x34);
        assert!(cpu.emulation);
    }

    #[test]
    fn test_nop() {
        let mut cpu = cpu_with_program(&[0xEA]);
        let cycles = cpu.step();
        assert_eq!(cycles, 2);
        assert_eq!(cpu.pc, 0x8001);
    }

    #[test]
    fn test_lda_immediate_8bit_flags() {
        let mut cpu = cpu_with_program(&[0xA9, 0x42, 0xA9, 0x00, 0xA9, 0x80]);

        cpu.step();
        assert_eq!(cpu.get_a(), 0x42);
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_NEGATIVE));

        cpu.step();
        assert!(cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_NEGATIVE));

        cpu.step();
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn test_width_switch_to_16bit_lda() {
        // CLC; XCE; REP #$20; LDA #$1234
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0x34, 0x12]);

        cpu.step(); // CLC
        cpu.step(); // XCE
        assert!(!cpu.emulation);
        assert!(cpu.get_flag(FLAG_CARRY), "carry takes the old E");

        cpu.step(); // REP #$20
        assert!(!cpu.get_flag(FLAG_MEMORY));

        cpu.step(); // LDA #$1234
        assert_eq!(cpu.c, 0x1234);
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_NEGATIVE));
        assert_eq!(cpu.pc, 0x8007);
    }

    #[test]
    fn test_xce_twice_round_trips() {
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xFB]);
        cpu.step(); // CLC
        cpu.step(); // XCE -> native, C=1
        assert!(!cpu.emulation);
        cpu.step(); // XCE -> back to emulation, C=0
        assert!(cpu.emulation);
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_MEMORY));
        assert!(cpu.get_flag(FLAG_INDEX));
        assert_eq!(cpu.s & 0xFF00, 0x0100);
    }

    #[test]
    fn test_rep_in_emulation_keeps_m_and_x() {
        let mut cpu = cpu_with_program(&[0xC2, 0xFF]);
        cpu.step();
        assert!(cpu.get_flag(FLAG_MEMORY));
        assert!(cpu.get_flag(FLAG_INDEX));
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_rep_in_native_clears_all() {
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xC2, 0xFF]);
        cpu.step(); // CLC
        cpu.step(); // XCE
        cpu.step(); // REP #$FF
        assert_eq!(cpu.status, 0);
    }

    #[test]
    fn test_pea_pla_roundtrip() {
        // Native mode, S=$1FFF: PEA #$ABCD then PLA twice (M=1)
        let mut cpu = cpu_with_program(&[0xF4, 0xCD, 0xAB, 0x68, 0x68]);
        cpu.emulation = false;
        cpu.s = 0x1FFF;

        cpu.step(); // PEA
        assert_eq!(cpu.s, 0x1FFD);

        cpu.step(); // PLA -> low byte
        assert_eq!(cpu.get_a(), 0xCD);
        cpu.step(); // PLA -> high byte
        assert_eq!(cpu.get_a(), 0xAB);
        assert_eq!(cpu.s, 0x1FFF);
    }

    #[test]
    fn test_stack_word_order_little_endian() {
        let mut cpu = cpu_with_program(&[0xF4, 0xCD, 0xAB]); // PEA #$ABCD
        cpu.emulation = false;
        cpu.s = 0x1FFF;
        cpu.step();
        // High byte pushed first: it lands at the higher address
        assert_eq!(cpu.memory.read(0x1FFF), 0xAB);
        assert_eq!(cpu.memory.read(0x1FFE), 0xCD);
    }

    #[test]
    fn test_branch_taken_and_page_cross_cycles() {
        // In-page taken branch: 3 cycles
        let mut cpu = cpu_with_program(&[]);
        cpu.memory.load_program(0x8010, &[0x90, 0x04]); // BCC +4
        cpu.pc = 0x8010;
        cpu.status &= !FLAG_CARRY;
        let cycles = cpu.step();
        assert_eq!(cpu.pc, 0x8016);
        assert_eq!(cycles, 3);

        // Branch across a page boundary: one extra cycle
        let mut cpu = cpu_with_program(&[]);
        cpu.memory.load_program(0x80FE, &[0x90, 0x04]); // BCC +4
        cpu.pc = 0x80FE;
        cpu.status &= !FLAG_CARRY;
        let cycles = cpu.step();
        assert_eq!(cpu.pc, 0x8104);
        assert_eq!(cycles, 4);
    }

    #[test]
    fn test_branch_not_taken() {
        let mut cpu = cpu_with_program(&[0x90, 0x04]); // BCC +4
        cpu.status |= FLAG_CARRY;
        let cycles = cpu.step();
        assert_eq!(cpu.pc, 0x8002);
        assert_eq!(cycles, 2);
    }

    #[test]
    fn test_adc_overflow_and_carry() {
        // ADC $7F + $01 (M=1, C=0) -> V=1, N=1
        let mut cpu = cpu_with_program(&[0xA9, 0x7F, 0x69, 0x01]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.get_a(), 0x80);
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(!cpu.get_flag(FLAG_CARRY));

        // ADC $FF + $01 -> C=1, Z=1
        let mut cpu = cpu_with_program(&[0xA9, 0xFF, 0x69, 0x01]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.get_a(), 0x00);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_sbc_8bit() {
        // SEC; LDA #$50; SBC #$10
        let mut cpu = cpu_with_program(&[0x38, 0xA9, 0x50, 0xE9, 0x10]);
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.get_a(), 0x40);
        assert!(cpu.get_flag(FLAG_CARRY), "no borrow");
    }

    #[test]
    fn test_decimal_flag_is_stored_but_arithmetic_stays_binary() {
        // SED; LDA #$09; CLC; ADC #$01 -> binary $0A, not BCD $10
        let mut cpu = cpu_with_program(&[0xF8, 0xA9, 0x09, 0x18, 0x69, 0x01]);
        for _ in 0..4 {
            cpu.step();
        }
        assert!(cpu.get_flag(FLAG_DECIMAL));
        assert_eq!(cpu.get_a(), 0x0A);
    }

    #[test]
    fn test_cmp_sets_carry_and_zero() {
        let mut cpu = cpu_with_program(&[0xA9, 0x40, 0xC9, 0x40, 0xC9, 0x50]);
        cpu.step();
        cpu.step(); // CMP #$40
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_ZERO));
        cpu.step(); // CMP #$50
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_sta_lda_absolute() {
        let mut cpu = cpu_with_program(&[0xA9, 0x42, 0x8D, 0x00, 0x20, 0xA9, 0x00, 0xAD, 0x00, 0x20]);
        cpu.step();
        cpu.step(); // STA $2000
        assert_eq!(cpu.memory.read(0x002000), 0x42);
        cpu.step(); // LDA #$00
        cpu.step(); // LDA $2000
        assert_eq!(cpu.get_a(), 0x42);
    }

    #[test]
    fn test_lda_preserves_b_accumulator_in_8bit_mode() {
        let mut cpu = cpu_with_program(&[0xA9, 0x12]);
        cpu.c = 0xAB00;
        cpu.step();
        assert_eq!(cpu.c, 0xAB12);
    }

    #[test]
    fn test_ldx_zeroes_high_byte_in_8bit_mode() {
        let mut cpu = cpu_with_program(&[0xA2, 0x12]);
        cpu.x = 0xAB00;
        cpu.step();
        assert_eq!(cpu.x, 0x0012);
        assert_eq!(cpu.y & 0xFF00, 0);
    }

    #[test]
    fn test_direct_page_indexing() {
        // D=$0100, LDA $20,X with X=5 reads $0125 in bank 0
        let mut cpu = cpu_with_program(&[0xB5, 0x20]);
        cpu.d = 0x0100;
        cpu.x = 0x05;
        cpu.memory.write(0x000125, 0x77);
        cpu.step();
        assert_eq!(cpu.get_a(), 0x77);
    }

    #[test]
    fn test_absolute_indexed_wraps_within_bank() {
        // DBR=$7E, LDA $FFFF,X with X=2 wraps to $7E:0001
        let mut cpu = cpu_with_program(&[0xBD, 0xFF, 0xFF]);
        cpu.dbr = 0x7E;
        cpu.x = 0x02;
        cpu.memory.write(0x7E0001, 0x99);
        cpu.step();
        assert_eq!(cpu.get_a(), 0x99);
    }

    #[test]
    fn test_indirect_dp_y() {
        // (dp),Y: pointer at D+$10 -> $4000, Y=3 -> DBR:$4003
        let mut cpu = cpu_with_program(&[0xB1, 0x10]);
        cpu.memory.write(0x000010, 0x00);
        cpu.memory.write(0x000011, 0x40);
        cpu.y = 0x03;
        cpu.memory.write(0x004003, 0x5A);
        cpu.step();
        assert_eq!(cpu.get_a(), 0x5A);
    }

    #[test]
    fn test_indirect_long_dp() {
        // [dp]: 24-bit pointer at D+$10 -> $7E2000
        let mut cpu = cpu_with_program(&[0xA7, 0x10]);
        cpu.memory.write(0x000010, 0x00);
        cpu.memory.write(0x000011, 0x20);
        cpu.memory.write(0x000012, 0x7E);
        cpu.memory.write(0x7E2000, 0x33);
        cpu.step();
        assert_eq!(cpu.get_a(), 0x33);
    }

    #[test]
    fn test_stack_relative() {
        // ORA sr,S: S=$1F00, offset 4 -> bank 0 $1F04
        let mut cpu = cpu_with_program(&[0x03, 0x04]);
        cpu.emulation = false;
        cpu.s = 0x1F00;
        cpu.memory.write(0x001F04, 0x0F);
        cpu.step();
        assert_eq!(cpu.get_a(), 0x0F);
    }

    #[test]
    fn test_jsr_rts_with_intermediate_pushes() {
        // JSR $8010; at $8010: PHA, PLA, RTS
        let mut cpu = cpu_with_program(&[0x20, 0x10, 0x80]);
        cpu.memory.load_program(0x8010, &[0x48, 0x68, 0x60]);
        cpu.step(); // JSR
        assert_eq!(cpu.pc, 0x8010);
        cpu.step(); // PHA
        cpu.step(); // PLA
        cpu.step(); // RTS
        assert_eq!(cpu.pc, 0x8003);
        assert_eq!(cpu.s, 0x01FF);
    }

    #[test]
    fn test_jsl_rtl() {
        let mut cpu = cpu_with_program(&[0x22, 0x00, 0x90, 0x02]); // JSL $02:9000
        cpu.emulation = false;
        cpu.s = 0x1FFF;
        cpu.memory.load_program(0x029000, &[0x6B]); // RTL
        cpu.step();
        assert_eq!(cpu.pbr, 0x02);
        assert_eq!(cpu.pc, 0x9000);
        cpu.step();
        assert_eq!(cpu.pbr, 0x00);
        assert_eq!(cpu.pc, 0x8004);
        assert_eq!(cpu.s, 0x1FFF);
    }

    #[test]
    fn test_jmp_indirect() {
        let mut cpu = cpu_with_program(&[0x6C, 0x00, 0x30]); // JMP ($3000)
        cpu.memory.write(0x003000, 0x34);
        cpu.memory.write(0x003001, 0x12);
        cpu.step();
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn test_brk_emulation_pushes_and_vectors() {
        let mut cpu = cpu_with_program(&[0x00, 0xFF]); // BRK + signature
        cpu.memory.write(VECTOR_BRK_EMU, 0x00);
        cpu.memory.write(VECTOR_BRK_EMU + 1, 0x90);
        cpu.step();
        assert_eq!(cpu.pc, 0x9000);
        assert!(cpu.get_flag(FLAG_IRQ_DISABLE));
        // Return address skips the signature byte; status pushed with B set
        assert_eq!(cpu.memory.read(0x01FF), 0x80);
        assert_eq!(cpu.memory.read(0x01FE), 0x02);
        assert_eq!(cpu.memory.read(0x01FD), 0x34 | FLAG_BREAK);
        assert_eq!(cpu.s, 0x01FC);
    }

    #[test]
    fn test_brk_native_pushes_pbr() {
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0x00, 0xFF]);
        cpu.memory.write(VECTOR_BRK, 0x00);
        cpu.memory.write(VECTOR_BRK + 1, 0xA0);
        cpu.step(); // CLC
        cpu.step(); // XCE
        cpu.step(); // BRK
        assert_eq!(cpu.pc, 0xA000);
        assert_eq!(cpu.pbr, 0);
        assert_eq!(cpu.memory.read(0x01FF), 0x00); // old PBR
        assert_eq!(cpu.s, 0x01FB);
    }

    #[test]
    fn test_mvn_block_move() {
        // MVN dest=$20, src=$10; X=$0000, Y=$0100, A=3: 4 bytes then halt
        let mut cpu = cpu_with_program(&[0x54, 0x20, 0x10]);
        cpu.emulation = false;
        cpu.status &= !FLAG_INDEX;
        cpu.c = 0x0003;
        cpu.x = 0x0000;
        cpu.y = 0x0100;
        for i in 0..4u32 {
            cpu.memory.write(0x100000 + i, 0xA0 + i as u8);
        }

        for _ in 0..4 {
            cpu.step();
        }

        for i in 0..4u32 {
            assert_eq!(cpu.memory.read(0x200100 + i), 0xA0 + i as u8);
        }
        assert_eq!(cpu.c, 0xFFFF);
        assert_eq!(cpu.x, 0x0004);
        assert_eq!(cpu.y, 0x0104);
        assert_eq!(cpu.dbr, 0x20);
        assert_eq!(cpu.pc, 0x8003, "instruction no longer repeats");
    }

    #[test]
    fn test_mvp_decrements() {
        let mut cpu = cpu_with_program(&[0x44, 0x20, 0x10]);
        cpu.emulation = false;
        cpu.status &= !FLAG_INDEX;
        cpu.c = 0x0000; // single byte
        cpu.x = 0x0010;
        cpu.y = 0x0020;
        cpu.memory.write(0x100010, 0x5C);
        cpu.step();
        assert_eq!(cpu.memory.read(0x200020), 0x5C);
        assert_eq!(cpu.c, 0xFFFF);
        assert_eq!(cpu.x, 0x000F);
        assert_eq!(cpu.y, 0x001F);
        assert_eq!(cpu.dbr, 0x20);
    }

    #[test]
    fn test_inx_iny_dex_dey_8bit_wrap() {
        let mut cpu = cpu_with_program(&[0xE8, 0xC8, 0xCA, 0x88]);
        cpu.x = 0xFF;
        cpu.y = 0x00;
        cpu.step(); // INX wraps to 0
        assert_eq!(cpu.get_x(), 0x00);
        assert!(cpu.get_flag(FLAG_ZERO));
        cpu.step(); // INY
        assert_eq!(cpu.get_y(), 0x01);
        cpu.step(); // DEX wraps to $FF
        assert_eq!(cpu.get_x(), 0xFF);
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        cpu.step(); // DEY
        assert_eq!(cpu.get_y(), 0x00);
    }

    #[test]
    fn test_asl_lsr_rol_ror_8bit() {
        let mut cpu = cpu_with_program(&[0x0A, 0x4A, 0x2A, 0x6A]);
        cpu.c = 0x81;
        cpu.step(); // ASL: $81 -> $02, C=1
        assert_eq!(cpu.get_a(), 0x02);
        assert!(cpu.get_flag(FLAG_CARRY));
        cpu.step(); // LSR: $02 -> $01, C=0
        assert_eq!(cpu.get_a(), 0x01);
        assert!(!cpu.get_flag(FLAG_CARRY));
        cpu.step(); // ROL: $01 -> $02 (carry 0 in), C=0
        assert_eq!(cpu.get_a(), 0x02);
        cpu.step(); // ROR: $02 -> $01
        assert_eq!(cpu.get_a(), 0x01);
    }

    #[test]
    fn test_tsb_trb() {
        let mut cpu = cpu_with_program(&[0x04, 0x40, 0x14, 0x40]);
        cpu.c = 0x0F;
        cpu.memory.write(0x000040, 0xF0);
        cpu.step(); // TSB $40
        assert_eq!(cpu.memory.read(0x000040), 0xFF);
        assert!(cpu.get_flag(FLAG_ZERO), "A & old memory was zero");
        cpu.step(); // TRB $40
        assert_eq!(cpu.memory.read(0x000040), 0xF0);
        assert!(!cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_bit_immediate_touches_only_z() {
        let mut cpu = cpu_with_program(&[0x89, 0xC0]);
        cpu.c = 0x0F;
        let status_before = cpu.status & (FLAG_NEGATIVE | FLAG_OVERFLOW);
        cpu.step();
        assert!(cpu.get_flag(FLAG_ZERO));
        assert_eq!(cpu.status & (FLAG_NEGATIVE | FLAG_OVERFLOW), status_before);
    }

    #[test]
    fn test_bit_memory_sets_n_and_v() {
        let mut cpu = cpu_with_program(&[0x24, 0x40]);
        cpu.c = 0xFF;
        cpu.memory.write(0x000040, 0xC0);
        cpu.step();
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(!cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_transfers_tcd_tdc_tcs() {
        let mut cpu = cpu_with_program(&[0x5B, 0x7B, 0x1B]);
        cpu.c = 0x1234;
        cpu.step(); // TCD moves all 16 bits even in emulation
        assert_eq!(cpu.d, 0x1234);
        cpu.d = 0x5678;
        cpu.step(); // TDC
        assert_eq!(cpu.c, 0x5678);
        cpu.step(); // TCS in emulation pins the high byte
        assert_eq!(cpu.s, 0x0178);
    }

    #[test]
    fn test_xba_swaps_and_sets_flags_from_low() {
        let mut cpu = cpu_with_program(&[0xEB]);
        cpu.c = 0x8001;
        cpu.step();
        assert_eq!(cpu.c, 0x0180);
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(!cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn test_emulation_stack_wraps_in_page_one() {
        let mut cpu = cpu_with_program(&[0x48]); // PHA
        cpu.s = 0x0100;
        cpu.step();
        assert_eq!(cpu.s, 0x01FF, "S wraps within page 1");
    }

    #[test]
    fn test_emulation_invariants_hold_after_steps() {
        let mut cpu = cpu_with_program(&[0xC2, 0x30, 0xE8, 0x48, 0x68]);
        for _ in 0..4 {
            cpu.step();
            assert!(cpu.get_flag(FLAG_MEMORY));
            assert!(cpu.get_flag(FLAG_INDEX));
            assert_eq!(cpu.s & 0xFF00, 0x0100);
            assert_eq!(cpu.x & 0xFF00, 0);
            assert_eq!(cpu.y & 0xFF00, 0);
        }
    }

    #[test]
    fn test_entering_emulation_truncates_index_registers() {
        // Native 16-bit indexes, then SEC; XCE back to emulation
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xC2, 0x10, 0x38, 0xFB]);
        cpu.step(); // CLC
        cpu.step(); // XCE -> native
        cpu.step(); // REP #$10 -> 16-bit X/Y
        cpu.x = 0x1234;
        cpu.y = 0x5678;
        cpu.step(); // SEC
        cpu.step(); // XCE -> emulation
        assert!(cpu.emulation);
        assert_eq!(cpu.x, 0x0034);
        assert_eq!(cpu.y, 0x0078);
        assert_eq!(cpu.s & 0xFF00, 0x0100);
    }

    #[test]
    fn test_push_pull_16bit_index() {
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xC2, 0x10, 0xDA, 0xFA]);
        cpu.step();
        cpu.step();
        cpu.step(); // REP #$10
        cpu.x = 0xBEEF;
        cpu.step(); // PHX
        cpu.x = 0;
        cpu.step(); // PLX
        assert_eq!(cpu.x, 0xBEEF);
    }

    #[test]
    fn test_per_pushes_pc_relative() {
        let mut cpu = cpu_with_program(&[0x62, 0x10, 0x00]); // PER +$0010
        cpu.emulation = false;
        cpu.s = 0x1FFF;
        cpu.step();
        // PC after operand is $8003; pushed value is $8013
        assert_eq!(cpu.memory.read(0x1FFF), 0x80);
        assert_eq!(cpu.memory.read(0x1FFE), 0x13);
    }

    #[test]
    fn test_pei_pushes_word_from_direct_page() {
        let mut cpu = cpu_with_program(&[0xD4, 0x20]); // PEI ($20)
        cpu.emulation = false;
        cpu.s = 0x1FFF;
        cpu.memory.write(0x000020, 0xCD);
        cpu.memory.write(0x000021, 0xAB);
        cpu.step();
        assert_eq!(cpu.memory.read(0x1FFF), 0xAB);
        assert_eq!(cpu.memory.read(0x1FFE), 0xCD);
    }

    #[test]
    fn test_wai_stp_consume_cycles() {
        let mut cpu = cpu_with_program(&[0xCB, 0xDB]);
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.pc, 0x8002);
    }

    #[test]
    fn test_stz_16bit() {
        let mut cpu = cpu_with_program(&[0x18, 0xFB, 0xC2, 0x20, 0x9C, 0x00, 0x30]);
        cpu.memory.write(0x003000, 0xAA);
        cpu.memory.write(0x003001, 0xBB);
        for _ in 0..4 {
            cpu.step();
        }
        assert_eq!(cpu.memory.read(0x003000), 0);
        assert_eq!(cpu.memory.read(0x003001), 0);
    }

    #[test]
    fn test_16bit_adc() {
        let mut cpu =
            cpu_with_program(&[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0xFF, 0x7F, 0x69, 0x01, 0x00]);
        for _ in 0..5 {
            cpu.step();
        }
        // $7FFF + 1 = $8000: overflow and negative
        assert_eq!(cpu.c, 0x8000);
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }
}
