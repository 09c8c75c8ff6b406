//! SNES (Super Nintendo Entertainment System) emulation core.
//!
//! Ties the reusable 65C816 CPU from `emu_core` to the SNES-specific
//! components and drives them from a single master clock:
//!
//! - **CPU**: WDC 65C816, stepped every 12 master cycles
//! - **PPU**: register file and H/V timing, stepped every 4 master cycles
//!   (one dot), 341 dots x 262 scanlines per frame
//! - **APU**: mailbox/timer stub, stepped every master cycle
//! - **Bus**: 128KB WRAM, 32KB SRAM, I/O shadow, LoROM/HiROM cartridge
//!
//! The embedding shell supplies ROM bytes and consumes the RGBA framebuffer
//! between `run_frame` calls; nothing here touches a display or audio device.

#![allow(clippy::upper_case_acronyms)]
#![recursion_limit = "256"]

mod apu;
mod bus;
mod cartridge;
mod ppu;

pub use apu::Apu;
pub use bus::SnesBus;
pub use cartridge::{Cartridge, Vectors};
pub use ppu::Ppu;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use emu_core::cpu_65c816::Cpu65c816;
use emu_core::types::Frame;
use emu_core::System;
use serde_json::Value;
use thiserror::Error;

/// NTSC master clock, ~21.477 MHz. The CPU takes every 12th tick, the PPU
/// every 4th (one dot), the APU all of them.
pub const MASTER_CLOCK_HZ: f64 = 21_477_272.0;
pub const MASTER_CYCLES_PER_SCANLINE: u64 = 1364;
pub const SCANLINES_PER_FRAME: u64 = 262;
pub const MASTER_CYCLES_PER_FRAME: u64 = MASTER_CYCLES_PER_SCANLINE * SCANLINES_PER_FRAME;
const CPU_DIVIDER: u64 = 12;
const PPU_DIVIDER: u64 = 4;

#[derive(Error, Debug)]
pub enum SnesError {
    #[error("Invalid ROM format: {0}")]
    InvalidRom(String),
    #[error("Bad snapshot: {0}")]
    BadSnapshot(String),
}

/// SNES system implementation
pub struct SnesSystem {
    cpu: Cpu65c816<SnesBus>,
    total_cycles: u64,
    is_running: bool,
}

impl SnesSystem {
    pub fn new() -> Self {
        Self {
            cpu: Cpu65c816::new(SnesBus::new()),
            total_cycles: 0,
            is_running: false,
        }
    }

    pub fn bus(&self) -> &SnesBus {
        &self.cpu.memory
    }

    pub fn bus_mut(&mut self) -> &mut SnesBus {
        &mut self.cpu.memory
    }

    pub fn cpu(&self) -> &Cpu65c816<SnesBus> {
        &self.cpu
    }

    /// Load a ROM image and power the system on.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), SnesError> {
        self.cpu.memory.load_rom(data)?;
        self.power_on();
        Ok(())
    }

    /// Reset every component and start running.
    pub fn power_on(&mut self) {
        self.cpu.memory.reset();
        self.cpu.reset();
        self.total_cycles = 0;
        self.is_running = true;
    }

    /// Stop running without touching state.
    pub fn power_off(&mut self) {
        self.is_running = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Nominal frame rate of the NTSC master clock (~60 Hz).
    pub fn fps(&self) -> f64 {
        MASTER_CLOCK_HZ / MASTER_CYCLES_PER_FRAME as f64
    }

    /// RGBA8 output of the last completed frame. Only stable between
    /// `run_frame` calls.
    pub fn framebuffer(&self) -> &[u8] {
        self.cpu.memory.ppu.framebuffer()
    }

    /// Run one video frame of master-clock time: 262 scanlines of 1364
    /// ticks. Returns immediately when powered off.
    pub fn run_frame(&mut self) {
        if !self.is_running {
            return;
        }
        for line in 0..SCANLINES_PER_FRAME {
            for _ in 0..MASTER_CYCLES_PER_SCANLINE {
                if self.total_cycles % CPU_DIVIDER == 0 {
                    self.cpu.step();
                }
                if self.total_cycles % PPU_DIVIDER == 0 {
                    self.cpu.memory.ppu.step();
                }
                self.cpu.memory.apu.step();
                self.total_cycles += 1;
            }
            self.cpu.memory.ppu.end_scanline(line as u16);
        }
        self.cpu.memory.ppu.end_frame();
    }
}

impl Default for SnesSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for SnesSystem {
    type Error = SnesError;

    fn reset(&mut self) {
        self.power_on();
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        self.run_frame();
        let mut frame = Frame::new(
            ppu::SCREEN_WIDTH as u32,
            ppu::SCREEN_HEIGHT as u32,
        );
        frame.pixels.copy_from_slice(self.framebuffer());
        Ok(frame)
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "total_cycles": self.total_cycles,
            "is_running": self.is_running,
            "cpu": {
                "c": self.cpu.c,
                "x": self.cpu.x,
                "y": self.cpu.y,
                "s": self.cpu.s,
                "d": self.cpu.d,
                "dbr": self.cpu.dbr,
                "pbr": self.cpu.pbr,
                "pc": self.cpu.pc,
                "status": self.cpu.status,
                "emulation": self.cpu.emulation,
                "cycles": self.cpu.cycles,
            },
            "bus": {
                "wram": encode_bytes(&self.cpu.memory.wram),
                "sram": encode_bytes(&self.cpu.memory.sram),
                "io_shadow": encode_bytes(self.cpu.memory.io_shadow()),
            },
            "ppu": self.cpu.memory.ppu.save_state(),
            "apu": self.cpu.memory.apu.save_state(),
        })
    }

    /// Apply a snapshot. Everything is decoded and validated before any
    /// field changes, so a bad snapshot leaves the system untouched.
    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error> {
        let bus_state = v
            .get("bus")
            .ok_or_else(|| SnesError::BadSnapshot("missing bus section".into()))?;
        let wram = decode_bytes(bus_state, "wram", bus::WRAM_SIZE)?;
        let sram = decode_bytes(bus_state, "sram", bus::SRAM_SIZE)?;
        let io_shadow = decode_bytes(bus_state, "io_shadow", bus::IO_SHADOW_SIZE)?;

        let mut ppu = Ppu::new();
        ppu.load_state(
            v.get("ppu")
                .ok_or_else(|| SnesError::BadSnapshot("missing ppu section".into()))?,
        )?;

        let mut apu = Apu::new();
        apu.load_state(
            v.get("apu")
                .ok_or_else(|| SnesError::BadSnapshot("missing apu section".into()))?,
        )?;

        let cpu_state = v
            .get("cpu")
            .ok_or_else(|| SnesError::BadSnapshot("missing cpu section".into()))?;
        let c = snap_u64(cpu_state, "c")? as u16;
        let x = snap_u64(cpu_state, "x")? as u16;
        let y = snap_u64(cpu_state, "y")? as u16;
        let s = snap_u64(cpu_state, "s")? as u16;
        let d = snap_u64(cpu_state, "d")? as u16;
        let dbr = snap_u64(cpu_state, "dbr")? as u8;
        let pbr = snap_u64(cpu_state, "pbr")? as u8;
        let pc = snap_u64(cpu_state, "pc")? as u16;
        let status = snap_u64(cpu_state, "status")? as u8;
        let emulation = snap_bool(cpu_state, "emulation")?;
        let cpu_cycles = snap_u64(cpu_state, "cycles")?;
        let total_cycles = snap_u64(v, "total_cycles")?;
        let is_running = snap_bool(v, "is_running")?;

        // All sections validated; apply.
        self.cpu.memory.wram = wram;
        self.cpu.memory.sram = sram;
        self.cpu.memory.set_io_shadow(&io_shadow)?;
        self.cpu.memory.ppu = ppu;
        self.cpu.memory.apu = apu;
        self.cpu.c = c;
        self.cpu.x = x;
        self.cpu.y = y;
        self.cpu.s = s;
        self.cpu.d = d;
        self.cpu.dbr = dbr;
        self.cpu.pbr = pbr;
        self.cpu.pc = pc;
        self.cpu.status = status;
        self.cpu.emulation = emulation;
        self.cpu.cycles = cpu_cycles;
        self.total_cycles = total_cycles;
        self.is_running = is_running;
        Ok(())
    }
}

// --- Snapshot field helpers (shared by the component save/load code) -------

pub(crate) fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn decode_bytes(v: &Value, key: &str, expected: usize) -> Result<Vec<u8>, SnesError> {
    let text = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| SnesError::BadSnapshot(format!("missing byte field {key}")))?;
    let bytes = BASE64
        .decode(text)
        .map_err(|e| SnesError::BadSnapshot(format!("field {key}: {e}")))?;
    if bytes.len() != expected {
        return Err(SnesError::BadSnapshot(format!(
            "field {key} length {} != {expected}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

pub(crate) fn snap_u64(v: &Value, key: &str) -> Result<u64, SnesError> {
    v.get(key)
        .and_then(|x| x.as_u64())
        .ok_or_else(|| SnesError::BadSnapshot(format!("missing field {key}")))
}

pub(crate) fn snap_i64(v: &Value, key: &str) -> Result<i64, SnesError> {
    v.get(key)
        .and_then(|x| x.as_i64())
        .ok_or_else(|| SnesError::BadSnapshot(format!("missing field {key}")))
}

pub(crate) fn snap_bool(v: &Value, key: &str) -> Result<bool, SnesError> {
    v.get(key)
        .and_then(|x| x.as_bool())
        .ok_or_else(|| SnesError::BadSnapshot(format!("missing field {key}")))
}

pub(crate) fn snap_bool_array4(v: &Value, key: &str) -> Result<[bool; 4], SnesError> {
    let items = v
        .get(key)
        .and_then(|x| x.as_array())
        .filter(|a| a.len() == 4)
        .ok_or_else(|| SnesError::BadSnapshot(format!("field {key} malformed")))?;
    let mut out = [false; 4];
    for (i, item) in items.iter().enumerate() {
        out[i] = item
            .as_bool()
            .ok_or_else(|| SnesError::BadSnapshot(format!("field {key} malformed")))?;
    }
    Ok(out)
}

pub(crate) fn snap_byte_array4(v: &Value, key: &str) -> Result<[u8; 4], SnesError> {
    let items = v
        .get(key)
        .and_then(|x| x.as_array())
        .filter(|a| a.len() == 4)
        .ok_or_else(|| SnesError::BadSnapshot(format!("field {key} malformed")))?;
    let mut out = [0u8; 4];
    for (i, item) in items.iter().enumerate() {
        out[i] = item
            .as_u64()
            .ok_or_else(|| SnesError::BadSnapshot(format!("field {key} malformed")))?
            as u8;
    }
    Ok(out)
}
