//! SNES memory bus implementation
//!
//! Decodes the 24-bit address space between WRAM, SRAM, the I/O register
//! shadow, the cartridge ROM and the delegated PPU/APU regions. Out-of-range
//! reads return `$FF` (open bus); writes into ROM are dropped.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::ppu::Ppu;
use crate::SnesError;
use emu_core::cpu_65c816::Memory65c816;
use emu_core::logging::{log, LogCategory, LogLevel};

pub const WRAM_SIZE: usize = 0x2_0000; // 128KB
pub const SRAM_SIZE: usize = 0x8000; // 32KB
/// Shadow for offsets `$2000-$7FFF` of the system area
pub const IO_SHADOW_SIZE: usize = 0x6000;

/// SNES memory bus
pub struct SnesBus {
    /// 128KB WRAM: banks $7E-$7F, low 8KB mirrored into every system bank
    pub wram: Vec<u8>,
    /// 32KB SRAM at $6000-$7FFF of the system banks, linear across banks
    pub sram: Vec<u8>,
    /// Raw shadow for I/O offsets without a device behind them
    io_shadow: Vec<u8>,
    pub ppu: Ppu,
    pub apu: Apu,
    cartridge: Option<Cartridge>,
}

impl SnesBus {
    pub fn new() -> Self {
        Self {
            wram: vec![0; WRAM_SIZE],
            sram: vec![0; SRAM_SIZE],
            io_shadow: vec![0; IO_SHADOW_SIZE],
            ppu: Ppu::new(),
            apu: Apu::new(),
            cartridge: None,
        }
    }

    /// Load a ROM image (copier header stripped by the cartridge) and log
    /// the parsed vector table.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), SnesError> {
        self.cartridge = Some(Cartridge::load(data)?);
        Ok(())
    }

    pub fn has_cartridge(&self) -> bool {
        self.cartridge.is_some()
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    /// Zero WRAM, SRAM and the I/O shadow, and reset the delegated devices.
    pub fn reset(&mut self) {
        self.wram.iter_mut().for_each(|b| *b = 0);
        self.sram.iter_mut().for_each(|b| *b = 0);
        self.io_shadow.iter_mut().for_each(|b| *b = 0);
        self.ppu.reset();
        self.apu.reset();
    }

    pub fn io_shadow(&self) -> &[u8] {
        &self.io_shadow
    }

    pub fn set_io_shadow(&mut self, bytes: &[u8]) -> Result<(), SnesError> {
        if bytes.len() != IO_SHADOW_SIZE {
            return Err(SnesError::BadSnapshot(format!(
                "io shadow length {} != {}",
                bytes.len(),
                IO_SHADOW_SIZE
            )));
        }
        self.io_shadow.copy_from_slice(bytes);
        Ok(())
    }

    /// Little-endian word read; the high byte comes from `addr + 1` by
    /// plain arithmetic (no bank-wrap fix-up).
    pub fn read16(&self, addr: u32) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Three sequential reads, little-endian.
    pub fn read24(&self, addr: u32) -> u32 {
        let lo = self.read(addr) as u32;
        let mid = self.read(addr.wrapping_add(1)) as u32;
        let hi = self.read(addr.wrapping_add(2)) as u32;
        (hi << 16) | (mid << 8) | lo
    }

    pub fn write16(&mut self, addr: u32, val: u16) {
        self.write(addr, (val & 0xFF) as u8);
        self.write(addr.wrapping_add(1), (val >> 8) as u8);
    }

    /// SRAM index: 8KB window per bank, linear, wrapping at 32KB.
    fn sram_index(bank: u8, offset: u16) -> usize {
        (((bank & 0x3F) as usize) << 13 | (offset as usize - 0x6000)) & (SRAM_SIZE - 1)
    }
}

impl Default for SnesBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory65c816 for SnesBus {
    fn read(&self, addr: u32) -> u8 {
        let bank = (addr >> 16) as u8;
        let offset = (addr & 0xFFFF) as u16;

        match bank {
            // Banks $00-$3F and $80-$BF: system area
            0x00..=0x3F | 0x80..=0xBF => match offset {
                // WRAM shadow
                0x0000..=0x1FFF => self.wram[offset as usize],
                // PPU registers, folded to the low 64
                0x2100..=0x21FF => self.ppu.read_register(0x2100 | (offset & 0x3F)),
                // Raw I/O shadow
                0x2000..=0x20FF | 0x2200..=0x3FFF => self.io_shadow[(offset - 0x2000) as usize],
                // CPU <-> APU mailbox ports
                0x4000..=0x4003 => self.apu.read_port((offset - 0x4000) as usize),
                0x4004..=0x5FFF => self.io_shadow[(offset - 0x2000) as usize],
                // SRAM
                0x6000..=0x7FFF => self.sram[Self::sram_index(bank, offset)],
                // Cartridge ROM (vector tail redirect inside)
                _ => self
                    .cartridge
                    .as_ref()
                    .map(|c| c.read(addr))
                    .unwrap_or(0xFF),
            },
            // Banks $7E-$7F: WRAM linear
            0x7E..=0x7F => {
                let index = (((bank - 0x7E) as usize) << 16) | offset as usize;
                self.wram[index]
            }
            // Extended banks: cartridge linear
            _ => self
                .cartridge
                .as_ref()
                .map(|c| c.read(addr))
                .unwrap_or(0xFF),
        }
    }

    fn write(&mut self, addr: u32, val: u8) {
        let bank = (addr >> 16) as u8;
        let offset = (addr & 0xFFFF) as u16;

        match bank {
            0x00..=0x3F | 0x80..=0xBF => match offset {
                0x0000..=0x1FFF => self.wram[offset as usize] = val,
                0x2100..=0x21FF => self.ppu.write_register(0x2100 | (offset & 0x3F), val),
                0x2000..=0x20FF | 0x2200..=0x3FFF => {
                    self.io_shadow[(offset - 0x2000) as usize] = val;
                }
                0x4000..=0x4003 => self.apu.write_port((offset - 0x4000) as usize, val),
                0x4004..=0x5FFF => {
                    if (0x4300..=0x43FF).contains(&offset) {
                        // DMA channel registers: recognised, not executed
                        log(LogCategory::Stubs, LogLevel::Debug, || {
                            format!("DMA register write ${:04X} = ${:02X} (no-op)", offset, val)
                        });
                    }
                    self.io_shadow[(offset - 0x2000) as usize] = val;
                }
                0x6000..=0x7FFF => self.sram[Self::sram_index(bank, offset)] = val,
                // ROM: writes dropped
                _ => {}
            },
            0x7E..=0x7F => {
                let index = (((bank - 0x7E) as usize) << 16) | offset as usize;
                self.wram[index] = val;
            }
            // Extended banks are ROM: writes dropped
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_rom() -> SnesBus {
        let mut bus = SnesBus::new();
        let mut rom = vec![0u8; 0x8000];
        rom[0] = 0x42; // $00:8000
        rom[0x7FFC] = 0x00; // reset vector
        rom[0x7FFD] = 0x80;
        bus.load_rom(&rom).unwrap();
        bus
    }

    #[test]
    fn test_wram_shadow_and_linear() {
        let mut bus = SnesBus::new();
        bus.write(0x7E0123, 0x55);
        assert_eq!(bus.read(0x7E0123), 0x55);
        // Low 8KB mirrors into every system bank
        assert_eq!(bus.read(0x000123), 0x55);
        assert_eq!(bus.read(0x800123), 0x55);
        bus.write(0x3F0456, 0x66);
        assert_eq!(bus.read(0x7E0456), 0x66);
        // Bank $7F is the upper half
        bus.write(0x7F0000, 0x77);
        assert_eq!(bus.read(0x7F0000), 0x77);
        assert_ne!(bus.read(0x7E0000), 0x77);
    }

    #[test]
    fn test_sram_window() {
        let mut bus = SnesBus::new();
        bus.write(0x006000, 0xAA);
        assert_eq!(bus.read(0x006000), 0xAA);
        assert_eq!(bus.read(0x806000), 0xAA, "banks $80+ mirror the window");
        bus.write(0x016000, 0xBB); // next bank, next 8KB page
        assert_eq!(bus.sram[0x2000], 0xBB);
        // 32KB wrap: bank $04 lands back on page 0
        assert_eq!(bus.read(0x046000), 0xAA);
    }

    #[test]
    fn test_rom_read_and_write_dropped() {
        let mut bus = bus_with_rom();
        assert_eq!(bus.read(0x008000), 0x42);
        bus.write(0x008000, 0x99);
        assert_eq!(bus.read(0x008000), 0x42, "ROM writes are dropped");
    }

    #[test]
    fn test_open_bus_without_cartridge() {
        let bus = SnesBus::new();
        assert_eq!(bus.read(0x008000), 0xFF);
        assert_eq!(bus.read(0x400000), 0xFF);
    }

    #[test]
    fn test_vector_redirect_reaches_rom_tail() {
        let bus = bus_with_rom();
        assert_eq!(bus.read16(0x00FFFC), 0x8000);
    }

    #[test]
    fn test_read16_read24_little_endian() {
        let mut bus = SnesBus::new();
        bus.write(0x7E1000, 0x11);
        bus.write(0x7E1001, 0x22);
        bus.write(0x7E1002, 0x33);
        assert_eq!(bus.read16(0x7E1000), 0x2211);
        assert_eq!(bus.read24(0x7E1000), 0x332211);
        assert_eq!(
            bus.read16(0x7E1000),
            bus.read(0x7E1000) as u16 | ((bus.read(0x7E1001) as u16) << 8)
        );
    }

    #[test]
    fn test_write16_crosses_bank_by_arithmetic() {
        let mut bus = SnesBus::new();
        bus.write16(0x7EFFFF, 0xBEEF);
        assert_eq!(bus.read(0x7EFFFF), 0xEF);
        assert_eq!(bus.read(0x7F0000), 0xBE, "no bank-wrap fix-up");
    }

    #[test]
    fn test_ppu_register_forwarding() {
        let mut bus = SnesBus::new();
        bus.write(0x002100, 0x8F);
        // INIDISP landed in the PPU, not the shadow
        assert_eq!(bus.ppu.read_register(0x2100), 0x8F);
        // Mirrors above $2140 fold onto the low 64 registers
        bus.write(0x002151, 0x01); // folds to $2111 (BG3HOFS)
        assert_eq!(bus.read(0x002100), 0x01, "PPU open bus echoes the last write");
    }

    #[test]
    fn test_apu_mailbox_ports() {
        let mut bus = SnesBus::new();
        bus.write(0x004000, 0x12);
        bus.write(0x004003, 0x34);
        assert_eq!(bus.apu.cpu_to_apu[0], 0x12);
        assert_eq!(bus.apu.cpu_to_apu[3], 0x34);

        bus.apu.apu_to_cpu[1] = 0xAB;
        assert_eq!(bus.read(0x004001), 0xAB);
        assert_eq!(bus.read(0x804001), 0xAB, "mirrored in the upper banks");
    }

    #[test]
    fn test_io_shadow_roundtrip() {
        let mut bus = SnesBus::new();
        bus.write(0x002345, 0x5A);
        assert_eq!(bus.read(0x002345), 0x5A);
        bus.write(0x004321, 0xA5); // DMA range: stored, not executed
        assert_eq!(bus.read(0x004321), 0xA5);
    }

    #[test]
    fn test_reset_clears_memories() {
        let mut bus = SnesBus::new();
        bus.write(0x7E0000, 1);
        bus.write(0x006000, 2);
        bus.write(0x002345, 3);
        bus.reset();
        assert_eq!(bus.read(0x7E0000), 0);
        assert_eq!(bus.read(0x006000), 0);
        assert_eq!(bus.read(0x002345), 0);
    }
}
