//! SNES cartridge implementation

use crate::SnesError;
use emu_core::logging::{log, LogCategory, LogLevel};

/// Interrupt vector words parsed from the ROM tail (diagnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vectors {
    pub cop: u16,
    pub brk: u16,
    pub nmi: u16,
    pub reset: u16,
    pub irq: u16,
}

/// SNES cartridge: ROM bytes plus the address mapping.
///
/// The system area maps LoROM-style 32KB windows; the extended banks map
/// linearly. `$FFE0-$FFFF` of any system-area bank resolves to the last 32
/// ROM bytes so the interrupt vectors are always reachable.
pub struct Cartridge {
    rom: Vec<u8>,
    had_copier_header: bool,
}

impl Cartridge {
    pub fn load(data: &[u8]) -> Result<Self, SnesError> {
        // A 512-byte copier header leaves the image off the 32KB grid.
        let header_offset = if data.len() % 0x8000 == 0x200 { 0x200 } else { 0 };
        let rom_data = &data[header_offset.min(data.len())..];

        if rom_data.len() < 0x8000 {
            log(LogCategory::Bus, LogLevel::Error, || {
                format!(
                    "cartridge: ROM too small ({} bytes after header strip, minimum 32KB)",
                    rom_data.len()
                )
            });
            return Err(SnesError::InvalidRom(format!(
                "ROM too small ({} bytes, minimum 32KB)",
                rom_data.len()
            )));
        }

        let cart = Self {
            rom: rom_data.to_vec(),
            had_copier_header: header_offset != 0,
        };

        log(LogCategory::Bus, LogLevel::Info, || {
            format!(
                "cartridge: loaded {} KB ROM, copier header: {}",
                cart.rom.len() / 1024,
                if cart.had_copier_header { "yes" } else { "no" }
            )
        });
        let v = cart.vectors();
        log(LogCategory::Bus, LogLevel::Debug, || {
            format!(
                "cartridge vectors: COP={:04X} BRK={:04X} NMI={:04X} RESET={:04X} IRQ={:04X}",
                v.cop, v.brk, v.nmi, v.reset, v.irq
            )
        });

        Ok(cart)
    }

    /// Vector words live in the last 32 bytes of the image.
    pub fn vectors(&self) -> Vectors {
        Vectors {
            cop: self.tail_word(0x14),
            brk: self.tail_word(0x16),
            nmi: self.tail_word(0x1A),
            reset: self.tail_word(0x1C),
            irq: self.tail_word(0x1E),
        }
    }

    fn tail_word(&self, offset: usize) -> u16 {
        let base = self.rom.len() - 32 + offset;
        u16::from_le_bytes([self.rom[base], self.rom[base + 1]])
    }

    pub fn read(&self, addr: u32) -> u8 {
        let bank = (addr >> 16) as u8;
        let offset = (addr & 0xFFFF) as u16;

        match bank {
            // System area: LoROM windows at $8000-$FFFF
            0x00..=0x3F | 0x80..=0xBF => {
                if offset >= 0xFFE0 {
                    // Interrupt vectors always come from the ROM tail
                    let tail = self.rom.len() - 32;
                    self.rom[tail + (offset - 0xFFE0) as usize]
                } else if offset >= 0x8000 {
                    let rom_offset =
                        ((bank & 0x7F) as usize) * 0x8000 + (offset as usize - 0x8000);
                    self.rom.get(rom_offset).copied().unwrap_or(0xFF)
                } else {
                    0xFF
                }
            }
            // Extended banks map linearly (HiROM-style)
            0x40..=0x7D | 0xC0..=0xFF => {
                let rom_offset = ((bank as usize) << 16) | offset as usize;
                self.rom.get(rom_offset).copied().unwrap_or(0xFF)
            }
            // $7E/$7F are WRAM; the bus never routes them here
            _ => 0xFF,
        }
    }

    pub fn rom_len(&self) -> usize {
        self.rom.len()
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn had_copier_header(&self) -> bool {
        self.had_copier_header
    }
}
