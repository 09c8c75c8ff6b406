//! SNES PPU: register file, VRAM/CGRAM/OAM, H/V timing, scanline renderer.
//!
//! **Implemented**:
//! - Full `$2100-$213F` register surface: VRAM/CGRAM/OAM ports with their
//!   write latches and read cursors, BG configuration, Mode-7 matrix with the
//!   hardware multiply result, H/V counter latching, status registers
//! - Dot-level timing: 341 dots per scanline, 262 scanlines, VBlank from
//!   line 225, HBlank from dot 274, odd/even frame toggle
//! - Scanline rendering for Modes 0, 1, 3 and 7 plus sprites, with the
//!   backdrop color and master brightness applied per row
//!
//! **State-plumbed only** (registers stored, not applied): per-layer
//! priority, windows, color math, mosaic, sub-screen designation. Modes
//! 2/4/5/6 render with the Mode-1 layer set.
//!
//! Read side effects (prefetch buffer, cursors, latch flags, open bus) live
//! in `Cell`s so the bus can forward CPU reads through `&self`.

use std::cell::Cell;

use emu_core::logging::{log, LogCategory, LogLevel};

use crate::SnesError;

pub const VRAM_SIZE: usize = 0x10000; // 64KB, 32K words
pub const CGRAM_SIZE: usize = 512; // 256 colors * 2 bytes
pub const OAM_SIZE: usize = 544; // 512-byte low table + 32-byte high table
pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 224;
pub const FRAMEBUFFER_SIZE: usize = SCREEN_WIDTH * SCREEN_HEIGHT * 4;

pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;
pub const VBLANK_START_LINE: u16 = 225;
const HBLANK_START_DOT: u16 = 274;

/// Per-background configuration decoded from `$2105-$2114`.
#[derive(Debug, Clone, Copy, Default)]
struct BgLayer {
    /// Tilemap base, VRAM word address
    tilemap_base: u16,
    /// Tilemap size select 0-3 (32x32 .. 64x64 entries)
    tilemap_size: u8,
    /// Tile data base, VRAM word address
    tile_base: u16,
    /// 16x16 tiles instead of 8x8
    tile_16: bool,
    h_scroll: u16,
    v_scroll: u16,
}

/// SNES picture processor.
pub struct Ppu {
    vram: Vec<u8>,
    cgram: Vec<u8>,
    oam: Vec<u8>,
    /// Raw register shadow for `$2100-$213F`
    regs: [u8; 0x40],

    // VRAM port
    vram_addr: Cell<u16>,
    /// Step applied on the triggering access: 32 when VMAIN bit 7 is set, else 1
    vram_increment: u16,
    /// VMAIN bits 2-3, stored for later use
    vram_remap_mode: u8,
    /// Prefetched word returned by `$2139/$213A`
    vram_read_buffer: Cell<u16>,

    // OAM port
    oam_addr: Cell<u16>,
    oam_first_write: bool,
    oam_write_buffer: u8,

    // CGRAM port
    cgram_addr: Cell<u8>,
    cgram_latch: u8,
    cgram_latch_bit: Cell<bool>,

    // Mode 7. The previous-byte latch is shared by all six registers.
    m7a: i16,
    m7b: i16,
    m7c: i16,
    m7d: i16,
    m7_center_x: i16,
    m7_center_y: i16,
    m7_prev_write: u8,
    m7_sel: u8,
    /// 24-bit signed product of M7A and the sign-extended low byte of M7B
    mpy_result: i32,

    // Background state. BG scroll has its own shared previous-byte latch.
    bg: [BgLayer; 4],
    bg_prev_write: u8,
    bg_enabled: [bool; 4],
    obj_enabled: bool,
    /// TS sub-screen designation, stored only
    sub_designation: u8,

    screen_mode: u8,
    bg3_priority: bool,
    mosaic_size: u8,
    mosaic_enabled: [bool; 4],
    brightness: u8,
    force_blank: bool,

    // OBSEL
    obj_size_select: u8,
    obj_name_base: u8,
    obj_name_select: u8,

    ppu1_open_bus: Cell<u8>,
    ppu2_open_bus: Cell<u8>,

    // Timing
    cycle: u16,
    scanline: u16,
    frame_count: u64,
    frame_odd: bool,
    in_vblank: bool,
    in_hblank: bool,
    nmi_flag: bool,
    h_counter_latched: Cell<u16>,
    v_counter_latched: Cell<u16>,
    counters_latched: Cell<bool>,

    /// RGBA8 output, 256x224, alpha always 255
    framebuffer: Vec<u8>,
}

impl Ppu {
    pub fn new() -> Self {
        let mut ppu = Self {
            vram: vec![0; VRAM_SIZE],
            cgram: vec![0; CGRAM_SIZE],
            oam: vec![0; OAM_SIZE],
            regs: [0; 0x40],
            vram_addr: Cell::new(0),
            vram_increment: 1,
            vram_remap_mode: 0,
            vram_read_buffer: Cell::new(0),
            oam_addr: Cell::new(0),
            oam_first_write: false,
            oam_write_buffer: 0,
            cgram_addr: Cell::new(0),
            cgram_latch: 0,
            cgram_latch_bit: Cell::new(false),
            m7a: 0,
            m7b: 0,
            m7c: 0,
            m7d: 0,
            m7_center_x: 0,
            m7_center_y: 0,
            m7_prev_write: 0,
            m7_sel: 0,
            mpy_result: 0,
            bg: [BgLayer::default(); 4],
            bg_prev_write: 0,
            bg_enabled: [false; 4],
            obj_enabled: false,
            sub_designation: 0,
            screen_mode: 0,
            bg3_priority: false,
            mosaic_size: 1,
            mosaic_enabled: [false; 4],
            brightness: 0,
            force_blank: true,
            obj_size_select: 0,
            obj_name_base: 0,
            obj_name_select: 0,
            ppu1_open_bus: Cell::new(0),
            ppu2_open_bus: Cell::new(0),
            cycle: 0,
            scanline: 0,
            frame_count: 0,
            frame_odd: false,
            in_vblank: false,
            in_hblank: false,
            nmi_flag: false,
            h_counter_latched: Cell::new(0),
            v_counter_latched: Cell::new(0),
            counters_latched: Cell::new(false),
            framebuffer: vec![0; FRAMEBUFFER_SIZE],
        };
        // Screen starts blanked
        ppu.regs[0x00] = 0x80;
        ppu
    }

    pub fn reset(&mut self) {
        *self = Ppu::new();
    }

    // --- Register file ----------------------------------------------------

    /// Write to a PPU register. The bus calls with an absolute address in
    /// `$2100-$213F` (higher mirrors are folded to the low 64 by the bus).
    pub fn write_register(&mut self, addr: u16, val: u8) {
        let reg = (addr & 0x3F) as usize;
        self.ppu1_open_bus.set(val);
        self.regs[reg] = val;

        match addr {
            // $2100 - INIDISP - brightness and force blank
            0x2100 => {
                self.brightness = val & 0x0F;
                self.force_blank = val & 0x80 != 0;
            }

            // $2101 - OBSEL - sprite sizes and tile data base
            0x2101 => {
                self.obj_size_select = val >> 5;
                self.obj_name_select = (val >> 3) & 0x03;
                self.obj_name_base = val & 0x07;
            }

            // $2102/$2103 - OAMADDL/H - OAM address, resets the write phase
            0x2102 => {
                self.oam_addr.set((self.oam_addr.get() & 0x0100) | val as u16);
                self.oam_first_write = false;
            }
            0x2103 => {
                self.oam_addr
                    .set(((val as u16 & 0x01) << 8) | (self.oam_addr.get() & 0x00FF));
                self.oam_first_write = false;
            }

            // $2104 - OAMDATA - buffered word writes into the low table
            0x2104 => {
                let addr = self.oam_addr.get() as usize;
                if addr < 0x200 {
                    if !self.oam_first_write {
                        self.oam_write_buffer = val;
                        self.oam_first_write = true;
                    } else {
                        let base = (addr & !1).min(0x1FE);
                        self.oam[base] = self.oam_write_buffer;
                        self.oam[base + 1] = val;
                        self.oam_first_write = false;
                    }
                } else {
                    // High table takes direct byte writes, mirrored every 32
                    self.oam[0x200 + (addr & 0x1F)] = val;
                }
                self.oam_addr.set(((addr + 1) & 0x3FF) as u16);
            }

            // $2105 - BGMODE
            0x2105 => {
                self.screen_mode = val & 0x07;
                self.bg3_priority = val & 0x08 != 0;
                for i in 0..4 {
                    self.bg[i].tile_16 = val & (0x10 << i) != 0;
                }
            }

            // $2106 - MOSAIC (stored, not applied)
            0x2106 => {
                self.mosaic_size = (val >> 4) + 1;
                for i in 0..4 {
                    self.mosaic_enabled[i] = val & (1 << i) != 0;
                }
            }

            // $2107-$210A - BGnSC - tilemap base and size
            0x2107..=0x210A => {
                let i = (addr - 0x2107) as usize;
                self.bg[i].tilemap_base = ((val as u16 & 0xFC) >> 2) << 10;
                self.bg[i].tilemap_size = val & 0x03;
            }

            // $210B/$210C - BG12NBA/BG34NBA - tile data bases
            0x210B => {
                self.bg[0].tile_base = (val as u16 & 0x0F) << 12;
                self.bg[1].tile_base = (val as u16 >> 4) << 12;
            }
            0x210C => {
                self.bg[2].tile_base = (val as u16 & 0x0F) << 12;
                self.bg[3].tile_base = (val as u16 >> 4) << 12;
            }

            // $210D-$2114 - BG scroll, two writes through a shared latch
            0x210D..=0x2114 => {
                let i = ((addr - 0x210D) / 2) as usize;
                let value = (((val as u16) << 8) | self.bg_prev_write as u16) & 0x03FF;
                self.bg_prev_write = val;
                if (addr - 0x210D) % 2 == 0 {
                    self.bg[i].h_scroll = value;
                } else {
                    self.bg[i].v_scroll = value;
                }
            }

            // $2115 - VMAIN - increment amount and triggering port
            0x2115 => {
                self.vram_increment = if val & 0x80 != 0 { 32 } else { 1 };
                self.vram_remap_mode = (val >> 2) & 0x03;
            }

            // $2116/$2117 - VMADDL/H - word address; primes the read buffer
            0x2116 => {
                self.vram_addr
                    .set((self.vram_addr.get() & 0x7F00) | val as u16);
                self.prime_vram_read_buffer();
            }
            0x2117 => {
                self.vram_addr
                    .set(((val as u16 & 0x7F) << 8) | (self.vram_addr.get() & 0x00FF));
                self.prime_vram_read_buffer();
            }

            // $2118/$2119 - VMDATAL/H - data port; VMAIN bit 7 picks which
            // half triggers the address increment
            0x2118 => {
                let word = (self.vram_addr.get() & 0x7FFF) as usize;
                self.vram[(word * 2) % VRAM_SIZE] = val;
                if self.vmain_increment_on_low() {
                    self.advance_vram_addr();
                }
            }
            0x2119 => {
                let word = (self.vram_addr.get() & 0x7FFF) as usize;
                self.vram[(word * 2 + 1) % VRAM_SIZE] = val;
                if !self.vmain_increment_on_low() {
                    self.advance_vram_addr();
                }
            }

            // $211A - M7SEL - flips, outside fill, repeat
            0x211A => {
                self.m7_sel = val;
            }

            // $211B-$2120 - Mode-7 matrix and center, 16-bit through the
            // shared previous-byte latch. M7A/M7B feed the multiplier.
            0x211B => {
                self.m7a = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
                self.update_multiply();
            }
            0x211C => {
                self.m7b = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
                self.update_multiply();
            }
            0x211D => {
                self.m7c = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
            }
            0x211E => {
                self.m7d = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
            }
            0x211F => {
                self.m7_center_x = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
            }
            0x2120 => {
                self.m7_center_y = (((val as u16) << 8) | self.m7_prev_write as u16) as i16;
                self.m7_prev_write = val;
            }

            // $2121 - CGADD
            0x2121 => {
                self.cgram_addr.set(val);
                self.cgram_latch_bit.set(false);
            }

            // $2122 - CGDATA - word writes through the half-word latch;
            // bit 7 of the high byte is masked off
            0x2122 => {
                if !self.cgram_latch_bit.get() {
                    self.cgram_latch = val;
                    self.cgram_latch_bit.set(true);
                } else {
                    let a = self.cgram_addr.get() as usize * 2;
                    self.cgram[a] = self.cgram_latch;
                    self.cgram[a + 1] = val & 0x7F;
                    self.cgram_addr.set(self.cgram_addr.get().wrapping_add(1));
                    self.cgram_latch_bit.set(false);
                }
            }

            // $2123-$212B - windows: state plumbing only
            0x2123..=0x212B => {}

            // $212C - TM - main screen designation
            0x212C => {
                for i in 0..4 {
                    self.bg_enabled[i] = val & (1 << i) != 0;
                }
                self.obj_enabled = val & 0x10 != 0;
            }

            // $212D - TS - sub screen designation: state plumbing only
            0x212D => {
                self.sub_designation = val;
            }

            // $212E-$2133 - window masks, color math, SETINI: state plumbing
            0x212E..=0x2133 => {}

            _ => {
                log(LogCategory::Stubs, LogLevel::Debug, || {
                    format!("PPU: unhandled register write ${:04X} = ${:02X}", addr, val)
                });
            }
        }
    }

    /// Read from a PPU register. Read side effects (cursor advances, latch
    /// updates) go through `Cell`s.
    pub fn read_register(&self, addr: u16) -> u8 {
        let result = match addr {
            // $2134-$2136 - MPYL/M/H - hardware multiply result
            0x2134 => (self.mpy_result & 0xFF) as u8,
            0x2135 => ((self.mpy_result >> 8) & 0xFF) as u8,
            0x2136 => ((self.mpy_result >> 16) & 0xFF) as u8,

            // $2137 - SLHV - latch H/V counters; returns open bus
            0x2137 => {
                self.latch_counters();
                self.ppu1_open_bus.get()
            }

            // $2138 - OAMDATAREAD - read through the cursor
            0x2138 => {
                let addr = self.oam_addr.get() as usize;
                let v = if addr < 0x200 {
                    self.oam[addr]
                } else {
                    self.oam[0x200 + (addr & 0x1F)]
                };
                self.oam_addr.set(((addr + 1) & 0x3FF) as u16);
                v
            }

            // $2139/$213A - VMDATALREAD/HREAD - prefetched word; the
            // matching VMAIN trigger refills and advances
            0x2139 => {
                let v = (self.vram_read_buffer.get() & 0xFF) as u8;
                if self.vmain_increment_on_low() {
                    self.prime_vram_read_buffer();
                    self.advance_vram_addr();
                }
                v
            }
            0x213A => {
                let v = (self.vram_read_buffer.get() >> 8) as u8;
                if !self.vmain_increment_on_low() {
                    self.prime_vram_read_buffer();
                    self.advance_vram_addr();
                }
                v
            }

            // $213B - CGDATAREAD - alternates low/high; high masks bit 7
            0x213B => {
                let a = self.cgram_addr.get() as usize * 2;
                if !self.cgram_latch_bit.get() {
                    self.cgram_latch_bit.set(true);
                    self.cgram[a % CGRAM_SIZE]
                } else {
                    self.cgram_latch_bit.set(false);
                    self.cgram_addr.set(self.cgram_addr.get().wrapping_add(1));
                    self.cgram[(a + 1) % CGRAM_SIZE] & 0x7F
                }
            }

            // $213C/$213D - OPHCT/OPVCT - latched counter low bytes; the
            // first read after a latch clear latches on demand
            0x213C => {
                if !self.counters_latched.get() {
                    self.latch_counters();
                }
                (self.h_counter_latched.get() & 0xFF) as u8
            }
            0x213D => {
                if !self.counters_latched.get() {
                    self.latch_counters();
                }
                (self.v_counter_latched.get() & 0xFF) as u8
            }

            // $213E - STAT77 - frame parity and open-bus echo; clears the
            // counter latch
            0x213E => {
                self.counters_latched.set(false);
                let mut v = 0u8;
                if self.frame_odd {
                    v |= 0x10;
                }
                if self.ppu1_open_bus.get() != 0 {
                    v |= 0x40;
                }
                v
            }

            // $213F - STAT78 - version, interlace, latched counter MSBs;
            // clears the counter latch
            0x213F => {
                self.counters_latched.set(false);
                let mut v = 0x03u8; // PPU1 version
                if self.regs[0x33] & 0x01 != 0 {
                    v |= 0x20; // interlace mode from SETINI
                }
                v |= (((self.h_counter_latched.get() >> 8) & 1) as u8) << 6;
                v |= (((self.v_counter_latched.get() >> 8) & 1) as u8) << 7;
                v
            }

            // Everything else is write-only: open bus
            _ => self.ppu1_open_bus.get(),
        };

        if (0x2137..=0x213F).contains(&addr) {
            self.ppu2_open_bus.set(result);
        }
        result
    }

    fn vmain_increment_on_low(&self) -> bool {
        self.regs[0x15] & 0x80 != 0
    }

    fn prime_vram_read_buffer(&self) {
        let word = (self.vram_addr.get() & 0x7FFF) as usize;
        let lo = self.vram[(word * 2) % VRAM_SIZE] as u16;
        let hi = self.vram[(word * 2 + 1) % VRAM_SIZE] as u16;
        self.vram_read_buffer.set((hi << 8) | lo);
    }

    fn advance_vram_addr(&self) {
        self.vram_addr
            .set(self.vram_addr.get().wrapping_add(self.vram_increment) & 0x7FFF);
    }

    fn update_multiply(&mut self) {
        // MPYx expose the low 24 bits of this signed product
        let factor = (self.m7b & 0xFF) as u8 as i8 as i32;
        self.mpy_result = self.m7a as i32 * factor;
    }

    fn latch_counters(&self) {
        self.h_counter_latched.set(self.cycle);
        self.v_counter_latched.set(self.scanline);
        self.counters_latched.set(true);
    }

    // --- Timing -----------------------------------------------------------

    /// Advance one dot of PPU time.
    pub fn step(&mut self) {
        self.cycle += 1;
        if self.cycle >= DOTS_PER_SCANLINE {
            self.cycle = 0;
            self.scanline += 1;
            if self.scanline == VBLANK_START_LINE {
                self.in_vblank = true;
                self.nmi_flag = true;
                log(LogCategory::Interrupts, LogLevel::Trace, || {
                    format!("NMI asserted at VBlank start, frame {}", self.frame_count)
                });
            }
            if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.in_vblank = false;
                self.nmi_flag = false;
                self.frame_count += 1;
                self.frame_odd = !self.frame_odd;
            }
        }
        self.in_hblank = self.cycle >= HBLANK_START_DOT;
    }

    /// Called by the system at the end of every scanline; visible lines are
    /// rendered into the framebuffer.
    pub fn end_scanline(&mut self, line: u16) {
        if (line as usize) < SCREEN_HEIGHT {
            self.render_scanline(line as usize);
        }
    }

    /// Called by the system after the last scanline of a frame.
    pub fn end_frame(&mut self) {
        log(LogCategory::PPU, LogLevel::Trace, || {
            format!("frame {} complete", self.frame_count)
        });
    }

    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn h_counter(&self) -> u16 {
        self.cycle
    }

    pub fn v_counter(&self) -> u16 {
        self.scanline
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_odd(&self) -> bool {
        self.frame_odd
    }

    pub fn in_vblank(&self) -> bool {
        self.in_vblank
    }

    pub fn in_hblank(&self) -> bool {
        self.in_hblank
    }

    pub fn nmi_flag(&self) -> bool {
        self.nmi_flag
    }

    // --- Scanline renderer ------------------------------------------------

    /// Compose one visible line: backdrop, then enabled backgrounds
    /// back-to-front in mode order, then sprites, then brightness.
    fn render_scanline(&mut self, line: usize) {
        let row_base = line * SCREEN_WIDTH * 4;

        if self.force_blank {
            for x in 0..SCREEN_WIDTH {
                let o = row_base + x * 4;
                self.framebuffer[o..o + 3].fill(0);
                self.framebuffer[o + 3] = 0xFF;
            }
            return;
        }

        let mut row = [self.cgram_color(0); SCREEN_WIDTH];

        if self.screen_mode == 7 {
            if self.bg_enabled[0] {
                for (x, slot) in row.iter_mut().enumerate() {
                    if let Some(index) = self.sample_mode7_pixel(x, line) {
                        *slot = self.cgram_color(index);
                    }
                }
            }
        } else {
            // (bg index, bits per pixel) back-to-front
            let layers: &[(usize, u8)] = match self.screen_mode {
                0 => &[(3, 2), (2, 2), (1, 2), (0, 2)],
                1 => &[(2, 2), (1, 4), (0, 4)],
                3 => &[(1, 4), (0, 8)],
                // Modes 2/4/5/6 approximate with the Mode-1 layer set
                _ => &[(1, 4), (0, 4)],
            };
            for &(bg, bpp) in layers {
                if !self.bg_enabled[bg] {
                    continue;
                }
                for (x, slot) in row.iter_mut().enumerate() {
                    if let Some(index) = self.sample_bg_pixel(bg, bpp, x, line) {
                        *slot = self.cgram_color(index);
                    }
                }
            }
        }

        if self.obj_enabled {
            self.render_sprites_line(line, &mut row);
        }

        for (x, &color) in row.iter().enumerate() {
            let o = row_base + x * 4;
            let (r, g, b) = self.color555_to_rgb(color);
            self.framebuffer[o] = r;
            self.framebuffer[o + 1] = g;
            self.framebuffer[o + 2] = b;
            self.framebuffer[o + 3] = 0xFF;
        }
    }

    /// Sample one background pixel; `None` is transparent (color 0).
    /// Returns a CGRAM index.
    fn sample_bg_pixel(&self, bg: usize, bpp: u8, x: usize, line: usize) -> Option<u8> {
        let layer = &self.bg[bg];
        let (map_w, map_h) = match layer.tilemap_size {
            0 => (32, 32),
            1 => (64, 32),
            2 => (32, 64),
            _ => (64, 64),
        };
        let tile_dim = if layer.tile_16 { 16 } else { 8 };

        let world_x = (x + layer.h_scroll as usize) % (map_w * tile_dim);
        let world_y = (line + layer.v_scroll as usize) % (map_h * tile_dim);
        let tile_x = world_x / tile_dim;
        let tile_y = world_y / tile_dim;

        // Tilemap entry: tttttttt tt + palette + priority + flips
        let entry_word = self.tilemap_offset(tile_x, tile_y, map_w) + layer.tilemap_base as usize;
        let lo = self.vram[(entry_word * 2) % VRAM_SIZE] as u16;
        let hi = self.vram[(entry_word * 2 + 1) % VRAM_SIZE] as u16;
        let entry = (hi << 8) | lo;

        let mut tile = (entry & 0x03FF) as usize;
        let palette = ((entry >> 10) & 0x07) as usize;
        let flip_x = entry & 0x4000 != 0;
        let flip_y = entry & 0x8000 != 0;

        let mut px = world_x % tile_dim;
        let mut py = world_y % tile_dim;
        if flip_x {
            px = tile_dim - 1 - px;
        }
        if flip_y {
            py = tile_dim - 1 - py;
        }
        if tile_dim == 16 {
            // A 16x16 tile is a 2x2 block of consecutive 8x8 characters
            tile += (px / 8) + (py / 8) * 16;
            px %= 8;
            py %= 8;
        }

        let color = self.decode_tile_pixel(layer.tile_base, tile, px, py, bpp);
        if color == 0 {
            return None;
        }

        // Palette group layout by depth; Mode 0 gives each BG its own block
        let index = match bpp {
            2 => {
                let mode0_offset = if self.screen_mode == 0 { bg * 32 } else { 0 };
                mode0_offset + palette * 4 + color as usize
            }
            4 => palette * 16 + color as usize,
            _ => color as usize, // 8bpp indexes CGRAM directly
        };
        Some(index as u8)
    }

    /// Word offset of a tilemap entry. Maps larger than 32x32 entries are
    /// arranged as 32x32 blocks of 1024 words each.
    fn tilemap_offset(&self, tile_x: usize, tile_y: usize, map_w: usize) -> usize {
        let block_x = tile_x / 32;
        let block_y = tile_y / 32;
        let block_index = if map_w == 64 {
            block_y * 2 + block_x
        } else {
            block_y
        };
        block_index * 0x400 + (tile_y % 32) * 32 + (tile_x % 32)
    }

    /// Decode one pixel from a planar tile. Bit planes come in pairs
    /// interleaved every 16 bytes: 2bpp tiles are 16 bytes, 4bpp 32, 8bpp 64.
    fn decode_tile_pixel(&self, tile_base: u16, tile: usize, px: usize, py: usize, bpp: u8) -> u8 {
        let bytes_per_tile = bpp as usize * 8;
        let base = (tile_base as usize * 2 + tile * bytes_per_tile + py * 2) % VRAM_SIZE;
        let bit = 7 - px;

        let mut color = 0u8;
        for pair in 0..(bpp as usize / 2) {
            let bp0 = self.vram[(base + pair * 16) % VRAM_SIZE];
            let bp1 = self.vram[(base + pair * 16 + 1) % VRAM_SIZE];
            color |= ((bp0 >> bit) & 1) << (pair * 2);
            color |= ((bp1 >> bit) & 1) << (pair * 2 + 1);
        }
        color
    }

    /// Mode 7: one affine-transformed background over a 1024x1024 plane.
    /// Tilemap low bytes name 8x8 tiles, character high bytes hold 8bpp
    /// pixels.
    fn sample_mode7_pixel(&self, x: usize, line: usize) -> Option<u8> {
        let mut sx = x as i32;
        let sy = line as i32;
        if self.m7_sel & 0x01 != 0 {
            sx = (SCREEN_WIDTH - 1) as i32 - sx;
        }
        let sy = if self.m7_sel & 0x02 != 0 {
            (SCREEN_HEIGHT - 1) as i32 - sy
        } else {
            sy
        };

        let h = self.bg[0].h_scroll as i32;
        let v = self.bg[0].v_scroll as i32;
        let cx = self.m7_center_x as i32;
        let cy = self.m7_center_y as i32;

        let ox = sx + h - cx;
        let oy = sy + v - cy;
        let vx = ((self.m7a as i32 * ox + self.m7b as i32 * oy) >> 8) + cx;
        let vy = ((self.m7c as i32 * ox + self.m7d as i32 * oy) >> 8) + cy;

        let outside = !(0..1024).contains(&vx) || !(0..1024).contains(&vy);
        let (wx, wy) = match self.m7_sel >> 6 {
            // 0/1: wrap around the 1024x1024 plane
            0 | 1 => ((vx & 0x3FF) as usize, (vy & 0x3FF) as usize),
            // 2: transparent outside
            2 if outside => return None,
            // 3: character 0 fills the outside
            _ => {
                if outside {
                    ((vx & 7) as usize, (vy & 7) as usize)
                } else {
                    (vx as usize, vy as usize)
                }
            }
        };

        let tile = if self.m7_sel >> 6 == 3 && outside {
            0
        } else {
            self.vram[(((wy / 8) * 128 + wx / 8) * 2) % VRAM_SIZE] as usize
        };
        let color = self.vram[((tile * 64 + (wy % 8) * 8 + (wx % 8)) * 2 + 1) % VRAM_SIZE];
        if color == 0 {
            None
        } else {
            Some(color)
        }
    }

    /// Overlay the sprites that intersect this line, in reverse index order
    /// so sprite 0 ends up on top. Sprites are 4bpp; palettes 0-7 map to
    /// CGRAM 128-255.
    fn render_sprites_line(&self, line: usize, row: &mut [u16; SCREEN_WIDTH]) {
        let (small, large) = self.sprite_sizes();

        for sprite in (0..128).rev() {
            let o = sprite * 4;
            let mut x = self.oam[o] as i32;
            let y = self.oam[o + 1] as i32;
            let tile = self.oam[o + 2] as usize;
            let attr = self.oam[o + 3];

            let high = (self.oam[0x200 + sprite / 4] >> ((sprite % 4) * 2)) & 0x03;
            if high & 0x01 != 0 {
                x += 256;
            }
            if x > 255 {
                x -= 512; // 9-bit X wraps into the left border
            }
            let (width, height) = if high & 0x02 != 0 { large } else { small };

            let sprite_row = line as i32 - y;
            if sprite_row < 0 || sprite_row >= height as i32 {
                continue;
            }
            if x + width as i32 <= 0 || x >= SCREEN_WIDTH as i32 {
                continue;
            }

            let palette = ((attr >> 1) & 0x07) as usize;
            let flip_x = attr & 0x40 != 0;
            let flip_y = attr & 0x80 != 0;

            let ty = if flip_y {
                height - 1 - sprite_row as usize
            } else {
                sprite_row as usize
            };

            // Character data: OBSEL name base, with the name-select gap for
            // the upper tile page (attribute bit 0)
            let mut base = (self.obj_name_base as usize) << 14;
            if attr & 0x01 != 0 {
                base += (self.obj_name_select as usize + 1) << 13;
            }

            for col in 0..width {
                let screen_x = x + col as i32;
                if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                let tx = if flip_x { width - 1 - col } else { col };
                // Sprite characters are arranged in rows of 16 tiles
                let char_index = (tile + (ty / 8) * 16 + tx / 8) & 0x1FF;
                let byte_base = (base + char_index * 32 + (ty % 8) * 2) % VRAM_SIZE;
                let bit = 7 - (tx % 8);

                let bp0 = self.vram[byte_base];
                let bp1 = self.vram[(byte_base + 1) % VRAM_SIZE];
                let bp2 = self.vram[(byte_base + 16) % VRAM_SIZE];
                let bp3 = self.vram[(byte_base + 17) % VRAM_SIZE];
                let color = ((bp0 >> bit) & 1)
                    | (((bp1 >> bit) & 1) << 1)
                    | (((bp2 >> bit) & 1) << 2)
                    | (((bp3 >> bit) & 1) << 3);
                if color == 0 {
                    continue;
                }

                let index = 128 + palette * 16 + color as usize;
                row[screen_x as usize] = self.cgram_color(index as u8);
            }
        }
    }

    /// Sprite (small, large) pixel sizes from OBSEL bits 5-7.
    fn sprite_sizes(&self) -> ((usize, usize), (usize, usize)) {
        match self.obj_size_select {
            0 => ((8, 8), (16, 16)),
            1 => ((8, 8), (32, 32)),
            2 => ((8, 8), (64, 64)),
            3 => ((16, 16), (32, 32)),
            4 => ((16, 16), (64, 64)),
            5 => ((32, 32), (64, 64)),
            6 => ((16, 32), (32, 64)),
            _ => ((16, 32), (32, 32)),
        }
    }

    /// 15-bit BGR word for a CGRAM entry.
    fn cgram_color(&self, index: u8) -> u16 {
        let a = index as usize * 2;
        u16::from_le_bytes([self.cgram[a], self.cgram[a + 1]])
    }

    /// Expand BGR555 to 8-bit channels, scaled by master brightness.
    fn color555_to_rgb(&self, color: u16) -> (u8, u8, u8) {
        let r = ((color & 0x001F) << 3) as u32;
        let g = (((color >> 5) & 0x001F) << 3) as u32;
        let b = (((color >> 10) & 0x001F) << 3) as u32;
        let scale = self.brightness as u32;
        (
            (r * scale / 15) as u8,
            (g * scale / 15) as u8,
            (b * scale / 15) as u8,
        )
    }

    // --- Snapshots ---------------------------------------------------------

    pub fn save_state(&self) -> serde_json::Value {
        serde_json::json!({
            "vram": crate::encode_bytes(&self.vram),
            "cgram": crate::encode_bytes(&self.cgram),
            "oam": crate::encode_bytes(&self.oam),
            "regs": crate::encode_bytes(&self.regs),
            "framebuffer": crate::encode_bytes(&self.framebuffer),
            "vram_addr": self.vram_addr.get(),
            "vram_increment": self.vram_increment,
            "vram_remap_mode": self.vram_remap_mode,
            "vram_read_buffer": self.vram_read_buffer.get(),
            "oam_addr": self.oam_addr.get(),
            "oam_first_write": self.oam_first_write,
            "oam_write_buffer": self.oam_write_buffer,
            "cgram_addr": self.cgram_addr.get(),
            "cgram_latch": self.cgram_latch,
            "cgram_latch_bit": self.cgram_latch_bit.get(),
            "m7": [self.m7a, self.m7b, self.m7c, self.m7d,
                   self.m7_center_x, self.m7_center_y],
            "m7_prev_write": self.m7_prev_write,
            "m7_sel": self.m7_sel,
            "mpy_result": self.mpy_result,
            "bg": self.bg.iter().map(|l| serde_json::json!({
                "tilemap_base": l.tilemap_base,
                "tilemap_size": l.tilemap_size,
                "tile_base": l.tile_base,
                "tile_16": l.tile_16,
                "h_scroll": l.h_scroll,
                "v_scroll": l.v_scroll,
            })).collect::<Vec<_>>(),
            "bg_prev_write": self.bg_prev_write,
            "bg_enabled": self.bg_enabled,
            "obj_enabled": self.obj_enabled,
            "sub_designation": self.sub_designation,
            "screen_mode": self.screen_mode,
            "bg3_priority": self.bg3_priority,
            "mosaic_size": self.mosaic_size,
            "mosaic_enabled": self.mosaic_enabled,
            "brightness": self.brightness,
            "force_blank": self.force_blank,
            "obj_size_select": self.obj_size_select,
            "obj_name_base": self.obj_name_base,
            "obj_name_select": self.obj_name_select,
            "ppu1_open_bus": self.ppu1_open_bus.get(),
            "ppu2_open_bus": self.ppu2_open_bus.get(),
            "cycle": self.cycle,
            "scanline": self.scanline,
            "frame_count": self.frame_count,
            "frame_odd": self.frame_odd,
            "in_vblank": self.in_vblank,
            "in_hblank": self.in_hblank,
            "nmi_flag": self.nmi_flag,
            "h_counter_latched": self.h_counter_latched.get(),
            "v_counter_latched": self.v_counter_latched.get(),
            "counters_latched": self.counters_latched.get(),
        })
    }

    pub fn load_state(&mut self, v: &serde_json::Value) -> Result<(), SnesError> {
        let vram = crate::decode_bytes(v, "vram", VRAM_SIZE)?;
        let cgram = crate::decode_bytes(v, "cgram", CGRAM_SIZE)?;
        let oam = crate::decode_bytes(v, "oam", OAM_SIZE)?;
        let regs = crate::decode_bytes(v, "regs", 0x40)?;
        let framebuffer = crate::decode_bytes(v, "framebuffer", FRAMEBUFFER_SIZE)?;

        self.vram = vram;
        self.cgram = cgram;
        self.oam = oam;
        self.regs.copy_from_slice(&regs);
        self.framebuffer = framebuffer;

        self.vram_addr.set(crate::snap_u64(v, "vram_addr")? as u16);
        self.vram_increment = crate::snap_u64(v, "vram_increment")? as u16;
        self.vram_remap_mode = crate::snap_u64(v, "vram_remap_mode")? as u8;
        self.vram_read_buffer
            .set(crate::snap_u64(v, "vram_read_buffer")? as u16);
        self.oam_addr.set(crate::snap_u64(v, "oam_addr")? as u16);
        self.oam_first_write = crate::snap_bool(v, "oam_first_write")?;
        self.oam_write_buffer = crate::snap_u64(v, "oam_write_buffer")? as u8;
        self.cgram_addr.set(crate::snap_u64(v, "cgram_addr")? as u8);
        self.cgram_latch = crate::snap_u64(v, "cgram_latch")? as u8;
        self.cgram_latch_bit
            .set(crate::snap_bool(v, "cgram_latch_bit")?);

        let m7 = v
            .get("m7")
            .and_then(|m| m.as_array())
            .filter(|m| m.len() == 6)
            .ok_or_else(|| SnesError::BadSnapshot("ppu m7 matrix malformed".into()))?;
        let m7: Vec<i16> = m7.iter().filter_map(|x| x.as_i64()).map(|x| x as i16).collect();
        if m7.len() != 6 {
            return Err(SnesError::BadSnapshot("ppu m7 matrix malformed".into()));
        }
        self.m7a = m7[0];
        self.m7b = m7[1];
        self.m7c = m7[2];
        self.m7d = m7[3];
        self.m7_center_x = m7[4];
        self.m7_center_y = m7[5];
        self.m7_prev_write = crate::snap_u64(v, "m7_prev_write")? as u8;
        self.m7_sel = crate::snap_u64(v, "m7_sel")? as u8;
        self.mpy_result = crate::snap_i64(v, "mpy_result")? as i32;

        let bg = v
            .get("bg")
            .and_then(|b| b.as_array())
            .filter(|b| b.len() == 4)
            .ok_or_else(|| SnesError::BadSnapshot("ppu bg layers malformed".into()))?;
        for (i, layer) in bg.iter().enumerate() {
            self.bg[i].tilemap_base = crate::snap_u64(layer, "tilemap_base")? as u16;
            self.bg[i].tilemap_size = crate::snap_u64(layer, "tilemap_size")? as u8;
            self.bg[i].tile_base = crate::snap_u64(layer, "tile_base")? as u16;
            self.bg[i].tile_16 = crate::snap_bool(layer, "tile_16")?;
            self.bg[i].h_scroll = crate::snap_u64(layer, "h_scroll")? as u16;
            self.bg[i].v_scroll = crate::snap_u64(layer, "v_scroll")? as u16;
        }
        self.bg_prev_write = crate::snap_u64(v, "bg_prev_write")? as u8;
        self.bg_enabled = crate::snap_bool_array4(v, "bg_enabled")?;
        self.obj_enabled = crate::snap_bool(v, "obj_enabled")?;
        self.sub_designation = crate::snap_u64(v, "sub_designation")? as u8;
        self.screen_mode = crate::snap_u64(v, "screen_mode")? as u8;
        self.bg3_priority = crate::snap_bool(v, "bg3_priority")?;
        self.mosaic_size = crate::snap_u64(v, "mosaic_size")? as u8;
        self.mosaic_enabled = crate::snap_bool_array4(v, "mosaic_enabled")?;
        self.brightness = crate::snap_u64(v, "brightness")? as u8;
        self.force_blank = crate::snap_bool(v, "force_blank")?;
        self.obj_size_select = crate::snap_u64(v, "obj_size_select")? as u8;
        self.obj_name_base = crate::snap_u64(v, "obj_name_base")? as u8;
        self.obj_name_select = crate::snap_u64(v, "obj_name_select")? as u8;
        self.ppu1_open_bus.set(crate::snap_u64(v, "ppu1_open_bus")? as u8);
        self.ppu2_open_bus.set(crate::snap_u64(v, "ppu2_open_bus")? as u8);
        self.cycle = crate::snap_u64(v, "cycle")? as u16;
        self.scanline = crate::snap_u64(v, "scanline")? as u16;
        self.frame_count = crate::snap_u64(v, "frame_count")?;
        self.frame_odd = crate::snap_bool(v, "frame_odd")?;
        self.in_vblank = crate::snap_bool(v, "in_vblank")?;
        self.in_hblank = crate::snap_bool(v, "in_hblank")?;
        self.nmi_flag = crate::snap_bool(v, "nmi_flag")?;
        self.h_counter_latched
            .set(crate::snap_u64(v, "h_counter_latched")? as u16);
        self.v_counter_latched
            .set(crate::snap_u64(v, "v_counter_latched")? as u16);
        self.counters_latched
            .set(crate::snap_bool(v, "counters_latched")?);

        Ok(())
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppu_creation() {
        let ppu = Ppu::new();
        assert_eq!(ppu.vram.len(), VRAM_SIZE);
        assert_eq!(ppu.cgram.len(), CGRAM_SIZE);
        assert_eq!(ppu.oam.len(), OAM_SIZE);
        assert!(ppu.force_blank, "screen starts blanked");
        assert_eq!(ppu.vram_increment, 1);
    }

    #[test]
    fn test_vram_word_roundtrip_through_registers() {
        let mut ppu = Ppu::new();

        // VMAIN=0: high-byte access triggers the increment by 1
        ppu.write_register(0x2115, 0x00);
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x10); // word $1000
        ppu.write_register(0x2118, 0xAA);
        ppu.write_register(0x2119, 0xBB);
        assert_eq!(ppu.vram[0x2000], 0xAA);
        assert_eq!(ppu.vram[0x2001], 0xBB);
        assert_eq!(ppu.vram_addr.get(), 0x1001);

        // Reading back: setting the address prefetches the word
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x10);
        assert_eq!(ppu.read_register(0x2139), 0xAA);
        assert_eq!(ppu.read_register(0x213A), 0xBB);
    }

    #[test]
    fn test_vmain_bit7_selects_increment_trigger_and_amount() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2115, 0x80); // low-byte trigger, step 32
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x01); // word $0100
        ppu.write_register(0x2118, 0x11);
        assert_eq!(ppu.vram_addr.get(), 0x0120, "low write stepped by 32");
        ppu.write_register(0x2119, 0x22);
        assert_eq!(ppu.vram_addr.get(), 0x0120, "high write does not step");
    }

    #[test]
    fn test_cgram_roundtrip_masks_high_bit() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2121, 0x01);
        ppu.write_register(0x2122, 0xFF);
        ppu.write_register(0x2122, 0xFF); // bit 7 masked on commit
        assert_eq!(ppu.cgram[2], 0xFF);
        assert_eq!(ppu.cgram[3], 0x7F);
        assert_eq!(ppu.cgram_addr.get(), 0x02);

        ppu.write_register(0x2121, 0x01);
        assert_eq!(ppu.read_register(0x213B), 0xFF);
        assert_eq!(ppu.read_register(0x213B), 0x7F);
        assert_eq!(ppu.cgram_addr.get(), 0x02, "read pair advances the cursor");
    }

    #[test]
    fn test_oam_word_commit_and_readback() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2102, 0x04);
        ppu.write_register(0x2103, 0x00);
        ppu.write_register(0x2104, 0x11); // buffered
        assert_eq!(ppu.oam[4], 0, "first write only buffers");
        ppu.write_register(0x2104, 0x22); // commits the pair
        assert_eq!(ppu.oam[4], 0x11);
        assert_eq!(ppu.oam[5], 0x22);

        ppu.write_register(0x2102, 0x04);
        ppu.write_register(0x2103, 0x00);
        assert_eq!(ppu.read_register(0x2138), 0x11);
        assert_eq!(ppu.read_register(0x2138), 0x22);
    }

    #[test]
    fn test_oam_high_table_byte_writes() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2102, 0x00);
        ppu.write_register(0x2103, 0x01); // bit 0 -> address $100 (words beyond the low table via increment)
        // Walk the cursor into the high table
        for _ in 0..0x100 {
            ppu.read_register(0x2138);
        }
        assert_eq!(ppu.oam_addr.get(), 0x200);
        ppu.write_register(0x2104, 0x5A);
        assert_eq!(ppu.oam[0x200], 0x5A, "high table takes direct bytes");
    }

    #[test]
    fn test_bg_scroll_two_write_latch() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x210D, 0x34);
        ppu.write_register(0x210D, 0x12);
        assert_eq!(ppu.bg[0].h_scroll, 0x0234, "10-bit scroll");

        ppu.write_register(0x2110, 0x78);
        ppu.write_register(0x2110, 0x01);
        assert_eq!(ppu.bg[1].v_scroll, 0x0178);
    }

    #[test]
    fn test_bg_config_decoding() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2105, 0x01); // Mode 1
        assert_eq!(ppu.screen_mode, 1);
        ppu.write_register(0x2107, 0x05); // base $0400 words, 64x32 entries
        assert_eq!(ppu.bg[0].tilemap_base, 0x0400);
        assert_eq!(ppu.bg[0].tilemap_size, 1);
        ppu.write_register(0x210B, 0x21);
        assert_eq!(ppu.bg[0].tile_base, 0x1000);
        assert_eq!(ppu.bg[1].tile_base, 0x2000);
        ppu.write_register(0x212C, 0x13);
        assert!(ppu.bg_enabled[0]);
        assert!(ppu.bg_enabled[1]);
        assert!(!ppu.bg_enabled[2]);
        assert!(ppu.obj_enabled);
    }

    #[test]
    fn test_mode7_multiply_result() {
        let mut ppu = Ppu::new();
        // M7A = $1234 (4660)
        ppu.write_register(0x211B, 0x34);
        ppu.write_register(0x211B, 0x12);
        // M7B = $FFFB; the multiplier uses the sign-extended low byte (-5)
        ppu.write_register(0x211C, 0xFB);
        ppu.write_register(0x211C, 0xFF);

        // 4660 * -5 = -23300 = $FFA4FC in 24 bits
        assert_eq!(ppu.read_register(0x2134), 0xFC);
        assert_eq!(ppu.read_register(0x2135), 0xA4);
        assert_eq!(ppu.read_register(0x2136), 0xFF);
    }

    #[test]
    fn test_counter_latching_and_stat78() {
        let mut ppu = Ppu::new();
        ppu.cycle = 0x150;
        ppu.scanline = 0x101;

        // First counter read auto-latches
        assert_eq!(ppu.read_register(0x213C), 0x50);
        assert_eq!(ppu.read_register(0x213D), 0x01);

        let stat78 = ppu.read_register(0x213F);
        assert_eq!(stat78 & 0x03, 0x03, "PPU version");
        assert_eq!(stat78 & 0x40, 0x40, "H counter MSB");
        assert_eq!(stat78 & 0x80, 0x80, "V counter MSB");
        assert!(!ppu.counters_latched.get(), "STAT78 clears the latch");
    }

    #[test]
    fn test_slhv_latches_counters() {
        let mut ppu = Ppu::new();
        ppu.cycle = 42;
        ppu.scanline = 99;
        ppu.read_register(0x2137);
        assert!(ppu.counters_latched.get());
        assert_eq!(ppu.h_counter_latched.get(), 42);
        assert_eq!(ppu.v_counter_latched.get(), 99);
    }

    #[test]
    fn test_stat77_reports_frame_parity() {
        let mut ppu = Ppu::new();
        assert_eq!(ppu.read_register(0x213E) & 0x10, 0);
        ppu.frame_odd = true;
        assert_eq!(ppu.read_register(0x213E) & 0x10, 0x10);
    }

    #[test]
    fn test_write_only_register_reads_open_bus() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2100, 0x8F);
        assert_eq!(ppu.read_register(0x2100), 0x8F, "PPU1 open bus echo");
    }

    #[test]
    fn test_timing_vblank_and_frame_wrap() {
        let mut ppu = Ppu::new();

        for _ in 0..DOTS_PER_SCANLINE {
            ppu.step();
        }
        assert_eq!(ppu.scanline, 1);
        assert_eq!(ppu.cycle, 0);
        assert!(!ppu.in_vblank);

        // Run to the start of VBlank
        while ppu.scanline != VBLANK_START_LINE {
            ppu.step();
        }
        assert!(ppu.in_vblank);
        assert!(ppu.nmi_flag);

        // Finish the frame
        let total = DOTS_PER_SCANLINE as u64 * SCANLINES_PER_FRAME as u64;
        let mut ticks = ppu.scanline as u64 * DOTS_PER_SCANLINE as u64 + ppu.cycle as u64;
        while ticks < total {
            ppu.step();
            ticks += 1;
        }
        assert_eq!(ppu.scanline, 0);
        assert!(!ppu.in_vblank);
        assert_eq!(ppu.frame_count, 1);
        assert!(ppu.frame_odd);
    }

    #[test]
    fn test_hblank_from_dot_274() {
        let mut ppu = Ppu::new();
        for _ in 0..273 {
            ppu.step();
        }
        assert!(!ppu.in_hblank);
        ppu.step();
        assert!(ppu.in_hblank);
    }

    #[test]
    fn test_force_blank_renders_black() {
        let mut ppu = Ppu::new();
        ppu.end_scanline(0);
        assert_eq!(&ppu.framebuffer[0..4], &[0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_mode1_bg1_scanline_render() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2100, 0x0F); // full brightness, no blank
        ppu.write_register(0x2105, 0x01); // Mode 1
        ppu.write_register(0x2107, 0x04); // BG1 tilemap at word $0400
        ppu.write_register(0x210B, 0x00); // BG1 tiles at word $0000
        ppu.write_register(0x212C, 0x01); // BG1 on

        // Palette color 1 = max red ($001F)
        ppu.write_register(0x2121, 0x01);
        ppu.write_register(0x2122, 0x1F);
        ppu.write_register(0x2122, 0x00);

        // Tile 0: plane 0 all ones -> color 1 everywhere
        ppu.write_register(0x2115, 0x00);
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x00);
        for _ in 0..8 {
            ppu.write_register(0x2118, 0xFF);
            ppu.write_register(0x2119, 0x00);
        }
        // Tilemap entry 0 at word $0400 is already zero: tile 0, palette 0

        ppu.end_scanline(0);
        assert_eq!(&ppu.framebuffer[0..4], &[0xF8, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn test_backdrop_fills_when_no_layer_enabled() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2100, 0x0F);
        // Backdrop (CGRAM entry 0) = max blue ($7C00)
        ppu.write_register(0x2121, 0x00);
        ppu.write_register(0x2122, 0x00);
        ppu.write_register(0x2122, 0x7C);

        ppu.end_scanline(10);
        let o = 10 * SCREEN_WIDTH * 4;
        assert_eq!(&ppu.framebuffer[o..o + 4], &[0x00, 0x00, 0xF8, 0xFF]);
    }

    #[test]
    fn test_brightness_scales_output() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2100, 0x05); // brightness 5 of 15
        ppu.write_register(0x2121, 0x00);
        ppu.write_register(0x2122, 0x1F); // red backdrop
        ppu.write_register(0x2122, 0x00);

        ppu.end_scanline(0);
        assert_eq!(ppu.framebuffer[0], (0xF8 * 5 / 15) as u8);
    }

    #[test]
    fn test_save_load_state_roundtrip() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2105, 0x07);
        ppu.write_register(0x211B, 0x34);
        ppu.write_register(0x211B, 0x12);
        ppu.write_register(0x2116, 0x42);
        ppu.vram[100] = 0xAB;
        ppu.step();

        let state = ppu.save_state();
        let mut restored = Ppu::new();
        restored.load_state(&state).unwrap();
        assert_eq!(restored.save_state(), state);
        assert_eq!(restored.screen_mode, 7);
        assert_eq!(restored.m7a, 0x1234);
        assert_eq!(restored.vram[100], 0xAB);
    }

    #[test]
    fn test_load_state_rejects_bad_lengths() {
        let mut ppu = Ppu::new();
        let mut state = ppu.save_state();
        state["vram"] = serde_json::json!(crate::encode_bytes(&[0u8; 16]));
        assert!(matches!(
            ppu.load_state(&state),
            Err(SnesError::BadSnapshot(_))
        ));
    }
}
