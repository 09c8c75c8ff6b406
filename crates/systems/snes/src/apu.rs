//! SNES APU stub.
//!
//! The real S-SMP/S-DSP pair runs its own SPC700 program; this stub keeps the
//! CPU-visible surface alive instead: four mailbox ports, the internal timer
//! cadence, and an inert 64KB of APU RAM plus the DSP register shadow so a
//! full implementation can take over the state later. No SPC700 execution,
//! no sample synthesis, no interrupt delivery.

use emu_core::types::AudioSample;

pub const APU_RAM_SIZE: usize = 0x10000;
pub const DSP_REG_COUNT: usize = 128;

/// Timers 0/1 tick once per 125 internal cycles, timer 2 once per 16000.
const TIMER01_DIVIDER: u64 = 125;
const TIMER2_DIVIDER: u64 = 16000;

/// One internal timer: counts up to `target` and rolls over.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    pub counter: u8,
    pub target: u8,
    pub enabled: bool,
}

impl Timer {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        self.counter = self.counter.wrapping_add(1);
        if self.target != 0 && self.counter >= self.target {
            self.counter = 0;
        }
    }
}

/// Minimal SNES APU: mailbox ports plus timer plumbing.
pub struct Apu {
    /// Bytes the CPU wrote; the (absent) SPC700 program would read these.
    pub cpu_to_apu: [u8; 4],
    /// Bytes the CPU reads back.
    pub apu_to_cpu: [u8; 4],
    /// 64KB APU RAM (inert in this stub)
    pub ram: Vec<u8>,
    /// DSP register shadow
    pub dsp_regs: [u8; DSP_REG_COUNT],
    pub timers: [Timer; 3],
    /// Internal cycle counter
    pub cycles: u64,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            cpu_to_apu: [0; 4],
            apu_to_cpu: [0; 4],
            ram: vec![0; APU_RAM_SIZE],
            dsp_regs: [0; DSP_REG_COUNT],
            timers: [Timer::default(); 3],
            cycles: 0,
        }
    }

    pub fn reset(&mut self) {
        self.cpu_to_apu = [0; 4];
        self.apu_to_cpu = [0; 4];
        self.ram.iter_mut().for_each(|b| *b = 0);
        self.dsp_regs = [0; DSP_REG_COUNT];
        self.timers = [Timer::default(); 3];
        self.cycles = 0;
    }

    /// Advance one internal cycle.
    pub fn step(&mut self) {
        self.cycles += 1;
        if self.cycles % TIMER01_DIVIDER == 0 {
            self.timers[0].tick();
            self.timers[1].tick();
        }
        if self.cycles % TIMER2_DIVIDER == 0 {
            self.timers[2].tick();
        }
    }

    /// CPU read of mailbox port 0-3: observes the APU-side byte.
    pub fn read_port(&self, port: usize) -> u8 {
        self.apu_to_cpu[port & 3]
    }

    /// CPU write to mailbox port 0-3: deposits on the CPU side.
    pub fn write_port(&mut self, port: usize, val: u8) {
        self.cpu_to_apu[port & 3] = val;
    }

    /// Audio output stub for the external device: silence, at the requested
    /// sample count, until DSP synthesis exists.
    pub fn generate_samples(&mut self, count: usize) -> Vec<AudioSample> {
        vec![0; count]
    }

    pub fn save_state(&self) -> serde_json::Value {
        serde_json::json!({
            "cpu_to_apu": self.cpu_to_apu,
            "apu_to_cpu": self.apu_to_cpu,
            "ram": crate::encode_bytes(&self.ram),
            "dsp_regs": crate::encode_bytes(&self.dsp_regs),
            "timers": self.timers.iter().map(|t| serde_json::json!({
                "counter": t.counter,
                "target": t.target,
                "enabled": t.enabled,
            })).collect::<Vec<_>>(),
            "cycles": self.cycles,
        })
    }

    pub fn load_state(&mut self, v: &serde_json::Value) -> Result<(), crate::SnesError> {
        let ram = crate::decode_bytes(v, "ram", APU_RAM_SIZE)?;
        let dsp = crate::decode_bytes(v, "dsp_regs", DSP_REG_COUNT)?;
        let cpu_to_apu = crate::snap_byte_array4(v, "cpu_to_apu")?;
        let apu_to_cpu = crate::snap_byte_array4(v, "apu_to_cpu")?;
        let timers = v
            .get("timers")
            .and_then(|t| t.as_array())
            .filter(|t| t.len() == 3)
            .ok_or_else(|| crate::SnesError::BadSnapshot("apu timers malformed".into()))?;

        let mut parsed = [Timer::default(); 3];
        for (i, t) in timers.iter().enumerate() {
            parsed[i] = Timer {
                counter: crate::snap_u64(t, "counter")? as u8,
                target: crate::snap_u64(t, "target")? as u8,
                enabled: crate::snap_bool(t, "enabled")?,
            };
        }

        self.ram = ram;
        self.dsp_regs.copy_from_slice(&dsp);
        self.cpu_to_apu = cpu_to_apu;
        self.apu_to_cpu = apu_to_cpu;
        self.timers = parsed;
        self.cycles = crate::snap_u64(v, "cycles")?;
        Ok(())
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_symmetry() {
        let mut apu = Apu::new();
        apu.write_port(2, 0xCC);
        assert_eq!(apu.cpu_to_apu[2], 0xCC);
        assert_eq!(apu.read_port(2), 0x00, "CPU reads observe the other side");

        apu.apu_to_cpu[2] = 0xAA;
        assert_eq!(apu.read_port(2), 0xAA);
    }

    #[test]
    fn test_port_index_masks_to_four() {
        let mut apu = Apu::new();
        apu.write_port(7, 0x12);
        assert_eq!(apu.cpu_to_apu[3], 0x12);
    }

    #[test]
    fn test_timer01_cadence() {
        let mut apu = Apu::new();
        apu.timers[0].enabled = true;
        apu.timers[1].enabled = true;
        for _ in 0..125 {
            apu.step();
        }
        assert_eq!(apu.timers[0].counter, 1);
        assert_eq!(apu.timers[1].counter, 1);
        assert_eq!(apu.timers[2].counter, 0);
    }

    #[test]
    fn test_timer2_cadence() {
        let mut apu = Apu::new();
        apu.timers[2].enabled = true;
        for _ in 0..16000 {
            apu.step();
        }
        assert_eq!(apu.timers[2].counter, 1);
    }

    #[test]
    fn test_timer_rolls_over_at_target() {
        let mut apu = Apu::new();
        apu.timers[0].enabled = true;
        apu.timers[0].target = 3;
        for _ in 0..125 * 3 {
            apu.step();
        }
        assert_eq!(apu.timers[0].counter, 0, "rolled over at target");
    }

    #[test]
    fn test_disabled_timer_holds() {
        let mut apu = Apu::new();
        for _ in 0..125 {
            apu.step();
        }
        assert_eq!(apu.timers[0].counter, 0);
    }

    #[test]
    fn test_samples_are_silent() {
        let mut apu = Apu::new();
        let samples = apu.generate_samples(64);
        assert_eq!(samples.len(), 64);
        assert!(samples.iter().all(|&s| s == 0));
    }
}
