//! Centralized logging for the emulator core.
//!
//! A process-global [`LogConfig`] holds one level per component category plus
//! a global fallback, all stored in atomics so hot emulation paths can check
//! them without locking. Messages are built lazily: [`log`] takes a closure
//! that is only evaluated when the category/level combination is enabled.
//!
//! Configuration comes from the `SNES_LOG` environment variable, parsed once
//! at first use:
//!
//! ```text
//! SNES_LOG=info                  # global level
//! SNES_LOG=warn,cpu=debug        # global level plus per-category overrides
//! SNES_LOG=ppu=trace,stubs=off
//! ```
//!
//! Output goes to stderr.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for different emulator components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// CPU execution (unknown opcodes, traps)
    CPU,
    /// Bus/memory access and ROM loading
    Bus,
    /// PPU register traffic and rendering
    PPU,
    /// APU mailbox and timers
    APU,
    /// Interrupt generation (NMI at VBlank)
    Interrupts,
    /// Recognised-but-unimplemented features
    Stubs,
}

const NUM_CATEGORIES: usize = 6;

impl LogCategory {
    fn index(self) -> usize {
        match self {
            LogCategory::CPU => 0,
            LogCategory::Bus => 1,
            LogCategory::PPU => 2,
            LogCategory::APU => 3,
            LogCategory::Interrupts => 4,
            LogCategory::Stubs => 5,
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Some(LogCategory::CPU),
            "bus" => Some(LogCategory::Bus),
            "ppu" => Some(LogCategory::PPU),
            "apu" => Some(LogCategory::APU),
            "interrupts" | "int" => Some(LogCategory::Interrupts),
            "stubs" => Some(LogCategory::Stubs),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogCategory::CPU => "CPU",
            LogCategory::Bus => "Bus",
            LogCategory::PPU => "PPU",
            LogCategory::APU => "APU",
            LogCategory::Interrupts => "Int",
            LogCategory::Stubs => "Stub",
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    /// Global level; categories without an explicit level fall back to this.
    global_level: AtomicU8,
    /// Per-category levels; Off means "use global".
    category_levels: [AtomicU8; NUM_CATEGORIES],
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: std::array::from_fn(|_| AtomicU8::new(LogLevel::Off as u8)),
        }
    }

    /// Get the global singleton, initialised from `SNES_LOG` on first use.
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let config = LogConfig::new();
            if let Ok(spec) = std::env::var("SNES_LOG") {
                config.apply_spec(&spec);
            }
            config
        })
    }

    /// Apply a `SNES_LOG`-style spec: comma-separated `level` or
    /// `category=level` entries. Unknown entries are ignored.
    pub fn apply_spec(&self, spec: &str) {
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((cat, level)) => {
                    if let (Some(cat), Some(level)) =
                        (LogCategory::from_name(cat.trim()), LogLevel::from_str(level.trim()))
                    {
                        self.set_level(cat, level);
                    }
                }
                None => {
                    if let Some(level) = LogLevel::from_str(part) {
                        self.set_global_level(level);
                    }
                }
            }
        }
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A message passes if the category-specific level allows it, or, when no
    /// category level is set, if the global level does.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all levels to Off.
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for cat_level in &self.category_levels {
            cat_level.store(LogLevel::Off as u8, Ordering::Relaxed);
        }
    }
}

/// Log a message with the specified category and level.
///
/// The message closure is only evaluated when logging is enabled for the
/// category/level combination, so call sites on hot paths cost one relaxed
/// atomic load when disabled.
///
/// ```rust
/// use emu_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::CPU, LogLevel::Debug, || {
///     format!("BRK at PC={:04X}", 0x1234)
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        eprintln!("[{}] {}", category.label(), message_fn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("Info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("4"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("invalid"), None);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Error);
        config.set_level(LogCategory::CPU, LogLevel::Debug);

        assert!(config.should_log(LogCategory::CPU, LogLevel::Debug));
        assert!(!config.should_log(LogCategory::Bus, LogLevel::Warn));
        assert!(config.should_log(LogCategory::Bus, LogLevel::Error));
    }

    #[test]
    fn test_apply_spec_global_and_category() {
        let config = LogConfig::new();
        config.apply_spec("warn,ppu=trace");

        assert_eq!(config.get_global_level(), LogLevel::Warn);
        assert_eq!(config.get_level(LogCategory::PPU), LogLevel::Trace);
        assert!(config.should_log(LogCategory::PPU, LogLevel::Trace));
        assert!(config.should_log(LogCategory::APU, LogLevel::Warn));
        assert!(!config.should_log(LogCategory::APU, LogLevel::Info));
    }

    #[test]
    fn test_apply_spec_ignores_garbage() {
        let config = LogConfig::new();
        config.apply_spec("bogus,nocategory=invalid, ,cpu=info");

        assert_eq!(config.get_global_level(), LogLevel::Off);
        assert_eq!(config.get_level(LogCategory::CPU), LogLevel::Info);
    }

    #[test]
    fn test_reset() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        config.set_level(LogCategory::Bus, LogLevel::Info);

        config.reset();

        assert_eq!(config.get_global_level(), LogLevel::Off);
        assert_eq!(config.get_level(LogCategory::Bus), LogLevel::Off);
    }
}
