//! Core emulator primitives and traits.

pub mod cpu_65c816;
pub mod logging;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// A rendered frame: RGBA8, row-major, no padding, alpha always 255.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        /// `width * height * 4` bytes, R G B A per pixel.
        pub pixels: Vec<u8>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            }
        }
    }

    pub type AudioSample = i16;
}

use serde_json::Value;

/// A CPU-like component that can be stepped; returns cycles consumed.
pub trait Cpu {
    fn reset(&mut self);
    fn step(&mut self) -> u32;
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Emulate until a frame is produced and return a framebuffer.
    fn step_frame(&mut self) -> Result<types::Frame, Self::Error>;

    /// Return a JSON-serializable save state.
    fn save_state(&self) -> Value;

    /// Load a JSON save state. A snapshot whose contents disagree with
    /// component expectations is refused without being partially applied.
    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_initialization() {
        let f = types::Frame::new(10, 10);
        assert_eq!(f.pixels.len(), 400);
        assert_eq!(f.width, 10);
        assert_eq!(f.height, 10);
        assert!(f.pixels.iter().all(|&b| b == 0));
    }
}
