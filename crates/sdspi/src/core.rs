//! Core emulator API for the SD card interface.
//!
//! `EmulatorCore` owns the bus-visible device state together with the CPU clock. Callers
//! drive it the way guest code would: advance the clock by the cycles their instructions
//! take, and issue register reads and writes at the current clock value.

use crate::mmio::EmulatorState;
use crate::sdcard::{SdCard, SdCardError};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Default CPU ticks consumed by one busy-flag poll (`LDA abs` + `BMI`)
pub const DEFAULT_TICKS_PER_POLL: u64 = 6;

/// Configuration for the emulator
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Optional SD card image path
    pub sd_card: Option<PathBuf>,
    /// CPU ticks that elapse between two polls of the SPI control register
    pub ticks_per_poll: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            sd_card: None,
            ticks_per_poll: DEFAULT_TICKS_PER_POLL,
        }
    }
}

/// Errors that can occur while creating the emulator
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("failed to attach SD card: {0}")]
    SdCard(#[from] SdCardError),
}

/// Core emulator
#[derive(Debug)]
pub struct EmulatorCore {
    state: EmulatorState,
    clock: u64,
    ticks_per_poll: u64,
    start_time: Instant,
}

impl EmulatorCore {
    /// Create a new emulator, attaching the configured SD card image
    pub fn new(config: EmulatorConfig) -> Result<Self, EmulatorError> {
        let mut state = EmulatorState::new();
        if let Some(path) = &config.sd_card {
            info!("Attaching SD card image: {:?}", path);
            state.sdcard.set_file(path)?;
        }

        Ok(Self {
            state,
            clock: 0,
            ticks_per_poll: config.ticks_per_poll.max(1),
            start_time: Instant::now(),
        })
    }

    /// Advance the CPU clock
    pub fn advance(&mut self, ticks: u64) {
        self.clock = self.clock.saturating_add(ticks);
    }

    /// Current CPU clock value
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn ticks_per_poll(&self) -> u64 {
        self.ticks_per_poll
    }

    /// Guest bus read
    pub fn bus_read(&mut self, addr: u16) -> u8 {
        self.state.read(addr, self.clock)
    }

    /// Guest bus write
    pub fn bus_write(&mut self, addr: u16, value: u8) {
        self.state.write(addr, value, self.clock)
    }

    /// Debugger read, no side effects
    pub fn bus_peek(&self, addr: u16) -> u8 {
        self.state.peek(addr)
    }

    pub fn state(&self) -> &EmulatorState {
        &self.state
    }

    pub fn sdcard(&self) -> &SdCard {
        &self.state.sdcard
    }

    pub fn sdcard_mut(&mut self) -> &mut SdCard {
        &mut self.state.sdcard
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Detach the card so its image is flushed
    pub fn shutdown(&mut self) {
        self.state.sdcard.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdspi_hw::mmio::spi::{BASE, control};

    #[test]
    fn missing_image_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmulatorConfig {
            sd_card: Some(dir.path().join("nope.img")),
            ..Default::default()
        };
        let err = EmulatorCore::new(config).unwrap_err();
        assert!(matches!(err, EmulatorError::SdCard(SdCardError::Open { .. })));
    }

    #[test]
    fn register_accesses_see_the_core_clock() {
        let mut core = EmulatorCore::new(EmulatorConfig::default()).unwrap();
        core.bus_write(BASE + 1, control::SELECT);
        core.bus_write(BASE, 0xFF);
        assert_eq!(core.bus_read(BASE + 1) & control::BUSY, control::BUSY);

        core.advance(8);
        assert_eq!(core.bus_read(BASE + 1) & control::BUSY, 0);
        // No card attached: the bus floats high
        assert_eq!(core.bus_read(BASE), 0xFF);
        assert_eq!(core.clock(), 8);
    }
}
