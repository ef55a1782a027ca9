//! Memory-Mapped I/O (MMIO) handling for the SD card interface.
//!
//! This module routes guest bus accesses in the I/O area to the device that owns them.
//! Only the VERA SPI controller has a model; the rest of the I/O area is handled by the
//! generic stub.
//!
//! # Memory Map
//! According to the X16 reference memory map:
//! - `0x9F00-0xA000`: I/O area
//! - `0x9F3E`: SPI data register
//! - `0x9F3F`: SPI control register

use crate::sdcard::SdCard;
use sdspi_hw::{memory_map, mmio as hw_mmio};
use tracing::{instrument, trace};

pub mod generic;
pub mod spi;

pub use spi::SpiState;

const IO_BASE: u16 = memory_map::io::BASE;
const IO_END: u16 = memory_map::io::END;
const SPI_MMIO_BASE: u16 = hw_mmio::spi::BASE;
const SPI_MMIO_END: u16 = hw_mmio::spi::END;

/// Device state reachable from the bus
#[derive(Debug)]
pub struct EmulatorState {
    pub spi: SpiState,
    pub sdcard: SdCard,
}

impl EmulatorState {
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            spi: SpiState::new(),
            sdcard: SdCard::new(),
        }
    }

    /// Bus read at absolute address `addr`, with the CPU clock at `now`
    #[instrument(level = "trace", skip(self))]
    pub fn read(&mut self, addr: u16, now: u64) -> u8 {
        match addr {
            SPI_MMIO_BASE..SPI_MMIO_END => {
                self.spi.read(addr - SPI_MMIO_BASE, now, &mut self.sdcard)
            }
            IO_BASE..IO_END => generic::read_handler(addr),
            _ => {
                trace!("Read outside I/O area: addr={:#06X}", addr);
                0
            }
        }
    }

    /// Bus write at absolute address `addr`, with the CPU clock at `now`
    #[instrument(level = "trace", skip(self))]
    pub fn write(&mut self, addr: u16, value: u8, now: u64) {
        match addr {
            SPI_MMIO_BASE..SPI_MMIO_END => {
                self.spi
                    .write(addr - SPI_MMIO_BASE, value, now, &mut self.sdcard)
            }
            IO_BASE..IO_END => generic::write_handler(addr, value),
            _ => trace!("Write outside I/O area: addr={:#06X}", addr),
        }
    }

    /// Side-effect free read for debuggers and monitors
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            SPI_MMIO_BASE..SPI_MMIO_END => self.spi.peek(addr - SPI_MMIO_BASE),
            _ => 0,
        }
    }
}
