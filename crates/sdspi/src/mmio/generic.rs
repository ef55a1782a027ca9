//! Generic MMIO handler for the rest of the I/O area.
//!
//! Reads return zero and writes are dropped. The video, audio and VIA chips that share
//! the I/O area with the SPI controller are not modelled.

use tracing::{instrument, trace};

/// Generic MMIO read handler - returns zero
#[instrument(level = "trace")]
pub fn read_handler(addr: u16) -> u8 {
    trace!("Generic MMIO read: addr={:#06X}", addr);
    0
}

/// Generic MMIO write handler - ignores writes
#[instrument(level = "trace")]
pub fn write_handler(addr: u16, value: u8) {
    trace!("Generic MMIO write: addr={:#06X}, value={:#04X}", addr, value);
}
