//! SPI controller MMIO register handling.
//!
//! The controller exposes two registers at 0x9F3E-0x9F3F. Writing the data register
//! shifts a byte out to the SD card while shifting the card's reply in; the transfer takes
//! eight bit-times, during which the busy flag in the control register is set.
//!
//! There is no periodic tick for this device. Instead every register access first catches
//! up with the CPU clock, converting the ticks elapsed since the previous access into
//! transfer progress. Guest software polls the busy flag before trusting the data register,
//! so only the observable completion point has to be right.
//!
//! # References
//! - [VERA Programmer's Reference, SPI controller](https://github.com/X16Community/x16-docs/blob/master/X16%20Reference%20-%2009%20-%20VERA%20Programmer's%20Reference.md#spi-controller)

use crate::sdcard::SdCard;
use sdspi_hw::mmio::spi::{control, registers as reg};
use sdspi_hw::specs::spi::{FILL_BYTE, TICKS_PER_BYTE};
use tracing::{debug, trace, warn};

/// SPI controller state
#[derive(Debug)]
pub struct SpiState {
    // ========================================================================
    // REGISTER STATE
    // ========================================================================
    /// Chip-select output (CONTROL bit 0)
    pub chip_select: bool,
    /// Auto-transmit on data reads (CONTROL bit 2)
    pub auto_transmit: bool,
    /// Slow clock select (CONTROL bit 1); stored for read-back only
    pub slow_clock: bool,
    /// Transfer in flight (CONTROL bit 7)
    pub busy: bool,

    /// Byte being shifted out
    pub tx_byte: u8,
    /// Last byte shifted in (DATA read value)
    pub rx_byte: u8,

    // ========================================================================
    // INTERNAL STATE
    // ========================================================================
    /// Ticks accumulated toward completing the current transfer
    elapsed_ticks: u64,

    /// Clock value seen at the last catch-up
    last_clock: u64,
}

impl SpiState {
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            chip_select: false,
            auto_transmit: false,
            slow_clock: false,
            busy: false,
            tx_byte: FILL_BYTE,
            rx_byte: FILL_BYTE,
            elapsed_ticks: 0,
            last_clock: 0,
        }
    }

    /// Advance an in-flight transfer by `ticks`, handing the byte to the card on completion
    pub fn step(&mut self, ticks: u64, card: &mut SdCard) {
        if !self.busy {
            return;
        }

        self.elapsed_ticks = self.elapsed_ticks.saturating_add(ticks);
        if self.elapsed_ticks >= TICKS_PER_BYTE {
            self.busy = false;
            self.rx_byte = card.handle_byte(self.tx_byte);
            trace!(
                "SPI transfer complete: sent={:#04X}, received={:#04X}",
                self.tx_byte, self.rx_byte
            );
        }
    }

    /// Bring the transfer up to date with the clock value `now`
    pub fn catch_up(&mut self, now: u64, card: &mut SdCard) {
        let ticks = now.saturating_sub(self.last_clock);
        self.last_clock = now;
        self.step(ticks, card);
    }

    /// Handle a write to an SPI register
    pub fn write(&mut self, offset: u16, value: u8, now: u64, card: &mut SdCard) {
        self.catch_up(now, card);
        trace!("SPI register write: offset={:#X}, value={:#04X}", offset, value);

        match offset {
            reg::DATA => {
                if self.chip_select && !self.busy {
                    self.start_transfer(value);
                } else {
                    debug!(
                        "SPI data write ignored (select={}, busy={})",
                        self.chip_select, self.busy
                    );
                }
            }
            reg::CONTROL => {
                let select = value & control::SELECT != 0;
                if select != self.chip_select {
                    self.chip_select = select;
                    card.select(select);
                }
                self.slow_clock = value & control::SLOW_CLOCK != 0;
                self.auto_transmit = value & control::AUTO_TX != 0;
            }
            _ => {
                warn!(
                    "Unknown SPI register write: offset={:#X}, value={:#04X}",
                    offset, value
                );
            }
        }
    }

    /// Handle a read from an SPI register
    pub fn read(&mut self, offset: u16, now: u64, card: &mut SdCard) -> u8 {
        self.catch_up(now, card);
        trace!("SPI register read: offset={:#X}", offset);

        match offset {
            reg::DATA => {
                let value = self.rx_byte;
                if self.auto_transmit && self.chip_select && !self.busy {
                    self.start_transfer(FILL_BYTE);
                }
                value
            }
            reg::CONTROL => self.control_value(),
            _ => {
                warn!("Unknown SPI register read: offset={:#X}", offset);
                0
            }
        }
    }

    /// Read a register without catching up or triggering auto-transmit
    pub fn peek(&self, offset: u16) -> u8 {
        match offset {
            reg::DATA => self.rx_byte,
            reg::CONTROL => self.control_value(),
            _ => 0,
        }
    }

    fn control_value(&self) -> u8 {
        let mut value = 0;
        if self.busy {
            value |= control::BUSY;
        }
        if self.auto_transmit {
            value |= control::AUTO_TX;
        }
        if self.slow_clock {
            value |= control::SLOW_CLOCK;
        }
        if self.chip_select {
            value |= control::SELECT;
        }
        value
    }

    fn start_transfer(&mut self, byte: u8) {
        self.tx_byte = byte;
        self.busy = true;
        self.elapsed_ticks = 0;
    }
}
