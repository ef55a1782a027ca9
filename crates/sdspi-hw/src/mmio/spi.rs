//! # References
//! - <https://github.com/X16Community/x16-docs/blob/master/X16%20Reference%20-%2009%20-%20VERA%20Programmer's%20Reference.md#spi-controller>

/// SPI MMIO region base address
pub const BASE: u16 = 0x9F3E;

/// SPI MMIO region end address (exclusive)
pub const END: u16 = 0x9F40;

/// SPI register offsets (relative to `BASE`)
pub mod registers {
    /// Data register: write starts a transfer, read returns the last received byte
    pub const DATA: u16 = 0x0;

    /// Control register
    pub const CONTROL: u16 = 0x1;
}

/// Control register bit flags
pub mod control {
    /// Chip-select line for the SD card
    pub const SELECT: u8 = 1 << 0;
    /// Slow clock select (accepted and ignored)
    pub const SLOW_CLOCK: u8 = 1 << 1;
    /// Auto-transmit: reading DATA clocks out a fill byte
    pub const AUTO_TX: u8 = 1 << 2;
    /// Transfer in flight (read-only)
    pub const BUSY: u8 = 1 << 7;
}
