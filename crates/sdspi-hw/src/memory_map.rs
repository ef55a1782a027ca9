//! # References
//! - <https://github.com/X16Community/x16-docs/blob/master/X16%20Reference%20-%2008%20-%20Memory%20Map.md>

/// I/O area shared by all memory-mapped peripherals
///
/// Reference: <https://github.com/X16Community/x16-docs/blob/master/X16%20Reference%20-%2008%20-%20Memory%20Map.md#io-area>
pub mod io {
    /// I/O area base address
    pub const BASE: u16 = 0x9F00;
    /// I/O area end address (exclusive)
    pub const END: u16 = 0xA000;
}
