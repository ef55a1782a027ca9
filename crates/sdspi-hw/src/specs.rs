/// SPI bus timing specifications
pub mod spi {
    /// Bits shifted per transferred byte
    pub const BITS_PER_BYTE: u64 = 8;

    /// CPU clock ticks per shifted bit
    ///
    /// Note: the VERA SPI controller also has a slow (390 kHz) mode for card bring-up;
    /// only the fast clock is modelled.
    pub const TICKS_PER_BIT: u64 = 1;

    /// CPU clock ticks needed to shift one whole byte
    pub const TICKS_PER_BYTE: u64 = BITS_PER_BYTE * TICKS_PER_BIT;

    /// Byte driven on an idle bus (MOSI/MISO held high)
    pub const FILL_BYTE: u8 = 0xFF;
}
