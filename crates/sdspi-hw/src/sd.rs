//! SD/MMC SPI-mode protocol constants.
//!
//! # References
//! - SD Specifications Part 1, Physical Layer Simplified Specification, chapter 7 (SPI Mode)
//! - <http://elm-chan.org/docs/mmc/mmc_e.html>

/// Size of a data block in bytes (fixed for SDHC/SDXC, and the only size modelled)
pub const BLOCK_SIZE: usize = 512;

/// Command frame layout
pub mod frame {
    /// Bytes in a command frame: command byte, 4 argument bytes, CRC
    pub const COMMAND_LEN: usize = 6;

    /// Mask selecting the start and transmission bits of the command byte
    pub const START_MASK: u8 = 0xC0;

    /// Start bit `0` followed by transmission bit `1`
    pub const START_PATTERN: u8 = 0x40;

    /// Mask selecting the 6-bit command index
    pub const INDEX_MASK: u8 = 0x3F;

    /// Bytes in a single block write payload: start token, data, CRC
    pub const WRITE_PAYLOAD_LEN: usize = 1 + super::BLOCK_SIZE + 2;

    /// Capacity of the receive buffer (3 bytes of slack over the data block)
    pub const RECEIVE_CAPACITY: usize = 3 + super::BLOCK_SIZE + 3;

    /// Bytes in a single block read reply: R1, start token, data, CRC
    pub const READ_REPLY_LEN: usize = 2 + super::BLOCK_SIZE + 2;
}

/// Command indices
///
/// Application commands (ACMDn) are encoded with `APP_FLAG` set, which is the
/// representation used once a CMD55 prefix has been consumed.
pub mod cmd {
    /// Marker bit for application-specific commands
    pub const APP_FLAG: u8 = 0x80;

    /// CMD0: GO_IDLE_STATE
    pub const GO_IDLE_STATE: u8 = 0;
    /// CMD1: SEND_OP_COND (MMC)
    pub const SEND_OP_COND: u8 = 1;
    /// CMD8: SEND_IF_COND
    pub const SEND_IF_COND: u8 = 8;
    /// CMD9: SEND_CSD
    pub const SEND_CSD: u8 = 9;
    /// CMD10: SEND_CID
    pub const SEND_CID: u8 = 10;
    /// CMD12: STOP_TRANSMISSION
    pub const STOP_TRANSMISSION: u8 = 12;
    /// CMD13: SEND_STATUS
    pub const SEND_STATUS: u8 = 13;
    /// CMD16: SET_BLOCKLEN
    pub const SET_BLOCKLEN: u8 = 16;
    /// CMD17: READ_SINGLE_BLOCK
    pub const READ_SINGLE_BLOCK: u8 = 17;
    /// CMD18: READ_MULTIPLE_BLOCK
    pub const READ_MULTIPLE_BLOCK: u8 = 18;
    /// CMD23: SET_BLOCK_COUNT
    pub const SET_BLOCK_COUNT: u8 = 23;
    /// CMD24: WRITE_BLOCK
    pub const WRITE_BLOCK: u8 = 24;
    /// CMD25: WRITE_MULTIPLE_BLOCK
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    /// CMD32: ERASE_WR_BLK_START
    pub const ERASE_WR_BLK_START: u8 = 32;
    /// CMD33: ERASE_WR_BLK_END
    pub const ERASE_WR_BLK_END: u8 = 33;
    /// CMD38: ERASE
    pub const ERASE: u8 = 38;
    /// CMD55: APP_CMD
    pub const APP_CMD: u8 = 55;
    /// CMD58: READ_OCR
    pub const READ_OCR: u8 = 58;

    /// ACMD13: SD_STATUS
    pub const SD_STATUS: u8 = APP_FLAG | 13;
    /// ACMD23: SET_WR_BLK_ERASE_COUNT
    pub const SET_WR_BLK_ERASE_COUNT: u8 = APP_FLAG | 23;
    /// ACMD41: SD_SEND_OP_COND
    pub const SD_SEND_OP_COND: u8 = APP_FLAG | 41;
}

/// R1 response bits
pub mod r1 {
    /// Card is in idle state and running its initialization process
    pub const IDLE: u8 = 1 << 0;
    /// Illegal command
    pub const ILLEGAL_COMMAND: u8 = 1 << 2;
}

/// R2 (SEND_STATUS) second bytes, pre-rendered
pub mod r2 {
    /// Status once ACMD41 has completed initialization
    pub const READY: [u8; 2] = [0x00, 0x00];
    /// Status before initialization: every error bit raised
    pub const NOT_READY: [u8; 2] = [0x1F, 0xFF];
}

/// OCR value returned by READ_OCR (R3 payload): powered up, SDHC, 2.7-3.6 V
pub const OCR: [u8; 4] = [0xC0, 0xFF, 0x80, 0x00];

/// SEND_IF_COND echo (R7 payload): voltage accepted (2.7-3.6 V), check pattern `0xAA`
pub const IF_COND_ECHO: [u8; 4] = [0x00, 0x00, 0x01, 0xAA];

/// Data tokens
pub mod token {
    /// Start block token for single block read/write
    pub const START_BLOCK: u8 = 0xFE;

    /// Data error token: out of range
    pub const ERROR_OUT_OF_RANGE: u8 = 0x08;

    /// Mask that is zero in the upper bits of every data error token
    pub const ERROR_MASK: u8 = 0xF0;
}
