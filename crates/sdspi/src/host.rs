//! Guest-side SD card driver.
//!
//! `SpiHost` talks to the card exactly the way guest code does: it only writes and reads the
//! two SPI registers and spends CPU ticks polling the busy flag. It is used by the command
//! line front end to reach files on the card image, and by tests that exercise the whole
//! path from register accesses down to the backing store.
//!
//! The sequence follows the usual SPI-mode bring-up: CMD0, CMD8, ACMD41 until ready,
//! CMD58, CMD16.

use crate::core::EmulatorCore;
use crate::sdcard::command::Command;
use sdspi_hw::mmio::spi::{BASE, control, registers as reg};
use sdspi_hw::sd::{BLOCK_SIZE, IF_COND_ECHO, cmd, r1, token};
use sdspi_hw::specs::spi::FILL_BYTE;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Fill bytes clocked while waiting for a command response (NCR is at most 8 bytes)
const RESPONSE_POLL_LIMIT: usize = 16;

/// Fill bytes clocked while waiting for a data start token
const DATA_POLL_LIMIT: usize = 1024;

/// Attempts at CMD0 and ACMD41 before giving up
const INIT_ATTEMPTS: usize = 32;

/// Errors reported by the driver
#[derive(Debug, Error)]
pub enum HostError {
    #[error("timeout waiting for response to {0}")]
    TimeoutCommand(Command),

    #[error("{command} rejected with R1 {r1:#04X}")]
    Rejected { command: Command, r1: u8 },

    #[error("card did not echo the SEND_IF_COND check pattern: {0:02X?}")]
    BadIfCond([u8; 4]),

    #[error("card reported data error token {0:#04X}")]
    DataError(u8),

    #[error("timeout waiting for data start token")]
    TimeoutData,

    #[error("write was not committed (status {0:02X?})")]
    WriteError([u8; 2]),
}

/// SD card driver that only touches the SPI registers
#[derive(Debug)]
pub struct SpiHost<'a> {
    core: &'a mut EmulatorCore,
}

impl<'a> SpiHost<'a> {
    pub fn new(core: &'a mut EmulatorCore) -> Self {
        Self { core }
    }

    // ========================================================================
    // Register level
    // ========================================================================

    fn set_control(&mut self, value: u8) {
        self.core.bus_write(BASE + reg::CONTROL, value);
    }

    /// Assert or release chip-select (auto-transmit off)
    pub fn select(&mut self, asserted: bool) {
        self.set_control(if asserted { control::SELECT } else { 0 });
    }

    /// Spin on the busy flag, spending CPU ticks on every poll
    fn wait_idle(&mut self) {
        let ticks = self.core.ticks_per_poll();
        while self.core.bus_read(BASE + reg::CONTROL) & control::BUSY != 0 {
            self.core.advance(ticks);
        }
    }

    /// Shift one byte out and return the byte shifted in
    pub fn transfer(&mut self, byte: u8) -> u8 {
        self.core.bus_write(BASE + reg::DATA, byte);
        self.wait_idle();
        let received = self.core.bus_read(BASE + reg::DATA);
        trace!("SPI host transfer: {:#04X} -> {:#04X}", byte, received);
        received
    }

    fn send(&mut self, byte: u8) {
        self.transfer(byte);
    }

    fn receive(&mut self) -> u8 {
        self.transfer(FILL_BYTE)
    }

    /// Receive `buf.len()` bytes using auto-transmit reads
    ///
    /// Each data read hands back the byte from the previous transfer and starts the next
    /// one, so the first read only primes the pipeline and one extra fill byte is clocked
    /// at the end. Only burst up to the end of a response.
    fn receive_burst(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        self.set_control(control::SELECT | control::AUTO_TX);
        self.core.bus_read(BASE + reg::DATA);
        for slot in buf.iter_mut() {
            self.wait_idle();
            *slot = self.core.bus_read(BASE + reg::DATA);
        }
        // The last read started one more dummy transfer
        self.set_control(control::SELECT);
        self.wait_idle();
    }

    // ========================================================================
    // Command level
    // ========================================================================

    /// Send a command frame and return its R1 byte
    pub fn card_command(&mut self, index: u8, argument: u32) -> Result<u8, HostError> {
        let arg = argument.to_be_bytes();
        // Only CMD0 and CMD8 need a valid CRC on real cards
        let crc = match index {
            cmd::GO_IDLE_STATE => 0x95,
            cmd::SEND_IF_COND => 0x87,
            _ => 0x01,
        };
        for byte in [0x40 | index, arg[0], arg[1], arg[2], arg[3], crc] {
            self.send(byte);
        }

        for _ in 0..RESPONSE_POLL_LIMIT {
            let response = self.receive();
            if response != FILL_BYTE {
                return Ok(response);
            }
        }
        Err(HostError::TimeoutCommand(Command::from_opcode(index)))
    }

    /// Send CMD55 followed by the application command `index`
    pub fn card_acmd(&mut self, index: u8, argument: u32) -> Result<u8, HostError> {
        self.card_command(cmd::APP_CMD, 0)?;
        self.card_command(index, argument).map_err(|e| match e {
            HostError::TimeoutCommand(_) => {
                HostError::TimeoutCommand(Command::from_opcode(cmd::APP_FLAG | index))
            }
            other => other,
        })
    }

    /// Bring the card out of idle state
    pub fn init(&mut self) -> Result<(), HostError> {
        debug!("Initializing SD card");
        // The controller only clocks with chip-select asserted, so there is no
        // 74-clock preamble to send.
        self.select(true);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.card_command(cmd::GO_IDLE_STATE, 0) {
                Ok(r1::IDLE) => break,
                Ok(r) if attempts < INIT_ATTEMPTS => {
                    warn!("GO_IDLE_STATE returned {:#04X}, trying again..", r)
                }
                Err(HostError::TimeoutCommand(_)) if attempts < INIT_ATTEMPTS => {}
                Ok(r) => {
                    return Err(HostError::Rejected {
                        command: Command::GoIdleState,
                        r1: r,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let r = self.card_command(cmd::SEND_IF_COND, 0x1AA)?;
        if r & r1::ILLEGAL_COMMAND != 0 {
            return Err(HostError::Rejected {
                command: Command::SendIfCond,
                r1: r,
            });
        }
        let mut echo = [0u8; 4];
        for byte in echo.iter_mut() {
            *byte = self.receive();
        }
        if echo[3] != IF_COND_ECHO[3] {
            return Err(HostError::BadIfCond(echo));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            if self.card_acmd(cmd::SD_SEND_OP_COND & !cmd::APP_FLAG, 0x4000_0000)? == 0 {
                break;
            } else if attempts >= INIT_ATTEMPTS {
                return Err(HostError::TimeoutCommand(Command::SdSendOpCond));
            }
        }

        let ocr = self.read_ocr()?;
        debug!("SD card OCR: {:02X?}", ocr);

        let r = self.card_command(cmd::SET_BLOCKLEN, BLOCK_SIZE as u32)?;
        if r != 0 {
            return Err(HostError::Rejected {
                command: Command::SetBlockLen,
                r1: r,
            });
        }

        debug!("SD card ready");
        Ok(())
    }

    /// READ_OCR
    pub fn read_ocr(&mut self) -> Result<[u8; 4], HostError> {
        let mut ocr = [0u8; 4];
        ocr[0] = self.card_command(cmd::READ_OCR, 0)?;
        for byte in ocr[1..].iter_mut() {
            *byte = self.receive();
        }
        Ok(ocr)
    }

    /// SEND_STATUS
    pub fn send_status(&mut self) -> Result<[u8; 2], HostError> {
        let first = self.card_command(cmd::SEND_STATUS, 0)?;
        Ok([first, self.receive()])
    }

    // ========================================================================
    // Block level
    // ========================================================================

    /// Read block `lba` into `buf`
    pub fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), HostError> {
        trace!("SD host read LBA {}", lba);
        let r = self.card_command(cmd::READ_SINGLE_BLOCK, lba)?;
        if r != 0 {
            return Err(HostError::Rejected {
                command: Command::ReadSingleBlock,
                r1: r,
            });
        }
        self.read_data(buf)
    }

    fn read_data(&mut self, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), HostError> {
        let mut attempts = 0;
        let status = loop {
            let status = self.receive();
            if status != FILL_BYTE {
                break status;
            }
            attempts += 1;
            if attempts >= DATA_POLL_LIMIT {
                return Err(HostError::TimeoutData);
            }
        };

        if status != token::START_BLOCK {
            if status & token::ERROR_MASK == 0 {
                return Err(HostError::DataError(status));
            }
            return Err(HostError::TimeoutData);
        }

        // Data and CRC in one burst, so the trailing dummy transfer lands after the
        // end of the response. The CRC is not checked.
        let mut data = [0u8; BLOCK_SIZE + 2];
        self.receive_burst(&mut data);
        buf.copy_from_slice(&data[..BLOCK_SIZE]);
        Ok(())
    }

    /// Write `data` to block `lba`
    pub fn write_block(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), HostError> {
        trace!("SD host write LBA {}", lba);
        let r = self.card_command(cmd::WRITE_BLOCK, lba)?;
        if r != 0 {
            return Err(HostError::Rejected {
                command: Command::WriteBlock,
                r1: r,
            });
        }

        self.send(token::START_BLOCK);
        for &byte in data {
            self.send(byte);
        }
        self.send(FILL_BYTE);
        self.send(FILL_BYTE);

        let status = self.send_status()?;
        if status != [0x00, 0x00] {
            return Err(HostError::WriteError(status));
        }
        Ok(())
    }
}
