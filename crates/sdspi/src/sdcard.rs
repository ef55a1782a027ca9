//! SD card protocol state machine (SPI mode).
//!
//! The card sees the bus one byte at a time through [`SdCard::handle_byte`]. Bytes are
//! accumulated into command frames (or a block write payload); a completed command queues
//! a response which the host then clocks out by sending fill bytes.
//!
//! Only the subset of the protocol needed for single-card boot, single-block reads and
//! single-block writes is modelled. CRCs are neither checked nor generated.
//!
//! # References
//! - SD Specifications Part 1, Physical Layer Simplified Specification, chapter 7
//! - <http://elm-chan.org/docs/mmc/mmc_e.html>

pub mod command;

use crate::storage::{BackingStore, FileStore};
use command::{CardFlags, Command, Reply};
use sdspi_hw::sd::{BLOCK_SIZE, frame, token};
use sdspi_hw::specs::spi::FILL_BYTE;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors raised while attaching a backing image
#[derive(Debug, Error)]
pub enum SdCardError {
    #[error("cannot open SD card image {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

/// SD card state: bring-up flags, frame accumulation and the queued response
#[derive(Debug)]
pub struct SdCard {
    /// Attached disk image; the card is absent from the bus without one
    store: Option<Box<dyn BackingStore>>,

    /// Chip-select currently asserted
    selected: bool,

    flags: CardFlags,

    /// Most recently dispatched command
    last_command: Option<Command>,

    /// Block address latched by WRITE_BLOCK
    pending_write_lba: u32,

    /// A WRITE_BLOCK has been dispatched and its payload has not arrived yet
    awaiting_payload: bool,

    /// Partially received command frame or write payload
    receive: Vec<u8>,

    /// Response bytes queued for the host, and the next one to send
    response: Vec<u8>,
    response_pos: usize,
}

impl SdCard {
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            store: None,
            selected: false,
            flags: CardFlags::POWER_ON,
            last_command: None,
            pending_write_lba: 0,
            awaiting_payload: false,
            receive: Vec::with_capacity(frame::RECEIVE_CAPACITY),
            response: Vec::new(),
            response_pos: 0,
        }
    }

    // ========================================================================
    // Attachment
    // ========================================================================

    /// Insert a card backed by `store`, replacing any attached image
    ///
    /// The protocol state starts over as for a freshly powered card. The chip-select
    /// line belongs to the controller and is left as it is.
    pub fn attach(&mut self, store: Box<dyn BackingStore>) {
        self.detach();

        self.store = Some(store);
        self.flags = CardFlags::POWER_ON;
        self.last_command = None;
        self.pending_write_lba = 0;
        self.awaiting_payload = false;
        self.receive.clear();
        self.clear_response();

        info!("SD card attached.");
    }

    /// Detach the current image (if any) and attach the image file at `path`
    ///
    /// On failure the card is left detached.
    pub fn set_file(&mut self, path: impl AsRef<Path>) -> Result<(), SdCardError> {
        let path = path.as_ref();
        self.detach();

        let store = FileStore::open(path).map_err(|source| {
            warn!("Cannot open SD card image {:?}: {}", path, source);
            SdCardError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.attach(Box::new(store));
        Ok(())
    }

    /// Remove the card, handing back its image
    pub fn detach(&mut self) -> Option<Box<dyn BackingStore>> {
        let mut store = self.store.take()?;
        if let Err(e) = store.flush() {
            warn!("Failed to flush SD card image: {}", e);
        }
        info!("SD card detached.");
        Some(store)
    }

    /// Detach before exit so pending writes reach the image
    pub fn shutdown(&mut self) {
        self.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.store.is_some()
    }

    /// Size of the attached image in bytes
    pub fn capacity(&mut self) -> Option<u64> {
        let store = self.store.as_mut()?;
        match store.size() {
            Ok(size) => Some(size),
            Err(e) => {
                warn!("Failed to query SD card image size: {}", e);
                None
            }
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_idle(&self) -> bool {
        self.flags.idle
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.initialized
    }

    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    /// Response bytes are still waiting to be clocked out
    pub fn response_pending(&self) -> bool {
        self.response_pos < self.response.len()
    }

    // ========================================================================
    // Bus interface
    // ========================================================================

    /// Chip-select changed; any partially received frame is dropped
    pub fn select(&mut self, asserted: bool) {
        trace!("SD card select: {}", asserted);
        self.selected = asserted;
        self.receive.clear();
    }

    /// Exchange one byte with the card
    pub fn handle_byte(&mut self, in_byte: u8) -> u8 {
        if !self.selected || self.store.is_none() {
            return FILL_BYTE;
        }

        if self.receive.is_empty() && in_byte == FILL_BYTE {
            return self.next_response_byte();
        }

        self.receive.push(in_byte);

        match self.receive.len() {
            frame::COMMAND_LEN if is_command_start(self.receive[0]) => {
                let mut command_frame = [0u8; frame::COMMAND_LEN];
                command_frame.copy_from_slice(&self.receive);
                self.receive.clear();
                self.dispatch(command_frame);
            }
            frame::COMMAND_LEN if !self.awaiting_payload => {
                debug!(
                    "Dropping malformed SD command frame: {:02X?}",
                    self.receive
                );
                self.receive.clear();
                self.clear_response();
            }
            frame::WRITE_PAYLOAD_LEN => self.finish_write(),
            _ => {}
        }

        FILL_BYTE
    }

    fn next_response_byte(&mut self) -> u8 {
        let Some(&byte) = self.response.get(self.response_pos) else {
            return FILL_BYTE;
        };
        self.response_pos += 1;
        if self.response_pos == self.response.len() {
            self.clear_response();
        }
        byte
    }

    fn clear_response(&mut self) {
        self.response.clear();
        self.response_pos = 0;
    }

    // ========================================================================
    // Command execution
    // ========================================================================

    fn dispatch(&mut self, command_frame: [u8; frame::COMMAND_LEN]) {
        let index = command_frame[0] & frame::INDEX_MASK;
        let argument = u32::from_be_bytes([
            command_frame[1],
            command_frame[2],
            command_frame[3],
            command_frame[4],
        ]);

        let (flags, command) = command::decode(self.flags, index);
        let (flags, reply) = command::transition(flags, command, argument);
        self.flags = flags;
        self.last_command = Some(command);
        self.awaiting_payload = false;

        let response = match reply {
            Reply::ReadBlock { lba } => self.read_block(lba),
            Reply::WriteBlock { lba } => {
                debug!("SD write block armed for LBA {}", lba);
                self.pending_write_lba = lba;
                self.awaiting_payload = true;
                vec![command::r1_byte(flags)]
            }
            status => command::encode_status(status, flags).unwrap_or_default(),
        };

        debug!(
            "SD {} arg={:#X} -> {:02X?}",
            command,
            argument,
            &response[..response.len().min(16)]
        );

        self.response = response;
        self.response_pos = 0;
    }

    /// Build the reply to READ_SINGLE_BLOCK
    fn read_block(&mut self, lba: u32) -> Vec<u8> {
        let offset = u64::from(lba) * BLOCK_SIZE as u64;
        let Some(size) = self.capacity() else {
            return vec![0x00, token::ERROR_OUT_OF_RANGE];
        };
        if offset + BLOCK_SIZE as u64 > size {
            debug!("SD read of LBA {} is out of range ({} bytes)", lba, size);
            return vec![0x00, token::ERROR_OUT_OF_RANGE];
        }

        let mut reply = vec![0u8; frame::READ_REPLY_LEN];
        reply[1] = token::START_BLOCK;

        let Some(store) = self.store.as_mut() else {
            return vec![0x00, token::ERROR_OUT_OF_RANGE];
        };
        match store.read_at(offset, &mut reply[2..2 + BLOCK_SIZE]) {
            Ok(BLOCK_SIZE) => debug!("Read LBA {} from SD card image", lba),
            Ok(n) => warn!(
                "Short read from SD card image at LBA {}: {} of {} bytes",
                lba, n, BLOCK_SIZE
            ),
            Err(e) => warn!("Failed to read SD card image at LBA {}: {}", lba, e),
        }
        reply
    }

    /// A full write payload has been received
    fn finish_write(&mut self) {
        let lba = self.pending_write_lba;
        let armed = self.last_command == Some(Command::WriteBlock)
            && self.receive[0] == token::START_BLOCK;
        self.awaiting_payload = false;

        if armed {
            let offset = u64::from(lba) * BLOCK_SIZE as u64;
            match self.capacity() {
                Some(size) if offset + BLOCK_SIZE as u64 <= size => {
                    if let Some(store) = self.store.as_mut() {
                        let data = &self.receive[1..1 + BLOCK_SIZE];
                        match store.write_at(offset, data) {
                            Ok(BLOCK_SIZE) => debug!("Wrote LBA {} to SD card image", lba),
                            Ok(n) => warn!(
                                "Short write to SD card image at LBA {}: {} of {} bytes",
                                lba, n, BLOCK_SIZE
                            ),
                            Err(e) => {
                                warn!("Failed to write SD card image at LBA {}: {}", lba, e)
                            }
                        }
                        if let Err(e) = store.flush() {
                            warn!("Failed to flush SD card image: {}", e);
                        }
                    }
                }
                _ => debug!("SD write of LBA {} is out of range, skipped", lba),
            }
        } else {
            debug!("Dropping SD data frame without a pending WRITE_BLOCK");
        }

        self.receive.clear();
    }
}

fn is_command_start(byte: u8) -> bool {
    byte & frame::START_MASK == frame::START_PATTERN
}
