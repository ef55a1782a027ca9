//! SD command decoding and the per-command state transitions.
//!
//! Everything here is pure: a transition takes the card's bring-up flags and the command
//! argument and returns the new flags plus the kind of reply to queue. Only block reads
//! and writes touch the backing store, and those are carried out by the card itself.

use sdspi_hw::sd::{IF_COND_ECHO, OCR, cmd, r1, r2};
use std::fmt;

/// Commands the card distinguishes, with application commands already folded in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// CMD0
    GoIdleState,
    /// CMD8
    SendIfCond,
    /// ACMD41
    SdSendOpCond,
    /// CMD13
    SendStatus,
    /// CMD16
    SetBlockLen,
    /// CMD17
    ReadSingleBlock,
    /// CMD24
    WriteBlock,
    /// CMD55
    AppCmd,
    /// CMD58
    ReadOcr,
    /// Any other index; answered with a bare R1. Carries `cmd::APP_FLAG` for ACMDs.
    Other(u8),
}

impl Command {
    /// Map an opcode (6-bit index, optionally with `cmd::APP_FLAG`) to a command
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            cmd::GO_IDLE_STATE => Command::GoIdleState,
            cmd::SEND_IF_COND => Command::SendIfCond,
            cmd::SD_SEND_OP_COND => Command::SdSendOpCond,
            cmd::SEND_STATUS => Command::SendStatus,
            cmd::SET_BLOCKLEN => Command::SetBlockLen,
            cmd::READ_SINGLE_BLOCK => Command::ReadSingleBlock,
            cmd::WRITE_BLOCK => Command::WriteBlock,
            cmd::APP_CMD => Command::AppCmd,
            cmd::READ_OCR => Command::ReadOcr,
            other => Command::Other(other),
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            Command::GoIdleState => cmd::GO_IDLE_STATE,
            Command::SendIfCond => cmd::SEND_IF_COND,
            Command::SdSendOpCond => cmd::SD_SEND_OP_COND,
            Command::SendStatus => cmd::SEND_STATUS,
            Command::SetBlockLen => cmd::SET_BLOCKLEN,
            Command::ReadSingleBlock => cmd::READ_SINGLE_BLOCK,
            Command::WriteBlock => cmd::WRITE_BLOCK,
            Command::AppCmd => cmd::APP_CMD,
            Command::ReadOcr => cmd::READ_OCR,
            Command::Other(opcode) => opcode,
        }
    }

    pub fn is_app_command(self) -> bool {
        self.opcode() & cmd::APP_FLAG != 0
    }

    /// Conventional name, for logs
    pub fn name(self) -> &'static str {
        match self.opcode() {
            cmd::GO_IDLE_STATE => "GO_IDLE_STATE",
            cmd::SEND_OP_COND => "SEND_OP_COND",
            cmd::SEND_IF_COND => "SEND_IF_COND",
            cmd::SEND_CSD => "SEND_CSD",
            cmd::SEND_CID => "SEND_CID",
            cmd::STOP_TRANSMISSION => "STOP_TRANSMISSION",
            cmd::SEND_STATUS => "SEND_STATUS",
            cmd::SET_BLOCKLEN => "SET_BLOCKLEN",
            cmd::READ_SINGLE_BLOCK => "READ_SINGLE_BLOCK",
            cmd::READ_MULTIPLE_BLOCK => "READ_MULTIPLE_BLOCK",
            cmd::SET_BLOCK_COUNT => "SET_BLOCK_COUNT",
            cmd::WRITE_BLOCK => "WRITE_BLOCK",
            cmd::WRITE_MULTIPLE_BLOCK => "WRITE_MULTIPLE_BLOCK",
            cmd::ERASE_WR_BLK_START => "ERASE_WR_BLK_START",
            cmd::ERASE_WR_BLK_END => "ERASE_WR_BLK_END",
            cmd::ERASE => "ERASE",
            cmd::APP_CMD => "APP_CMD",
            cmd::READ_OCR => "READ_OCR",
            cmd::SD_STATUS => "SD_STATUS",
            cmd::SET_WR_BLK_ERASE_COUNT => "SET_WR_BLK_ERASE_COUNT",
            cmd::SD_SEND_OP_COND => "SD_SEND_OP_COND",
            _ => "unknown",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode();
        let prefix = if self.is_app_command() { "ACMD" } else { "CMD" };
        write!(
            f,
            "{}{} ({})",
            prefix,
            opcode & !cmd::APP_FLAG,
            self.name()
        )
    }
}

/// Card bring-up flags touched by command transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardFlags {
    /// Idle until initialization completes; reported in bit 0 of R1
    pub idle: bool,
    /// Set once ACMD41 has run
    pub initialized: bool,
    /// Set by CMD55, consumed by the next decoded command
    pub app_command: bool,
}

impl CardFlags {
    /// Flags of a freshly inserted card
    pub const POWER_ON: CardFlags = CardFlags {
        idle: true,
        initialized: false,
        app_command: false,
    };
}

/// What the card sends back once a command has been dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    R1,
    R2,
    R3,
    R7,
    /// Single block read from `lba`
    ReadBlock { lba: u32 },
    /// R1, after which a write payload for `lba` is expected
    WriteBlock { lba: u32 },
}

/// Fold a received command index into a command, consuming the CMD55 prefix flag
///
/// The flag is cleared whichever command follows.
pub fn decode(flags: CardFlags, index: u8) -> (CardFlags, Command) {
    let opcode = if flags.app_command {
        index | cmd::APP_FLAG
    } else {
        index
    };
    let flags = CardFlags {
        app_command: false,
        ..flags
    };
    (flags, Command::from_opcode(opcode))
}

/// Apply a decoded command
pub fn transition(flags: CardFlags, command: Command, argument: u32) -> (CardFlags, Reply) {
    match command {
        Command::GoIdleState => (CardFlags { idle: true, ..flags }, Reply::R1),
        Command::SendIfCond => (flags, Reply::R7),
        Command::SdSendOpCond => (
            CardFlags {
                idle: false,
                initialized: true,
                ..flags
            },
            Reply::R1,
        ),
        Command::SendStatus => (flags, Reply::R2),
        // Block length is fixed at 512 bytes
        Command::SetBlockLen => (flags, Reply::R1),
        Command::ReadSingleBlock => (flags, Reply::ReadBlock { lba: argument }),
        Command::WriteBlock => (flags, Reply::WriteBlock { lba: argument }),
        Command::AppCmd => (
            CardFlags {
                app_command: true,
                ..flags
            },
            Reply::R1,
        ),
        Command::ReadOcr => (flags, Reply::R3),
        Command::Other(_) => (flags, Reply::R1),
    }
}

/// R1 status byte
pub fn r1_byte(flags: CardFlags) -> u8 {
    if flags.idle { r1::IDLE } else { 0 }
}

/// Encode a status reply. Block reads are built by the card and yield `None`.
pub fn encode_status(reply: Reply, flags: CardFlags) -> Option<Vec<u8>> {
    let bytes = match reply {
        Reply::R1 | Reply::WriteBlock { .. } => vec![r1_byte(flags)],
        Reply::R2 => {
            if flags.initialized {
                r2::READY.to_vec()
            } else {
                r2::NOT_READY.to_vec()
            }
        }
        Reply::R3 => OCR.to_vec(),
        Reply::R7 => {
            let mut bytes = Vec::with_capacity(1 + IF_COND_ECHO.len());
            bytes.push(r1_byte(flags));
            bytes.extend_from_slice(&IF_COND_ECHO);
            bytes
        }
        Reply::ReadBlock { .. } => return None,
    };
    Some(bytes)
}
