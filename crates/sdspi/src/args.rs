use crate::EmulatorConfig;
use crate::core::DEFAULT_TICKS_PER_POLL;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Path to SD card image (raw disk image, optionally with an MBR)
    pub sd_card: PathBuf,

    /// List a directory of the FAT volume on the card (e.g., "/" or "docs")
    #[arg(long)]
    pub list: Option<String>,

    /// Print a file from the FAT volume on the card to stdout
    #[arg(long)]
    pub read: Option<String>,

    /// Hex-dump one 512-byte block of the card (hex: 0x1234 or decimal: 1234)
    #[arg(long, value_parser = parse_hex_or_dec)]
    pub dump_block: Option<u64>,

    /// CPU ticks spent per poll of the SPI busy flag
    #[arg(long, default_value_t = DEFAULT_TICKS_PER_POLL)]
    pub ticks_per_poll: u64,
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.list.is_none() && self.read.is_none() && self.dump_block.is_none() {
            return Err("nothing to do: pass --list, --read or --dump-block".to_string());
        }
        if let Some(lba) = self.dump_block.filter(|&lba| u32::try_from(lba).is_err()) {
            return Err(format!("--dump-block {lba:#X} does not fit a 32-bit block address"));
        }
        if self.ticks_per_poll == 0 {
            return Err("--ticks-per-poll must be at least 1".to_string());
        }
        Ok(())
    }

    /// Convert Args to EmulatorConfig
    pub fn to_emulator_config(&self) -> EmulatorConfig {
        EmulatorConfig {
            sd_card: Some(self.sd_card.clone()),
            ticks_per_poll: self.ticks_per_poll,
        }
    }
}

pub fn parse_hex_or_dec(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}
