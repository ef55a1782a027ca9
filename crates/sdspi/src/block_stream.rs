//! Byte stream over the emulated card, for mounting FAT volumes through the SPI bus.
//!
//! Every access goes through [`SpiHost`], so a file read through `fatfs` on top of this
//! stream exercises the full register, timing and protocol path. Partial-block writes are
//! done read-modify-write.
//!
//! SD card images are usually partitioned. [`BlockStream::open_volume`] looks at the MBR
//! and slices the stream down to the first partition when there is one.

use crate::host::{HostError, SpiHost};
use fscommon::StreamSlice;
use sdspi_hw::sd::BLOCK_SIZE;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

const MBR_SIGNATURE_OFFSET: usize = 510;
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MBR_PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// `Read + Write + Seek` view of the whole card
#[derive(Debug)]
pub struct BlockStream<'a> {
    host: SpiHost<'a>,
    /// Card size in bytes
    len: u64,
    pos: u64,
}

fn host_error(e: HostError) -> io::Error {
    io::Error::other(e)
}

impl<'a> BlockStream<'a> {
    /// Stream over the whole card of `len` bytes
    pub fn new(host: SpiHost<'a>, len: u64) -> Self {
        Self { host, len, pos: 0 }
    }

    /// Stream over the FAT volume on a card of `disk_len` bytes
    ///
    /// A card whose first block is a FAT boot sector (jump instruction first) is used
    /// whole; otherwise the first MBR partition entry selects the volume.
    pub fn open_volume(
        mut host: SpiHost<'a>,
        disk_len: u64,
    ) -> io::Result<StreamSlice<BlockStream<'a>>> {
        let mut block = [0u8; BLOCK_SIZE];
        host.read_block(0, &mut block).map_err(host_error)?;

        let is_boot_sector = matches!(block[0], 0xEB | 0xE9);
        let has_signature = block[MBR_SIGNATURE_OFFSET..] == MBR_SIGNATURE;
        let entry = &block[MBR_PARTITION_TABLE_OFFSET..MBR_PARTITION_TABLE_OFFSET + 16];
        let partition_type = entry[4];

        if is_boot_sector || !has_signature || partition_type == 0 {
            debug!("No partition table, using whole card as FAT volume");
            return StreamSlice::new(Self::new(host, disk_len), 0, disk_len);
        }

        let start_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
        let sectors = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
        let base = u64::from(start_lba) * BLOCK_SIZE as u64;
        let end = (base + u64::from(sectors) * BLOCK_SIZE as u64).min(disk_len);
        debug!(
            "Partition 1: type={:#04X}, start LBA {}, {} sectors",
            partition_type, start_lba, sectors
        );

        StreamSlice::new(Self::new(host, disk_len), base.min(end), end)
    }

    /// Block address and offset within it for the current position
    fn locate(&self) -> io::Result<(u32, usize)> {
        let lba = u32::try_from(self.pos / BLOCK_SIZE as u64).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "position beyond 32-bit LBA range")
        })?;
        Ok((lba, (self.pos % BLOCK_SIZE as u64) as usize))
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }
}

impl Read for BlockStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.remaining() == 0 {
            return Ok(0);
        }
        let (lba, offset) = self.locate()?;
        let mut block = [0u8; BLOCK_SIZE];
        self.host.read_block(lba, &mut block).map_err(host_error)?;

        let n = buf
            .len()
            .min(BLOCK_SIZE - offset)
            .min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&block[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for BlockStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() || self.remaining() == 0 {
            return Ok(0);
        }
        let (lba, offset) = self.locate()?;
        let n = buf
            .len()
            .min(BLOCK_SIZE - offset)
            .min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));

        let mut block = [0u8; BLOCK_SIZE];
        if n < BLOCK_SIZE {
            self.host.read_block(lba, &mut block).map_err(host_error)?;
        }
        block[offset..offset + n].copy_from_slice(&buf[..n]);
        self.host.write_block(lba, &block).map_err(host_error)?;

        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for BlockStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.pos = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EmulatorConfig, EmulatorCore};
    use crate::storage::{BackingStore, MemoryStore};

    fn initialized_core(image: Vec<u8>) -> EmulatorCore {
        let mut core = EmulatorCore::new(EmulatorConfig::default()).unwrap();
        core.sdcard_mut().attach(Box::new(MemoryStore::new(image)));
        SpiHost::new(&mut core).init().unwrap();
        core
    }

    #[test]
    fn unaligned_reads_and_writes() {
        let image: Vec<u8> = (0..4 * BLOCK_SIZE).map(|i| (i % 199) as u8).collect();
        let mut core = initialized_core(image.clone());
        let mut stream = BlockStream::new(SpiHost::new(&mut core), image.len() as u64);

        stream.seek(SeekFrom::Start(500)).unwrap();
        let mut buf = [0u8; 40];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &image[500..540]);

        stream.seek(SeekFrom::Start(1020)).unwrap();
        stream.write_all(&[0xEE; 10]).unwrap();
        stream.seek(SeekFrom::Start(1016)).unwrap();
        let mut buf = [0u8; 18];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &image[1016..1020]);
        assert_eq!(&buf[4..14], &[0xEE; 10]);
        assert_eq!(&buf[14..], &image[1030..1034]);
    }

    #[test]
    fn reads_stop_at_end_of_stream() {
        let mut core = initialized_core(vec![0x33; 2 * BLOCK_SIZE]);
        let mut stream = BlockStream::new(SpiHost::new(&mut core), 2 * BLOCK_SIZE as u64);

        assert_eq!(stream.seek(SeekFrom::End(-4)).unwrap(), 1020);
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![0x33; 4]);
        assert!(stream.seek(SeekFrom::Current(-2000)).is_err());
    }

    #[test]
    fn open_volume_follows_first_partition() {
        let mut image = vec![0u8; 8 * BLOCK_SIZE];
        let entry = MBR_PARTITION_TABLE_OFFSET;
        image[entry + 4] = 0x0C;
        image[entry + 8..entry + 12].copy_from_slice(&2u32.to_le_bytes());
        image[entry + 12..entry + 16].copy_from_slice(&4u32.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;
        image[2 * BLOCK_SIZE..2 * BLOCK_SIZE + 3].copy_from_slice(&[0xEB, 0x58, 0x90]);

        let len = image.len() as u64;
        let mut core = initialized_core(image);
        let mut volume = BlockStream::open_volume(SpiHost::new(&mut core), len).unwrap();
        assert_eq!(volume.seek(SeekFrom::End(0)).unwrap(), 4 * BLOCK_SIZE as u64);
        volume.seek(SeekFrom::Start(0)).unwrap();

        let mut jump = [0u8; 3];
        volume.read_exact(&mut jump).unwrap();
        assert_eq!(jump, [0xEB, 0x58, 0x90]);

        // Writes stay inside the partition window
        volume.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(volume.write(&[0x11; 8]).unwrap(), 2);
        drop(volume);
        let mut store = core.sdcard_mut().detach().unwrap();
        let mut tail = [0u8; 4];
        store.read_at(6 * BLOCK_SIZE as u64 - 2, &mut tail).unwrap();
        assert_eq!(tail, [0x11, 0x11, 0x00, 0x00]);
    }

    #[test]
    fn open_volume_uses_superfloppy_as_is() {
        let mut image = vec![0u8; 4 * BLOCK_SIZE];
        image[0] = 0xEB;
        image[510] = 0x55;
        image[511] = 0xAA;

        let mut core = initialized_core(image);
        let mut volume =
            BlockStream::open_volume(SpiHost::new(&mut core), 4 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(volume.seek(SeekFrom::End(0)).unwrap(), 4 * BLOCK_SIZE as u64);
        volume.seek(SeekFrom::Start(0)).unwrap();
        let mut jump = [0u8; 1];
        volume.read_exact(&mut jump).unwrap();
        assert_eq!(jump, [0xEB]);
    }
}
