//! End-to-end tests: FAT images built on the host, read and written by a driver that only
//! talks to the emulated SPI registers.

use fscommon::{BufStream, StreamSlice};
use sdspi::{BlockStream, EmulatorConfig, EmulatorCore, SpiHost};
use sdspi_hw::mmio::spi::{BASE, control};
use sdspi_hw::sd::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const IMAGE_LEN: u64 = 8 * 1024 * 1024;

fn open_image(path: &Path) -> File {
    OpenOptions::new().read(true).write(true).open(path).unwrap()
}

/// Blank image of `len` bytes, left open read/write for formatting
fn create_image(path: &Path, len: u64) -> File {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .unwrap();
    file.set_len(len).unwrap();
    file
}

/// Superfloppy image with a couple of files on it
fn build_image(path: &Path) {
    let mut file = create_image(path, IMAGE_LEN);
    fatfs::format_volume(&mut file, fatfs::FormatVolumeOptions::new()).unwrap();

    let fs = fatfs::FileSystem::new(BufStream::new(file), fatfs::FsOptions::new()).unwrap();
    let root = fs.root_dir();
    root.create_file("hello.txt")
        .unwrap()
        .write_all(b"Hello from the card\n")
        .unwrap();
    let docs = root.create_dir("docs").unwrap();
    let big: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    docs.create_file("big.bin").unwrap().write_all(&big).unwrap();
}

fn booted_core(path: &Path) -> EmulatorCore {
    let config = EmulatorConfig {
        sd_card: Some(path.to_path_buf()),
        ..Default::default()
    };
    let mut core = EmulatorCore::new(config).unwrap();
    SpiHost::new(&mut core).init().unwrap();
    core
}

#[test]
fn reads_files_through_spi() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("card.img");
    build_image(&path);

    let mut core = booted_core(&path);
    let capacity = core.sdcard_mut().capacity().unwrap();
    assert_eq!(capacity, IMAGE_LEN);
    {
        let stream = BlockStream::open_volume(SpiHost::new(&mut core), capacity).unwrap();
        let fs = fatfs::FileSystem::new(BufStream::new(stream), fatfs::FsOptions::new()).unwrap();
        let root = fs.root_dir();

        let mut names: Vec<String> = root
            .iter()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "." && n != "..")
            .collect();
        names.sort();
        assert_eq!(names, vec!["docs".to_string(), "hello.txt".to_string()]);

        let mut text = String::new();
        root.open_file("hello.txt")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "Hello from the card\n");

        let mut big = Vec::new();
        root.open_file("docs/big.bin")
            .unwrap()
            .read_to_end(&mut big)
            .unwrap();
        assert_eq!(big.len(), 3000);
        assert!(big.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
    }
    assert!(core.clock() > 0);
    core.shutdown();
}

#[test]
fn writes_through_spi_land_in_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("card.img");
    build_image(&path);

    let mut core = booted_core(&path);
    {
        let stream = BlockStream::open_volume(SpiHost::new(&mut core), IMAGE_LEN).unwrap();
        let fs = fatfs::FileSystem::new(BufStream::new(stream), fatfs::FsOptions::new()).unwrap();
        let mut file = fs.root_dir().create_file("saved.txt").unwrap();
        file.write_all(b"written by the guest").unwrap();
        file.flush().unwrap();
        drop(file);
        fs.unmount().unwrap();
    }
    core.shutdown();
    assert!(!core.sdcard().is_attached());

    let fs = fatfs::FileSystem::new(BufStream::new(open_image(&path)), fatfs::FsOptions::new())
        .unwrap();
    let mut text = String::new();
    fs.root_dir()
        .open_file("saved.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "written by the guest");
}

#[test]
fn finds_volume_behind_partition_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("card.img");
    let start_lba: u32 = 2048;
    let part_start = u64::from(start_lba) * BLOCK_SIZE as u64;
    let sectors = ((IMAGE_LEN - part_start) / BLOCK_SIZE as u64) as u32;

    {
        let mut file = create_image(&path, IMAGE_LEN);

        let mut mbr = [0u8; BLOCK_SIZE];
        let entry = 0x1BE;
        mbr[entry + 4] = 0x06;
        mbr[entry + 8..entry + 12].copy_from_slice(&start_lba.to_le_bytes());
        mbr[entry + 12..entry + 16].copy_from_slice(&sectors.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
        file.write_all(&mbr).unwrap();

        let mut part = StreamSlice::new(file, part_start, IMAGE_LEN).unwrap();
        fatfs::format_volume(&mut part, fatfs::FormatVolumeOptions::new()).unwrap();
        let fs = fatfs::FileSystem::new(part, fatfs::FsOptions::new()).unwrap();
        fs.root_dir()
            .create_file("inside.txt")
            .unwrap()
            .write_all(b"partitioned")
            .unwrap();
    }

    let mut core = booted_core(&path);
    let mut volume = BlockStream::open_volume(SpiHost::new(&mut core), IMAGE_LEN).unwrap();
    assert_eq!(volume.seek(SeekFrom::End(0)).unwrap(), IMAGE_LEN - part_start);
    volume.seek(SeekFrom::Start(0)).unwrap();
    let fs = fatfs::FileSystem::new(BufStream::new(volume), fatfs::FsOptions::new()).unwrap();
    let mut text = String::new();
    fs.root_dir()
        .open_file("inside.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "partitioned");
}

#[test]
fn guest_sees_busy_until_eight_ticks_pass() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("card.img");
    create_image(&path, 4 * BLOCK_SIZE as u64);

    let config = EmulatorConfig {
        sd_card: Some(path),
        ..Default::default()
    };
    let mut core = EmulatorCore::new(config).unwrap();
    core.bus_write(BASE + 1, control::SELECT);
    // GO_IDLE_STATE, then one fill byte to clock out the R1 response
    for byte in [0x40, 0, 0, 0, 0, 0x95, 0xFF] {
        core.bus_write(BASE, byte);
        core.advance(7);
        assert_ne!(core.bus_read(BASE + 1) & control::BUSY, 0);
        core.advance(1);
        assert_eq!(core.bus_read(BASE + 1) & control::BUSY, 0);
    }
    assert_eq!(core.bus_read(BASE), 0x01);
    assert!(core.sdcard().is_idle());
}
