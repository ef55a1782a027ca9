use clap::Parser;
use fscommon::BufStream;
use sdspi::{Args, BlockStream, EmulatorCore, SpiHost};
use sdspi_hw::sd::BLOCK_SIZE;
use std::error::Error;
use std::io::{self, Read, Write};
use tracing::info;

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Create emulator with the card attached
    info!("=== Creating Emulator ===");
    let mut emulator = match EmulatorCore::new(args.to_emulator_config()) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("Failed to create emulator: {}", e);
            std::process::exit(2);
        }
    };

    let Some(capacity) = emulator.sdcard_mut().capacity() else {
        eprintln!("Failed to query SD card image size");
        std::process::exit(2);
    };
    info!("SD card capacity: {} bytes", capacity);

    info!("=== Initializing SD card over SPI ===");
    if let Err(e) = SpiHost::new(&mut emulator).init() {
        eprintln!("SD card initialization failed: {}", e);
        emulator.shutdown();
        std::process::exit(2);
    }

    let result = run_actions(&args, &mut emulator, capacity);

    info!("Bus cycles: {}", emulator.clock());
    info!("Elapsed: {:?}", emulator.elapsed());
    emulator.shutdown();

    let exit_code = match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run_actions(args: &Args, emulator: &mut EmulatorCore, capacity: u64) -> Result<(), Box<dyn Error>> {
    if let Some(lba) = args.dump_block {
        let lba = u32::try_from(lba)?;
        let mut block = [0u8; BLOCK_SIZE];
        SpiHost::new(emulator).read_block(lba, &mut block)?;
        hexdump(u64::from(lba) * BLOCK_SIZE as u64, &block, &mut io::stdout().lock())?;
    }

    if args.list.is_none() && args.read.is_none() {
        return Ok(());
    }

    let stream = BlockStream::open_volume(SpiHost::new(emulator), capacity)?;
    let fs = fatfs::FileSystem::new(BufStream::new(stream), fatfs::FsOptions::new())?;
    let root_dir = fs.root_dir();

    if let Some(path) = &args.list {
        let path = path.trim_matches('/');
        let dir = if path.is_empty() {
            root_dir.clone()
        } else {
            root_dir.open_dir(path)?
        };
        let mut out = io::stdout().lock();
        for entry in dir.iter() {
            let entry = entry?;
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            if entry.is_dir() {
                writeln!(out, "{:>10}  {}/", "<DIR>", name)?;
            } else {
                writeln!(out, "{:>10}  {}", entry.len(), name)?;
            }
        }
    }

    if let Some(path) = &args.read {
        let mut file = root_dir.open_file(path.trim_start_matches('/'))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        info!("Read {} bytes from {:?}", contents.len(), path);
        io::stdout().lock().write_all(&contents)?;
    }

    Ok(())
}

fn hexdump(base: u64, data: &[u8], out: &mut impl Write) -> io::Result<()> {
    for (i, line) in data.chunks(16).enumerate() {
        write!(out, "{:08X} ", base + (i * 16) as u64)?;
        for byte in line {
            write!(out, " {:02X}", byte)?;
        }
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(out, "  |{}|", ascii)?;
    }
    Ok(())
}
