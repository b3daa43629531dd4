//! ROFS CLI - Build and inspect read-only disc images.
//!
//! Usage:
//!   rofs [-v] [--config rofs.cfg.json] <command>
//!
//! Examples:
//!   rofs pack game.zip -o game.img       # Master an image from a ZIP
//!   rofs info game.img                   # Show the volume descriptor
//!   rofs ls game.img /MOVIE              # List a directory
//!   rofs extract game.img MOVIE/INTRO.STR -o intro.str

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{debug, info, LevelFilter};

use rofs_core::{
    pack_archive_from_path, ContainerId, DirRecord, HandleStatus, MemoryMedium, Rofs, RofsConfig,
    SectorBuffer,
};

/// Volume name images are mounted under.
const VOLUME: &str = "CD";

/// ROFS image tool
#[derive(Parser, Debug)]
#[command(name = "rofs")]
#[command(about = "Build and inspect ROFS disc images", version)]
struct Args {
    /// More log output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON file with capacity and policy overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Master an image from a ZIP archive
    Pack {
        archive: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show volume information
    Info { image: PathBuf },
    /// List a directory
    Ls {
        image: PathBuf,
        /// Directory path; defaults to the root
        path: Option<String>,
        /// Include hidden entries
        #[arg(short, long)]
        all: bool,
    },
    /// Copy a file out of an image
    Extract {
        image: PathBuf,
        path: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Server tick period in milliseconds
        #[arg(long, default_value_t = 16)]
        frame_ms: u64,
        /// Sectors per read request
        #[arg(long, default_value_t = 32)]
        chunk: u32,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RofsConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(RofsConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: RofsConfig = serde_json::from_str(&text)?;
    debug!("config from {}: {:?}", path.display(), config);
    Ok(config)
}

/// Mount an image file held in memory.
fn mount_image(config: RofsConfig, image: &Path) -> Result<Rofs, Box<dyn std::error::Error>> {
    let data = std::fs::read(image)?;
    let mut medium = MemoryMedium::new();
    let disc: ContainerId = medium.insert(data);

    let mut rofs = Rofs::init(config)?;
    rofs.set_error_callback(Some(Box::new(|msg, err| {
        debug!("rofs: {}: {}", msg, err);
    })));
    rofs.register_primitive(Box::new(medium))?;
    rofs.add_volume(VOLUME, disc)?;
    Ok(rofs)
}

fn cmd_pack(archive: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = pack_archive_from_path(archive)?;
    std::fs::write(output, &image)?;
    eprintln!(
        "Packed {} -> {} ({} sectors)",
        archive.display(),
        output.display(),
        image.len() / rofs_core::SECTOR_LEN
    );
    Ok(())
}

fn cmd_info(rofs: &mut Rofs) -> Result<(), Box<dyn std::error::Error>> {
    let info = rofs.volume_info(VOLUME)?;
    println!("{}", rofs_core::version());
    println!("Volume ID:      {}", info.volume_id);
    println!("Sectors:        {}", info.volume_sectors);
    println!(
        "Root record:    sector {} ({} bytes)",
        info.ptbl_sector, info.ptbl_size
    );
    println!("Flags:          {:?}", info.flags);
    Ok(())
}

fn cmd_ls(
    rofs: &mut Rofs,
    path: Option<&str>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut record = DirRecord::with_capacity(rofs.config().max_dirent);
    rofs.load_directory(path.unwrap_or("/"), &mut record)?;

    for entry in record.children() {
        if !all && entry.attributes.contains(rofs_core::Attributes::HIDDEN) {
            continue;
        }
        if entry.is_directory() {
            println!("{:>12}  {}/", "<DIR>", entry.name);
        } else {
            println!("{:>12}  {}", entry.size, entry.name);
        }
    }
    println!("{} file(s)", record.count_files());
    Ok(())
}

/// Read a file through the handle API, ticking the server on a timer.
async fn cmd_extract(
    rofs: &mut Rofs,
    path: &str,
    output: &Path,
    frame: Duration,
    chunk: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let h = rofs.open(path, None)?;
    let size = rofs.file_size(h)?;
    let mut out = std::io::BufWriter::new(std::fs::File::create(output)?);
    let mut buffer = SectorBuffer::with_sectors(chunk.max(1) as usize);
    let mut ticker = tokio::time::interval(frame);
    let mut written = 0u64;
    let mut frames = 0u64;

    while written < size {
        let accepted = rofs.request_read(h, chunk.max(1), buffer)?;
        loop {
            ticker.tick().await;
            frames += 1;
            rofs.exec_server();
            if !rofs.status(h)?.is_busy() {
                break;
            }
        }

        if rofs.status(h)? == HandleStatus::Error {
            let err = rofs.handle_error(h)?;
            rofs.close(h)?;
            return Err(format!("read failed: {:?}", err).into());
        }

        let bytes = rofs.transferred(h)?;
        buffer = rofs
            .take_buffer(h)?
            .ok_or("transfer finished without a buffer")?;
        out.write_all(&buffer.as_slice()[..bytes as usize])?;
        written += bytes;
        debug!("{}: {} sectors, {}/{} bytes", path, accepted, written, size);
        if accepted == 0 {
            break;
        }
    }

    out.flush()?;
    rofs.close(h)?;
    info!("{} frames for {} bytes", frames, written);
    eprintln!("Extracted {} ({} bytes) -> {}", path, written, output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = load_config(args.config.as_deref())?;

    let result = match &args.command {
        Command::Pack { archive, output } => cmd_pack(archive, output),
        Command::Info { image } => mount_image(config, image).and_then(|mut rofs| cmd_info(&mut rofs)),
        Command::Ls { image, path, all } => mount_image(config, image)
            .and_then(|mut rofs| cmd_ls(&mut rofs, path.as_deref(), *all)),
        Command::Extract {
            image,
            path,
            output,
            frame_ms,
            chunk,
        } => match mount_image(config, image) {
            Ok(mut rofs) => {
                let frame = Duration::from_millis((*frame_ms).max(1));
                cmd_extract(&mut rofs, path, output, frame, *chunk).await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
