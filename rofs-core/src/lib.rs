//! ROFS: read-only filesystem for optical-media images
//!
//! This crate provides:
//! - A sector-addressed image format (descriptor, directory records, data)
//! - Volume mounting and path resolution over that format
//! - Non-blocking, handle-based sector reads driven by a server tick
//! - Image authoring from files or ZIP archives
//!
//! # Architecture
//!
//! The filesystem is layered:
//! - `PrimitiveIo` trait: low-level per-container block operations
//! - `Rofs`: the work area (volumes, handle pool, diagnostics)
//! - `DirRecord`: caller-sized directory tables
//! - `ImageBuilder` / `load_archive`: the authoring side
//!
//! ```no_run
//! use rofs_core::{ImageBuilder, MemoryMedium, Rofs, RofsConfig, SectorBuffer};
//!
//! let mut builder = ImageBuilder::new("DEMO");
//! builder.add_file("README.TXT", b"hello".to_vec()).unwrap();
//!
//! let mut medium = MemoryMedium::new();
//! let disc = medium.insert(builder.build().unwrap());
//!
//! let mut rofs = Rofs::init(RofsConfig::default()).unwrap();
//! rofs.register_primitive(Box::new(medium)).unwrap();
//! rofs.add_volume("DATA", disc).unwrap();
//!
//! let h = rofs.open("README.TXT", None).unwrap();
//! rofs.request_read(h, 1, SectorBuffer::with_sectors(1)).unwrap();
//! while rofs.status(h).unwrap().is_busy() {
//!     rofs.exec_server();
//! }
//! ```

pub mod archive;
pub mod buffer;
pub mod config;
pub mod diag;
pub mod dir;
pub mod error;
pub mod format;
pub mod handle;
pub mod image;
pub mod medium;
mod rofs;
pub mod volume;

pub use archive::{
    load_archive, load_archive_from_path, pack_archive_from_path, ImageManifest, LoadedArchive,
};
pub use buffer::SectorBuffer;
pub use config::{work_size, RofsConfig, SizePolicy};
pub use diag::ErrorCallback;
pub use dir::{DirEntry, DirRecord};
pub use error::{PackError, PackResult, RofsError, RofsResult};
pub use format::{Attributes, FormatFlags, SECTOR_LEN};
pub use handle::{HandleId, HandleStatus, SeekMode};
pub use image::ImageBuilder;
pub use medium::{
    BlockDeviceMedium, ContainerId, MemoryMedium, PrimitiveFault, PrimitiveIo, PrimitiveStatus,
};
pub use rofs::{version, Rofs};
pub use volume::VolumeInfo;
