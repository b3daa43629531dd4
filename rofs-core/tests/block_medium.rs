//! Mounting through a block device

mod common;

use common::{run_until_idle, MemoryBlockDevice};
use rofs_core::{
    BlockDeviceMedium, HandleStatus, ImageBuilder, Rofs, RofsConfig, RofsError, SectorBuffer,
};

/// Blocks of padding in front of the image on the device.
const BASE_LBA: u64 = 8;

fn hello_image() -> Vec<u8> {
    let mut builder = ImageBuilder::new("BLOCK");
    builder.add_file("HELLO.TXT", b"hello".to_vec()).unwrap();
    builder.add_file("DATA/BIG.BIN", vec![0x5A; 3 * 2048]).unwrap();
    builder.build().unwrap()
}

fn device_with_image(block_size: usize) -> MemoryBlockDevice {
    let mut data = vec![0u8; BASE_LBA as usize * block_size];
    data.extend(hello_image());
    MemoryBlockDevice::new(data, block_size)
}

fn mount(medium: BlockDeviceMedium<MemoryBlockDevice>, container: rofs_core::ContainerId) -> Rofs {
    let mut rofs = Rofs::init(RofsConfig::default()).unwrap();
    rofs.register_primitive(Box::new(medium)).unwrap();
    rofs.add_volume("BLK", container).unwrap();
    rofs
}

#[test]
fn test_read_file_through_offset_device() {
    let mut medium = BlockDeviceMedium::new().with_sectors_per_tick(1);
    let disc = medium.attach(device_with_image(512), BASE_LBA).unwrap();
    let mut rofs = mount(medium, disc);

    assert!(rofs.file_exists("HELLO.TXT").unwrap());
    let h = rofs.open("HELLO.TXT", None).unwrap();
    assert_eq!(rofs.file_size(h).unwrap(), 5);
    rofs.request_read(h, 1, SectorBuffer::with_sectors(1)).unwrap();
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Complete);
    let buf = rofs.take_buffer(h).unwrap().unwrap();
    assert_eq!(&buf.as_slice()[..5], b"hello");

    let big = rofs.open("DATA/BIG.BIN", None).unwrap();
    rofs.request_read(big, 3, SectorBuffer::with_sectors(3)).unwrap();
    rofs.exec_server();
    assert_eq!(rofs.status(big).unwrap(), HandleStatus::Transferring);
    assert_eq!(run_until_idle(&mut rofs, big), HandleStatus::Complete);
    let buf = rofs.take_buffer(big).unwrap().unwrap();
    assert!(buf.as_slice()[..3 * 2048].iter().all(|&b| b == 0x5A));
}

#[test]
fn test_block_size_must_divide_sector() {
    let mut medium = BlockDeviceMedium::new();
    assert!(matches!(
        medium.attach(MemoryBlockDevice::new(vec![0; 8192], 4096), 0),
        Err(RofsError::InvalidParameter(_))
    ));
    assert!(medium
        .attach(MemoryBlockDevice::new(vec![0; 8192], 2048), 0)
        .is_ok());
}

#[test]
fn test_bad_block_fails_the_handle() {
    let mut device = device_with_image(512);
    let mut medium = BlockDeviceMedium::new();
    let scout = medium.attach(device.clone(), BASE_LBA).unwrap();
    let mut rofs = mount(medium, scout);
    let h = rofs.open("HELLO.TXT", None).unwrap();
    let sector = rofs.start_byte(h).unwrap() / 2048;
    drop(rofs);

    device.bad_block = Some(BASE_LBA + sector * 4 + 1);
    let mut medium = BlockDeviceMedium::new();
    let disc = medium.attach(device, BASE_LBA).unwrap();
    let mut rofs = mount(medium, disc);
    let h = rofs.open("HELLO.TXT", None).unwrap();
    rofs.request_read(h, 1, SectorBuffer::with_sectors(1)).unwrap();
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Error);
    assert_eq!(rofs.handle_error(h).unwrap(), Some(RofsError::Primitive(4)));
}

#[test]
fn test_detach_returns_device() {
    let mut medium = BlockDeviceMedium::new();
    let disc = medium.attach(device_with_image(1024), BASE_LBA).unwrap();
    let device = medium.detach(disc).unwrap();
    assert_eq!(device.block_size, 1024);
    assert_eq!(device.data.len(), BASE_LBA as usize * 1024 + hello_image().len());
    assert!(medium.detach(disc).is_none());
}
