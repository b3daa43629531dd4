//! Handle and transfer state machine tests

mod common;

use std::sync::{Arc, Mutex};

use common::{
    mounted_track_disc, rofs_with, run_until_idle, track_disc, TRACK01_SECTOR, TRACK01_SIZE,
};
use rofs_core::{
    HandleStatus, MemoryMedium, RofsConfig, RofsError, SectorBuffer, SeekMode, SizePolicy,
    SECTOR_LEN,
};

#[test]
fn test_track01_scenario() {
    let (mut rofs, _) = mounted_track_disc();
    assert_eq!(rofs.current_directory(None).unwrap().count(), 10);

    let h = rofs.open("TRACK01", None).unwrap();
    assert_eq!(rofs.file_size(h).unwrap(), TRACK01_SIZE);
    assert_eq!(rofs.start_byte(h).unwrap(), TRACK01_SECTOR as u64 * 2048);
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Idle);

    assert_eq!(rofs.request_read(h, 10, SectorBuffer::with_sectors(10)), Ok(10));
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Transferring);
    rofs.exec_server();
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Complete);
    assert_eq!(rofs.tell(h).unwrap(), 10);
    assert_eq!(rofs.transferred(h).unwrap(), 10 * 2048);

    let first = rofs.take_buffer(h).unwrap().unwrap();
    assert_eq!(&first.as_slice()[..8], b"ROFSVOL1");

    // The second request continues at sector 26, not 16.
    rofs.request_read(h, 10, first).unwrap();
    rofs.exec_server();
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Complete);
    assert_eq!(rofs.tell(h).unwrap(), 20);
    let second = rofs.take_buffer(h).unwrap().unwrap();
    assert_eq!(second.as_slice()[0], 26);
    assert_eq!(second.as_slice()[9 * SECTOR_LEN], 35);
}

#[test]
fn test_stop_mid_transfer_keeps_cursor() {
    let mut medium = MemoryMedium::new().with_sectors_per_tick(2);
    let disc = medium.insert(track_disc());
    let mut rofs = rofs_with(RofsConfig::default(), medium);
    rofs.add_volume("DATA", disc).unwrap();

    let h = rofs.open("TRACK01", None).unwrap();
    rofs.seek(h, 4, SeekMode::Set).unwrap();
    rofs.request_read(h, 10, SectorBuffer::with_sectors(10)).unwrap();
    rofs.exec_server();
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Transferring);
    assert_eq!(rofs.transferred(h).unwrap(), 2 * 2048);

    rofs.stop_transfer(h).unwrap();
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Idle);
    assert_eq!(rofs.tell(h).unwrap(), 4);

    let buf = rofs.take_buffer(h).unwrap().unwrap();
    rofs.request_read(h, 10, buf).unwrap();
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Complete);
    assert_eq!(rofs.tell(h).unwrap(), 14);
    let buf = rofs.take_buffer(h).unwrap().unwrap();
    assert_eq!(buf.as_slice()[0], 20);
}

#[test]
fn test_read_clamps_at_end_of_file() {
    let (mut rofs, _) = mounted_track_disc();
    let h = rofs.open("TRACK01", None).unwrap();
    rofs.seek(h, 45, SeekMode::Set).unwrap();

    assert_eq!(rofs.request_read(h, 10, SectorBuffer::with_sectors(10)), Ok(4));
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Complete);
    assert_eq!(rofs.tell(h).unwrap(), 49);
    assert_eq!(rofs.transferred(h).unwrap(), TRACK01_SIZE - 45 * 2048);
    assert_eq!(rofs.transferred_u32(h).unwrap(), 7840);

    // Nothing left: accepted immediately as empty.
    assert_eq!(rofs.request_read(h, 1, SectorBuffer::with_sectors(1)), Ok(0));
    assert_eq!(rofs.status(h).unwrap(), HandleStatus::Complete);
}

#[test]
fn test_seek_round_trip() {
    let (mut rofs, _) = mounted_track_disc();
    let h = rofs.open("track01", None).unwrap();
    for n in 0..=49 {
        assert_eq!(rofs.seek(h, n, SeekMode::Set), Ok(n as u32));
        assert_eq!(rofs.tell(h).unwrap(), n as u32);
    }
    assert_eq!(rofs.seek(h, 50, SeekMode::Set), Err(RofsError::SeekFailed));
    assert_eq!(rofs.seek(h, -1, SeekMode::Set), Err(RofsError::SeekFailed));
    assert_eq!(rofs.tell(h).unwrap(), 49);
    assert_eq!(rofs.last_error(), Some(&RofsError::SeekFailed));
}

#[test]
fn test_pool_exhaustion_and_reuse() {
    let mut medium = MemoryMedium::new();
    let disc = medium.insert(track_disc());
    let config = RofsConfig {
        max_open: 2,
        ..RofsConfig::default()
    };
    let mut rofs = rofs_with(config, medium);
    rofs.add_volume("DATA", disc).unwrap();

    let a = rofs.open("TRACK01", None).unwrap();
    let _b = rofs.open("TRACK02", None).unwrap();
    assert_eq!(rofs.open("TRACK03", None), Err(RofsError::NoHandleAvailable));

    rofs.close(a).unwrap();
    assert!(rofs.open("TRACK03", None).is_ok());
    assert_eq!(rofs.close(a).unwrap_err(), RofsError::InvalidHandle);
    assert_eq!(rofs.open_handles(), 2);
}

#[test]
fn test_open_failures_allocate_nothing() {
    let (mut rofs, _) = mounted_track_disc();
    assert_eq!(
        rofs.open("TRACK99", None),
        Err(RofsError::FileNotFound("TRACK99".into()))
    );
    assert_eq!(rofs.open(".", None), Err(RofsError::NotAFile(".".into())));
    assert_eq!(
        rofs.open("NOPE:TRACK01", None),
        Err(RofsError::InvalidVolumeName("NOPE".into()))
    );
    assert_eq!(rofs.open_handles(), 0);
}

#[test]
fn test_primitive_fault_reaches_handle_latch_and_callback() {
    let mut medium = MemoryMedium::new();
    let disc = medium.insert(track_disc());
    medium.inject_fault(disc, 20, 7);
    let mut rofs = rofs_with(RofsConfig::default(), medium);
    rofs.add_volume("DATA", disc).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    rofs.set_error_callback(Some(Box::new(move |msg, err| {
        sink.lock().unwrap().push((msg.to_string(), err.clone()));
    })));

    let h = rofs.open("TRACK01", None).unwrap();
    rofs.request_read(h, 10, SectorBuffer::with_sectors(10)).unwrap();
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Error);
    assert_eq!(rofs.handle_error(h).unwrap(), Some(RofsError::Primitive(7)));
    assert_eq!(rofs.last_error(), Some(&RofsError::Primitive(7)));
    assert_eq!(rofs.tell(h).unwrap(), 0);

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.starts_with("exec_server"));
        assert_eq!(seen[0].1, RofsError::Primitive(7));
    }

    assert_eq!(
        rofs.request_read(h, 1, SectorBuffer::with_sectors(1)),
        Err(RofsError::ReadRequestFailed)
    );

    // Stopping clears the error; the bad sector only fails once.
    rofs.stop_transfer(h).unwrap();
    assert_eq!(rofs.handle_error(h).unwrap(), None);
    rofs.request_read(h, 10, SectorBuffer::with_sectors(10)).unwrap();
    assert_eq!(run_until_idle(&mut rofs, h), HandleStatus::Complete);
    assert_eq!(rofs.last_error(), None);
}

#[test]
fn test_volumes_sharing_a_container_take_turns() {
    let mut medium = MemoryMedium::new().with_sectors_per_tick(4);
    let disc = medium.insert(track_disc());
    let mut rofs = rofs_with(RofsConfig::default(), medium);
    rofs.add_volume("A", disc).unwrap();
    rofs.add_volume("B", disc).unwrap();

    let a = rofs.open("A:TRACK01", None).unwrap();
    let b = rofs.open("B:TRACK02", None).unwrap();
    rofs.request_read(a, 8, SectorBuffer::with_sectors(8)).unwrap();
    rofs.request_read(b, 1, SectorBuffer::with_sectors(1)).unwrap();
    assert_eq!(rofs.status(a).unwrap(), HandleStatus::Transferring);
    assert_eq!(rofs.status(b).unwrap(), HandleStatus::RequestPending);

    rofs.exec_server();
    assert_eq!(rofs.status(b).unwrap(), HandleStatus::RequestPending);
    assert_eq!(run_until_idle(&mut rofs, a), HandleStatus::Complete);
    assert_eq!(run_until_idle(&mut rofs, b), HandleStatus::Complete);

    let buf = rofs.take_buffer(b).unwrap().unwrap();
    assert_eq!(buf.as_slice()[0], 65);
}

#[test]
fn test_open_relative_to_record() {
    let (mut rofs, _) = mounted_track_disc();
    let mut root = rofs_core::DirRecord::with_capacity(10);
    rofs.load_directory("/", &mut root).unwrap();
    let h = rofs.open("TRACK08", Some(&root)).unwrap();
    assert_eq!(rofs.file_size_u32(h).unwrap(), 2048);
}

#[test]
fn test_stop_pending_request_leaves_other_transfer_running() {
    let mut medium = MemoryMedium::new().with_sectors_per_tick(4);
    let disc = medium.insert(track_disc());
    let mut rofs = rofs_with(RofsConfig::default(), medium);
    rofs.add_volume("DATA", disc).unwrap();

    let a = rofs.open("TRACK01", None).unwrap();
    let b = rofs.open("TRACK02", None).unwrap();
    rofs.request_read(a, 8, SectorBuffer::with_sectors(8)).unwrap();
    rofs.request_read(b, 1, SectorBuffer::with_sectors(1)).unwrap();
    assert_eq!(rofs.status(b).unwrap(), HandleStatus::RequestPending);

    rofs.stop_transfer(b).unwrap();
    assert_eq!(rofs.status(b).unwrap(), HandleStatus::Idle);
    assert_eq!(rofs.tell(b).unwrap(), 0);
    assert_eq!(rofs.status(a).unwrap(), HandleStatus::Transferring);

    rofs.exec_server();
    assert_eq!(rofs.transferred(a).unwrap(), 4 * 2048);
    assert_eq!(run_until_idle(&mut rofs, a), HandleStatus::Complete);

    let buf = rofs.take_buffer(b).unwrap().unwrap();
    rofs.request_read(b, 1, buf).unwrap();
    assert_eq!(run_until_idle(&mut rofs, b), HandleStatus::Complete);
    assert_eq!(rofs.take_buffer(b).unwrap().unwrap().as_slice()[0], 65);
}

#[test]
fn test_failed_queries_latch_and_report() {
    let mut medium = MemoryMedium::new();
    let disc = medium.insert(track_disc());
    let config = RofsConfig {
        size_policy: SizePolicy::Reject,
        ..RofsConfig::default()
    };
    let mut rofs = rofs_with(config, medium);
    rofs.add_volume("DATA", disc).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    rofs.set_error_callback(Some(Box::new(move |msg, err| {
        sink.lock().unwrap().push((msg.to_string(), err.clone()));
    })));

    let h = rofs.open("TRACK01", None).unwrap();
    rofs.close(h).unwrap();
    assert_eq!(rofs.tell(h), Err(RofsError::InvalidHandle));
    assert_eq!(rofs.last_error(), Some(&RofsError::InvalidHandle));
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.starts_with("tell"));
        assert_eq!(seen[0].1, RofsError::InvalidHandle);
    }

    // A successful query clears the latch.
    let big = rofs.open_range(None, 0, 3_000_000).unwrap();
    assert_eq!(rofs.file_size(big).unwrap(), 3_000_000 * 2048);
    assert_eq!(rofs.last_error(), None);

    assert!(matches!(
        rofs.file_size_u32(big),
        Err(RofsError::InvalidParameter(_))
    ));
    assert!(matches!(
        rofs.last_error(),
        Some(RofsError::InvalidParameter(_))
    ));
    assert_eq!(seen.lock().unwrap().len(), 2);
}
