//! End-to-end behaviour of io objects on real files.

use segio_core::{
    shard_path, ArraySpec, Io, IoConfig, IoContext, IoError, IoFlags, JaEntryInfo, RwMode,
    FILE_SIZE_V0,
};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const MIB: u32 = 1 << 20;

fn ctx() -> Arc<IoContext> {
    IoContext::new(IoConfig::default())
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Version 0 context: 128 MiB shards keep the multi-shard tests small.
fn legacy_ctx() -> Arc<IoContext> {
    IoContext::new(IoConfig::default().format_version(0))
}

#[test]
fn window_across_two_segments_touches_exactly_two() {
    init_logging();
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx(), dir.path().join("win"), 0, 64 * 1024, 16, IoFlags::empty())
        .unwrap();
    let record: Vec<u8> = (0..70 * 1024u32).map(|i| (i % 251) as u8).collect();

    let mut win = io.win_map(0, 0, 70 * 1024, RwMode::WriteOnly).unwrap();
    assert!(!win.is_zero_copy());
    win.as_mut_slice().copy_from_slice(&record);
    win.unmap().unwrap();
    assert_eq!(io.stats().segment_refs(), 2);
    assert_eq!(io.stats().segment_unrefs(), 2);

    let win = io.win_map(0, 0, 70 * 1024, RwMode::ReadOnly).unwrap();
    assert_eq!(win.as_slice(), &record[..]);
    drop(win);
    assert_eq!(io.stats().segment_refs(), 4);
    assert_eq!(io.stats().segment_unrefs(), 4);

    assert_eq!(io.n_mapped_segments(), 2);
    assert_eq!(io.segment_nref(0), Some(0));
    assert_eq!(io.segment_nref(1), Some(0));
    assert!(!io.is_segment_mapped(2));
}

#[test]
fn header_round_trips_through_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hdr");
    let ctx = ctx();
    {
        let io = Io::create(&ctx, &path, 128, 1 << 16, 32, IoFlags::EXPIRE_SEGMENT).unwrap();
        io.write_user_header(0, b"caller header").unwrap();
        io.set_type(9);
        io.segment(5).unwrap().write_at(0, b"seg5").unwrap();
        io.flush().unwrap();
        io.close().unwrap();
    }

    let io = Io::open(&ctx, &path).unwrap();
    let info = io.header_info();
    assert_eq!(info.header_size, 128);
    assert_eq!(info.segment_size, 1 << 16);
    assert_eq!(info.max_segment, 32);
    assert_eq!(info.io_type, 9);
    assert_eq!(info.flags, IoFlags::EXPIRE_SEGMENT.bits());
    assert_eq!(info.curr_size, 4096 + 6 * (1 << 16));
    assert_eq!(io.flags(), IoFlags::EXPIRE_SEGMENT);

    let mut user = [0u8; 13];
    io.read_user_header(0, &mut user).unwrap();
    assert_eq!(&user, b"caller header");

    let mut data = [0u8; 4];
    io.segment(5).unwrap().read_at(0, &mut data).unwrap();
    assert_eq!(&data, b"seg5");
}

#[test]
fn second_lock_times_out() {
    let ctx = IoContext::new(IoConfig::default().lock_wait(Duration::from_micros(100)));
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx, dir.path().join("lock"), 0, 4096, 4, IoFlags::empty()).unwrap();

    io.lock(5).unwrap();
    assert!(matches!(io.lock(5), Err(IoError::DeadlockAvoided { .. })));
    io.unlock();
    io.lock(5).unwrap();
}

#[test]
fn lock_is_shared_between_handles_of_one_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lock");
    let ctx = ctx();
    let first = Io::create(&ctx, &path, 0, 4096, 4, IoFlags::empty()).unwrap();
    let second = Io::open(&ctx, &path).unwrap();

    first.lock(0).unwrap();
    assert!(second.is_locked());
    assert!(second.lock(0).is_err());
    first.unlock();
    second.lock(0).unwrap();
}

#[test]
fn ja_records_round_trip() {
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx(), dir.path().join("ja"), 0, 1 << 16, 64, IoFlags::empty()).unwrap();

    let small = vec![0x5A; 256];
    let large: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
    io.write_ja(1, 0, 0, &small).unwrap();
    io.write_ja(2, 1, 512, &large).unwrap();

    let einfo = JaEntryInfo::new(0, 256);
    assert_eq!(io.read_ja(&einfo, 0, 1, 0, 0, 256).unwrap(), small);
    let einfo = JaEntryInfo::new(1, 5000);
    assert_eq!(io.read_ja(&einfo, 1, 2, 1, 512, 5000).unwrap(), large);
    assert_eq!(io.stats().ja_reads(), 2);
}

#[test]
fn ja_record_spans_shards() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("span");
    let segment_size = 4 * MIB;
    let io = Io::create(&legacy_ctx(), &path, 0, segment_size, 64, IoFlags::empty()).unwrap();
    assert_eq!(io.layout().file_size, FILE_SIZE_V0);

    // Segment 30 starts at 4096 + 120 MiB in the first shard.
    let to_shard_end = (FILE_SIZE_V0 - 4096 - 120 * u64::from(MIB)) as u32;
    let value: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();

    // Value split across the boundary.
    io.write_ja(11, 30, to_shard_end - 100, &value).unwrap();
    assert!(shard_path(&path, 1).exists());
    let einfo = JaEntryInfo::new(3, 300);
    assert_eq!(io.read_ja(&einfo, 3, 11, 30, to_shard_end - 100, 300).unwrap(), value);

    // Head split across the boundary.
    io.write_ja(12, 30, to_shard_end - 4, &value).unwrap();
    assert_eq!(io.read_ja(&einfo, 3, 12, 30, to_shard_end - 4, 300).unwrap(), value);

    // Inline records: head and value are written in one piece.
    let small: Vec<u8> = (0..200u32).map(|i| (i * 3) as u8).collect();
    let einfo = JaEntryInfo::new(4, 200);
    io.write_ja(13, 30, to_shard_end - 50, &small).unwrap();
    assert_eq!(io.read_ja(&einfo, 4, 13, 30, to_shard_end - 50, 200).unwrap(), small);
    io.write_ja(14, 30, to_shard_end - 3, &small).unwrap();
    assert_eq!(io.read_ja(&einfo, 4, 14, 30, to_shard_end - 3, 200).unwrap(), small);
}

#[test]
fn ja_mismatch_reports_corruption() {
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx(), dir.path().join("ja"), 0, 1 << 16, 8, IoFlags::empty()).unwrap();
    // Mapping the segment sizes the file past the record.
    io.segment(2).unwrap();
    io.write_ja(7, 2, 64, b"value").unwrap();

    let einfo = JaEntryInfo::new(0, 5);
    assert!(matches!(
        io.read_ja(&einfo, 0, 8, 2, 64, 5),
        Err(IoError::FormatCorruption { .. })
    ));
    let einfo = JaEntryInfo::new(0, 6);
    assert!(matches!(
        io.read_ja(&einfo, 0, 7, 2, 64, 6),
        Err(IoError::FormatCorruption { .. })
    ));
}

#[test]
fn concurrent_first_reference_maps_once() {
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx(), dir.path().join("race"), 0, 1 << 16, 4, IoFlags::empty()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let io = Arc::clone(&io);
            thread::spawn(move || {
                let seg = io.segment(3).unwrap();
                seg.write_at(0, b"x").unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(io.stats().maps(), 1);
    assert_eq!(io.n_mapped_segments(), 1);
    assert_eq!(io.segment_nref(3), Some(0));
}

#[test]
fn reference_and_release_restore_count() {
    let dir = tempdir().unwrap();
    let io = Io::create(&ctx(), dir.path().join("nref"), 0, 4096, 4, IoFlags::empty()).unwrap();
    let outer = io.segment(1).unwrap();
    assert_eq!(io.segment_nref(1), Some(1));
    for _ in 0..10 {
        let _inner = io.segment(1).unwrap();
    }
    assert_eq!(io.segment_nref(1), Some(1));
    drop(outer);
    assert_eq!(io.segment_nref(1), Some(0));
}

#[test]
fn eviction_never_unmaps_referenced_segments() {
    let dir = tempdir().unwrap();
    let io = Io::create(
        &ctx(),
        dir.path().join("evict"),
        0,
        4096,
        8,
        IoFlags::EXPIRE_SEGMENT,
    )
    .unwrap();
    for segno in 0..8 {
        io.segment(segno).unwrap();
    }

    let guard = io.segment(6).unwrap();
    guard.write_at(0, b"pinned").unwrap();
    while io.expire(0, u32::MAX) > 0 {}

    assert!(io.is_segment_mapped(6));
    assert!(io.is_segment_mapped(0));
    assert_eq!(io.n_mapped_segments(), 2);
    let mut buf = [0u8; 6];
    guard.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"pinned");
}

#[test]
fn context_sweep_expires_registered_objects() {
    init_logging();
    let dir = tempdir().unwrap();
    let ctx = ctx();
    let tick = Io::create(&ctx, dir.path().join("tick"), 0, 4096, 8, IoFlags::EXPIRE_GTICK)
        .unwrap();
    let seg = Io::create(&ctx, dir.path().join("seg"), 0, 4096, 8, IoFlags::EXPIRE_SEGMENT)
        .unwrap();
    for segno in 0..3 {
        tick.segment(segno).unwrap();
        seg.segment(segno).unwrap();
    }
    assert_eq!(ctx.registered(), 2);

    // Objects registered since the last sweep are skipped once.
    assert_eq!(ctx.expire(0, u32::MAX), 0);
    // Tick policy: 3 idle segments; segment policy: segments 2 and 1.
    assert_eq!(ctx.expire(0, u32::MAX), 5);
    assert_eq!(tick.n_mapped_segments(), 0);
    assert_eq!(seg.n_mapped_segments(), 1);

    drop(tick);
    assert_eq!(ctx.registered(), 1);
}

#[test]
fn array_elements_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("arr");
    let ctx = ctx();
    {
        let io = Io::create_with_array(&ctx, &path, 0, 4096, &[ArraySpec::new(3, 4)]).unwrap();
        let elem = io.array_at(0, 1000, true).unwrap().unwrap();
        assert!(elem.added());
        elem.write(b"abcdefgh").unwrap();
    }
    let io = Io::open(&ctx, &path).unwrap();
    let elem = io.array_at(0, 1000, false).unwrap().unwrap();
    assert!(!elem.added());
    let mut buf = [0u8; 8];
    elem.read(&mut buf).unwrap();
    assert_eq!(&buf, b"abcdefgh");
}

#[test]
fn remove_and_rename_cover_every_shard() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("family");
    let renamed = dir.path().join("moved");
    let ctx = legacy_ctx();
    {
        let io = Io::create(&ctx, &path, 0, 4 * MIB, 96, IoFlags::empty()).unwrap();
        // Segments 31 and 63 open the second and third shard.
        io.segment(31).unwrap();
        io.segment(63).unwrap();
        assert_eq!(io.n_files(), 3);
        assert!(!io.is_corrupt());
    }
    assert!(shard_path(&path, 2).exists());

    Io::rename(&ctx, &path, &renamed).unwrap();
    for n in 0..3 {
        assert!(!shard_path(&path, n).exists());
        assert!(shard_path(&renamed, n).exists());
    }

    Io::remove(&ctx, &renamed).unwrap();
    for n in 0..3 {
        assert!(!shard_path(&renamed, n).exists());
    }
    assert!(Io::remove(&ctx, &renamed).is_err());
    Io::remove_if_exists(&ctx, &renamed).unwrap();
}

#[test]
fn missing_shard_marks_object_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt");
    let io = Io::create(&legacy_ctx(), &path, 0, 4 * MIB, 64, IoFlags::empty()).unwrap();
    io.segment(40).unwrap();
    assert!(!io.is_corrupt());

    std::fs::remove_file(shard_path(&path, 1)).unwrap();
    assert!(io.is_corrupt());
    assert!(io.size().is_err());
}
