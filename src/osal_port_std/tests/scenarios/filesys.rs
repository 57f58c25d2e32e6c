//! Filesystems, files and directories
use std::{collections::BTreeSet, fs};

use osal::{
    osal_core::{
        config::Config,
        error::{FileSysError, FsOpError, IoError, OpenError, PathError},
        fs::{AccessMode, OpenFlags, SeekWhence, SelectFlags},
    },
    FileSysFlags, ObjectClass, Osal, Timeout,
};
use osal_port_std::{Options, StdBackend};

use crate::{new_osal_with, scratch_dir};

/// Create a context with a RAM disk mounted at `/ram`.
fn osal_with_ram_disk() -> Osal<StdBackend> {
    let osal = new_osal_with(
        Options {
            volatile_root: scratch_dir(),
            ..Default::default()
        },
        Config::default(),
    );
    osal.mkfs(None, "/ramdev0", "RAM0", 512, 1024).unwrap();
    osal.mount("/ramdev0", "/ram").unwrap();
    osal
}

#[test]
fn file_round_trip() {
    let osal = osal_with_ram_disk();
    let fd = osal.creat("/ram/test.txt", AccessMode::ReadWrite).unwrap();
    assert_eq!(osal.write(fd, b"hello, world"), Ok(12));
    assert_eq!(osal.lseek(fd, 7, SeekWhence::Set), Ok(7));
    let mut buf = [0u8; 16];
    assert_eq!(osal.read(fd, &mut buf), Ok(5));
    assert_eq!(&buf[..5], b"world");
    assert_eq!(osal.read(fd, &mut buf), Ok(0));

    let info = osal.fd_get_info(fd).unwrap();
    assert_eq!(info.path, "/ram/test.txt");
    assert_eq!(info.access, AccessMode::ReadWrite);
    assert!(!osal.is_selectable(fd).unwrap());
    assert_eq!(
        osal.select_single(fd, SelectFlags::READABLE, Timeout::NoWait),
        Err(IoError::NotSupported)
    );
    osal.close(fd).unwrap();
    assert_eq!(osal.read(fd, &mut buf), Err(IoError::InvalidHandle));

    let stat = osal.stat("/ram/test.txt").unwrap();
    assert_eq!(stat.size, 12);
    assert!(!stat.is_dir());

    let fd = osal
        .open("/ram/test.txt", OpenFlags::empty(), AccessMode::ReadOnly)
        .unwrap();
    assert_eq!(osal.timed_read(fd, &mut buf, Timeout::NoWait), Ok(12));
    osal.close(fd).unwrap();
}

#[test]
fn rename_and_remove() {
    let osal = osal_with_ram_disk();
    let fd = osal.creat("/ram/a.txt", AccessMode::WriteOnly).unwrap();
    assert!(osal.file_open_check("/ram/a.txt"));

    osal.rename("/ram/a.txt", "/ram/b.txt").unwrap();
    assert_eq!(osal.fd_get_info(fd).unwrap().path, "/ram/b.txt");
    assert!(!osal.file_open_check("/ram/a.txt"));
    assert_eq!(osal.stat("/ram/a.txt"), Err(FsOpError::BackendFailure));

    osal.close_file_by_name("/ram/b.txt").unwrap();
    assert_eq!(
        osal.close_file_by_name("/ram/b.txt"),
        Err(FsOpError::NotFound)
    );
    osal.remove("/ram/b.txt").unwrap();
    assert_eq!(osal.remove("/ram/b.txt"), Err(FsOpError::BackendFailure));
}

#[test]
fn close_all_files() {
    let osal = osal_with_ram_disk();
    let before = osal.get_fs_info();
    for name in ["/ram/1", "/ram/2", "/ram/3"] {
        osal.creat(name, AccessMode::ReadWrite).unwrap();
    }
    assert_eq!(osal.get_fs_info().free_fds, before.free_fds - 3);
    osal.close_all_files().unwrap();
    assert_eq!(osal.get_fs_info().free_fds, before.max_fds);
}

#[test]
fn directories() {
    let osal = osal_with_ram_disk();
    osal.mkdir("/ram/dir").unwrap();
    assert!(osal.stat("/ram/dir").unwrap().is_dir());
    for name in ["/ram/dir/x", "/ram/dir/y"] {
        let fd = osal.creat(name, AccessMode::WriteOnly).unwrap();
        osal.close(fd).unwrap();
    }

    let dir = osal.directory_open("/ram/dir").unwrap();
    let mut names = BTreeSet::new();
    while let Some(entry) = osal.directory_read(dir).unwrap() {
        names.insert(entry.name);
    }
    assert_eq!(
        names,
        ["x", "y"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
    );

    osal.directory_rewind(dir).unwrap();
    assert!(osal.directory_read(dir).unwrap().is_some());
    osal.directory_close(dir).unwrap();
    assert_eq!(osal.directory_read(dir), Err(IoError::InvalidHandle));

    assert_eq!(osal.rmdir("/ram/dir"), Err(FsOpError::BackendFailure));
    osal.remove("/ram/dir/x").unwrap();
    osal.remove("/ram/dir/y").unwrap();
    osal.rmdir("/ram/dir").unwrap();
}

#[test]
fn path_validation() {
    let osal = osal_with_ram_disk();
    assert_eq!(osal.translate_path("ram/x"), Err(PathError::PathInvalid));
    assert_eq!(osal.translate_path("/cf/x"), Err(PathError::PathInvalid));
    assert_eq!(osal.translate_path("/ramdisk/x"), Err(PathError::PathInvalid));
    assert_eq!(
        osal.translate_path("/ram/a_file_name_that_is_too_long"),
        Err(PathError::NameTooLongFs)
    );
    assert_eq!(
        osal.translate_path(&format!("/ram/{}/x", "d".repeat(64))),
        Err(PathError::PathTooLong)
    );
    assert_eq!(
        osal.open("nope", OpenFlags::CREATE, AccessMode::ReadWrite),
        Err(OpenError::PathInvalid)
    );

    let phys = osal.get_phys_drive_name("/ram").unwrap();
    assert_eq!(osal.translate_path("/ram/x"), Ok(phys.join("x")));
    assert_eq!(osal.translate_path("/ram"), Ok(phys));
}

#[test]
fn mount_lifecycle() {
    let osal = new_osal_with(
        Options {
            volatile_root: scratch_dir(),
            ..Default::default()
        },
        Config::default(),
    );
    let handle = osal.mkfs(None, "/ramdev1", "RAM1", 512, 64).unwrap();
    assert_eq!(osal.filesys_get_id_by_name("/ramdev1"), Ok(handle));
    assert_eq!(
        osal.mkfs(None, "/ramdev1", "RAM1", 512, 64),
        Err(FileSysError::AlreadyExists)
    );
    assert_eq!(osal.unmount("/ram1"), Err(FileSysError::NotFound));

    osal.mount("/ramdev1", "/ram1").unwrap();
    assert_eq!(
        osal.mount("/ramdev1", "/other"),
        Err(FileSysError::BadObjectState)
    );
    let info = osal.filesys_get_info(handle).unwrap();
    assert!(info.flags.contains(
        FileSysFlags::READY | FileSysFlags::MOUNTED_SYSTEM | FileSysFlags::MOUNTED_VIRTUAL
    ));
    assert_eq!(info.virtual_mount_point.as_deref(), Some("/ram1"));

    #[cfg(unix)]
    assert!(osal.fs_bytes_free("/ram1").unwrap() > 0);
    assert_eq!(osal.chkfs("/ram1", false), Err(FileSysError::NotSupported));

    assert_eq!(osal.rmfs("/ramdev1"), Err(FileSysError::BadObjectState));
    osal.unmount("/ram1").unwrap();
    assert_eq!(osal.translate_path("/ram1/x"), Err(PathError::PathInvalid));
    osal.rmfs("/ramdev1").unwrap();
    assert_eq!(osal.rmfs("/ramdev1"), Err(FileSysError::NotFound));
}

#[test]
fn concurrent_mounts_at_one_mount_point() {
    use std::sync::Barrier;

    let osal = new_osal_with(
        Options {
            volatile_root: scratch_dir(),
            ..Default::default()
        },
        Config::default(),
    );
    osal.mkfs(None, "/ramdev0", "RAM0", 512, 64).unwrap();
    osal.mkfs(None, "/ramdev1", "RAM1", 512, 64).unwrap();

    for _ in 0..50 {
        let barrier = Barrier::new(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let threads: Vec<_> = ["/ramdev0", "/ramdev1"]
                .into_iter()
                .map(|dev| {
                    let (osal, barrier) = (&osal, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        osal.mount(dev, "/same")
                    })
                })
                .collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
        assert!(results.contains(&Err(FileSysError::AlreadyExists)));
        osal.unmount("/same").unwrap();
    }
}

#[test]
fn device_table_full() {
    let osal = new_osal_with(
        Options {
            volatile_root: scratch_dir(),
            ..Default::default()
        },
        Config::default().with_capacity(ObjectClass::FileSys, 1),
    );
    osal.mkfs(None, "/ramdev0", "RAM0", 512, 64).unwrap();
    assert_eq!(
        osal.mkfs(None, "/ramdev1", "RAM1", 512, 64),
        Err(FileSysError::DeviceNotFree)
    );
    assert_eq!(
        osal.get_fs_info().free_volumes,
        0
    );
}

#[test]
fn block_devices_are_not_supported() {
    let osal = osal_with_ram_disk();
    assert_eq!(
        osal.mkfs(None, "/dev/sda1", "DISK", 512, 64),
        Err(FileSysError::NotSupported)
    );
    // The failed creation left no record behind
    assert!(osal.filesys_get_id_by_name("/dev/sda1").is_err());
}

#[test]
fn fixed_map() {
    let dir = scratch_dir().join("cfdev");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("data.bin"), b"0123").unwrap();

    let osal = osal_with_ram_disk();
    let phys = dir.to_str().unwrap();
    let handle = osal.add_fixed_map(phys, "/cf").unwrap();
    let info = osal.filesys_get_info(handle).unwrap();
    assert_eq!(info.device_name, "cfdev");
    assert!(info.flags.contains(FileSysFlags::FIXED));
    assert_eq!(
        osal.add_fixed_map(phys, "/ram"),
        Err(FileSysError::AlreadyExists)
    );

    assert_eq!(osal.stat("/cf/data.bin").unwrap().size, 4);
    assert_eq!(osal.get_phys_drive_name("/cf"), Ok(dir.clone()));

    // Unmounting a fixed map leaves the host directory alone
    osal.unmount("/cf").unwrap();
    osal.rmfs("cfdev").unwrap();
    assert!(dir.join("data.bin").exists());
}

#[test]
fn teardown_stops_volumes() {
    let root = scratch_dir();
    let osal = new_osal_with(
        Options {
            volatile_root: root.clone(),
            ..Default::default()
        },
        Config::default(),
    );
    osal.mkfs(None, "/ramdev0", "RAM0", 512, 64).unwrap();
    osal.mount("/ramdev0", "/ram").unwrap();
    let fd = osal.creat("/ram/f", AccessMode::ReadWrite).unwrap();
    osal.teardown();

    assert_eq!(osal.write(fd, b"x"), Err(IoError::InvalidHandle));
    assert!(!root.join("osal:RAM0").exists());
}

#[cfg(unix)]
#[test]
fn fifo_is_selectable() {
    use std::{ffi::CString, os::unix::ffi::OsStrExt, time::Duration};

    let osal = osal_with_ram_disk();
    let local = osal.translate_path("/ram/fifo").unwrap();
    let c_path = CString::new(local.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

    let fd = osal
        .open("/ram/fifo", OpenFlags::empty(), AccessMode::ReadWrite)
        .unwrap();
    assert!(osal.is_selectable(fd).unwrap());
    assert_eq!(
        osal.select_single(fd, SelectFlags::READABLE, Duration::from_millis(30)),
        Err(IoError::Timeout)
    );
    assert_eq!(
        osal.select_single(fd, SelectFlags::empty(), Timeout::NoWait),
        Err(IoError::BadParam)
    );
    assert_eq!(
        osal.select_single(fd, SelectFlags::WRITABLE, Timeout::NoWait),
        Ok(SelectFlags::WRITABLE)
    );

    assert_eq!(osal.timed_write(fd, b"ping", Timeout::NoWait), Ok(4));
    let mut buf = [0u8; 4];
    assert_eq!(
        osal.timed_read(fd, &mut buf, Duration::from_millis(500)),
        Ok(4)
    );
    assert_eq!(&buf, b"ping");
    assert_eq!(
        osal.timed_read(fd, &mut buf, Duration::from_millis(30)),
        Err(IoError::Timeout)
    );
    osal.close(fd).unwrap();
}

#[cfg(unix)]
#[test]
fn close_wakes_blocked_io() {
    use std::{ffi::CString, os::unix::ffi::OsStrExt, sync::mpsc, thread, time::Duration};

    let osal = osal_with_ram_disk();
    let local = osal.translate_path("/ram/fifo").unwrap();
    let c_path = CString::new(local.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
    let fd = osal
        .open("/ram/fifo", OpenFlags::empty(), AccessMode::ReadWrite)
        .unwrap();

    thread::scope(|s| {
        let selector = s.spawn(|| osal.select_single(fd, SelectFlags::READABLE, Timeout::Forever));
        let reader = s.spawn(|| {
            let mut buf = [0u8; 4];
            osal.read(fd, &mut buf)
        });
        thread::sleep(Duration::from_millis(100));

        let (send, recv) = mpsc::channel();
        let osal = &osal;
        s.spawn(move || send.send(osal.close(fd)).unwrap());
        assert_eq!(recv.recv_timeout(Duration::from_secs(5)), Ok(Ok(())));

        assert_eq!(selector.join().unwrap(), Err(IoError::InvalidHandle));
        assert_eq!(reader.join().unwrap(), Err(IoError::InvalidHandle));
    });
}
