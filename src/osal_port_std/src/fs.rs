//! Files, directories and volumes on `std::fs`
use std::{
    fs,
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, RwLock,
    },
};

use osal_core::{
    backend::{BackendError, DirOps, FileOps, FileSysOps, PendError, VolumeError},
    fs::{
        AccessMode, DirEntry, FileMode, FileStat, FsStat, OpenFlags, SeekWhence, SelectFlags,
        VolumeKind, VolumeSpec,
    },
    time::Timeout,
};

use crate::{io_error, StdBackend, UNKNOWN_ERROR};

/// An open file.
#[derive(Debug)]
pub struct File {
    /// `None` after `file_close`.
    inner: RwLock<Option<fs::File>>,
    selectable: bool,
    /// Set by `file_close` before it waits for `inner`.
    closing: AtomicBool,
    /// Wakes threads blocked on a selectable file when it is closed.
    wake: Option<WakePipe>,
}

impl File {
    fn with<R>(&self, f: impl FnOnce(&fs::File) -> io::Result<R>) -> Result<R, BackendError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let file = inner.as_ref().ok_or(BackendError(UNKNOWN_ERROR))?;
        f(file).map_err(io_error)
    }

    /// Wait until the file satisfies one of `flags`. Fails with
    /// `PendError::Deleted` if the file is closed meanwhile.
    fn select(&self, flags: SelectFlags, timeout: Timeout) -> Result<SelectFlags, PendError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if self.closing.load(Ordering::Acquire) {
            return Err(PendError::Deleted);
        }
        let file = inner.as_ref().ok_or(PendError::Deleted)?;
        select(file, self.wake.as_ref(), flags, timeout)
    }

    /// Block until a selectable file is ready for the given I/O direction,
    /// so that the I/O itself does not block with `inner` locked.
    fn wait_ready(&self, flags: SelectFlags) -> Result<(), BackendError> {
        if !self.selectable {
            return Ok(());
        }
        match self.select(flags, Timeout::Forever) {
            Ok(_) => Ok(()),
            Err(PendError::Failure(e)) => Err(e),
            Err(_) => Err(BackendError(CLOSED_ERROR)),
        }
    }
}

#[cfg(unix)]
const CLOSED_ERROR: i32 = libc::EBADF;
#[cfg(not(unix))]
const CLOSED_ERROR: i32 = UNKNOWN_ERROR;

/// A pipe that becomes readable, and stays so, once raised.
#[derive(Debug)]
struct WakePipe {
    read: fs::File,
    write: fs::File,
}

impl WakePipe {
    #[cfg(unix)]
    fn new() -> io::Result<Self> {
        use std::os::unix::io::FromRawFd;

        let mut fds: [libc::c_int; 2] = [0; 2];
        // Safety: `fds` is an array of two `c_int`s
        ok_or_errno(unsafe { libc::pipe(fds.as_mut_ptr()) })
            .map_err(|e| io::Error::from_raw_os_error(e.0))?;
        // Safety: `pipe` returned two descriptors that nothing else owns
        let (read, write) = unsafe { (fs::File::from_raw_fd(fds[0]), fs::File::from_raw_fd(fds[1])) };
        for fd in fds {
            // Safety: `fd` is open
            ok_or_errno(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })
                .map_err(|e| io::Error::from_raw_os_error(e.0))?;
        }
        Ok(Self { read, write })
    }

    #[cfg(not(unix))]
    fn new() -> io::Result<Self> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn raise(&self) {
        if let Err(e) = (&self.write).write(&[0]) {
            log::debug!("failed to raise a wake pipe: {e}");
        }
    }
}

/// An open directory stream.
#[derive(Debug)]
pub struct Dir {
    path: PathBuf,
    /// `None` after `dir_close`.
    entries: Mutex<Option<fs::ReadDir>>,
}

impl Dir {
    fn lock(&self) -> MutexGuard<'_, Option<fs::ReadDir>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(unix)]
fn is_selectable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let ty = metadata.file_type();
    ty.is_fifo() || ty.is_socket() || ty.is_char_device()
}

#[cfg(not(unix))]
fn is_selectable(_: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn ok_or_errno(x: libc::c_int) -> Result<libc::c_int, errno::Errno> {
    if x >= 0 {
        Ok(x)
    } else {
        Err(errno::errno())
    }
}

#[cfg(unix)]
fn select(
    file: &fs::File,
    wake: Option<&WakePipe>,
    flags: SelectFlags,
    timeout: Timeout,
) -> Result<SelectFlags, PendError> {
    use std::{os::unix::io::AsRawFd, time::Instant};

    let mut events = 0;
    if flags.contains(SelectFlags::READABLE) {
        events |= libc::POLLIN;
    }
    if flags.contains(SelectFlags::WRITABLE) {
        events |= libc::POLLOUT;
    }
    let mut pollfds = [
        libc::pollfd {
            fd: file.as_raw_fd(),
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: wake.map_or(-1, |wake| wake.read.as_raw_fd()),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let nfds = if wake.is_some() { 2 } else { 1 };

    let deadline = timeout.deadline();
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // Round up so that a short wait doesn't become a poll
                let ms = remaining.as_micros().div_ceil(1000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        // Safety: `pollfds` has at least `nfds` elements
        match ok_or_errno(unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) }) {
            Ok(0) => return Err(PendError::Timeout),
            Ok(_) => break,
            Err(e) if e.0 == libc::EINTR => continue,
            Err(e) => return Err(PendError::Failure(BackendError(e.0))),
        }
    }

    if pollfds[1].revents != 0 {
        return Err(PendError::Deleted);
    }

    let pollfd = &pollfds[0];
    let mut ready = SelectFlags::empty();
    if pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0 {
        ready |= SelectFlags::READABLE;
    }
    if pollfd.revents & libc::POLLOUT != 0 {
        ready |= SelectFlags::WRITABLE;
    }
    Ok(ready & flags)
}

#[cfg(not(unix))]
fn select(
    _: &fs::File,
    _: Option<&WakePipe>,
    _: SelectFlags,
    _: Timeout,
) -> Result<SelectFlags, PendError> {
    Err(PendError::Failure(BackendError(UNKNOWN_ERROR)))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    let bits = metadata.permissions().mode();
    let mut mode = FileMode::empty();
    mode.set(FileMode::READ, bits & 0o400 != 0);
    mode.set(FileMode::WRITE, bits & 0o200 != 0);
    mode.set(FileMode::EXEC, bits & 0o100 != 0);
    mode
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> FileMode {
    if metadata.permissions().readonly() {
        FileMode::READ
    } else {
        FileMode::READ | FileMode::WRITE
    }
}

impl FileOps for StdBackend {
    type File = File;

    fn file_open(
        &self,
        path: &Path,
        flags: OpenFlags,
        access: AccessMode,
    ) -> Result<File, BackendError> {
        let file = fs::OpenOptions::new()
            .read(access.can_read())
            .write(access.can_write())
            .create(flags.contains(OpenFlags::CREATE))
            .truncate(flags.contains(OpenFlags::TRUNCATE))
            .open(path)
            .map_err(io_error)?;
        let selectable = file.metadata().map_or(false, |m| is_selectable(&m));
        let wake = if selectable {
            Some(WakePipe::new().map_err(io_error)?)
        } else {
            None
        };
        log::trace!("file_open({path:?}) selectable = {selectable}");
        Ok(File {
            inner: RwLock::new(Some(file)),
            selectable,
            closing: AtomicBool::new(false),
            wake,
        })
    }

    fn file_close(&self, file: &File) -> Result<(), BackendError> {
        // Kick out the threads blocked on the file before taking it away
        file.closing.store(true, Ordering::Release);
        if let Some(wake) = &file.wake {
            wake.raise();
        }
        let mut inner = file.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.take() {
            Some(_) => Ok(()),
            None => Err(BackendError(UNKNOWN_ERROR)),
        }
    }

    fn file_read(&self, file: &File, buf: &mut [u8]) -> Result<usize, BackendError> {
        file.wait_ready(SelectFlags::READABLE)?;
        file.with(|mut f| f.read(buf))
    }

    fn file_write(&self, file: &File, buf: &[u8]) -> Result<usize, BackendError> {
        file.wait_ready(SelectFlags::WRITABLE)?;
        file.with(|mut f| f.write(buf))
    }

    fn file_seek(&self, file: &File, offset: i64, whence: SeekWhence) -> Result<u64, BackendError> {
        let pos = match whence {
            SeekWhence::Set => SeekFrom::Start(
                u64::try_from(offset).map_err(|_| io_error(io::ErrorKind::InvalidInput.into()))?,
            ),
            SeekWhence::Cur => SeekFrom::Current(offset),
            SeekWhence::End => SeekFrom::End(offset),
        };
        file.with(|mut f| f.seek(pos))
    }

    fn file_is_selectable(&self, file: &File) -> bool {
        file.selectable
    }

    fn file_select(
        &self,
        file: &File,
        flags: SelectFlags,
        timeout: Timeout,
    ) -> Result<SelectFlags, PendError> {
        file.select(flags, timeout)
    }

    fn file_stat(&self, path: &Path) -> Result<FileStat, BackendError> {
        let metadata = fs::metadata(path).map_err(io_error)?;
        let mut mode = file_mode(&metadata);
        mode.set(FileMode::DIR, metadata.is_dir());
        Ok(FileStat {
            size: metadata.len(),
            mode,
            modified: metadata.modified().ok(),
        })
    }

    fn file_remove(&self, path: &Path) -> Result<(), BackendError> {
        fs::remove_file(path).map_err(io_error)
    }

    fn file_rename(&self, from: &Path, to: &Path) -> Result<(), BackendError> {
        fs::rename(from, to).map_err(io_error)
    }
}

impl DirOps for StdBackend {
    type Dir = Dir;

    fn dir_open(&self, path: &Path) -> Result<Dir, BackendError> {
        let entries = fs::read_dir(path).map_err(io_error)?;
        Ok(Dir {
            path: path.to_owned(),
            entries: Mutex::new(Some(entries)),
        })
    }

    fn dir_close(&self, dir: &Dir) -> Result<(), BackendError> {
        match dir.lock().take() {
            Some(_) => Ok(()),
            None => Err(BackendError(UNKNOWN_ERROR)),
        }
    }

    fn dir_read(&self, dir: &Dir) -> Result<Option<DirEntry>, BackendError> {
        let mut entries = dir.lock();
        let entries = entries.as_mut().ok_or(BackendError(UNKNOWN_ERROR))?;
        match entries.next() {
            None => Ok(None),
            Some(Ok(entry)) => Ok(Some(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
            })),
            Some(Err(e)) => Err(io_error(e)),
        }
    }

    fn dir_rewind(&self, dir: &Dir) -> Result<(), BackendError> {
        let mut entries = dir.lock();
        if entries.is_none() {
            return Err(BackendError(UNKNOWN_ERROR));
        }
        *entries = Some(fs::read_dir(&dir.path).map_err(io_error)?);
        Ok(())
    }

    fn dir_create(&self, path: &Path) -> Result<(), BackendError> {
        fs::create_dir(path).map_err(io_error)
    }

    fn dir_remove(&self, path: &Path) -> Result<(), BackendError> {
        fs::remove_dir(path).map_err(io_error)
    }
}

fn system_mount_point(spec: &VolumeSpec) -> Result<&Path, VolumeError> {
    spec.system_mount_point
        .as_deref()
        .ok_or(VolumeError::DriveNotCreated)
}

fn remove_dir_all_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn statvfs(path: &Path) -> Result<FsStat, BackendError> {
    use std::{ffi::CString, mem::MaybeUninit, os::unix::ffi::OsStrExt};

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| BackendError(libc::EINVAL))?;
    let mut buf = MaybeUninit::<libc::statvfs>::uninit();
    // Safety: `c_path` is NUL-terminated and `buf` is large enough
    ok_or_errno(unsafe { libc::statvfs(c_path.as_ptr(), buf.as_mut_ptr()) })
        .map_err(|e| BackendError(e.0))?;
    // Safety: `statvfs` succeeded, so `buf` is initialized
    let buf = unsafe { buf.assume_init() };

    Ok(FsStat {
        block_size: buf.f_bsize as u64,
        total_blocks: buf.f_blocks as u64,
        blocks_free: buf.f_bfree as u64,
    })
}

#[cfg(not(unix))]
fn statvfs(_: &Path) -> Result<FsStat, BackendError> {
    Err(BackendError(UNKNOWN_ERROR))
}

impl FileSysOps for StdBackend {
    fn volume_start(&self, spec: &VolumeSpec) -> Result<PathBuf, VolumeError> {
        let VolumeSpec {
            device_name,
            volume_name,
            ..
        } = spec;
        let path = match spec.kind {
            VolumeKind::VolatileDisk => self
                .options
                .volatile_root
                .join(format!("osal:{volume_name}")),
            VolumeKind::FsBased => system_mount_point(spec)?.to_owned(),
            VolumeKind::Unknown | VolumeKind::NormalDisk => {
                log::debug!("{device_name}: block devices are not supported");
                return Err(VolumeError::NotSupported);
            }
        };
        log::trace!("volume_start({device_name}) = {path:?}");
        Ok(path)
    }

    fn volume_stop(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        log::trace!("volume_stop({})", spec.device_name);
        if spec.kind == VolumeKind::VolatileDisk {
            remove_dir_all_if_exists(system_mount_point(spec)?).map_err(io_error)?;
        }
        Ok(())
    }

    fn volume_format(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        if spec.kind != VolumeKind::VolatileDisk {
            return Ok(());
        }
        let path = system_mount_point(spec)?;
        remove_dir_all_if_exists(path).map_err(io_error)?;
        fs::create_dir_all(path).map_err(|e| {
            let device_name = &spec.device_name;
            log::debug!("{device_name}: could not create {path:?}: {e}");
            VolumeError::DriveNotCreated
        })
    }

    fn volume_mount(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        let path = system_mount_point(spec)?;
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => {
                let device_name = &spec.device_name;
                log::debug!("{device_name}: {path:?} is not a directory");
                Err(VolumeError::DriveNotCreated)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(path).map_err(|_| VolumeError::DriveNotCreated)
            }
            Err(e) => Err(io_error(e).into()),
        }
    }

    fn volume_unmount(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        log::trace!("volume_unmount({})", spec.device_name);
        Ok(())
    }

    fn volume_stat(&self, spec: &VolumeSpec) -> Result<FsStat, VolumeError> {
        Ok(statvfs(system_mount_point(spec)?)?)
    }

    fn volume_check(&self, _spec: &VolumeSpec, _repair: bool) -> Result<(), VolumeError> {
        Err(VolumeError::NotSupported)
    }
}
