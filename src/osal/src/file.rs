//! Open files and path-based file operations
use spin::Mutex as SpinMutex;

use osal_core::{
    backend::{Backend, FileOps},
    error::{DeleteError, FsOpError, GetInfoError, InvalidHandleError, IoError, OpenError},
    fs::{AccessMode, FileStat, OpenFlags, SeekWhence, SelectFlags},
    handle::Handle,
    time::Timeout,
};

use crate::{native, Osal};

/// *File control block*
pub(crate) struct FileCb<B: FileOps> {
    pub(crate) native: B::File,
    /// The virtual path the file was opened with. Updated by `rename`.
    path: SpinMutex<String>,
    access: AccessMode,
    selectable: bool,
}

/// The properties of an open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub access: AccessMode,
    pub selectable: bool,
}

impl<B: Backend> Osal<B> {
    /// Open the file at the virtual path `path`.
    pub fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        access: AccessMode,
    ) -> Result<Handle, OpenError> {
        let local_path = self.translate_path(path)?;
        let reservation = self.reserve(&self.files, None)?;
        let file = native(
            "file_open",
            self.backend.file_open(&local_path, flags, access),
        )?;
        let selectable = self.backend.file_is_selectable(&file);
        Ok(reservation
            .activate(FileCb {
                native: file,
                path: SpinMutex::new(path.to_owned()),
                access,
                selectable,
            })
            .handle())
    }

    /// Create a file, or truncate it if it exists, and open it.
    pub fn creat(&self, path: &str, access: AccessMode) -> Result<Handle, OpenError> {
        self.open(path, OpenFlags::CREATE | OpenFlags::TRUNCATE, access)
    }

    pub fn close(&self, handle: Handle) -> Result<(), DeleteError> {
        let file = self.files.release(handle)?;
        native("file_close", self.backend.file_close(&file.native))?;
        Ok(())
    }

    /// An I/O operation that fails because the file was closed while it
    /// was blocked reports `InvalidHandle`.
    fn closed_as_invalid<T>(&self, handle: Handle, result: Result<T, IoError>) -> Result<T, IoError> {
        match result {
            Err(_) if self.files.get(handle).is_err() => Err(IoError::InvalidHandle),
            result => result,
        }
    }

    /// Read up to `buf.len()` bytes. Returns zero at the end of the file.
    ///
    /// On a selectable file, this blocks until data is available.
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, IoError> {
        let file = self.files.get(handle)?;
        let result = native("file_read", self.backend.file_read(&file.native, buf));
        self.closed_as_invalid(handle, result.map_err(IoError::from))
    }

    pub fn write(&self, handle: Handle, buf: &[u8]) -> Result<usize, IoError> {
        let file = self.files.get(handle)?;
        let result = native("file_write", self.backend.file_write(&file.native, buf));
        self.closed_as_invalid(handle, result.map_err(IoError::from))
    }

    /// Wait until the file is readable, then read from it.
    ///
    /// Files that are not selectable are read without waiting.
    pub fn timed_read(
        &self,
        handle: Handle,
        buf: &mut [u8],
        timeout: impl Into<Timeout>,
    ) -> Result<usize, IoError> {
        let file = self.files.get(handle)?;
        if file.selectable {
            native(
                "file_select",
                self.backend
                    .file_select(&file.native, SelectFlags::READABLE, timeout.into()),
            )?;
        }
        let result = native("file_read", self.backend.file_read(&file.native, buf));
        self.closed_as_invalid(handle, result.map_err(IoError::from))
    }

    /// Wait until the file is writable, then write to it.
    ///
    /// Files that are not selectable are written without waiting.
    pub fn timed_write(
        &self,
        handle: Handle,
        buf: &[u8],
        timeout: impl Into<Timeout>,
    ) -> Result<usize, IoError> {
        let file = self.files.get(handle)?;
        if file.selectable {
            native(
                "file_select",
                self.backend
                    .file_select(&file.native, SelectFlags::WRITABLE, timeout.into()),
            )?;
        }
        let result = native("file_write", self.backend.file_write(&file.native, buf));
        self.closed_as_invalid(handle, result.map_err(IoError::from))
    }

    /// Move the file position and return the new position.
    pub fn lseek(&self, handle: Handle, offset: i64, whence: SeekWhence) -> Result<u64, IoError> {
        let file = self.files.get(handle)?;
        Ok(native(
            "file_seek",
            self.backend.file_seek(&file.native, offset, whence),
        )?)
    }

    /// Wait until the file satisfies one of `flags` and return the satisfied
    /// conditions.
    ///
    /// Fails with `NotSupported` if the file is not selectable.
    pub fn select_single(
        &self,
        handle: Handle,
        flags: SelectFlags,
        timeout: impl Into<Timeout>,
    ) -> Result<SelectFlags, IoError> {
        if flags.is_empty() {
            return Err(IoError::BadParam);
        }
        let file = self.files.get(handle)?;
        if !file.selectable {
            return Err(IoError::NotSupported);
        }
        Ok(native(
            "file_select",
            self.backend.file_select(&file.native, flags, timeout.into()),
        )?)
    }

    pub fn is_selectable(&self, handle: Handle) -> Result<bool, InvalidHandleError> {
        Ok(self.files.get(handle)?.selectable)
    }

    pub fn fd_get_info(&self, handle: Handle) -> Result<FileInfo, GetInfoError> {
        let file = self.files.get(handle)?;
        let path = file.path.lock().clone();
        Ok(FileInfo {
            path,
            access: file.access,
            selectable: file.selectable,
        })
    }

    pub fn stat(&self, path: &str) -> Result<FileStat, FsOpError> {
        let local_path = self.translate_path(path)?;
        Ok(native("file_stat", self.backend.file_stat(&local_path))?)
    }

    pub fn remove(&self, path: &str) -> Result<(), FsOpError> {
        let local_path = self.translate_path(path)?;
        native("file_remove", self.backend.file_remove(&local_path))?;
        Ok(())
    }

    /// Rename a file. Open files keep working and report the new path.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsOpError> {
        let local_from = self.translate_path(from)?;
        let local_to = self.translate_path(to)?;
        native(
            "file_rename",
            self.backend.file_rename(&local_from, &local_to),
        )?;

        self.files.for_each(|file| {
            let mut path = file.path.lock();
            if *path == from {
                *path = to.to_owned();
            }
        });
        Ok(())
    }

    /// Check whether any open file was opened with the virtual path `path`.
    pub fn file_open_check(&self, path: &str) -> bool {
        self.files.find(|_, file| *file.path.lock() == path).is_some()
    }

    /// Close every open file that was opened with the virtual path `path`.
    pub fn close_file_by_name(&self, path: &str) -> Result<(), FsOpError> {
        let mut found = false;
        let mut result = Ok(());
        self.files.for_each(|file| {
            if *file.path.lock() != path {
                return;
            }
            found = true;
            if let Err(e) = self.close(file.handle()) {
                let handle = file.handle();
                log::debug!("{handle:?}: close failed: {e:?}");
                result = Err(FsOpError::BackendFailure);
            }
        });
        if !found {
            return Err(FsOpError::NotFound);
        }
        result
    }

    /// Close every open file.
    pub fn close_all_files(&self) -> Result<(), DeleteError> {
        let mut result = Ok(());
        self.files.for_each(|file| match self.close(file.handle()) {
            // Closed concurrently
            Ok(()) | Err(DeleteError::InvalidHandle) => {}
            Err(e) => result = Err(e),
        });
        result
    }
}
