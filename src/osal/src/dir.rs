//! Directories
use osal_core::{
    backend::{Backend, DirOps},
    error::{DeleteError, FsOpError, IoError, OpenError},
    fs::DirEntry,
    handle::Handle,
};

use crate::{native, Osal};

/// *Directory control block*
pub(crate) struct DirCb<B: DirOps> {
    pub(crate) native: B::Dir,
}

impl<B: Backend> Osal<B> {
    /// Open the directory at the virtual path `path` for reading.
    pub fn directory_open(&self, path: &str) -> Result<Handle, OpenError> {
        let local_path = self.translate_path(path)?;
        let reservation = self.reserve(&self.dirs, None)?;
        let dir = native("dir_open", self.backend.dir_open(&local_path))?;
        Ok(reservation.activate(DirCb { native: dir }).handle())
    }

    pub fn directory_close(&self, handle: Handle) -> Result<(), DeleteError> {
        let dir = self.dirs.release(handle)?;
        native("dir_close", self.backend.dir_close(&dir.native))?;
        Ok(())
    }

    /// Read the next entry. Returns `None` after the last entry.
    pub fn directory_read(&self, handle: Handle) -> Result<Option<DirEntry>, IoError> {
        let dir = self.dirs.get(handle)?;
        Ok(native("dir_read", self.backend.dir_read(&dir.native))?)
    }

    /// Restart reading from the first entry.
    pub fn directory_rewind(&self, handle: Handle) -> Result<(), IoError> {
        let dir = self.dirs.get(handle)?;
        native("dir_rewind", self.backend.dir_rewind(&dir.native))?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsOpError> {
        let local_path = self.translate_path(path)?;
        native("dir_create", self.backend.dir_create(&local_path))?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsOpError> {
        let local_path = self.translate_path(path)?;
        native("dir_remove", self.backend.dir_remove(&local_path))?;
        Ok(())
    }
}
