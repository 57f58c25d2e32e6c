//! Filesystems and virtual path translation
//!
//! A filesystem record binds a device (a volume of the backend) to a
//! *virtual mount point*. Every path passed to the file and directory APIs
//! is a virtual path; it is translated to a host path by replacing the
//! virtual mount point prefix with the volume's *system mount point*.
use std::{
    ffi::OsString,
    path::PathBuf,
    sync::Mutex,
};

use osal_core::{
    backend::Backend,
    config::{MAX_API_NAME, MAX_FILE_NAME, MAX_LOCAL_PATH_LEN, MAX_PATH_LEN},
    error::{AllocError, DeleteError, FileSysError, GetIdError, GetInfoError, PathError},
    fs::{VolumeKind, VolumeSpec},
    handle::{Handle, ObjectClass},
    name::ObjectName,
};

use crate::{idmap::ObjectRef, native, timebase::lock, Osal};

/// Volume names with this prefix denote RAM disks.
const RAMDISK_VOLUME_PREFIX: &str = "RAM";

/// Device names with this prefix denote RAM disks.
const RAMDISK_DEVICE_PREFIX: &str = "/ramdev";

bitflags::bitflags! {
    /// The state of a filesystem record.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct FileSysFlags: u32 {
        /// The volume has been started (and formatted if requested).
        const READY = 1 << 0;
        /// The volume is a pre-existing host directory, not managed by the
        /// OSAL.
        const FIXED = 1 << 1;
        /// The volume is mounted in the host's filesystem.
        const MOUNTED_SYSTEM = 1 << 2;
        /// The volume is mapped into the virtual path space.
        const MOUNTED_VIRTUAL = 1 << 3;
    }
}

/// *Filesystem control block*
pub(crate) struct FileSysCb {
    record: Mutex<FileSysRecord>,
}

struct FileSysRecord {
    spec: VolumeSpec,
    flags: FileSysFlags,
    virtual_mount_point: Option<String>,
}

impl FileSysRecord {
    fn is_mounted(&self) -> bool {
        self.flags
            .intersects(FileSysFlags::MOUNTED_SYSTEM | FileSysFlags::MOUNTED_VIRTUAL)
    }

    /// Check if `path` is inside this record's virtual mount point.
    fn contains(&self, path: &str) -> bool {
        if !self.flags.contains(FileSysFlags::MOUNTED_VIRTUAL) {
            return false;
        }
        match &self.virtual_mount_point {
            Some(mount_point) if !mount_point.is_empty() => path
                .strip_prefix(mount_point.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('/')),
            _ => false,
        }
    }
}

/// The properties of a filesystem record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSysInfo {
    pub device_name: String,
    pub volume_name: String,
    pub kind: VolumeKind,
    pub flags: FileSysFlags,
    pub block_size: usize,
    pub num_blocks: usize,
    pub max_partitions: u32,
    pub system_mount_point: Option<PathBuf>,
    pub virtual_mount_point: Option<String>,
}

/// Descriptor and volume usage, as reported by [`Osal::get_fs_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub max_fds: usize,
    pub free_fds: usize,
    pub max_volumes: usize,
    pub free_volumes: usize,
}

impl<B: Backend> Osal<B> {
    fn filesys_by_name(&self, device_name: &str) -> Option<ObjectRef<FileSysCb>> {
        self.filesystems
            .find(|name, _| name.map_or(false, |n| n == device_name))
    }

    fn filesys_by_mount_point(&self, path: &str) -> Option<ObjectRef<FileSysCb>> {
        self.filesystems
            .find(|_, fs| lock(&fs.record).contains(path))
    }

    /// Create a filesystem record for a device and start its volume.
    fn filesys_initialize(
        &self,
        device_token: Option<usize>,
        device_name: &str,
        volume_name: &str,
        block_size: usize,
        num_blocks: usize,
        format: bool,
    ) -> Result<Handle, FileSysError> {
        if device_name.is_empty() || volume_name.is_empty() {
            return Err(FileSysError::PathInvalid);
        }
        if device_name.len() >= MAX_API_NAME || volume_name.len() >= MAX_API_NAME {
            return Err(FileSysError::PathTooLong);
        }
        let name = ObjectName::new(device_name).map_err(|_| FileSysError::PathTooLong)?;
        let reservation = self
            .reserve(&self.filesystems, Some(name))
            .map_err(|e| match e {
                AllocError::TableFull => FileSysError::DeviceNotFree,
                e => e.into(),
            })?;

        let kind = if device_token.is_some()
            || volume_name.starts_with(RAMDISK_VOLUME_PREFIX)
            || device_name.starts_with(RAMDISK_DEVICE_PREFIX)
        {
            VolumeKind::VolatileDisk
        } else {
            VolumeKind::Unknown
        };

        let mut spec = VolumeSpec {
            device_name: device_name.to_owned(),
            volume_name: volume_name.to_owned(),
            kind,
            block_size,
            num_blocks,
            max_partitions: 1,
            device_token,
            system_mount_point: None,
        };
        let system_mount_point = native("volume_start", self.backend.volume_start(&spec))?;
        spec.system_mount_point = Some(system_mount_point);

        if format {
            if let Err(e) = native("volume_format", self.backend.volume_format(&spec)) {
                let _ = native("volume_stop", self.backend.volume_stop(&spec));
                return Err(e.into());
            }
        }

        Ok(reservation
            .activate(FileSysCb {
                record: Mutex::new(FileSysRecord {
                    spec,
                    flags: FileSysFlags::READY,
                    virtual_mount_point: None,
                }),
            })
            .handle())
    }

    /// Start a volume and create an empty filesystem on it.
    ///
    /// `device_token` refers to caller-provided storage; giving one makes the
    /// volume a RAM disk, as does a volume name starting with `RAM` or a
    /// device name starting with `/ramdev`.
    pub fn mkfs(
        &self,
        device_token: Option<usize>,
        device_name: &str,
        volume_name: &str,
        block_size: usize,
        num_blocks: usize,
    ) -> Result<Handle, FileSysError> {
        self.filesys_initialize(
            device_token,
            device_name,
            volume_name,
            block_size,
            num_blocks,
            true,
        )
    }

    /// Start a volume that already contains a filesystem.
    pub fn initfs(
        &self,
        device_token: Option<usize>,
        device_name: &str,
        volume_name: &str,
        block_size: usize,
        num_blocks: usize,
    ) -> Result<Handle, FileSysError> {
        self.filesys_initialize(
            device_token,
            device_name,
            volume_name,
            block_size,
            num_blocks,
            false,
        )
    }

    /// Map an existing host directory `phys_path` to the virtual mount point
    /// `virt_path`. The device name is the last component of `phys_path`.
    pub fn add_fixed_map(&self, phys_path: &str, virt_path: &str) -> Result<Handle, FileSysError> {
        if phys_path.len() >= MAX_LOCAL_PATH_LEN || virt_path.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        if !virt_path.starts_with('/') {
            return Err(FileSysError::PathInvalid);
        }
        let device_name = phys_path.rsplit('/').next().unwrap_or(phys_path);
        if device_name.is_empty() {
            return Err(FileSysError::PathInvalid);
        }
        let name = ObjectName::new(device_name).map_err(|_| FileSysError::PathTooLong)?;
        let _mount_guard = lock(&self.mount_lock);
        if self.filesys_by_mount_point(virt_path).is_some() {
            return Err(FileSysError::AlreadyExists);
        }
        let reservation = self.reserve(&self.filesystems, Some(name))?;

        let mut spec = VolumeSpec {
            device_name: device_name.to_owned(),
            volume_name: device_name.to_owned(),
            kind: VolumeKind::FsBased,
            block_size: 0,
            num_blocks: 0,
            max_partitions: 1,
            device_token: None,
            system_mount_point: Some(PathBuf::from(phys_path)),
        };
        let system_mount_point = native("volume_start", self.backend.volume_start(&spec))?;
        spec.system_mount_point = Some(system_mount_point);

        if let Err(e) = native("volume_mount", self.backend.volume_mount(&spec)) {
            let _ = native("volume_stop", self.backend.volume_stop(&spec));
            return Err(e.into());
        }

        Ok(reservation
            .activate(FileSysCb {
                record: Mutex::new(FileSysRecord {
                    spec,
                    flags: FileSysFlags::FIXED
                        | FileSysFlags::READY
                        | FileSysFlags::MOUNTED_SYSTEM
                        | FileSysFlags::MOUNTED_VIRTUAL,
                    virtual_mount_point: Some(virt_path.to_owned()),
                }),
            })
            .handle())
    }

    /// Stop a volume and remove its filesystem record. The volume must not
    /// be mounted.
    pub fn rmfs(&self, device_name: &str) -> Result<(), FileSysError> {
        if device_name.len() >= MAX_API_NAME {
            return Err(FileSysError::PathTooLong);
        }
        let fs = self
            .filesys_by_name(device_name)
            .ok_or(FileSysError::NotFound)?;
        let fs = self
            .filesystems
            .release_with(fs.handle(), |fs| {
                if lock(&fs.record).is_mounted() {
                    Err(DeleteError::ObjectInUse)
                } else {
                    Ok(())
                }
            })
            .map_err(|e| match e {
                DeleteError::ObjectInUse => FileSysError::BadObjectState,
                _ => FileSysError::NotFound,
            })?;
        let spec = lock(&fs.record).spec.clone();
        native("volume_stop", self.backend.volume_stop(&spec))?;
        Ok(())
    }

    /// Remove a filesystem record regardless of its state, unmounting the
    /// volume if needed.
    pub(crate) fn filesys_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        let fs = self.filesystems.release(handle)?;
        let (spec, mounted) = {
            let record = lock(&fs.record);
            (record.spec.clone(), record.is_mounted())
        };
        if mounted {
            native("volume_unmount", self.backend.volume_unmount(&spec))
                .map_err(|_| DeleteError::BackendFailure)?;
        }
        native("volume_stop", self.backend.volume_stop(&spec))
            .map_err(|_| DeleteError::BackendFailure)?;
        Ok(())
    }

    /// Mount a started volume at the virtual mount point `mount_point`.
    pub fn mount(&self, device_name: &str, mount_point: &str) -> Result<(), FileSysError> {
        if device_name.len() >= MAX_API_NAME || mount_point.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        if !mount_point.starts_with('/') {
            return Err(FileSysError::PathInvalid);
        }
        let _mount_guard = lock(&self.mount_lock);
        if self.filesys_by_mount_point(mount_point).is_some() {
            return Err(FileSysError::AlreadyExists);
        }
        let fs = self
            .filesys_by_name(device_name)
            .ok_or(FileSysError::NotFound)?;

        let mut record = lock(&fs.record);
        if record.flags - FileSysFlags::FIXED != FileSysFlags::READY {
            return Err(FileSysError::BadObjectState);
        }
        if record.spec.system_mount_point.is_none() {
            return Err(FileSysError::PathInvalid);
        }
        native("volume_mount", self.backend.volume_mount(&record.spec))?;
        record.flags |= FileSysFlags::MOUNTED_SYSTEM | FileSysFlags::MOUNTED_VIRTUAL;
        record.virtual_mount_point = Some(mount_point.to_owned());
        Ok(())
    }

    /// Unmount the volume mounted at `mount_point`.
    pub fn unmount(&self, mount_point: &str) -> Result<(), FileSysError> {
        if mount_point.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        let _mount_guard = lock(&self.mount_lock);
        let fs = self
            .filesys_by_mount_point(mount_point)
            .ok_or(FileSysError::NotFound)?;

        let mut record = lock(&fs.record);
        let mounted =
            FileSysFlags::READY | FileSysFlags::MOUNTED_SYSTEM | FileSysFlags::MOUNTED_VIRTUAL;
        if record.flags - FileSysFlags::FIXED != mounted {
            return Err(FileSysError::BadObjectState);
        }
        native("volume_unmount", self.backend.volume_unmount(&record.spec))?;
        record.flags -= FileSysFlags::MOUNTED_SYSTEM | FileSysFlags::MOUNTED_VIRTUAL;
        record.virtual_mount_point = None;
        Ok(())
    }

    fn volume_stat_at(&self, path: &str) -> Result<osal_core::fs::FsStat, FileSysError> {
        if path.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        let fs = self
            .filesys_by_mount_point(path)
            .ok_or(FileSysError::PathInvalid)?;
        let spec = lock(&fs.record).spec.clone();
        Ok(native("volume_stat", self.backend.volume_stat(&spec))?)
    }

    /// Get the number of free blocks of the volume containing the virtual
    /// path `path`.
    pub fn fs_blocks_free(&self, path: &str) -> Result<u64, FileSysError> {
        Ok(self.volume_stat_at(path)?.blocks_free)
    }

    /// Get the number of free bytes of the volume containing the virtual
    /// path `path`.
    pub fn fs_bytes_free(&self, path: &str) -> Result<u64, FileSysError> {
        Ok(self.volume_stat_at(path)?.bytes_free())
    }

    /// Check the filesystem of the volume containing `path`, optionally
    /// repairing it.
    pub fn chkfs(&self, path: &str, repair: bool) -> Result<(), FileSysError> {
        if path.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        let fs = self
            .filesys_by_mount_point(path)
            .ok_or(FileSysError::NotFound)?;
        let spec = lock(&fs.record).spec.clone();
        native("volume_check", self.backend.volume_check(&spec, repair))?;
        Ok(())
    }

    /// Get the host directory of the volume mounted at `mount_point`.
    pub fn get_phys_drive_name(&self, mount_point: &str) -> Result<PathBuf, FileSysError> {
        if mount_point.len() >= MAX_PATH_LEN {
            return Err(FileSysError::PathTooLong);
        }
        let _mount_guard = lock(&self.mount_lock);
        let fs = self
            .filesys_by_mount_point(mount_point)
            .ok_or(FileSysError::NotFound)?;
        let record = lock(&fs.record);
        match &record.spec.system_mount_point {
            Some(path) if record.flags.contains(FileSysFlags::MOUNTED_SYSTEM) => Ok(path.clone()),
            _ => Err(FileSysError::BadObjectState),
        }
    }

    pub fn get_fs_info(&self) -> FsInfo {
        FsInfo {
            max_fds: self.config.capacity(ObjectClass::File),
            free_fds: self.files.count_free(),
            max_volumes: self.config.capacity(ObjectClass::FileSys),
            free_volumes: self.filesystems.count_free(),
        }
    }

    pub fn filesys_get_id_by_name(&self, device_name: &str) -> Result<Handle, GetIdError> {
        ObjectName::new(device_name)?;
        self.filesystems
            .find_by_name(device_name)
            .ok_or(GetIdError::NotFound)
    }

    pub fn filesys_get_info(&self, handle: Handle) -> Result<FileSysInfo, GetInfoError> {
        let fs = self.filesystems.get(handle)?;
        let record = lock(&fs.record);
        Ok(FileSysInfo {
            device_name: record.spec.device_name.clone(),
            volume_name: record.spec.volume_name.clone(),
            kind: record.spec.kind,
            flags: record.flags,
            block_size: record.spec.block_size,
            num_blocks: record.spec.num_blocks,
            max_partitions: record.spec.max_partitions,
            system_mount_point: record.spec.system_mount_point.clone(),
            virtual_mount_point: record.virtual_mount_point.clone(),
        })
    }

    /// Translate a virtual path to the host path it refers to.
    ///
    /// A virtual path must be absolute, shorter than `MAX_PATH_LEN`, have a
    /// final component shorter than `MAX_FILE_NAME`, and lie inside a
    /// mounted volume.
    pub fn translate_path(&self, virtual_path: &str) -> Result<PathBuf, PathError> {
        if virtual_path.len() >= MAX_PATH_LEN {
            return Err(PathError::PathTooLong);
        }
        let file_name = match virtual_path.rfind('/') {
            Some(i) => &virtual_path[i + 1..],
            None => return Err(PathError::PathInvalid),
        };
        if file_name.len() >= MAX_FILE_NAME {
            return Err(PathError::NameTooLongFs);
        }
        if !virtual_path.starts_with('/') {
            return Err(PathError::PathInvalid);
        }

        let fs = self
            .filesys_by_mount_point(virtual_path)
            .ok_or(PathError::PathInvalid)?;
        let record = lock(&fs.record);
        let system_mount_point = match &record.spec.system_mount_point {
            Some(path) if record.flags.contains(FileSysFlags::MOUNTED_SYSTEM) => path,
            _ => return Err(PathError::PathInvalid),
        };
        let prefix_len = record.virtual_mount_point.as_ref().map_or(0, |p| p.len());

        let mut local_path = OsString::from(system_mount_point.as_os_str());
        local_path.push(&virtual_path[prefix_len..]);
        if local_path.len() >= MAX_LOCAL_PATH_LEN {
            return Err(PathError::PathTooLong);
        }
        Ok(PathBuf::from(local_path))
    }
}
