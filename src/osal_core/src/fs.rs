//! Value types shared by the file, directory, and filesystem APIs
use std::{path::PathBuf, time::SystemTime};

/// The access mode of an open file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    #[inline]
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

bitflags::bitflags! {
    /// Flags modifying how a file is opened.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 1 << 0;
        /// Truncate the file to zero length.
        const TRUNCATE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Readiness conditions for `select_single`.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct SelectFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Mode bits reported by `stat`.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct FileMode: u32 {
        const EXEC = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
        const DIR = 1 << 3;
    }
}

/// The reference point of `lseek`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// File properties returned by `stat`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileStat {
    pub size: u64,
    pub mode: FileMode,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.mode.contains(FileMode::DIR)
    }
}

/// An entry read from an open directory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DirEntry {
    pub name: String,
}

/// Volume usage statistics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FsStat {
    pub block_size: u64,
    pub total_blocks: u64,
    pub blocks_free: u64,
}

impl FsStat {
    #[inline]
    pub fn bytes_free(&self) -> u64 {
        self.block_size.saturating_mul(self.blocks_free)
    }
}

/// The storage kind of a volume.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VolumeKind {
    /// Not determined yet; the backend may pick a kind from the device name.
    Unknown,
    /// A directory tree of the host that is already available.
    FsBased,
    /// A block device that needs a real filesystem.
    NormalDisk,
    /// A scratch volume whose content does not survive the process.
    VolatileDisk,
}

/// The parameters of a volume handed to the backend.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VolumeSpec {
    pub device_name: String,
    pub volume_name: String,
    pub kind: VolumeKind,
    pub block_size: usize,
    pub num_blocks: usize,
    pub max_partitions: u32,
    /// An opaque reference to caller-provided storage (e.g., the base
    /// address of a RAM disk).
    pub device_token: Option<usize>,
    /// The host directory backing the volume. Set by the caller for
    /// [`VolumeKind::FsBased`] volumes and by the backend otherwise.
    pub system_mount_point: Option<PathBuf>,
}
