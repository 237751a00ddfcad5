//! Data types shared by the FSA device, the host backend, and the FS
//! client's output bindings.

use bitflags::bitflags;
use std::sync::{Arc, Mutex};

/// `FsStat::flags` bit marking a directory entry.
pub const FS_STAT_DIRECTORY: u32 = 1 << 31;

/// Metadata record for a file or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsStat {
    pub flags: u32,
    pub mode: u32,
    pub owner: u32,
    pub group: u32,
    pub size: u32,
    pub alloc_size: u32,
    pub entry_id: u32,
    pub created: i64,
    pub modified: i64,
}

impl FsStat {
    pub fn is_directory(&self) -> bool {
        self.flags & FS_STAT_DIRECTORY != 0
    }
}

/// One directory entry as returned by ReadDir.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsDirEntry {
    pub stat: FsStat,
    pub name: String,
}

/// Volume metadata returned by GetVolumeInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsaVolumeInfo {
    pub flags: u32,
    pub media_state: u32,
    pub volume_label: String,
    pub volume_path: String,
    pub device_path: String,
    pub mount_path: String,
    pub free_bytes: u64,
    pub total_bytes: u64,
}

bitflags! {
    /// Flags modifying a read request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsReadFlags: u32 {
        /// Read at the position carried in the request instead of the
        /// file cursor.
        const READ_WITH_POS = 1 << 0;
    }
}

bitflags! {
    /// Flags modifying a write request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsWriteFlags: u32 {
        const WRITE_WITH_POS = 1 << 0;
    }
}

/// Parsed fopen-style mode string ("r", "w", "a", "r+", "w+", "a+").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsOpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl FsOpenMode {
    pub fn parse(mode: &str) -> Option<Self> {
        let plus = mode.ends_with('+');
        let base = mode.trim_end_matches('+');
        let mode = match base {
            "r" => FsOpenMode {
                read: true,
                write: plus,
                ..Default::default()
            },
            "w" => FsOpenMode {
                read: plus,
                write: true,
                create: true,
                truncate: true,
                ..Default::default()
            },
            "a" => FsOpenMode {
                read: plus,
                write: true,
                append: true,
                create: true,
                ..Default::default()
            },
            _ => return None,
        };
        Some(mode)
    }
}

/// A shared data region standing in for the guest-memory buffer of a read
/// or write request. Cloning shares the region; the chunked-read driver
/// advances an offset into it between IPC round trips.
#[derive(Clone, Default)]
pub struct DataBuffer {
    region: Arc<Mutex<Vec<u8>>>,
}

impl DataBuffer {
    /// A zero-filled region of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        DataBuffer {
            region: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        DataBuffer {
            region: Arc::new(Mutex::new(data)),
        }
    }

    pub fn len(&self) -> usize {
        self.region.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the region starting at `offset`, clamped to the
    /// region end. Returns the number of bytes written.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> usize {
        let mut region = self.region.lock().unwrap();
        if offset >= region.len() {
            return 0;
        }
        let n = data.len().min(region.len() - offset);
        region[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    /// Copy out of the region starting at `offset`. Returns bytes read.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        let region = self.region.lock().unwrap();
        if offset >= region.len() {
            return 0;
        }
        let n = out.len().min(region.len() - offset);
        out[..n].copy_from_slice(&region[offset..offset + n]);
        n
    }

    /// Copy of the whole region.
    pub fn snapshot(&self) -> Vec<u8> {
        self.region.lock().unwrap().clone()
    }
}
