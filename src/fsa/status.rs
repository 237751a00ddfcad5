//! FSA status code space.
//!
//! Device-level statuses produced by the filesystem-access device. They
//! share the signed reply channel with the transport codes but occupy a
//! disjoint, far more negative range, and are translated into user-facing
//! `FsStatus` values by the client's reply handler.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub type FsaResult<T> = Result<T, FsaStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum FsaStatus {
    #[error("not initialised")]
    NotInit = -0x30001,
    #[error("busy")]
    Busy = -0x30002,
    #[error("cancelled")]
    Cancelled = -0x30003,
    #[error("end of directory")]
    EndOfDir = -0x30004,
    #[error("end of file")]
    EndOfFile = -0x30005,
    #[error("maximum mountpoints reached")]
    MaxMountpoints = -0x30010,
    #[error("maximum volumes reached")]
    MaxVolumes = -0x30011,
    #[error("maximum clients reached")]
    MaxClients = -0x30012,
    #[error("maximum open files reached")]
    MaxFiles = -0x30013,
    #[error("maximum open directories reached")]
    MaxDirs = -0x30014,
    #[error("already open")]
    AlreadyOpen = -0x30015,
    #[error("already exists")]
    AlreadyExists = -0x30016,
    #[error("not found")]
    NotFound = -0x30017,
    #[error("not empty")]
    NotEmpty = -0x30018,
    #[error("access error")]
    AccessError = -0x30019,
    #[error("permission error")]
    PermissionError = -0x3001a,
    #[error("data corrupted")]
    DataCorrupted = -0x3001b,
    #[error("storage full")]
    StorageFull = -0x3001c,
    #[error("journal full")]
    JournalFull = -0x3001d,
    #[error("link entry")]
    LinkEntry = -0x3001f,
    #[error("unavailable command")]
    UnavailableCmd = -0x30020,
    #[error("unsupported command")]
    UnsupportedCmd = -0x30021,
    #[error("invalid parameter")]
    InvalidParam = -0x30022,
    #[error("invalid path")]
    InvalidPath = -0x30023,
    #[error("invalid buffer")]
    InvalidBuffer = -0x30024,
    #[error("invalid alignment")]
    InvalidAlignment = -0x30025,
    #[error("invalid client handle")]
    InvalidClientHandle = -0x30026,
    #[error("invalid file handle")]
    InvalidFileHandle = -0x30027,
    #[error("invalid dir handle")]
    InvalidDirHandle = -0x30028,
    #[error("not a file")]
    NotFile = -0x30029,
    #[error("not a directory")]
    NotDir = -0x3002a,
    #[error("file too big")]
    FileTooBig = -0x3002b,
    #[error("out of range")]
    OutOfRange = -0x3002c,
    #[error("out of resources")]
    OutOfResources = -0x3002d,
    #[error("media not ready")]
    MediaNotReady = -0x30030,
    #[error("media error")]
    MediaError = -0x30031,
    #[error("write protected")]
    WriteProtected = -0x30032,
    #[error("invalid media")]
    InvalidMedia = -0x30033,
}

impl FsaStatus {
    /// The wire code for this status.
    #[inline]
    pub fn code(self) -> i32 {
        self.into()
    }
}

/// Flatten an `FsaResult` carrying a non-negative success value into the
/// signed reply word.
pub fn reply_from(result: FsaResult<i32>) -> i32 {
    match result {
        Ok(value) => value,
        Err(status) => status.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_space_is_disjoint_from_transport() {
        // Transport codes are small negatives; every FSA code is below them.
        assert!(FsaStatus::NotInit.code() < -0x100);
        assert_eq!(FsaStatus::try_from(-0x30017), Ok(FsaStatus::NotFound));
        assert!(FsaStatus::try_from(-8).is_err());
    }
}
