//! The filesystem-access pseudo-device (`/dev/fsa`).
//!
//! Translates filesystem requests carried in a shim buffer into operations
//! on a pluggable [`HostFs`] backend. The device side lives in [`device`];
//! the guest side builds requests through [`shim`].

pub mod device;
pub mod host;
pub mod shim;
pub mod status;
pub mod types;

pub use device::FsaDevice;
pub use host::{HostFs, RamFs};
pub use shim::{FsaCommand, FsaRequest, FsaResponse, FsaShimBuffer, IosVec, IpcMethod, ShimRef};
pub use status::{FsaResult, FsaStatus};
pub use types::{
    DataBuffer, FsDirEntry, FsOpenMode, FsReadFlags, FsStat, FsWriteFlags, FsaVolumeInfo,
    FS_STAT_DIRECTORY,
};

/// Device name the FSA registers under.
pub const FSA_DEVICE_NAME: &str = "/dev/fsa";
