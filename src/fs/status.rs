//! User-facing status codes, error categories, and the FSA translation
//! table.
//!
//! `FsStatus` values of zero or above are success values (byte counts,
//! chunk counts); negative values are the taxonomized errors delivered to
//! the user. [`FsErrorFlag`] is the category bitmask used for error-mask
//! filtering: a block whose mask intersects the category of a translated
//! error sends the client's volume state to `Fatal` instead of delivering
//! the result.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::fs::state::VolumeState;
use crate::fsa::status::FsaStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum FsStatus {
    #[error("ok")]
    Ok = 0,
    #[error("cancelled")]
    Cancelled = -1,
    #[error("end of file or directory")]
    End = -2,
    #[error("resource maximum reached")]
    Max = -3,
    #[error("already open")]
    AlreadyOpen = -4,
    #[error("already exists")]
    Exists = -5,
    #[error("not found")]
    NotFound = -6,
    #[error("not a file")]
    NotFile = -7,
    #[error("not a directory")]
    NotDirectory = -8,
    #[error("access error")]
    AccessError = -9,
    #[error("permission error")]
    PermissionError = -10,
    #[error("file too big")]
    FileTooBig = -11,
    #[error("storage full")]
    StorageFull = -12,
    #[error("journal full")]
    JournalFull = -13,
    #[error("unsupported command")]
    UnsupportedCmd = -14,
    #[error("media not ready")]
    MediaNotReady = -15,
    #[error("fatal error")]
    FatalError = -0x400,
}

impl FsStatus {
    #[inline]
    pub fn code(self) -> i32 {
        self.into()
    }
}

bitflags! {
    /// Error categories for error-mask filtering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsErrorFlag: u32 {
        const MAX              = 1 << 0;
        const ALREADY_OPEN     = 1 << 1;
        const EXISTS           = 1 << 2;
        const NOT_FOUND        = 1 << 3;
        const NOT_FILE         = 1 << 4;
        const NOT_DIR          = 1 << 5;
        const ACCESS_ERROR     = 1 << 6;
        const PERMISSION_ERROR = 1 << 7;
        const FILE_TOO_BIG     = 1 << 8;
        const STORAGE_FULL     = 1 << 9;
        const UNSUPPORTED_CMD  = 1 << 10;
        const JOURNAL_FULL     = 1 << 11;
        const ALL              = u32::MAX;
    }
}

/// Outcome of classifying one FSA status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsaTranslation {
    /// Deliver `status` to the user, subject to the error-mask filter.
    Deliver { status: i32, flags: FsErrorFlag },
    /// Transient contention: requeue the command at the queue front.
    RequeueFront,
    /// Return without replying and without advancing any state; higher
    /// layers poll.
    Swallow,
    /// Media status: drive the volume-state machine instead of replying.
    SetVolumeState(VolumeState),
    /// Statuses whose console behavior has not been reversed; reaching
    /// one panics rather than guessing a transition.
    Unhandled(&'static str),
}

/// Classify a negative FSA status word.
///
/// Statuses outside the known FSA space pass through unchanged under the
/// all-categories flag, as do the parameter-validation statuses (with no
/// category, so they can never trip the error mask).
pub fn translate_fsa_status(fsa_status: i32) -> FsaTranslation {
    use FsaTranslation::*;

    debug_assert!(fsa_status < 0);

    let Ok(status) = FsaStatus::try_from(fsa_status) else {
        return Deliver {
            status: fsa_status,
            flags: FsErrorFlag::ALL,
        };
    };

    match status {
        FsaStatus::MediaNotReady => SetVolumeState(VolumeState::WrongMedia),
        FsaStatus::WriteProtected => SetVolumeState(VolumeState::MediaError),

        FsaStatus::NotInit
        | FsaStatus::OutOfRange
        | FsaStatus::OutOfResources
        | FsaStatus::LinkEntry
        | FsaStatus::UnavailableCmd
        | FsaStatus::InvalidParam
        | FsaStatus::InvalidPath
        | FsaStatus::InvalidBuffer
        | FsaStatus::InvalidAlignment
        | FsaStatus::InvalidClientHandle
        | FsaStatus::InvalidFileHandle
        | FsaStatus::InvalidDirHandle => Deliver {
            status: fsa_status,
            flags: FsErrorFlag::empty(),
        },

        FsaStatus::Busy => RequeueFront,

        FsaStatus::Cancelled => Deliver {
            status: FsStatus::Cancelled.code(),
            flags: FsErrorFlag::ALL,
        },
        FsaStatus::EndOfDir | FsaStatus::EndOfFile => Deliver {
            status: FsStatus::End.code(),
            flags: FsErrorFlag::ALL,
        },

        FsaStatus::MaxMountpoints
        | FsaStatus::MaxVolumes
        | FsaStatus::MaxClients
        | FsaStatus::MaxFiles
        | FsaStatus::MaxDirs => Deliver {
            status: FsStatus::Max.code(),
            flags: FsErrorFlag::MAX,
        },

        FsaStatus::AlreadyOpen => Deliver {
            status: FsStatus::AlreadyOpen.code(),
            flags: FsErrorFlag::ALREADY_OPEN,
        },
        FsaStatus::NotFound => Deliver {
            status: FsStatus::NotFound.code(),
            flags: FsErrorFlag::NOT_FOUND,
        },
        FsaStatus::AlreadyExists | FsaStatus::NotEmpty => Deliver {
            status: FsStatus::Exists.code(),
            flags: FsErrorFlag::EXISTS,
        },
        FsaStatus::AccessError => Deliver {
            status: FsStatus::AccessError.code(),
            flags: FsErrorFlag::ACCESS_ERROR,
        },
        FsaStatus::PermissionError => Deliver {
            status: FsStatus::PermissionError.code(),
            flags: FsErrorFlag::PERMISSION_ERROR,
        },
        FsaStatus::StorageFull => Deliver {
            status: FsStatus::StorageFull.code(),
            flags: FsErrorFlag::STORAGE_FULL,
        },
        FsaStatus::JournalFull => Deliver {
            status: FsStatus::JournalFull.code(),
            flags: FsErrorFlag::JOURNAL_FULL,
        },
        FsaStatus::UnsupportedCmd => Deliver {
            status: FsStatus::UnsupportedCmd.code(),
            flags: FsErrorFlag::UNSUPPORTED_CMD,
        },
        FsaStatus::NotFile => Deliver {
            status: FsStatus::NotFile.code(),
            flags: FsErrorFlag::NOT_FILE,
        },
        FsaStatus::NotDir => Deliver {
            status: FsStatus::NotDirectory.code(),
            flags: FsErrorFlag::NOT_DIR,
        },
        FsaStatus::FileTooBig => Deliver {
            status: FsStatus::FileTooBig.code(),
            flags: FsErrorFlag::FILE_TOO_BIG,
        },

        FsaStatus::InvalidMedia => Swallow,

        FsaStatus::DataCorrupted => Unhandled("DataCorrupted"),
        FsaStatus::MediaError => Unhandled("MediaError"),
    }
}
