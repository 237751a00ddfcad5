//! Transport status codes.
//!
//! Errors travel through the signed `reply` field of an [`IpcBuffer`]: a
//! non-negative reply is a success value (device handle for Open, byte count
//! for reads), a negative reply is one of these codes. Device-specific
//! status spaces (the FSA codes) share the same channel and are far more
//! negative, so the two ranges never collide.
//!
//! [`IpcBuffer`]: crate::ios::IpcBuffer

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Handle identifying an open pseudo-device. Positive once allocated;
/// `-1` in an Open request, which has no handle yet.
pub type IosHandle = i32;

/// Signed status word carried in `IpcBuffer::reply`.
///
/// `>= 0` is success, `< 0` is an [`IosError`] or a device status code.
pub type IosReply = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum IosError {
    #[error("access denied")]
    Access = -1,
    #[error("resource exists")]
    Exists = -2,
    #[error("operation interrupted")]
    Intr = -3,
    #[error("invalid operation")]
    Invalid = -4,
    #[error("resource maximum reached")]
    Max = -5,
    #[error("no such device")]
    NoExists = -6,
    #[error("queue empty")]
    QEmpty = -7,
    #[error("queue full")]
    QFull = -8,
    #[error("not ready")]
    NotReady = -10,
    #[error("internal failure")]
    FailInternal = -21,
    #[error("invalid handle")]
    InvalidHandle = -28,
    #[error("invalid argument")]
    InvalidArg = -29,
    #[error("device busy")]
    Busy = -31,
    #[error("operation timed out")]
    Timeout = -32,
}

impl IosError {
    /// The wire code for this error.
    #[inline]
    pub fn code(self) -> IosReply {
        self.into()
    }

    /// Decode a negative reply word, falling back to `FailInternal` for
    /// codes outside the transport space (e.g. device statuses).
    pub fn from_reply(reply: IosReply) -> Self {
        Self::try_from(reply).unwrap_or(IosError::FailInternal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(IosError::QFull.code(), -8);
        assert_eq!(IosError::from_reply(-8), IosError::QFull);
        assert_eq!(IosError::from_reply(-28), IosError::InvalidHandle);
    }

    #[test]
    fn device_statuses_fall_back() {
        assert_eq!(IosError::from_reply(-0x30017), IosError::FailInternal);
    }
}
