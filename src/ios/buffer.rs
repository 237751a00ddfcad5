//! The IPC buffer: the shared request/reply record.
//!
//! One [`IpcBuffer`] carries exactly one transaction. Ownership is strictly
//! handed off along the pipeline: the driver owns it until submission, the
//! kernel owns it until the reply is written, then the driver owns it again
//! until the request is freed. The `command` word only ever advances from a
//! request kind to [`IosCommand::Reply`], never backwards within one
//! transaction.
//!
//! The fixed header is a bit-exact wire record; the two buffer slots are
//! typed payload handles standing in for the pointer/length pairs of the
//! shared channel.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::{Arc, Mutex};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::fsa::shim::FsaShimBuffer;

/// Requests per core; also the capacity of each driver FIFO.
pub const IPC_BUFFER_COUNT: usize = 0x30;

/// Command tag of an IPC transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum IosCommand {
    Open = 1,
    Close = 2,
    Read = 3,
    Write = 4,
    Seek = 5,
    Ioctl = 6,
    Ioctlv = 7,
    Reply = 8,
}

/// Open mode passed in `args[2]` of an Open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum IosOpenMode {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

/// Fixed header of an IPC buffer, followed on the wire by the argument
/// words. `prev_command`/`prev_handle` echo the request on a reply.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromZeroes, FromBytes, AsBytes)]
pub struct IpcBufferHeader {
    pub command: u32,
    pub reply: i32,
    pub handle: i32,
    pub flags: u32,
    pub prev_command: u32,
    pub prev_handle: i32,
    pub process_id: u32,
    pub args: [u32; 8],
}

static_assertions::assert_eq_size!(IpcBufferHeader, [u8; 60]);

/// Payload slot of an IPC buffer.
///
/// Stands in for the raw pointer/length pair of the shared channel: `Bytes`
/// carries an inline byte payload (the NUL-terminated device name of an
/// Open request); `Shim` hands the kernel side a shared view of a
/// filesystem-access shim buffer, the region both ends of an FSA
/// transaction address.
#[derive(Default)]
pub enum IosPayload {
    #[default]
    None,
    Bytes(Vec<u8>),
    Shim(Arc<Mutex<FsaShimBuffer>>),
}

impl IosPayload {
    /// Interpret the payload as a NUL-terminated name of at most `len`
    /// bytes including the terminator.
    pub fn as_name(&self, len: usize) -> Option<&str> {
        match self {
            IosPayload::Bytes(bytes) => {
                let bytes = bytes.get(..len)?;
                let nul = bytes.iter().position(|&b| b == 0)?;
                std::str::from_utf8(&bytes[..nul]).ok()
            }
            _ => None,
        }
    }

    pub fn as_shim(&self) -> Option<&Arc<Mutex<FsaShimBuffer>>> {
        match self {
            IosPayload::Shim(shim) => Some(shim),
            _ => None,
        }
    }
}

/// A single IPC transaction record.
#[derive(Default)]
pub struct IpcBuffer {
    pub header: IpcBufferHeader,
    pub buffer1: IosPayload,
    pub buffer2: IosPayload,
}

impl IpcBuffer {
    /// Decode the command tag. The raw word is trusted on the driver side
    /// and validated by the kernel dispatcher.
    pub fn command(&self) -> Option<IosCommand> {
        IosCommand::try_from(self.header.command).ok()
    }
}
