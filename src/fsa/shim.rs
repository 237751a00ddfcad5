//! FSA shim buffer: the request/response scratch area of a command block.
//!
//! One shim carries one FSA transaction. The guest side fills `command`,
//! `request` and the ioctlv vector array, submits the buffer through the
//! IPC driver, and reads `response` after the reply. Both ends address the
//! same shim through a shared handle ([`ShimRef`]); ownership alternates
//! with the IPC buffer that carries it.
//!
//! Read and write requests travel as ioctlv with three vector slots:
//! slot 0 describes the request record, slot 1 the data buffer, slot 2 the
//! response record. The chunked-read driver rewrites slot 1 (and the
//! request's size/position) between rounds.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::{Arc, Mutex};

use crate::fsa::types::{DataBuffer, FsDirEntry, FsReadFlags, FsStat, FsWriteFlags, FsaVolumeInfo};
use crate::ios::buffer::{IosCommand, IosPayload};
use crate::ios::driver::{IosAsyncCallback, IpcDriver};
use crate::ios::error::IosHandle;

/// Shared handle to a shim buffer.
pub type ShimRef = Arc<Mutex<FsaShimBuffer>>;

/// FSA operation tags. Device-local numbering, stable within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum FsaCommand {
    #[default]
    Invalid = 0x00,
    Mount = 0x01,
    Unmount = 0x02,
    ChangeDir = 0x05,
    GetCwd = 0x06,
    MakeDir = 0x07,
    Remove = 0x08,
    Rename = 0x09,
    OpenDir = 0x0a,
    ReadDir = 0x0b,
    RewindDir = 0x0c,
    CloseDir = 0x0d,
    OpenFile = 0x0e,
    ReadFile = 0x0f,
    WriteFile = 0x10,
    GetPosFile = 0x11,
    SetPosFile = 0x12,
    IsEof = 0x13,
    StatFile = 0x14,
    CloseFile = 0x15,
    GetError = 0x16,
    FlushFile = 0x17,
    AppendFile = 0x18,
    TruncateFile = 0x19,
    MakeQuota = 0x1a,
    FlushQuota = 0x1b,
    RollbackQuota = 0x1c,
    RemoveQuota = 0x1d,
    FlushMultiQuota = 0x1e,
    RegisterFlushQuota = 0x1f,
    ChangeMode = 0x20,
    GetFileBlockAddress = 0x21,
    MakeLink = 0x22,
    GetVolumeInfo = 0x23,
    GetInfoByQuery = 0x24,
}

/// Request record, one variant per FSA command that carries arguments.
#[derive(Debug, Clone, Default)]
pub enum FsaRequest {
    #[default]
    None,
    Mount {
        source: String,
        target: String,
    },
    Unmount {
        target: String,
    },
    ChangeDir {
        path: String,
    },
    MakeDir {
        path: String,
        mode: u32,
    },
    Remove {
        path: String,
    },
    Rename {
        old_path: String,
        new_path: String,
    },
    OpenDir {
        path: String,
    },
    DirHandle {
        handle: u32,
    },
    OpenFile {
        path: String,
        mode: String,
    },
    ReadFile {
        handle: u32,
        size: u32,
        count: u32,
        pos: u32,
        flags: FsReadFlags,
    },
    WriteFile {
        handle: u32,
        size: u32,
        count: u32,
        pos: u32,
        flags: FsWriteFlags,
    },
    SetPosFile {
        handle: u32,
        pos: u32,
    },
    AppendFile {
        handle: u32,
        size: u32,
        count: u32,
    },
    /// CloseFile, GetPosFile, IsEof, StatFile, FlushFile, TruncateFile,
    /// GetFileBlockAddress.
    FileHandle {
        handle: u32,
    },
    ChangeMode {
        path: String,
        mode: u32,
    },
    MakeQuota {
        path: String,
        mode: u32,
        max_size: u64,
    },
    QuotaPath {
        path: String,
    },
    MakeLink {
        source: String,
        target: String,
    },
    GetInfoByQuery {
        path: String,
        query: u32,
    },
}

/// Response record filled in by the device.
#[derive(Debug, Clone, Default)]
pub enum FsaResponse {
    #[default]
    None,
    GetCwd {
        path: String,
    },
    OpenDir {
        handle: u32,
    },
    ReadDir {
        entry: FsDirEntry,
    },
    OpenFile {
        handle: u32,
    },
    GetPosFile {
        pos: u32,
    },
    StatFile {
        stat: FsStat,
    },
    GetFileBlockAddress {
        address: u32,
    },
    GetVolumeInfo {
        info: FsaVolumeInfo,
    },
    GetError {
        error: i32,
    },
}

/// How the shim travels over IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcMethod {
    Ioctl,
    Ioctlv { vec_in: u32, vec_out: u32 },
}

/// One ioctlv vector slot: a data region plus the window into it.
#[derive(Clone, Default)]
pub struct IosVec {
    pub buffer: Option<DataBuffer>,
    pub offset: usize,
    pub len: usize,
}

/// The serialized request/response area of one FS command block.
pub struct FsaShimBuffer {
    /// FSA handle of the owning client.
    pub client_handle: IosHandle,
    pub command: FsaCommand,
    pub method: IpcMethod,
    pub request: FsaRequest,
    pub response: FsaResponse,
    pub ioctlv_vecs: [IosVec; 3],
}

impl FsaShimBuffer {
    pub fn new(client_handle: IosHandle) -> Self {
        FsaShimBuffer {
            client_handle,
            command: FsaCommand::Invalid,
            method: IpcMethod::Ioctl,
            request: FsaRequest::None,
            response: FsaResponse::None,
            ioctlv_vecs: Default::default(),
        }
    }

    /// Prepare a plain ioctl transaction.
    pub fn prepare(&mut self, command: FsaCommand, request: FsaRequest) {
        self.command = command;
        self.method = IpcMethod::Ioctl;
        self.request = request;
        self.response = FsaResponse::None;
        self.ioctlv_vecs = Default::default();
    }

    /// Prepare a ReadFile ioctlv transaction. `size` is the byte count of
    /// this round; slot 1 windows the destination region at `offset`.
    pub fn prepare_read(
        &mut self,
        handle: u32,
        buffer: DataBuffer,
        offset: usize,
        size: u32,
        pos: u32,
        flags: FsReadFlags,
    ) {
        self.command = FsaCommand::ReadFile;
        self.method = IpcMethod::Ioctlv { vec_in: 1, vec_out: 2 };
        self.request = FsaRequest::ReadFile {
            handle,
            size,
            count: 1,
            pos,
            flags,
        };
        self.response = FsaResponse::None;
        self.ioctlv_vecs = Default::default();
        self.ioctlv_vecs[1] = IosVec {
            buffer: Some(buffer),
            offset,
            len: size as usize,
        };
    }

    /// Prepare a WriteFile ioctlv transaction over the whole `buffer`.
    pub fn prepare_write(
        &mut self,
        handle: u32,
        buffer: DataBuffer,
        size: u32,
        count: u32,
        pos: u32,
        flags: FsWriteFlags,
    ) {
        self.command = FsaCommand::WriteFile;
        self.method = IpcMethod::Ioctlv { vec_in: 2, vec_out: 1 };
        self.request = FsaRequest::WriteFile {
            handle,
            size,
            count,
            pos,
            flags,
        };
        self.response = FsaResponse::None;
        self.ioctlv_vecs = Default::default();
        let len = size as usize * count as usize;
        self.ioctlv_vecs[1] = IosVec {
            buffer: Some(buffer),
            offset: 0,
            len,
        };
    }
}

/// Submit a prepared shim over the owning client's IPC driver.
///
/// The transaction is asynchronous: `callback` runs with the raw reply word
/// when the kernel response is processed.
pub fn submit_request_async(driver: &IpcDriver, shim: &ShimRef, callback: IosAsyncCallback) {
    let (handle, command, method) = {
        let shim = shim.lock().unwrap();
        (shim.client_handle, shim.command, shim.method)
    };

    let (ios_command, vec_in, vec_out) = match method {
        IpcMethod::Ioctl => (IosCommand::Ioctl, 0, 0),
        IpcMethod::Ioctlv { vec_in, vec_out } => (IosCommand::Ioctlv, vec_in, vec_out),
    };

    let request = driver.allocate_request(handle, ios_command, 0, Some(callback));
    driver.with_buffer(request, |buffer| {
        buffer.header.args[0] = command.into();
        buffer.header.args[1] = vec_in;
        buffer.header.args[2] = vec_out;
        buffer.buffer1 = IosPayload::Shim(shim.clone());
    });
    driver.submit_request(request);
}
