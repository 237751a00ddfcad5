//! `/dev/fsa`: the filesystem-access pseudo-device.
//!
//! Each open handle is one client's view of the volume: it carries its own
//! working directory and last-status word. `ioctl`/`ioctlv` pull the FSA
//! command out of the shim buffer travelling in the payload slot, run it
//! against the host filesystem, and write the response record and status
//! back into the same shim.

use std::sync::Arc;

use crate::fsa::host::HostFs;
use crate::fsa::shim::{FsaCommand, FsaRequest, FsaResponse, FsaShimBuffer};
use crate::fsa::status::{reply_from, FsaResult, FsaStatus};
use crate::fsa::types::{FsOpenMode, FsReadFlags, FsWriteFlags};
use crate::ios::buffer::{IosOpenMode, IosPayload};
use crate::ios::error::{IosHandle, IosReply};
use crate::ios::device::IosDevice;

pub struct FsaDevice {
    handle: IosHandle,
    host: Arc<dyn HostFs>,
    cwd: String,
    last_status: i32,
}

impl FsaDevice {
    pub fn new(host: Arc<dyn HostFs>) -> Self {
        FsaDevice {
            handle: -1,
            host,
            cwd: "/".to_string(),
            last_status: 0,
        }
    }

    /// Resolve a request path against the client's working directory and
    /// normalize `.`/`..` components.
    fn resolve(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else if self.cwd == "/" {
            format!("/{path}")
        } else {
            format!("{}/{path}", self.cwd)
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    fn execute(&mut self, request: u32, payload: &IosPayload) -> IosReply {
        let Some(shim) = payload.as_shim() else {
            return FsaStatus::InvalidBuffer.code();
        };
        let mut shim = shim.lock().unwrap();

        match FsaCommand::try_from(request) {
            Ok(command) if command == shim.command => {}
            _ => return FsaStatus::UnavailableCmd.code(),
        }

        let reply = reply_from(self.run(&mut shim));
        if reply < 0 {
            self.last_status = reply;
        }
        reply
    }

    fn run(&mut self, shim: &mut FsaShimBuffer) -> FsaResult<i32> {
        match shim.command {
            FsaCommand::Invalid => Err(FsaStatus::UnavailableCmd),

            FsaCommand::Mount => {
                let FsaRequest::Mount { source, target } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.mount(source, target)?;
                Ok(0)
            }
            FsaCommand::Unmount => {
                let FsaRequest::Unmount { target } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.unmount(target)?;
                Ok(0)
            }

            FsaCommand::ChangeDir => {
                let FsaRequest::ChangeDir { path } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let path = self.resolve(path);
                let stat = self.host.stat_path(&path)?;
                if !stat.is_directory() {
                    return Err(FsaStatus::NotDir);
                }
                self.cwd = path;
                Ok(0)
            }
            FsaCommand::GetCwd => {
                shim.response = FsaResponse::GetCwd {
                    path: self.cwd.clone(),
                };
                Ok(0)
            }

            FsaCommand::MakeDir => {
                let FsaRequest::MakeDir { path, mode } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.make_dir(&self.resolve(path), *mode)?;
                Ok(0)
            }
            FsaCommand::Remove => {
                let FsaRequest::Remove { path } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.remove(&self.resolve(path))?;
                Ok(0)
            }
            FsaCommand::Rename => {
                let FsaRequest::Rename { old_path, new_path } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host
                    .rename(&self.resolve(old_path), &self.resolve(new_path))?;
                Ok(0)
            }
            FsaCommand::ChangeMode => {
                let FsaRequest::ChangeMode { path, mode } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.change_mode(&self.resolve(path), *mode)?;
                Ok(0)
            }

            FsaCommand::OpenDir => {
                let FsaRequest::OpenDir { path } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let handle = self.host.open_dir(&self.resolve(path))?;
                shim.response = FsaResponse::OpenDir { handle };
                Ok(0)
            }
            FsaCommand::ReadDir => {
                let FsaRequest::DirHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let entry = self.host.read_dir(handle)?;
                shim.response = FsaResponse::ReadDir { entry };
                Ok(0)
            }
            FsaCommand::RewindDir => {
                let FsaRequest::DirHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.rewind_dir(handle)?;
                Ok(0)
            }
            FsaCommand::CloseDir => {
                let FsaRequest::DirHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.close_dir(handle)?;
                Ok(0)
            }

            FsaCommand::OpenFile => {
                let FsaRequest::OpenFile { path, mode } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let mode = FsOpenMode::parse(mode).ok_or(FsaStatus::InvalidParam)?;
                let handle = self.host.open_file(&self.resolve(path), mode)?;
                shim.response = FsaResponse::OpenFile { handle };
                Ok(0)
            }
            FsaCommand::CloseFile => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.close_file(handle)?;
                Ok(0)
            }

            FsaCommand::ReadFile => {
                let FsaRequest::ReadFile {
                    handle,
                    size,
                    count,
                    pos,
                    flags,
                } = shim.request
                else {
                    return Err(FsaStatus::InvalidParam);
                };
                let vec = &shim.ioctlv_vecs[1];
                let Some(buffer) = vec.buffer.clone() else {
                    return Err(FsaStatus::InvalidBuffer);
                };

                let wanted = (size as usize * count as usize).min(vec.len);
                let mut scratch = vec![0u8; wanted];
                let pos = flags
                    .contains(FsReadFlags::READ_WITH_POS)
                    .then_some(pos);
                let n = self.host.read_file(handle, &mut scratch, pos)?;
                buffer.write_at(vec.offset, &scratch[..n as usize]);
                Ok(n as i32)
            }
            FsaCommand::WriteFile => {
                let FsaRequest::WriteFile {
                    handle,
                    size,
                    count,
                    pos,
                    flags,
                } = shim.request
                else {
                    return Err(FsaStatus::InvalidParam);
                };
                let vec = &shim.ioctlv_vecs[1];
                let Some(buffer) = vec.buffer.clone() else {
                    return Err(FsaStatus::InvalidBuffer);
                };

                let len = (size as usize * count as usize).min(vec.len);
                let mut scratch = vec![0u8; len];
                let copied = buffer.read_at(vec.offset, &mut scratch);
                let pos = flags
                    .contains(FsWriteFlags::WRITE_WITH_POS)
                    .then_some(pos);
                let n = self.host.write_file(handle, &scratch[..copied], pos)?;
                Ok(n as i32)
            }

            FsaCommand::GetPosFile => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let pos = self.host.get_pos(handle)?;
                shim.response = FsaResponse::GetPosFile { pos };
                Ok(0)
            }
            FsaCommand::SetPosFile => {
                let FsaRequest::SetPosFile { handle, pos } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.set_pos(handle, pos)?;
                Ok(0)
            }
            FsaCommand::IsEof => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                if self.host.is_eof(handle)? {
                    Err(FsaStatus::EndOfFile)
                } else {
                    Ok(0)
                }
            }
            FsaCommand::StatFile => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let stat = self.host.stat_file(handle)?;
                shim.response = FsaResponse::StatFile { stat };
                Ok(0)
            }
            FsaCommand::FlushFile => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.flush_file(handle)?;
                Ok(0)
            }
            FsaCommand::TruncateFile => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.truncate_file(handle)?;
                Ok(0)
            }
            FsaCommand::AppendFile => {
                let FsaRequest::AppendFile { handle, size, count } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let appended = self.host.append_file(handle, size, count)?;
                Ok(appended as i32)
            }
            FsaCommand::GetFileBlockAddress => {
                let FsaRequest::FileHandle { handle } = shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                let address = self.host.get_file_block_address(handle)?;
                shim.response = FsaResponse::GetFileBlockAddress { address };
                Ok(0)
            }

            FsaCommand::GetVolumeInfo => {
                let info = self.host.volume_info()?;
                shim.response = FsaResponse::GetVolumeInfo { info };
                Ok(0)
            }
            FsaCommand::GetError => {
                shim.response = FsaResponse::GetError {
                    error: self.last_status,
                };
                Ok(0)
            }

            // Quotas map onto directories on hosts without quota support.
            FsaCommand::MakeQuota => {
                let FsaRequest::MakeQuota { path, mode, .. } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.make_dir(&self.resolve(path), *mode)?;
                Ok(0)
            }
            FsaCommand::RemoveQuota => {
                let FsaRequest::QuotaPath { path } = &shim.request else {
                    return Err(FsaStatus::InvalidParam);
                };
                self.host.remove(&self.resolve(path))?;
                Ok(0)
            }
            FsaCommand::FlushQuota
            | FsaCommand::RollbackQuota
            | FsaCommand::RegisterFlushQuota
            | FsaCommand::FlushMultiQuota => Ok(0),

            FsaCommand::MakeLink => Err(FsaStatus::UnsupportedCmd),
            FsaCommand::GetInfoByQuery => Err(FsaStatus::UnsupportedCmd),
        }
    }
}

impl IosDevice for FsaDevice {
    fn open(&mut self, _mode: IosOpenMode) -> IosReply {
        0
    }

    fn close(&mut self) -> IosReply {
        log::debug!("fsa: client handle {} closed", self.handle);
        0
    }

    fn ioctl(&mut self, request: u32, input: &IosPayload, _output: &mut IosPayload) -> IosReply {
        self.execute(request, input)
    }

    fn ioctlv(&mut self, request: u32, _vec_in: u32, _vec_out: u32, vecs: &IosPayload) -> IosReply {
        self.execute(request, vecs)
    }

    fn set_handle(&mut self, handle: IosHandle) {
        self.handle = handle;
    }
}
