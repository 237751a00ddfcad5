//! Command constructors.
//!
//! Each `*_async` function prepares the block, stamps the shim request,
//! and enqueues; the result arrives through the prepared delivery choice.
//! The synchronous forms are the same calls bound to the block's internal
//! one-slot queue, followed by a blocking wait — synchronous is
//! asynchronous underneath.
//!
//! Synchronous forms return the decoded output on success and the negative
//! delivered status on failure. Parameter errors caught before anything is
//! enqueued surface as `FatalError`.

use crate::fs::client::FsClient;
use crate::fs::cmdblock::{self, FinishFn, FsAsyncData, FsCmdBlock, FsCmdOutput};
use crate::fs::status::{FsErrorFlag, FsStatus};
use crate::fsa::shim::{FsaCommand, FsaRequest};
use crate::fsa::types::{DataBuffer, FsDirEntry, FsReadFlags, FsStat, FsWriteFlags, FsaVolumeInfo};

// ── Plain commands (no output binding) ───────────────────────────────────────

macro_rules! plain_async {
    ($(#[$doc:meta])* $async_name:ident, $sync_name:ident, ($($arg:ident : $ty:ty),*), $command:expr, $request:expr) => {
        $(#[$doc])*
        pub fn $async_name(
            client: &FsClient,
            block: &FsCmdBlock,
            $($arg: $ty,)*
            error_mask: FsErrorFlag,
            async_data: &FsAsyncData,
        ) -> Result<(), i32> {
            cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
            block.body.shim.lock().unwrap().prepare($command, $request);
            cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
            Ok(())
        }

        /// Synchronous form of the matching `*_async` call.
        pub fn $sync_name(
            client: &FsClient,
            block: &FsCmdBlock,
            $($arg: $ty,)*
        ) -> Result<(), i32> {
            let async_data = cmdblock::prepare_sync_data(&block.body);
            $async_name(client, block, $($arg,)* FsErrorFlag::empty(), &async_data)?;
            let result = cmdblock::wait_result(&block.body);
            if result.status < 0 {
                return Err(result.status);
            }
            Ok(())
        }
    };
}

plain_async!(
    /// Mount `source` at `target`.
    mount_async, mount, (source: &str, target: &str),
    FsaCommand::Mount,
    FsaRequest::Mount { source: source.to_string(), target: target.to_string() }
);

plain_async!(
    /// Unmount `target`.
    unmount_async, unmount, (target: &str),
    FsaCommand::Unmount,
    FsaRequest::Unmount { target: target.to_string() }
);

plain_async!(
    /// Change the client's working directory.
    change_dir_async, change_dir, (path: &str),
    FsaCommand::ChangeDir,
    FsaRequest::ChangeDir { path: path.to_string() }
);

plain_async!(
    /// Create a directory.
    make_dir_async, make_dir, (path: &str, mode: u32),
    FsaCommand::MakeDir,
    FsaRequest::MakeDir { path: path.to_string(), mode }
);

plain_async!(
    /// Remove a file or empty directory.
    remove_async, remove, (path: &str),
    FsaCommand::Remove,
    FsaRequest::Remove { path: path.to_string() }
);

plain_async!(
    /// Rename or move an entry.
    rename_async, rename, (old_path: &str, new_path: &str),
    FsaCommand::Rename,
    FsaRequest::Rename { old_path: old_path.to_string(), new_path: new_path.to_string() }
);

plain_async!(
    /// Change an entry's permission mode.
    change_mode_async, change_mode, (path: &str, mode: u32),
    FsaCommand::ChangeMode,
    FsaRequest::ChangeMode { path: path.to_string(), mode }
);

plain_async!(
    /// Close an open file.
    close_file_async, close_file, (handle: u32),
    FsaCommand::CloseFile,
    FsaRequest::FileHandle { handle }
);

plain_async!(
    /// Flush an open file.
    flush_file_async, flush_file, (handle: u32),
    FsaCommand::FlushFile,
    FsaRequest::FileHandle { handle }
);

plain_async!(
    /// Truncate an open file at its current position.
    truncate_file_async, truncate_file, (handle: u32),
    FsaCommand::TruncateFile,
    FsaRequest::FileHandle { handle }
);

plain_async!(
    /// Set the file position.
    set_pos_file_async, set_pos_file, (handle: u32, pos: u32),
    FsaCommand::SetPosFile,
    FsaRequest::SetPosFile { handle, pos }
);

plain_async!(
    /// Rewind directory iteration.
    rewind_dir_async, rewind_dir, (handle: u32),
    FsaCommand::RewindDir,
    FsaRequest::DirHandle { handle }
);

plain_async!(
    /// Close an open directory.
    close_dir_async, close_dir, (handle: u32),
    FsaCommand::CloseDir,
    FsaRequest::DirHandle { handle }
);

// ── Commands with output bindings ────────────────────────────────────────────

/// Open a file with an fopen-style mode string.
pub fn open_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    path: &str,
    mode: &str,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block.body.shim.lock().unwrap().prepare(
        FsaCommand::OpenFile,
        FsaRequest::OpenFile {
            path: path.to_string(),
            mode: mode.to_string(),
        },
    );
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous open; returns the file handle.
pub fn open_file(client: &FsClient, block: &FsCmdBlock, path: &str, mode: &str) -> Result<u32, i32> {
    sync_with_output(block, |async_data| {
        open_file_async(client, block, path, mode, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::FileHandle(handle) => Ok(handle),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Open a directory for iteration.
pub fn open_dir_async(
    client: &FsClient,
    block: &FsCmdBlock,
    path: &str,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block.body.shim.lock().unwrap().prepare(
        FsaCommand::OpenDir,
        FsaRequest::OpenDir {
            path: path.to_string(),
        },
    );
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous open-dir; returns the directory handle.
pub fn open_dir(client: &FsClient, block: &FsCmdBlock, path: &str) -> Result<u32, i32> {
    sync_with_output(block, |async_data| {
        open_dir_async(client, block, path, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::DirHandle(handle) => Ok(handle),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Read the next directory entry.
pub fn read_dir_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::ReadDir, FsaRequest::DirHandle { handle });
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous read-dir; `Ok(None)` at the end of the directory.
pub fn read_dir(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
) -> Result<Option<FsDirEntry>, i32> {
    match sync_with_output(block, |async_data| {
        read_dir_async(client, block, handle, FsErrorFlag::empty(), async_data)
    }) {
        Ok(FsCmdOutput::DirEntry(entry)) => Ok(Some(entry)),
        Ok(_) => Err(FsStatus::FatalError.code()),
        Err(status) if status == FsStatus::End.code() => Ok(None),
        Err(status) => Err(status),
    }
}

/// Query the current file position.
pub fn get_pos_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::GetPosFile, FsaRequest::FileHandle { handle });
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

pub fn get_pos_file(client: &FsClient, block: &FsCmdBlock, handle: u32) -> Result<u32, i32> {
    sync_with_output(block, |async_data| {
        get_pos_file_async(client, block, handle, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::Position(pos) => Ok(pos),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Stat an open file.
pub fn stat_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::StatFile, FsaRequest::FileHandle { handle });
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

pub fn stat_file(client: &FsClient, block: &FsCmdBlock, handle: u32) -> Result<FsStat, i32> {
    sync_with_output(block, |async_data| {
        stat_file_async(client, block, handle, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::Stat(stat) => Ok(stat),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Query the physical block address of an open file.
pub fn get_file_block_address_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block.body.shim.lock().unwrap().prepare(
        FsaCommand::GetFileBlockAddress,
        FsaRequest::FileHandle { handle },
    );
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

pub fn get_file_block_address(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
) -> Result<u32, i32> {
    sync_with_output(block, |async_data| {
        get_file_block_address_async(client, block, handle, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::BlockAddress(address) => Ok(address),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Query the client's working directory.
pub fn get_cwd_async(
    client: &FsClient,
    block: &FsCmdBlock,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::GetCwd, FsaRequest::None);
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

pub fn get_cwd(client: &FsClient, block: &FsCmdBlock) -> Result<String, i32> {
    sync_with_output(block, |async_data| {
        get_cwd_async(client, block, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::Cwd(path) => Ok(path),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Query volume metadata.
pub fn get_volume_info_async(
    client: &FsClient,
    block: &FsCmdBlock,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::GetVolumeInfo, FsaRequest::None);
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

pub fn get_volume_info(client: &FsClient, block: &FsCmdBlock) -> Result<FsaVolumeInfo, i32> {
    sync_with_output(block, |async_data| {
        get_volume_info_async(client, block, FsErrorFlag::empty(), async_data)
    })
    .and_then(|output| match output {
        FsCmdOutput::VolumeInfo(info) => Ok(info),
        _ => Err(FsStatus::FatalError.code()),
    })
}

/// Test an open file for end-of-file.
pub fn is_eof_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare(FsaCommand::IsEof, FsaRequest::FileHandle { handle });
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous EOF test.
pub fn is_eof(client: &FsClient, block: &FsCmdBlock, handle: u32) -> Result<bool, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    is_eof_async(client, block, handle, FsErrorFlag::empty(), &async_data)?;
    let result = cmdblock::wait_result(&block.body);
    if result.status == FsStatus::End.code() {
        Ok(true)
    } else if result.status < 0 {
        Err(result.status)
    } else {
        Ok(false)
    }
}

/// Extend an open file by `size * count` zero bytes.
pub fn append_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    size: u32,
    count: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block.body.shim.lock().unwrap().prepare(
        FsaCommand::AppendFile,
        FsaRequest::AppendFile { handle, size, count },
    );
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous append; returns the appended count.
pub fn append_file(
    client: &FsClient,
    block: &FsCmdBlock,
    handle: u32,
    size: u32,
    count: u32,
) -> Result<u32, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    append_file_async(client, block, handle, size, count, FsErrorFlag::empty(), &async_data)?;
    let result = cmdblock::wait_result(&block.body);
    if result.status < 0 {
        return Err(result.status);
    }
    Ok(result.status as u32)
}

// ── Read / write ─────────────────────────────────────────────────────────────

fn read_file_inner(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    handle: u32,
    pos: Option<u32>,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    let Some(total) = size.checked_mul(count) else {
        return Err(FsStatus::FatalError.code());
    };
    if buffer.len() < total as usize {
        return Err(FsStatus::FatalError.code());
    }

    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;

    let flags = if pos.is_some() {
        FsReadFlags::READ_WITH_POS
    } else {
        FsReadFlags::empty()
    };
    let pos = pos.unwrap_or(0);
    let read_size =
        cmdblock::init_read_state(&block.body, handle, buffer.clone(), size, total, pos, flags);

    block
        .body
        .shim
        .lock()
        .unwrap()
        .prepare_read(handle, buffer.clone(), 0, read_size, pos, flags);
    cmdblock::submit_command(&client.body, &block.body, FinishFn::ReadCommand);
    Ok(())
}

/// Read `size * count` bytes at the file cursor into `buffer`.
///
/// Transfers run in rounds of at most [`FS_MAX_BYTES_PER_REQUEST`] bytes
/// per IPC; the delivered status is the whole-chunk count
/// (`bytes_read / size`), short on end-of-file.
///
/// [`FS_MAX_BYTES_PER_REQUEST`]: crate::fs::FS_MAX_BYTES_PER_REQUEST
pub fn read_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    read_file_inner(client, block, buffer, size, count, handle, None, error_mask, async_data)
}

/// Positioned variant of [`read_file_async`].
pub fn read_file_with_pos_async(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    pos: u32,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    read_file_inner(client, block, buffer, size, count, handle, Some(pos), error_mask, async_data)
}

/// Synchronous read; returns the whole-chunk count.
pub fn read_file(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    handle: u32,
) -> Result<u32, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    read_file_async(client, block, buffer, size, count, handle, FsErrorFlag::empty(), &async_data)?;
    let result = cmdblock::wait_result(&block.body);
    if result.status < 0 {
        return Err(result.status);
    }
    Ok(result.status as u32)
}

/// Synchronous positioned read; returns the whole-chunk count.
pub fn read_file_with_pos(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    pos: u32,
    handle: u32,
) -> Result<u32, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    read_file_with_pos_async(
        client, block, buffer, size, count, pos, handle,
        FsErrorFlag::empty(), &async_data,
    )?;
    let result = cmdblock::wait_result(&block.body);
    if result.status < 0 {
        return Err(result.status);
    }
    Ok(result.status as u32)
}

/// Write `size * count` bytes from `buffer` at the file cursor.
pub fn write_file_async(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    handle: u32,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    let Some(total) = size.checked_mul(count) else {
        return Err(FsStatus::FatalError.code());
    };
    if buffer.len() < total as usize {
        return Err(FsStatus::FatalError.code());
    }

    cmdblock::prepare_async(&client.body, &block.body, error_mask, async_data)?;
    block.body.shim.lock().unwrap().prepare_write(
        handle,
        buffer.clone(),
        size,
        count,
        0,
        FsWriteFlags::empty(),
    );
    cmdblock::submit_command(&client.body, &block.body, FinishFn::Command);
    Ok(())
}

/// Synchronous write; returns the byte count reported by the device.
pub fn write_file(
    client: &FsClient,
    block: &FsCmdBlock,
    buffer: &DataBuffer,
    size: u32,
    count: u32,
    handle: u32,
) -> Result<u32, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    write_file_async(client, block, buffer, size, count, handle, FsErrorFlag::empty(), &async_data)?;
    let result = cmdblock::wait_result(&block.body);
    if result.status < 0 {
        return Err(result.status);
    }
    Ok(result.status as u32)
}

// ── Shared sync plumbing ─────────────────────────────────────────────────────

fn sync_with_output(
    block: &FsCmdBlock,
    submit: impl FnOnce(&FsAsyncData) -> Result<(), i32>,
) -> Result<FsCmdOutput, i32> {
    let async_data = cmdblock::prepare_sync_data(&block.body);
    submit(&async_data)?;
    let result = cmdblock::wait_result(&block.body);
    if result.status < 0 {
        return Err(result.status);
    }
    Ok(block.output())
}
