//! FS command blocks: per-call scratch and the reply pipeline.
//!
//! A command block is prepared, stamped with an FSA request in its shim
//! buffer, and enqueued on its client. When the IPC reply arrives on the
//! owning core's AppIO pump, [`handle_result`] classifies the FSA status:
//! Busy requeues at the front, media statuses drive the volume-state
//! machine, masked error categories make the client fatal, everything else
//! is translated and delivered through the block's finish function.
//!
//! Chunked reads run through [`FinishFn::ReadCommand`]: each reply
//! accumulates progress, rewrites the shim's data vector, and requeues the
//! same block until the transfer completes or comes up short.
//!
//! ## Locking
//!
//! The client's queue mutex is taken before a block's state mutex, never
//! the other way around, and neither is held while posting to a message
//! queue or submitting over IPC.

use std::sync::{Arc, Mutex};

use crate::appio::AppIoMessage;
use crate::fs::client::FsClientBody;
use crate::fs::status::{translate_fsa_status, FsErrorFlag, FsStatus, FsaTranslation};
use crate::fsa::shim::{self, FsaCommand, FsaResponse, FsaShimBuffer, ShimRef};
use crate::fsa::types::{DataBuffer, FsDirEntry, FsReadFlags, FsStat, FsaVolumeInfo};
use crate::sync::MessageQueue;

/// Cap on the data moved by a single read IPC round trip.
pub const FS_MAX_BYTES_PER_REQUEST: u32 = 0x40000;

/// Lifecycle of a command block. `Cancelled` doubles as the terminal
/// completed state; both it and `Initialised` admit a new prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsCmdBlockStatus {
    #[default]
    Initialised,
    QueuedCommand,
    InProgress,
    Cancelled,
}

/// Which finish function runs when the block's result is replied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FinishFn {
    #[default]
    None,
    Command,
    ReadCommand,
}

/// User callback invoked on the AppIO thread with the completed result.
pub type FsAsyncCallback = Arc<dyn Fn(&FsAsyncResult) + Send + Sync>;

/// Completion delivery choice for one prepared command: a user callback or
/// a user message queue, never both.
#[derive(Default, Clone)]
pub struct FsAsyncData {
    pub callback: Option<FsAsyncCallback>,
    pub queue: Option<Arc<MessageQueue<FsMessage>>>,
}

/// The completed-command record posted to the user.
#[derive(Clone)]
pub struct FsAsyncResult {
    pub block: FsCmdBlock,
    pub status: i32,
}

pub type FsMessage = FsAsyncResult;

/// Result values copied out of the shim response when a command finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FsCmdOutput {
    #[default]
    None,
    FileHandle(u32),
    DirHandle(u32),
    DirEntry(FsDirEntry),
    Position(u32),
    Stat(FsStat),
    BlockAddress(u32),
    VolumeInfo(FsaVolumeInfo),
    Cwd(String),
}

#[derive(Clone, Default)]
enum ResultSink {
    #[default]
    None,
    Queue(Arc<MessageQueue<FsMessage>>),
    Callback(FsAsyncCallback),
}

#[derive(Default)]
struct ReadState {
    handle: u32,
    bytes_read: u32,
    bytes_remaining: u32,
    read_size: u32,
    chunk_size: u32,
    pos: u32,
    flags: FsReadFlags,
    buffer: Option<DataBuffer>,
    buffer_offset: usize,
}

#[derive(Default)]
struct CmdState {
    status: FsCmdBlockStatus,
    priority: u8,
    error_mask: FsErrorFlag,
    cancelling: bool,
    client: Option<Arc<FsClientBody>>,
    finish_fn: FinishFn,
    sink: ResultSink,
    /// Raw status word of the last FSA reply.
    fsa_status: i32,
    out: FsCmdOutput,
    read: ReadState,
    user_data: Option<u64>,
}

pub struct FsCmdBlockBody {
    state: Mutex<CmdState>,
    pub(crate) shim: ShimRef,
    /// One-slot queue backing synchronous waits.
    sync_queue: Arc<MessageQueue<FsMessage>>,
}

impl FsCmdBlockBody {
    pub(crate) fn priority(&self) -> u8 {
        self.state.lock().unwrap().priority
    }

    pub(crate) fn finish_fn(&self) -> FinishFn {
        self.state.lock().unwrap().finish_fn
    }

    pub(crate) fn set_fsa_status(&self, status: i32) {
        self.state.lock().unwrap().fsa_status = status;
    }
}

/// Default command priority; 0 is most urgent, 31 least.
const DEFAULT_PRIORITY: u8 = 16;

/// A caller-owned command block.
#[derive(Clone)]
pub struct FsCmdBlock {
    pub(crate) body: Arc<FsCmdBlockBody>,
}

impl Default for FsCmdBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl FsCmdBlock {
    pub fn new() -> Self {
        FsCmdBlock {
            body: Arc::new(FsCmdBlockBody {
                state: Mutex::new(CmdState {
                    priority: DEFAULT_PRIORITY,
                    ..Default::default()
                }),
                shim: Arc::new(Mutex::new(FsaShimBuffer::new(-1))),
                sync_queue: Arc::new(MessageQueue::new(1)),
            }),
        }
    }

    pub fn status(&self) -> FsCmdBlockStatus {
        self.body.state.lock().unwrap().status
    }

    /// Set the queueing priority (clamped to 0..=31). Takes effect at the
    /// next enqueue.
    pub fn set_priority(&self, priority: u8) {
        self.body.state.lock().unwrap().priority = priority.min(31);
    }

    pub fn priority(&self) -> u8 {
        self.body.priority()
    }

    pub fn set_user_data(&self, value: u64) {
        self.body.state.lock().unwrap().user_data = Some(value);
    }

    pub fn user_data(&self) -> Option<u64> {
        self.body.state.lock().unwrap().user_data
    }

    /// The output binding filled by the last completed command.
    pub fn output(&self) -> FsCmdOutput {
        self.body.state.lock().unwrap().out.clone()
    }
}

// ── Preparation ──────────────────────────────────────────────────────────────

/// Prepare a block for an asynchronous operation.
///
/// The block must be reusable (`Initialised` or `Cancelled`), and
/// `async_data` must carry exactly one delivery choice; anything else is a
/// `FatalError`.
pub(crate) fn prepare_async(
    client: &Arc<FsClientBody>,
    block: &Arc<FsCmdBlockBody>,
    error_mask: FsErrorFlag,
    async_data: &FsAsyncData,
) -> Result<(), i32> {
    let mut state = block.state.lock().unwrap();

    if state.status != FsCmdBlockStatus::Initialised && state.status != FsCmdBlockStatus::Cancelled
    {
        log::error!("fs: prepare of a block in state {:?}", state.status);
        return Err(FsStatus::FatalError.code());
    }

    let sink = match (&async_data.callback, &async_data.queue) {
        (Some(_), Some(_)) => {
            log::error!("fs: userCallback and ioMsgQueue are exclusive");
            return Err(FsStatus::FatalError.code());
        }
        (Some(callback), None) => ResultSink::Callback(callback.clone()),
        (None, Some(queue)) => ResultSink::Queue(queue.clone()),
        (None, None) => {
            log::error!("fs: async data carries neither callback nor queue");
            return Err(FsStatus::FatalError.code());
        }
    };

    state.error_mask = error_mask;
    state.client = Some(client.clone());
    state.sink = sink;
    state.out = FsCmdOutput::None;
    state.fsa_status = 0;
    state.read = ReadState::default();
    Ok(())
}

/// Prepare a synchronous operation: the block's internal one-slot queue
/// becomes the delivery target, and [`wait_result`] pops it.
pub(crate) fn prepare_sync_data(block: &Arc<FsCmdBlockBody>) -> FsAsyncData {
    // Drop any stale result from an abandoned wait.
    while block.sync_queue.try_recv().is_ok() {}
    FsAsyncData {
        callback: None,
        queue: Some(block.sync_queue.clone()),
    }
}

/// Block until the prepared command completes.
pub(crate) fn wait_result(block: &Arc<FsCmdBlockBody>) -> FsAsyncResult {
    block
        .sync_queue
        .recv()
        .expect("sync result queue destroyed mid-wait")
}

// ── Queueing ─────────────────────────────────────────────────────────────────

/// First enqueue of a prepared command.
pub(crate) fn submit_command(
    client: &Arc<FsClientBody>,
    block: &Arc<FsCmdBlockBody>,
    finish_fn: FinishFn,
) {
    block.shim.lock().unwrap().client_handle = client.fsa_handle();

    {
        let mut queue = client.cmd_queue.lock();
        let mut state = block.state.lock().unwrap();
        state.finish_fn = finish_fn;
        state.status = FsCmdBlockStatus::QueuedCommand;
        drop(state);
        queue.enqueue(block.clone());
    }

    process_cmds(client);
}

/// Re-enqueue a command after a Busy reply or between read chunks.
///
/// A pending cancellation is consumed here: the block is marked cancelled
/// and replied with `Cancelled` instead of going back on the queue.
pub(crate) fn requeue(
    client: &Arc<FsClientBody>,
    block: &Arc<FsCmdBlockBody>,
    insert_at_front: bool,
    finish_fn: FinishFn,
) {
    {
        let mut queue = client.cmd_queue.lock();
        let mut state = block.state.lock().unwrap();

        if state.cancelling {
            state.cancelling = false;
            state.status = FsCmdBlockStatus::Cancelled;
            drop(state);
            queue.last_dequeued = None;
            drop(queue);
            reply_result(client, block, FsStatus::Cancelled.code());
            return;
        }

        state.finish_fn = finish_fn;
        state.status = FsCmdBlockStatus::QueuedCommand;
        drop(state);

        queue.finish_cmd();
        queue.requeues += 1;
        if insert_at_front {
            queue.push_front(block.clone());
        } else {
            queue.enqueue(block.clone());
        }
    }

    process_cmds(client);
}

/// Dequeue and submit the next command if none is in flight.
pub(crate) fn process_cmds(client: &Arc<FsClientBody>) {
    let block = {
        let mut queue = client.cmd_queue.lock();
        match queue.dequeue() {
            Some(block) => block,
            None => return,
        }
    };

    block.state.lock().unwrap().status = FsCmdBlockStatus::InProgress;

    // The IPC completion hops through the owning core's AppIO queue so the
    // reply handler runs on that core's handler thread.
    let callback = {
        let block = block.clone();
        let appio = client.appio_queue().clone();
        Box::new(move |reply: i32| {
            block.set_fsa_status(reply);
            appio
                .try_send(AppIoMessage::FsaResponse(block.clone()))
                .expect("AppIO queue overflow while posting FSA response");
        })
    };

    shim::submit_request_async(client.driver(), &block.shim, callback);
}

// ── Reply path ───────────────────────────────────────────────────────────────

/// Post the completed result to the block's delivery sink.
///
/// A failed post is an invariant violation: every sink is either the
/// block's own one-slot queue, a live user queue, or the AppIO queue.
pub(crate) fn set_result(block: &Arc<FsCmdBlockBody>, status: i32) {
    let (sink, client) = {
        let state = block.state.lock().unwrap();
        (state.sink.clone(), state.client.clone())
    };

    let result = FsAsyncResult {
        block: FsCmdBlock {
            body: block.clone(),
        },
        status,
    };

    match sink {
        ResultSink::None => panic!("async result posted without a prepared sink"),
        ResultSink::Queue(queue) => queue
            .try_send(result)
            .expect("could not post async result message"),
        ResultSink::Callback(callback) => {
            let client = client.expect("prepared block without a client");
            client
                .appio_queue()
                .try_send(AppIoMessage::AsyncResult { result, callback })
                .expect("could not post async result message");
        }
    }
}

/// Finish the in-flight command, run the block's finish function, and
/// start the next queued command.
pub(crate) fn reply_result(client: &Arc<FsClientBody>, block: &Arc<FsCmdBlockBody>, status: i32) {
    client.cmd_queue.lock().finish_cmd();

    match block.finish_fn() {
        FinishFn::None => {}
        FinishFn::Command => finish_cmd(client, block, status),
        FinishFn::ReadCommand => finish_read_cmd(client, block, status),
    }

    process_cmds(client);
}

/// Handle the FSA status of a completed IPC transaction. Runs on the
/// owning core's AppIO thread.
pub(crate) fn handle_result(block: &Arc<FsCmdBlockBody>) {
    let (client, fsa_status, error_mask) = {
        let state = block.state.lock().unwrap();
        (
            state.client.clone().expect("in-flight block without client"),
            state.fsa_status,
            state.error_mask,
        )
    };

    if !client.is_registered() {
        match block.finish_fn() {
            FinishFn::None => {}
            FinishFn::Command => finish_cmd(&client, block, FsStatus::Cancelled.code()),
            FinishFn::ReadCommand => finish_read_cmd(&client, block, FsStatus::Cancelled.code()),
        }
        return;
    }

    client.set_last_error(fsa_status);

    if fsa_status >= 0 {
        client.cmd_queue.lock().clear_last_dequeued_if(block);
        reply_result(&client, block, fsa_status);
        return;
    }

    match translate_fsa_status(fsa_status) {
        FsaTranslation::SetVolumeState(state) => {
            // The command is not replied; the state machine's recovery
            // path resubmits later.
            client.set_volume_state(state);
        }
        FsaTranslation::RequeueFront => {
            let finish_fn = block.finish_fn();
            requeue(&client, block, true, finish_fn);
        }
        FsaTranslation::Swallow => {}
        FsaTranslation::Unhandled(name) => {
            panic!("unhandled FSA status {name}");
        }
        FsaTranslation::Deliver { status, flags } => {
            if error_mask.intersects(flags) {
                client.enter_fatal();
                return;
            }
            client.cmd_queue.lock().clear_last_dequeued_if(block);
            reply_result(&client, block, status);
        }
    }
}

// ── Finish functions ─────────────────────────────────────────────────────────

/// Copy the shim response into the block's output binding and post the
/// result.
pub(crate) fn finish_cmd(client: &Arc<FsClientBody>, block: &Arc<FsCmdBlockBody>, status: i32) {
    {
        let mut queue = client.cmd_queue.lock();
        let mut state = block.state.lock().unwrap();
        state.cancelling = false;
        state.status = FsCmdBlockStatus::Cancelled;
        drop(state);
        queue.clear_last_dequeued_if(block);
    }

    if status < 0 {
        set_result(block, status);
        return;
    }

    let output = {
        let shim = block.shim.lock().unwrap();
        match shim.command {
            FsaCommand::Mount
            | FsaCommand::Unmount
            | FsaCommand::ChangeDir
            | FsaCommand::MakeDir
            | FsaCommand::Remove
            | FsaCommand::Rename
            | FsaCommand::RewindDir
            | FsaCommand::CloseDir
            | FsaCommand::ReadFile
            | FsaCommand::WriteFile
            | FsaCommand::SetPosFile
            | FsaCommand::IsEof
            | FsaCommand::CloseFile
            | FsaCommand::GetError
            | FsaCommand::FlushFile
            | FsaCommand::AppendFile
            | FsaCommand::TruncateFile
            | FsaCommand::MakeQuota
            | FsaCommand::FlushQuota
            | FsaCommand::RollbackQuota
            | FsaCommand::ChangeMode
            | FsaCommand::RegisterFlushQuota
            | FsaCommand::FlushMultiQuota
            | FsaCommand::RemoveQuota
            | FsaCommand::MakeLink => FsCmdOutput::None,

            FsaCommand::GetVolumeInfo => match &shim.response {
                FsaResponse::GetVolumeInfo { info } => FsCmdOutput::VolumeInfo(info.clone()),
                _ => FsCmdOutput::None,
            },
            FsaCommand::OpenDir => match &shim.response {
                FsaResponse::OpenDir { handle } => FsCmdOutput::DirHandle(*handle),
                _ => FsCmdOutput::None,
            },
            FsaCommand::ReadDir => match &shim.response {
                FsaResponse::ReadDir { entry } => FsCmdOutput::DirEntry(entry.clone()),
                _ => FsCmdOutput::None,
            },
            FsaCommand::OpenFile => match &shim.response {
                FsaResponse::OpenFile { handle } => FsCmdOutput::FileHandle(*handle),
                _ => FsCmdOutput::None,
            },
            FsaCommand::GetPosFile => match &shim.response {
                FsaResponse::GetPosFile { pos } => FsCmdOutput::Position(*pos),
                _ => FsCmdOutput::None,
            },
            FsaCommand::StatFile => match &shim.response {
                FsaResponse::StatFile { stat } => FsCmdOutput::Stat(stat.clone()),
                _ => FsCmdOutput::None,
            },
            FsaCommand::GetFileBlockAddress => match &shim.response {
                FsaResponse::GetFileBlockAddress { address } => {
                    FsCmdOutput::BlockAddress(*address)
                }
                _ => FsCmdOutput::None,
            },
            FsaCommand::GetCwd => match &shim.response {
                FsaResponse::GetCwd { path } => FsCmdOutput::Cwd(path.clone()),
                _ => FsCmdOutput::None,
            },

            FsaCommand::GetInfoByQuery => {
                panic!("GetInfoByQuery result copy-out is not implemented")
            }
            FsaCommand::Invalid => panic!("finish of an unprepared FSA command"),
        }
    };

    block.state.lock().unwrap().out = output;
    set_result(block, status);
}

/// Chunked-read driver.
///
/// `status` is the byte count moved by the last round (or an error, which
/// short-circuits into [`finish_cmd`]). The read completes when nothing
/// remains or the device came up short; otherwise the shim's request and
/// data vector are rewound for the next chunk and the block requeues at
/// the queue front. The final reported status is the number of whole
/// chunks transferred.
pub(crate) fn finish_read_cmd(
    client: &Arc<FsClientBody>,
    block: &Arc<FsCmdBlockBody>,
    status: i32,
) {
    if status < 0 {
        return finish_cmd(client, block, status);
    }
    let bytes_read = status as u32;

    let next = {
        let mut state = block.state.lock().unwrap();
        let read = &mut state.read;
        read.bytes_read += bytes_read;
        read.bytes_remaining = read.bytes_remaining.saturating_sub(bytes_read);

        if read.bytes_remaining == 0 || bytes_read < read.read_size {
            None
        } else {
            read.read_size = read.bytes_remaining.min(FS_MAX_BYTES_PER_REQUEST);
            read.buffer_offset += bytes_read as usize;
            if read.flags.contains(FsReadFlags::READ_WITH_POS) {
                read.pos += bytes_read;
            }
            Some((
                read.handle,
                read.buffer.clone().expect("read state without a buffer"),
                read.buffer_offset,
                read.read_size,
                read.pos,
                read.flags,
            ))
        }
    };

    match next {
        None => {
            let chunks = {
                let state = block.state.lock().unwrap();
                if state.read.chunk_size == 0 {
                    0
                } else {
                    state.read.bytes_read / state.read.chunk_size
                }
            };
            finish_cmd(client, block, chunks as i32);
        }
        Some((handle, buffer, offset, read_size, pos, flags)) => {
            block
                .shim
                .lock()
                .unwrap()
                .prepare_read(handle, buffer, offset, read_size, pos, flags);
            requeue(client, block, true, FinishFn::ReadCommand);
        }
    }
}

// ── Read-state setup (used by the command constructors) ─────────────────────

pub(crate) fn init_read_state(
    block: &Arc<FsCmdBlockBody>,
    handle: u32,
    buffer: DataBuffer,
    chunk_size: u32,
    total: u32,
    pos: u32,
    flags: FsReadFlags,
) -> u32 {
    let read_size = total.min(FS_MAX_BYTES_PER_REQUEST);
    let mut state = block.state.lock().unwrap();
    state.read = ReadState {
        handle,
        bytes_read: 0,
        bytes_remaining: total,
        read_size,
        chunk_size,
        pos,
        flags,
        buffer: Some(buffer),
        buffer_offset: 0,
    };
    read_size
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Request cancellation of a queued or in-flight command.
///
/// A command still waiting in the queue is removed and replied with
/// `Cancelled` immediately. A command already in flight is only marked:
/// the Cancelling bit is observed at the next requeue boundary, and the
/// in-flight IPC is never interrupted.
pub fn cancel_command(client: &crate::fs::client::FsClient, block: &FsCmdBlock) {
    let client_body = &client.body;
    let block_body = &block.body;

    let removed = {
        let mut queue = client_body.cmd_queue.lock();
        if queue.is_last_dequeued(block_body) {
            block_body.state.lock().unwrap().cancelling = true;
            None
        } else {
            queue.remove(block_body)
        }
    };

    if let Some(removed) = removed {
        removed.state.lock().unwrap().status = FsCmdBlockStatus::Cancelled;
        match removed.finish_fn() {
            FinishFn::None => {}
            _ => finish_cmd(client_body, &removed, FsStatus::Cancelled.code()),
        }
    }
}
