//! FS client registration and per-client state.
//!
//! Registering a client opens an FSA transport handle on the chosen core;
//! everything the client does afterwards flows through that handle. The
//! client body carries the command queue, the volume-state machine, and
//! the last FSA error, and is shared (non-owning from the blocks' point of
//! view) with every command block prepared against it.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::appio::AppIoMessage;
use crate::fs::cmdblock::{self, FinishFn, FsCmdBlockBody};
use crate::fs::queue::FsCmdQueue;
use crate::fs::state::{VolumeState, VolumeStateMachine};
use crate::fs::status::FsStatus;
use crate::fsa::FSA_DEVICE_NAME;
use crate::ios::buffer::IosOpenMode;
use crate::ios::driver::IpcDriver;
use crate::ios::error::IosHandle;
use crate::runtime::Runtime;
use crate::sync::MessageQueue;

struct ClientState {
    last_error: i32,
    fsm: VolumeStateMachine,
}

pub struct FsClientBody {
    runtime: Arc<Runtime>,
    core: u32,
    fsa_handle: AtomicI32,
    registered: AtomicBool,
    state: Mutex<ClientState>,
    pub(crate) cmd_queue: FsCmdQueue,
}

impl FsClientBody {
    pub(crate) fn fsa_handle(&self) -> IosHandle {
        self.fsa_handle.load(Ordering::Acquire)
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn driver(&self) -> &IpcDriver {
        self.runtime.driver(self.core)
    }

    pub(crate) fn appio_queue(&self) -> &Arc<MessageQueue<AppIoMessage>> {
        self.runtime.appio_queue(self.core)
    }

    pub(crate) fn set_last_error(&self, error: i32) {
        self.state.lock().unwrap().last_error = error;
    }

    pub(crate) fn set_volume_state(&self, state: VolumeState) {
        self.state.lock().unwrap().fsm.set_state(state);
    }

    pub(crate) fn enter_fatal(&self) {
        self.state.lock().unwrap().fsm.enter_fatal();
    }
}

/// A registered FS client.
#[derive(Clone)]
pub struct FsClient {
    pub(crate) body: Arc<FsClientBody>,
}

impl FsClient {
    /// Register a client on `core`: opens the FSA device and readies the
    /// command queue. Fails with the negative transport reply if the
    /// device cannot be opened.
    pub fn register(runtime: &Arc<Runtime>, core: u32) -> Result<FsClient, i32> {
        let handle = runtime.ios_open(core, FSA_DEVICE_NAME, IosOpenMode::None);
        if handle < 0 {
            log::error!("fs: could not open {FSA_DEVICE_NAME}: {handle}");
            return Err(handle);
        }

        log::debug!("fs: registered client on core {core} (fsa handle {handle})");
        Ok(FsClient {
            body: Arc::new(FsClientBody {
                runtime: runtime.clone(),
                core,
                fsa_handle: AtomicI32::new(handle),
                registered: AtomicBool::new(true),
                state: Mutex::new(ClientState {
                    last_error: 0,
                    fsm: VolumeStateMachine::new(),
                }),
                cmd_queue: FsCmdQueue::new(),
            }),
        })
    }

    /// Unregister the client.
    ///
    /// Commands still waiting in the queue are cancelled and replied with
    /// `Cancelled`; a command in flight is left to its natural reply,
    /// which the handler turns into `Cancelled` on seeing the client
    /// unregistered. Finally the FSA handle is closed.
    pub fn unregister(&self) {
        if !self.body.registered.swap(false, Ordering::AcqRel) {
            return;
        }

        let drained = self.body.cmd_queue.lock().drain();
        for block in drained {
            block_cancelled(&self.body, &block);
        }

        let handle = self.body.fsa_handle.swap(-1, Ordering::AcqRel);
        if handle >= 0 {
            self.body.runtime.ios_close(self.body.core, handle);
        }
        log::debug!("fs: unregistered client on core {}", self.body.core);
    }

    pub fn core(&self) -> u32 {
        self.body.core
    }

    pub fn is_registered(&self) -> bool {
        self.body.is_registered()
    }

    /// Last FSA status observed by this client's reply handler.
    pub fn last_error(&self) -> i32 {
        self.body.state.lock().unwrap().last_error
    }

    pub fn volume_state(&self) -> VolumeState {
        self.body.state.lock().unwrap().fsm.state()
    }

    /// Number of commands waiting in the queue (diagnostic).
    pub fn queued_commands(&self) -> usize {
        self.body.cmd_queue.lock().len()
    }

    /// Number of re-enqueues the queue has performed (diagnostic).
    pub fn requeue_count(&self) -> u64 {
        self.body.cmd_queue.lock().requeues
    }
}

fn block_cancelled(client: &Arc<FsClientBody>, block: &Arc<FsCmdBlockBody>) {
    match block.finish_fn() {
        FinishFn::None => {}
        _ => cmdblock::finish_cmd(client, block, FsStatus::Cancelled.code()),
    }
}
