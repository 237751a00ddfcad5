//! Per-core AppIO completion pump.
//!
//! Each core has one AppIO message queue. FSA completions hop through it
//! so the client's reply handler runs on that core's handler thread, and
//! callback-style async results are delivered through it so user callbacks
//! run there too. The embedding runtime supplies the threads; this module
//! supplies the loop body.

use std::sync::Arc;

use crate::fs::cmdblock::{self, FsAsyncCallback, FsAsyncResult, FsCmdBlockBody};
use crate::sync::MessageQueue;

/// Depth of each core's AppIO queue.
pub const APPIO_QUEUE_CAPACITY: usize = 256;

pub enum AppIoMessage {
    /// An FSA IPC transaction completed; run the client's reply handler.
    FsaResponse(Arc<FsCmdBlockBody>),
    /// Deliver a completed result to a user callback.
    AsyncResult {
        result: FsAsyncResult,
        callback: FsAsyncCallback,
    },
    /// Stop the pump.
    Shutdown,
}

/// Handle one AppIO message, blocking until one arrives.
///
/// Returns `false` when the pump should stop (shutdown message or a
/// destroyed queue).
pub fn process_one(queue: &MessageQueue<AppIoMessage>) -> bool {
    let Ok(message) = queue.recv() else {
        return false;
    };

    match message {
        AppIoMessage::FsaResponse(block) => {
            cmdblock::handle_result(&block);
            true
        }
        AppIoMessage::AsyncResult { result, callback } => {
            callback(&result);
            true
        }
        AppIoMessage::Shutdown => false,
    }
}

/// Pump messages until shutdown. This is the body of a core's AppIO
/// handler thread.
pub fn run(queue: &MessageQueue<AppIoMessage>) {
    while process_one(queue) {}
}
