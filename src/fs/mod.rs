//! Client-side filesystem command pipeline.
//!
//! A registered [`FsClient`] owns a priority-ordered command queue with at
//! most one command in flight to the FSA device. Callers prepare an
//! [`FsCmdBlock`], invoke one of the [`cmd`] constructors, and receive the
//! result through a callback, their own message queue, or a blocking wait
//! (synchronous calls are asynchronous underneath).
//!
//! Device statuses coming back from the FSA are classified by [`status`]:
//! most are translated into user-facing `FsStatus` codes and filtered
//! against the block's error mask; media statuses instead drive the
//! client's [volume-state machine](state).

pub mod client;
pub mod cmd;
pub mod cmdblock;
pub mod queue;
pub mod state;
pub mod status;

pub use client::FsClient;
pub use cmdblock::{
    cancel_command, FsAsyncCallback, FsAsyncData, FsAsyncResult, FsCmdBlock, FsCmdBlockStatus,
    FsCmdOutput, FsMessage, FS_MAX_BYTES_PER_REQUEST,
};
pub use state::VolumeState;
pub use status::{FsErrorFlag, FsStatus};
