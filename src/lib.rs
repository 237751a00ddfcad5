//! IPC and filesystem command pipeline for a Wii U style user-mode
//! runtime.
//!
//! Guest threads build filesystem commands against an [`fs::FsClient`],
//! which queues them per client and ferries them one at a time over a
//! per-core ring-buffered IPC transport ([`ios::IpcDriver`]) to the kernel
//! dispatcher ([`ios::Kernel`]). The dispatcher routes by handle to the
//! filesystem-access device ([`fsa::FsaDevice`]), which runs the request
//! against a pluggable host backend ([`fsa::HostFs`]). Replies travel back
//! through the driver onto the owning core's AppIO pump, where statuses
//! are classified: translated and delivered to the user, retried on Busy,
//! or folded into the client's volume-state machine.
//!
//! ```text
//! guest thread            kernel side              handler thread
//!   fs::cmd::*  ──┐
//!   FsCmdBlock    ├─ IpcDriver ─ submit ─▶ Kernel ─▶ FsaDevice ─ HostFs
//!   FsClient    ──┘       ▲                  │
//!                         └──── reply ◀──────┘
//!                         │
//!                 AppIO queue ─▶ handle_result ─▶ callback / msg queue
//! ```
//!
//! The [`runtime::Runtime`] value owns the per-core drivers, the kernel,
//! and the AppIO queues; nothing in the crate is a hidden global.

pub mod appio;
pub mod fs;
pub mod fsa;
pub mod ios;
pub mod runtime;
pub mod sync;

pub use fs::{FsClient, FsCmdBlock, FsErrorFlag, FsStatus, VolumeState};
pub use fsa::{DataBuffer, FsaStatus, HostFs, RamFs};
pub use ios::{IosError, IosHandle, IosReply};
pub use runtime::{Runtime, CORE_COUNT};
