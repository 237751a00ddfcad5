//! IOS transport: the IPC buffer record, per-core driver, kernel dispatcher
//! and pseudo-device registry.
//!
//! Guest-side code allocates a request from its core's [`IpcDriver`], fills
//! the [`IpcBuffer`], submits it, and either blocks for the reply or attaches
//! an asynchronous callback. The kernel [`dispatcher`] routes each buffer to
//! the pseudo-device owning its handle and writes the reply back into the
//! same buffer.

pub mod buffer;
pub mod device;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod fifo;

pub use buffer::{IosCommand, IosOpenMode, IosPayload, IpcBuffer, IpcBufferHeader, IPC_BUFFER_COUNT};
pub use device::{DeviceRegistry, IosDevice};
pub use dispatcher::Kernel;
pub use driver::{IpcDriver, IpcDriverStats, IpcDriverStatus, RequestId};
pub use error::{IosError, IosHandle, IosReply};
pub use fifo::RequestFifo;
