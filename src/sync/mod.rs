// Cooperative blocking primitives used by the IPC driver and FS client.

pub mod event;
pub mod msgqueue;

pub use event::{EventMode, OsEvent};
pub use msgqueue::{MessageQueue, QueueError};
