//! Kernel-side IPC dispatcher.
//!
//! The sole consumer of submitted IPC buffers and the sole producer of
//! `Reply` commands. Open and Close manage the open-handle table; Ioctl and
//! Ioctlv resolve the target device by handle and forward. Dispatch is
//! non-blocking and serialized by a single kernel mutex; submissions arrive
//! serially per driver, so the lock is uncontended in practice.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::ios::buffer::{IosCommand, IosOpenMode, IpcBuffer};
use crate::ios::device::{DeviceRegistry, IosDevice};
use crate::ios::error::{IosError, IosHandle, IosReply};

struct KernelState {
    /// Open handle → live device. Handles are never reused within a run.
    open_devices: BTreeMap<IosHandle, Box<dyn IosDevice>>,
    next_handle: IosHandle,
}

/// The kernel half of the IPC pipeline: device registry plus the open-handle
/// table.
pub struct Kernel {
    devices: DeviceRegistry,
    state: Mutex<KernelState>,
}

impl Kernel {
    pub fn new(devices: DeviceRegistry) -> Self {
        Kernel {
            devices,
            state: Mutex::new(KernelState {
                open_devices: BTreeMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Handle one submitted IPC buffer and turn it into a reply.
    ///
    /// On return the buffer's command is `Reply`, `prev_command` and
    /// `prev_handle` echo the request, and `reply` holds the result.
    ///
    /// # Panics
    ///
    /// Panics on a command tag outside the request set; producing one is a
    /// driver bug.
    pub fn dispatch(&self, buffer: &mut IpcBuffer) {
        let command = buffer
            .command()
            .unwrap_or_else(|| panic!("unimplemented IOS command {}", buffer.header.command));

        let reply = match command {
            IosCommand::Open => {
                let name_len = buffer.header.args[1] as usize;
                let mode = IosOpenMode::try_from(buffer.header.args[2]).unwrap_or_default();
                match buffer.buffer1.as_name(name_len) {
                    Some(name) => self.open_device(name, mode),
                    None => IosError::InvalidArg.code(),
                }
            }
            IosCommand::Close => self.close_device(buffer.header.handle),
            IosCommand::Ioctl => {
                let mut state = self.state.lock().unwrap();
                match state.open_devices.get_mut(&buffer.header.handle) {
                    None => IosError::InvalidHandle.code(),
                    Some(device) => {
                        let request = buffer.header.args[0];
                        device.ioctl(request, &buffer.buffer1, &mut buffer.buffer2)
                    }
                }
            }
            IosCommand::Ioctlv => {
                let mut state = self.state.lock().unwrap();
                match state.open_devices.get_mut(&buffer.header.handle) {
                    None => IosError::InvalidHandle.code(),
                    Some(device) => {
                        let request = buffer.header.args[0];
                        let vec_in = buffer.header.args[1];
                        let vec_out = buffer.header.args[2];
                        device.ioctlv(request, vec_in, vec_out, &buffer.buffer1)
                    }
                }
            }
            other => panic!("unimplemented IOS command {other:?}"),
        };

        buffer.header.prev_handle = buffer.header.handle;
        buffer.header.prev_command = buffer.header.command;
        buffer.header.reply = reply;
        buffer.header.command = IosCommand::Reply.into();
    }

    /// Open a device by name.
    ///
    /// Returns the freshly allocated handle (positive) on success, or a
    /// negative error: `NoExists` for an unknown name, or whatever the
    /// device's own open reported.
    fn open_device(&self, name: &str, mode: IosOpenMode) -> IosReply {
        let Some(mut device) = self.devices.create(name) else {
            return IosError::NoExists.code();
        };

        let reply = device.open(mode);
        if reply < 0 {
            // Open failed; the instance is dropped without entering the table.
            return reply;
        }

        let mut state = self.state.lock().unwrap();
        let handle = state.next_handle;
        state.next_handle += 1;
        device.set_handle(handle);
        state.open_devices.insert(handle, device);
        log::debug!("ios: opened {name} as handle {handle}");
        handle
    }

    /// Close and destroy the device behind `handle`.
    fn close_device(&self, handle: IosHandle) -> IosReply {
        let mut state = self.state.lock().unwrap();
        let Some(mut device) = state.open_devices.remove(&handle) else {
            return IosError::InvalidHandle.code();
        };
        drop(state);

        let reply = device.close();
        log::debug!("ios: closed handle {handle}");
        reply
    }

    /// Number of currently open devices (diagnostic).
    pub fn open_device_count(&self) -> usize {
        self.state.lock().unwrap().open_devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ios::buffer::IosPayload;

    struct EchoDevice {
        handle: IosHandle,
    }

    impl IosDevice for EchoDevice {
        fn open(&mut self, _mode: IosOpenMode) -> IosReply {
            0
        }
        fn close(&mut self) -> IosReply {
            0
        }
        fn ioctl(&mut self, request: u32, _input: &IosPayload, _output: &mut IosPayload) -> IosReply {
            request as IosReply
        }
        fn ioctlv(&mut self, _request: u32, _vec_in: u32, _vec_out: u32, _vecs: &IosPayload) -> IosReply {
            self.handle
        }
        fn set_handle(&mut self, handle: IosHandle) {
            self.handle = handle;
        }
    }

    fn kernel() -> Kernel {
        let mut registry = DeviceRegistry::new();
        registry.register("/dev/echo", || Box::new(EchoDevice { handle: -1 }));
        Kernel::new(registry)
    }

    fn open_buffer(name: &str) -> IpcBuffer {
        let mut buffer = IpcBuffer::default();
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        buffer.header.command = IosCommand::Open.into();
        buffer.header.handle = -1;
        buffer.header.args[1] = bytes.len() as u32;
        buffer.buffer1 = IosPayload::Bytes(bytes);
        buffer
    }

    #[test]
    fn open_allocates_monotonic_handles() {
        let kernel = kernel();

        let mut first = open_buffer("/dev/echo");
        kernel.dispatch(&mut first);
        assert_eq!(first.header.reply, 1);
        assert_eq!(first.header.command, u32::from(IosCommand::Reply));
        assert_eq!(first.header.prev_command, u32::from(IosCommand::Open));

        let mut second = open_buffer("/dev/echo");
        kernel.dispatch(&mut second);
        assert_eq!(second.header.reply, 2);

        // Close the first handle; the next open must not reuse it.
        let mut close = IpcBuffer::default();
        close.header.command = IosCommand::Close.into();
        close.header.handle = 1;
        kernel.dispatch(&mut close);
        assert_eq!(close.header.reply, 0);

        let mut third = open_buffer("/dev/echo");
        kernel.dispatch(&mut third);
        assert_eq!(third.header.reply, 3);
    }

    #[test]
    fn open_unknown_device() {
        let kernel = kernel();
        let mut buffer = open_buffer("/dev/missing");
        kernel.dispatch(&mut buffer);
        assert_eq!(buffer.header.reply, IosError::NoExists.code());
    }

    #[test]
    fn ioctl_on_closed_handle_is_invalid() {
        let kernel = kernel();
        let mut open = open_buffer("/dev/echo");
        kernel.dispatch(&mut open);
        let handle = open.header.reply;

        let mut close = IpcBuffer::default();
        close.header.command = IosCommand::Close.into();
        close.header.handle = handle;
        kernel.dispatch(&mut close);

        let mut ioctl = IpcBuffer::default();
        ioctl.header.command = IosCommand::Ioctl.into();
        ioctl.header.handle = handle;
        kernel.dispatch(&mut ioctl);
        assert_eq!(ioctl.header.reply, IosError::InvalidHandle.code());
    }

    #[test]
    #[should_panic(expected = "unimplemented IOS command")]
    fn unknown_command_aborts() {
        let kernel = kernel();
        let mut buffer = IpcBuffer::default();
        buffer.header.command = 0xff;
        kernel.dispatch(&mut buffer);
    }
}
