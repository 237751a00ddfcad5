//! Pseudo-device abstraction and the name → factory registry.
//!
//! Devices are the backends the kernel dispatcher routes transactions to.
//! All devices share the same four entry points; a fresh instance is built
//! by its registered factory on every successful Open and destroyed after
//! the Close reply.

use std::collections::BTreeMap;

use crate::ios::buffer::{IosOpenMode, IosPayload};
use crate::ios::error::{IosHandle, IosReply};

/// A pseudo-device instance bound to one open handle.
///
/// `ioctl`/`ioctlv` return the signed reply word directly: a non-negative
/// success value or a negative status from the device's own code space.
pub trait IosDevice: Send {
    /// Called once, immediately after construction. A negative reply
    /// aborts the open and destroys the instance.
    fn open(&mut self, mode: IosOpenMode) -> IosReply;

    /// Called before the instance is removed from the handle table.
    fn close(&mut self) -> IosReply;

    fn ioctl(&mut self, request: u32, input: &IosPayload, output: &mut IosPayload) -> IosReply;

    fn ioctlv(&mut self, request: u32, vec_in: u32, vec_out: u32, vecs: &IosPayload) -> IosReply;

    /// Invoked with the freshly allocated handle after a successful open.
    fn set_handle(&mut self, handle: IosHandle);
}

type DeviceFactory = Box<dyn Fn() -> Box<dyn IosDevice> + Send + Sync>;

/// Registry of device names to factories.
///
/// Populated once at startup, before any dispatch runs; read-only
/// afterwards, so lookups need no locking.
#[derive(Default)]
pub struct DeviceRegistry {
    factories: BTreeMap<String, DeviceFactory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device factory under `name`. Names are unique; a second
    /// registration of the same name replaces nothing and panics, since
    /// registration only happens from startup code.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn IosDevice> + Send + Sync + 'static,
    {
        let previous = self.factories.insert(name.to_string(), Box::new(factory));
        if previous.is_some() {
            panic!("device {name:?} registered twice");
        }
        log::debug!("ios: registered device {name}");
    }

    /// Construct a new instance of the named device.
    pub fn create(&self, name: &str) -> Option<Box<dyn IosDevice>> {
        self.factories.get(name).map(|factory| factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDevice;

    impl IosDevice for NullDevice {
        fn open(&mut self, _mode: IosOpenMode) -> IosReply {
            0
        }
        fn close(&mut self) -> IosReply {
            0
        }
        fn ioctl(&mut self, _request: u32, _input: &IosPayload, _output: &mut IosPayload) -> IosReply {
            0
        }
        fn ioctlv(&mut self, _request: u32, _vec_in: u32, _vec_out: u32, _vecs: &IosPayload) -> IosReply {
            0
        }
        fn set_handle(&mut self, _handle: IosHandle) {}
    }

    #[test]
    fn create_by_name() {
        let mut registry = DeviceRegistry::new();
        registry.register("/dev/null", || Box::new(NullDevice));
        assert!(registry.create("/dev/null").is_some());
        assert!(registry.create("/dev/missing").is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut registry = DeviceRegistry::new();
        registry.register("/dev/null", || Box::new(NullDevice));
        registry.register("/dev/null", || Box::new(NullDevice));
    }
}
