//! The runtime value tying the pipeline together.
//!
//! One [`Runtime`] owns what the original globals held: the per-core IPC
//! drivers, the kernel (device registry plus open-handle table), and the
//! per-core AppIO queues. Embedders construct it once around a host
//! filesystem, spawn an AppIO thread per core they use, and register FS
//! clients against it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::appio::{self, AppIoMessage, APPIO_QUEUE_CAPACITY};
use crate::fsa::device::FsaDevice;
use crate::fsa::host::HostFs;
use crate::fsa::FSA_DEVICE_NAME;
use crate::ios::buffer::{IosCommand, IosOpenMode, IosPayload};
use crate::ios::device::DeviceRegistry;
use crate::ios::dispatcher::Kernel;
use crate::ios::driver::IpcDriver;
use crate::ios::error::{IosHandle, IosReply};
use crate::sync::MessageQueue;

/// Number of emulated cores, each with its own IPC driver and AppIO queue.
pub const CORE_COUNT: usize = 3;

pub struct Runtime {
    drivers: Vec<IpcDriver>,
    kernel: Arc<Kernel>,
    appio_queues: Vec<Arc<MessageQueue<AppIoMessage>>>,
}

impl Runtime {
    /// Build a runtime around `host`, register the FSA device, and open
    /// every core's IPC driver.
    pub fn new(host: Arc<dyn HostFs>) -> Arc<Runtime> {
        let mut registry = DeviceRegistry::new();
        registry.register(FSA_DEVICE_NAME, move || {
            Box::new(FsaDevice::new(host.clone()))
        });
        let kernel = Arc::new(Kernel::new(registry));

        let drivers: Vec<IpcDriver> = (0..CORE_COUNT)
            .map(|core| {
                let driver = IpcDriver::new(core as u32, kernel.clone());
                driver.init().expect("fresh driver failed to init");
                driver.open().expect("fresh driver failed to open");
                driver
            })
            .collect();

        let appio_queues = (0..CORE_COUNT)
            .map(|_| Arc::new(MessageQueue::new(APPIO_QUEUE_CAPACITY)))
            .collect();

        log::debug!("runtime: {CORE_COUNT} cores up");
        Arc::new(Runtime {
            drivers,
            kernel,
            appio_queues,
        })
    }

    pub fn driver(&self, core: u32) -> &IpcDriver {
        &self.drivers[core as usize]
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn appio_queue(&self, core: u32) -> &Arc<MessageQueue<AppIoMessage>> {
        &self.appio_queues[core as usize]
    }

    /// Spawn the AppIO handler thread for `core`. Stop it with
    /// [`Runtime::shutdown_appio`].
    pub fn spawn_appio_thread(self: &Arc<Self>, core: u32) -> JoinHandle<()> {
        let queue = self.appio_queue(core).clone();
        std::thread::Builder::new()
            .name(format!("appio-{core}"))
            .spawn(move || appio::run(&queue))
            .expect("could not spawn AppIO thread")
    }

    /// Post a shutdown message to every core's AppIO queue.
    pub fn shutdown_appio(&self) {
        for queue in &self.appio_queues {
            // Best effort: a full queue still drains to the shutdown.
            let _ = queue.send(AppIoMessage::Shutdown);
        }
    }

    /// Synchronous device open over `core`'s driver. Returns the handle
    /// (non-negative) or a negative error.
    pub fn ios_open(&self, core: u32, name: &str, mode: IosOpenMode) -> IosReply {
        let driver = self.driver(core);
        let request = driver.allocate_request(-1, IosCommand::Open, 0, None);
        driver.with_buffer(request, |buffer| {
            let mut bytes = name.as_bytes().to_vec();
            bytes.push(0);
            buffer.header.args[1] = bytes.len() as u32;
            buffer.header.args[2] = mode.into();
            buffer.buffer1 = IosPayload::Bytes(bytes);
        });
        driver.submit_request(request);
        driver.wait_response(request)
    }

    /// Synchronous device close over `core`'s driver.
    pub fn ios_close(&self, core: u32, handle: IosHandle) -> IosReply {
        let driver = self.driver(core);
        let request = driver.allocate_request(handle, IosCommand::Close, 0, None);
        driver.submit_request(request);
        driver.wait_response(request)
    }
}
