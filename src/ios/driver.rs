//! Per-core IPC driver.
//!
//! Each emulated core owns one driver: a fixed pool of IPC buffers and
//! request slots, a free-list FIFO, an outbound FIFO, and the events used
//! to block callers. A request is either seeded in the free FIFO
//! (`allocated == false`) or owned by exactly one caller; never both,
//! never neither.
//!
//! The driver hands submitted buffers to the kernel dispatcher and takes
//! them back through [`IpcDriver::process_responses`], which either wakes
//! the synchronous waiter or runs the request's asynchronous callback.
//! Responses are processed strictly in delivery order.
//!
//! Driver state lives behind an internal mutex; the lock is never held
//! across a blocking wait, and the kernel dispatch itself runs unlocked so
//! a device callback can re-enter the driver's allocation path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::ios::buffer::{IosCommand, IpcBuffer, IPC_BUFFER_COUNT};
use crate::ios::dispatcher::Kernel;
use crate::ios::error::{IosError, IosHandle, IosReply};
use crate::ios::fifo::RequestFifo;
use crate::sync::{EventMode, OsEvent};

/// Callback invoked with the reply word when an asynchronous request
/// completes.
pub type IosAsyncCallback = Box<dyn FnOnce(IosReply) + Send>;

/// Lifecycle state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcDriverStatus {
    Uninit,
    Initialised,
    Open,
    Closed,
}

/// Index of a request slot handed out by [`IpcDriver::allocate_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(usize);

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcDriverStats {
    pub requests_submitted: u64,
    pub requests_processed: u64,
    pub failed_allocate_request_block: u64,
    pub failed_free_request_block: u64,
}

struct IpcRequest {
    /// `Some` while the driver owns the buffer; taken for the duration of
    /// kernel dispatch.
    buffer: Option<IpcBuffer>,
    finish_event: Arc<OsEvent>,
    async_callback: Option<IosAsyncCallback>,
    aux: u32,
    allocated: bool,
}

struct IpcResponse {
    index: usize,
    buffer: IpcBuffer,
}

struct DriverState {
    status: IpcDriverStatus,
    requests: Vec<IpcRequest>,
    free_fifo: RequestFifo,
    outbound_fifo: RequestFifo,
    responses: VecDeque<IpcResponse>,
    waiting_free_fifo: bool,
    stats: IpcDriverStats,
}

/// One core's IPC driver.
pub struct IpcDriver {
    core_id: u32,
    kernel: Arc<Kernel>,
    /// Signalled to all waiters whenever a request returns to the free list
    /// through the synchronous wait path.
    wait_free_event: OsEvent,
    state: Mutex<DriverState>,
}

impl IpcDriver {
    pub fn new(core_id: u32, kernel: Arc<Kernel>) -> Self {
        IpcDriver {
            core_id,
            kernel,
            wait_free_event: OsEvent::new(false, EventMode::AutoReset),
            state: Mutex::new(DriverState {
                status: IpcDriverStatus::Uninit,
                requests: Vec::new(),
                free_fifo: RequestFifo::new(IPC_BUFFER_COUNT),
                outbound_fifo: RequestFifo::new(IPC_BUFFER_COUNT),
                responses: VecDeque::new(),
                waiting_free_fifo: false,
                stats: IpcDriverStats::default(),
            }),
        }
    }

    pub fn core_id(&self) -> u32 {
        self.core_id
    }

    /// One-time preparation; may be re-invoked after `close`, but not while
    /// the driver is open.
    pub fn init(&self) -> Result<(), IosError> {
        let mut state = self.state.lock().unwrap();
        if state.status == IpcDriverStatus::Open {
            return Err(IosError::NotReady);
        }
        state.status = IpcDriverStatus::Initialised;
        Ok(())
    }

    /// Open the driver: link every request slot to a fresh buffer, clear
    /// async fields, and seed all slots into the free FIFO.
    pub fn open(&self) -> Result<(), IosError> {
        let mut state = self.state.lock().unwrap();

        if state.status != IpcDriverStatus::Closed && state.status != IpcDriverStatus::Initialised {
            return Err(IosError::NotReady);
        }

        state.requests.clear();
        for _ in 0..IPC_BUFFER_COUNT {
            state.requests.push(IpcRequest {
                buffer: Some(IpcBuffer::default()),
                finish_event: Arc::new(OsEvent::new(false, EventMode::AutoReset)),
                async_callback: None,
                aux: 0,
                allocated: false,
            });
        }

        state.free_fifo.clear();
        state.outbound_fifo.clear();
        for index in 0..IPC_BUFFER_COUNT {
            state.free_fifo.push(index).expect("free FIFO seeded past capacity");
        }

        state.status = IpcDriverStatus::Open;
        log::debug!("ipc: driver {} open", self.core_id);
        Ok(())
    }

    /// Close the driver. Requests still allocated stay allocated until
    /// their replies arrive and are freed then.
    pub fn close(&self) {
        self.state.lock().unwrap().status = IpcDriverStatus::Closed;
        log::debug!("ipc: driver {} closed", self.core_id);
    }

    pub fn status(&self) -> IpcDriverStatus {
        self.state.lock().unwrap().status
    }

    pub fn stats(&self) -> IpcDriverStats {
        self.state.lock().unwrap().stats
    }

    /// True if a caller has blocked on the free list since the last open
    /// (diagnostic).
    pub fn waiting_free_fifo(&self) -> bool {
        self.state.lock().unwrap().waiting_free_fifo
    }

    /// Allocate a request slot and stamp its buffer for `command` on
    /// `handle`.
    ///
    /// Blocks on the free-list event while every slot is in flight,
    /// retrying after each wakeup. Every failed pop is counted.
    pub fn allocate_request(
        &self,
        handle: IosHandle,
        command: IosCommand,
        aux: u32,
        async_callback: Option<IosAsyncCallback>,
    ) -> RequestId {
        let mut async_callback = async_callback;

        loop {
            let mut state = self.state.lock().unwrap();
            match state.free_fifo.pop() {
                Ok(index) => {
                    let request = &mut state.requests[index];
                    request.allocated = true;
                    request.aux = aux;
                    request.async_callback = async_callback.take();

                    let buffer = request.buffer.as_mut().expect("free request lost its buffer");
                    buffer.header.args = [0; 8];
                    buffer.header.command = command.into();
                    buffer.header.handle = handle;
                    buffer.header.flags = 0;
                    buffer.header.process_id = 0;
                    buffer.header.reply = 0;
                    buffer.buffer1 = Default::default();
                    buffer.buffer2 = Default::default();

                    return RequestId(index);
                }
                Err(_) => {
                    state.stats.failed_allocate_request_block += 1;
                    state.waiting_free_fifo = true;
                    drop(state);
                    self.wait_free_event.wait();
                }
            }
        }
    }

    /// Mutate the buffer of an allocated request before submission.
    pub fn with_buffer<R>(&self, request: RequestId, f: impl FnOnce(&mut IpcBuffer) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        let slot = &mut state.requests[request.0];
        assert!(slot.allocated, "with_buffer on a free request");
        f(slot.buffer.as_mut().expect("request buffer is in flight"))
    }

    /// Submit a request to the kernel dispatcher. Non-blocking: the
    /// dispatch itself runs before return, and the resulting reply is
    /// processed through the response path.
    pub fn submit_request(&self, request: RequestId) {
        {
            let mut state = self.state.lock().unwrap();
            let slot = &mut state.requests[request.0];
            assert!(slot.allocated, "submit of a free request");
            // Fresh unsignalled auto-reset state for this transaction.
            slot.finish_event = Arc::new(OsEvent::new(false, EventMode::AutoReset));
            state.stats.requests_submitted += 1;
            state
                .outbound_fifo
                .push(request.0)
                .expect("outbound FIFO overflow");
        }

        self.process_outbound();
    }

    /// Drain the outbound FIFO through the kernel dispatcher, preserving
    /// submission order, then process the delivered responses.
    fn process_outbound(&self) {
        loop {
            let (index, mut buffer) = {
                let mut state = self.state.lock().unwrap();
                match state.outbound_fifo.pop() {
                    Err(_) => break,
                    Ok(index) => {
                        let buffer = state.requests[index]
                            .buffer
                            .take()
                            .expect("outbound request without a buffer");
                        (index, buffer)
                    }
                }
            };

            // Kernel owns the buffer until the reply is written.
            self.kernel.dispatch(&mut buffer);

            self.state
                .lock()
                .unwrap()
                .responses
                .push_back(IpcResponse { index, buffer });

            self.process_responses();
        }
    }

    /// Process buffered responses in delivery order.
    ///
    /// For each response the owning request is resolved by buffer identity,
    /// verified, and completed: the synchronous path signals the finish
    /// event, the asynchronous path runs the callback with the reply word
    /// and then frees the request.
    pub fn process_responses(&self) {
        loop {
            let mut state = self.state.lock().unwrap();
            let Some(response) = state.responses.pop_front() else {
                break;
            };

            let index = response.index;
            assert!(index < state.requests.len(), "response for unknown buffer");
            state.stats.requests_processed += 1;

            debug_assert_eq!(
                response.buffer.header.command,
                u32::from(IosCommand::Reply),
                "kernel delivered a non-reply buffer"
            );

            let request = &mut state.requests[index];
            assert!(
                request.allocated && request.buffer.is_none(),
                "response does not match an in-flight request"
            );

            let reply = response.buffer.header.reply;
            request.buffer = Some(response.buffer);

            match request.async_callback.take() {
                None => {
                    let finish_event = request.finish_event.clone();
                    drop(state);
                    finish_event.signal();
                }
                Some(callback) => {
                    drop(state);
                    callback(reply);
                    let mut state = self.state.lock().unwrap();
                    self.free_request_locked(&mut state, index);
                }
            }
        }
    }

    /// Block until the reply for `request` arrives, then free the slot and
    /// wake any thread stuck in allocation.
    ///
    /// Returns the reply word unchanged; for an Open request that is the
    /// device handle.
    pub fn wait_response(&self, request: RequestId) -> IosReply {
        let finish_event = {
            let state = self.state.lock().unwrap();
            state.requests[request.0].finish_event.clone()
        };

        finish_event.wait();

        let reply = {
            let mut state = self.state.lock().unwrap();
            let slot = &state.requests[request.0];
            let reply = slot
                .buffer
                .as_ref()
                .expect("finished request without a buffer")
                .header
                .reply;
            self.free_request_locked(&mut state, request.0);
            reply
        };

        self.wait_free_event.signal_all();
        reply
    }

    /// Return a request slot to the free list.
    fn free_request_locked(&self, state: &mut DriverState, index: usize) {
        assert!(state.requests[index].allocated, "double free of IPC request");
        state.requests[index].allocated = false;
        if state.free_fifo.push(index).is_err() {
            // Capacity equals the slot count, so this cannot happen unless
            // the allocated bookkeeping is broken.
            state.stats.failed_free_request_block += 1;
            log::error!("ipc: driver {} failed to free request {index}", self.core_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ios::buffer::IosPayload;
    use crate::ios::device::DeviceRegistry;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingDevice;

    impl crate::ios::device::IosDevice for CountingDevice {
        fn open(&mut self, _mode: crate::ios::buffer::IosOpenMode) -> IosReply {
            0
        }
        fn close(&mut self) -> IosReply {
            0
        }
        fn ioctl(&mut self, request: u32, _input: &IosPayload, _output: &mut IosPayload) -> IosReply {
            request as IosReply + 100
        }
        fn ioctlv(&mut self, _request: u32, _vec_in: u32, _vec_out: u32, _vecs: &IosPayload) -> IosReply {
            0
        }
        fn set_handle(&mut self, _handle: IosHandle) {}
    }

    fn driver() -> IpcDriver {
        let mut registry = DeviceRegistry::new();
        registry.register("/dev/count", || Box::new(CountingDevice));
        let driver = IpcDriver::new(0, Arc::new(Kernel::new(registry)));
        driver.init().unwrap();
        driver.open().unwrap();
        driver
    }

    fn open_device(driver: &IpcDriver) -> IosHandle {
        let request = driver.allocate_request(-1, IosCommand::Open, 0, None);
        driver.with_buffer(request, |buffer| {
            let bytes = b"/dev/count\0".to_vec();
            buffer.header.args[1] = bytes.len() as u32;
            buffer.buffer1 = IosPayload::Bytes(bytes);
        });
        driver.submit_request(request);
        driver.wait_response(request)
    }

    #[test]
    fn open_requires_valid_state() {
        let mut registry = DeviceRegistry::new();
        registry.register("/dev/count", || Box::new(CountingDevice));
        let driver = IpcDriver::new(0, Arc::new(Kernel::new(registry)));

        // Uninitialised driver cannot open.
        assert_eq!(driver.open(), Err(IosError::NotReady));

        driver.init().unwrap();
        driver.open().unwrap();
        assert_eq!(driver.status(), IpcDriverStatus::Open);

        // Open driver cannot re-init or re-open.
        assert_eq!(driver.init(), Err(IosError::NotReady));
        assert_eq!(driver.open(), Err(IosError::NotReady));

        driver.close();
        driver.open().unwrap();
    }

    #[test]
    fn sync_round_trip() {
        let driver = driver();
        let handle = open_device(&driver);
        assert!(handle > 0);

        let request = driver.allocate_request(handle, IosCommand::Ioctl, 0, None);
        driver.with_buffer(request, |buffer| buffer.header.args[0] = 7);
        driver.submit_request(request);
        assert_eq!(driver.wait_response(request), 107);

        let stats = driver.stats();
        assert_eq!(stats.requests_submitted, 2);
        assert_eq!(stats.requests_processed, 2);
        assert_eq!(stats.failed_free_request_block, 0);
    }

    #[test]
    fn async_callback_receives_reply_and_slot_is_freed() {
        let driver = driver();
        let handle = open_device(&driver);

        let seen = Arc::new(AtomicU32::new(0));
        let callback = {
            let seen = seen.clone();
            Box::new(move |reply: IosReply| {
                seen.store(reply as u32, Ordering::SeqCst);
            })
        };

        let request = driver.allocate_request(handle, IosCommand::Ioctl, 0, Some(callback));
        driver.with_buffer(request, |buffer| buffer.header.args[0] = 1);
        driver.submit_request(request);

        // Dispatch is inline, so the callback has already run and the slot
        // is back on the free list.
        assert_eq!(seen.load(Ordering::SeqCst), 101);
        let state = driver.state.lock().unwrap();
        assert_eq!(state.free_fifo.count(), IPC_BUFFER_COUNT);
    }

    #[test]
    fn every_request_is_free_or_owned() {
        let driver = driver();
        let handle = open_device(&driver);

        let requests: Vec<_> = (0..4)
            .map(|_| driver.allocate_request(handle, IosCommand::Ioctl, 0, None))
            .collect();

        {
            let state = driver.state.lock().unwrap();
            let allocated = state.requests.iter().filter(|r| r.allocated).count();
            assert_eq!(allocated, 4);
            assert_eq!(state.free_fifo.count(), IPC_BUFFER_COUNT - 4);
        }

        for request in requests {
            driver.submit_request(request);
            driver.wait_response(request);
        }

        let state = driver.state.lock().unwrap();
        assert_eq!(state.requests.iter().filter(|r| r.allocated).count(), 0);
        assert_eq!(state.free_fifo.count(), IPC_BUFFER_COUNT);
    }

    #[test]
    fn allocation_blocks_until_a_slot_frees() {
        let driver = Arc::new(driver());
        let handle = open_device(&driver);

        // Exhaust the pool.
        let held: Vec<_> = (0..IPC_BUFFER_COUNT)
            .map(|_| driver.allocate_request(handle, IosCommand::Ioctl, 0, None))
            .collect();

        let blocked = {
            let driver = driver.clone();
            std::thread::spawn(move || {
                let request = driver.allocate_request(handle, IosCommand::Ioctl, 0, None);
                driver.submit_request(request);
                driver.wait_response(request)
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!blocked.is_finished());

        // Complete one held request; its wait path signals the free event.
        let first = held[0];
        driver.submit_request(first);
        driver.wait_response(first);

        assert_eq!(blocked.join().unwrap(), 101);
        assert!(driver.stats().failed_allocate_request_block >= 1);
    }
}
