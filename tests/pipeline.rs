//! End-to-end pipeline scenarios: guest thread → IPC driver → kernel
//! dispatcher → FSA device → host filesystem, and back through the AppIO
//! pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cafe_ios::appio;
use cafe_ios::fs::{
    cancel_command, cmd, FsAsyncData, FsClient, FsCmdBlock, FsCmdBlockStatus, FsErrorFlag,
    FsMessage, FsStatus, VolumeState,
};
use cafe_ios::fsa::host::HostFs;
use cafe_ios::fsa::status::{FsaResult, FsaStatus};
use cafe_ios::fsa::types::{DataBuffer, FsDirEntry, FsOpenMode, FsStat, FsaVolumeInfo};
use cafe_ios::sync::MessageQueue;
use cafe_ios::{RamFs, Runtime};

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    runtime: Arc<Runtime>,
    pumps: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Runtime with an AppIO pump thread on core 0.
    fn new(host: Arc<dyn HostFs>) -> Harness {
        let runtime = Runtime::new(host);
        let pumps = vec![runtime.spawn_appio_thread(0)];
        Harness { runtime, pumps }
    }

    fn client(&self) -> FsClient {
        FsClient::register(&self.runtime, 0).expect("client registration failed")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.runtime.shutdown_appio();
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Host wrapper that fails `make_dir` with scripted statuses before
/// delegating to the wrapped filesystem.
struct FaultFs {
    inner: RamFs,
    make_dir_faults: Mutex<Vec<FsaStatus>>,
}

impl FaultFs {
    fn new() -> Self {
        FaultFs {
            inner: RamFs::new(),
            make_dir_faults: Mutex::new(Vec::new()),
        }
    }

    fn inject_make_dir(&self, status: FsaStatus) {
        self.make_dir_faults.lock().unwrap().push(status);
    }
}

impl HostFs for FaultFs {
    fn mount(&self, source: &str, target: &str) -> FsaResult<()> {
        self.inner.mount(source, target)
    }
    fn unmount(&self, target: &str) -> FsaResult<()> {
        self.inner.unmount(target)
    }
    fn open_file(&self, path: &str, mode: FsOpenMode) -> FsaResult<u32> {
        self.inner.open_file(path, mode)
    }
    fn close_file(&self, file: u32) -> FsaResult<()> {
        self.inner.close_file(file)
    }
    fn read_file(&self, file: u32, buf: &mut [u8], pos: Option<u32>) -> FsaResult<u32> {
        self.inner.read_file(file, buf, pos)
    }
    fn write_file(&self, file: u32, data: &[u8], pos: Option<u32>) -> FsaResult<u32> {
        self.inner.write_file(file, data, pos)
    }
    fn get_pos(&self, file: u32) -> FsaResult<u32> {
        self.inner.get_pos(file)
    }
    fn set_pos(&self, file: u32, pos: u32) -> FsaResult<()> {
        self.inner.set_pos(file, pos)
    }
    fn is_eof(&self, file: u32) -> FsaResult<bool> {
        self.inner.is_eof(file)
    }
    fn stat_file(&self, file: u32) -> FsaResult<FsStat> {
        self.inner.stat_file(file)
    }
    fn flush_file(&self, file: u32) -> FsaResult<()> {
        self.inner.flush_file(file)
    }
    fn truncate_file(&self, file: u32) -> FsaResult<()> {
        self.inner.truncate_file(file)
    }
    fn append_file(&self, file: u32, size: u32, count: u32) -> FsaResult<u32> {
        self.inner.append_file(file, size, count)
    }
    fn get_file_block_address(&self, file: u32) -> FsaResult<u32> {
        self.inner.get_file_block_address(file)
    }
    fn open_dir(&self, path: &str) -> FsaResult<u32> {
        self.inner.open_dir(path)
    }
    fn read_dir(&self, dir: u32) -> FsaResult<FsDirEntry> {
        self.inner.read_dir(dir)
    }
    fn rewind_dir(&self, dir: u32) -> FsaResult<()> {
        self.inner.rewind_dir(dir)
    }
    fn close_dir(&self, dir: u32) -> FsaResult<()> {
        self.inner.close_dir(dir)
    }
    fn make_dir(&self, path: &str, mode: u32) -> FsaResult<()> {
        if let Some(status) = self.make_dir_faults.lock().unwrap().pop() {
            return Err(status);
        }
        self.inner.make_dir(path, mode)
    }
    fn remove(&self, path: &str) -> FsaResult<()> {
        self.inner.remove(path)
    }
    fn rename(&self, old_path: &str, new_path: &str) -> FsaResult<()> {
        self.inner.rename(old_path, new_path)
    }
    fn change_mode(&self, path: &str, mode: u32) -> FsaResult<()> {
        self.inner.change_mode(path, mode)
    }
    fn stat_path(&self, path: &str) -> FsaResult<FsStat> {
        self.inner.stat_path(path)
    }
    fn volume_info(&self) -> FsaResult<FsaVolumeInfo> {
        self.inner.volume_info()
    }
}

fn populate_file(client: &FsClient, path: &str, contents: &[u8]) {
    let block = FsCmdBlock::new();
    let handle = cmd::open_file(client, &block, path, "w").unwrap();
    if !contents.is_empty() {
        let data = DataBuffer::from_vec(contents.to_vec());
        let written =
            cmd::write_file(client, &block, &data, contents.len() as u32, 1, handle).unwrap();
        assert_eq!(written as usize, contents.len());
    }
    cmd::close_file(client, &block, handle).unwrap();
}

// ── Registration & handles ───────────────────────────────────────────────────

#[test]
fn client_registration_handles_never_reused() {
    let harness = Harness::new(Arc::new(RamFs::new()));

    let first = harness.client();
    let second = harness.client();
    assert!(first.is_registered());
    assert!(second.is_registered());

    first.unregister();
    assert!(!first.is_registered());

    // The replacement client gets a fresh transport handle, never a
    // recycled one; open a file to prove the new handle routes.
    let third = harness.client();
    let block = FsCmdBlock::new();
    let handle = cmd::open_file(&third, &block, "/probe", "w").unwrap();
    cmd::close_file(&third, &block, handle).unwrap();
}

// ── File lifecycle over the full pipeline ────────────────────────────────────

#[test]
fn file_lifecycle() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    cmd::mount(&client, &block, "/dev/ram01", "/vol").unwrap();
    cmd::make_dir(&client, &block, "/data", 0o755).unwrap();

    let handle = cmd::open_file(&client, &block, "/data/save.bin", "w+").unwrap();
    let payload = DataBuffer::from_vec((0u8..64).collect());
    assert_eq!(cmd::write_file(&client, &block, &payload, 64, 1, handle).unwrap(), 64);
    assert_eq!(cmd::get_pos_file(&client, &block, handle).unwrap(), 64);
    assert!(cmd::is_eof(&client, &block, handle).unwrap());

    cmd::set_pos_file(&client, &block, handle, 0).unwrap();
    assert!(!cmd::is_eof(&client, &block, handle).unwrap());

    let readback = DataBuffer::with_len(64);
    assert_eq!(cmd::read_file(&client, &block, &readback, 64, 1, handle).unwrap(), 1);
    assert_eq!(readback.snapshot(), (0u8..64).collect::<Vec<u8>>());

    let stat = cmd::stat_file(&client, &block, handle).unwrap();
    assert_eq!(stat.size, 64);
    assert!(!stat.is_directory());

    assert!(cmd::get_file_block_address(&client, &block, handle).unwrap() > 0);

    cmd::set_pos_file(&client, &block, handle, 32).unwrap();
    cmd::truncate_file(&client, &block, handle).unwrap();
    assert_eq!(cmd::stat_file(&client, &block, handle).unwrap().size, 32);

    assert_eq!(cmd::append_file(&client, &block, handle, 8, 2).unwrap(), 2);
    assert_eq!(cmd::stat_file(&client, &block, handle).unwrap().size, 48);

    cmd::flush_file(&client, &block, handle).unwrap();
    cmd::close_file(&client, &block, handle).unwrap();

    cmd::rename(&client, &block, "/data/save.bin", "/data/save2.bin").unwrap();
    assert_eq!(
        cmd::open_file(&client, &block, "/data/save.bin", "r"),
        Err(FsStatus::NotFound.code())
    );

    let info = cmd::get_volume_info(&client, &block).unwrap();
    assert_eq!(info.volume_label, "ram");

    cmd::unmount(&client, &block, "/vol").unwrap();
}

#[test]
fn directory_iteration_and_cwd() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    cmd::make_dir(&client, &block, "/work", 0o755).unwrap();
    cmd::make_dir(&client, &block, "/work/sub", 0o755).unwrap();
    populate_file(&client, "/work/a.bin", b"a");
    populate_file(&client, "/work/b.bin", b"bb");

    assert_eq!(cmd::get_cwd(&client, &block).unwrap(), "/");
    cmd::change_dir(&client, &block, "/work").unwrap();
    assert_eq!(cmd::get_cwd(&client, &block).unwrap(), "/work");

    // Relative paths resolve against the new cwd.
    let dir = cmd::open_dir(&client, &block, "/work").unwrap();
    let mut names = Vec::new();
    while let Some(entry) = cmd::read_dir(&client, &block, dir).unwrap() {
        names.push(entry.name);
    }
    assert_eq!(names, ["a.bin", "b.bin", "sub"]);

    cmd::rewind_dir(&client, &block, dir).unwrap();
    assert_eq!(
        cmd::read_dir(&client, &block, dir).unwrap().unwrap().name,
        "a.bin"
    );
    cmd::close_dir(&client, &block, dir).unwrap();

    assert_eq!(
        cmd::change_dir(&client, &block, "/work/a.bin"),
        Err(FsStatus::NotDirectory.code())
    );
}

// ── Chunked reads ────────────────────────────────────────────────────────────

#[test]
fn chunked_read_splits_at_256k() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    // 300 KiB of patterned data.
    let total = 300 * 1024usize;
    let contents: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    populate_file(&client, "/big.bin", &contents);

    let handle = cmd::open_file(&client, &block, "/big.bin", "r").unwrap();
    let dest = DataBuffer::with_len(total);

    let submitted_before = harness.runtime.driver(0).stats().requests_submitted;
    let requeues_before = client.requeue_count();

    // chunk_size 4096, count 75 → 300 KiB total: one 256 KiB IPC round
    // trip plus one 44 KiB round trip, reported as 75 chunks.
    let chunks = cmd::read_file(&client, &block, &dest, 4096, 75, handle).unwrap();
    assert_eq!(chunks, 75);
    assert_eq!(dest.snapshot(), contents);

    assert_eq!(
        harness.runtime.driver(0).stats().requests_submitted - submitted_before,
        2
    );
    assert_eq!(client.requeue_count() - requeues_before, 1);

    cmd::close_file(&client, &block, handle).unwrap();
}

#[test]
fn short_read_reports_whole_chunks() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    // 100 KiB on disk, 300 KiB requested: the first 256 KiB round trip
    // comes up short and ends the read at ⌊100 KiB / 4 KiB⌋ chunks.
    let on_disk = 100 * 1024usize;
    populate_file(&client, "/short.bin", &vec![7u8; on_disk]);

    let handle = cmd::open_file(&client, &block, "/short.bin", "r").unwrap();
    let dest = DataBuffer::with_len(300 * 1024);
    let chunks = cmd::read_file(&client, &block, &dest, 4096, 75, handle).unwrap();
    assert_eq!(chunks, 25);
    assert_eq!(&dest.snapshot()[..on_disk], vec![7u8; on_disk].as_slice());

    cmd::close_file(&client, &block, handle).unwrap();
}

#[test]
fn positioned_read_advances_through_chunks() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    let total = 300 * 1024usize;
    let contents: Vec<u8> = (0..total).map(|i| (i / 1024) as u8).collect();
    populate_file(&client, "/pos.bin", &contents);

    // 280 KiB from offset 10 KiB: two round trips, both positioned.
    let handle = cmd::open_file(&client, &block, "/pos.bin", "r").unwrap();
    let want = 280 * 1024usize;
    let dest = DataBuffer::with_len(want);
    let chunks =
        cmd::read_file_with_pos(&client, &block, &dest, 1024, 280, 10 * 1024, handle).unwrap();
    assert_eq!(chunks, 280);
    assert_eq!(dest.snapshot(), contents[10 * 1024..10 * 1024 + want]);

    cmd::close_file(&client, &block, handle).unwrap();
}

// ── Busy retry ───────────────────────────────────────────────────────────────

#[test]
fn busy_requeues_once_then_succeeds() {
    let host = Arc::new(FaultFs::new());
    let harness = Harness::new(host.clone());
    let client = harness.client();
    let block = FsCmdBlock::new();

    host.inject_make_dir(FsaStatus::Busy);
    let requeues_before = client.requeue_count();

    cmd::make_dir(&client, &block, "/retried", 0o755).unwrap();

    assert_eq!(client.requeue_count() - requeues_before, 1);
    // The directory exists exactly once and the client is healthy.
    assert_eq!(
        cmd::make_dir(&client, &block, "/retried", 0o755),
        Err(FsStatus::Exists.code())
    );
    assert_eq!(client.volume_state(), VolumeState::Initial);
}

// ── Media statuses & the volume-state machine ────────────────────────────────

#[test]
fn media_not_ready_sets_wrong_media_without_callback() {
    let host = Arc::new(FaultFs::new());
    let harness = Harness::new(host.clone());
    let client = harness.client();
    let block = FsCmdBlock::new();

    host.inject_make_dir(FsaStatus::MediaNotReady);

    let invoked = Arc::new(AtomicBool::new(false));
    let async_data = FsAsyncData {
        callback: Some({
            let invoked = invoked.clone();
            Arc::new(move |_result| {
                invoked.store(true, Ordering::SeqCst);
            })
        }),
        queue: None,
    };
    cmd::make_dir_async(
        &client,
        &block,
        "/media",
        0o755,
        FsErrorFlag::empty(),
        &async_data,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        client.volume_state() == VolumeState::WrongMedia
    }));
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(client.last_error(), FsaStatus::MediaNotReady.code());
}

#[test]
fn storage_full_delivered_when_unmasked() {
    let harness = Harness::new(Arc::new(RamFs::with_capacity(8)));
    let client = harness.client();
    let block = FsCmdBlock::new();

    let handle = cmd::open_file(&client, &block, "/f", "w").unwrap();
    let data = DataBuffer::from_vec(vec![1u8; 16]);
    assert_eq!(
        cmd::write_file(&client, &block, &data, 16, 1, handle),
        Err(FsStatus::StorageFull.code())
    );
    // Unmasked delivery leaves the state machine alone.
    assert_eq!(client.volume_state(), VolumeState::Initial);
}

#[test]
fn storage_full_masked_goes_fatal_without_delivery() {
    let harness = Harness::new(Arc::new(RamFs::with_capacity(8)));
    let client = harness.client();
    let block = FsCmdBlock::new();

    let handle = cmd::open_file(&client, &block, "/f", "w").unwrap();

    let results: Arc<MessageQueue<FsMessage>> = Arc::new(MessageQueue::new(4));
    let async_data = FsAsyncData {
        callback: None,
        queue: Some(results.clone()),
    };
    let data = DataBuffer::from_vec(vec![1u8; 16]);
    cmd::write_file_async(
        &client,
        &block,
        &data,
        16,
        1,
        handle,
        FsErrorFlag::STORAGE_FULL,
        &async_data,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        client.volume_state() == VolumeState::Fatal
    }));
    // The result never reaches the user's queue.
    std::thread::sleep(Duration::from_millis(50));
    assert!(results.try_recv().is_err());
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[test]
fn cancel_queued_command_before_submission() {
    let host = Arc::new(FaultFs::new());
    let harness = Harness::new(host.clone());
    let client = harness.client();

    // Stall the queue: the in-flight command's MediaNotReady reply never
    // finishes it, so everything behind it stays queued.
    let stall_block = FsCmdBlock::new();
    host.inject_make_dir(FsaStatus::MediaNotReady);
    let stall_data = FsAsyncData {
        callback: Some(Arc::new(|_| {})),
        queue: None,
    };
    cmd::make_dir_async(
        &client,
        &stall_block,
        "/stall",
        0o755,
        FsErrorFlag::empty(),
        &stall_data,
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        client.volume_state() == VolumeState::WrongMedia
    }));

    // Queue a second command behind the stalled one and cancel it.
    let cancelled_results: Arc<MessageQueue<FsMessage>> = Arc::new(MessageQueue::new(1));
    let cancelled_block = FsCmdBlock::new();
    cmd::make_dir_async(
        &client,
        &cancelled_block,
        "/never",
        0o755,
        FsErrorFlag::empty(),
        &FsAsyncData {
            callback: None,
            queue: Some(cancelled_results.clone()),
        },
    )
    .unwrap();
    assert_eq!(client.queued_commands(), 1);

    cancel_command(&client, &cancelled_block);

    let result = cancelled_results.recv().unwrap();
    assert_eq!(result.status, FsStatus::Cancelled.code());
    assert_eq!(client.queued_commands(), 0);
    // The cancelled command never reached the device.
    assert!(host.inner.stat_path("/never").is_err());
}

#[test]
fn completion_after_unregister_is_cancelled() {
    // No pump thread: the completion sits in the AppIO queue until this
    // test processes it by hand, after unregistering the client.
    let runtime = Runtime::new(Arc::new(RamFs::new()));
    let client = FsClient::register(&runtime, 0).unwrap();
    let block = FsCmdBlock::new();

    let results: Arc<MessageQueue<FsMessage>> = Arc::new(MessageQueue::new(1));
    cmd::make_dir_async(
        &client,
        &block,
        "/late",
        0o755,
        FsErrorFlag::empty(),
        &FsAsyncData {
            callback: None,
            queue: Some(results.clone()),
        },
    )
    .unwrap();

    client.unregister();
    assert!(appio::process_one(runtime.appio_queue(0)));

    let result = results.recv().unwrap();
    assert_eq!(result.status, FsStatus::Cancelled.code());
}

// ── Prepare validation & block reuse ─────────────────────────────────────────

#[test]
fn callback_and_queue_together_is_fatal() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    let results: Arc<MessageQueue<FsMessage>> = Arc::new(MessageQueue::new(1));
    let async_data = FsAsyncData {
        callback: Some(Arc::new(|_| {})),
        queue: Some(results.clone()),
    };

    assert_eq!(
        cmd::make_dir_async(&client, &block, "/x", 0o755, FsErrorFlag::empty(), &async_data),
        Err(FsStatus::FatalError.code())
    );
    assert!(results.try_recv().is_err());
    // The block was never enqueued and stays reusable.
    assert_eq!(block.status(), FsCmdBlockStatus::Initialised);
    cmd::make_dir(&client, &block, "/x", 0o755).unwrap();
}

#[test]
fn block_is_reusable_after_completion() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    cmd::make_dir(&client, &block, "/one", 0o755).unwrap();
    assert_eq!(block.status(), FsCmdBlockStatus::Cancelled);
    cmd::make_dir(&client, &block, "/two", 0o755).unwrap();
    cmd::make_dir(&client, &block, "/three", 0o755).unwrap();
}

// ── Concurrency across clients ───────────────────────────────────────────────

#[test]
fn two_cores_run_independent_clients() {
    let host = Arc::new(RamFs::new());
    let runtime = Runtime::new(host);
    let pump0 = runtime.spawn_appio_thread(0);
    let pump1 = runtime.spawn_appio_thread(1);

    let mut workers = Vec::new();
    for core in [0u32, 1u32] {
        let runtime = runtime.clone();
        workers.push(std::thread::spawn(move || {
            let client = FsClient::register(&runtime, core).unwrap();
            let block = FsCmdBlock::new();
            let dir = format!("/core{core}");
            cmd::make_dir(&client, &block, &dir, 0o755).unwrap();

            for round in 0..20 {
                let path = format!("{dir}/f{round}");
                let handle = cmd::open_file(&client, &block, &path, "w+").unwrap();
                let data = DataBuffer::from_vec(vec![core as u8; 128]);
                assert_eq!(
                    cmd::write_file(&client, &block, &data, 128, 1, handle).unwrap(),
                    128
                );
                cmd::set_pos_file(&client, &block, handle, 0).unwrap();
                let readback = DataBuffer::with_len(128);
                assert_eq!(
                    cmd::read_file(&client, &block, &readback, 128, 1, handle).unwrap(),
                    1
                );
                assert_eq!(readback.snapshot(), vec![core as u8; 128]);
                cmd::close_file(&client, &block, handle).unwrap();
            }
            client.unregister();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    runtime.shutdown_appio();
    pump0.join().unwrap();
    pump1.join().unwrap();
}

// ── Async delivery ───────────────────────────────────────────────────────────

#[test]
fn async_callback_runs_on_the_pump() {
    let harness = Harness::new(Arc::new(RamFs::new()));
    let client = harness.client();
    let block = FsCmdBlock::new();

    populate_file(&client, "/cb.bin", &[9u8; 512]);
    let handle = cmd::open_file(&client, &block, "/cb.bin", "r").unwrap();

    let seen = Arc::new(Mutex::new(None));
    let dest = DataBuffer::with_len(512);
    let async_data = FsAsyncData {
        callback: Some({
            let seen = seen.clone();
            Arc::new(move |result: &cafe_ios::fs::FsAsyncResult| {
                *seen.lock().unwrap() = Some(result.status);
            })
        }),
        queue: None,
    };
    cmd::read_file_async(
        &client,
        &block,
        &dest,
        512,
        1,
        handle,
        FsErrorFlag::empty(),
        &async_data,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        seen.lock().unwrap().is_some()
    }));
    assert_eq!(*seen.lock().unwrap(), Some(1));
    assert_eq!(dest.snapshot(), vec![9u8; 512]);
}

// ── Unreversed statuses ──────────────────────────────────────────────────────

#[test]
fn data_corrupted_and_media_error_stay_unhandled() {
    // The console's reaction to these two statuses has not been reversed;
    // the translation layer keeps them as explicit unhandled kinds rather
    // than guessing a state transition.
    use cafe_ios::fs::status::{translate_fsa_status, FsaTranslation};
    assert!(matches!(
        translate_fsa_status(FsaStatus::DataCorrupted.code()),
        FsaTranslation::Unhandled(_)
    ));
    assert!(matches!(
        translate_fsa_status(FsaStatus::MediaError.code()),
        FsaTranslation::Unhandled(_)
    ));
}
