//! Pluggable host filesystem behind the FSA device.
//!
//! [`HostFs`] is the seam between the command pipeline and whatever storage
//! actually backs it. Implementations are thread-safe and speak FSA status
//! codes directly. [`RamFs`] is the in-memory implementation used by the
//! runtime's tests and by embedders that want a scratch volume.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::fsa::status::{FsaResult, FsaStatus};
use crate::fsa::types::{FsDirEntry, FsOpenMode, FsStat, FsaVolumeInfo, FS_STAT_DIRECTORY};

/// Host-side filesystem interface.
///
/// File and directory handles are allocated by the implementation and are
/// only meaningful to it. Methods that move data return the transferred
/// byte count, which becomes the positive reply word.
pub trait HostFs: Send + Sync {
    fn mount(&self, source: &str, target: &str) -> FsaResult<()>;
    fn unmount(&self, target: &str) -> FsaResult<()>;

    fn open_file(&self, path: &str, mode: FsOpenMode) -> FsaResult<u32>;
    fn close_file(&self, file: u32) -> FsaResult<()>;

    /// Read up to `buf.len()` bytes. `pos` seeks first when given; the
    /// cursor ends past the transferred bytes either way. A short count
    /// means end of file.
    fn read_file(&self, file: u32, buf: &mut [u8], pos: Option<u32>) -> FsaResult<u32>;

    /// Write `data`, at `pos` when given, appending when the file was
    /// opened in append mode.
    fn write_file(&self, file: u32, data: &[u8], pos: Option<u32>) -> FsaResult<u32>;

    fn get_pos(&self, file: u32) -> FsaResult<u32>;
    fn set_pos(&self, file: u32, pos: u32) -> FsaResult<()>;
    fn is_eof(&self, file: u32) -> FsaResult<bool>;
    fn stat_file(&self, file: u32) -> FsaResult<FsStat>;
    fn flush_file(&self, file: u32) -> FsaResult<()>;

    /// Truncate the file at its current cursor.
    fn truncate_file(&self, file: u32) -> FsaResult<()>;

    /// Extend the file by `size * count` zero bytes; returns `count`.
    fn append_file(&self, file: u32, size: u32, count: u32) -> FsaResult<u32>;

    fn get_file_block_address(&self, file: u32) -> FsaResult<u32>;

    fn open_dir(&self, path: &str) -> FsaResult<u32>;
    /// Next entry, or `EndOfDir` once exhausted.
    fn read_dir(&self, dir: u32) -> FsaResult<FsDirEntry>;
    fn rewind_dir(&self, dir: u32) -> FsaResult<()>;
    fn close_dir(&self, dir: u32) -> FsaResult<()>;

    fn make_dir(&self, path: &str, mode: u32) -> FsaResult<()>;
    fn remove(&self, path: &str) -> FsaResult<()>;
    fn rename(&self, old_path: &str, new_path: &str) -> FsaResult<()>;
    fn change_mode(&self, path: &str, mode: u32) -> FsaResult<()>;
    fn stat_path(&self, path: &str) -> FsaResult<FsStat>;

    fn volume_info(&self) -> FsaResult<FsaVolumeInfo>;
}

// ── RamFs ────────────────────────────────────────────────────────────────────

enum RamNode {
    File { data: Vec<u8>, mode: u32 },
    Dir { mode: u32 },
}

struct OpenFile {
    path: String,
    pos: u32,
    mode: FsOpenMode,
}

struct OpenDir {
    path: String,
    cursor: usize,
}

struct RamFsState {
    /// Normalized absolute path → node. The root directory always exists.
    nodes: BTreeMap<String, RamNode>,
    open_files: BTreeMap<u32, OpenFile>,
    open_dirs: BTreeMap<u32, OpenDir>,
    next_file: u32,
    next_dir: u32,
    used_bytes: u64,
}

/// In-memory host filesystem with a fixed capacity.
pub struct RamFs {
    capacity: u64,
    state: Mutex<RamFsState>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::with_capacity(64 * 1024 * 1024)
    }
}

impl RamFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u64) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), RamNode::Dir { mode: 0o777 });
        RamFs {
            capacity,
            state: Mutex::new(RamFsState {
                nodes,
                open_files: BTreeMap::new(),
                open_dirs: BTreeMap::new(),
                next_file: 1,
                next_dir: 1,
                used_bytes: 0,
            }),
        }
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Direct children of `dir`, in name order.
fn children<'a>(nodes: &'a BTreeMap<String, RamNode>, dir: &str) -> Vec<(&'a str, &'a RamNode)> {
    let prefix = if dir == "/" { String::from("/") } else { format!("{dir}/") };
    nodes
        .range(prefix.clone()..)
        .take_while(|(path, _)| path.starts_with(&prefix))
        .filter(|(path, _)| !path[prefix.len()..].contains('/'))
        .filter(|(path, _)| path.len() > prefix.len())
        .map(|(path, node)| (&path[prefix.len()..], node))
        .collect()
}

fn stat_of(node: &RamNode) -> FsStat {
    match node {
        RamNode::File { data, mode } => FsStat {
            mode: *mode,
            size: data.len() as u32,
            alloc_size: data.len() as u32,
            ..Default::default()
        },
        RamNode::Dir { mode } => FsStat {
            flags: FS_STAT_DIRECTORY,
            mode: *mode,
            ..Default::default()
        },
    }
}

impl RamFsState {
    fn file(&mut self, handle: u32) -> FsaResult<&mut OpenFile> {
        self.open_files
            .get_mut(&handle)
            .ok_or(FsaStatus::InvalidFileHandle)
    }

    fn file_data(&self, path: &str) -> FsaResult<&Vec<u8>> {
        match self.nodes.get(path) {
            Some(RamNode::File { data, .. }) => Ok(data),
            Some(RamNode::Dir { .. }) => Err(FsaStatus::NotFile),
            None => Err(FsaStatus::NotFound),
        }
    }

    fn file_data_mut(&mut self, path: &str) -> FsaResult<&mut Vec<u8>> {
        match self.nodes.get_mut(path) {
            Some(RamNode::File { data, .. }) => Ok(data),
            Some(RamNode::Dir { .. }) => Err(FsaStatus::NotFile),
            None => Err(FsaStatus::NotFound),
        }
    }
}

impl HostFs for RamFs {
    fn mount(&self, _source: &str, _target: &str) -> FsaResult<()> {
        Ok(())
    }

    fn unmount(&self, _target: &str) -> FsaResult<()> {
        Ok(())
    }

    fn open_file(&self, path: &str, mode: FsOpenMode) -> FsaResult<u32> {
        let mut state = self.state.lock().unwrap();

        match state.nodes.get(path) {
            Some(RamNode::Dir { .. }) => return Err(FsaStatus::NotFile),
            Some(RamNode::File { .. }) => {
                if mode.truncate {
                    let data = state.file_data_mut(path)?;
                    let freed = data.len() as u64;
                    data.clear();
                    state.used_bytes -= freed;
                }
            }
            None => {
                if !mode.create {
                    return Err(FsaStatus::NotFound);
                }
                if !state.nodes.contains_key(parent_of(path)) {
                    return Err(FsaStatus::NotFound);
                }
                state
                    .nodes
                    .insert(path.to_string(), RamNode::File { data: Vec::new(), mode: 0o644 });
            }
        }

        let handle = state.next_file;
        state.next_file += 1;
        let pos = if mode.append {
            state.file_data(path)?.len() as u32
        } else {
            0
        };
        state.open_files.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                pos,
                mode,
            },
        );
        Ok(handle)
    }

    fn close_file(&self, file: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .open_files
            .remove(&file)
            .map(|_| ())
            .ok_or(FsaStatus::InvalidFileHandle)
    }

    fn read_file(&self, file: u32, buf: &mut [u8], pos: Option<u32>) -> FsaResult<u32> {
        let mut state = self.state.lock().unwrap();
        let open = state.file(file)?;
        if !open.mode.read {
            return Err(FsaStatus::AccessError);
        }
        let path = open.path.clone();
        let start = pos.unwrap_or(open.pos) as usize;

        let data = state.file_data(&path)?;
        let n = if start >= data.len() {
            0
        } else {
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            n
        };

        state.file(file)?.pos = (start + n) as u32;
        Ok(n as u32)
    }

    fn write_file(&self, file: u32, data: &[u8], pos: Option<u32>) -> FsaResult<u32> {
        let mut state = self.state.lock().unwrap();
        let open = state.file(file)?;
        if !open.mode.write {
            return Err(FsaStatus::AccessError);
        }
        let path = open.path.clone();
        let append = open.mode.append;
        let start = if append {
            state.file_data(&path)?.len()
        } else {
            pos.unwrap_or(open.pos) as usize
        };

        let grow = (start + data.len()).saturating_sub(state.file_data(&path)?.len()) as u64;
        if state.used_bytes + grow > self.capacity {
            return Err(FsaStatus::StorageFull);
        }
        state.used_bytes += grow;

        let contents = state.file_data_mut(&path)?;
        if contents.len() < start + data.len() {
            contents.resize(start + data.len(), 0);
        }
        contents[start..start + data.len()].copy_from_slice(data);

        state.file(file)?.pos = (start + data.len()) as u32;
        Ok(data.len() as u32)
    }

    fn get_pos(&self, file: u32) -> FsaResult<u32> {
        Ok(self.state.lock().unwrap().file(file)?.pos)
    }

    fn set_pos(&self, file: u32, pos: u32) -> FsaResult<()> {
        self.state.lock().unwrap().file(file)?.pos = pos;
        Ok(())
    }

    fn is_eof(&self, file: u32) -> FsaResult<bool> {
        let mut state = self.state.lock().unwrap();
        let open = state.file(file)?;
        let (path, pos) = (open.path.clone(), open.pos);
        Ok(pos as usize >= state.file_data(&path)?.len())
    }

    fn stat_file(&self, file: u32) -> FsaResult<FsStat> {
        let mut state = self.state.lock().unwrap();
        let path = state.file(file)?.path.clone();
        let node = state.nodes.get(&path).ok_or(FsaStatus::NotFound)?;
        Ok(stat_of(node))
    }

    fn flush_file(&self, file: u32) -> FsaResult<()> {
        self.state.lock().unwrap().file(file).map(|_| ())
    }

    fn truncate_file(&self, file: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        let open = state.file(file)?;
        let (path, pos) = (open.path.clone(), open.pos as usize);
        let data = state.file_data_mut(&path)?;
        if pos < data.len() {
            let freed = (data.len() - pos) as u64;
            data.truncate(pos);
            state.used_bytes -= freed;
        }
        Ok(())
    }

    fn append_file(&self, file: u32, size: u32, count: u32) -> FsaResult<u32> {
        let mut state = self.state.lock().unwrap();
        let path = state.file(file)?.path.clone();
        let grow = size as u64 * count as u64;
        if state.used_bytes + grow > self.capacity {
            return Err(FsaStatus::StorageFull);
        }
        state.used_bytes += grow;
        let data = state.file_data_mut(&path)?;
        let new_len = data.len() + grow as usize;
        data.resize(new_len, 0);
        Ok(count)
    }

    fn get_file_block_address(&self, file: u32) -> FsaResult<u32> {
        // Synthetic: there is no block device behind a RAM volume.
        let mut state = self.state.lock().unwrap();
        state.file(file)?;
        Ok(0x1000_0000 + file * 0x1000)
    }

    fn open_dir(&self, path: &str) -> FsaResult<u32> {
        let mut state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(RamNode::Dir { .. }) => {}
            Some(RamNode::File { .. }) => return Err(FsaStatus::NotDir),
            None => return Err(FsaStatus::NotFound),
        }
        let handle = state.next_dir;
        state.next_dir += 1;
        state.open_dirs.insert(
            handle,
            OpenDir {
                path: path.to_string(),
                cursor: 0,
            },
        );
        Ok(handle)
    }

    fn read_dir(&self, dir: u32) -> FsaResult<FsDirEntry> {
        let mut state = self.state.lock().unwrap();
        let open = state.open_dirs.get(&dir).ok_or(FsaStatus::InvalidDirHandle)?;
        let (path, cursor) = (open.path.clone(), open.cursor);

        let entries = children(&state.nodes, &path);
        let Some((name, node)) = entries.get(cursor) else {
            return Err(FsaStatus::EndOfDir);
        };
        let entry = FsDirEntry {
            stat: stat_of(node),
            name: name.to_string(),
        };

        state.open_dirs.get_mut(&dir).unwrap().cursor += 1;
        Ok(entry)
    }

    fn rewind_dir(&self, dir: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .open_dirs
            .get_mut(&dir)
            .ok_or(FsaStatus::InvalidDirHandle)?
            .cursor = 0;
        Ok(())
    }

    fn close_dir(&self, dir: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .open_dirs
            .remove(&dir)
            .map(|_| ())
            .ok_or(FsaStatus::InvalidDirHandle)
    }

    fn make_dir(&self, path: &str, mode: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.nodes.contains_key(path) {
            return Err(FsaStatus::AlreadyExists);
        }
        match state.nodes.get(parent_of(path)) {
            Some(RamNode::Dir { .. }) => {}
            Some(RamNode::File { .. }) => return Err(FsaStatus::NotDir),
            None => return Err(FsaStatus::NotFound),
        }
        state.nodes.insert(path.to_string(), RamNode::Dir { mode });
        Ok(())
    }

    fn remove(&self, path: &str) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match state.nodes.get(path) {
            None => return Err(FsaStatus::NotFound),
            Some(RamNode::Dir { .. }) => {
                if !children(&state.nodes, path).is_empty() {
                    return Err(FsaStatus::NotEmpty);
                }
            }
            Some(RamNode::File { data, .. }) => {
                state.used_bytes -= data.len() as u64;
            }
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, old_path: &str, new_path: &str) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.nodes.contains_key(old_path) {
            return Err(FsaStatus::NotFound);
        }
        if state.nodes.contains_key(new_path) {
            return Err(FsaStatus::AlreadyExists);
        }
        if !state.nodes.contains_key(parent_of(new_path)) {
            return Err(FsaStatus::NotFound);
        }

        // Move the node and everything beneath it.
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|k| *k == old_path || k.starts_with(&format!("{old_path}/")))
            .cloned()
            .collect();
        for key in moved {
            let node = state.nodes.remove(&key).unwrap();
            let suffix = &key[old_path.len()..];
            state.nodes.insert(format!("{new_path}{suffix}"), node);
        }
        Ok(())
    }

    fn change_mode(&self, path: &str, mode: u32) -> FsaResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.nodes.get_mut(path) {
            Some(RamNode::File { mode: m, .. }) | Some(RamNode::Dir { mode: m }) => {
                *m = mode;
                Ok(())
            }
            None => Err(FsaStatus::NotFound),
        }
    }

    fn stat_path(&self, path: &str) -> FsaResult<FsStat> {
        let state = self.state.lock().unwrap();
        state.nodes.get(path).map(stat_of).ok_or(FsaStatus::NotFound)
    }

    fn volume_info(&self) -> FsaResult<FsaVolumeInfo> {
        let state = self.state.lock().unwrap();
        Ok(FsaVolumeInfo {
            volume_label: "ram".to_string(),
            volume_path: "/vol/ram".to_string(),
            device_path: "/dev/ram01".to_string(),
            mount_path: "/".to_string(),
            free_bytes: self.capacity - state.used_bytes,
            total_bytes: self.capacity,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mode() -> FsOpenMode {
        FsOpenMode::parse("w").unwrap()
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = RamFs::new();
        let file = fs.open_file("/hello.txt", write_mode()).unwrap();
        assert_eq!(fs.write_file(file, b"hello", None).unwrap(), 5);
        fs.close_file(file).unwrap();

        let file = fs.open_file("/hello.txt", FsOpenMode::parse("r").unwrap()).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_file(file, &mut buf, None).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        // Short read at EOF.
        assert_eq!(fs.read_file(file, &mut buf, None).unwrap(), 0);
        assert!(fs.is_eof(file).unwrap());
    }

    #[test]
    fn open_missing_without_create() {
        let fs = RamFs::new();
        assert_eq!(
            fs.open_file("/nope", FsOpenMode::parse("r").unwrap()),
            Err(FsaStatus::NotFound)
        );
    }

    #[test]
    fn directory_listing_in_name_order() {
        let fs = RamFs::new();
        fs.make_dir("/d", 0o755).unwrap();
        for name in ["/d/b", "/d/a", "/d/c"] {
            fs.open_file(name, write_mode()).map(|f| fs.close_file(f)).unwrap().unwrap();
        }
        fs.make_dir("/d/sub", 0o755).unwrap();

        let dir = fs.open_dir("/d").unwrap();
        let mut names = Vec::new();
        loop {
            match fs.read_dir(dir) {
                Ok(entry) => names.push(entry.name),
                Err(FsaStatus::EndOfDir) => break,
                Err(other) => panic!("unexpected status {other:?}"),
            }
        }
        assert_eq!(names, ["a", "b", "c", "sub"]);

        fs.rewind_dir(dir).unwrap();
        assert_eq!(fs.read_dir(dir).unwrap().name, "a");
        fs.close_dir(dir).unwrap();
    }

    #[test]
    fn remove_non_empty_dir() {
        let fs = RamFs::new();
        fs.make_dir("/d", 0o755).unwrap();
        let f = fs.open_file("/d/x", write_mode()).unwrap();
        fs.close_file(f).unwrap();
        assert_eq!(fs.remove("/d"), Err(FsaStatus::NotEmpty));
        fs.remove("/d/x").unwrap();
        fs.remove("/d").unwrap();
    }

    #[test]
    fn capacity_enforced() {
        let fs = RamFs::with_capacity(8);
        let file = fs.open_file("/f", write_mode()).unwrap();
        assert_eq!(fs.write_file(file, b"12345678", None).unwrap(), 8);
        assert_eq!(fs.write_file(file, b"9", None), Err(FsaStatus::StorageFull));
    }

    #[test]
    fn rename_moves_subtree() {
        let fs = RamFs::new();
        fs.make_dir("/a", 0o755).unwrap();
        let f = fs.open_file("/a/f", write_mode()).unwrap();
        fs.close_file(f).unwrap();
        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat_path("/b/f").is_ok());
        assert_eq!(fs.stat_path("/a"), Err(FsaStatus::NotFound));
    }
}
