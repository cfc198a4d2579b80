//! In-memory remote filesystem speaking the `RemoteFs` seam.
//!
//! Paths are absolute and `/`-separated. Every mutating call is appended to
//! a journal so tests can assert on ordering (e.g. files before dirs).

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use esh_core::{Error, Result};
use esh_ssh::{RemoteDirEntry, RemoteFs, RemoteStat};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

const NO_SUCH_FILE: &str = "No such file";
const FAILURE: &str = "Failure";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeNode {
    pub kind: NodeKind,
    /// Full `st_mode`, type bits included.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
}

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsCall {
    Mkdir(String),
    Unlink(String),
    Rmdir(String),
    Rename(String, String),
    Write(String),
    SetStat(String),
}

/// Which call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    ReadDir,
    Stat,
    SetStat,
    Mkdir,
    Unlink,
    Rmdir,
    Rename,
    Read,
    Write,
}

#[derive(Debug, Default)]
struct FsState {
    nodes: BTreeMap<String, FakeNode>,
    journal: Vec<FsCall>,
    failures: HashSet<(FsOp, String)>,
    read_fail_after: Option<(String, usize)>,
}

/// Shared handle to the fake filesystem. Clones see the same tree.
#[derive(Debug, Clone)]
pub struct FakeFs {
    state: Arc<Mutex<FsState>>,
}

impl Default for FakeFs {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn op_error(message: &str) -> Error {
    Error::Operation(message.to_string())
}

impl FakeFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            FakeNode {
                kind: NodeKind::Dir,
                mode: S_IFDIR | 0o755,
                uid: 0,
                gid: 0,
                atime: 0,
                mtime: 0,
            },
        );
        Self {
            state: Arc::new(Mutex::new(FsState {
                nodes,
                ..FsState::default()
            })),
        }
    }

    // ── Seeding ──────────────────────────────────────────────────────────────

    /// Adds a directory (and any missing parents) with permission bits `perm`.
    pub fn add_dir(&self, path: &str, perm: u32) -> &Self {
        let path = normalize(path);
        let parent = parent_of(&path);
        if parent != path && !self.exists(&parent) {
            self.add_dir(&parent, 0o755);
        }
        self.state.lock().unwrap().nodes.insert(
            path,
            FakeNode {
                kind: NodeKind::Dir,
                mode: S_IFDIR | (perm & 0o7777),
                uid: 1000,
                gid: 1000,
                atime: 1_700_000_000,
                mtime: 1_700_000_000,
            },
        );
        self
    }

    /// Adds a regular file (and any missing parents).
    pub fn add_file(&self, path: &str, perm: u32, contents: impl Into<Vec<u8>>) -> &Self {
        let path = normalize(path);
        let parent = parent_of(&path);
        if !self.exists(&parent) {
            self.add_dir(&parent, 0o755);
        }
        self.state.lock().unwrap().nodes.insert(
            path,
            FakeNode {
                kind: NodeKind::File(contents.into()),
                mode: S_IFREG | (perm & 0o7777),
                uid: 1000,
                gid: 1000,
                atime: 1_700_000_000,
                mtime: 1_700_000_000,
            },
        );
        self
    }

    pub fn add_symlink(&self, path: &str, target: &str) -> &Self {
        let path = normalize(path);
        self.state.lock().unwrap().nodes.insert(
            path,
            FakeNode {
                kind: NodeKind::Symlink(target.to_string()),
                mode: S_IFLNK | 0o777,
                uid: 1000,
                gid: 1000,
                atime: 1_700_000_000,
                mtime: 1_700_000_000,
            },
        );
        self
    }

    /// Makes every `op` on `path` fail with "Permission denied".
    pub fn fail(&self, op: FsOp, path: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op, normalize(path)));
        self
    }

    /// Reads of `path` fail once `bytes` have been delivered.
    pub fn fail_read_after(&self, path: &str, bytes: usize) -> &Self {
        self.state.lock().unwrap().read_fail_after = Some((normalize(path), bytes));
        self
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    pub fn exists(&self, path: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .nodes
            .contains_key(&normalize(path))
    }

    pub fn node(&self, path: &str) -> Option<FakeNode> {
        self.state.lock().unwrap().nodes.get(&normalize(path)).cloned()
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.node(path)?.kind {
            NodeKind::File(data) => Some(data),
            _ => None,
        }
    }

    pub fn journal(&self) -> Vec<FsCall> {
        self.state.lock().unwrap().journal.clone()
    }

    /// A fresh channel onto this tree.
    pub fn channel(&self) -> FakeFsChannel {
        FakeFsChannel {
            fs: self.clone(),
            closed: false,
            on_close: None,
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn check(&self, state: &FsState, op: FsOp, path: &str) -> Result<()> {
        if state.failures.contains(&(op, path.to_string())) {
            Err(op_error("Permission denied"))
        } else {
            Ok(())
        }
    }

    fn children(state: &FsState, dir: &str) -> Vec<String> {
        state
            .nodes
            .keys()
            .filter(|p| p.as_str() != "/" && parent_of(p) == dir)
            .cloned()
            .collect()
    }
}

fn stat_of(node: &FakeNode) -> RemoteStat {
    let size = match &node.kind {
        NodeKind::File(data) => data.len() as u64,
        NodeKind::Dir => 4096,
        NodeKind::Symlink(target) => target.len() as u64,
    };
    RemoteStat {
        size: Some(size),
        uid: Some(node.uid),
        gid: Some(node.gid),
        perm: Some(node.mode),
        atime: Some(node.atime),
        mtime: Some(node.mtime),
    }
}

/// One "SFTP channel" onto a [`FakeFs`].
pub struct FakeFsChannel {
    fs: FakeFs,
    closed: bool,
    on_close: Option<Box<dyn FnMut() + Send>>,
}

impl FakeFsChannel {
    /// Runs `hook` the first time the channel is closed.
    pub fn on_close(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(op_error("SFTP channel is closed"))
        } else {
            Ok(())
        }
    }
}

impl RemoteFs for FakeFsChannel {
    fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteDirEntry>> {
        self.ensure_open()?;
        let path = normalize(path);
        let state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::ReadDir, &path)?;
        match state.nodes.get(&path) {
            Some(FakeNode {
                kind: NodeKind::Dir, ..
            }) => {}
            Some(_) => return Err(op_error(FAILURE)),
            None => return Err(op_error(NO_SUCH_FILE)),
        }
        Ok(FakeFs::children(&state, &path)
            .into_iter()
            .filter_map(|child| {
                let node = state.nodes.get(&child)?;
                let filename = child.rsplit('/').next()?.to_string();
                Some(RemoteDirEntry {
                    filename,
                    stat: stat_of(node),
                })
            })
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RemoteStat> {
        self.ensure_open()?;
        let path = normalize(path);
        let state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Stat, &path)?;
        state
            .nodes
            .get(&path)
            .map(stat_of)
            .ok_or_else(|| op_error(NO_SUCH_FILE))
    }

    fn set_stat(&mut self, path: &str, stat: RemoteStat) -> Result<()> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::SetStat, &path)?;
        let node = state
            .nodes
            .get_mut(&path)
            .ok_or_else(|| op_error(NO_SUCH_FILE))?;
        if let Some(perm) = stat.perm {
            node.mode = (node.mode & S_IFMT) | (perm & 0o7777);
        }
        if let Some(uid) = stat.uid {
            node.uid = uid;
        }
        if let Some(gid) = stat.gid {
            node.gid = gid;
        }
        if let Some(atime) = stat.atime {
            node.atime = atime;
        }
        if let Some(mtime) = stat.mtime {
            node.mtime = mtime;
        }
        state.journal.push(FsCall::SetStat(path));
        Ok(())
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Mkdir, &path)?;
        if state.nodes.contains_key(&path) {
            return Err(op_error(FAILURE));
        }
        match state.nodes.get(&parent_of(&path)) {
            Some(FakeNode {
                kind: NodeKind::Dir, ..
            }) => {}
            _ => return Err(op_error(NO_SUCH_FILE)),
        }
        state.nodes.insert(
            path.clone(),
            FakeNode {
                kind: NodeKind::Dir,
                mode: S_IFDIR | (mode & 0o7777),
                uid: 1000,
                gid: 1000,
                atime: 1_700_000_000,
                mtime: 1_700_000_000,
            },
        );
        state.journal.push(FsCall::Mkdir(path));
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Unlink, &path)?;
        match state.nodes.get(&path) {
            None => return Err(op_error(NO_SUCH_FILE)),
            Some(FakeNode {
                kind: NodeKind::Dir, ..
            }) => return Err(op_error(FAILURE)),
            Some(_) => {}
        }
        state.nodes.remove(&path);
        state.journal.push(FsCall::Unlink(path));
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Rmdir, &path)?;
        match state.nodes.get(&path) {
            Some(FakeNode {
                kind: NodeKind::Dir, ..
            }) => {}
            Some(_) => return Err(op_error(FAILURE)),
            None => return Err(op_error(NO_SUCH_FILE)),
        }
        if !FakeFs::children(&state, &path).is_empty() {
            return Err(op_error(FAILURE));
        }
        state.nodes.remove(&path);
        state.journal.push(FsCall::Rmdir(path));
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        let (from, to) = (normalize(from), normalize(to));
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Rename, &from)?;
        if !state.nodes.contains_key(&from) {
            return Err(op_error(NO_SUCH_FILE));
        }
        if state.nodes.contains_key(&to) {
            return Err(op_error(FAILURE));
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|p| **p == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                state.nodes.insert(new, node);
            }
        }
        state.journal.push(FsCall::Rename(from, to));
        Ok(())
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.ensure_open()?;
        let path = normalize(path);
        let state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Read, &path)?;
        let data = match state.nodes.get(&path) {
            Some(FakeNode {
                kind: NodeKind::File(data),
                ..
            }) => data.clone(),
            Some(_) => return Err(op_error(FAILURE)),
            None => return Err(op_error(NO_SUCH_FILE)),
        };
        match &state.read_fail_after {
            Some((failing, limit)) if *failing == path => Ok(Box::new(FailingReader {
                inner: Cursor::new(data),
                remaining: *limit,
            })),
            _ => Ok(Box::new(Cursor::new(data))),
        }
    }

    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + Send>> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut state = self.fs.state.lock().unwrap();
        self.fs.check(&state, FsOp::Write, &path)?;
        match state.nodes.get(&parent_of(&path)) {
            Some(FakeNode {
                kind: NodeKind::Dir, ..
            }) => {}
            _ => return Err(op_error(NO_SUCH_FILE)),
        }
        if let Some(FakeNode {
            kind: NodeKind::Dir, ..
        }) = state.nodes.get(&path)
        {
            return Err(op_error(FAILURE));
        }
        let node = state.nodes.entry(path.clone()).or_insert(FakeNode {
            kind: NodeKind::File(Vec::new()),
            mode: S_IFREG | 0o644,
            uid: 1000,
            gid: 1000,
            atime: 1_700_000_000,
            mtime: 1_700_000_000,
        });
        node.kind = NodeKind::File(Vec::new());
        state.journal.push(FsCall::Write(path.clone()));
        Ok(Box::new(FakeWriter {
            fs: self.fs.clone(),
            path,
        }))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(hook) = self.on_close.as_mut() {
            hook();
        }
    }
}

struct FailingReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "Connection lost"));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Appends straight into the shared tree so partial writes are visible.
struct FakeWriter {
    fs: FakeFs,
    path: String,
}

impl Write for FakeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.fs.state.lock().unwrap();
        match state.nodes.get_mut(&self.path) {
            Some(FakeNode {
                kind: NodeKind::File(data),
                ..
            }) => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, NO_SUCH_FILE)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
