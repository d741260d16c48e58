//! In-memory host shared by the integration tests.
//!
//! Serves every operation from a path-keyed tree, speaking the wire format
//! through the crate's own Composer/Decomposer.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use vmfs::mailbox::{Loopback, ReplyHandler};
use vmfs::protocol::{Composer, Decomposer};
use vmfs::vfs::{AttrMask, Attributes, HostError, ObjectType, Opcode, OpenFlags};
use vmfs::Vfs;

pub const CAPACITY: usize = 8192;
pub const DISK_SIZE: u64 = 1 << 20;
pub const MOUNT_NAME: &str = "host";

#[derive(Debug, Clone)]
pub enum Node {
    Dir { mtime: u64, access: u32 },
    File { data: Vec<u8>, mtime: u64, access: u32 },
    Link { target: String },
}

#[derive(Debug)]
enum Open {
    Mounts { next: usize },
    Dir { entries: Vec<String>, next: usize },
    File { path: String, flags: OpenFlags },
}

enum Reply {
    Status(i32),
    /// Status followed by a data block
    Data(i32, Vec<u8>),
    /// Zero status followed by a u64
    Size(u64),
}

type HostResult<T> = Result<T, HostError>;

pub struct MemoryHost {
    nodes: BTreeMap<String, Node>,
    handles: HashMap<i32, Open>,
    next_handle: i32,
    clock: u64,
    /// Bytes the disk can hold across all files
    pub disk_size: u64,
    /// Every opcode served, in order
    pub ops: Vec<Opcode>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                mtime: 0,
                access: 0o755,
            },
        );
        Self {
            nodes,
            handles: HashMap::new(),
            next_handle: 1,
            clock: 1_000,
            disk_size: DISK_SIZE,
            ops: Vec::new(),
        }
    }

    pub fn with_disk_size(mut self, disk_size: u64) -> Self {
        self.disk_size = disk_size;
        self
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn file_data(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(path)? {
            Node::File { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn disk_used(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| match n {
                Node::File { data, .. } => data.len() as u64,
                _ => 0,
            })
            .sum()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn alloc(&mut self, open: Open) -> i32 {
        let h = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(h, open);
        h
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    fn normalize(path: &str) -> HostResult<String> {
        if !path.starts_with('/') {
            return Err(HostError::Invalid);
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.iter().any(|p| p.len() > 255) {
            return Err(HostError::TooLong);
        }
        Ok(format!("/{}", parts.join("/")))
    }

    fn parent(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &path[..i],
        }
    }

    fn basename(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or("")
    }

    fn check_parent(&self, path: &str) -> HostResult<()> {
        match self.nodes.get(Self::parent(path)) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(HostError::NotDir),
            None => Err(HostError::NotFound),
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .keys()
            .filter(|k| k.len() > prefix.len() && k.starts_with(&prefix))
            .filter(|k| !k[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }

    fn attributes(&self, path: &str) -> HostResult<Attributes> {
        let node = self.nodes.get(path).ok_or(HostError::NotFound)?;
        let (object_type, size, mtime, access) = match node {
            Node::Dir { mtime, access } => (ObjectType::Dir, 0, *mtime, *access),
            Node::File { data, mtime, access } => {
                (ObjectType::File, data.len() as u64, *mtime, *access)
            }
            Node::Link { target } => (ObjectType::Link, target.len() as u64, 0, 0o777),
        };
        Ok(Attributes {
            mtime: Some(mtime),
            access: Some(access),
            object_type: Some(object_type),
            size: Some(size),
            ctime: Some(mtime),
            atime: Some(mtime),
            rtime: Some(self.clock),
            disk_size: Some(self.disk_size),
            disk_free: Some(self.disk_size - self.disk_used()),
            name: Some(Self::basename(path).to_string()),
        })
    }

    fn mount_attributes(&self) -> Attributes {
        Attributes {
            object_type: Some(ObjectType::Mount),
            disk_size: Some(self.disk_size),
            disk_free: Some(self.disk_size - self.disk_used()),
            name: Some(MOUNT_NAME.to_string()),
            ..self.attributes("/").unwrap_or_default()
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, op: Opcode, md: &mut Decomposer<'_>) -> HostResult<Reply> {
        match op {
            Opcode::OpenMounts => Ok(Reply::Status(self.alloc(Open::Mounts { next: 0 }))),
            Opcode::ReadMounts => {
                let (h, mask, max) = read_iter_params(md)?;
                let attrs = self.mount_attributes();
                match self.handles.get_mut(&h) {
                    Some(Open::Mounts { next }) if *next == 0 => {
                        *next += 1;
                        Ok(Reply::Data(0, block(&attrs, mask, max)))
                    }
                    Some(Open::Mounts { .. }) => Err(HostError::NoEntry),
                    _ => Err(HostError::BadHandle),
                }
            }
            Opcode::CloseMounts => {
                let h = int(md)?;
                match self.handles.get(&h) {
                    Some(Open::Mounts { .. }) => {
                        self.handles.remove(&h);
                        Ok(Reply::Status(0))
                    }
                    _ => Err(HostError::BadHandle),
                }
            }

            Opcode::OpenDir => {
                let path = path(md)?;
                match self.nodes.get(&path) {
                    Some(Node::Dir { .. }) => {}
                    Some(_) => return Err(HostError::NotDir),
                    None => return Err(HostError::NotFound),
                }
                let entries = self.children(&path);
                Ok(Reply::Status(self.alloc(Open::Dir { entries, next: 0 })))
            }
            Opcode::ReadDir => {
                let (h, mask, max) = read_iter_params(md)?;
                let entry = match self.handles.get_mut(&h) {
                    Some(Open::Dir { entries, next }) => {
                        let entry = entries.get(*next).cloned().ok_or(HostError::NoEntry)?;
                        *next += 1;
                        entry
                    }
                    _ => return Err(HostError::BadHandle),
                };
                let attrs = self.attributes(&entry)?;
                Ok(Reply::Data(0, block(&attrs, mask, max)))
            }
            Opcode::CloseDir => {
                let h = int(md)?;
                match self.handles.get(&h) {
                    Some(Open::Dir { .. }) => {
                        self.handles.remove(&h);
                        Ok(Reply::Status(0))
                    }
                    _ => Err(HostError::BadHandle),
                }
            }
            Opcode::Mkdir => {
                let path = path(md)?;
                if self.nodes.contains_key(&path) {
                    return Err(HostError::Exists);
                }
                self.check_parent(&path)?;
                let mtime = self.tick();
                self.nodes.insert(path, Node::Dir { mtime, access: 0o755 });
                Ok(Reply::Status(0))
            }
            Opcode::Rmdir => {
                let path = path(md)?;
                match self.nodes.get(&path) {
                    Some(Node::Dir { .. }) if path == "/" => return Err(HostError::Permission),
                    Some(Node::Dir { .. }) => {}
                    Some(_) => return Err(HostError::NotDir),
                    None => return Err(HostError::NotFound),
                }
                if !self.children(&path).is_empty() {
                    return Err(HostError::NotEmpty);
                }
                self.nodes.remove(&path);
                Ok(Reply::Status(0))
            }
            Opcode::Remove => {
                let path = path(md)?;
                match self.nodes.get(&path) {
                    Some(Node::Dir { .. }) => Err(HostError::IsDir),
                    Some(_) => {
                        self.nodes.remove(&path);
                        Ok(Reply::Status(0))
                    }
                    None => Err(HostError::NotFound),
                }
            }
            Opcode::Rename => {
                let from = path(md)?;
                let to = path(md)?;
                if !self.nodes.contains_key(&from) {
                    return Err(HostError::NotFound);
                }
                if self.nodes.contains_key(&to) {
                    return Err(HostError::Exists);
                }
                if to.starts_with(&format!("{}/", from)) {
                    return Err(HostError::Invalid);
                }
                self.check_parent(&to)?;
                let moved: Vec<String> = self
                    .nodes
                    .keys()
                    .filter(|k| **k == from || k.starts_with(&format!("{}/", from)))
                    .cloned()
                    .collect();
                for key in moved {
                    if let Some(node) = self.nodes.remove(&key) {
                        self.nodes.insert(format!("{}{}", to, &key[from.len()..]), node);
                    }
                }
                Ok(Reply::Status(0))
            }
            Opcode::GetAttr => {
                let path = path(md)?;
                let mask = AttrMask::from_bits_truncate(md.get_uint32().map_err(bad)?);
                let max = md.get_uint32().map_err(bad)? as usize;
                let attrs = self.attributes(&path)?;
                Ok(Reply::Data(0, block(&attrs, mask, max)))
            }
            Opcode::SetAttr => {
                let path = path(md)?;
                let mask = AttrMask::from_bits_truncate(md.get_uint32().map_err(bad)?);
                let data = md.get_data_ref().map_err(bad)?;
                let attrs = Attributes::unpack(mask, data).map_err(|_| HostError::Invalid)?;
                match self.nodes.get_mut(&path).ok_or(HostError::NotFound)? {
                    Node::File {
                        data,
                        mtime,
                        access,
                    } => {
                        if let Some(t) = attrs.mtime {
                            *mtime = t;
                        }
                        if let Some(a) = attrs.access {
                            *access = a;
                        }
                        if let Some(size) = attrs.size {
                            data.resize(size as usize, 0);
                        }
                    }
                    Node::Dir { mtime, access } => {
                        if let Some(t) = attrs.mtime {
                            *mtime = t;
                        }
                        if let Some(a) = attrs.access {
                            *access = a;
                        }
                    }
                    Node::Link { .. } => return Err(HostError::Invalid),
                }
                Ok(Reply::Status(0))
            }

            Opcode::OpenFile => {
                let path = path(md)?;
                let flags = OpenFlags::from_bits_truncate(md.get_uint32().map_err(bad)?);
                match self.nodes.get_mut(&path) {
                    Some(Node::File { data, .. }) => {
                        if flags.contains(OpenFlags::NEW) {
                            return Err(HostError::Exists);
                        }
                        if flags.contains(OpenFlags::TRUNCATE) {
                            data.clear();
                        }
                    }
                    Some(Node::Dir { .. }) => return Err(HostError::IsDir),
                    Some(Node::Link { .. }) => return Err(HostError::Invalid),
                    None => {
                        if !flags.intersects(OpenFlags::CREATE | OpenFlags::NEW) {
                            return Err(HostError::NotFound);
                        }
                        self.check_parent(&path)?;
                        let mtime = self.tick();
                        self.nodes.insert(
                            path.clone(),
                            Node::File {
                                data: Vec::new(),
                                mtime,
                                access: 0o644,
                            },
                        );
                    }
                }
                Ok(Reply::Status(self.alloc(Open::File { path, flags })))
            }
            Opcode::CloseFile => {
                let h = int(md)?;
                match self.handles.get(&h) {
                    Some(Open::File { .. }) => {
                        self.handles.remove(&h);
                        Ok(Reply::Status(0))
                    }
                    _ => Err(HostError::BadHandle),
                }
            }
            Opcode::WriteFile => {
                let h = int(md)?;
                let offset = md.get_uint64().map_err(bad)? as usize;
                let chunk = md.get_data_ref().map_err(bad)?;
                let len = md.get_uint32().map_err(bad)? as usize;
                if len != chunk.len() {
                    return Err(HostError::Invalid);
                }
                let free = (self.disk_size - self.disk_used()) as usize;
                let path = self.file_path(h, OpenFlags::WRONLY)?;
                let mtime = self.tick();
                let Some(Node::File { data, mtime: m, .. }) = self.nodes.get_mut(&path) else {
                    return Err(HostError::BadHandle);
                };
                let max_end = data.len() + free;
                let count = len.min(max_end.saturating_sub(offset));
                if count == 0 && len > 0 {
                    return Err(HostError::NoRoom);
                }
                if data.len() < offset + count {
                    data.resize(offset + count, 0);
                }
                data[offset..offset + count].copy_from_slice(&chunk[..count]);
                *m = mtime;
                Ok(Reply::Status(count as i32))
            }
            Opcode::ReadFile => {
                let h = int(md)?;
                let offset = md.get_uint64().map_err(bad)? as usize;
                let want = md.get_uint32().map_err(bad)? as usize;
                let path = self.file_path(h, OpenFlags::RDONLY)?;
                let Some(Node::File { data, .. }) = self.nodes.get(&path) else {
                    return Err(HostError::BadHandle);
                };
                let start = offset.min(data.len());
                let end = (start + want).min(data.len());
                Ok(Reply::Data((end - start) as i32, data[start..end].to_vec()))
            }
            Opcode::GetFileSize => {
                let h = int(md)?;
                let path = self.file_path(h, OpenFlags::empty())?;
                match self.nodes.get(&path) {
                    Some(Node::File { data, .. }) => Ok(Reply::Size(data.len() as u64)),
                    _ => Err(HostError::BadHandle),
                }
            }
            Opcode::SetFileSize => {
                let h = int(md)?;
                let size = md.get_uint64().map_err(bad)?;
                let path = self.file_path(h, OpenFlags::WRONLY)?;
                let used = self.disk_used();
                let Some(Node::File { data, .. }) = self.nodes.get_mut(&path) else {
                    return Err(HostError::BadHandle);
                };
                if size > data.len() as u64 && used - data.len() as u64 + size > self.disk_size {
                    return Err(HostError::NoRoom);
                }
                data.resize(size as usize, 0);
                Ok(Reply::Status(0))
            }
            Opcode::FileSync => {
                let h = int(md)?;
                self.file_path(h, OpenFlags::empty())?;
                Ok(Reply::Status(0))
            }

            Opcode::Symlink => {
                let target = md.get_str().map_err(bad)?.to_string();
                let link = path(md)?;
                if self.nodes.contains_key(&link) {
                    return Err(HostError::Exists);
                }
                self.check_parent(&link)?;
                self.nodes.insert(link, Node::Link { target });
                Ok(Reply::Status(0))
            }
            Opcode::Readlink => {
                let path = path(md)?;
                let max = md.get_int32().map_err(bad)?.max(0) as usize;
                match self.nodes.get(&path) {
                    Some(Node::Link { target }) => {
                        let mut bytes = target.as_bytes().to_vec();
                        bytes.push(0);
                        bytes.truncate(max);
                        Ok(Reply::Data(target.len() as i32, bytes))
                    }
                    Some(_) => Err(HostError::Invalid),
                    None => Err(HostError::NotFound),
                }
            }
        }
    }

    /// Path of an open file, checking the access bits in `need`.
    fn file_path(&self, h: i32, need: OpenFlags) -> HostResult<String> {
        match self.handles.get(&h) {
            Some(Open::File { path, flags }) => {
                if !flags.contains(need) {
                    return Err(HostError::Permission);
                }
                Ok(path.clone())
            }
            _ => Err(HostError::BadHandle),
        }
    }
}

impl ReplyHandler for MemoryHost {
    fn handle(&mut self, request: &[u8], reply: &mut [u8]) -> usize {
        let mut md = Decomposer::new(request);
        let result = match (md.get_uint32(), md.get_uint32()) {
            (Ok(_id), Ok(code)) => match Opcode::from_u32(code) {
                Some(op) => {
                    self.ops.push(op);
                    self.dispatch(op, &mut md)
                }
                None => Err(HostError::Unimplemented),
            },
            _ => Err(HostError::Invalid),
        };

        let mut mc = Composer::new(reply);
        let written = mc.put_uint32(0).and_then(|_| match result {
            Ok(Reply::Status(status)) => mc.put_int32(status),
            Ok(Reply::Data(status, data)) => {
                mc.put_int32(status)?;
                mc.put_data(&data)
            }
            Ok(Reply::Size(size)) => {
                mc.put_int32(0)?;
                mc.put_uint64(size)
            }
            Err(err) => mc.put_int32(err.code()),
        });
        match written {
            Ok(()) => mc.size(),
            Err(_) => 0,
        }
    }
}

fn bad<E>(_: E) -> HostError {
    HostError::Invalid
}

fn int(md: &mut Decomposer<'_>) -> HostResult<i32> {
    md.get_int32().map_err(bad)
}

fn path(md: &mut Decomposer<'_>) -> HostResult<String> {
    MemoryHost::normalize(md.get_str().map_err(bad)?)
}

fn read_iter_params(md: &mut Decomposer<'_>) -> HostResult<(i32, AttrMask, usize)> {
    let h = int(md)?;
    let mask = AttrMask::from_bits_truncate(md.get_uint32().map_err(bad)?);
    let max = md.get_uint32().map_err(bad)? as usize;
    Ok((h, mask, max))
}

/// Attribute block truncated to the caller's buffer
fn block(attrs: &Attributes, mask: AttrMask, max: usize) -> Vec<u8> {
    let mut bytes = attrs.pack(mask).unwrap_or_default();
    bytes.truncate(max);
    bytes
}

/// Client over a loopback mailbox serving a fresh [`MemoryHost`]
pub fn loopback_vfs() -> Vfs<Loopback<MemoryHost>> {
    Vfs::new(Loopback::new(MemoryHost::new(), CAPACITY))
}

pub fn loopback_vfs_with(host: MemoryHost) -> Vfs<Loopback<MemoryHost>> {
    Vfs::new(Loopback::new(host, CAPACITY))
}
