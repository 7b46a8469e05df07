//! A scripted in-process SFTP version-3 server speaking over an in-memory
//! duplex stream. Serves a tiny map-backed filesystem and exposes knobs for
//! fault injection plus a record of what arrived on the wire.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf};
use tokio::task::JoinHandle;

use sftp_mux::{Sftp, SftpOptions};

pub const SSH_FXP_INIT: u8 = 1;
pub const SSH_FXP_VERSION: u8 = 2;
pub const SSH_FXP_OPEN: u8 = 3;
pub const SSH_FXP_CLOSE: u8 = 4;
pub const SSH_FXP_READ: u8 = 5;
pub const SSH_FXP_WRITE: u8 = 6;
pub const SSH_FXP_LSTAT: u8 = 7;
pub const SSH_FXP_FSTAT: u8 = 8;
pub const SSH_FXP_SETSTAT: u8 = 9;
pub const SSH_FXP_FSETSTAT: u8 = 10;
pub const SSH_FXP_OPENDIR: u8 = 11;
pub const SSH_FXP_READDIR: u8 = 12;
pub const SSH_FXP_REMOVE: u8 = 13;
pub const SSH_FXP_MKDIR: u8 = 14;
pub const SSH_FXP_RMDIR: u8 = 15;
pub const SSH_FXP_REALPATH: u8 = 16;
pub const SSH_FXP_STAT: u8 = 17;
pub const SSH_FXP_RENAME: u8 = 18;
pub const SSH_FXP_READLINK: u8 = 19;
pub const SSH_FXP_SYMLINK: u8 = 20;
pub const SSH_FXP_STATUS: u8 = 101;
pub const SSH_FXP_HANDLE: u8 = 102;
pub const SSH_FXP_DATA: u8 = 103;
pub const SSH_FXP_NAME: u8 = 104;
pub const SSH_FXP_ATTRS: u8 = 105;
pub const SSH_FXP_EXTENDED: u8 = 200;
pub const SSH_FXP_EXTENDED_REPLY: u8 = 201;

pub const SSH_FX_OK: u32 = 0;
pub const SSH_FX_EOF: u32 = 1;
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH_FX_FAILURE: u32 = 4;
pub const SSH_FX_OP_UNSUPPORTED: u32 = 8;

const ATTR_SIZE: u32 = 0x1;
const ATTR_UIDGID: u32 = 0x2;
const ATTR_PERMISSIONS: u32 = 0x4;
const ATTR_ACMODTIME: u32 = 0x8;
const ATTR_EXTENDED: u32 = 0x8000_0000;

#[derive(Clone)]
pub struct ServerConfig {
    pub version: u32,
    pub extensions: Vec<(&'static str, &'static str)>,
    pub files: Vec<(&'static str, Vec<u8>)>,
    pub dirs: Vec<&'static str>,
    /// Entries per READDIR reply.
    pub dir_batch: usize,
    /// Reply FAILURE to the WRITE at exactly this offset.
    pub fail_write_at: Option<u64>,
    /// Collect this many WRITE replies before sending any.
    pub hold_writes: usize,
    /// Send held WRITE replies newest-first.
    pub reverse_held: bool,
    /// Queue WRITE replies until the next FSTAT/STAT is answered.
    pub hold_writes_until_stat: bool,
    /// Append this many bytes beyond the requested READ length when the
    /// file has them.
    pub overdeliver_reads: usize,
    /// Close the stream right after the version exchange.
    pub drop_after_handshake: bool,
    /// Read one request after the handshake, then close the stream.
    pub drop_on_first_request: bool,
    /// Send an unsolicited STATUS with a never-used request id after the
    /// handshake.
    pub rogue_reply: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: 3,
            extensions: Vec::new(),
            files: Vec::new(),
            dirs: vec!["/"],
            dir_batch: 3,
            fail_write_at: None,
            hold_writes: 0,
            reverse_held: false,
            hold_writes_until_stat: false,
            overdeliver_reads: 0,
            drop_after_handshake: false,
            drop_on_first_request: false,
            rogue_reply: false,
        }
    }
}

#[derive(Default)]
pub struct ServerState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub symlinks: BTreeMap<String, String>,
    /// (offset, len) of every READ in arrival order.
    pub reads: Vec<(u64, u32)>,
    /// Offset of every WRITE in arrival order.
    pub write_offsets: Vec<u64>,
    /// CLOSE count per handle.
    pub closes: HashMap<String, usize>,
    /// "rename" or "posix-rename" per rename request.
    pub renames: Vec<&'static str>,
    /// STAT/LSTAT count.
    pub stats: usize,
}

pub struct Server {
    pub state: Arc<Mutex<ServerState>>,
    pub task: JoinHandle<()>,
}

/// Spawn the scripted server and connect an [`Sftp`] session to it.
pub async fn connect(config: ServerConfig, options: SftpOptions) -> (Sftp, Server) {
    let (client_side, server_side) = tokio::io::duplex(1 << 20);

    let state = Arc::new(Mutex::new(ServerState::default()));
    {
        let mut st = state.lock().unwrap();
        for (path, contents) in &config.files {
            st.files.insert((*path).to_string(), contents.clone());
        }
        for dir in &config.dirs {
            st.dirs.insert((*dir).to_string());
        }
    }

    let task = tokio::spawn(serve(server_side, config, Arc::clone(&state)));

    let (reader, writer) = tokio::io::split(client_side);
    let sftp = Sftp::new(reader, writer, options)
        .await
        .expect("handshake against the scripted server");

    (sftp, Server { state, task })
}

/// Like [`connect`] but surfaces the handshake error.
pub async fn try_connect(
    config: ServerConfig,
    options: SftpOptions,
) -> Result<(Sftp, Server), sftp_mux::Error> {
    let (client_side, server_side) = tokio::io::duplex(1 << 20);
    let state = Arc::new(Mutex::new(ServerState::default()));
    let task = tokio::spawn(serve(server_side, config, Arc::clone(&state)));

    let (reader, writer) = tokio::io::split(client_side);
    let sftp = Sftp::new(reader, writer, options).await?;
    Ok((sftp, Server { state, task }))
}

struct Cur<'a> {
    b: &'a [u8],
    p: usize,
}

impl<'a> Cur<'a> {
    fn new(b: &'a [u8]) -> Self {
        Self { b, p: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.b[self.p];
        self.p += 1;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_be_bytes(self.b[self.p..self.p + 4].try_into().unwrap());
        self.p += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_be_bytes(self.b[self.p..self.p + 8].try_into().unwrap());
        self.p += 8;
        v
    }

    fn bytes(&mut self) -> Vec<u8> {
        let len = self.u32() as usize;
        let v = self.b[self.p..self.p + len].to_vec();
        self.p += len;
        v
    }

    fn string(&mut self) -> String {
        String::from_utf8(self.bytes()).unwrap()
    }

    fn skip_attrs(&mut self) {
        let flags = self.u32();
        if flags & ATTR_SIZE != 0 {
            self.p += 8;
        }
        if flags & ATTR_UIDGID != 0 {
            self.p += 8;
        }
        if flags & ATTR_PERMISSIONS != 0 {
            self.p += 4;
        }
        if flags & ATTR_ACMODTIME != 0 {
            self.p += 8;
        }
        if flags & ATTR_EXTENDED != 0 {
            let count = self.u32();
            for _ in 0..count {
                let _ = self.bytes();
                let _ = self.bytes();
            }
        }
    }
}

fn w32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn w64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn wbytes(out: &mut Vec<u8>, v: &[u8]) {
    w32(out, v.len() as u32);
    out.extend_from_slice(v);
}

fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    w32(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    out
}

fn status_reply(id: u32, code: u32, msg: &str) -> Vec<u8> {
    let mut b = vec![SSH_FXP_STATUS];
    w32(&mut b, id);
    w32(&mut b, code);
    wbytes(&mut b, msg.as_bytes());
    wbytes(&mut b, b"en");
    frame(b)
}

fn handle_reply(id: u32, handle: &str) -> Vec<u8> {
    let mut b = vec![SSH_FXP_HANDLE];
    w32(&mut b, id);
    wbytes(&mut b, handle.as_bytes());
    frame(b)
}

fn data_reply(id: u32, data: &[u8]) -> Vec<u8> {
    let mut b = vec![SSH_FXP_DATA];
    w32(&mut b, id);
    wbytes(&mut b, data);
    frame(b)
}

fn file_attrs(size: u64, mode: u32) -> Vec<u8> {
    let mut b = Vec::new();
    w32(&mut b, ATTR_SIZE | ATTR_PERMISSIONS);
    w64(&mut b, size);
    w32(&mut b, mode);
    b
}

fn attrs_reply(id: u32, size: u64, mode: u32) -> Vec<u8> {
    let mut b = vec![SSH_FXP_ATTRS];
    w32(&mut b, id);
    b.extend_from_slice(&file_attrs(size, mode));
    frame(b)
}

fn name_reply(id: u32, entries: &[(String, u64, u32)]) -> Vec<u8> {
    let mut b = vec![SSH_FXP_NAME];
    w32(&mut b, id);
    w32(&mut b, entries.len() as u32);
    for (name, size, mode) in entries {
        wbytes(&mut b, name.as_bytes());
        wbytes(&mut b, format!("---------- 1 u g {size} Jan 1 00:00 {name}").as_bytes());
        b.extend_from_slice(&file_attrs(*size, *mode));
    }
    frame(b)
}

fn version_reply(version: u32, extensions: &[(&str, &str)]) -> Vec<u8> {
    let mut b = vec![SSH_FXP_VERSION];
    w32(&mut b, version);
    for (name, data) in extensions {
        wbytes(&mut b, name.as_bytes());
        wbytes(&mut b, data.as_bytes());
    }
    frame(b)
}

struct OpenHandle {
    path: String,
    /// Directory listing snapshot plus cursor, for READDIR.
    entries: Vec<(String, u64, u32)>,
    cursor: usize,
}

async fn read_frame(r: &mut ReadHalf<DuplexStream>) -> Option<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes).await.ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await.ok()?;
    Some(body)
}

fn children(state: &ServerState, dir: &str) -> Vec<(String, u64, u32)> {
    let prefix = if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    };
    let mut out = Vec::new();
    for (path, contents) in &state.files {
        if let Some(rest) = path.strip_prefix(&prefix) {
            if !rest.is_empty() && !rest.contains('/') {
                out.push((rest.to_string(), contents.len() as u64, 0o100644));
            }
        }
    }
    for path in &state.dirs {
        if let Some(rest) = path.strip_prefix(&prefix) {
            if !rest.is_empty() && !rest.contains('/') {
                out.push((rest.to_string(), 0, 0o040755));
            }
        }
    }
    out
}

fn parent_exists(state: &ServerState, path: &str) -> bool {
    match path.rsplit_once('/') {
        Some(("", _)) | None => true,
        Some((parent, _)) => state.dirs.contains(parent),
    }
}

async fn serve(stream: DuplexStream, cfg: ServerConfig, state: Arc<Mutex<ServerState>>) {
    let (mut r, mut w) = tokio::io::split(stream);

    // Version exchange.
    let Some(init) = read_frame(&mut r).await else {
        return;
    };
    assert_eq!(init[0], SSH_FXP_INIT);
    let _ = w
        .write_all(&version_reply(cfg.version, &cfg.extensions))
        .await;
    let _ = w.flush().await;

    if cfg.drop_after_handshake {
        return;
    }
    if cfg.rogue_reply {
        let _ = w.write_all(&status_reply(0xdead_beef, SSH_FX_OK, "")).await;
        let _ = w.flush().await;
        return;
    }

    let mut handles: HashMap<String, OpenHandle> = HashMap::new();
    let mut next_handle = 0u32;
    let mut held_writes: Vec<Vec<u8>> = Vec::new();
    // Holding until a stat is a one-shot: once flushed, behave normally.
    let mut holding_until_stat = cfg.hold_writes_until_stat;

    while let Some(body) = read_frame(&mut r).await {
        if cfg.drop_on_first_request {
            return;
        }

        let mut c = Cur::new(&body);
        let typ = c.u8();
        let id = c.u32();

        let reply: Vec<u8> = match typ {
            SSH_FXP_OPEN => {
                let path = c.string();
                let pflags = c.u32();
                c.skip_attrs();

                let mut st = state.lock().unwrap();
                let exists = st.files.contains_key(&path);
                if !exists && pflags & 0x08 == 0 {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file")
                } else if exists && pflags & 0x20 != 0 {
                    status_reply(id, SSH_FX_FAILURE, "file exists")
                } else {
                    if !exists || pflags & 0x10 != 0 {
                        st.files.insert(path.clone(), Vec::new());
                    }
                    next_handle += 1;
                    let name = format!("h{next_handle}");
                    handles.insert(
                        name.clone(),
                        OpenHandle {
                            path,
                            entries: Vec::new(),
                            cursor: 0,
                        },
                    );
                    handle_reply(id, &name)
                }
            }

            SSH_FXP_OPENDIR => {
                let path = c.string();
                let st = state.lock().unwrap();
                if !st.dirs.contains(&path) {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such directory")
                } else {
                    let entries = children(&st, &path);
                    next_handle += 1;
                    let name = format!("h{next_handle}");
                    handles.insert(
                        name.clone(),
                        OpenHandle {
                            path,
                            entries,
                            cursor: 0,
                        },
                    );
                    handle_reply(id, &name)
                }
            }

            SSH_FXP_CLOSE => {
                let handle = String::from_utf8(c.bytes()).unwrap();
                *state.lock().unwrap().closes.entry(handle.clone()).or_insert(0) += 1;
                if handles.remove(&handle).is_some() {
                    status_reply(id, SSH_FX_OK, "")
                } else {
                    status_reply(id, SSH_FX_FAILURE, "bad handle")
                }
            }

            SSH_FXP_READ => {
                let handle = String::from_utf8(c.bytes()).unwrap();
                let offset = c.u64();
                let len = c.u32();

                let mut st = state.lock().unwrap();
                st.reads.push((offset, len));
                match handles.get(&handle) {
                    None => status_reply(id, SSH_FX_FAILURE, "bad handle"),
                    Some(open) => {
                        let contents = st.files.get(&open.path).cloned().unwrap_or_default();
                        let offset = offset as usize;
                        if offset >= contents.len() {
                            status_reply(id, SSH_FX_EOF, "eof")
                        } else {
                            let take =
                                (len as usize + cfg.overdeliver_reads).min(contents.len() - offset);
                            data_reply(id, &contents[offset..offset + take])
                        }
                    }
                }
            }

            SSH_FXP_WRITE => {
                let handle = String::from_utf8(c.bytes()).unwrap();
                let offset = c.u64();
                let data = c.bytes();

                let reply = {
                    let mut st = state.lock().unwrap();
                    st.write_offsets.push(offset);
                    if cfg.fail_write_at == Some(offset) {
                        status_reply(id, SSH_FX_FAILURE, "injected failure")
                    } else {
                        match handles.get(&handle) {
                            None => status_reply(id, SSH_FX_FAILURE, "bad handle"),
                            Some(open) => {
                                let contents = st.files.entry(open.path.clone()).or_default();
                                let end = offset as usize + data.len();
                                if contents.len() < end {
                                    contents.resize(end, 0);
                                }
                                contents[offset as usize..end].copy_from_slice(&data);
                                status_reply(id, SSH_FX_OK, "")
                            }
                        }
                    }
                };

                if cfg.hold_writes > 0 || holding_until_stat {
                    held_writes.push(reply);
                    if cfg.hold_writes > 0 && held_writes.len() == cfg.hold_writes {
                        if cfg.reverse_held {
                            held_writes.reverse();
                        }
                        for held in held_writes.drain(..) {
                            let _ = w.write_all(&held).await;
                        }
                        let _ = w.flush().await;
                    }
                    continue;
                }
                reply
            }

            SSH_FXP_FSTAT => {
                let handle = String::from_utf8(c.bytes()).unwrap();
                match handles.get(&handle) {
                    None => status_reply(id, SSH_FX_FAILURE, "bad handle"),
                    Some(open) => {
                        let st = state.lock().unwrap();
                        let size = st.files.get(&open.path).map_or(0, Vec::len) as u64;
                        attrs_reply(id, size, 0o100644)
                    }
                }
            }

            SSH_FXP_STAT | SSH_FXP_LSTAT => {
                let path = c.string();
                let mut st = state.lock().unwrap();
                st.stats += 1;
                let st = &*st;
                if st.dirs.contains(&path) {
                    attrs_reply(id, 0, 0o040755)
                } else if let Some(contents) = st.files.get(&path) {
                    attrs_reply(id, contents.len() as u64, 0o100644)
                } else if typ == SSH_FXP_LSTAT && st.symlinks.contains_key(&path) {
                    attrs_reply(id, 0, 0o120777)
                } else {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file")
                }
            }

            SSH_FXP_SETSTAT | SSH_FXP_FSETSTAT => status_reply(id, SSH_FX_OK, ""),

            SSH_FXP_READDIR => {
                let handle = String::from_utf8(c.bytes()).unwrap();
                match handles.get_mut(&handle) {
                    None => status_reply(id, SSH_FX_FAILURE, "bad handle"),
                    Some(open) if open.cursor >= open.entries.len() => {
                        status_reply(id, SSH_FX_EOF, "eof")
                    }
                    Some(open) => {
                        let end = (open.cursor + cfg.dir_batch).min(open.entries.len());
                        let batch = &open.entries[open.cursor..end];
                        open.cursor = end;
                        name_reply(id, batch)
                    }
                }
            }

            SSH_FXP_REMOVE => {
                let path = c.string();
                let mut st = state.lock().unwrap();
                if st.files.remove(&path).is_some() {
                    status_reply(id, SSH_FX_OK, "")
                } else if st.dirs.contains(&path) {
                    status_reply(id, SSH_FX_FAILURE, "is a directory")
                } else {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file")
                }
            }

            SSH_FXP_MKDIR => {
                let path = c.string();
                c.skip_attrs();
                let mut st = state.lock().unwrap();
                if st.dirs.contains(&path) || st.files.contains_key(&path) {
                    status_reply(id, SSH_FX_FAILURE, "already exists")
                } else if !parent_exists(&st, &path) {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no parent")
                } else {
                    st.dirs.insert(path);
                    status_reply(id, SSH_FX_OK, "")
                }
            }

            SSH_FXP_RMDIR => {
                let path = c.string();
                let mut st = state.lock().unwrap();
                if !st.dirs.contains(&path) {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such directory")
                } else if !children(&st, &path).is_empty() {
                    status_reply(id, SSH_FX_FAILURE, "not empty")
                } else {
                    st.dirs.remove(&path);
                    status_reply(id, SSH_FX_OK, "")
                }
            }

            SSH_FXP_REALPATH => {
                let path = c.string();
                let canonical = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                name_reply(id, &[(canonical, 0, 0o040755)])
            }

            SSH_FXP_RENAME => {
                let oldpath = c.string();
                let newpath = c.string();
                let mut st = state.lock().unwrap();
                st.renames.push("rename");
                if st.files.contains_key(&newpath) {
                    status_reply(id, SSH_FX_FAILURE, "destination exists")
                } else if let Some(contents) = st.files.remove(&oldpath) {
                    st.files.insert(newpath, contents);
                    status_reply(id, SSH_FX_OK, "")
                } else {
                    status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file")
                }
            }

            SSH_FXP_READLINK => {
                let path = c.string();
                let st = state.lock().unwrap();
                match st.symlinks.get(&path) {
                    Some(target) => name_reply(id, &[(target.clone(), 0, 0o120777)]),
                    None => status_reply(id, SSH_FX_NO_SUCH_FILE, "no such link"),
                }
            }

            SSH_FXP_SYMLINK => {
                // draft-02 order: linkpath, then targetpath.
                let link = c.string();
                let target = c.string();
                state.lock().unwrap().symlinks.insert(link, target);
                status_reply(id, SSH_FX_OK, "")
            }

            SSH_FXP_EXTENDED => {
                let name = c.string();
                match name.as_str() {
                    "posix-rename@openssh.com" => {
                        let oldpath = c.string();
                        let newpath = c.string();
                        let mut st = state.lock().unwrap();
                        st.renames.push("posix-rename");
                        match st.files.remove(&oldpath) {
                            Some(contents) => {
                                st.files.insert(newpath, contents);
                                status_reply(id, SSH_FX_OK, "")
                            }
                            None => status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file"),
                        }
                    }
                    "fsync@openssh.com" => status_reply(id, SSH_FX_OK, ""),
                    "hardlink@openssh.com" => {
                        let oldpath = c.string();
                        let newpath = c.string();
                        let mut st = state.lock().unwrap();
                        match st.files.get(&oldpath).cloned() {
                            Some(contents) => {
                                st.files.insert(newpath, contents);
                                status_reply(id, SSH_FX_OK, "")
                            }
                            None => status_reply(id, SSH_FX_NO_SUCH_FILE, "no such file"),
                        }
                    }
                    "statvfs@openssh.com" => {
                        let mut b = vec![SSH_FXP_EXTENDED_REPLY];
                        w32(&mut b, id);
                        for v in [4096u64, 4096, 1000, 500, 400, 100, 90, 80, 7, 0, 255] {
                            w64(&mut b, v);
                        }
                        frame(b)
                    }
                    _ => status_reply(id, SSH_FX_OP_UNSUPPORTED, "unsupported"),
                }
            }

            _ => status_reply(id, SSH_FX_OP_UNSUPPORTED, "unsupported"),
        };

        // A STAT answer flushes write replies that were held back for the
        // cancellation scenario.
        let flush_held =
            holding_until_stat && matches!(typ, SSH_FXP_STAT | SSH_FXP_LSTAT | SSH_FXP_FSTAT);

        if w.write_all(&reply).await.is_err() {
            return;
        }
        if flush_held {
            holding_until_stat = false;
            for held in held_writes.drain(..) {
                if w.write_all(&held).await.is_err() {
                    return;
                }
            }
        }
        if w.flush().await.is_err() {
            return;
        }
    }
}
