//! Remote file handles: positional, sequential and streaming I/O.
//!
//! Transfers larger than the per-request data limit are split into
//! sub-requests and pipelined through a sliding window of at most
//! max-in-flight outstanding requests. Replies are consumed strictly in
//! dispatch order (ascending offsets), so the first failure seen while
//! draining is the least-offset failure and everything before it is known
//! committed.

use std::cmp::min;
use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

use crate::client::Sftp;
use crate::conn::Conn;
use crate::error::Error;
use crate::handle::RemoteHandle;
use crate::metadata::{MetaData, Permissions};
use crate::pool::SlotGuard;
use crate::protocol::attrs::FileAttrs;
use crate::protocol::constants::*;
use crate::protocol::packet::{self, RawPacket, Request};

/// Options and flags which can be used to configure how a file is opened.
#[derive(Debug, Copy, Clone)]
pub struct OpenOptions<'s> {
    sftp: &'s Sftp,
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl<'s> OpenOptions<'s> {
    pub(crate) fn new(sftp: &'s Sftp) -> Self {
        Self {
            sftp,
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
        }
    }

    /// Sets the option for read access.
    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Sets the option for write access.
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Request the server-side append flag.
    ///
    /// The engine's own transfers always carry explicit offsets; the flag
    /// only matters to other writers of the same remote file.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Truncate the file to zero length if it exists. Only takes effect
    /// together with [`OpenOptions::create`].
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Create the file if it does not exist.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Create a new file, failing if it already exists. When set,
    /// `create` and `truncate` are ignored.
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    fn pflags(&self) -> u32 {
        let mut flags = 0;
        if self.read {
            flags |= SSH_FXF_READ;
        }
        if self.write || self.append {
            flags |= SSH_FXF_WRITE;
        }
        if self.append {
            flags |= SSH_FXF_APPEND;
        }
        if self.create_new {
            flags |= SSH_FXF_CREAT | SSH_FXF_EXCL;
        } else if self.create {
            flags |= SSH_FXF_CREAT;
            if self.truncate {
                flags |= SSH_FXF_TRUNC;
            }
        }
        flags
    }

    /// Open the file at `path` with this set of options.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<File, Error> {
        let path = path.as_ref();
        let conn = self.sftp.conn();

        let attrs = FileAttrs::new();
        let req = Request::Open {
            path,
            pflags: self.pflags(),
            attrs: &attrs,
        };
        let raw = async {
            let pkt = conn.round_trip(&req, None).await?;
            conn.finish_handle(pkt)
        }
        .await
        .map_err(|err| err.with_path("open", path.to_string_lossy()))?;

        Ok(File {
            handle: RemoteHandle::new(Arc::clone(conn), raw),
            path: path.into(),
            is_readable: self.read,
            is_writable: self.write || self.append,
            offset: RwLock::new(0),
        })
    }
}

/// A reference to an open remote file.
///
/// Positional operations (`read_at`, `write_at`) take explicit offsets and
/// may run concurrently. Sequential operations share the file's current
/// offset and serialize on it.
#[derive(Debug)]
pub struct File {
    handle: RemoteHandle,
    path: Box<Path>,

    is_readable: bool,
    is_writable: bool,

    /// Current offset for sequential operations. Reads and writes take this
    /// exclusively to advance it; metadata operations take it shared.
    offset: RwLock<u64>,
}

impl File {
    fn conn(&self) -> &Arc<Conn> {
        self.handle.conn()
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn check_readable(&self) -> Result<(), Error> {
        if self.is_readable {
            Ok(())
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "file is not opened for reading",
            )))
        }
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.is_writable {
            Ok(())
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "file is not opened for writing",
            )))
        }
    }

    /// The remote path this file was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Returns the number of bytes read; a count smaller than `buf.len()`
    /// (including zero) means end of file was reached. Large reads are
    /// pipelined and assembled in offset order.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        self.check_readable()?;
        self.read_at_inner(buf, offset)
            .await
            .map_err(|err| err.with_path("readat", self.path_str()))
    }

    /// Write all of `buf` at `offset`.
    ///
    /// On success the whole buffer was committed. On failure the error
    /// reports how many bytes before the first failing offset are known
    /// committed, and the file's sequential offset is repositioned to that
    /// boundary.
    pub async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, Error> {
        self.check_writable()?;
        match self.write_at_inner(buf, offset).await {
            Ok(n) => Ok(n),
            Err(err) => {
                *self.offset.write().await = offset + err.transferred().unwrap_or(0);
                Err(err.with_path("writeat", self.path_str()))
            }
        }
    }

    /// Read from the current offset, advancing it by the bytes read.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_readable()?;
        let mut offset = self.offset.write().await;
        match self.read_at_inner(buf, *offset).await {
            Ok(n) => {
                *offset += n as u64;
                Ok(n)
            }
            Err(err) => {
                *offset += err.transferred().unwrap_or(0);
                Err(err.with_path("read", self.path_str()))
            }
        }
    }

    /// Write at the current offset, advancing it by the bytes committed.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        self.check_writable()?;
        let mut offset = self.offset.write().await;
        match self.write_at_inner(buf, *offset).await {
            Ok(n) => {
                *offset += n as u64;
                Ok(n)
            }
            Err(err) => {
                *offset += err.transferred().unwrap_or(0);
                Err(err.with_path("write", self.path_str()))
            }
        }
    }

    /// Reposition the sequential offset. `SeekFrom::End` queries the
    /// current size from the server. Seeks that would land on a negative
    /// or overflowing position are rejected regardless of whence.
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64, Error> {
        let mut offset = self.offset.write().await;
        let new = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => apply_delta(*offset, delta)?,
            SeekFrom::End(delta) => {
                let size = self
                    .fstat()
                    .await
                    .map_err(|err| err.with_path("seek", self.path_str()))?
                    .len()
                    .ok_or(Error::InvalidSeek)?;
                apply_delta(size, delta)?
            }
        };
        *offset = new;
        Ok(new)
    }

    /// Stream the rest of the file into `w`, advancing the offset past
    /// every byte that was both received and written.
    pub async fn stream_to<W>(&self, w: &mut W) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.check_readable()?;
        let mut offset = self.offset.write().await;
        let start = *offset;
        match self.stream_to_inner(w, start).await {
            Ok(n) => {
                *offset = start + n;
                Ok(n)
            }
            Err(err) => {
                *offset = start + err.transferred().unwrap_or(0);
                Err(err.with_path("writeto", self.path_str()))
            }
        }
    }

    /// Stream all of `r` into the file at the current offset, advancing it
    /// past every committed byte.
    pub async fn fill_from<R>(&self, r: &mut R) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.check_writable()?;
        let mut offset = self.offset.write().await;
        let start = *offset;
        match self.fill_from_inner(r, start).await {
            Ok(n) => {
                *offset = start + n;
                Ok(n)
            }
            Err(err) => {
                *offset = start + err.transferred().unwrap_or(0);
                Err(err.with_path("readfrom", self.path_str()))
            }
        }
    }

    /// Query metadata about the file (FSTAT).
    pub async fn metadata(&self) -> Result<MetaData, Error> {
        let _offset = self.offset.read().await;
        self.fstat()
            .await
            .map_err(|err| err.with_path("fstat", self.path_str()))
    }

    /// Truncate or extend the file to `size`.
    pub async fn set_len(&self, size: u64) -> Result<(), Error> {
        self.check_writable()?;
        let mut attrs = FileAttrs::new();
        attrs.size = Some(size);
        self.fsetstat(attrs)
            .await
            .map_err(|err| err.with_path("truncate", self.path_str()))
    }

    /// Change the permission bits on the file.
    pub async fn set_permissions(&self, perm: Permissions) -> Result<(), Error> {
        let mut attrs = FileAttrs::new();
        attrs.permissions = Some(perm.bits());
        self.fsetstat(attrs)
            .await
            .map_err(|err| err.with_path("chmod", self.path_str()))
    }

    /// Change the owner of the file.
    pub async fn set_owner(&self, uid: u32, gid: u32) -> Result<(), Error> {
        let mut attrs = FileAttrs::new();
        attrs.uid_gid = Some((uid, gid));
        self.fsetstat(attrs)
            .await
            .map_err(|err| err.with_path("chown", self.path_str()))
    }

    /// Change access and modification times, seconds since the epoch.
    pub async fn set_times(&self, atime: u32, mtime: u32) -> Result<(), Error> {
        let mut attrs = FileAttrs::new();
        attrs.times = Some((atime, mtime));
        self.fsetstat(attrs)
            .await
            .map_err(|err| err.with_path("chtimes", self.path_str()))
    }

    /// Ask the server to flush the file to stable storage. Requires the
    /// fsync@openssh.com extension.
    pub async fn sync_all(&self) -> Result<(), Error> {
        if !self.conn().extensions().fsync {
            return Err(Error::UnsupportedExtension(EXT_FSYNC));
        }
        let raw = self.handle.get()?;
        let conn = self.conn();
        let res = async {
            let pkt = conn
                .round_trip(
                    &Request::Fsync { handle: &raw },
                    Some(self.handle.closed_token()),
                )
                .await?;
            conn.finish_status(pkt)
        }
        .await;
        res.map_err(|err| err.with_path("fsync", self.path_str()))
    }

    /// Close the file, sending the single CLOSE request.
    ///
    /// Exactly one CLOSE is ever sent for a handle: the winner of a close
    /// race proceeds, every other closer (and every operation started after
    /// the close) gets [`Error::HandleClosed`]. Operations in flight at
    /// close time return promptly with the same error and their late
    /// replies are absorbed. The CLOSE itself is never cancelled.
    pub async fn close(&self) -> Result<(), Error> {
        self.handle
            .close()
            .await
            .map_err(|err| err.with_path("close", self.path_str()))
    }

    async fn fstat(&self) -> Result<MetaData, Error> {
        let raw = self.handle.get()?;
        let conn = self.conn();
        let pkt = conn
            .round_trip(
                &Request::Fstat { handle: &raw },
                Some(self.handle.closed_token()),
            )
            .await?;
        conn.finish_attrs(pkt).map(MetaData::new)
    }

    async fn fsetstat(&self, attrs: FileAttrs) -> Result<(), Error> {
        let _offset = self.offset.read().await;
        let raw = self.handle.get()?;
        let conn = self.conn();
        let pkt = conn
            .round_trip(
                &Request::Fsetstat {
                    handle: &raw,
                    attrs: &attrs,
                },
                Some(self.handle.closed_token()),
            )
            .await?;
        conn.finish_status(pkt)
    }

    async fn read_at_inner(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(self.conn());
        let raw = self.handle.get()?;
        let token = self.handle.closed_token();
        let limits = conn.limits();
        let max_data = limits.max_data_len as usize;

        let total = buf.len();
        let mut window: VecDeque<(usize, usize, u32, SlotGuard)> = VecDeque::new();
        let mut next = 0usize;
        // Set once a chunk fails or comes back short: the transfer boundary
        // and the error, if any (none means end of file). Only the
        // least-offset boundary is kept.
        let mut stop: Option<(usize, Option<Error>)> = None;

        fn note(stop: &mut Option<(usize, Option<Error>)>, boundary: usize, err: Option<Error>) {
            if stop.as_ref().map_or(true, |(b, _)| boundary < *b) {
                *stop = Some((boundary, err));
            }
        }

        loop {
            while stop.is_none() && next < total && window.len() < limits.max_inflight {
                let len = min(total - next, max_data);
                let req = Request::Read {
                    handle: &raw,
                    offset: offset + next as u64,
                    len: len as u32,
                };
                match conn.dispatch(&req, Some(token)).await {
                    Ok((id, slot)) => {
                        window.push_back((next, len, id, slot));
                        next += len;
                    }
                    Err(err) => stop = Some((next, Some(err))),
                }
            }

            let Some((start, len, id, mut slot)) = window.pop_front() else {
                break;
            };

            // Replies keep being decoded after a failure: a chunk still in
            // the window has a smaller offset than whatever set `stop`, so
            // an error it carries supersedes the recorded boundary.
            match conn.recv(id, &mut slot, Some(token)).await {
                Ok(pkt) => match finish_data_into(&conn, pkt, &mut buf[start..start + len]) {
                    Ok(n) if n == len => {}
                    // A short chunk is the end-of-file boundary.
                    Ok(n) => note(&mut stop, start + n, None),
                    Err(Error::Eof) => note(&mut stop, start, None),
                    Err(err) => note(&mut stop, start, Some(err)),
                },
                Err(err) => note(&mut stop, start, Some(err)),
            }
        }

        match stop {
            None => Ok(total),
            Some((boundary, None)) => Ok(boundary),
            Some((0, Some(err))) => Err(err),
            Some((boundary, Some(err))) => Err(Error::Partial {
                transferred: boundary as u64,
                source: Box::new(err),
            }),
        }
    }

    async fn write_at_inner(&self, buf: &[u8], offset: u64) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(self.conn());
        let raw = self.handle.get()?;
        let token = self.handle.closed_token();
        let limits = conn.limits();
        let max_data = limits.max_data_len as usize;

        let total = buf.len();
        let mut window: VecDeque<(usize, u32, SlotGuard)> = VecDeque::new();
        let mut next = 0usize;
        // Least-offset failure seen so far.
        let mut stop: Option<(usize, Error)> = None;

        loop {
            while stop.is_none() && next < total && window.len() < limits.max_inflight {
                let len = min(total - next, max_data);
                let req = Request::Write {
                    handle: &raw,
                    offset: offset + next as u64,
                    data: &buf[next..next + len],
                };
                match conn.dispatch(&req, Some(token)).await {
                    Ok((id, slot)) => {
                        window.push_back((next, id, slot));
                        next += len;
                    }
                    Err(err) => stop = Some((next, err)),
                }
            }

            let Some((start, id, mut slot)) = window.pop_front() else {
                break;
            };

            // Chunks still in the window after a failure have smaller
            // offsets than whatever set `stop`; a genuine server error
            // among them is the real boundary, so keep decoding.
            match conn
                .recv(id, &mut slot, Some(token))
                .await
                .and_then(|pkt| conn.finish_status(pkt))
            {
                Ok(()) => {}
                Err(err) => {
                    if stop.as_ref().map_or(true, |(b, _)| start < *b) {
                        stop = Some((start, err));
                    }
                }
            }
        }

        match stop {
            None => Ok(total),
            Some((0, err)) => Err(err),
            Some((boundary, err)) => Err(Error::Partial {
                transferred: boundary as u64,
                source: Box::new(err),
            }),
        }
    }

    async fn stream_to_inner<W>(&self, w: &mut W, start: u64) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let conn = Arc::clone(self.conn());
        let raw = self.handle.get()?;
        let token = self.handle.closed_token();
        let limits = conn.limits();
        let chunk_len = limits.max_data_len;

        let mut window: VecDeque<(u64, u32, SlotGuard)> = VecDeque::new();
        let mut dispatched = 0u64;
        let mut written = 0u64;
        // Least-offset transfer boundary: the error, if any (none means a
        // clean end of file).
        let mut stop: Option<(u64, Option<Error>)> = None;

        fn note(stop: &mut Option<(u64, Option<Error>)>, boundary: u64, err: Option<Error>) {
            if stop.as_ref().map_or(true, |(b, _)| boundary < *b) {
                *stop = Some((boundary, err));
            }
        }

        loop {
            while stop.is_none() && window.len() < limits.max_inflight {
                let req = Request::Read {
                    handle: &raw,
                    offset: start + dispatched,
                    len: chunk_len,
                };
                match conn.dispatch(&req, Some(token)).await {
                    Ok((id, slot)) => {
                        window.push_back((dispatched, id, slot));
                        dispatched += u64::from(chunk_len);
                    }
                    Err(err) => note(&mut stop, dispatched, Some(err)),
                }
            }

            let Some((off, id, mut slot)) = window.pop_front() else {
                break;
            };

            // Replies keep being decoded after a failure: a chunk still in
            // the window has a smaller offset than whatever set `stop`, and
            // a genuine error it carries is the real boundary.
            match conn.recv(id, &mut slot, Some(token)).await {
                Ok(pkt) => match finish_data_buf(&conn, pkt) {
                    Ok(data) => {
                        if stop.as_ref().map_or(true, |(b, _)| off < *b) {
                            let n = min(data.len(), chunk_len as usize);
                            let res = w.write_all(&data[..n]).await;
                            conn.reclaim(data.into_inner());
                            match res {
                                Ok(()) => {
                                    written += n as u64;
                                    if n < chunk_len as usize {
                                        note(&mut stop, off + n as u64, None);
                                    }
                                }
                                Err(err) => note(&mut stop, off, Some(Error::Io(err))),
                            }
                        } else {
                            // At or past the boundary: the bytes are moot.
                            conn.reclaim(data.into_inner());
                        }
                    }
                    Err(Error::Eof) => note(&mut stop, off, None),
                    Err(err) => note(&mut stop, off, Some(err)),
                },
                Err(err) => note(&mut stop, off, Some(err)),
            }
        }

        match stop {
            None | Some((_, None)) => Ok(written),
            Some((_, Some(err))) if written == 0 => Err(err),
            Some((_, Some(err))) => Err(Error::Partial {
                transferred: written,
                source: Box::new(err),
            }),
        }
    }

    async fn fill_from_inner<R>(&self, r: &mut R, start: u64) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let conn = Arc::clone(self.conn());
        let raw = self.handle.get()?;
        let token = self.handle.closed_token();
        let limits = conn.limits();
        let max_data = limits.max_data_len as usize;

        // One scratch chunk is enough: dispatch copies the payload into the
        // outgoing frame before returning, so the buffer is free again
        // right away.
        let mut chunk = conn.scratch();
        chunk.resize(max_data, 0);

        let mut window: VecDeque<(u64, u64, u32, SlotGuard)> = VecDeque::new();
        let mut dispatched = 0u64;
        let mut committed = 0u64;
        let mut input_done = false;
        // Least-offset failure: chunk offset relative to `start`, error.
        let mut stop: Option<(u64, Error)> = None;

        loop {
            while stop.is_none() && !input_done && window.len() < limits.max_inflight {
                let mut filled = 0usize;
                while filled < max_data {
                    match r.read(&mut chunk[filled..]).await {
                        Ok(0) => {
                            input_done = true;
                            break;
                        }
                        Ok(n) => filled += n,
                        Err(err) => {
                            input_done = true;
                            stop = Some((dispatched, Error::Io(err)));
                            break;
                        }
                    }
                }
                if filled == 0 || stop.is_some() {
                    break;
                }

                let req = Request::Write {
                    handle: &raw,
                    offset: start + dispatched,
                    data: &chunk[..filled],
                };
                match conn.dispatch(&req, Some(token)).await {
                    Ok((id, slot)) => {
                        window.push_back((dispatched, filled as u64, id, slot));
                        dispatched += filled as u64;
                    }
                    Err(err) => stop = Some((dispatched, err)),
                }
            }

            let Some((chunk_start, chunk_len, id, mut slot)) = window.pop_front() else {
                break;
            };

            match conn
                .recv(id, &mut slot, Some(token))
                .await
                .and_then(|pkt| conn.finish_status(pkt))
            {
                Ok(()) => {
                    // Replies arrive in dispatch order, so the success
                    // prefix stays contiguous up to the first failure.
                    if stop.as_ref().map_or(true, |(b, _)| chunk_start < *b) {
                        committed = chunk_start + chunk_len;
                    }
                }
                Err(err) => {
                    if stop.as_ref().map_or(true, |(b, _)| chunk_start < *b) {
                        stop = Some((chunk_start, err));
                    }
                }
            }
        }

        conn.reclaim(chunk);

        match stop {
            None => Ok(committed),
            Some((_, err)) if committed == 0 => Err(err),
            Some((_, err)) => Err(Error::Partial {
                transferred: committed,
                source: Box::new(err),
            }),
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.handle.close_in_background();
    }
}

fn apply_delta(base: u64, delta: i64) -> Result<u64, Error> {
    let new = if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    };
    new.ok_or(Error::InvalidSeek)
}

/// Decode a DATA reply into `dest`, clipping to the destination length
/// before copying so server over-delivery can never overrun the caller's
/// buffer. A STATUS EOF comes back as [`Error::Eof`].
fn finish_data_into(conn: &Conn, pkt: RawPacket, dest: &mut [u8]) -> Result<usize, Error> {
    match pkt.typ {
        SSH_FXP_DATA => {
            let res = packet::parse_data(pkt.body()).map(|data| {
                let n = min(data.len(), dest.len());
                dest[..n].copy_from_slice(&data[..n]);
                n
            });
            conn.reclaim(pkt.into_buf());
            res
        }
        SSH_FXP_STATUS => match conn.finish_status(pkt) {
            Ok(()) => Err(Error::BadMessage("ok status where data was required")),
            Err(err) => Err(err),
        },
        actual => {
            conn.reclaim(pkt.into_buf());
            Err(Error::UnexpectedPacket { actual })
        }
    }
}

/// Decode a DATA reply in place, keeping the pooled frame buffer alive so
/// the body can be written onward without copying.
fn finish_data_buf(conn: &Conn, pkt: RawPacket) -> Result<DataBuf, Error> {
    match pkt.typ {
        SSH_FXP_DATA => {
            let len = match packet::parse_data(pkt.body()) {
                Ok(data) => data.len(),
                Err(err) => {
                    conn.reclaim(pkt.into_buf());
                    return Err(err);
                }
            };
            // Body layout: type (1) + id (4) + data length (4), then data.
            Ok(DataBuf {
                buf: pkt.into_buf(),
                start: 9,
                len,
            })
        }
        SSH_FXP_STATUS => match conn.finish_status(pkt) {
            Ok(()) => Err(Error::BadMessage("ok status where data was required")),
            Err(err) => Err(err),
        },
        actual => {
            conn.reclaim(pkt.into_buf());
            Err(Error::UnexpectedPacket { actual })
        }
    }
}

/// A pooled frame buffer viewed as its DATA body.
struct DataBuf {
    buf: Vec<u8>,
    start: usize,
    len: usize,
}

impl DataBuf {
    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl std::ops::Deref for DataBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }
}
